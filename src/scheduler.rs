//! Tick-driven cooperative task scheduling.
//!
//! Every task owns a fixed period and a countdown measured in ticks. One
//! scheduler pass per consumed tick decrements every countdown; tasks that
//! reach zero are collected as due and their countdowns reset to the full
//! period, so a task with period P fires on exactly every P-th tick no
//! matter what the other tasks spend. Task bodies run to completion in the
//! caller — the scheduler itself never blocks and never preempts.

use heapless::Vec;
use serde::{Deserialize, Serialize};

/// Upper bound on registered tasks.
pub const MAX_TASKS: usize = 8;

/// The periodic jobs the node runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TaskId {
    /// Toggle the status indicator.
    Heartbeat,
    /// Convert and read every cached sensor.
    Poll,
    /// Publish a state snapshot.
    Report,
    /// Re-enumerate devices signaling an alarm condition.
    AlarmScan,
}

/// One schedule entry: owned by the scheduler, mutated only when its
/// deadline arrives.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TaskSlot {
    pub id: TaskId,
    pub period: u16,
    pub remaining: u16,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub ticks_observed: u32,
    pub dispatched: u32,
    pub skipped: u32,
}

#[derive(Debug)]
pub struct TaskScheduler {
    slots: Vec<TaskSlot, MAX_TASKS>,
    stats: SchedulerStats,
}

impl TaskScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            stats: SchedulerStats::default(),
        }
    }

    /// Register a task with its period in ticks. The first deadline is a
    /// full period away.
    pub fn register(&mut self, id: TaskId, period: u16) -> Result<(), &'static str> {
        // NASA Rule 5: Safety assertion for schedule table capacity
        debug_assert!(
            self.slots.len() < MAX_TASKS,
            "task table length {} at capacity {}",
            self.slots.len(),
            MAX_TASKS
        );

        if period == 0 {
            return Err("task period must be at least one tick");
        }
        if self.slots.iter().any(|slot| slot.id == id) {
            return Err("task already registered");
        }

        self.slots
            .push(TaskSlot {
                id,
                period,
                remaining: period,
            })
            .map_err(|_| "task table full")
    }

    /// One scheduler pass for one consumed tick: count every task down
    /// and collect the due ones, deadlines already reset.
    pub fn advance(&mut self) -> Vec<TaskId, MAX_TASKS> {
        self.stats.ticks_observed += 1;

        let mut due: Vec<TaskId, MAX_TASKS> = Vec::new();
        for slot in self.slots.iter_mut() {
            slot.remaining -= 1;
            if slot.remaining == 0 {
                slot.remaining = slot.period;
                let _ = due.push(slot.id);
                self.stats.dispatched += 1;
            }
        }
        due
    }

    /// Note that a due task found its prerequisite unavailable and did no
    /// work. Its deadline was already reset by [`Self::advance`] — the
    /// next period is the retry.
    pub fn note_skip(&mut self) {
        self.stats.skipped += 1;
    }

    #[must_use]
    pub fn get_stats(&self) -> &SchedulerStats {
        &self.stats
    }

    #[must_use]
    pub fn slots(&self) -> &[TaskSlot] {
        &self.slots
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new()
    }
}
