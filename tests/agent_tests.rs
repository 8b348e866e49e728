use owbus::sim::{FaultPlan, SimBus, SimDevice, SimNvm};
use owbus::*;

fn agent_on<'c>(
    sim: &SimBus,
    clock: &'c TickClock,
    config: AgentConfig,
) -> NodeAgent<'c, SimBus, SimBus, SimNvm> {
    let mut agent = NodeAgent::new(sim.clone(), sim.clone(), SimNvm::new(), clock, config);
    agent.init().unwrap();
    agent
}

/// Feed ticks one at a time the way the timer interrupt would, and
/// collect whatever reports the mainline produces.
fn run_ticks(
    clock: &TickClock,
    agent: &mut NodeAgent<'_, SimBus, SimBus, SimNvm>,
    ticks: u32,
) -> Vec<NodeReport> {
    let mut reports = Vec::new();
    for _ in 0..ticks {
        clock.tick_from_isr();
        if let Some(report) = agent.service().unwrap() {
            reports.push(report);
        }
    }
    reports
}

fn quick(serial_seed: u8) -> SimDevice {
    SimDevice::new([serial_seed, 0x42, 0x42, 0, 0, serial_seed]).with_conversion_time_ms(1)
}

#[test]
fn test_init_probes_peripherals_and_enumerates_the_wire() {
    let sim = SimBus::with_devices(vec![quick(1), quick(2), quick(3)]);
    let clock = TickClock::new();
    let agent = agent_on(&sim, &clock, AgentConfig::default());

    assert_eq!(agent.device_count(), 3);
    assert_eq!(agent.alarm_count(), 0);
    // Bus and display ready, nothing faulted.
    assert_eq!(agent.get_flags().as_byte(), 0b0000_0011);
    assert!(agent.get_readings().is_empty());
}

#[test]
fn test_service_without_a_pending_tick_is_a_no_op() {
    let sim = SimBus::with_devices(vec![quick(1)]);
    let clock = TickClock::new();
    let mut agent = agent_on(&sim, &clock, AgentConfig::default());

    assert!(agent.service().unwrap().is_none());
    assert_eq!(agent.get_scheduler_stats().ticks_observed, 0);
}

#[test]
fn test_heartbeat_toggles_on_its_period() {
    let sim = SimBus::with_devices(vec![quick(1)]);
    let clock = TickClock::new();
    let mut agent = agent_on(&sim, &clock, AgentConfig::default());

    run_ticks(&clock, &mut agent, 1500);
    assert_eq!(agent.get_stats().heartbeats, 3);
    assert!(agent.indicator_on());

    run_ticks(&clock, &mut agent, 500);
    assert_eq!(agent.get_stats().heartbeats, 4);
    assert!(!agent.indicator_on());
}

#[test]
fn test_poll_reads_every_cached_sensor() {
    let warm = quick(1).with_temperature(0x0191); // +25.0625 °C
    let hot = quick(2).with_temperature(0x0320); // +50 °C
    let sim = SimBus::with_devices(vec![warm, hot]);
    let clock = TickClock::new();
    let mut agent = agent_on(&sim, &clock, AgentConfig::default());

    run_ticks(&clock, &mut agent, 4000);

    assert_eq!(agent.get_stats().polls, 1);
    let readings = agent.get_readings();
    assert_eq!(readings.len(), 2);

    // Each reading pairs the cached identity with that device's latch.
    for reading in readings {
        let raw = (0..sim.device_count())
            .filter_map(|i| sim.snapshot(i))
            .find(|snap| snap.rom == reading.identity)
            .map(|snap| snap.temperature_raw)
            .unwrap();
        assert_eq!(reading.temperature, Temperature::from_raw(raw));
    }
}

#[test]
fn test_report_carries_the_state_snapshot() {
    let sim = SimBus::with_devices(vec![quick(1)]);
    let clock = TickClock::new();
    let mut agent = agent_on(&sim, &clock, AgentConfig::default());

    let reports = run_ticks(&clock, &mut agent, 1000);

    assert_eq!(reports.len(), 1);
    let report = &reports[0];
    assert_eq!(report.uptime_seconds, 1);
    assert_eq!(report.devices, 1);
    assert_eq!(report.alarms, 0);
    assert_eq!(report.flags, 0b0000_0011);
    // Two heartbeats by tick 1000, so the indicator is back off.
    assert!(!report.indicator);
    assert_eq!(report.stats.heartbeats, 2);
    assert_eq!(report.stats.reports, 1);
    assert_eq!(report.scheduler.ticks_observed, 1000);
}

#[test]
fn test_bus_fault_skips_exactly_one_cycle_then_retries() {
    let config = AgentConfig {
        poll_period: 100,
        report_period: 50_000,
        alarm_scan_period: 50_000,
        ..AgentConfig::default()
    };
    let mut sim = SimBus::with_devices(vec![quick(1)]);
    let clock = TickClock::new();
    let mut agent = agent_on(&sim, &clock, config);

    // First poll lands normally.
    run_ticks(&clock, &mut agent, 100);
    assert_eq!(agent.get_stats().polls, 1);
    assert_eq!(agent.get_readings().len(), 1);

    // Kill the wire for the second poll.
    sim.set_plan(FaultPlan {
        suppress_presence: true,
        ..FaultPlan::default()
    });
    run_ticks(&clock, &mut agent, 100);
    assert_eq!(agent.get_stats().polls, 1);
    assert_eq!(agent.get_stats().bus_faults, 1);
    assert!(agent.get_flags().bus_fault_pending());
    // The previous readings survive the aborted cycle.
    assert_eq!(agent.get_readings().len(), 1);

    // Wire restored: the third poll consumes the fault note and skips.
    sim.set_plan(FaultPlan::default());
    run_ticks(&clock, &mut agent, 100);
    assert_eq!(agent.get_stats().polls, 1);
    assert_eq!(agent.get_scheduler_stats().skipped, 1);
    assert!(!agent.get_flags().bus_fault_pending());

    // The fourth poll runs again.
    run_ticks(&clock, &mut agent, 100);
    assert_eq!(agent.get_stats().polls, 2);
    assert_eq!(agent.get_stats().bus_faults, 1);
}

#[test]
fn test_alarm_scan_with_nothing_alarming_raises_the_fault_flag() {
    let config = AgentConfig {
        heartbeat_period: 50_000,
        poll_period: 50_000,
        report_period: 50_000,
        alarm_scan_period: 100,
        ..AgentConfig::default()
    };
    let sim = SimBus::with_devices(vec![quick(1)]);
    let clock = TickClock::new();
    let mut agent = agent_on(&sim, &clock, config);

    run_ticks(&clock, &mut agent, 100);
    assert_eq!(agent.get_stats().alarm_scans, 0);
    assert_eq!(agent.get_stats().bus_faults, 1);
    assert_eq!(agent.alarm_count(), 0);
    assert!(agent.get_flags().bus_fault_pending());

    // The next scan pays for the fault with one silent skip.
    run_ticks(&clock, &mut agent, 100);
    assert_eq!(agent.get_scheduler_stats().skipped, 1);
    assert!(!agent.get_flags().bus_fault_pending());
}

#[test]
fn test_alarm_scan_caches_the_alarming_subset() {
    let config = AgentConfig {
        heartbeat_period: 50_000,
        poll_period: 50_000,
        report_period: 50_000,
        alarm_scan_period: 100,
        ..AgentConfig::default()
    };
    let loud = quick(2).alarming();
    let loud_rom = *loud.rom();
    let sim = SimBus::with_devices(vec![quick(1), loud, quick(3)]);
    let clock = TickClock::new();
    let mut agent = agent_on(&sim, &clock, config);

    run_ticks(&clock, &mut agent, 100);

    assert_eq!(agent.get_stats().alarm_scans, 1);
    assert_eq!(agent.alarm_count(), 1);
    assert_eq!(agent.identity(RomBank::Alarms, 0).unwrap(), loud_rom);
    assert!(!agent.get_flags().bus_fault_pending());
}

#[test]
fn test_missing_display_suppresses_reports() {
    let config = AgentConfig {
        heartbeat_period: 50_000,
        poll_period: 50_000,
        report_period: 100,
        alarm_scan_period: 50_000,
        has_display: false,
        ..AgentConfig::default()
    };
    let sim = SimBus::with_devices(vec![quick(1)]);
    let clock = TickClock::new();
    let mut agent = agent_on(&sim, &clock, config);

    let reports = run_ticks(&clock, &mut agent, 300);

    assert!(reports.is_empty());
    assert_eq!(agent.get_stats().reports, 0);
    assert_eq!(agent.get_scheduler_stats().skipped, 3);
    // Bus ready, display absent.
    assert_eq!(agent.get_flags().as_byte(), 0b0000_0001);
}

#[test]
fn test_dead_wire_at_startup_parks_every_bus_task() {
    let config = AgentConfig {
        heartbeat_period: 50_000,
        poll_period: 100,
        report_period: 50_000,
        alarm_scan_period: 150,
        ..AgentConfig::default()
    };
    let sim = SimBus::new();
    let clock = TickClock::new();
    let mut agent = agent_on(&sim, &clock, config);

    // Absence at startup is not a fault; the ready bit just stays unset.
    assert_eq!(agent.device_count(), 0);
    assert_eq!(agent.get_flags().as_byte(), 0b0000_0010);
    assert!(!agent.get_flags().bus_fault_pending());
    assert_eq!(agent.cache().nvm().writes(), 0);

    run_ticks(&clock, &mut agent, 300);

    assert_eq!(agent.get_stats().polls, 0);
    assert_eq!(agent.get_stats().alarm_scans, 0);
    assert_eq!(agent.get_stats().bus_faults, 0);
    // Polls at 100/200/300 and scans at 150/300 all skipped.
    assert_eq!(agent.get_scheduler_stats().skipped, 5);
    assert_eq!(agent.cache().nvm().writes(), 0);
}

#[test]
fn test_rediscovery_through_the_agent_is_idempotent() {
    let sim = SimBus::with_devices(vec![quick(1), quick(2)]);
    let clock = TickClock::new();
    let mut agent = agent_on(&sim, &clock, AgentConfig::default());

    assert_eq!(agent.cache().nvm().writes(), 2);

    let count = agent.discover(RomBank::Devices).unwrap();
    assert_eq!(count, 2);
    assert_eq!(agent.device_count(), 2);
    assert_eq!(agent.cache().nvm().writes(), 2);
}
