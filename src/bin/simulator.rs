use clap::{App, Arg};
use colored::*;
use owbus::sim::{SimBus, SimDevice, SimNvm};
use owbus::{AgentConfig, NodeAgent, NodeReport, RomBank, Temperature, TickClock};
use tracing::info;

const MAX_SIM_DEVICES: usize = 16;
// Ten degrees of spread between attached devices.
const TEMP_STEP_RAW: i16 = 0x00A0;
const BASE_TEMP_RAW: i16 = 0x0191;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let matches = App::new("owbus-simulator")
        .version("0.1.0")
        .about("🌡️  One-wire sensor node simulator - runs the firmware mainline against a software bus")
        .arg(
            Arg::with_name("devices")
                .short("n")
                .long("devices")
                .value_name("COUNT")
                .help("Number of sensors attached to the wire")
                .takes_value(true)
                .default_value("3")
                .validator(|v| match v.parse::<usize>() {
                    Ok(n) if (1..=MAX_SIM_DEVICES).contains(&n) => Ok(()),
                    _ => Err(format!("Device count must be 1-{}", MAX_SIM_DEVICES)),
                }),
        )
        .arg(
            Arg::with_name("alarming")
                .short("a")
                .long("alarming")
                .value_name("COUNT")
                .help("How many of the sensors run with tripped alarm thresholds")
                .takes_value(true)
                .default_value("0")
                .validator(|v| match v.parse::<usize>() {
                    Ok(_) => Ok(()),
                    Err(_) => Err("Alarming count must be a number".into()),
                }),
        )
        .arg(
            Arg::with_name("parasitic")
                .short("p")
                .long("parasitic")
                .help("Power every sensor parasitically from the signal wire"),
        )
        .arg(
            Arg::with_name("ticks")
                .short("t")
                .long("ticks")
                .value_name("TICKS")
                .help("How many 1 ms scheduler ticks to run")
                .takes_value(true)
                .default_value("12000")
                .validator(|v| match v.parse::<u64>() {
                    Ok(_) => Ok(()),
                    Err(_) => Err("Tick count must be a number".into()),
                }),
        )
        .arg(
            Arg::with_name("format")
                .short("f")
                .long("format")
                .value_name("FORMAT")
                .help("Report output format")
                .takes_value(true)
                .possible_values(&["table", "json"])
                .default_value("table"),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("Enable verbose output"),
        )
        .get_matches();

    let device_count: usize = matches.value_of("devices").unwrap().parse()?;
    let alarming: usize = matches
        .value_of("alarming")
        .unwrap()
        .parse::<usize>()?
        .min(device_count);
    let parasitic = matches.is_present("parasitic");
    let ticks: u64 = matches.value_of("ticks").unwrap().parse()?;
    let format = matches.value_of("format").unwrap().to_string();
    let verbose = matches.is_present("verbose");

    println!("{}", "🌡️  One-Wire Sensor Node Simulator".bright_blue().bold());
    println!("{}", "==================================".bright_blue());
    if verbose {
        println!(
            "{} {} device(s), {} alarming, {} powered",
            "Wire:".dimmed(),
            device_count,
            alarming,
            if parasitic { "parasitically" } else { "externally" }
        );
    }

    let mut bus = SimBus::new();
    for index in 0..device_count {
        let serial = [index as u8 + 1, 0xAB, 0xCD, 0x00, 0x00, index as u8];
        let raw = BASE_TEMP_RAW + TEMP_STEP_RAW * index as i16;
        let mut device = SimDevice::new(serial).with_temperature(raw);
        if parasitic {
            device = device.parasitic();
        }
        if index < alarming {
            // High threshold below every simulated temperature, so the
            // alarm latch survives each conversion.
            device = device.alarming().with_thresholds(0, -55);
        }
        bus.attach(device);
    }

    let clock = TickClock::new();
    let mut agent = NodeAgent::new(
        bus.clone(),
        bus.clone(),
        SimNvm::new(),
        &clock,
        AgentConfig::default(),
    );
    agent.init()?;

    println!(
        "{} {} identities cached after startup discovery",
        "🔎".bright_cyan(),
        agent.device_count().to_string().bright_cyan()
    );
    for index in 0..agent.device_count() {
        if let Ok(identity) = agent.identity(RomBank::Devices, index) {
            println!("   [{}] {}", index, identity.to_string().bright_white());
        }
    }

    if format == "table" {
        print_table_header();
    }

    for _ in 0..ticks {
        clock.tick_from_isr();
        match agent.service() {
            Ok(Some(report)) => print_report(&report, &format)?,
            Ok(None) => {}
            Err(e) => {
                eprintln!("{} Agent error: {}", "❌".red(), e);
                break;
            }
        }
    }

    if format == "table" {
        print_table_footer();
    }

    print_summary(&agent, &bus, parasitic);
    info!("simulation finished after {} ticks", ticks);
    Ok(())
}

fn print_table_header() {
    println!(
        "{}",
        "┌─────────┬──────┬───────┬──────┬────────┬──────────────────────────────────┐".bright_white()
    );
    println!(
        "{}",
        "│ Uptime  │ Beat │ Flags │ Devs │ Alarms │ Readings                         │".bright_white()
    );
    println!(
        "{}",
        "├─────────┼──────┼───────┼──────┼────────┼──────────────────────────────────┤".bright_white()
    );
}

fn print_table_footer() {
    println!(
        "{}",
        "└─────────┴──────┴───────┴──────┴────────┴──────────────────────────────────┘".bright_white()
    );
}

fn print_report(report: &NodeReport, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        "json" => println!("{}", serde_json::to_string(report)?),
        _ => {
            let beat = if report.indicator {
                "  ● ".bright_green()
            } else {
                "  ○ ".dimmed()
            };
            let readings = report
                .readings
                .iter()
                .map(|r| format!("{}°C", r.temperature))
                .collect::<Vec<_>>()
                .join(" ");
            println!(
                "│ {:>6}s │ {} │ 0x{:02X}  │ {:>4} │ {:>6} │ {:<32} │",
                report.uptime_seconds, beat, report.flags, report.devices, report.alarms, readings
            );
        }
    }
    Ok(())
}

fn print_summary(
    agent: &NodeAgent<'_, SimBus, SimBus, SimNvm>,
    bus: &SimBus,
    parasitic: bool,
) {
    let stats = agent.get_stats();
    let sched = agent.get_scheduler_stats();
    let wire = bus.stats();

    println!();
    println!("{}", "📊 Run Summary".bright_blue().bold());
    println!("{}", "══════════════".bright_blue());
    println!(
        "Heartbeats: {}  Polls: {}  Reports: {}  Alarm scans: {}",
        stats.heartbeats.to_string().bright_cyan(),
        stats.polls.to_string().bright_cyan(),
        stats.reports.to_string().bright_cyan(),
        stats.alarm_scans.to_string().bright_cyan()
    );
    println!(
        "Bus faults: {}  CRC rejects: {}  Task skips: {}",
        colored_count(stats.bus_faults),
        colored_count(stats.crc_rejects),
        colored_count(sched.skipped)
    );
    println!(
        "Wire traffic: {} resets, {} slots, {} searches, {} conversions",
        wire.resets.to_string().bright_white(),
        wire.slots.to_string().bright_white(),
        wire.searches.to_string().bright_white(),
        wire.conversions.to_string().bright_white()
    );
    println!(
        "Identity store: {} writes (re-discovery is free)",
        agent.cache().nvm().writes().to_string().bright_white()
    );
    if parasitic {
        let hold_ms = bus.longest_spu_hold_ns() / 1_000_000;
        println!(
            "Longest strong-pullup hold: {} ms",
            hold_ms.to_string().bright_white()
        );
    }

    println!();
    println!("{}", "🔌 Attached Devices".bright_blue().bold());
    println!("{}", "═══════════════════".bright_blue());
    for index in 0..bus.device_count() {
        if let Some(snap) = bus.snapshot(index) {
            let alarm = if snap.alarm {
                "ALARM".bright_red().bold()
            } else {
                "ok".bright_green()
            };
            println!(
                "  {} {}  latched {}°C  [{}]",
                snap.rom.to_string().bright_white(),
                if snap.parasitic {
                    "parasite".yellow()
                } else {
                    "powered ".normal()
                },
                Temperature::from_raw(snap.temperature_raw)
                    .to_string()
                    .bright_cyan(),
                alarm
            );
        }
    }
}

fn colored_count(n: u32) -> ColoredString {
    if n == 0 {
        n.to_string().bright_green()
    } else {
        n.to_string().bright_yellow()
    }
}
