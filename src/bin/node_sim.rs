use std::error::Error;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use emg_sensor_node::acquisition::IndicatorLeds;
use emg_sensor_node::config::{ConfigLoader, NodeConfig};
use emg_sensor_node::drivers::TemperatureReading;
use emg_sensor_node::hal::simulator::{SimAdc, SimDelay, SimHost, SimPin, SimSensorBus};
use emg_sensor_node::node::{Peripherals, SensorNode};
use emg_sensor_node::protocol::CommandCode;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Run the sensor node against simulated chips and a scripted host")]
struct Args {
    /// TOML configuration file (default: config/node.toml, node.toml, NODE_* variables)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// How long to run, in milliseconds
    #[arg(short, long, default_value = "3000")]
    duration_ms: u64,

    /// Impedance period the host sets at start-up, in milliseconds
    #[arg(long)]
    impedance_period: Option<u16>,

    /// Host poll interval, in milliseconds
    #[arg(long, default_value = "250")]
    poll_ms: u64,

    /// Simulate a board without the impedance analyzer
    #[arg(long)]
    no_impedance: bool,

    /// Simulate a board without the temperature sensor
    #[arg(long)]
    no_temperature: bool,

    /// Verbose logging (overridden by RUST_LOG)
    #[arg(short, long)]
    verbose: bool,
}

fn load_config(args: &Args) -> Result<NodeConfig, Box<dyn Error>> {
    let config = match &args.config {
        Some(path) => ConfigLoader::load_file(path)?,
        None => ConfigLoader::new().load()?,
    };
    Ok(config)
}

fn word(bytes: &[u8]) -> i16 {
    match bytes {
        [low, high, ..] => i16::from_le_bytes([*low, *high]),
        _ => 0,
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    let config = load_config(&args)?;
    let node = SensorNode::new(config)?;
    info!(address = node.slave_address(), "simulated node starting");

    let bus = SimSensorBus::new();
    bus.set_impedance_present(!args.no_impedance);
    bus.set_temperature_present(!args.no_temperature);
    bus.set_default_impedance_result(812, -143);
    bus.set_body_temperature(33.4);
    let adc = SimAdc::noisy(0x0800, 200, 42);

    let (mut acquisition, report) = node.attach(Peripherals {
        impedance_bus: bus.clone(),
        temperature_bus: bus.clone(),
        adc,
        sw_1: SimPin::new(),
        sw_2: SimPin::new(),
        sw_ref: SimPin::new(),
        sw_imp: SimPin::new(),
        delay: SimDelay::new(),
    })?;

    let temperature_led = SimPin::new();
    report.enforce(&mut temperature_led.clone(), &mut SimDelay::new());
    if !report.is_clean() {
        warn!(?report, "running with missing sensors");
    }

    let mut scheduler = node.scheduler();
    let mut leds = IndicatorLeds {
        heartbeat: SimPin::new(),
        impedance_absent: SimPin::new(),
        temperature_absent: temperature_led,
    };
    let heartbeat = leds.heartbeat.clone();
    let mut host = SimHost::new(node.inbox().clone(), node.bus_task());

    let running = AtomicBool::new(true);
    let deadline = Instant::now() + Duration::from_millis(args.duration_ms);

    thread::scope(|scope| {
        let running = &running;

        scope.spawn(move || {
            while running.load(Ordering::Acquire) {
                let events = scheduler.tick();
                let _ = leds.apply(&events);
                thread::sleep(Duration::from_millis(1));
            }
            info!(ticks = scheduler.ticks(), "tick context stopped");
        });

        scope.spawn(move || {
            while running.load(Ordering::Acquire) {
                if acquisition.run_once().is_idle() {
                    thread::sleep(Duration::from_micros(100));
                }
            }
            info!("main loop stopped");
        });

        if let Some(period) = args.impedance_period {
            host.set(CommandCode::ImpPeriod, period);
        }
        let periods = host.query(CommandCode::ImpPeriod, 4);
        println!("impedance period: {} ms", String::from_utf8_lossy(&periods));

        let mut polls = 0u32;
        while Instant::now() < deadline {
            thread::sleep(Duration::from_millis(args.poll_ms));
            polls += 1;

            host.command(CommandCode::Emg);
            thread::sleep(Duration::from_millis(2));
            let emg = host.read(2);
            println!("emg: {}", u16::from_le_bytes([emg[0], emg[1]]));

            if polls % 4 == 0 {
                host.command(CommandCode::RequestRead);
                let started = Instant::now();
                while host.query(CommandCode::ReadReady, 1) != [1] {
                    if started.elapsed() > Duration::from_millis(500) {
                        println!("requested read did not complete");
                        break;
                    }
                    thread::sleep(Duration::from_millis(1));
                }
                let frame = host.query(CommandCode::ImpAll, 8);
                let temperature = host.query(CommandCode::Temperature, 2);
                println!(
                    "impedance: pair 1 ({}, {}) pair 2 ({}, {}), temperature: {:.2} C",
                    word(&frame[0..2]),
                    word(&frame[2..4]),
                    word(&frame[4..6]),
                    word(&frame[6..8]),
                    TemperatureReading { raw: [temperature[0], temperature[1]] }.celsius()
                );
            }
        }
        running.store(false, Ordering::Release);
    });

    info!(
        heartbeat_edges = heartbeat.edges(),
        inbox_dropped = node.inbox().dropped(),
        host_events = host.actions().len(),
        "simulation finished"
    );
    Ok(())
}
