use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::thread;
use std::time::Instant;
use tracing::{info, warn};

use can_transport as can;
use can_transport::{CanBus, TxQueue};
use puma_driver::{self as puma, api, ApiCode, MetricsHub, MultiDriver, PumaConfig};

#[derive(Parser, Debug)]
#[command(
    name = "puma",
    version,
    about = "Puma motor controller CAN tools",
    disable_help_subcommand = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum PayloadFormat {
    None,
    U8,
    U16,
    Fixed8x8,
    Fixed16x16,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List bus backends available in this build
    BusList,
    /// Run the coordinator against simulated controllers
    Simulate {
        /// Controller configuration (YAML)
        #[arg(long, default_value = "configs/puma.yaml")]
        config: String,
        /// Number of coordinator ticks to run
        #[arg(long, default_value_t = 100u32)]
        ticks: u32,
        /// Speed (rad/s) or duty cycle commanded to every joint once active
        #[arg(long)]
        command: Option<f64>,
        /// Print every tick report as a JSON line
        #[arg(long, action = ArgAction::SetTrue)]
        json: bool,
        /// Sleep between ticks at the configured frequency
        #[arg(long, action = ArgAction::SetTrue)]
        realtime: bool,
        /// Dump Prometheus metrics when done
        #[arg(long, action = ArgAction::SetTrue)]
        metrics: bool,
    },
    /// Split a 29-bit identifier into group, index and device
    DecodeId {
        /// Identifier, hex with 0x prefix or decimal
        #[arg(long)]
        id: String,
    },
    /// Encode a command frame
    Build {
        /// Device number (0-63)
        #[arg(long)]
        device: u8,
        /// API name, e.g. SPD_SET or status_power
        #[arg(long)]
        api: String,
        /// Payload encoding
        #[arg(long, value_enum, default_value_t = PayloadFormat::None)]
        format: PayloadFormat,
        /// Value to encode (ignored for `none`)
        #[arg(long, default_value_t = 0.0)]
        value: f64,
    },
    /// Load and validate a configuration file
    Validate {
        #[arg(long, default_value = "configs/puma.yaml")]
        config: String,
    },
}

fn main() -> Result<()> {
    setup_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::BusList => bus_list(),
        Commands::Simulate {
            config,
            ticks,
            command,
            json,
            realtime,
            metrics,
        } => simulate(&config, ticks, command, json, realtime, metrics),
        Commands::DecodeId { id } => decode_id(&id),
        Commands::Build {
            device,
            api,
            format,
            value,
        } => build(device, &api, format, value),
        Commands::Validate { config } => validate(&config),
    }
}

fn setup_tracing() {
    // Best-effort; avoid panics if already set
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn bus_list() -> Result<()> {
    for bus in can::MockBus::list()?
        .into_iter()
        .chain(puma::sim::SimBus::list()?)
    {
        println!("{}\t{}", bus.name, bus.driver);
    }
    Ok(())
}

fn load_config(path: &str) -> Result<PumaConfig> {
    PumaConfig::load(path).with_context(|| format!("loading config {path}"))
}

fn simulate(
    path: &str,
    ticks: u32,
    command: Option<f64>,
    json: bool,
    realtime: bool,
    metrics: bool,
) -> Result<()> {
    let cfg = load_config(path)?;
    let hub = MetricsHub::new().context("metrics init")?;
    let mut bus = puma::sim::SimBus::with_devices(
        &cfg.canbus_dev,
        cfg.joints.iter().map(|j| j.can_id),
    )?;
    let mut multi = MultiDriver::new(&cfg, TxQueue::new()).with_metrics(hub.drivers.clone());
    let names: Vec<&str> = cfg.joints.iter().map(|j| j.name.as_str()).collect();
    let period = cfg.period();

    for _ in 0..ticks {
        let started = Instant::now();
        bus.advance(period.as_secs_f64());
        if let Some(value) = command {
            multi.command(&names, &vec![value; names.len()]);
        }
        let report = multi.run_once(&mut bus)?;
        if report.became_active {
            info!(tick = report.tick, "controllers configured");
        }
        if !report.power_resets.is_empty() {
            warn!(devices = ?report.power_resets, "power reset");
        }
        if json {
            println!("{}", serde_json::to_string(&report)?);
        } else if let Some(feedback) = &report.feedback {
            for f in feedback {
                println!(
                    "tick={}\t{}\t#{}\tduty={:.3}\tcurrent={:.2}\ttravel={:.3}\tspeed={:.3}\tsetpoint={:.3}",
                    report.tick,
                    f.device_name,
                    f.device_number,
                    f.duty_cycle,
                    f.current,
                    f.travel,
                    f.speed,
                    f.setpoint
                );
            }
        }
        if realtime {
            if let Some(rest) = period.checked_sub(started.elapsed()) {
                thread::sleep(rest);
            }
        }
    }

    if !multi.is_active() {
        warn!(ticks, "controllers still configuring when the run ended");
        for d in multi.drivers() {
            eprintln!("{}\t#{}\t{}", d.device_name(), d.device_number(), d.state());
        }
    }
    if metrics {
        print!("{}", hub.encode_text());
    }
    Ok(())
}

#[derive(Serialize)]
struct DecodedId {
    id: String,
    api: String,
    group: Option<&'static str>,
    index: usize,
    device: u8,
    name: Option<&'static str>,
}

fn decode_id(s: &str) -> Result<()> {
    let id = can::CanId::parse(s).ok_or_else(|| anyhow::anyhow!("invalid CAN id: {s}"))?;
    let code = api::extract_api(id.raw());
    let decoded = DecodedId {
        id: id.to_string(),
        api: format!("0x{:08X}", code.raw()),
        group: code.group().map(|g| g.name()),
        index: code.index(),
        device: api::extract_device(id.raw()),
        name: code.name(),
    };
    println!("{}", serde_json::to_string_pretty(&decoded)?);
    Ok(())
}

fn build(device: u8, name: &str, format: PayloadFormat, value: f64) -> Result<()> {
    if device > api::MAX_DEVICE_NUMBER {
        anyhow::bail!("device number {device} outside 0..=63");
    }
    let code = ApiCode::from_name(name).ok_or_else(|| anyhow::anyhow!("unknown API name: {name}"))?;
    let frame = match format {
        PayloadFormat::None => api::build_frame(code, device),
        PayloadFormat::U8 => api::build_u8(code, device, int_value::<u8>(value)?),
        PayloadFormat::U16 => api::build_u16(code, device, int_value::<u16>(value)?),
        PayloadFormat::Fixed8x8 => api::build_fixed8x8(code, device, value as f32),
        PayloadFormat::Fixed16x16 => api::build_fixed16x16(code, device, value),
    };
    print_frame(&frame.stamped());
    Ok(())
}

fn int_value<T: TryFrom<i64>>(value: f64) -> Result<T> {
    if value.fract() != 0.0 {
        anyhow::bail!("expected an integer, got {value}");
    }
    T::try_from(value as i64).map_err(|_| anyhow::anyhow!("value {value} out of range"))
}

fn validate(path: &str) -> Result<()> {
    let cfg = load_config(path)?;
    println!(
        "ok: {} joints on {} in {} mode at {} Hz",
        cfg.joints.len(),
        cfg.canbus_dev,
        cfg.mode,
        cfg.frequency
    );
    Ok(())
}

fn print_frame(f: &can::CanFrame) {
    let ts = f
        .timestamp
        .map(|t| {
            t.0.format(&time::format_description::well_known::Rfc3339)
                .unwrap_or_default()
        })
        .unwrap_or_default();
    println!("{f}\t{ts}");
}
