// src/main.rs
//! Geofence Monitor - watch circular regions from a live or recorded GPS feed

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand, ValueEnum};
use geofence_monitor::{
    config::AppConfig,
    display::{print_header, TerminalSink},
    geofence::parse_regions,
    gps::{gpsd::GpsdSource, replay::ReplaySource, serial::{self, SerialNmeaSource}},
    DispatchSink, Fix, GeofenceMonitor, JsonLinesSink, MonitorConfig, PositionSource, Region,
};
use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

#[derive(Parser)]
#[command(name = "geofence-monitor")]
#[command(version)]
#[command(about = "Report enter/exit transitions for circular geofences", long_about = None)]
struct Cli {
    /// Config file (defaults to ~/.config/geofence-monitor/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Monitor regions and print transitions until Ctrl+C
    Watch {
        /// JSON file holding an array of regions
        #[arg(short, long)]
        regions: PathBuf,

        #[command(flatten)]
        source: SourceArgs,

        /// Print events as JSON lines instead of colored text
        #[arg(long)]
        json: bool,

        /// Persist the effective source settings to the config file
        #[arg(long)]
        save_config: bool,
    },

    /// Print the current position once
    Locate {
        #[command(flatten)]
        source: SourceArgs,
    },

    /// List available serial ports
    Ports,
}

#[derive(Clone, Copy, ValueEnum)]
enum SourceKind {
    Gpsd,
    Serial,
    Replay,
}

#[derive(Args)]
struct SourceArgs {
    /// Position source; overrides the config file
    #[arg(long, value_enum)]
    source: Option<SourceKind>,

    /// gpsd host
    #[arg(long)]
    host: Option<String>,

    /// gpsd port
    #[arg(long)]
    port: Option<u16>,

    /// Serial device, e.g. /dev/ttyUSB0 or COM3
    #[arg(long)]
    serial_port: Option<String>,

    /// Serial baud rate
    #[arg(long)]
    baud: Option<u32>,

    /// JSON-lines fix log to replay
    #[arg(long)]
    replay: Option<PathBuf>,

    /// Delay between replayed fixes
    #[arg(long)]
    interval_ms: Option<u64>,
}

impl SourceArgs {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(kind) = self.source {
            config.source_type = match kind {
                SourceKind::Gpsd => "gpsd",
                SourceKind::Serial => "serial",
                SourceKind::Replay => "replay",
            }
            .to_string();
        }
        if let Some(host) = &self.host {
            config.gpsd_host = Some(host.clone());
        }
        if self.port.is_some() {
            config.gpsd_port = self.port;
        }
        if let Some(port) = &self.serial_port {
            config.serial_port = Some(port.clone());
        }
        if self.baud.is_some() {
            config.serial_baudrate = self.baud;
        }
        if let Some(file) = &self.replay {
            config.replay_file = Some(file.clone());
        }
        if self.interval_ms.is_some() {
            config.replay_interval_ms = self.interval_ms;
        }
    }
}

/// Source chosen by the effective configuration
enum SelectedSource {
    Gpsd { host: String, port: u16 },
    Serial { port: String, baudrate: u32 },
    Replay { file: PathBuf, interval: Duration },
}

impl SelectedSource {
    fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        match config.source_type.as_str() {
            "gpsd" => Ok(SelectedSource::Gpsd {
                host: config.gpsd_host.clone().unwrap_or_else(|| "localhost".to_string()),
                port: config.gpsd_port.unwrap_or(2947),
            }),
            "serial" => {
                let Some(port) = config.serial_port.clone() else {
                    bail!("serial source selected but no serial port configured (use --serial-port)");
                };
                Ok(SelectedSource::Serial {
                    port,
                    baudrate: config.serial_baudrate.unwrap_or(9600),
                })
            }
            "replay" => {
                let Some(file) = config.replay_file.clone() else {
                    bail!("replay source selected but no fix log given (use --replay)");
                };
                Ok(SelectedSource::Replay {
                    file,
                    interval: Duration::from_millis(config.replay_interval_ms.unwrap_or(1_000)),
                })
            }
            other => bail!("unknown source type '{}'", other),
        }
    }

    fn label(&self) -> String {
        match self {
            SelectedSource::Gpsd { host, port } => format!("gpsd {}:{}", host, port),
            SelectedSource::Serial { port, baudrate } => format!("serial {} @ {} baud", port, baudrate),
            SelectedSource::Replay { file, .. } => format!("replay {}", file.display()),
        }
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    match path {
        Some(path) => AppConfig::load_from(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Ok(AppConfig::load().unwrap_or_else(|e| {
            eprintln!("Warning: {}; using defaults", e);
            AppConfig::platform_default()
        })),
    }
}

fn load_regions(path: &Path) -> anyhow::Result<Vec<Region>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read regions from {}", path.display()))?;
    let regions = parse_regions(&contents)
        .with_context(|| format!("failed to parse regions from {}", path.display()))?;
    if regions.is_empty() {
        bail!("{} contains no regions", path.display());
    }
    Ok(regions)
}

async fn watch<S: PositionSource>(
    source: S,
    label: &str,
    regions: Vec<Region>,
    config: MonitorConfig,
    json: bool,
) -> anyhow::Result<()> {
    let sink: Arc<dyn DispatchSink> = if json {
        Arc::new(JsonLinesSink::new(io::stdout()))
    } else {
        print_header(&mut io::stdout(), label, &regions)?;
        Arc::new(TerminalSink::new())
    };

    let monitor = GeofenceMonitor::new(Arc::new(source), config);
    monitor
        .start(regions, sink)
        .await
        .with_context(|| format!("failed to start monitoring on {}", label))?;

    if !json {
        println!("Monitoring {} region(s)...", monitor.region_count());
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;

    monitor.stop().await.context("failed to stop monitoring")?;
    if !json {
        println!("\nShutting down...");
    }
    Ok(())
}

async fn locate<S: PositionSource>(source: S, label: &str) -> anyhow::Result<()> {
    if !source.is_provider_enabled() {
        bail!("no location provider available on {}", label);
    }

    let fix = source
        .request_once()
        .await
        .with_context(|| format!("failed to get a position from {}", label))?;

    println!("Source:    {}", label);
    println!("Latitude:  {}", Fix::format_coordinate(fix.latitude));
    println!("Longitude: {}", Fix::format_coordinate(fix.longitude));
    if let Some(altitude) = fix.altitude {
        println!("Altitude:  {:>12.1} m", altitude);
    }
    println!("Accuracy:  {:>12.1} m", fix.accuracy_meters);
    println!("Time:      {}", fix.timestamp.format("%Y-%m-%d %H:%M:%S UTC"));
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Watch {
            regions,
            source,
            json,
            save_config,
        } => {
            let mut config = load_config(cli.config.as_deref())?;
            source.apply(&mut config);
            config.monitor.validate()?;

            if save_config {
                match &cli.config {
                    Some(path) => config.save_to(path)?,
                    None => config.save()?,
                }
            }

            let regions = load_regions(&regions)?;
            let selected = SelectedSource::from_config(&config)?;
            let label = selected.label();
            let monitor_config = config.monitor.clone();

            match selected {
                SelectedSource::Gpsd { host, port } => {
                    watch(GpsdSource::new(host, port), &label, regions, monitor_config, json).await
                }
                SelectedSource::Serial { port, baudrate } => {
                    watch(SerialNmeaSource::new(port, baudrate), &label, regions, monitor_config, json)
                        .await
                }
                SelectedSource::Replay { file, interval } => {
                    let source = ReplaySource::from_file(&file, interval)
                        .with_context(|| format!("failed to load fix log {}", file.display()))?;
                    watch(source, &label, regions, monitor_config, json).await
                }
            }
        }

        Commands::Locate { source } => {
            let mut config = load_config(cli.config.as_deref())?;
            source.apply(&mut config);

            let selected = SelectedSource::from_config(&config)?;
            let label = selected.label();

            match selected {
                SelectedSource::Gpsd { host, port } => locate(GpsdSource::new(host, port), &label).await,
                SelectedSource::Serial { port, baudrate } => {
                    locate(SerialNmeaSource::new(port, baudrate), &label).await
                }
                SelectedSource::Replay { file, interval } => {
                    let source = ReplaySource::from_file(&file, interval)
                        .with_context(|| format!("failed to load fix log {}", file.display()))?;
                    locate(source, &label).await
                }
            }
        }

        Commands::Ports => {
            let ports = serial::list_serial_ports()?;
            if ports.is_empty() {
                println!("No serial ports found");
            }
            for port in ports {
                println!("{}", port);
            }
            Ok(())
        }
    }
}
