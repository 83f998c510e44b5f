//! Terranode sensor node - main entry point
//!
//! Runs the host loop: tick the session supervisor at a fixed cadence and
//! publish one telemetry sample per interval while the session is ready.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use terranode::clock::{ClockSync, SntpTimeSource};
use terranode::config::NodeConfig;
use terranode::link::{HostLinkDriver, LogIndicator, NetworkLink};
use terranode::observability::init_default_logging;
use terranode::sensor::{SensorReadings, SensorSource, SimulatedSensors};
use terranode::supervisor::{SessionSupervisor, TickOutcome};
use terranode::transport::mqtt::RumqttcTransport;
use terranode::transport::{LogCommandHandler, PubSubSession, SecureSession};
use tokio::signal;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

type NodeSupervisor =
    SessionSupervisor<HostLinkDriver, LogIndicator, SntpTimeSource, RumqttcTransport>;

/// Greenhouse sensor node connectivity core
#[derive(Parser)]
#[command(name = "terranode")]
#[command(about = "Keeps a sensor node connected to its broker and publishes telemetry")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the node
    Run,
    /// Validate configuration
    Config {
        /// Show current configuration (secrets redacted)
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    if cli.verbose > 0 && std::env::var("LOG_LEVEL").is_err() {
        let level = if cli.verbose > 1 { "TRACE" } else { "DEBUG" };
        std::env::set_var("LOG_LEVEL", level);
    }
    init_default_logging();

    info!("Starting terranode v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_node(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Shutdown complete");
}

fn load_configuration(
    config_path: &Option<PathBuf>,
) -> Result<NodeConfig, Box<dyn std::error::Error>> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(NodeConfig::load_from_file(path)?);
    }

    for path_str in ["node.toml", "config/node.toml"] {
        let path = PathBuf::from(path_str);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(NodeConfig::load_from_file(&path)?);
        }
    }

    Err("No configuration file found. Provide one with -c/--config or create node.toml".into())
}

/// Wire the production collaborators into a supervisor
fn build_supervisor(config: &NodeConfig) -> Result<NodeSupervisor, Box<dyn std::error::Error>> {
    let identity = config.identity()?;
    let credentials = config.credentials()?;
    let trust = config.trust_bundle()?;

    let link = NetworkLink::new(
        HostLinkDriver::from_settings(&config.link),
        LogIndicator,
        credentials,
        &config.link,
    );
    let source = SntpTimeSource::new(
        config.clock.server.clone(),
        config.clock.max_stratum,
        config.clock.poll_interval(),
    );
    let clock = ClockSync::new(source, &config.clock);
    let secure = SecureSession::new(&config.broker);
    let pubsub = PubSubSession::new(RumqttcTransport::new(), identity, &config.broker)
        .with_handler(LogCommandHandler);

    Ok(SessionSupervisor::new(link, clock, secure, pubsub, trust))
}

async fn run_node(config: NodeConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        thing_name = %config.device.thing_name,
        networks = config.networks.len(),
        "Node starting"
    );

    let mut supervisor = build_supervisor(&config)?;
    let mut sensors = SimulatedSensors;
    let device_id = config.device.thing_name.clone();

    let mut ticks = interval(Duration::from_millis(config.telemetry.tick_interval_ms));
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut publishes = interval(Duration::from_secs(config.telemetry.interval_secs));
    publishes.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Received SIGINT, shutting down gracefully...");
                break;
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down gracefully...");
                break;
            }
            _ = ticks.tick() => {
                match supervisor.tick().await {
                    TickOutcome::Pumped { delivered } if delivered > 0 => {
                        debug!(delivered, "Inbound messages handled");
                    }
                    TickOutcome::Reconnected => {
                        let health = supervisor.health();
                        info!(
                            reconnect_count = health.reconnect_count,
                            clock_synced = health.clock_synced,
                            "Broker session ready"
                        );
                    }
                    _ => {}
                }
            }
            _ = publishes.tick() => {
                if supervisor.state().connection().is_broker_ready() {
                    publish_sample(&mut supervisor, &mut sensors, &device_id).await;
                } else {
                    debug!("Skipping telemetry, broker session not ready");
                }
            }
        }
    }

    if let Err(e) = supervisor.shutdown().await {
        warn!("Error during shutdown: {}", e);
    }
    Ok(())
}

async fn publish_sample(
    supervisor: &mut NodeSupervisor,
    sensors: &mut impl SensorSource,
    device_id: &str,
) {
    let sample =
        SensorReadings::sample(sensors).into_sample(device_id, supervisor.timestamp_ms());
    match supervisor.publish(&sample).await {
        Ok(()) => debug!(timestamp_ms = sample.timestamp_ms, "Telemetry published"),
        Err(e) => warn!(error = %e, "Telemetry sample dropped"),
    }
}

fn handle_config_command(
    config: &NodeConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(&config.redacted())?);
    }

    info!("Configuration validation complete");
    Ok(())
}
