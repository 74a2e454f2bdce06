//! mqtt2opcua - MQTT to OPC UA bridge
//!
//! Usage:
//!   mqtt2opcua [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>      Configuration file path
//!   --mqtt-host <HOST>       Broker host (default: localhost)
//!   --mqtt-port <PORT>       Broker port (default: 1883)
//!   --opc-host <HOST>        Address space endpoint host (default: 127.0.0.1)
//!   --opc-port <PORT>        Address space endpoint port (default: 4334)
//!   -r, --roundtrip          Wait for the device to confirm writes
//!   -d, --debug              Shorthand for --log-level debug
//!   -l, --log-level <LEVEL>  Log level (error, warn, info, debug, trace)
//!   -h, --help               Print help

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use mqtt2opcua::bridge::Bridge;
use mqtt2opcua::bus::MqttClient;
use mqtt2opcua::config::Config;
use mqtt2opcua::metrics::{Metrics, MetricsServer};
use mqtt2opcua::namespace::MemoryNamespace;

/// Log level for CLI
#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    /// Only errors
    Error,
    /// Warnings and errors
    Warn,
    /// Informational messages
    Info,
    /// Debug messages
    Debug,
    /// Trace messages (very verbose)
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }

    fn from_config(level: &str) -> Self {
        match level.to_lowercase().as_str() {
            "error" => LogLevel::Error,
            "warn" => LogLevel::Warn,
            "debug" => LogLevel::Debug,
            "trace" => LogLevel::Trace,
            _ => LogLevel::Info,
        }
    }
}

/// Bridge an MQTT bus into an OPC UA style address space
#[derive(Parser, Debug)]
#[command(name = "mqtt2opcua")]
#[command(version)]
#[command(about = "Expose MQTT topics as OPC UA variables and publish writes back")]
struct Args {
    /// Configuration file path (TOML format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// MQTT broker host
    #[arg(long)]
    mqtt_host: Option<String>,

    /// MQTT broker port
    #[arg(long)]
    mqtt_port: Option<u16>,

    /// Address space endpoint host
    #[arg(long)]
    opc_host: Option<String>,

    /// Address space endpoint port
    #[arg(long)]
    opc_port: Option<u16>,

    /// Wait for the device to confirm writes before serving them on reads
    #[arg(short, long)]
    roundtrip: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, value_enum)]
    log_level: Option<LogLevel>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let loaded = match &args.config {
        Some(path) => Config::load(path),
        None => Config::from_env(),
    };
    let mut config = match loaded {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            std::process::exit(1);
        }
    };

    // CLI args override file config
    if let Some(host) = args.mqtt_host {
        config.mqtt.host = host;
    }
    if let Some(port) = args.mqtt_port {
        config.mqtt.port = port;
    }
    if let Some(host) = args.opc_host {
        config.opcua.host = host;
    }
    if let Some(port) = args.opc_port {
        config.opcua.port = port;
    }
    config.bridge.roundtrip |= args.roundtrip;
    config.log.debug |= args.debug;
    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    let log_level = args
        .log_level
        .unwrap_or_else(|| LogLevel::from_config(config.log.effective_level()));
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level.to_tracing_level())
        .with_target(false)
        .with_thread_ids(true)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if let Some(path) = &args.config {
        info!("Loaded configuration from {:?}", path);
    }

    let handlers = config.handler_registry()?.finalize();
    let namespace = Arc::new(MemoryNamespace::new());

    info!("Starting mqtt2opcua");
    info!("  Endpoint: {}", config.opcua.endpoint_url());
    info!("  Broker: {}", config.mqtt.address());
    info!("  Topics: {}", config.bridge.topics.join(", "));
    info!(
        "  Roundtrip: {}",
        if config.bridge.roundtrip {
            "enabled"
        } else {
            "disabled"
        }
    );
    if let Some(timeout) = config.bridge.roundtrip_timeout {
        info!("  Roundtrip timeout: {:?}", timeout);
    }
    info!(
        "  Handlers: {} forward, {} backward",
        handlers.forward().len(),
        handlers.backward().len()
    );

    let metrics = if config.metrics.enabled {
        let metrics = Arc::new(Metrics::new()?);
        info!("  Metrics: enabled (http://{})", config.metrics.bind);
        let metrics_server = MetricsServer::new(metrics.clone(), config.metrics.bind);
        tokio::spawn(async move {
            if let Err(e) = metrics_server.run().await {
                error!("Metrics server error: {}", e);
            }
        });
        Some(metrics)
    } else {
        info!("  Metrics: disabled");
        None
    };

    let client = MqttClient::new(config.mqtt.clone(), config.bridge.topics.clone());
    let handle = client.handle();
    let bridge = Bridge::new(
        handlers,
        namespace,
        Arc::new(handle.clone()),
        &config.bridge,
        metrics,
    );

    let connection = match client.connect().await {
        Ok(connection) => connection,
        Err(e) => {
            error!("MQTT: Cannot connect to {}: {}", config.mqtt.address(), e);
            std::process::exit(1);
        }
    };

    let run = connection.run(bridge.message_callback());
    tokio::pin!(run);

    let result = tokio::select! {
        result = &mut run => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
            handle.shutdown().await;
            run.await
        }
    };

    if let Err(e) = result {
        error!("MQTT: {}", e);
        std::process::exit(1);
    }

    Ok(())
}
