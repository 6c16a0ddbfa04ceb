//! ClassLink device agent: entry point.
//!
//! ```text
//! classlink-device                    Run in the foreground
//! classlink-device --config <path>    Load a custom config TOML
//! classlink-device --gen-config       Write default config to stdout
//! classlink-device --discover         Ignore the configured host, find the server via UDP
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use classlink_device::agent::DeviceAgent;
use classlink_device::config::DeviceConfig;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "classlink-device", about = "Classroom device control-channel agent")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "classlink-device.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    /// Override the device id from the config file.
    #[arg(long)]
    device_id: Option<String>,

    /// Override the server host from the config file.
    #[arg(long)]
    host: Option<String>,

    /// Override the server control port from the config file.
    #[arg(long)]
    port: Option<u16>,

    /// Find the server through its UDP announcement.
    #[arg(long, conflicts_with = "host")]
    discover: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        let text = toml::to_string_pretty(&DeviceConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    // Load config, then apply command-line overrides.
    let mut config = DeviceConfig::load(&cli.config);
    if let Some(id) = cli.device_id {
        config.device.id = id;
    }
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if cli.discover {
        config.server.host.clear();
    }

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("classlink-device v{}", env!("CARGO_PKG_VERSION"));
    info!("device id: {}", config.device.id);
    if config.server.host.is_empty() {
        info!("server: discovery on UDP port {}", config.discovery.port);
    } else {
        info!("server: {}:{}", config.server.host, config.server.port);
    }

    let agent = DeviceAgent::new(config);
    let stop = agent.stop_handle();

    // Ctrl-C handler.
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down");
        stop.store(false, std::sync::atomic::Ordering::SeqCst);
    });

    agent.run().await?;

    Ok(())
}
