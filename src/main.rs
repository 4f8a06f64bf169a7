//! NetWatch - real-time network traffic anomaly detection.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use netwatch::config::Config;
use netwatch::pipeline::Pipeline;

/// NetWatch network anomaly detector
#[derive(Parser, Debug)]
#[command(name = "netwatch")]
#[command(version)]
#[command(about = "Real-time network traffic anomaly detection", long_about = None)]
struct Args {
    /// Path to configuration file (defaults apply when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Network interface to monitor
    #[arg(long)]
    iface: Option<String>,

    /// BPF filter expression
    #[arg(long = "filter")]
    bpf: Option<String>,

    /// Monitored network in CIDR notation
    #[arg(long = "local-net")]
    local_net: Option<String>,

    /// Log level: trace | debug | info | warn | error
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref())?;
    if let Some(iface) = args.iface {
        config.capture.interface = iface;
    }
    if let Some(bpf) = args.bpf {
        config.capture.bpf_filter = bpf;
    }
    if let Some(local_net) = args.local_net {
        config.capture.local_network = local_net;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }

    // An invalid CIDR (or any other bad config) aborts with a non-zero exit
    config.validate()?;

    setup_logging(&config)?;

    info!(
        iface = %config.capture.interface,
        filter = %config.capture.bpf_filter,
        local_net = %config.capture.local_network,
        "NetWatch starting"
    );

    let pipeline = Arc::new(
        Pipeline::new(config)
            .await
            .context("failed to initialise pipeline")?,
    );

    let pipeline_shutdown = Arc::clone(&pipeline);
    ctrlc::set_handler(move || {
        info!("received shutdown signal");
        pipeline_shutdown.shutdown();
    })
    .context("failed to set Ctrl+C handler")?;

    pipeline.run().await?;

    info!("NetWatch stopped");
    Ok(())
}

/// Setup logging based on configuration.
fn setup_logging(config: &Config) -> Result<()> {
    let level = match config.logging.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("netwatch={level}").parse().unwrap())
        .add_directive("sqlx=warn".parse().unwrap())
        .add_directive("reqwest=warn".parse().unwrap());

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.logging.format == "json" {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber.with(fmt::layer().with_target(true)).init();
    }

    Ok(())
}
