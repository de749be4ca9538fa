//! SONiC lldpd entry point.
//!
//! Loads the port configuration, starts the dispatcher and the link state
//! controller, and runs until SIGINT.

use anyhow::Context;
use clap::Parser;
use sonic_lldpd::{
    CaptureProvider, ConfigChange, Dispatcher, LinkNotification, LinkStateController,
    LldpdConfig, OperState,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// SONiC LLDP daemon
#[derive(Parser, Debug)]
#[command(name = "lldpd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short = 'c', long, default_value = sonic_lldpd::config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args.log_level);

    info!("lldpd: Starting LLDP daemon");

    match run_daemon(args).await {
        Ok(()) => {
            info!("lldpd: Daemon exiting normally");
            ExitCode::SUCCESS
        }
        Err(e) => {
            let message = format!("{:#}", e);
            error!(error = %message, "lldpd: Daemon exiting with error");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_line_number(true).compact())
        .init();
}

#[cfg(feature = "pcap")]
fn capture_provider() -> Arc<dyn CaptureProvider> {
    Arc::new(sonic_lldpd::PcapProvider)
}

#[cfg(not(feature = "pcap"))]
fn capture_provider() -> Arc<dyn CaptureProvider> {
    warn!("lldpd: Built without pcap support, using loopback capture");
    Arc::new(sonic_lldpd::LoopbackProvider::new())
}

async fn run_daemon(args: Args) -> anyhow::Result<()> {
    let config = LldpdConfig::load_or_default(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    config.validate().context("validating configuration")?;

    let settings = config.engine_settings()?;
    let ports = config.ports()?;
    info!(
        ports = ports.len(),
        tx_interval_secs = settings.timing.interval_secs(),
        ttl_secs = settings.timing.ttl_secs(),
        enabled = settings.enabled,
        "lldpd: Configuration loaded"
    );

    let (dispatcher, handle) = Dispatcher::new(capture_provider(), settings);
    let dispatcher_task = tokio::spawn(dispatcher.run());

    let (link_tx, link_rx) = mpsc::channel(config.global.channel_capacity);
    let controller = LinkStateController::new(handle.clone());
    let controller_task = tokio::spawn(controller.run(link_rx, handle.subscribe_exit()));

    for (port, enabled) in ports {
        let if_index = port.if_index;
        handle.add_port(port).await?;
        if !enabled {
            handle
                .apply_config(ConfigChange::PortEnable {
                    if_index,
                    enabled: false,
                })
                .await?;
            continue;
        }
        // Without a link monitor, configured ports are reported up
        link_tx
            .send(LinkNotification::new(if_index, OperState::Up.as_str()))
            .await
            .context("link state controller stopped")?;
    }

    signal::ctrl_c().await.context("waiting for SIGINT")?;
    info!("lldpd: Received SIGINT, shutting down");
    handle.shutdown();

    drop(link_tx);
    if let Err(e) = controller_task.await {
        warn!(error = %e, "lldpd: Link state controller task failed");
    }
    dispatcher_task.await.context("dispatcher task failed")?;

    info!("lldpd: Graceful shutdown complete");
    Ok(())
}
