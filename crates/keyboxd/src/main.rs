use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use tracing::{debug, info};

use keybox_core::device::{Device, DeviceDirectory};
use keybox_core::dispatch::{Dispatcher, ReplySink, SERVER_VERSION};
use keybox_core::types::SessionId;
use keybox_proto::{DeviceId, ReplyEnvelope, RequestId};
use keyboxd::config::GatewayConfig;

#[derive(Parser)]
#[command(name = "keyboxd")]
#[command(about = "Keybox gateway daemon - shares hardware security devices across client sessions")]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

/// Device directory with no drivers wired in yet.
///
/// TODO: replace with the driver registry once the first hardware backend
/// (PKCS#11) is merged.
struct EmptyDirectory;

#[async_trait]
impl DeviceDirectory for EmptyDirectory {
    async fn list(&self) -> Vec<DeviceId> {
        Vec::new()
    }

    async fn lookup(&self, _id: &DeviceId) -> Option<Arc<dyn Device>> {
        None
    }
}

/// Stand-in for the socket transport's outbound queue.
///
/// TODO: hand replies to the unix-socket transport once it lands.
struct OutboundLog;

#[async_trait]
impl ReplySink for OutboundLog {
    async fn reply(&self, session: SessionId, request: RequestId, envelope: ReplyEnvelope) {
        debug!(%session, %request, errcode = envelope.errcode, "outbound reply");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "keyboxd={},keybox_core={}",
            args.log_level, args.log_level
        ))
        .init();

    info!(version = SERVER_VERSION, "starting keyboxd");

    let config = if let Some(config_path) = &args.config {
        GatewayConfig::load_from_file(config_path)?
    } else {
        GatewayConfig::load_from_env()
    };
    info!(socket = %config.socket_path.display(), "configuration loaded");

    let dispatcher = Dispatcher::new(Arc::new(EmptyDirectory), Arc::new(OutboundLog));

    // TODO: wire the unix-socket transport: it owns session identities and
    // feeds session_added / session_removed / call into the dispatcher.

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    let stats = dispatcher.stats().snapshot();
    info!(
        received = stats.received,
        replied = stats.replied,
        forwarded = stats.forwarded,
        "keyboxd stopped"
    );

    Ok(())
}
