//! Echo peer
//!
//! Accepts serial-profile connections and writes back every byte it
//! reads. Runs either as a BlueZ SPP server profile or as a plain TCP
//! listener for hosts without an adapter.

use anyhow::{Context, Result};
use bluer::rfcomm::{Profile, Role};
use bluer::Uuid;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use spp_shared::link;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "echo-peer")]
#[command(about = "Echo every byte received over a serial-profile link")]
struct Cli {
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Advertise an SPP server profile on the default adapter.
    Rfcomm {
        #[arg(long, default_value_t = link::DEFAULT_FALLBACK_CHANNEL)]
        channel: u8,
    },
    /// Listen for TCP connections.
    Tcp {
        #[arg(long, default_value = "0.0.0.0:9000")]
        bind: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)))
        .init();

    match cli.mode {
        Mode::Rfcomm { channel } => serve_rfcomm(channel).await,
        Mode::Tcp { bind } => serve_tcp(&bind).await,
    }
}

async fn serve_tcp(bind: &str) -> Result<()> {
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    info!("[ECHO] Listening on {}", listener.local_addr()?);

    loop {
        let (socket, addr) = listener.accept().await?;
        info!("[ECHO] Accepted {}", addr);
        tokio::spawn(echo(socket, addr.to_string()));
    }
}

async fn serve_rfcomm(channel: u8) -> Result<()> {
    let session = bluer::Session::new().await?;
    let adapter = session.default_adapter().await?;
    adapter.set_powered(true).await?;
    adapter.set_discoverable(true).await?;

    let profile = Profile {
        uuid: Uuid::from_u128(link::SPP_SERVICE_UUID),
        name: Some("Serial Port".to_string()),
        channel: Some(channel.into()),
        role: Some(Role::Server),
        require_authentication: Some(false),
        require_authorization: Some(false),
        ..Default::default()
    };
    let mut handle = session
        .register_profile(profile)
        .await
        .context("registering SPP profile")?;
    info!(
        "[ECHO] SPP server on {} channel {}",
        adapter.address().await?,
        channel
    );

    while let Some(request) = handle.next().await {
        let device = request.device();
        match request.accept() {
            Ok(stream) => {
                info!("[ECHO] Accepted {}", device);
                tokio::spawn(echo(stream, device.to_string()));
            }
            Err(e) => warn!("[ECHO] Failed to accept {}: {}", device, e),
        }
    }

    Ok(())
}

async fn echo<S>(stream: S, who: String)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    match tokio::io::copy(&mut reader, &mut writer).await {
        Ok(n) => info!("[ECHO] {} closed after {} bytes", who, n),
        Err(e) => warn!("[ECHO] {} failed: {}", who, e),
    }
    let _ = writer.shutdown().await;
}
