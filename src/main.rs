mod cli;

use anyhow::Result;
use cli::{Cli, Command, ConnectArgs, TransportKind};
use spp_link::transport::{
    BluetoothTransport, Discovery, NoDiscovery, RfcommConfig, TcpConnector, TransportConnector,
};
use spp_link::{event_channel, ConnectionEvent, ConnectionManager, WriteOutcome};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)))
        .init();

    match cli.command {
        Command::Connect(args) => run_connect(args).await,
        Command::Scan { seconds } => run_scan(Duration::from_secs(seconds)).await,
    }
}

async fn run_scan(duration: Duration) -> Result<()> {
    let bt = BluetoothTransport::open(RfcommConfig::default()).await?;
    info!("Scanning for {:?}...", duration);

    let peers = bt.discovery.scan(duration).await?;
    if peers.is_empty() {
        warn!("No serial-profile devices found");
    }
    for peer in peers {
        println!(
            "{}\t{}\t{}",
            peer.address,
            peer.rssi.map(|r| r.to_string()).unwrap_or_else(|| "-".into()),
            peer.name.unwrap_or_default()
        );
    }
    Ok(())
}

async fn run_connect(args: ConnectArgs) -> Result<()> {
    let (connector, discovery): (Arc<dyn TransportConnector>, Arc<dyn Discovery>) =
        match args.transport {
            TransportKind::Rfcomm => {
                let bt = BluetoothTransport::open(args.rfcomm_config()).await?;
                (bt.connector as _, bt.discovery as _)
            }
            TransportKind::Tcp => (
                Arc::new(TcpConnector::new(args.tcp_config())) as _,
                Arc::new(NoDiscovery) as _,
            ),
        };

    let (listener, mut events) = event_channel();
    let manager = Arc::new(ConnectionManager::new(
        args.connection_config(),
        connector,
        discovery,
        listener,
    ));

    info!("Connecting to {} via {}", args.peer, manager.transport());
    manager.connect(args.peer.as_str()).await;

    // Forward stdin lines as raw bytes
    let writer = manager.clone();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let mut bytes = line.into_bytes();
                    bytes.push(b'\n');
                    match writer.write(&bytes).await {
                        WriteOutcome::Written => {}
                        WriteOutcome::NotConnected => warn!("Not connected, dropped input"),
                        WriteOutcome::Failed(e) => error!("Write failed: {}", e),
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    error!("Failed to read stdin: {}", e);
                    break;
                }
            }
        }
    });

    let mut stdout = tokio::io::stdout();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, disconnecting");
                manager.disconnect().await;
                break;
            }
            event = events.recv() => match event {
                Some(ConnectionEvent::Connected { peer }) => {
                    info!("Connected to {}", peer);
                }
                Some(ConnectionEvent::DataReceived { data, .. }) => {
                    stdout.write_all(&data).await?;
                    stdout.flush().await?;
                }
                Some(ConnectionEvent::ConnectionFailed { peer, cause }) => {
                    error!("Connection to {} failed: {}", peer, cause);
                    break;
                }
                Some(ConnectionEvent::ConnectionLost { peer, cause }) => {
                    warn!("Connection to {} lost: {}", peer, cause);
                    break;
                }
                Some(ConnectionEvent::Error { peer, cause }) => {
                    warn!("Error on {}: {}", peer, cause);
                }
                None => {
                    debug!("Event channel closed");
                    break;
                }
            }
        }
    }

    Ok(())
}
