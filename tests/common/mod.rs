#![allow(dead_code)]

use spp_link::transport::memory::{ConnectPlan, MemoryConnector, RemotePeer};
use spp_link::transport::{Discovery, NoDiscovery};
use spp_link::{event_channel, ConnectionConfig, ConnectionEvent, ConnectionManager};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

pub const PEER_A: &str = "00:11:22:33:44:55";
pub const PEER_B: &str = "66:77:88:99:AA:BB";

const WAIT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(150);

pub struct Harness {
    pub manager: ConnectionManager,
    pub connector: Arc<MemoryConnector>,
    pub events: UnboundedReceiver<ConnectionEvent>,
    pub remotes: UnboundedReceiver<RemotePeer>,
}

impl Harness {
    pub fn new(plan: ConnectPlan) -> Self {
        Self::with_config(plan, ConnectionConfig::default())
    }

    pub fn with_config(plan: ConnectPlan, config: ConnectionConfig) -> Self {
        Self::build(plan, config, Arc::new(NoDiscovery))
    }

    pub fn with_discovery(plan: ConnectPlan, discovery: Arc<dyn Discovery>) -> Self {
        Self::build(plan, ConnectionConfig::default(), discovery)
    }

    fn build(plan: ConnectPlan, config: ConnectionConfig, discovery: Arc<dyn Discovery>) -> Self {
        let (connector, remotes) = MemoryConnector::new(plan);
        let connector = Arc::new(connector);
        let (listener, events) = event_channel();
        let manager = ConnectionManager::new(
            config,
            connector.clone(),
            discovery,
            listener,
        );
        Self {
            manager,
            connector,
            events,
            remotes,
        }
    }

    /// Next listener event, failing the test if none arrives
    pub async fn next_event(&mut self) -> ConnectionEvent {
        timeout(WAIT, self.events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    /// Assert that no event arrives for a short while
    pub async fn expect_quiet(&mut self) {
        if let Ok(Some(event)) = timeout(QUIET, self.events.recv()).await {
            panic!("unexpected event: {:?}", event);
        }
    }

    pub async fn next_remote(&mut self) -> RemotePeer {
        timeout(WAIT, self.remotes.recv())
            .await
            .expect("timed out waiting for remote")
            .expect("remote channel closed")
    }

    /// Connect and wait for the success event
    pub async fn connect(&mut self, peer: &str) -> RemotePeer {
        self.manager.connect(peer).await;
        match self.next_event().await {
            ConnectionEvent::Connected { peer: got } => assert_eq!(got.as_str(), peer),
            other => panic!("expected Connected, got {:?}", other),
        }
        self.next_remote().await
    }

    /// Wait until the local side has closed `remote`
    pub async fn wait_closed(remote: &RemotePeer) {
        timeout(WAIT, async {
            while !remote.was_closed() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("socket was not closed");
    }

    /// Collect inbound data until `len` bytes arrived
    pub async fn collect_data(&mut self, len: usize) -> Vec<u8> {
        let mut out = Vec::new();
        while out.len() < len {
            match self.next_event().await {
                ConnectionEvent::DataReceived { data, .. } => out.extend_from_slice(&data),
                other => panic!("expected data, got {:?}", other),
            }
        }
        out
    }
}
