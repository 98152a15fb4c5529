//! Bluetooth transport layer using RFCOMM

use crate::transport::bt_discovery::{self, AdapterDiscovery};
use crate::transport::rfcomm::{RfcommConfig, RfcommConnector};
use spp_shared::LinkError;
use std::sync::Arc;
use tracing::info;

/// RFCOMM connector and discovery collaborator sharing one adapter
pub struct BluetoothTransport {
    pub connector: Arc<RfcommConnector>,
    pub discovery: Arc<AdapterDiscovery>,
}

impl BluetoothTransport {
    /// Open the default adapter
    ///
    /// Fails with [`LinkError::NoAdapter`] when the host has no usable
    /// adapter; nothing is retried.
    pub async fn open(config: RfcommConfig) -> Result<Self, LinkError> {
        let (session, adapter) = bt_discovery::default_adapter().await?;
        info!("[BT] Using adapter {}", adapter.name());

        let discovery = Arc::new(AdapterDiscovery::new(adapter.clone()));
        let connector = Arc::new(RfcommConnector::new(session, adapter, config));

        Ok(Self {
            connector,
            discovery,
        })
    }
}
