//! Bluetooth adapter lookup and SPP device discovery

use crate::transport::traits::Discovery;
use bluer::{Adapter, AdapterEvent, Address, Device, Session, Uuid};
use futures::StreamExt;
use spp_shared::{link, LinkError};
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Open a BlueZ session and its default adapter
pub async fn default_adapter() -> Result<(Session, Adapter), LinkError> {
    let session = Session::new().await.map_err(|e| {
        warn!("[BT] Unable to open BlueZ session: {}", e);
        LinkError::NoAdapter
    })?;
    let adapter = session.default_adapter().await.map_err(|e| {
        warn!("[BT] No default adapter: {}", e);
        LinkError::NoAdapter
    })?;
    Ok((session, adapter))
}

/// A device seen during a scan
#[derive(Debug, Clone)]
pub struct DiscoveredPeer {
    /// Bluetooth MAC address
    pub address: Address,
    /// Advertised name, if any
    pub name: Option<String>,
    /// Signal strength (if available)
    pub rssi: Option<i16>,
}

/// Discovery collaborator backed by the adapter
///
/// Only scans started through [`AdapterDiscovery::scan`] can be cancelled;
/// BlueZ keeps discovery sessions per client.
pub struct AdapterDiscovery {
    adapter: Adapter,
    service_uuid: Uuid,
    active_scan: Mutex<Option<CancellationToken>>,
}

impl AdapterDiscovery {
    pub fn new(adapter: Adapter) -> Self {
        Self {
            adapter,
            service_uuid: Uuid::from_u128(link::SPP_SERVICE_UUID),
            active_scan: Mutex::new(None),
        }
    }

    /// Scan for devices advertising the serial-profile service
    ///
    /// Ends after `duration` or when [`Discovery::cancel_discovery`] is
    /// called, whichever comes first. Strongest signal first.
    pub async fn scan(&self, duration: Duration) -> anyhow::Result<Vec<DiscoveredPeer>> {
        let token = CancellationToken::new();
        if let Ok(mut active) = self.active_scan.lock() {
            if let Some(previous) = active.replace(token.clone()) {
                previous.cancel();
            }
        }

        let mut peers = Vec::new();
        let mut seen: HashSet<Address> = HashSet::new();

        let discover = self.adapter.discover_devices().await?;
        tokio::pin!(discover);

        let deadline = tokio::time::sleep(duration);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("[BT] Discovery cancelled");
                    break;
                }
                _ = &mut deadline => {
                    info!("[BT] Discovery scan completed");
                    break;
                }
                evt = discover.next() => {
                    let addr = match evt {
                        Some(AdapterEvent::DeviceAdded(addr)) => addr,
                        Some(_) => continue,
                        None => break,
                    };
                    if !seen.insert(addr) {
                        continue;
                    }
                    if let Ok(device) = self.adapter.device(addr) {
                        if self.offers_serial_profile(&device).await {
                            peers.push(DiscoveredPeer {
                                address: addr,
                                name: device.name().await.ok().flatten(),
                                rssi: device.rssi().await.ok().flatten(),
                            });
                        }
                    }
                }
            }
        }

        if let Ok(mut active) = self.active_scan.lock() {
            active.take();
        }

        sort_by_signal(&mut peers);
        Ok(peers)
    }

    async fn offers_serial_profile(&self, device: &Device) -> bool {
        match device.uuids().await {
            Ok(Some(uuids)) => uuids.contains(&self.service_uuid),
            _ => false,
        }
    }
}

impl Discovery for AdapterDiscovery {
    fn cancel_discovery(&self) {
        if let Ok(mut active) = self.active_scan.lock() {
            if let Some(token) = active.take() {
                debug!("[BT] Cancelling discovery before connect");
                token.cancel();
            }
        }
    }
}

/// Sort by signal strength (strongest first)
fn sort_by_signal(peers: &mut [DiscoveredPeer]) {
    peers.sort_by(|a, b| {
        let rssi_a = a.rssi.unwrap_or(i16::MIN);
        let rssi_b = b.rssi.unwrap_or(i16::MIN);
        rssi_b.cmp(&rssi_a)
    });
}
