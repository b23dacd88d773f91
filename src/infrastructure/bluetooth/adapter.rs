//! btleplug Platform Adapter
//!
//! Cross-platform [`BlePlatform`] implementation on top of btleplug. One
//! pump task translates `CentralEvent`s into [`PlatformEvent`]s; connect and
//! service-discovery requests return immediately and report completion
//! through the same channel.

use crate::infrastructure::bluetooth::platform::{
    BlePlatform, DiscoveryStatus, GattCharacteristic, GattService, LinkId, LinkState,
    PlatformError, PlatformEvent, WriteMode,
};
use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::stream::StreamExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Default)]
struct LinkTable {
    next_id: u64,
    by_link: HashMap<LinkId, Peripheral>,
    by_peripheral: HashMap<PeripheralId, LinkId>,
}

impl LinkTable {
    fn insert(&mut self, peripheral: Peripheral) -> LinkId {
        self.next_id += 1;
        let link = LinkId(self.next_id);
        self.by_peripheral.insert(peripheral.id(), link);
        self.by_link.insert(link, peripheral);
        link
    }

    fn remove(&mut self, id: &PeripheralId) -> Option<LinkId> {
        let link = self.by_peripheral.remove(id)?;
        self.by_link.remove(&link);
        Some(link)
    }
}

pub struct BtleplugPlatform {
    adapter: Adapter,
    events: mpsc::UnboundedSender<PlatformEvent>,
    links: Mutex<LinkTable>,
}

impl BtleplugPlatform {
    /// Initialize the first available BLE adapter and start the event pump.
    pub async fn new(
        events: mpsc::UnboundedSender<PlatformEvent>,
    ) -> Result<Arc<Self>, PlatformError> {
        let manager = Manager::new()
            .await
            .map_err(|_| PlatformError::AdapterUnavailable)?;
        let adapter = manager
            .adapters()
            .await
            .map_err(|_| PlatformError::AdapterUnavailable)?
            .into_iter()
            .next()
            .ok_or(PlatformError::AdapterUnavailable)?;

        let platform = Arc::new(Self {
            adapter,
            events,
            links: Mutex::new(LinkTable::default()),
        });

        let mut stream = platform
            .adapter
            .events()
            .await
            .map_err(|e| PlatformError::DiscoveryFailed(e.to_string()))?;
        let pump = Arc::clone(&platform);
        tokio::spawn(async move {
            while let Some(event) = stream.next().await {
                pump.handle_central_event(event).await;
            }
            debug!("BLE event stream ended");
        });

        info!("BLE adapter initialized");
        Ok(platform)
    }

    async fn handle_central_event(&self, event: CentralEvent) {
        match event {
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                if let Ok(peripheral) = self.adapter.peripheral(&id).await {
                    if let Ok(Some(props)) = peripheral.properties().await {
                        let _ = self.events.send(PlatformEvent::AdvertisementSeen {
                            address: props.address.to_string(),
                            local_name: props.local_name,
                            rssi: props.rssi,
                        });
                    }
                }
            }
            CentralEvent::DeviceConnected(id) => {
                let link = self
                    .links
                    .lock()
                    .expect("link table mutex poisoned")
                    .by_peripheral
                    .get(&id)
                    .copied();
                if let Some(link) = link {
                    let _ = self.events.send(PlatformEvent::LinkStateChanged {
                        link,
                        state: LinkState::Connected,
                    });
                }
            }
            CentralEvent::DeviceDisconnected(id) => {
                let link = self
                    .links
                    .lock()
                    .expect("link table mutex poisoned")
                    .remove(&id);
                if let Some(link) = link {
                    let _ = self.events.send(PlatformEvent::LinkStateChanged {
                        link,
                        state: LinkState::Disconnected,
                    });
                }
            }
            _ => {}
        }
    }

    /// The target must have been seen during discovery; btleplug only hands
    /// out peripherals from the adapter cache.
    async fn find_peripheral(&self, address: &str) -> Result<Peripheral, PlatformError> {
        let peripherals =
            self.adapter
                .peripherals()
                .await
                .map_err(|e| PlatformError::ConnectFailed {
                    address: address.to_string(),
                    reason: e.to_string(),
                })?;

        for peripheral in peripherals {
            if let Ok(Some(props)) = peripheral.properties().await {
                if props.address.to_string().eq_ignore_ascii_case(address) {
                    return Ok(peripheral);
                }
            }
        }

        Err(PlatformError::ConnectFailed {
            address: address.to_string(),
            reason: "peripheral not found in discovery cache".to_string(),
        })
    }

    fn peripheral_for(&self, link: LinkId) -> Result<Peripheral, PlatformError> {
        self.links
            .lock()
            .expect("link table mutex poisoned")
            .by_link
            .get(&link)
            .cloned()
            .ok_or(PlatformError::LinkNotFound(link))
    }

    fn find_characteristic(
        peripheral: &Peripheral,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<Characteristic, PlatformError> {
        peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == characteristic && c.service_uuid == service)
            .ok_or(PlatformError::CharacteristicNotFound { characteristic })
    }
}

#[async_trait]
impl BlePlatform for BtleplugPlatform {
    async fn start_discovery(&self) -> Result<(), PlatformError> {
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| PlatformError::DiscoveryFailed(e.to_string()))
    }

    async fn stop_discovery(&self) -> Result<(), PlatformError> {
        self.adapter
            .stop_scan()
            .await
            .map_err(|e| PlatformError::DiscoveryFailed(e.to_string()))
    }

    async fn connect(&self, address: &str) -> Result<LinkId, PlatformError> {
        let peripheral = self.find_peripheral(address).await?;
        let link = self
            .links
            .lock()
            .expect("link table mutex poisoned")
            .insert(peripheral.clone());

        // Completion surfaces as DeviceConnected from the pump; a failed
        // attempt is reported as an immediate disconnect.
        let events = self.events.clone();
        tokio::spawn(async move {
            if let Err(e) = peripheral.connect().await {
                warn!(error = %e, "Connect attempt failed");
                let _ = events.send(PlatformEvent::LinkStateChanged {
                    link,
                    state: LinkState::Disconnected,
                });
            }
        });

        Ok(link)
    }

    async fn disconnect(&self, link: LinkId) -> Result<(), PlatformError> {
        let peripheral = self.peripheral_for(link)?;
        peripheral
            .disconnect()
            .await
            .map_err(|e| PlatformError::DisconnectFailed(e.to_string()))
    }

    async fn discover_services(&self, link: LinkId) -> Result<(), PlatformError> {
        let peripheral = self.peripheral_for(link)?;
        let events = self.events.clone();

        tokio::spawn(async move {
            match peripheral.discover_services().await {
                Ok(()) => {
                    let services = peripheral
                        .services()
                        .into_iter()
                        .map(|s| GattService {
                            uuid: s.uuid,
                            characteristics: s
                                .characteristics
                                .into_iter()
                                .map(|c| GattCharacteristic { uuid: c.uuid })
                                .collect(),
                        })
                        .collect();
                    let _ = events.send(PlatformEvent::ServicesDiscovered {
                        link,
                        status: DiscoveryStatus::Success,
                        services,
                    });
                }
                Err(e) => {
                    warn!(error = %e, "Service discovery failed");
                    let _ = events.send(PlatformEvent::ServicesDiscovered {
                        link,
                        status: DiscoveryStatus::Failed,
                        services: Vec::new(),
                    });
                }
            }
        });

        Ok(())
    }

    async fn write_characteristic(
        &self,
        link: LinkId,
        service: Uuid,
        characteristic: Uuid,
        payload: &[u8],
        mode: WriteMode,
    ) -> Result<(), PlatformError> {
        let peripheral = self.peripheral_for(link)?;
        let target = Self::find_characteristic(&peripheral, service, characteristic)?;
        let write_type = match mode {
            WriteMode::WithResponse => WriteType::WithResponse,
            WriteMode::WithoutResponse => WriteType::WithoutResponse,
        };

        peripheral
            .write(&target, payload, write_type)
            .await
            .map_err(|e| PlatformError::WriteFailed(e.to_string()))
    }

    async fn subscribe(
        &self,
        link: LinkId,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<(), PlatformError> {
        let peripheral = self.peripheral_for(link)?;
        let target = Self::find_characteristic(&peripheral, service, characteristic)?;

        peripheral
            .subscribe(&target)
            .await
            .map_err(|e| PlatformError::SubscribeFailed(e.to_string()))
    }
}
