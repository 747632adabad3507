use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, PeripheralProperties, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::stream::{self, StreamExt};
use log::{debug, info, warn};
use uuid::Uuid;

use crate::device::constants::{jiband_notify_uuid, jiband_service_uuid, jiband_write_uuid};
use crate::device::transport::{CharacteristicRef, DiscoveryFilter, DiscoveryStream, NotificationStream, Transport};
use crate::device::types::{DeviceId, DiscoveredDevice, TransportHandle};
use crate::error::TransportError;

/// [`Transport`] backed by the platform bluetooth stack through btleplug.
pub struct BtleTransport {
    // keeps the platform session alive for as long as the adapters are used
    _manager: Manager,
    adapters: Vec<Adapter>,
}

impl BtleTransport {
    pub async fn new() -> Result<Self, TransportError> {
        let manager = Manager::new().await?;
        let adapters = manager.adapters().await?;

        if adapters.is_empty() {
            return Err(TransportError::NoAdapter);
        }

        for adapter in &adapters {
            info!("Using adapter {}", adapter.adapter_info().await.unwrap_or("UNKNOWN".to_string()));
        }

        Ok(BtleTransport { _manager: manager, adapters })
    }

    async fn find_peripheral(&self, id: &DeviceId) -> Result<Peripheral, TransportError> {
        for adapter in &self.adapters {
            let peripherals = match adapter.peripherals().await {
                Ok(v) => v,
                Err(err) => {
                    warn!("Failed to query BLE adapter for peripherals: {}", err);
                    continue;
                },
            };

            if let Some(peripheral) = peripherals.into_iter().find(|p| p.id().to_string() == id.as_str()) {
                return Ok(peripheral);
            }
        }

        Err(TransportError::UnknownPeripheral(id.clone()))
    }

    async fn find_characteristic(peripheral: &Peripheral, target: CharacteristicRef) -> Result<Characteristic, TransportError> {
        if peripheral.characteristics().is_empty() {
            peripheral.discover_services().await?;
        }

        peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == target.characteristic && c.service_uuid == target.service)
            .ok_or(TransportError::MissingCharacteristic)
    }
}

async fn discovered_device(adapter: &Adapter, id: &PeripheralId, services: &[Uuid]) -> Option<DiscoveredDevice> {
    let peripheral = match adapter.peripheral(id).await {
        Ok(v) => v,
        Err(err) => {
            debug!("Discovered peripheral vanished before it could be queried: {:?}", err);
            return None;
        },
    };

    let properties: PeripheralProperties = match peripheral.properties().await {
        Err(err) => {
            warn!("Could not query peripheral for properties: {:?}", err);
            return None;
        },
        Ok(None) => {
            warn!("Peripheral has no properties");
            return None;
        },
        Ok(Some(properties)) => properties,
    };

    // Some environments ignore the filter, so make sure to check the service uuid again
    if !services.is_empty() && !services.iter().any(|service| properties.services.contains(service)) {
        return None;
    }

    Some(DiscoveredDevice {
        id: DeviceId(id.to_string()),
        name: properties.local_name,
    })
}

#[async_trait]
impl Transport for BtleTransport {
    async fn start_scan(&self, filter: &DiscoveryFilter) -> Result<DiscoveryStream, TransportError> {
        let scan_filter = ScanFilter { services: filter.services.clone() };
        let mut streams = Vec::with_capacity(self.adapters.len());

        for adapter in &self.adapters {
            let events = adapter.events().await?;
            info!("Scanning using adapter {}...", adapter.adapter_info().await.unwrap_or("UNKNOWN".to_string()));
            adapter.start_scan(scan_filter.clone()).await?;

            let adapter = adapter.clone();
            let services = filter.services.clone();
            let discovered = events.filter_map(move |event| {
                let adapter = adapter.clone();
                let services = services.clone();
                async move {
                    match event {
                        CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                            discovered_device(&adapter, &id, &services).await
                        },
                        _ => None,
                    }
                }
            });
            streams.push(discovered.boxed());
        }

        Ok(stream::select_all(streams).boxed())
    }

    async fn stop_scan(&self) -> Result<(), TransportError> {
        for adapter in &self.adapters {
            adapter.stop_scan().await?;
        }
        Ok(())
    }

    async fn connect(&self, id: &DeviceId) -> Result<TransportHandle, TransportError> {
        let peripheral = self.find_peripheral(id).await?;

        info!("Connecting to peripheral {}...", id);
        peripheral.connect().await?;

        info!("Connected; Discovering services...");
        peripheral.discover_services().await?;

        // the band is useless without both protocol characteristics
        for characteristic in [jiband_write_uuid(), jiband_notify_uuid()] {
            let target = CharacteristicRef { service: jiband_service_uuid(), characteristic };
            if let Err(err) = Self::find_characteristic(&peripheral, target).await {
                if let Err(disconnect_err) = peripheral.disconnect().await {
                    warn!("Failed to disconnect incompatible peripheral: {:?}", disconnect_err);
                }
                return Err(err);
            }
        }

        let name = match peripheral.properties().await {
            Ok(Some(properties)) => properties.local_name,
            Ok(None) => None,
            Err(err) => {
                warn!("Could not query peripheral for properties: {:?}", err);
                None
            },
        };

        Ok(TransportHandle::new(name))
    }

    async fn disconnect(&self, id: &DeviceId) -> Result<(), TransportError> {
        let peripheral = self.find_peripheral(id).await?;
        peripheral.disconnect().await?;
        Ok(())
    }

    async fn is_connected(&self, id: &DeviceId) -> Result<bool, TransportError> {
        match self.find_peripheral(id).await {
            Ok(peripheral) => Ok(peripheral.is_connected().await?),
            Err(TransportError::UnknownPeripheral(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn write(&self, id: &DeviceId, target: CharacteristicRef, bytes: &[u8]) -> Result<(), TransportError> {
        let peripheral = self.find_peripheral(id).await?;
        let characteristic = Self::find_characteristic(&peripheral, target).await?;
        peripheral.write(&characteristic, bytes, WriteType::WithResponse).await?;
        Ok(())
    }

    async fn start_notification(&self, id: &DeviceId, target: CharacteristicRef) -> Result<NotificationStream, TransportError> {
        let peripheral = self.find_peripheral(id).await?;
        let characteristic = Self::find_characteristic(&peripheral, target).await?;

        // open the stream before subscribing so that no early notification is lost
        let notifications = peripheral.notifications().await?;
        info!("Subscribing to characteristic {:?} {:?}", target.service, target.characteristic);
        peripheral.subscribe(&characteristic).await?;

        let uuid = target.characteristic;
        Ok(notifications
            .filter_map(move |data| async move {
                if data.uuid == uuid { Some(Ok(data.value)) } else { None }
            })
            .boxed())
    }

    async fn stop_notification(&self, id: &DeviceId, target: CharacteristicRef) -> Result<(), TransportError> {
        let peripheral = self.find_peripheral(id).await?;
        let characteristic = Self::find_characteristic(&peripheral, target).await?;
        peripheral.unsubscribe(&characteristic).await?;
        Ok(())
    }
}
