use std::future::Future;
use std::str::FromStr;

use async_trait::async_trait;
use bluefusion_types::{Address, MetadataValue, Packet, PacketKind, SourceTag};
use btleplug::api::{Central, CentralEvent, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::stream::StreamExt;
use tokio::sync::broadcast;
use tracing::{info, warn};
use uuid::Uuid;

use crate::source::{CollectorError, PacketSource};

const CHANNEL_CAPACITY: usize = 1024;

fn is_security_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    ["auth", "encrypt", "pair", "bond", "security"].iter().any(|kw| lower.contains(kw))
}

fn address_of(peripheral: &Peripheral) -> Address {
    Address::from_str(&peripheral.address().to_string()).unwrap_or(Address::from_bytes([0; 6]))
}

/// Scan/connect/GATT capability surface built over
/// `btleplug::platform::{Manager, Adapter}`, generalizing the scan/connect
/// loop into the shared
/// `PacketSource` contract.
pub struct OsBleSource {
    adapter: Adapter,
    tx: broadcast::Sender<Packet>,
}

impl OsBleSource {
    /// Pick the adapter whose info string contains `adapter_hint`, falling
    /// back to the first available adapter (mirrors `host-ble`'s selection
    /// logic).
    pub async fn new(adapter_hint: Option<&str>) -> Result<Self, CollectorError> {
        let manager = Manager::new().await?;
        let adapters = manager.adapters().await?;
        let mut chosen = None;
        if let Some(hint) = adapter_hint {
            for adapter in &adapters {
                if let Ok(info) = adapter.adapter_info().await {
                    if info.contains(hint) {
                        chosen = Some(adapter.clone());
                        break;
                    }
                }
            }
        }
        let adapter = match chosen {
            Some(a) => a,
            None => adapters.into_iter().next().ok_or(CollectorError::PortNotFound)?,
        };

        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        let source = OsBleSource { adapter, tx };
        source.spawn_event_loop();
        Ok(source)
    }

    fn spawn_event_loop(&self) {
        let adapter = self.adapter.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let mut events = match adapter.events().await {
                Ok(e) => e,
                Err(e) => {
                    warn!(error = %e, "failed to subscribe to adapter events");
                    return;
                }
            };
            while let Some(event) = events.next().await {
                if let Some(packet) = translate_event(&adapter, event).await {
                    let _ = tx.send(packet);
                }
            }
        });
    }

    /// `btleplug` doesn't distinguish active/passive scanning at the API
    /// level on every backend; `active` is accepted for API parity and
    /// reserved for backends that do.
    pub async fn start_scan(&self, _active: bool) -> Result<(), CollectorError> {
        self.adapter.start_scan(ScanFilter::default()).await?;
        Ok(())
    }

    pub async fn stop_scan(&self) -> Result<(), CollectorError> {
        self.adapter.stop_scan().await?;
        Ok(())
    }

    async fn find_peripheral(&self, address: Address) -> Result<Peripheral, CollectorError> {
        for peripheral in self.adapter.peripherals().await? {
            if address_of(&peripheral) == address {
                return Ok(peripheral);
            }
        }
        Err(CollectorError::Ble(btleplug::Error::DeviceNotFound))
    }

    /// Retries an operation once, after pairing, when it fails with a
    /// message matching `/auth|encrypt|pair|bond|security/i`.
    async fn with_security_retry<F, Fut, T>(&self, address: Address, op: F) -> Result<T, CollectorError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, CollectorError>>,
    {
        match op().await {
            Ok(v) => Ok(v),
            Err(e) if is_security_error(&e.to_string()) => {
                info!(%address, "operation failed with a security error, pairing and retrying once");
                self.pair(address).await?;
                op().await.map_err(|e| CollectorError::SecurityRetryExhausted(e.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    pub async fn connect(&self, address: Address) -> Result<(), CollectorError> {
        let peripheral = self.find_peripheral(address).await?;
        peripheral.connect().await?;
        Ok(())
    }

    pub async fn disconnect(&self, address: Address) -> Result<(), CollectorError> {
        let peripheral = self.find_peripheral(address).await?;
        peripheral.disconnect().await?;
        Ok(())
    }

    pub async fn discover_services(&self, address: Address) -> Result<(), CollectorError> {
        let peripheral = self.find_peripheral(address).await?;
        peripheral.discover_services().await?;
        let packet = Packet::new(SourceTag::OsStack, address, 0, PacketKind::ServiceDiscovery, Vec::new())
            .with_metadata("service_count", MetadataValue::Int(peripheral.services().len() as i64));
        let _ = self.tx.send(packet);
        Ok(())
    }

    pub async fn discover_characteristics(&self, address: Address, service: Uuid) -> Result<Vec<Uuid>, CollectorError> {
        let peripheral = self.find_peripheral(address).await?;
        let uuids = peripheral
            .characteristics()
            .into_iter()
            .filter(|c| c.service_uuid == service)
            .map(|c| c.uuid)
            .collect();
        Ok(uuids)
    }

    pub async fn discover_descriptors(&self, address: Address, characteristic: Uuid) -> Result<Vec<Uuid>, CollectorError> {
        let peripheral = self.find_peripheral(address).await?;
        let uuids = peripheral
            .characteristics()
            .into_iter()
            .filter(|c| c.uuid == characteristic)
            .flat_map(|c| c.descriptors.into_iter().map(|d| d.uuid))
            .collect();
        Ok(uuids)
    }

    pub async fn read_characteristic(&self, address: Address, characteristic: Uuid) -> Result<Vec<u8>, CollectorError> {
        self.with_security_retry(address, || async {
            let peripheral = self.find_peripheral(address).await?;
            let chars = peripheral.characteristics();
            let target = chars
                .iter()
                .find(|c| c.uuid == characteristic)
                .ok_or(CollectorError::Ble(btleplug::Error::NotSupported("characteristic not found".into())))?;
            Ok(peripheral.read(target).await?)
        })
        .await
    }

    pub async fn write_characteristic(
        &self,
        address: Address,
        characteristic: Uuid,
        data: &[u8],
        with_response: bool,
    ) -> Result<(), CollectorError> {
        let write_type = if with_response { WriteType::WithResponse } else { WriteType::WithoutResponse };
        let data = data.to_vec();
        self.with_security_retry(address, || {
            let data = data.clone();
            async move {
                let peripheral = self.find_peripheral(address).await?;
                let chars = peripheral.characteristics();
                let target = chars
                    .iter()
                    .find(|c| c.uuid == characteristic)
                    .ok_or(CollectorError::Ble(btleplug::Error::NotSupported("characteristic not found".into())))?;
                peripheral.write(target, &data, write_type).await?;
                Ok(())
            }
        })
        .await
    }

    pub async fn subscribe_notifications(&self, address: Address, characteristic: Uuid) -> Result<(), CollectorError> {
        let peripheral = self.find_peripheral(address).await?;
        let chars = peripheral.characteristics();
        let target = chars
            .iter()
            .find(|c| c.uuid == characteristic)
            .ok_or(CollectorError::Ble(btleplug::Error::NotSupported("characteristic not found".into())))?;
        peripheral.subscribe(target).await?;

        let tx = self.tx.clone();
        let mut stream = peripheral.notifications().await?;
        let peer = address;
        tokio::spawn(async move {
            while let Some(data) = stream.next().await {
                let packet = Packet::new(SourceTag::OsStack, peer, 0, PacketKind::Data, data.value);
                let _ = tx.send(packet);
            }
        });
        Ok(())
    }

    pub async fn pair(&self, address: Address) -> Result<(), CollectorError> {
        let peripheral = self.find_peripheral(address).await?;
        peripheral.pair().await?;
        Ok(())
    }
}

async fn translate_event(adapter: &Adapter, event: CentralEvent) -> Option<Packet> {
    match event {
        CentralEvent::ManufacturerDataAdvertisement { id, manufacturer_data } => {
            let peripheral = adapter.peripheral(&id).await.ok()?;
            let peer = address_of(&peripheral);
            let payload: Vec<u8> = manufacturer_data.values().flatten().copied().collect();
            Some(
                Packet::new(SourceTag::OsStack, peer, 0, PacketKind::Advertisement, payload)
                    .with_metadata("manufacturer_count", MetadataValue::Int(manufacturer_data.len() as i64)),
            )
        }
        CentralEvent::ServiceDataAdvertisement { id, service_data } => {
            let peripheral = adapter.peripheral(&id).await.ok()?;
            let peer = address_of(&peripheral);
            Some(
                Packet::new(SourceTag::OsStack, peer, 0, PacketKind::Advertisement, Vec::new())
                    .with_metadata("service_data_count", MetadataValue::Int(service_data.len() as i64)),
            )
        }
        CentralEvent::ServicesAdvertisement { id, services } => {
            let peripheral = adapter.peripheral(&id).await.ok()?;
            let peer = address_of(&peripheral);
            let joined = services.iter().map(|u| u.to_string()).collect::<Vec<_>>().join(",");
            Some(
                Packet::new(SourceTag::OsStack, peer, 0, PacketKind::Advertisement, Vec::new())
                    .with_metadata("services", MetadataValue::Text(joined)),
            )
        }
        CentralEvent::DeviceConnected(id) => {
            let peripheral = adapter.peripheral(&id).await.ok()?;
            let peer = address_of(&peripheral);
            Some(Packet::new(SourceTag::OsStack, peer, 0, PacketKind::ConnectionEvent, Vec::new()))
        }
        CentralEvent::DeviceDisconnected(id) => {
            let peripheral = adapter.peripheral(&id).await.ok()?;
            let peer = address_of(&peripheral);
            Some(Packet::new(SourceTag::OsStack, peer, 0, PacketKind::Disconnection, Vec::new()))
        }
        _ => None,
    }
}

#[async_trait]
impl PacketSource for OsBleSource {
    fn name(&self) -> String {
        "os-ble".to_string()
    }

    fn subscribe(&self) -> broadcast::Receiver<Packet> {
        self.tx.subscribe()
    }

    async fn send_command(&self, _cmd: &str) -> Result<(), CollectorError> {
        Ok(())
    }
}
