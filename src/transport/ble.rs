//! Bluetooth LE radio over `btleplug`.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::Duration;

use btleplug::api::{
    Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _,
    ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{Link, Radio, RadioFuture};
use crate::error::{Error, Result};
use crate::types::{Capability, DiscoveredPeripheral};

type EventStream = Pin<Box<dyn Stream<Item = CentralEvent> + Send>>;

/// A host Bluetooth adapter.
pub struct BleRadio {
    adapter: Adapter,
    scan_filter: ScanFilter,
    /// Peripherals from the latest scan, keyed by platform id.
    seen: Mutex<HashMap<String, Peripheral>>,
}

impl BleRadio {
    /// Opens an adapter: the one whose info matches `name`, else the first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AdapterUnavailable`] if the host has no adapter or
    /// the named one does not exist.
    pub async fn new(name: Option<&str>) -> Result<Self> {
        let manager = Manager::new().await.map_err(|e| Error::AdapterUnavailable {
            reason: format!("bluetooth manager: {e}"),
        })?;
        let adapters = manager.adapters().await?;

        let adapter = match name.map(str::trim) {
            Some(requested) => {
                let mut found = None;
                for adapter in adapters {
                    let info = adapter.adapter_info().await?;
                    if adapter_matches(&info, requested) {
                        found = Some(adapter);
                        break;
                    }
                }
                found.ok_or_else(|| Error::AdapterUnavailable {
                    reason: format!("adapter {requested:?} not found"),
                })?
            }
            None => adapters
                .into_iter()
                .next()
                .ok_or_else(|| Error::AdapterUnavailable {
                    reason: "no bluetooth adapters on host".into(),
                })?,
        };

        if let Ok(info) = adapter.adapter_info().await {
            tracing::info!(adapter = %info, "using adapter");
        }

        Ok(Self {
            adapter,
            scan_filter: ScanFilter::default(),
            seen: Mutex::new(HashMap::new()),
        })
    }

    /// Only reports peripherals advertising one of `services`.
    #[must_use]
    pub fn with_scan_services(mut self, services: Vec<Uuid>) -> Self {
        self.scan_filter = ScanFilter { services };
        self
    }

    fn cached(&self, id: &str) -> Option<Peripheral> {
        self.seen.lock().ok()?.get(id).cloned()
    }

    async fn describe(peripheral: &Peripheral) -> Result<DiscoveredPeripheral> {
        let properties = peripheral.properties().await?;
        let id = peripheral.id().to_string();
        Ok(match properties {
            Some(properties) => DiscoveredPeripheral {
                id,
                address: properties.address.to_string(),
                name: properties.local_name,
                service_ids: properties.services,
                rssi: properties.rssi,
            },
            None => DiscoveredPeripheral {
                id,
                address: peripheral.address().to_string(),
                name: None,
                service_ids: Vec::new(),
                rssi: None,
            },
        })
    }
}

impl Radio for BleRadio {
    type Link = BleLink;

    fn scan(&self, duration: Duration) -> RadioFuture<'_, Result<Vec<DiscoveredPeripheral>>> {
        Box::pin(async move {
            self.adapter.start_scan(self.scan_filter.clone()).await?;
            let adapter = self.adapter.clone();
            let guard = StopOnDrop::new(move || {
                tokio::spawn(async move {
                    if let Err(e) = adapter.stop_scan().await {
                        tracing::debug!("stop abandoned scan: {e}");
                    }
                });
            });
            tokio::time::sleep(duration).await;
            guard.disarm();
            if let Err(e) = self.adapter.stop_scan().await {
                tracing::debug!("stop scan: {e}");
            }

            let mut found = Vec::new();
            let mut seen = HashMap::new();
            for peripheral in self.adapter.peripherals().await? {
                match Self::describe(&peripheral).await {
                    Ok(described) => {
                        seen.insert(described.id.clone(), peripheral);
                        found.push(described);
                    }
                    Err(e) => tracing::debug!("skipping peripheral: {e}"),
                }
            }
            if let Ok(mut cache) = self.seen.lock() {
                *cache = seen;
            }
            Ok(found)
        })
    }

    fn connect<'a>(
        &'a self,
        discovered: &'a DiscoveredPeripheral,
    ) -> RadioFuture<'a, Result<BleLink>> {
        Box::pin(async move {
            let peripheral = self
                .cached(&discovered.id)
                .ok_or_else(|| Error::DeviceNotFound {
                    device_id: discovered.id.clone(),
                    scans: 0,
                })?;

            if !peripheral.is_connected().await? {
                peripheral.connect().await?;
            }

            let events = self.adapter.events().await?;
            let lost = CancellationToken::new();
            let closed = CancellationToken::new();
            tokio::spawn(watch_disconnect(
                events,
                peripheral.id(),
                lost.clone(),
                closed.clone(),
            ));

            Ok(BleLink {
                peripheral,
                characteristics: Mutex::new(Vec::new()),
                lost,
                closed,
            })
        })
    }

    fn release<'a>(&'a self, discovered: &'a DiscoveredPeripheral) -> RadioFuture<'a, Result<()>> {
        Box::pin(async move {
            let Some(peripheral) = self.cached(&discovered.id) else {
                return Ok(());
            };
            if peripheral.is_connected().await.unwrap_or(false) {
                peripheral.disconnect().await?;
            }
            Ok(())
        })
    }
}

/// Runs a cleanup action if dropped before being disarmed, so a scan whose
/// future is abandoned mid-sleep still stops.
struct StopOnDrop<F: FnOnce()> {
    stop: Option<F>,
}

impl<F: FnOnce()> StopOnDrop<F> {
    const fn new(stop: F) -> Self {
        Self { stop: Some(stop) }
    }

    fn disarm(mut self) {
        self.stop = None;
    }
}

impl<F: FnOnce()> Drop for StopOnDrop<F> {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            stop();
        }
    }
}

/// Cancels `lost` when the adapter reports the peripheral gone.
async fn watch_disconnect(
    mut events: EventStream,
    id: PeripheralId,
    lost: CancellationToken,
    closed: CancellationToken,
) {
    loop {
        tokio::select! {
            () = closed.cancelled() => return,
            event = events.next() => match event {
                Some(CentralEvent::DeviceDisconnected(gone)) if gone == id => {
                    lost.cancel();
                    return;
                }
                Some(_) => {}
                None => {
                    // Adapter event stream ended
                    lost.cancel();
                    return;
                }
            },
        }
    }
}

/// A connected BLE peripheral.
pub struct BleLink {
    peripheral: Peripheral,
    characteristics: Mutex<Vec<Characteristic>>,
    lost: CancellationToken,
    closed: CancellationToken,
}

impl BleLink {
    fn characteristic(&self, capability: &Capability) -> Result<Characteristic> {
        self.characteristics
            .lock()
            .ok()
            .and_then(|chars| {
                chars
                    .iter()
                    .find(|c| c.uuid == capability.uuid && c.service_uuid == capability.service)
                    .cloned()
            })
            .ok_or_else(|| Error::CapabilityNotFound {
                device_id: self.peripheral.id().to_string(),
                capability: capability.uuid.to_string(),
            })
    }
}

impl Link for BleLink {
    fn probe(&self) -> RadioFuture<'_, Result<()>> {
        Box::pin(async move {
            self.peripheral.properties().await?;
            Ok(())
        })
    }

    fn discover(&self, service: Uuid) -> RadioFuture<'_, Result<Vec<Capability>>> {
        Box::pin(async move {
            self.peripheral.discover_services().await?;
            let characteristics: Vec<Characteristic> = self
                .peripheral
                .characteristics()
                .into_iter()
                .filter(|c| c.service_uuid == service)
                .collect();
            let capabilities = characteristics
                .iter()
                .map(|c| Capability {
                    uuid: c.uuid,
                    service: c.service_uuid,
                })
                .collect();
            if let Ok(mut cache) = self.characteristics.lock() {
                *cache = characteristics;
            }
            Ok(capabilities)
        })
    }

    fn write<'a>(
        &'a self,
        capability: &'a Capability,
        data: &'a [u8],
    ) -> RadioFuture<'a, Result<()>> {
        Box::pin(async move {
            let characteristic = self.characteristic(capability)?;
            let write_type =
                write_type(characteristic.properties).ok_or_else(|| Error::CapabilityNotFound {
                    device_id: self.peripheral.id().to_string(),
                    capability: format!("writable {}", capability.uuid),
                })?;
            self.peripheral.write(&characteristic, data, write_type).await?;
            Ok(())
        })
    }

    fn read<'a>(&'a self, capability: &'a Capability) -> RadioFuture<'a, Result<Vec<u8>>> {
        Box::pin(async move {
            let characteristic = self.characteristic(capability)?;
            Ok(self.peripheral.read(&characteristic).await?)
        })
    }

    fn disconnect(&self) -> RadioFuture<'_, Result<()>> {
        Box::pin(async move {
            self.closed.cancel();
            if self.peripheral.is_connected().await.unwrap_or(false) {
                self.peripheral.disconnect().await?;
            }
            Ok(())
        })
    }

    fn is_connected(&self) -> RadioFuture<'_, bool> {
        Box::pin(async move {
            !self.lost.is_cancelled() && self.peripheral.is_connected().await.unwrap_or(false)
        })
    }

    fn link_lost(&self) -> RadioFuture<'static, ()> {
        Box::pin(self.lost.clone().cancelled_owned())
    }
}

impl Drop for BleLink {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

/// Prefers acknowledged writes when the capability supports them.
fn write_type(properties: CharPropFlags) -> Option<WriteType> {
    if properties.contains(CharPropFlags::WRITE) {
        Some(WriteType::WithResponse)
    } else if properties.contains(CharPropFlags::WRITE_WITHOUT_RESPONSE) {
        Some(WriteType::WithoutResponse)
    } else {
        None
    }
}

/// Adapter info strings look like `hci0 (usb:v1D6Bp0246d0540)`.
fn adapter_matches(info: &str, requested: &str) -> bool {
    let name = info.split_whitespace().next().unwrap_or_default();
    name.eq_ignore_ascii_case(requested) || info.eq_ignore_ascii_case(requested)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_type_selection() {
        assert_eq!(
            write_type(CharPropFlags::WRITE | CharPropFlags::WRITE_WITHOUT_RESPONSE),
            Some(WriteType::WithResponse)
        );
        assert_eq!(
            write_type(CharPropFlags::WRITE_WITHOUT_RESPONSE),
            Some(WriteType::WithoutResponse)
        );
        assert_eq!(write_type(CharPropFlags::READ | CharPropFlags::NOTIFY), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_scan_is_stopped() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};

        let stops = Arc::new(AtomicUsize::new(0));
        let scan = |stops: Arc<AtomicUsize>| async move {
            let guard = StopOnDrop::new(move || {
                stops.fetch_add(1, Ordering::SeqCst);
            });
            tokio::time::sleep(Duration::from_secs(5)).await;
            guard.disarm();
        };

        let abandoned = tokio::time::timeout(Duration::from_secs(1), scan(Arc::clone(&stops))).await;
        assert!(abandoned.is_err());
        assert_eq!(stops.load(Ordering::SeqCst), 1);

        scan(Arc::clone(&stops)).await;
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_adapter_matching() {
        assert!(adapter_matches("hci0 (usb:v1D6Bp0246d0540)", "hci0"));
        assert!(adapter_matches("hci1 (usb:v1D6Bp0246d0540)", "HCI1"));
        assert!(!adapter_matches("hci0 (usb:v1D6Bp0246d0540)", "hci1"));
        assert!(adapter_matches("CoreBluetooth", "corebluetooth"));
    }
}
