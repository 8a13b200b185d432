/// BlueZ-backed transport: connection to a single Aranet4 over D-Bus
use async_trait::async_trait;
use bluer::gatt::remote::Characteristic;
use bluer::{Address, Uuid};
use futures_util::StreamExt;
use log::{debug, error, info};
use std::collections::HashMap;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};

use crate::bluetooth::transport::{NotifyCallback, Transport};
use crate::error::{Error, Result};

const SERVICE_RESOLVE_ATTEMPTS: u32 = 40; // How many times to poll for resolved GATT services
const SERVICE_RESOLVE_POLL_MS: u64 = 250;

/// Connected Aranet4 with its GATT characteristics indexed by
/// (service, characteristic) UUID.
pub struct BluezTransport {
    _session: bluer::Session,
    device: bluer::Device,
    characteristics: HashMap<(Uuid, Uuid), Characteristic>,
}

impl BluezTransport {
    /// Connect to the device with the given MAC address through the default adapter
    ///
    /// Powers the adapter on if needed, connects, waits for GATT service
    /// resolution and indexes every characteristic the device exposes.
    pub async fn connect(address: &str) -> Result<Self> {
        let addr: Address = address
            .parse()
            .map_err(|e| Error::Transport(format!("invalid device address {:?}: {}", address, e)))?;

        // Initialize Bluetooth session
        let session = match bluer::Session::new().await {
            Ok(session) => session,
            Err(e) => {
                error!("Failed to create Bluetooth session: {}", e);
                return Err(e.into());
            }
        };

        // Get the default Bluetooth adapter
        let adapter = match session.default_adapter().await {
            Ok(adapter) => adapter,
            Err(e) => {
                error!("Failed to get default Bluetooth adapter: {}", e);
                return Err(e.into());
            }
        };

        // Ensure Bluetooth adapter is powered on
        if !adapter.is_powered().await? {
            if let Err(e) = adapter.set_powered(true).await {
                error!("Failed to power on adapter: {}", e);
                return Err(e.into());
            }
        }

        let device = adapter.device(addr)?;
        if !device.is_connected().await? {
            if let Err(e) = device.connect().await {
                error!("Failed to connect to {}: {}", addr, e);
                return Err(e.into());
            }
        }
        info!("Connected to {}", addr);

        let mut transport = BluezTransport {
            _session: session,
            device,
            characteristics: HashMap::new(),
        };
        if let Err(e) = transport.index_characteristics().await {
            // Don't leave a half-initialised connection behind
            let _ = transport.device.disconnect().await;
            return Err(e);
        }

        Ok(transport)
    }

    async fn index_characteristics(&mut self) -> Result<()> {
        let mut resolved = false;
        for _ in 0..SERVICE_RESOLVE_ATTEMPTS {
            if self.device.is_services_resolved().await? {
                resolved = true;
                break;
            }
            sleep(Duration::from_millis(SERVICE_RESOLVE_POLL_MS)).await;
        }
        if !resolved {
            return Err(Error::Transport(format!(
                "GATT services of {} were not resolved",
                self.device.address()
            )));
        }

        for service in self.device.services().await? {
            let service_uuid = service.uuid().await?;
            for characteristic in service.characteristics().await? {
                let uuid = characteristic.uuid().await?;
                debug!("Found characteristic {} in service {}", uuid, service_uuid);
                self.characteristics
                    .insert((service_uuid, uuid), characteristic);
            }
        }

        Ok(())
    }

    fn characteristic(&self, service: Uuid, characteristic: Uuid) -> Result<&Characteristic> {
        self.characteristics
            .get(&(service, characteristic))
            .ok_or(Error::MissingCharacteristic {
                service,
                characteristic,
            })
    }

    /// Advertised name of the device, as known to BlueZ
    pub async fn name(&self) -> Result<Option<String>> {
        Ok(self.device.name().await?)
    }

    pub async fn disconnect(self) -> Result<()> {
        let addr = self.device.address();
        if let Err(e) = self.device.disconnect().await {
            error!("Failed to disconnect from {}: {}", addr, e);
            return Err(e.into());
        }
        info!("Disconnected from {}", addr);
        Ok(())
    }
}

#[async_trait]
impl Transport for BluezTransport {
    type Subscription = JoinHandle<()>;

    async fn read_characteristic(&self, service: Uuid, characteristic: Uuid) -> Result<Vec<u8>> {
        Ok(self.characteristic(service, characteristic)?.read().await?)
    }

    async fn write_characteristic(
        &self,
        service: Uuid,
        characteristic: Uuid,
        value: &[u8],
    ) -> Result<()> {
        Ok(self
            .characteristic(service, characteristic)?
            .write(value)
            .await?)
    }

    async fn subscribe(
        &self,
        service: Uuid,
        characteristic: Uuid,
        mut on_value: NotifyCallback,
    ) -> Result<Self::Subscription> {
        let remote = self.characteristic(service, characteristic)?.clone();
        let (ready_tx, ready_rx) = oneshot::channel();

        // The notification session lives as long as the stream inside this task
        let handle = tokio::spawn(async move {
            let stream = match remote.notify().await {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            futures_util::pin_mut!(stream);
            while let Some(value) = stream.next().await {
                on_value(&value);
            }
            debug!("Notification stream for {} ended", characteristic);
        });

        match ready_rx.await {
            Ok(Ok(())) => Ok(handle),
            Ok(Err(e)) => {
                error!("Failed to start notifications on {}: {}", characteristic, e);
                Err(e.into())
            }
            Err(_) => Err(Error::Transport(format!(
                "notification task for {} exited before subscribing",
                characteristic
            ))),
        }
    }

    async fn unsubscribe(&self, subscription: Self::Subscription) -> Result<()> {
        subscription.abort();
        match subscription.await {
            Ok(()) => Ok(()),
            Err(e) if e.is_cancelled() => Ok(()),
            Err(e) => Err(Error::Transport(format!(
                "notification task failed: {}",
                e
            ))),
        }
    }

    async fn device_name(&self) -> Result<Option<String>> {
        // BlueZ does not expose the GAP service over D-Bus; use the device property
        self.name().await
    }
}
