//! [`BleTransport`] on top of the platform Bluetooth stack, via `bluest`.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bluest::{Adapter, Characteristic, Device, Uuid};
use futures_util::StreamExt;
use log::{debug, info, warn};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use super::{
    BleLink, BleTransport, BMS_NOTIFY_CHARACTERISTIC_ID, BMS_SERVICE_ID,
    BMS_WRITE_CHARACTERISTIC_ID,
};
use crate::config::DeviceAddress;
use crate::error::TransportError;

/// Upper bound on disconnecting a connection that was never handed out
const RELEASE_TIMEOUT: Duration = Duration::from_secs(2);

/// Notifications buffered between the subscription task and the link
const NOTIFICATION_QUEUE_LEN: usize = 16;

type Notification = Result<Vec<u8>, TransportError>;

/// Talks to BMS devices through the default Bluetooth adapter.
pub struct BluestTransport {
    adapter: Adapter,
    devices: HashMap<DeviceAddress, Device>,
    /// A connection being set up that has not become a link yet
    half_open: Option<Device>,
}

impl BluestTransport {
    /// Open the default adapter and wait for it to be powered on.
    pub async fn new() -> Result<Self, TransportError> {
        let adapter = Adapter::default().await.ok_or(TransportError::NoAdapter)?;
        adapter.wait_available().await?;

        Ok(Self {
            adapter,
            devices: HashMap::new(),
            half_open: None,
        })
    }

    /// Find the device with the given address, scanning for it until it is seen once.
    ///
    /// The scan is bounded by the caller's deadline, an absent device costs one attempt.
    async fn device(&mut self, address: &DeviceAddress) -> Result<Device, TransportError> {
        if let Some(device) = self.devices.get(address) {
            return Ok(device.clone());
        }

        let device = Self::discover_device(&self.adapter, address).await?;

        info!("BATTERY: found {address}");
        self.devices.insert(address.clone(), device.clone());
        Ok(device)
    }

    async fn discover_device(
        adapter: &Adapter,
        address: &DeviceAddress,
    ) -> Result<Device, TransportError> {
        let mut adapter_events = adapter.scan(&[BMS_SERVICE_ID]).await?;
        while let Some(advertising) = adapter_events.next().await {
            let id = format!("{:?}", advertising.device.id());
            if id_matches(&id, address) {
                return Ok(advertising.device);
            }
            debug!("BATTERY: ignoring {id}");
        }

        Err(TransportError::DeviceNotFound(address.to_string()))
    }

    /// Resolve the BMS characteristics and subscribe to notifications.
    async fn attach(&self, device: Device, deadline: Duration) -> Result<BluestLink, TransportError> {
        let service = device
            .discover_services_with_uuid(BMS_SERVICE_ID)
            .await?
            .first()
            .cloned()
            .ok_or(TransportError::Unsupported("the BMS service"))?;
        let write = Self::characteristic(&service, BMS_WRITE_CHARACTERISTIC_ID).await?;
        let notify = Self::characteristic(&service, BMS_NOTIFY_CHARACTERISTIC_ID).await?;

        let (tx, notifications) = mpsc::channel(NOTIFICATION_QUEUE_LEN);
        let (ready_tx, ready_rx) = oneshot::channel();
        let forwarder = tokio::spawn(forward_notifications(notify, ready_tx, tx));

        let subscribed = match timeout(deadline, ready_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TransportError::StreamClosed),
            Err(_) => Err(TransportError::Timeout("subscription")),
        };
        if let Err(err) = subscribed {
            forwarder.abort();
            return Err(err);
        }

        Ok(BluestLink {
            adapter: self.adapter.clone(),
            device,
            write,
            notifications,
            forwarder,
            closed: false,
        })
    }

    async fn characteristic(
        service: &bluest::Service,
        id: Uuid,
    ) -> Result<Characteristic, TransportError> {
        service
            .discover_characteristics_with_uuid(id)
            .await?
            .first()
            .cloned()
            .ok_or(TransportError::Unsupported("the BMS characteristics"))
    }

    /// Scan, connect and subscribe. The device stays in `half_open` until the link exists.
    async fn connect(
        &mut self,
        address: &DeviceAddress,
        deadline: Duration,
    ) -> Result<BluestLink, TransportError> {
        let device = self.device(address).await?;
        self.half_open = Some(device.clone());

        if !device.is_connected().await {
            self.adapter.connect_device(&device).await?;
        }

        let link = self.attach(device, deadline).await?;
        self.half_open = None;
        Ok(link)
    }

    /// Drop a connection that was not handed out as a link.
    ///
    /// Only forgotten once the disconnect finished, so an interrupted release is retried by the
    /// next `open`.
    async fn release_half_open(&mut self) {
        let Some(device) = self.half_open.clone() else {
            return;
        };

        match timeout(RELEASE_TIMEOUT, self.adapter.disconnect_device(&device)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => debug!("BATTERY: disconnect after failed open: {err}"),
            Err(_) => warn!("BATTERY: disconnect after failed open timed out"),
        }
        self.half_open = None;
    }
}

#[async_trait]
impl BleTransport for BluestTransport {
    async fn open(
        &mut self,
        address: &DeviceAddress,
        deadline: Duration,
    ) -> Result<Box<dyn BleLink>, TransportError> {
        self.release_half_open().await;

        let result = match timeout(deadline, self.connect(address, deadline)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout("connection")),
        };
        self.release_half_open().await;

        let link = result?;
        Ok(Box::new(link))
    }
}

/// Forward every notification of `notify` into `tx` until the link goes away.
async fn forward_notifications(
    notify: Characteristic,
    ready: oneshot::Sender<Result<(), TransportError>>,
    tx: mpsc::Sender<Notification>,
) {
    let mut stream = match notify.notify().await {
        Ok(stream) => stream,
        Err(err) => {
            let _ = ready.send(Err(err.into()));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    while let Some(notification) = stream.next().await {
        if tx.send(notification.map_err(TransportError::from)).await.is_err() {
            break;
        }
    }
}

struct BluestLink {
    adapter: Adapter,
    device: Device,
    write: Characteristic,
    notifications: mpsc::Receiver<Notification>,
    forwarder: JoinHandle<()>,
    closed: bool,
}

#[async_trait]
impl BleLink for BluestLink {
    async fn write_characteristic(
        &mut self,
        characteristic: Uuid,
        bytes: &[u8],
    ) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        if characteristic != BMS_WRITE_CHARACTERISTIC_ID {
            return Err(TransportError::Unsupported("writes to that characteristic"));
        }

        // A late reply to an abandoned attempt must not be taken for the reply to this one.
        while let Ok(stale) = self.notifications.try_recv() {
            if let Ok(data) = stale {
                debug!("BATTERY: discarding stale notification 0x{}", hex::encode(data));
            }
        }

        debug!("BATTERY: TX: {}", hex::encode(bytes));
        self.write.write(bytes).await?;
        Ok(())
    }

    async fn await_notification(&mut self, deadline: Duration) -> Result<Vec<u8>, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }

        match timeout(deadline, self.notifications.recv()).await {
            Err(_) => Err(TransportError::Timeout("notification")),
            Ok(None) => Err(TransportError::StreamClosed),
            Ok(Some(Ok(data))) => {
                debug!("BATTERY: RX notification: 0x{}", hex::encode(&data));
                Ok(data)
            }
            Ok(Some(Err(err))) => {
                warn!("BATTERY: Notification error: {err}");
                Err(err)
            }
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.forwarder.abort();

        match timeout(RELEASE_TIMEOUT, self.adapter.disconnect_device(&self.device)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!("BATTERY: Failed to disconnect: {err}"),
            Err(_) => warn!("BATTERY: Disconnect timed out"),
        }
    }
}

impl Drop for BluestLink {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}

/// Whether a platform device identifier refers to `address`.
///
/// Identifiers embed the address in a platform specific way, so only the hex digits are compared.
fn id_matches(id: &str, address: &DeviceAddress) -> bool {
    let digits: String = id
        .chars()
        .filter(|c| c.is_ascii_hexdigit())
        .collect::<String>()
        .to_lowercase();
    digits.contains(&address.compact())
}

#[test]
fn test_id_matches() {
    let address: DeviceAddress = "A4:C1:38:0A:BB:CC".parse().unwrap();
    assert!(id_matches("DeviceId(A4:C1:38:0A:BB:CC)", &address));
    assert!(id_matches("hci0/dev_A4_C1_38_0A_BB_CC", &address));
    assert!(!id_matches("DeviceId(A4:C1:38:0A:BB:CD)", &address));
}
