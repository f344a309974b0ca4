//! Access to the BMS over a BLE GATT link.
//!
//! The BMS exposes a serial-like service: requests are written to one characteristic and
//! replies arrive as notifications on another. A reply may be split over several
//! notification events and notifications may be dropped by the radio.

pub mod bluetooth;
pub mod mock;

use std::time::Duration;

use async_trait::async_trait;
use bluest::Uuid;

use crate::config::DeviceAddress;
use crate::error::TransportError;

/// The service carrying the BMS request/response protocol
pub const BMS_SERVICE_ID: Uuid = Uuid::from_u128(0x0000ff00_0000_1000_8000_00805f9b34fb);
/// Replies are notified on this characteristic
pub const BMS_NOTIFY_CHARACTERISTIC_ID: Uuid = Uuid::from_u128(0x0000ff01_0000_1000_8000_00805f9b34fb);
/// Requests are written to this characteristic
pub const BMS_WRITE_CHARACTERISTIC_ID: Uuid = Uuid::from_u128(0x0000ff02_0000_1000_8000_00805f9b34fb);

/// Opens links to BMS devices. Only one link may be open at a time.
#[async_trait]
pub trait BleTransport: Send {
    /// Connect to `address`, waiting at most `deadline` for the connection to succeed.
    ///
    /// On failure nothing is left allocated for the caller to release.
    async fn open(
        &mut self,
        address: &DeviceAddress,
        deadline: Duration,
    ) -> Result<Box<dyn BleLink>, TransportError>;
}

/// An open GATT connection to one device.
#[async_trait]
pub trait BleLink: Send {
    async fn write_characteristic(
        &mut self,
        characteristic: Uuid,
        bytes: &[u8],
    ) -> Result<(), TransportError>;

    /// Wait at most `deadline` for the next notification event.
    async fn await_notification(&mut self, deadline: Duration) -> Result<Vec<u8>, TransportError>;

    /// Disconnect. Calling this more than once has no further effect.
    async fn close(&mut self);
}
