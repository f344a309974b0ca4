//! Mock transport for testing
//!
//! Devices are scripted with the notifications they send in reply to each request. Connection
//! failures and dropped replies can be injected, and every open, write and close is counted
//! so tests can check that links are released.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bluest::Uuid;

use super::{BleLink, BleTransport, BMS_WRITE_CHARACTERISTIC_ID};
use crate::config::DeviceAddress;
use crate::error::TransportError;

/// Counters shared by a [`MockTransport`] and all links it opened.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockStats {
    pub open_attempts: u32,
    pub opened: u32,
    pub closes: u32,
    /// Links currently open
    pub open_now: u32,
    /// Most links that were open at the same time
    pub peak_open: u32,
    /// Every request written, in order
    pub writes: Vec<Vec<u8>>,
}

/// The scripted behaviour of one device.
#[derive(Debug, Clone, Default)]
pub struct MockDevice {
    connect_failures: u32,
    replies: HashMap<Vec<u8>, Vec<Vec<u8>>>,
    dropped: HashMap<Vec<u8>, u32>,
}

impl MockDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// A device that never accepts a connection.
    pub fn unreachable() -> Self {
        Self {
            connect_failures: u32::MAX,
            ..Self::default()
        }
    }

    /// Time out the first `n` connection attempts.
    pub fn fail_connects(mut self, n: u32) -> Self {
        self.connect_failures = n;
        self
    }

    /// Answer every write of `request` with the given notification events.
    pub fn reply(mut self, request: &[u8], notifications: &[&[u8]]) -> Self {
        let notifications = notifications.iter().map(|n| n.to_vec()).collect();
        self.replies.insert(request.to_vec(), notifications);
        self
    }

    /// Send nothing for the first `n` writes of `request`.
    pub fn drop_replies(mut self, request: &[u8], n: u32) -> Self {
        self.dropped.insert(request.to_vec(), n);
        self
    }

    fn notifications_for(&mut self, request: &[u8]) -> Vec<Vec<u8>> {
        if let Some(remaining) = self.dropped.get_mut(request) {
            if *remaining > 0 {
                *remaining -= 1;
                return Vec::new();
            }
        }
        self.replies.get(request).cloned().unwrap_or_default()
    }
}

/// A [`BleTransport`] serving scripted [`MockDevice`]s. Timeouts are reported immediately.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    devices: HashMap<DeviceAddress, Arc<Mutex<MockDevice>>>,
    stats: Arc<Mutex<MockStats>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(mut self, address: DeviceAddress, device: MockDevice) -> Self {
        self.devices.insert(address, Arc::new(Mutex::new(device)));
        self
    }

    pub fn stats(&self) -> MockStats {
        self.stats.lock().unwrap().clone()
    }
}

#[async_trait]
impl BleTransport for MockTransport {
    async fn open(
        &mut self,
        address: &DeviceAddress,
        _deadline: Duration,
    ) -> Result<Box<dyn BleLink>, TransportError> {
        self.stats.lock().unwrap().open_attempts += 1;

        let device = self
            .devices
            .get(address)
            .ok_or(TransportError::Timeout("connection"))?;
        {
            let mut device = device.lock().unwrap();
            if device.connect_failures > 0 {
                if device.connect_failures != u32::MAX {
                    device.connect_failures -= 1;
                }
                return Err(TransportError::Timeout("connection"));
            }
        }

        let mut stats = self.stats.lock().unwrap();
        stats.opened += 1;
        stats.open_now += 1;
        stats.peak_open = stats.peak_open.max(stats.open_now);

        Ok(Box::new(MockLink {
            device: Arc::clone(device),
            stats: Arc::clone(&self.stats),
            pending: VecDeque::new(),
            closed: false,
        }))
    }
}

struct MockLink {
    device: Arc<Mutex<MockDevice>>,
    stats: Arc<Mutex<MockStats>>,
    pending: VecDeque<Vec<u8>>,
    closed: bool,
}

#[async_trait]
impl BleLink for MockLink {
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

        self.stats.lock().unwrap().writes.push(bytes.to_vec());
        self.pending.clear();
        let notifications = self.device.lock().unwrap().notifications_for(bytes);
        self.pending.extend(notifications);
        Ok(())
    }

    async fn await_notification(&mut self, _deadline: Duration) -> Result<Vec<u8>, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.pending
            .pop_front()
            .ok_or(TransportError::Timeout("notification"))
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        let mut stats = self.stats.lock().unwrap();
        stats.closes += 1;
        stats.open_now -= 1;
    }
}
