//! Error types for the BMS poller.
//!
//! Nothing in here is fatal to the process. Frame and exchange errors degrade a single
//! sub-frame of a [`TelemetryRecord`](crate::TelemetryRecord), cycle errors skip one device
//! for one polling cycle.

use std::fmt::Display;

use thiserror::Error;

use crate::config::DeviceAddress;

/// Why a received buffer was not accepted as a frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// The first two bytes are not the header expected for this frame kind.
    #[error("unexpected header {found}, expected {expected}")]
    Header { expected: String, found: String },

    /// The last byte is not the `0x77` terminator.
    #[error("missing frame terminator")]
    Terminator,

    /// A field offset lies beyond the end of the payload.
    #[error("frame too short: need {needed} bytes, got {len}")]
    Truncated { needed: usize, len: usize },

    /// The name payload contains bytes outside 7-bit ASCII.
    #[error("name is not ASCII")]
    NotAscii,
}

/// Failures reported by a [`BleTransport`](crate::transport::BleTransport) or one of its links.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The per-attempt deadline expired.
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("no bluetooth adapter found")]
    NoAdapter,

    #[error("device {0} not found")]
    DeviceNotFound(String),

    /// The device does not expose a required GATT service or characteristic.
    #[error("device does not support {0}")]
    Unsupported(&'static str),

    #[error("link already closed")]
    Closed,

    #[error("notification stream ended")]
    StreamClosed,

    #[error("bluetooth error: {0}")]
    Bluetooth(#[from] bluest::Error),
}

/// Outcome of a bounded retry that did not produce a value.
#[derive(Debug, Error)]
pub enum RetryError<E: Display> {
    /// Every attempt failed. `last` is the error of the final attempt.
    #[error("gave up after {attempts} attempts")]
    Exhausted { attempts: u32, last: Option<E> },

    /// Shutdown was requested before the next attempt.
    #[error("cancelled by shutdown")]
    Cancelled,
}

/// A polling cycle that yielded nothing to publish for one device.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("connection to {address} timed out after {attempts} attempts")]
    ConnectTimeout {
        address: DeviceAddress,
        attempts: u32,
    },

    /// The session ran, but none of the three frames could be decoded.
    #[error("no telemetry decoded from {address}")]
    EmptyRecord { address: DeviceAddress },

    #[error("poll of {address} cancelled by shutdown")]
    Cancelled { address: DeviceAddress },
}

/// A record could not be handed to the downstream consumer.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to write message: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode message: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid device address {0:?}, expected AA:BB:CC:DD:EE:FF")]
    InvalidAddress(String),

    #[error("no batteries configured")]
    NoDevices,

    #[error("update interval must be greater than zero")]
    ZeroInterval,
}
