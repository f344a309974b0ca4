//! Handing decoded telemetry to downstream consumers.
//!
//! [`JsonPublisher`] writes one JSON message per line, each naming the topic it belongs on:
//!
//! ```text
//! {"topic":"liontron/status","retain":true,"payload":"online"}
//! {"topic":"liontron/liontron_LT-12V100A/state","retain":true,"payload":{"Vmain":13.2,...}}
//! ```
//!
//! so that a message bus bridge can forward it unchanged.

use std::io::Write;

use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::config::DeviceAddress;
use crate::error::PublishError;
use crate::telemetry::TelemetryRecord;

/// Receives the telemetry of every successful polling cycle.
pub trait Publisher: Send {
    fn publish(&mut self, address: &DeviceAddress, record: &TelemetryRecord) -> Result<(), PublishError>;

    /// Announce whether the poller is running.
    fn set_availability(&mut self, _online: bool) -> Result<(), PublishError> {
        Ok(())
    }
}

/// The flat state payload of one record. Keys of missing replies are left out.
pub struct StateDocument<'a>(pub &'a TelemetryRecord);

impl Serialize for StateDocument<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let record = self.0;
        let mut map = serializer.serialize_map(None)?;

        if let Some(status) = &record.status {
            map.serialize_entry("Vmain", &status.main_voltage)?;
            map.serialize_entry("Imain", &status.main_current)?;
            map.serialize_entry("RemainAh", &status.remaining_capacity_ah)?;
            map.serialize_entry("NominalAh", &status.nominal_capacity_ah)?;
            map.serialize_entry("NumberCycles", &status.cycle_count)?;
            map.serialize_entry("ProtectState", &status.protection_flags)?;
            map.serialize_entry("ProtectStateBin", &format!("{:016b}", status.protection_flags))?;
            map.serialize_entry("ProtectStateText", status.protection_state.label())?;
            map.serialize_entry("SoC", &status.state_of_charge)?;
            map.serialize_entry("TempC1", &status.temperature1)?;
            map.serialize_entry("TempC2", &status.temperature2)?;
        }

        for (index, voltage) in record.cells() {
            map.serialize_entry(&format!("Vcell{index}"), &voltage)?;
        }

        if let Some(name) = &record.name {
            map.serialize_entry("Name", name)?;
        }

        map.end()
    }
}

#[derive(serde::Serialize)]
struct Message<'a, T: Serialize> {
    topic: &'a str,
    retain: bool,
    payload: T,
}

/// Writes retained state and availability messages as JSON lines.
pub struct JsonPublisher<W> {
    out: W,
    vendor: String,
    base_topic: String,
}

impl JsonPublisher<std::io::Stdout> {
    pub fn stdout(vendor: &str, base_topic: &str) -> Self {
        Self::new(std::io::stdout(), vendor, base_topic)
    }
}

impl<W: Write + Send> JsonPublisher<W> {
    pub fn new(out: W, vendor: &str, base_topic: &str) -> Self {
        Self {
            out,
            vendor: vendor.to_string(),
            base_topic: base_topic.to_string(),
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    pub fn get_ref(&self) -> &W {
        &self.out
    }

    /// `{vendor}_{name}`, falling back to the compact address when the BMS gave no name.
    pub fn device_name(&self, address: &DeviceAddress, record: &TelemetryRecord) -> String {
        match &record.name {
            Some(name) => format!("{}_{}", self.vendor, name),
            None => format!("{}_{}", self.vendor, address.compact()),
        }
    }

    pub fn availability_topic(&self) -> String {
        format!("{}/status", self.base_topic)
    }

    fn write<T: Serialize>(&mut self, topic: &str, payload: T) -> Result<(), PublishError> {
        let message = Message {
            topic,
            retain: true,
            payload,
        };
        serde_json::to_writer(&mut self.out, &message)?;
        self.out.write_all(b"\n")?;
        self.out.flush()?;
        Ok(())
    }
}

impl<W: Write + Send> Publisher for JsonPublisher<W> {
    fn publish(&mut self, address: &DeviceAddress, record: &TelemetryRecord) -> Result<(), PublishError> {
        let topic = format!(
            "{}/{}/state",
            self.base_topic,
            self.device_name(address, record)
        );
        self.write(&topic, StateDocument(record))
    }

    fn set_availability(&mut self, online: bool) -> Result<(), PublishError> {
        let topic = self.availability_topic();
        self.write(&topic, if online { "online" } else { "offline" })
    }
}
