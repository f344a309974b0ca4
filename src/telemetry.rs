use crate::message::{StatusMessage, SubFrame};
use crate::protection::ProtectionState;

/// The telemetry decoded from one polling cycle of one BMS.
///
/// Each reply is validated independently, so the record holds each of them either completely
/// or not at all.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TelemetryRecord {
    /// Basic pack status, if the status reply was decoded
    pub status: Option<StatusMessage>,
    /// The voltage of each cell in V, in physical cell order
    pub cell_voltages: Option<Vec<f64>>,
    /// The name the BMS reports for itself
    pub name: Option<String>,
}

impl TelemetryRecord {
    /// True when none of the three replies could be decoded.
    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.cell_voltages.is_none() && self.name.is_none()
    }

    pub(crate) fn apply(&mut self, frame: SubFrame) {
        match frame {
            SubFrame::Status(status) => self.status = Some(status),
            SubFrame::Cells(voltages) => self.cell_voltages = Some(voltages),
            SubFrame::Name(name) => self.name = Some(name),
        }
    }

    pub fn main_voltage(&self) -> Option<f64> {
        self.status.as_ref().map(|s| s.main_voltage)
    }

    pub fn main_current(&self) -> Option<f64> {
        self.status.as_ref().map(|s| s.main_current)
    }

    pub fn state_of_charge(&self) -> Option<u8> {
        self.status.as_ref().map(|s| s.state_of_charge)
    }

    pub fn protection_state(&self) -> Option<ProtectionState> {
        self.status.as_ref().map(|s| s.protection_state)
    }

    /// Cell voltages paired with their 1-based cell index.
    pub fn cells(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.cell_voltages
            .iter()
            .flatten()
            .enumerate()
            .map(|(i, &v)| (i + 1, v))
    }
}

#[test]
fn test_empty_record() {
    let record = TelemetryRecord::default();
    assert!(record.is_empty());
    assert_eq!(record.main_voltage(), None);
    assert_eq!(record.cells().count(), 0);
}

#[test]
fn test_apply_sub_frames() {
    let mut record = TelemetryRecord::default();
    record.apply(SubFrame::Cells(vec![3.301, 3.299]));
    assert!(!record.is_empty());
    assert_eq!(record.status, None);

    record.apply(SubFrame::Name("LT-12V100A".into()));
    let cells: Vec<(usize, f64)> = record.cells().collect();
    assert_eq!(cells, vec![(1, 3.301), (2, 3.299)]);
    assert_eq!(record.name.as_deref(), Some("LT-12V100A"));
}
