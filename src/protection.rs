//! Classification of the protection flag word reported in the status frame.
//!
//! The flag word is read most-significant bit first: position 0 is `0x8000`, position 15 is
//! `0x0001`. Positions 0 to 12 carry fault flags, 13 to 15 are reserved. When several faults
//! are active only the lowest position is reported.

use std::fmt;

/// The single dominant protection state of the pack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtectionState {
    Ok,
    CellBlockOverVolt,
    CellBlockUnderVolt,
    BatteryOverVolt,
    BatteryUnderVolt,
    ChargingOverTemp,
    ChargingLowTemp,
    DischargingOverTemp,
    DischargingLowTemp,
    ChargingOverCurrent,
    DischargingOverCurrent,
    ShortCircuit,
    ForeEndICError,
    MOSSoftwareLockIn,
}

/// Fault labels indexed by bit position, MSB first.
const FAULTS: [ProtectionState; 13] = [
    ProtectionState::CellBlockOverVolt,
    ProtectionState::CellBlockUnderVolt,
    ProtectionState::BatteryOverVolt,
    ProtectionState::BatteryUnderVolt,
    ProtectionState::ChargingOverTemp,
    ProtectionState::ChargingLowTemp,
    ProtectionState::DischargingOverTemp,
    ProtectionState::DischargingLowTemp,
    ProtectionState::ChargingOverCurrent,
    ProtectionState::DischargingOverCurrent,
    ProtectionState::ShortCircuit,
    ProtectionState::ForeEndICError,
    ProtectionState::MOSSoftwareLockIn,
];

impl ProtectionState {
    /// Map a raw flag word to the first active fault, or [`ProtectionState::Ok`].
    pub fn classify(flags: u16) -> Self {
        FAULTS
            .iter()
            .enumerate()
            .find(|(position, _)| flags & (0x8000u16 >> position) != 0)
            .map(|(_, &state)| state)
            .unwrap_or(ProtectionState::Ok)
    }

    pub fn is_ok(self) -> bool {
        self == ProtectionState::Ok
    }

    pub fn label(self) -> &'static str {
        match self {
            ProtectionState::Ok => "ok",
            ProtectionState::CellBlockOverVolt => "CellBlockOverVolt",
            ProtectionState::CellBlockUnderVolt => "CellBlockUnderVolt",
            ProtectionState::BatteryOverVolt => "BatteryOverVolt",
            ProtectionState::BatteryUnderVolt => "BatteryUnderVolt",
            ProtectionState::ChargingOverTemp => "ChargingOverTemp",
            ProtectionState::ChargingLowTemp => "ChargingLowTemp",
            ProtectionState::DischargingOverTemp => "DischargingOverTemp",
            ProtectionState::DischargingLowTemp => "DischargingLowTemp",
            ProtectionState::ChargingOverCurrent => "ChargingOverCurrent",
            ProtectionState::DischargingOverCurrent => "DischargingOverCurrent",
            ProtectionState::ShortCircuit => "ShortCircuit",
            ProtectionState::ForeEndICError => "ForeEndICError",
            ProtectionState::MOSSoftwareLockIn => "MOSSoftwareLockIn",
        }
    }
}

impl fmt::Display for ProtectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[test]
fn test_classify_no_flags() {
    assert_eq!(ProtectionState::classify(0), ProtectionState::Ok);
}

#[test]
fn test_classify_first_match_wins() {
    // positions 0 and 1
    assert_eq!(
        ProtectionState::classify(0b1100_0000_0000_0000),
        ProtectionState::CellBlockOverVolt
    );
    // positions 3 and 10
    assert_eq!(
        ProtectionState::classify(0b0001_0000_0010_0000),
        ProtectionState::BatteryUnderVolt
    );
}

#[test]
fn test_classify_every_position() {
    for (position, expected) in FAULTS.iter().enumerate() {
        let flags = 0x8000u16 >> position;
        assert_eq!(ProtectionState::classify(flags), *expected, "position {position}");
    }
}

#[test]
fn test_classify_ignores_reserved_bits() {
    assert_eq!(ProtectionState::classify(0b0000_0000_0000_0111), ProtectionState::Ok);
    assert_eq!(ProtectionState::classify(0x0003), ProtectionState::Ok);
    assert_eq!(
        ProtectionState::classify(0b0000_0000_0000_1111),
        ProtectionState::MOSSoftwareLockIn
    );
}

#[test]
fn test_labels() {
    assert_eq!(ProtectionState::Ok.to_string(), "ok");
    assert_eq!(ProtectionState::ShortCircuit.to_string(), "ShortCircuit");
    assert!(ProtectionState::Ok.is_ok());
    assert!(!ProtectionState::ForeEndICError.is_ok());
}
