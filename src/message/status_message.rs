use crate::error::FrameError;
use crate::protection::ProtectionState;

use super::{validate, Command, ExchangeSpec, HEADER_LEN};

/// A verbatim message to send which requests the basic pack status
pub(crate) const REQUEST: [u8; 7] = [0xDD, 0xA5, 0x03, 0x00, 0xFF, 0xFD, 0x77];

/// Offset 0 of the decikelvin scale in the temperature fields.
const KELVIN_OFFSET_DK: i32 = 2731;

/// Bytes of payload needed to reach the last field (temperature 2 at 25..27).
const PAYLOAD_LEN: usize = 27;

/// Basic pack status: voltage, current, capacity, protection state and temperatures.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusMessage {
    /// Total pack voltage in V
    pub main_voltage: f64,
    /// Pack current in A, sign as reported by the BMS
    pub main_current: f64,
    /// Remaining capacity in Ah
    pub remaining_capacity_ah: f64,
    /// Nominal capacity in Ah
    pub nominal_capacity_ah: f64,
    /// Lifetime number of battery cycles (count)
    pub cycle_count: u16,
    /// Raw protection flag word
    pub protection_flags: u16,
    pub protection_state: ProtectionState,
    /// Relative state of charge in %
    pub state_of_charge: u8,
    /// First NTC probe in °C
    pub temperature1: f64,
    /// Second NTC probe in °C
    pub temperature2: f64,
}

impl StatusMessage {
    /// Decode a complete status reply, header and terminator included.
    ///
    /// Payload layout, offsets relative to the end of the 4 byte header:
    ///
    /// Offset | Size | Field
    /// 0      | 2    | Voltage, signed, V/100
    /// 2      | 2    | Current, signed, A/100
    /// 4      | 2    | Remaining capacity, signed, Ah/100
    /// 6      | 2    | Nominal capacity, signed, Ah/100
    /// 8      | 2    | Cycles
    /// 16     | 2    | Protection flags
    /// 19     | 1    | State of charge, %
    /// 23     | 2    | Temperature 1, signed, decikelvin
    /// 25     | 2    | Temperature 2, signed, decikelvin
    pub fn decode(buffer: &[u8]) -> Result<Self, FrameError> {
        validate(buffer, ExchangeSpec::for_command(Command::Status))?;

        let payload = buffer.get(HEADER_LEN..).unwrap_or_default();
        if payload.len() < PAYLOAD_LEN {
            return Err(FrameError::Truncated {
                needed: HEADER_LEN + PAYLOAD_LEN,
                len: buffer.len(),
            });
        }

        let protection_flags = be_u16(payload, 16);

        Ok(Self {
            main_voltage: centi(be_i16(payload, 0)),
            main_current: centi(be_i16(payload, 2)),
            remaining_capacity_ah: centi(be_i16(payload, 4)),
            nominal_capacity_ah: centi(be_i16(payload, 6)),
            cycle_count: be_u16(payload, 8),
            protection_flags,
            protection_state: ProtectionState::classify(protection_flags),
            state_of_charge: payload[19],
            temperature1: celsius(be_i16(payload, 23)),
            temperature2: celsius(be_i16(payload, 25)),
        })
    }
}

fn be_i16(payload: &[u8], at: usize) -> i16 {
    i16::from_be_bytes([payload[at], payload[at + 1]])
}

fn be_u16(payload: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([payload[at], payload[at + 1]])
}

fn centi(raw: i16) -> f64 {
    raw as f64 / 100.0
}

fn celsius(decikelvin: i16) -> f64 {
    (decikelvin as i32 - KELVIN_OFFSET_DK) as f64 / 10.0
}

#[test]
fn test_decode_status_happy() {
    let message =
        hex::decode("dd03001b052800001bb22aef0002290a00000000000025410304020b740b6bfc3977")
            .unwrap();
    let status = StatusMessage::decode(&message).unwrap();
    assert_eq!(status.main_voltage, 13.2);
    assert_eq!(status.main_current, 0.0);
    assert_eq!(status.remaining_capacity_ah, 70.9);
    assert_eq!(status.nominal_capacity_ah, 109.91);
    assert_eq!(status.cycle_count, 2);
    assert_eq!(status.protection_flags, 0);
    assert_eq!(status.protection_state, ProtectionState::Ok);
    assert_eq!(status.state_of_charge, 0x41);
    assert_eq!(status.temperature1, 20.1);
    assert_eq!(status.temperature2, 19.2);
}

#[test]
fn test_decode_status_negative_current() {
    // -12.34 A discharging, 0.0 °C and -10.0 °C
    let message =
        hex::decode("dd03001b0528fb2e1bb22aef0002290a00000000000025410304020aab0a47fc3977")
            .unwrap();
    let status = StatusMessage::decode(&message).unwrap();
    assert_eq!(status.main_current, -12.34);
    assert_eq!(status.temperature1, 0.0);
    assert_eq!(status.temperature2, -10.0);
}

#[test]
fn test_decode_status_protection() {
    let message =
        hex::decode("dd03001b052800001bb22aef0002290a00000000001025410304020b740b6bfc3977")
            .unwrap();
    let status = StatusMessage::decode(&message).unwrap();
    assert_eq!(status.protection_flags, 0x0010);
    assert_eq!(status.protection_state, ProtectionState::ForeEndICError);
}

#[test]
fn test_decode_status_truncated() {
    // Second notification never arrived
    let message = hex::decode("dd03001b052800001bb22aef0002290a0000000077").unwrap();
    assert_eq!(
        StatusMessage::decode(&message),
        Err(FrameError::Truncated {
            needed: 31,
            len: 21
        })
    );
}

#[test]
fn test_decode_status_bad_terminator() {
    let message =
        hex::decode("dd03001b052800001bb22aef0002290a00000000000025410304020b740b6bfc39").unwrap();
    assert_eq!(StatusMessage::decode(&message), Err(FrameError::Terminator));
}
