//! Frame decoding against synthetic frames.

use bmsread::message::status_message::StatusMessage;
use bmsread::message::{cells_message, name_message, Command, RawExchange};
use bmsread::{FrameError, ProtectionState};
use proptest::prelude::*;

#[derive(Debug, Clone, Copy)]
struct Status {
    voltage: i16,
    current: i16,
    remaining: i16,
    nominal: i16,
    cycles: u16,
    flags: u16,
    soc: u8,
    temp1: i16,
    temp2: i16,
}

/// A status reply as the BMS sends it, checksum included.
fn status_frame(s: &Status) -> Vec<u8> {
    let mut payload = vec![0u8; 27];
    payload[0..2].copy_from_slice(&s.voltage.to_be_bytes());
    payload[2..4].copy_from_slice(&s.current.to_be_bytes());
    payload[4..6].copy_from_slice(&s.remaining.to_be_bytes());
    payload[6..8].copy_from_slice(&s.nominal.to_be_bytes());
    payload[8..10].copy_from_slice(&s.cycles.to_be_bytes());
    payload[16..18].copy_from_slice(&s.flags.to_be_bytes());
    payload[19] = s.soc;
    payload[23..25].copy_from_slice(&s.temp1.to_be_bytes());
    payload[25..27].copy_from_slice(&s.temp2.to_be_bytes());
    frame(0x03, &payload)
}

fn frame(command: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![0xdd, command, 0x00, payload.len() as u8];
    frame.extend_from_slice(payload);
    let sum = frame[2..].iter().fold(0u16, |acc, &b| acc.wrapping_add(b as u16));
    frame.extend_from_slice(&(0u16.wrapping_sub(sum)).to_be_bytes());
    frame.push(0x77);
    frame
}

fn status_strategy() -> impl Strategy<Value = Status> {
    (
        (any::<i16>(), any::<i16>(), any::<i16>(), any::<i16>()),
        (any::<u16>(), any::<u16>(), any::<u8>()),
        (any::<i16>(), any::<i16>()),
    )
        .prop_map(
            |((voltage, current, remaining, nominal), (cycles, flags, soc), (temp1, temp2))| Status {
                voltage,
                current,
                remaining,
                nominal,
                cycles,
                flags,
                soc,
                temp1,
                temp2,
            },
        )
}

#[test]
fn test_documented_status_reply() {
    let reply = hex::decode("dd03001b052800001bb22aef0002290a00000000000025410304020b740b6bfc3977")
        .unwrap();
    let status = StatusMessage::decode(&reply).unwrap();
    assert_eq!(status.main_voltage, 13.20);
    assert_eq!(status.state_of_charge, reply[4 + 19]);
}

#[test]
fn test_synthetic_frame_decodes_like_device_reply() {
    let status = StatusMessage::decode(
        &hex::decode("dd03001b052800001bb22aef0002290a00000000000025410304020b740b6bfc3977")
            .unwrap(),
    )
    .unwrap();
    let rebuilt = status_frame(&Status {
        voltage: 1320,
        current: 0,
        remaining: 7090,
        nominal: 10991,
        cycles: 2,
        flags: 0,
        soc: 0x41,
        temp1: 2932,
        temp2: 2923,
    });
    assert_eq!(StatusMessage::decode(&rebuilt).unwrap(), status);
}

#[test]
fn test_rejecting_one_frame_does_not_affect_others() {
    let exchanges = [
        RawExchange::new(Command::Status, Vec::new()),
        RawExchange::new(Command::Cells, frame(0x04, &[0x0c, 0xe5, 0x0c, 0xe3])),
        RawExchange::new(Command::Name, frame(0x05, b"BMS")),
    ];
    let decoded: Vec<_> = exchanges.iter().map(RawExchange::decode).collect();
    assert!(matches!(decoded[0], Err(FrameError::Header { .. })));
    assert!(decoded[1].is_ok());
    assert!(decoded[2].is_ok());
}

proptest! {
    #[test]
    fn prop_status_round_trip(s in status_strategy()) {
        let decoded = StatusMessage::decode(&status_frame(&s)).unwrap();

        prop_assert_eq!((decoded.main_voltage * 100.0).round() as i16, s.voltage);
        prop_assert_eq!((decoded.main_current * 100.0).round() as i16, s.current);
        prop_assert_eq!((decoded.remaining_capacity_ah * 100.0).round() as i16, s.remaining);
        prop_assert_eq!((decoded.nominal_capacity_ah * 100.0).round() as i16, s.nominal);
        prop_assert_eq!(decoded.cycle_count, s.cycles);
        prop_assert_eq!(decoded.protection_flags, s.flags);
        prop_assert_eq!(decoded.protection_state, ProtectionState::classify(s.flags));
        prop_assert_eq!(decoded.state_of_charge, s.soc);
        prop_assert_eq!((decoded.temperature1 * 10.0).round() as i32 + 2731, s.temp1 as i32);
        prop_assert_eq!((decoded.temperature2 * 10.0).round() as i32 + 2731, s.temp2 as i32);
    }

    #[test]
    fn prop_cell_count_and_order(cells in proptest::collection::vec(any::<u16>(), 0..32)) {
        let payload: Vec<u8> = cells.iter().flat_map(|c| c.to_be_bytes()).collect();
        let decoded = cells_message::decode(&frame(0x04, &payload)).unwrap();

        prop_assert_eq!(decoded.len(), cells.len());
        for (voltage, millivolts) in decoded.iter().zip(&cells) {
            prop_assert_eq!((voltage * 1000.0).round() as u16, *millivolts);
        }
    }

    #[test]
    fn prop_ascii_names_decode(name in "[ -~]{0,24}") {
        let decoded = name_message::decode(&frame(0x05, name.as_bytes())).unwrap();
        prop_assert_eq!(decoded, name);
    }

    #[test]
    fn prop_arbitrary_bytes_never_panic(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
        for command in [Command::Status, Command::Cells, Command::Name] {
            let _ = RawExchange::new(command, bytes.clone()).decode();
        }
    }

    #[test]
    fn prop_wrong_header_is_rejected(mut bytes in proptest::collection::vec(any::<u8>(), 2..64)) {
        if bytes[0] == 0xdd {
            bytes[0] = 0x00;
        }
        for command in [Command::Status, Command::Cells, Command::Name] {
            let result = RawExchange::new(command, bytes.clone()).decode();
            let is_header_error = matches!(result, Err(FrameError::Header { .. }));
            prop_assert!(is_header_error);
        }
    }

    #[test]
    fn prop_wrong_terminator_is_rejected(s in status_strategy(), last in any::<u8>()) {
        prop_assume!(last != 0x77);
        let mut reply = status_frame(&s);
        *reply.last_mut().unwrap() = last;
        prop_assert_eq!(StatusMessage::decode(&reply), Err(FrameError::Terminator));
    }
}
