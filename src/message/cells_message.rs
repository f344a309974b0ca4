use crate::error::FrameError;

use super::{inner_payload, validate, Command, ExchangeSpec};

/// A verbatim message to send which requests the voltage of each cell
pub(crate) const REQUEST: [u8; 7] = [0xDD, 0xA5, 0x04, 0x00, 0xFF, 0xFC, 0x77];

/// Decode a per-cell voltage reply into cell voltages in V, in physical cell order.
///
/// The payload is a sequence of big-endian millivolt readings. A trailing odd byte is ignored.
pub fn decode(buffer: &[u8]) -> Result<Vec<f64>, FrameError> {
    validate(buffer, ExchangeSpec::for_command(Command::Cells))?;

    let voltages = inner_payload(buffer)?
        .chunks_exact(2)
        .map(|bytes| u16::from_be_bytes([bytes[0], bytes[1]]) as f64 / 1000.0)
        .collect();

    Ok(voltages)
}

#[test]
fn test_decode_cells_happy() {
    let message = hex::decode("dd0400080ce50ce30ce50ce8fc3377").unwrap();
    assert_eq!(decode(&message), Ok(vec![3.301, 3.299, 3.301, 3.304]));
}

#[test]
fn test_decode_cells_odd_byte() {
    let message = hex::decode("dd0400090ce50ce30ce50ce801fc3377").unwrap();
    assert_eq!(decode(&message).unwrap().len(), 4);
}

#[test]
fn test_decode_cells_no_cells() {
    let message = hex::decode("dd040000ff0077").unwrap();
    assert_eq!(decode(&message), Ok(vec![]));
}

#[test]
fn test_decode_cells_too_short() {
    let message = hex::decode("dd040077").unwrap();
    assert_eq!(
        decode(&message),
        Err(FrameError::Truncated { needed: 7, len: 4 })
    );
}

#[test]
fn test_decode_cells_wrong_kind() {
    let message = hex::decode("dd0500080ce50ce30ce50ce8fc3377").unwrap();
    assert!(matches!(decode(&message), Err(FrameError::Header { .. })));
}
