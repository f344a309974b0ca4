use crate::error::FrameError;

use super::{inner_payload, validate, Command, ExchangeSpec};

/// A verbatim message to send which requests the name of the BMS
pub(crate) const REQUEST: [u8; 7] = [0xDD, 0xA5, 0x05, 0x00, 0xFF, 0xFB, 0x77];

/// Decode a name reply. The name is plain 7-bit ASCII.
pub fn decode(buffer: &[u8]) -> Result<String, FrameError> {
    validate(buffer, ExchangeSpec::for_command(Command::Name))?;

    let payload = inner_payload(buffer)?;
    if !payload.is_ascii() {
        return Err(FrameError::NotAscii);
    }

    Ok(payload.iter().map(|&b| b as char).collect())
}

#[test]
fn test_decode_name_happy() {
    let mut message = hex::decode("dd05000a").unwrap();
    message.extend_from_slice(b"LT-12V100A");
    message.extend_from_slice(&[0xfc, 0x1e, 0x77]);
    assert_eq!(decode(&message), Ok("LT-12V100A".to_string()));
}

#[test]
fn test_decode_name_not_ascii() {
    let message = hex::decode("dd05000341c342fc1e77").unwrap();
    assert_eq!(decode(&message), Err(FrameError::NotAscii));
}

#[test]
fn test_decode_name_empty_buffer() {
    assert!(matches!(decode(&[]), Err(FrameError::Header { .. })));
}
