//! The three request/response exchanges spoken by the BMS and their frame decoders.
//!
//! Every reply frame has the layout
//!
//! Start Byte | End Byte | Meaning
//! 0          | 1        | A constant header, `0xDD` followed by the command code
//! 2          | 3        | Status byte and payload length (not validated)
//! 4          | x        | The payload
//! x+1        | x+2      | A checksum (not validated)
//! x+3        | x+3      | The terminator `0x77`
//!
//! Only the header and terminator are checked before fields are read. The status reply does
//! not strip its trailing checksum and terminator, its fields live at fixed offsets from the
//! start of the payload.

pub mod cells_message;
pub mod name_message;
pub mod status_message;

use crate::error::FrameError;

pub use status_message::StatusMessage;

/// Last byte of every reply frame.
pub const TERMINATOR: u8 = 0x77;

/// Bytes before the payload of a reply frame.
pub(crate) const HEADER_LEN: usize = 4;

/// Checksum and terminator bytes after the payload of a reply frame.
pub(crate) const TRAILER_LEN: usize = 3;

/// The commands issued once per polling cycle, in the order they are issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Status,
    Cells,
    Name,
}

impl Command {
    pub fn label(self) -> &'static str {
        match self {
            Command::Status => "status",
            Command::Cells => "cells",
            Command::Name => "name",
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// A fixed request/response contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExchangeSpec {
    pub command: Command,
    /// Written verbatim to the write characteristic.
    pub request: [u8; 7],
    /// Expected first two bytes of the reply.
    pub header: [u8; 2],
    /// Expected last byte of the reply.
    pub terminator: u8,
    /// Number of notification events the reply is spread over.
    pub notifications: usize,
}

/// The exchanges of one polling cycle, in order.
pub static EXCHANGES: [ExchangeSpec; 3] = [
    ExchangeSpec {
        command: Command::Status,
        request: status_message::REQUEST,
        header: [0xDD, 0x03],
        terminator: TERMINATOR,
        notifications: 2,
    },
    ExchangeSpec {
        command: Command::Cells,
        request: cells_message::REQUEST,
        header: [0xDD, 0x04],
        terminator: TERMINATOR,
        notifications: 1,
    },
    ExchangeSpec {
        command: Command::Name,
        request: name_message::REQUEST,
        header: [0xDD, 0x05],
        terminator: TERMINATOR,
        notifications: 1,
    },
];

impl ExchangeSpec {
    pub fn for_command(command: Command) -> &'static ExchangeSpec {
        match command {
            Command::Status => &EXCHANGES[0],
            Command::Cells => &EXCHANGES[1],
            Command::Name => &EXCHANGES[2],
        }
    }
}

/// The bytes received for one command. Empty when every attempt timed out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawExchange {
    pub command: Command,
    pub bytes: Vec<u8>,
}

/// A successfully decoded reply.
#[derive(Debug, Clone, PartialEq)]
pub enum SubFrame {
    Status(StatusMessage),
    Cells(Vec<f64>),
    Name(String),
}

impl RawExchange {
    pub fn new(command: Command, bytes: Vec<u8>) -> Self {
        Self { command, bytes }
    }

    /// Validate and decode the buffer according to the command that produced it.
    pub fn decode(&self) -> Result<SubFrame, FrameError> {
        match self.command {
            Command::Status => StatusMessage::decode(&self.bytes).map(SubFrame::Status),
            Command::Cells => cells_message::decode(&self.bytes).map(SubFrame::Cells),
            Command::Name => name_message::decode(&self.bytes).map(SubFrame::Name),
        }
    }
}

/// Check the header and terminator of `buffer` against `spec`.
pub(crate) fn validate(buffer: &[u8], spec: &ExchangeSpec) -> Result<(), FrameError> {
    if buffer.get(..2) != Some(&spec.header[..]) {
        return Err(FrameError::Header {
            expected: hex::encode(spec.header),
            found: hex::encode(&buffer[..buffer.len().min(2)]),
        });
    }

    if buffer.last() != Some(&spec.terminator) {
        return Err(FrameError::Terminator);
    }

    Ok(())
}

/// The payload of a validated frame with header and trailer removed.
pub(crate) fn inner_payload(buffer: &[u8]) -> Result<&[u8], FrameError> {
    let needed = HEADER_LEN + TRAILER_LEN;
    if buffer.len() < needed {
        return Err(FrameError::Truncated {
            needed,
            len: buffer.len(),
        });
    }

    Ok(&buffer[HEADER_LEN..buffer.len() - TRAILER_LEN])
}

#[test]
fn test_exchange_order() {
    let commands: Vec<Command> = EXCHANGES.iter().map(|e| e.command).collect();
    assert_eq!(commands, vec![Command::Status, Command::Cells, Command::Name]);
}

#[test]
fn test_requests() {
    assert_eq!(hex::encode(EXCHANGES[0].request), "dda50300fffd77");
    assert_eq!(hex::encode(EXCHANGES[1].request), "dda50400fffc77");
    assert_eq!(hex::encode(EXCHANGES[2].request), "dda50500fffb77");
}

#[test]
fn test_validate_header() {
    let spec = ExchangeSpec::for_command(Command::Cells);
    let result = validate(&hex::decode("dd030077").unwrap(), spec);
    assert_eq!(
        result,
        Err(FrameError::Header {
            expected: "dd04".into(),
            found: "dd03".into()
        })
    );
}

#[test]
fn test_validate_empty() {
    let spec = ExchangeSpec::for_command(Command::Status);
    assert!(matches!(validate(&[], spec), Err(FrameError::Header { .. })));
}

#[test]
fn test_validate_terminator() {
    let spec = ExchangeSpec::for_command(Command::Name);
    let result = validate(&hex::decode("dd0500000000").unwrap(), spec);
    assert_eq!(result, Err(FrameError::Terminator));
}

#[test]
fn test_decode_dispatches_on_command() {
    let cells = hex::decode("dd0400080ce50ce30ce50ce8fc3377").unwrap();
    let as_cells = RawExchange::new(Command::Cells, cells.clone()).decode();
    assert!(matches!(as_cells, Ok(SubFrame::Cells(ref v)) if v.len() == 4));

    let as_name = RawExchange::new(Command::Name, cells).decode();
    assert!(matches!(as_name, Err(FrameError::Header { .. })));
}
