//! Command-class substrate.
//!
//! A command class (CC) is a unit of protocol functionality with its own
//! numeric identifier and command set. On the wire, every CC frame is
//! `[cc_id, command, payload...]`. This module carries the raw frame type
//! the S2 layer encapsulates, the identifiers the crate speaks, bitmask
//! and CC-list codecs, and the startup-built command registry.

mod bitmask;
mod error;
mod registry;
pub mod schedule_entry_lock;

pub use bitmask::{encode_bit_mask, encode_cc_list, parse_bit_mask, parse_cc_list, CcList};
pub use error::PayloadError;
pub use registry::{CommandRegistry, KnownCommand};

use crate::types::{HomeId, NodeId, SecurityClass};
use std::fmt;

// ============================================================================
// Command Class Identifiers
// ============================================================================

/// Command-class identifiers this crate speaks or references.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CommandClasses {
    /// Binary Switch (referenced in securely-supported CC lists).
    BinarySwitch = 0x25,
    /// Schedule Entry Lock.
    ScheduleEntryLock = 0x4E,
    /// Battery (referenced in securely-supported CC lists).
    Battery = 0x80,
    /// Security 0 (legacy; recognized, never implemented here).
    Security = 0x98,
    /// Security 2.
    Security2 = 0x9F,
    /// Sentinel terminating the "supported" half of a CC list.
    Mark = 0xEF,
}

impl CommandClasses {
    /// Convert to a byte.
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// Try to convert from a byte.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x25 => Some(CommandClasses::BinarySwitch),
            0x4E => Some(CommandClasses::ScheduleEntryLock),
            0x80 => Some(CommandClasses::Battery),
            0x98 => Some(CommandClasses::Security),
            0x9F => Some(CommandClasses::Security2),
            0xEF => Some(CommandClasses::Mark),
            _ => None,
        }
    }
}

impl fmt::Display for CommandClasses {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommandClasses::BinarySwitch => "BinarySwitch",
            CommandClasses::ScheduleEntryLock => "ScheduleEntryLock",
            CommandClasses::Battery => "Battery",
            CommandClasses::Security => "Security",
            CommandClasses::Security2 => "Security2",
            CommandClasses::Mark => "Mark",
        };
        write!(f, "{}", name)
    }
}

// ============================================================================
// Raw Command Frames
// ============================================================================

/// A raw command-class frame: the unit the S2 layer encapsulates.
///
/// Wire format: `[cc_id, command, payload...]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandRaw {
    /// Command class identifier.
    pub cc_id: u8,
    /// Command identifier within the class.
    pub command: u8,
    /// Command payload.
    pub payload: Vec<u8>,
}

impl CommandRaw {
    /// Create a raw command frame from its fields.
    pub fn new(cc_id: u8, command: u8, payload: Vec<u8>) -> Self {
        Self {
            cc_id,
            command,
            payload,
        }
    }

    /// Serialize to wire bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(2 + self.payload.len());
        bytes.push(self.cc_id);
        bytes.push(self.command);
        bytes.extend_from_slice(&self.payload);
        bytes
    }

    /// Parse from wire bytes.
    pub fn parse(bytes: &[u8]) -> Result<Self, PayloadError> {
        if bytes.len() < 2 {
            return Err(PayloadError::PayloadTooShort {
                expected: 2,
                got: bytes.len(),
            });
        }
        Ok(Self {
            cc_id: bytes[0],
            command: bytes[1],
            payload: bytes[2..].to_vec(),
        })
    }

    /// Total serialized length (header + payload).
    pub fn wire_len(&self) -> usize {
        2 + self.payload.len()
    }
}

impl fmt::Display for CommandRaw {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cc:0x{:02x} cmd:0x{:02x} ({} bytes)",
            self.cc_id,
            self.command,
            self.payload.len()
        )
    }
}

// ============================================================================
// Parsing Context
// ============================================================================

/// Frame addressing kind, as reported by the transport below the CC layer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FrameKind {
    /// Addressed to this node only.
    #[default]
    Singlecast,
    /// Addressed to a multicast group.
    Multicast,
    /// Network-wide broadcast.
    Broadcast,
}

/// Context an inner command is decoded against.
///
/// Borrowed for the duration of the envelope parse, so a decoded inner
/// command can see its envelope's addressing metadata without the envelope
/// and the inner command owning each other.
#[derive(Clone, Copy, Debug)]
pub struct ParsingContext {
    /// Node the frame came from.
    pub sending_node_id: NodeId,
    /// Our own node ID.
    pub own_node_id: NodeId,
    /// Network identifier.
    pub home_id: HomeId,
    /// Security class the envelope was decrypted with, if any.
    pub security_class: Option<SecurityClass>,
    /// Addressing of the outermost frame.
    pub frame_kind: FrameKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_raw_roundtrip() {
        let cmd = CommandRaw::new(0x9F, 0x01, vec![0x10]);
        let bytes = cmd.to_bytes();
        assert_eq!(bytes, vec![0x9F, 0x01, 0x10]);
        assert_eq!(CommandRaw::parse(&bytes).unwrap(), cmd);
    }

    #[test]
    fn test_command_raw_empty_payload() {
        let cmd = CommandRaw::new(0x9F, 0x04, vec![]);
        assert_eq!(cmd.wire_len(), 2);
        assert_eq!(CommandRaw::parse(&cmd.to_bytes()).unwrap(), cmd);
    }

    #[test]
    fn test_command_raw_too_short() {
        assert!(matches!(
            CommandRaw::parse(&[0x9F]),
            Err(PayloadError::PayloadTooShort { expected: 2, got: 1 })
        ));
    }

    #[test]
    fn test_command_classes_roundtrip() {
        for cc in [
            CommandClasses::BinarySwitch,
            CommandClasses::ScheduleEntryLock,
            CommandClasses::Battery,
            CommandClasses::Security,
            CommandClasses::Security2,
            CommandClasses::Mark,
        ] {
            assert_eq!(CommandClasses::from_byte(cc.to_byte()), Some(cc));
        }
        assert_eq!(CommandClasses::from_byte(0x00), None);
    }
}
