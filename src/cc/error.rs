//! Binary codec error types.

use thiserror::Error;

/// Errors from command-class payload encoding and decoding.
///
/// A `PayloadError` on the receive path means the frame is dropped and the
/// failure is surfaced in logs only; it never drives a retry.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("unknown command class: 0x{0:02x}")]
    UnknownCommandClass(u8),

    #[error("unknown command 0x{command:02x} for command class 0x{cc_id:02x}")]
    UnknownCommand { cc_id: u8, command: u8 },

    #[error("payload too short: expected at least {expected}, got {got}")]
    PayloadTooShort { expected: usize, got: usize },

    #[error("invalid value 0x{value:02x} for field {field}")]
    InvalidField { field: &'static str, value: u8 },

    #[error("extension length {0} is out of range")]
    InvalidExtensionLength(u8),

    #[error("unknown critical extension type 0x{0:02x}")]
    UnknownCriticalExtension(u8),

    #[error("malformed payload: {0}")]
    Malformed(String),
}
