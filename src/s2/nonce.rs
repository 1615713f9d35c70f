//! Nonce dialog: NonceGet and NonceReport.
//!
//! When either side lacks usable SPAN state it asks the peer for a fresh
//! entropy input. A NonceGet is answered with a NonceReport carrying
//! `SOS` (sender offering SPAN) and a 16-byte receiver EI; `MOS` signals
//! multicast desync (serialized here, never acted on — multicast is out
//! of scope).

use crate::cc::{CommandClasses, CommandRaw, PayloadError};
use crate::s2::manager::SecurityManager2;
use crate::s2::Security2Command;
use crate::types::NodeId;
use tracing::debug;

/// NonceReport flag bit: sender offering SPAN (receiver EI follows).
const FLAG_SOS: u8 = 0x01;

/// NonceReport flag bit: multicast out of sync.
const FLAG_MOS: u8 = 0x02;

// ============================================================================
// NonceGet
// ============================================================================

/// Request for a fresh receiver entropy input.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NonceGet {
    /// Sequence number of this request.
    pub sequence_number: u8,
}

impl NonceGet {
    /// Build a NonceGet, allocating the peer's next sequence number.
    pub fn new(sm: &mut SecurityManager2, peer: NodeId) -> Self {
        Self {
            sequence_number: sm.next_sequence_number(peer),
        }
    }

    /// Parse from a command payload.
    pub fn parse(payload: &[u8]) -> Result<Self, PayloadError> {
        if payload.is_empty() {
            return Err(PayloadError::PayloadTooShort {
                expected: 1,
                got: 0,
            });
        }
        Ok(Self {
            sequence_number: payload[0],
        })
    }

    /// Serialize to a raw command frame.
    pub fn to_raw(&self) -> CommandRaw {
        CommandRaw::new(
            CommandClasses::Security2.to_byte(),
            Security2Command::NonceGet.to_byte(),
            vec![self.sequence_number],
        )
    }
}

// ============================================================================
// NonceReport
// ============================================================================

/// Offer of a fresh receiver entropy input (and/or multicast desync
/// signal). At least one of SOS/MOS must be set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NonceReport {
    /// Sequence number of this report.
    pub sequence_number: u8,
    /// Sender offering SPAN: `receiver_ei` is present.
    pub sos: bool,
    /// Multicast out of sync.
    pub mos: bool,
    /// The offered receiver entropy input (present iff `sos`).
    pub receiver_ei: Option<[u8; 16]>,
}

impl NonceReport {
    /// Build an SOS report with a fresh receiver EI, recording the EI as
    /// our offered `LocalEi` state for the peer.
    pub fn sos(sm: &mut SecurityManager2, peer: NodeId) -> Self {
        let receiver_ei = sm.generate_nonce(Some(peer));
        Self {
            sequence_number: sm.next_sequence_number(peer),
            sos: true,
            mos: false,
            receiver_ei: Some(receiver_ei),
        }
    }

    /// Parse from a command payload.
    pub fn parse(payload: &[u8]) -> Result<Self, PayloadError> {
        if payload.len() < 2 {
            return Err(PayloadError::PayloadTooShort {
                expected: 2,
                got: payload.len(),
            });
        }
        let sequence_number = payload[0];
        let flags = payload[1];
        let sos = flags & FLAG_SOS != 0;
        let mos = flags & FLAG_MOS != 0;
        if !sos && !mos {
            return Err(PayloadError::InvalidField {
                field: "flags",
                value: flags,
            });
        }

        let receiver_ei = if sos {
            if payload.len() < 18 {
                return Err(PayloadError::PayloadTooShort {
                    expected: 18,
                    got: payload.len(),
                });
            }
            let mut ei = [0u8; 16];
            ei.copy_from_slice(&payload[2..18]);
            Some(ei)
        } else {
            None
        };

        Ok(Self {
            sequence_number,
            sos,
            mos,
            receiver_ei,
        })
    }

    /// Serialize to a raw command frame. The SOS flag is derived from
    /// the EI's presence so the frame cannot claim an EI it does not
    /// carry.
    pub fn to_raw(&self) -> CommandRaw {
        debug_assert_eq!(
            self.sos,
            self.receiver_ei.is_some(),
            "receiver EI present iff SOS"
        );
        let mut flags = 0u8;
        if self.mos {
            flags |= FLAG_MOS;
        }

        let mut payload = vec![self.sequence_number, flags];
        if let Some(ei) = &self.receiver_ei {
            payload[1] |= FLAG_SOS;
            payload.extend_from_slice(ei);
        }
        CommandRaw::new(
            CommandClasses::Security2.to_byte(),
            Security2Command::NonceReport.to_byte(),
            payload,
        )
    }
}

// ============================================================================
// Dialog Handlers
// ============================================================================

/// Handle a received NonceGet: generate a fresh receiver EI, transition
/// to `LocalEi` and build the SOS report to send back.
pub fn handle_nonce_get(sm: &mut SecurityManager2, peer: NodeId) -> NonceReport {
    debug!(peer = %peer, "NonceGet received, offering fresh receiver EI");
    NonceReport::sos(sm, peer)
}

/// Handle a received NonceReport: store the peer's offered receiver EI.
pub fn handle_nonce_report(sm: &mut SecurityManager2, peer: NodeId, report: &NonceReport) {
    if report.sos {
        if let Some(ei) = report.receiver_ei {
            debug!(peer = %peer, "NonceReport SOS received, storing remote EI");
            sm.store_remote_ei(peer, ei);
        }
    }
    // MOS concerns multicast groups only; nothing to resynchronize here.
}

/// A NonceReport transmit failure invalidates the EI it offered.
pub fn on_nonce_report_send_failure(sm: &mut SecurityManager2, peer: NodeId) {
    debug!(peer = %peer, "NonceReport transmit failed, discarding offered EI");
    sm.delete_nonce(peer);
}
