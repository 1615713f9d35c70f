//! S2 security error taxonomy.

use crate::cc::PayloadError;
use crate::types::NodeId;
use thiserror::Error;

/// Errors surfaced at the S2 layer's API boundary.
///
/// Only `NoSpan` and `CannotDecode` drive protocol-level recovery (the
/// driver answers them with a NonceReport SOS); everything else
/// propagates to the caller unchanged.
#[derive(Debug, Error)]
pub enum SecurityError {
    /// RX: an encapsulated command arrived without usable SPAN state, or
    /// TX: no receiver entropy input is available yet.
    #[error("no SPAN established with {0}")]
    NoSpan(NodeId),

    /// RX: CCM authentication failed on all attempts, a duplicate
    /// sequence number was seen, or the auth data did not match.
    #[error("message from {0} could not be decoded")]
    CannotDecode(NodeId),

    /// TX: multicast destination without an MGRP extension.
    #[error("multicast frame requires an MGRP extension")]
    MissingExtension,

    /// Encapsulation attempted before the host identity is known.
    #[error("driver not ready: own node id / home id not available")]
    NotReady,

    /// No network key is configured for the required security class.
    #[error("no network key for security class {0}")]
    NoSecurity(crate::types::SecurityClass),

    /// A binary decoder length/range check failed.
    #[error(transparent)]
    Payload(#[from] PayloadError),
}
