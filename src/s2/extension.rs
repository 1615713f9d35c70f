//! S2 extension TLVs.
//!
//! Extensions ride between the sequence/flags prefix and the ciphertext
//! (plaintext extensions) or at the front of the decrypted payload
//! (encrypted extensions). Each is length-prefixed and chained with a
//! more-to-follow bit.
//!
//! ## Wire Format
//!
//! | Offset | Field  | Notes                                         |
//! |--------|--------|-----------------------------------------------|
//! | 0      | length | Includes this header (≥ 2)                    |
//! | 1      | flags  | bit7 more-to-follow, bit6 critical, bit5 encrypted, bits 0-4 type |
//! | 2..    | body   | `length - 2` bytes                            |

use crate::cc::PayloadError;
use std::fmt;

/// Flag bit: more extensions follow this one.
pub const EXT_FLAG_MORE_TO_FOLLOW: u8 = 0x80;

/// Flag bit: receivers that do not understand this extension must fail.
pub const EXT_FLAG_CRITICAL: u8 = 0x40;

/// Flag bit: this extension rides in the encrypted part of the frame.
pub const EXT_FLAG_ENCRYPTED: u8 = 0x20;

/// Mask for the 5-bit extension type.
pub const EXT_TYPE_MASK: u8 = 0x1F;

/// Extension type: sender entropy input establishing a SPAN.
pub const EXT_TYPE_SPAN: u8 = 0x01;

/// Extension type: multicast pre-agreed nonce state (opaque here).
pub const EXT_TYPE_MPAN: u8 = 0x02;

/// Extension type: multicast group id.
pub const EXT_TYPE_MGRP: u8 = 0x03;

// ============================================================================
// Extension Model
// ============================================================================

/// Body of one extension.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExtensionKind {
    /// 16-byte sender entropy input. Plaintext, critical.
    Span { sender_ei: [u8; 16] },
    /// Multicast group id. Plaintext, critical.
    Mgrp { group_id: u8 },
    /// Multicast nonce state. Encrypted, critical; body kept opaque
    /// (multicast decryption is out of scope).
    Mpan { body: Vec<u8> },
    /// Unknown non-critical extension, carried through verbatim.
    Unknown { ext_type: u8, body: Vec<u8> },
}

/// One extension with its placement flag.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Extension {
    /// The extension body.
    pub kind: ExtensionKind,
    /// Whether this extension belongs in the encrypted part of the frame.
    pub encrypted: bool,
}

impl Extension {
    /// A plaintext SPAN extension carrying the sender entropy input.
    pub fn span(sender_ei: [u8; 16]) -> Self {
        Self {
            kind: ExtensionKind::Span { sender_ei },
            encrypted: false,
        }
    }

    /// A plaintext MGRP extension carrying the multicast group id.
    pub fn mgrp(group_id: u8) -> Self {
        Self {
            kind: ExtensionKind::Mgrp { group_id },
            encrypted: false,
        }
    }

    /// An encrypted MPAN extension with an opaque body.
    pub fn mpan(body: Vec<u8>) -> Self {
        Self {
            kind: ExtensionKind::Mpan { body },
            encrypted: true,
        }
    }

    /// The 5-bit type value.
    pub fn ext_type(&self) -> u8 {
        match &self.kind {
            ExtensionKind::Span { .. } => EXT_TYPE_SPAN,
            ExtensionKind::Mgrp { .. } => EXT_TYPE_MGRP,
            ExtensionKind::Mpan { .. } => EXT_TYPE_MPAN,
            ExtensionKind::Unknown { ext_type, .. } => *ext_type,
        }
    }

    /// Whether receivers must reject the frame if they cannot parse this.
    pub fn is_critical(&self) -> bool {
        matches!(
            self.kind,
            ExtensionKind::Span { .. } | ExtensionKind::Mgrp { .. } | ExtensionKind::Mpan { .. }
        )
    }

    fn body_bytes(&self) -> Vec<u8> {
        match &self.kind {
            ExtensionKind::Span { sender_ei } => sender_ei.to_vec(),
            ExtensionKind::Mgrp { group_id } => vec![*group_id],
            ExtensionKind::Mpan { body } => body.clone(),
            ExtensionKind::Unknown { body, .. } => body.clone(),
        }
    }

    /// Serialize this extension. `more_to_follow` is patched in by the
    /// caller, which knows the extension's position in its group.
    pub fn to_bytes(&self, more_to_follow: bool) -> Vec<u8> {
        let body = self.body_bytes();
        let mut flags = self.ext_type() & EXT_TYPE_MASK;
        if self.is_critical() {
            flags |= EXT_FLAG_CRITICAL;
        }
        if self.encrypted {
            flags |= EXT_FLAG_ENCRYPTED;
        }
        if more_to_follow {
            flags |= EXT_FLAG_MORE_TO_FOLLOW;
        }

        let mut bytes = Vec::with_capacity(2 + body.len());
        bytes.push((2 + body.len()) as u8);
        bytes.push(flags);
        bytes.extend_from_slice(&body);
        bytes
    }
}

impl fmt::Display for Extension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match &self.kind {
            ExtensionKind::Span { .. } => "SPAN",
            ExtensionKind::Mgrp { .. } => "MGRP",
            ExtensionKind::Mpan { .. } => "MPAN",
            ExtensionKind::Unknown { ext_type, .. } => {
                return write!(f, "Unknown(0x{:02x})", ext_type)
            }
        };
        write!(f, "{}", name)
    }
}

// ============================================================================
// Chain Codec
// ============================================================================

/// Serialize a group of extensions, setting more-to-follow on every item
/// but the last.
pub fn encode_extensions(extensions: &[&Extension]) -> Vec<u8> {
    let mut bytes = Vec::new();
    for (i, ext) in extensions.iter().enumerate() {
        let more = i + 1 < extensions.len();
        bytes.extend_from_slice(&ext.to_bytes(more));
    }
    bytes
}

/// Parse a more-to-follow chain of extensions starting at `data[0]`.
///
/// Returns the parsed extensions and the number of bytes consumed.
/// Unknown non-critical extensions are kept as [`ExtensionKind::Unknown`];
/// unknown critical extensions fail the parse.
pub fn parse_extensions(data: &[u8]) -> Result<(Vec<Extension>, usize), PayloadError> {
    let mut extensions = Vec::new();
    let mut offset = 0;

    loop {
        if data.len() < offset + 2 {
            return Err(PayloadError::PayloadTooShort {
                expected: offset + 2,
                got: data.len(),
            });
        }

        let length = data[offset] as usize;
        if length < 2 {
            return Err(PayloadError::InvalidExtensionLength(data[offset]));
        }
        if data.len() < offset + length {
            return Err(PayloadError::PayloadTooShort {
                expected: offset + length,
                got: data.len(),
            });
        }

        let flags = data[offset + 1];
        let body = &data[offset + 2..offset + length];
        let ext_type = flags & EXT_TYPE_MASK;
        let encrypted = flags & EXT_FLAG_ENCRYPTED != 0;
        let critical = flags & EXT_FLAG_CRITICAL != 0;

        let kind = match ext_type {
            EXT_TYPE_SPAN => {
                if body.len() != 16 {
                    return Err(PayloadError::Malformed(format!(
                        "SPAN extension body must be 16 bytes, got {}",
                        body.len()
                    )));
                }
                let mut sender_ei = [0u8; 16];
                sender_ei.copy_from_slice(body);
                Some(ExtensionKind::Span { sender_ei })
            }
            EXT_TYPE_MGRP => {
                if body.len() != 1 {
                    return Err(PayloadError::Malformed(format!(
                        "MGRP extension body must be 1 byte, got {}",
                        body.len()
                    )));
                }
                Some(ExtensionKind::Mgrp { group_id: body[0] })
            }
            EXT_TYPE_MPAN => Some(ExtensionKind::Mpan {
                body: body.to_vec(),
            }),
            _ if critical => return Err(PayloadError::UnknownCriticalExtension(ext_type)),
            // Unknown non-critical: keep and skip over
            _ => Some(ExtensionKind::Unknown {
                ext_type,
                body: body.to_vec(),
            }),
        };

        if let Some(kind) = kind {
            extensions.push(Extension { kind, encrypted });
        }

        offset += length;
        if flags & EXT_FLAG_MORE_TO_FOLLOW == 0 {
            break;
        }
    }

    Ok((extensions, offset))
}

#[cfg(test)]
mod tests {
    use super::*;

    // ===== Single Extension Tests =====

    #[test]
    fn test_span_extension_roundtrip() {
        let ext = Extension::span([0x55; 16]);
        let bytes = ext.to_bytes(false);
        assert_eq!(bytes.len(), 18);
        assert_eq!(bytes[0], 18);
        assert_eq!(bytes[1], EXT_FLAG_CRITICAL | EXT_TYPE_SPAN);

        let (parsed, consumed) = parse_extensions(&bytes).unwrap();
        assert_eq!(consumed, 18);
        assert_eq!(parsed, vec![ext]);
    }

    #[test]
    fn test_mgrp_extension_roundtrip() {
        let ext = Extension::mgrp(0x07);
        let bytes = ext.to_bytes(false);
        assert_eq!(bytes, vec![3, EXT_FLAG_CRITICAL | EXT_TYPE_MGRP, 0x07]);

        let (parsed, _) = parse_extensions(&bytes).unwrap();
        assert_eq!(parsed, vec![ext]);
    }

    #[test]
    fn test_mpan_extension_carries_encrypted_bit() {
        let ext = Extension::mpan(vec![0xAA; 4]);
        let bytes = ext.to_bytes(false);
        assert_eq!(
            bytes[1],
            EXT_FLAG_CRITICAL | EXT_FLAG_ENCRYPTED | EXT_TYPE_MPAN
        );

        let (parsed, _) = parse_extensions(&bytes).unwrap();
        assert!(parsed[0].encrypted);
    }

    // ===== Chain Tests =====

    #[test]
    fn test_chain_more_to_follow_patching() {
        let span = Extension::span([0x11; 16]);
        let mgrp = Extension::mgrp(3);
        let bytes = encode_extensions(&[&span, &mgrp]);

        // First has MTF, second does not
        assert_ne!(bytes[1] & EXT_FLAG_MORE_TO_FOLLOW, 0);
        assert_eq!(bytes[18 + 1] & EXT_FLAG_MORE_TO_FOLLOW, 0);

        let (parsed, consumed) = parse_extensions(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(parsed, vec![span, mgrp]);
    }

    #[test]
    fn test_chain_stops_without_mtf() {
        let span = Extension::span([0x11; 16]);
        let mut bytes = span.to_bytes(false);
        // Trailing garbage after the chain must not be consumed
        bytes.extend_from_slice(&[0xDE, 0xAD]);

        let (parsed, consumed) = parse_extensions(&bytes).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(consumed, 18);
    }

    // ===== Unknown Extension Tests =====

    #[test]
    fn test_unknown_noncritical_kept() {
        let bytes = vec![4, 0x1A, 0x01, 0x02]; // type 0x1A, not critical
        let (parsed, _) = parse_extensions(&bytes).unwrap();
        assert_eq!(
            parsed[0].kind,
            ExtensionKind::Unknown {
                ext_type: 0x1A,
                body: vec![0x01, 0x02]
            }
        );
    }

    #[test]
    fn test_unknown_critical_fails() {
        let bytes = vec![3, EXT_FLAG_CRITICAL | 0x1A, 0x01];
        assert!(matches!(
            parse_extensions(&bytes),
            Err(PayloadError::UnknownCriticalExtension(0x1A))
        ));
    }

    // ===== Malformed Input Tests =====

    #[test]
    fn test_length_below_minimum() {
        assert!(matches!(
            parse_extensions(&[1, 0]),
            Err(PayloadError::InvalidExtensionLength(1))
        ));
    }

    #[test]
    fn test_truncated_body() {
        let bytes = vec![18, EXT_TYPE_SPAN, 0x55]; // claims 16-byte body
        assert!(matches!(
            parse_extensions(&bytes),
            Err(PayloadError::PayloadTooShort { .. })
        ));
    }

    #[test]
    fn test_span_wrong_body_length() {
        let bytes = vec![4, EXT_FLAG_CRITICAL | EXT_TYPE_SPAN, 0x55, 0x55];
        assert!(parse_extensions(&bytes).is_err());
    }
}
