//! S2 message encapsulation codec.
//!
//! Wire format of an encapsulated command (payload of command 0x03):
//!
//! ```text
//! [0]       sequence number
//! [1]       bit0 = has unencrypted extensions, bit1 = has encrypted extensions
//! [2..a)    unencrypted extensions (more-to-follow chain)
//! [a..b)    AES-CCM ciphertext (encrypted extensions ∥ inner command)
//! [b..]     8-byte auth tag
//! ```
//!
//! The authentication data binds sender, destination, home id, total
//! message length and the entire unencrypted prefix, so any in-flight
//! mutation of addressing metadata fails the tag check.
//!
//! The receive path implements the decrypt-retry policy: duplicate
//! rejection, the previous-nonce grace window for crossing frames, a
//! bounded fresh-nonce search, and security-class discovery by trial
//! decryption when the peer establishes a new SPAN.

use crate::cc::{CommandClasses, CommandRaw, FrameKind, ParsingContext, PayloadError};
use crate::crypto::{decrypt_aes128_ccm, encrypt_aes128_ccm, SECURITY_S2_AUTH_TAG_LENGTH};
use crate::s2::extension::{encode_extensions, parse_extensions, Extension, ExtensionKind};
use crate::s2::manager::{SecurityManager2, SpanState};
use crate::s2::{Security2Command, SecurityError};
use crate::types::{HomeId, NodeId, SecurityClass, SECURITY_CLASS_ORDER};
use std::time::Instant;
use tracing::{debug, trace};

/// Maximum fresh-nonce decryption attempts on a desynced stream.
pub const DECRYPT_ATTEMPTS: usize = 5;

/// Flags byte bit 0: unencrypted extensions present.
const FLAG_UNENCRYPTED_EXTENSIONS: u8 = 0x01;

/// Flags byte bit 1: encrypted extensions present.
const FLAG_ENCRYPTED_EXTENSIONS: u8 = 0x02;

// ============================================================================
// Codec Contexts
// ============================================================================

/// Addressing metadata for the transmit path.
#[derive(Clone, Copy, Debug)]
pub struct TxContext {
    /// Our own node id.
    pub own_node_id: NodeId,
    /// Network identifier.
    pub home_id: HomeId,
    /// Whether the frame goes out as multicast. Multicast frames must
    /// carry an MGRP extension naming the group.
    pub multicast: bool,
}

/// Addressing metadata for the receive path.
#[derive(Clone, Copy, Debug)]
pub struct RxContext {
    /// Our own node id.
    pub own_node_id: NodeId,
    /// Network identifier.
    pub home_id: HomeId,
    /// Node the frame came from.
    pub sending_node_id: NodeId,
}

// ============================================================================
// Encapsulation
// ============================================================================

/// An S2-encapsulated command, in memory.
#[derive(Clone, Debug)]
pub struct Security2Encapsulation {
    peer: NodeId,
    /// Lazily materialized: the first read allocates the peer's next
    /// counter value, later reads return the same value until reset.
    sequence_number: Option<u8>,
    /// Extensions in declaration order, each knowing its placement.
    pub extensions: Vec<Extension>,
    /// The encapsulated command, absent for extension-only frames.
    pub inner: Option<CommandRaw>,
    /// Security class forced by the caller (interview trial queries).
    pub security_class_override: Option<SecurityClass>,
    /// Class the frame was actually encrypted/decrypted under.
    security_class: Option<SecurityClass>,
    // Transient codec captures, test/debug only.
    pub(crate) key: Option<[u8; 16]>,
    pub(crate) iv: Option<[u8; 13]>,
}

impl Security2Encapsulation {
    /// Create an encapsulation for `inner` addressed to `peer`.
    pub fn new(peer: NodeId, inner: Option<CommandRaw>) -> Self {
        Self {
            peer,
            sequence_number: None,
            extensions: Vec::new(),
            inner,
            security_class_override: None,
            security_class: None,
            key: None,
            iv: None,
        }
    }

    /// Append an extension.
    pub fn with_extension(mut self, extension: Extension) -> Self {
        self.extensions.push(extension);
        self
    }

    /// Force a security class for this frame.
    pub fn with_security_class(mut self, class: SecurityClass) -> Self {
        self.security_class_override = Some(class);
        self
    }

    /// The remote node this frame is addressed to / came from.
    pub fn peer(&self) -> NodeId {
        self.peer
    }

    /// Class the frame was encrypted or decrypted under, once known.
    pub fn security_class(&self) -> Option<SecurityClass> {
        self.security_class
    }

    /// The frame's sequence number. Allocates the peer's next counter
    /// value on first read; stable afterwards, so serialization stays
    /// idempotent until the frame is committed to the wire.
    pub fn sequence_number(&mut self, sm: &mut SecurityManager2) -> u8 {
        let peer = self.peer;
        *self
            .sequence_number
            .get_or_insert_with(|| sm.next_sequence_number(peer))
    }

    /// Forget the materialized sequence number.
    pub fn reset_sequence_number(&mut self) {
        self.sequence_number = None;
    }

    /// Sender EI of this frame's SPAN extension, if present.
    pub fn span_sender_ei(&self) -> Option<[u8; 16]> {
        self.extensions.iter().find_map(|e| match e.kind {
            ExtensionKind::Span { sender_ei } => Some(sender_ei),
            _ => None,
        })
    }

    /// Group id of this frame's MGRP extension, if present.
    pub fn mgrp_group_id(&self) -> Option<u8> {
        self.extensions.iter().find_map(|e| match e.kind {
            ExtensionKind::Mgrp { group_id } => Some(group_id),
            _ => None,
        })
    }

    /// Context for decoding the inner command against this envelope.
    pub fn parsing_context(&self, ctx: &RxContext) -> ParsingContext {
        ParsingContext {
            sending_node_id: ctx.sending_node_id,
            own_node_id: ctx.own_node_id,
            home_id: ctx.home_id,
            security_class: self.security_class,
            frame_kind: FrameKind::Singlecast,
        }
    }

    fn upsert_span_extension(&mut self, sender_ei: [u8; 16]) {
        for ext in &mut self.extensions {
            if let ExtensionKind::Span { sender_ei: ei } = &mut ext.kind {
                *ei = sender_ei;
                return;
            }
        }
        self.extensions.insert(0, Extension::span(sender_ei));
    }

    // ------------------------------------------------------------------
    // Transmit
    // ------------------------------------------------------------------

    /// Encrypt and serialize into a Security2 MessageEncapsulation frame.
    pub fn encode(
        &mut self,
        ctx: &TxContext,
        sm: &mut SecurityManager2,
    ) -> Result<CommandRaw, SecurityError> {
        let peer = self.peer;

        if ctx.multicast && self.mgrp_group_id().is_none() {
            return Err(SecurityError::MissingExtension);
        }
        let destination_id = self.mgrp_group_id().unwrap_or(peer.as_u8());

        // Establish the SPAN if the peer has offered us its receiver EI;
        // without one, the caller must obtain a NonceReport first.
        match sm.span_state(peer).clone() {
            SpanState::None | SpanState::LocalEi { .. } => {
                return Err(SecurityError::NoSpan(peer));
            }
            SpanState::RemoteEi { receiver_ei } => {
                let sender_ei = sm.generate_nonce(None);
                if sm.has_temp_keys(peer) {
                    sm.initialize_temp_span(peer, &sender_ei, &receiver_ei)?;
                } else {
                    let class = self
                        .security_class_override
                        .or_else(|| sm.highest_security_class(peer).filter(|c| c.is_s2()))
                        .ok_or(SecurityError::NoSecurity(SecurityClass::None))?;
                    sm.initialize_span(peer, class, &sender_ei, &receiver_ei)?;
                }
                self.upsert_span_extension(sender_ei);
                trace!(peer = %peer, "Established SPAN from remote EI");
            }
            SpanState::Span(_) => {}
        }

        let class = match sm.span_state(peer) {
            SpanState::Span(span) => span.security_class,
            _ => return Err(SecurityError::NoSpan(peer)),
        };
        let key = key_for_class(sm, peer, class)?;

        let unencrypted: Vec<&Extension> =
            self.extensions.iter().filter(|e| !e.encrypted).collect();
        let encrypted: Vec<&Extension> = self.extensions.iter().filter(|e| e.encrypted).collect();
        let unencrypted_ext = encode_extensions(&unencrypted);
        let encrypted_ext = encode_extensions(&encrypted);

        let mut ext_flags = 0u8;
        if !unencrypted.is_empty() {
            ext_flags |= FLAG_UNENCRYPTED_EXTENSIONS;
        }
        if !encrypted.is_empty() {
            ext_flags |= FLAG_ENCRYPTED_EXTENSIONS;
        }

        let mut plaintext = encrypted_ext;
        if let Some(inner) = &self.inner {
            plaintext.extend_from_slice(&inner.to_bytes());
        }

        let seq = self.sequence_number(sm);
        let iv = sm.next_nonce(peer, true)?;

        // CC header (2) + seq/flags (2) + extensions + ciphertext + tag
        let message_length =
            4 + unencrypted_ext.len() + plaintext.len() + SECURITY_S2_AUTH_TAG_LENGTH;
        let aad = build_auth_data(
            ctx.own_node_id.as_u8(),
            destination_id,
            ctx.home_id,
            message_length,
            seq,
            ext_flags,
            &unencrypted_ext,
        );

        let ciphertext_and_tag = encrypt_aes128_ccm(&key, &iv, &plaintext, &aad)
            .map_err(|_| PayloadError::Malformed("payload too large for CCM".into()))?;

        self.security_class = Some(class);
        self.key = Some(key);
        self.iv = Some(iv);

        let mut payload = Vec::with_capacity(2 + unencrypted_ext.len() + ciphertext_and_tag.len());
        payload.push(seq);
        payload.push(ext_flags);
        payload.extend_from_slice(&unencrypted_ext);
        payload.extend_from_slice(&ciphertext_and_tag);

        Ok(CommandRaw::new(
            CommandClasses::Security2.to_byte(),
            Security2Command::MessageEncapsulation.to_byte(),
            payload,
        ))
    }

    // ------------------------------------------------------------------
    // Receive
    // ------------------------------------------------------------------

    /// Parse, authenticate and decrypt a received MessageEncapsulation
    /// frame.
    pub fn parse(
        raw: &CommandRaw,
        ctx: &RxContext,
        sm: &mut SecurityManager2,
    ) -> Result<Self, SecurityError> {
        let peer = ctx.sending_node_id;
        let payload = &raw.payload;

        if payload.len() < 2 + SECURITY_S2_AUTH_TAG_LENGTH {
            return Err(PayloadError::PayloadTooShort {
                expected: 2 + SECURITY_S2_AUTH_TAG_LENGTH,
                got: payload.len(),
            }
            .into());
        }

        let seq = payload[0];
        let ext_flags = payload[1];

        if sm.is_duplicate_singlecast(peer, seq) {
            debug!(peer = %peer, seq, "Duplicate singlecast frame");
            return Err(SecurityError::CannotDecode(peer));
        }
        let previous_seq = sm.store_sequence_number(peer, seq);

        // A node known to hold no security class cannot speak S2
        if sm.highest_security_class(peer) == Some(SecurityClass::None) && !sm.has_temp_keys(peer)
        {
            return Err(PayloadError::Malformed("no security class granted".into()).into());
        }

        let (extensions, ext_len) = if ext_flags & FLAG_UNENCRYPTED_EXTENSIONS != 0 {
            parse_extensions(&payload[2..])?
        } else {
            (Vec::new(), 0)
        };

        let ciphertext_start = 2 + ext_len;
        if payload.len() < ciphertext_start + SECURITY_S2_AUTH_TAG_LENGTH {
            return Err(PayloadError::PayloadTooShort {
                expected: ciphertext_start + SECURITY_S2_AUTH_TAG_LENGTH,
                got: payload.len(),
            }
            .into());
        }
        let ciphertext_and_tag = &payload[ciphertext_start..];

        let destination_id = extensions
            .iter()
            .find_map(|e| match e.kind {
                ExtensionKind::Mgrp { group_id } => Some(group_id),
                _ => None,
            })
            .unwrap_or(ctx.own_node_id.as_u8());

        let aad = build_auth_data(
            peer.as_u8(),
            destination_id,
            ctx.home_id,
            raw.wire_len(),
            seq,
            ext_flags,
            &payload[2..ciphertext_start],
        );

        let (plaintext, class, key, iv) = decrypt_with_span(
            sm,
            peer,
            previous_seq,
            seq,
            &extensions,
            ciphertext_and_tag,
            &aad,
        )?;

        // Encrypted extensions ride at the front of the plaintext
        let mut all_extensions = extensions;
        let mut offset = 0;
        if ext_flags & FLAG_ENCRYPTED_EXTENSIONS != 0 {
            let (enc_exts, enc_len) = parse_extensions(&plaintext)?;
            all_extensions.extend(enc_exts);
            offset = enc_len;
        }

        let inner = if plaintext.len() - offset >= 2 {
            Some(CommandRaw::parse(&plaintext[offset..])?)
        } else {
            None
        };

        Ok(Self {
            peer,
            sequence_number: Some(seq),
            extensions: all_extensions,
            inner,
            security_class_override: None,
            security_class: Some(class),
            key: Some(key),
            iv: Some(iv),
        })
    }
}

// ============================================================================
// Decrypt-Retry Policy
// ============================================================================

type Decrypted = (Vec<u8>, SecurityClass, [u8; 16], [u8; 13]);

/// Resolve nonce candidates from the peer's SPAN state and attempt
/// decryption, per the retry policy.
fn decrypt_with_span(
    sm: &mut SecurityManager2,
    peer: NodeId,
    previous_seq: Option<u8>,
    seq: u8,
    extensions: &[Extension],
    ciphertext_and_tag: &[u8],
    aad: &[u8],
) -> Result<Decrypted, SecurityError> {
    match sm.span_state(peer).clone() {
        // RemoteEI on RX is treated like no state at all; the underlying
        // specs leave this case open (see DESIGN.md), so stay conservative
        // and ask for a fresh nonce exchange.
        SpanState::None | SpanState::RemoteEi { .. } => Err(SecurityError::NoSpan(peer)),

        SpanState::Span(span) => {
            let class = span.security_class;
            let key = key_for_class(sm, peer, class)?;

            let mut result = None;

            // Crossing-frame window: the nonce we consumed on TX is valid
            // exactly once, only for the immediately following sequence
            // number, and only within its grace period.
            if let Some(current) = &span.current {
                let in_window = current.expires > Instant::now()
                    && previous_seq.is_some_and(|prev| seq == prev.wrapping_add(1));
                if in_window {
                    if let Ok(plaintext) =
                        decrypt_aes128_ccm(&key, &current.nonce, ciphertext_and_tag, aad)
                    {
                        trace!(peer = %peer, seq, "Decrypted with previous SPAN nonce");
                        result = Some((plaintext, class, key, current.nonce));
                    }
                }
            }
            clear_current_span(sm, peer);

            if result.is_none() {
                for attempt in 0..DECRYPT_ATTEMPTS {
                    let nonce = sm.next_nonce(peer, false)?;
                    if let Ok(plaintext) = decrypt_aes128_ccm(&key, &nonce, ciphertext_and_tag, aad)
                    {
                        trace!(peer = %peer, seq, attempt, "Decrypted after nonce advance");
                        result = Some((plaintext, class, key, nonce));
                        break;
                    }
                }
            }

            result.ok_or_else(|| {
                debug!(peer = %peer, seq, "All decryption attempts failed, resetting SPAN");
                sm.delete_nonce(peer);
                SecurityError::CannotDecode(peer)
            })
        }

        SpanState::LocalEi { receiver_ei } => {
            // The peer answers our offered EI with its sender EI in a
            // SPAN extension; without one there is nothing to seed from.
            let sender_ei = extensions
                .iter()
                .find_map(|e| match e.kind {
                    ExtensionKind::Span { sender_ei } => Some(sender_ei),
                    _ => None,
                })
                .ok_or(SecurityError::NoSpan(peer))?;

            // During bootstrap the temp key is the only candidate tried
            // first; otherwise discover the class by trial decryption.
            if sm.has_temp_keys(peer) {
                sm.initialize_temp_span(peer, &sender_ei, &receiver_ei)?;
                let key = key_for_class(sm, peer, SecurityClass::Temporary)?;
                let nonce = sm.next_nonce(peer, false)?;
                if let Ok(plaintext) = decrypt_aes128_ccm(&key, &nonce, ciphertext_and_tag, aad) {
                    return Ok((plaintext, SecurityClass::Temporary, key, nonce));
                }
                sm.set_span_state(peer, SpanState::LocalEi { receiver_ei });
            }

            for class in SECURITY_CLASS_ORDER.into_iter().filter(|c| c.is_s2()) {
                if sm.has_security_class(peer, class) == Some(false) {
                    continue;
                }
                if !sm.has_keys_for_security_class(class) {
                    continue;
                }

                sm.initialize_span(peer, class, &sender_ei, &receiver_ei)?;
                let key = key_for_class(sm, peer, class)?;
                let nonce = sm.next_nonce(peer, false)?;
                if let Ok(plaintext) = decrypt_aes128_ccm(&key, &nonce, ciphertext_and_tag, aad) {
                    debug!(peer = %peer, class = %class, "Discovered security class by trial decryption");
                    sm.set_security_class(peer, class, true);
                    return Ok((plaintext, class, key, nonce));
                }
                sm.set_span_state(peer, SpanState::LocalEi { receiver_ei });
            }

            debug!(peer = %peer, seq, "Trial decryption failed for every candidate class");
            Err(SecurityError::CannotDecode(peer))
        }
    }
}

fn clear_current_span(sm: &mut SecurityManager2, peer: NodeId) {
    if let SpanState::Span(mut span) = sm.span_state(peer).clone() {
        span.current = None;
        sm.set_span_state(peer, SpanState::Span(span));
    }
}

fn key_for_class(
    sm: &SecurityManager2,
    peer: NodeId,
    class: SecurityClass,
) -> Result<[u8; 16], SecurityError> {
    if class == SecurityClass::Temporary {
        sm.get_keys_for_node(peer).map(|k| *k.key_ccm())
    } else {
        sm.get_keys_for_security_class(class)
            .map(|k| k.key_ccm)
            .ok_or(SecurityError::NoSecurity(class))
    }
}

/// Authentication data: an 8-byte addressing prefix followed by the
/// frame's unencrypted prefix exactly as serialized.
fn build_auth_data(
    sending_node_id: u8,
    destination_id: u8,
    home_id: HomeId,
    message_length: usize,
    seq: u8,
    ext_flags: u8,
    unencrypted_extensions: &[u8],
) -> Vec<u8> {
    let mut aad = Vec::with_capacity(10 + unencrypted_extensions.len());
    aad.push(sending_node_id);
    aad.push(destination_id);
    aad.extend_from_slice(&home_id.as_u32().to_be_bytes());
    aad.extend_from_slice(&(message_length as u16).to_be_bytes());
    aad.push(seq);
    aad.push(ext_flags);
    aad.extend_from_slice(unencrypted_extensions);
    aad
}

// ============================================================================
// Encapsulation Policy
// ============================================================================

/// Whether a command must ride inside an S2 encapsulation.
///
/// `secure` is the command's CC-level security flag as recorded in the
/// command registry. S2's own commands are special-cased: only the ones
/// that carry secrets (key transfer, supported-commands queries, echoed
/// KEX frames and the sensitive KEXFail reasons) are encapsulated; the
/// rest of the dialog must work before any key exists.
pub fn requires_encapsulation(cmd: &CommandRaw, secure: bool) -> bool {
    if !secure {
        return false;
    }
    if cmd.cc_id == CommandClasses::Security.to_byte() {
        return false;
    }
    if cmd.cc_id != CommandClasses::Security2.to_byte() {
        return true;
    }

    use Security2Command::*;
    match Security2Command::from_byte(cmd.command) {
        Some(
            CommandsSupportedGet | CommandsSupportedReport | NetworkKeyGet | NetworkKeyReport
            | NetworkKeyVerify | TransferEnd,
        ) => true,
        // Echoed KEX frames are encrypted under the temp key
        Some(KexSet | KexReport) => cmd.payload.first().is_some_and(|b| b & 0x01 != 0),
        Some(KexFail) => matches!(cmd.payload.first(), Some(0x05 | 0x07 | 0x08 | 0x09)),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // The encapsulation round-trip, retry and binding scenarios live in
    // the s2::tests module; here only the pure helpers are covered.

    #[test]
    fn test_auth_data_layout() {
        let aad = build_auth_data(1, 5, HomeId::new(0xDEADBEEF), 0x1234, 0x42, 0x01, &[0xAA, 0xBB]);
        assert_eq!(
            aad,
            vec![1, 5, 0xDE, 0xAD, 0xBE, 0xEF, 0x12, 0x34, 0x42, 0x01, 0xAA, 0xBB]
        );
    }

    #[test]
    fn test_requires_encapsulation_plain_cc() {
        let cmd = CommandRaw::new(0x4E, 0x01, vec![1, 1]);
        assert!(requires_encapsulation(&cmd, true));
        assert!(!requires_encapsulation(&cmd, false));
    }

    #[test]
    fn test_requires_encapsulation_s0_never() {
        let cmd = CommandRaw::new(0x98, 0x40, vec![]);
        assert!(!requires_encapsulation(&cmd, true));
    }

    #[test]
    fn test_requires_encapsulation_s2_selected_commands() {
        for command in [0x09, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E] {
            let cmd = CommandRaw::new(0x9F, command, vec![]);
            assert!(requires_encapsulation(&cmd, true), "command 0x{command:02x}");
        }
        // Nonce dialog and KEXGet stay in the clear
        for command in [0x01, 0x02, 0x04, 0x08] {
            let cmd = CommandRaw::new(0x9F, command, vec![0x00]);
            assert!(!requires_encapsulation(&cmd, true), "command 0x{command:02x}");
        }
    }

    #[test]
    fn test_requires_encapsulation_kex_echo_bit() {
        let plain = CommandRaw::new(0x9F, 0x06, vec![0x00, 0x02, 0x01, 0x07]);
        let echo = CommandRaw::new(0x9F, 0x06, vec![0x01, 0x02, 0x01, 0x07]);
        assert!(!requires_encapsulation(&plain, true));
        assert!(requires_encapsulation(&echo, true));
    }

    #[test]
    fn test_requires_encapsulation_kex_fail_reasons() {
        for (reason, expected) in [
            (0x01u8, false),
            (0x05, true),
            (0x06, false),
            (0x07, true),
            (0x08, true),
            (0x09, true),
            (0x0A, false),
        ] {
            let cmd = CommandRaw::new(0x9F, 0x07, vec![reason]);
            assert_eq!(
                requires_encapsulation(&cmd, true),
                expected,
                "reason 0x{reason:02x}"
            );
        }
    }

    #[test]
    fn test_sequence_number_lazy_and_stable() {
        let mut sm = SecurityManager2::new();
        let peer = NodeId::new(9);
        let mut encap = Security2Encapsulation::new(peer, None);

        let first = encap.sequence_number(&mut sm);
        assert_eq!(encap.sequence_number(&mut sm), first);

        encap.reset_sequence_number();
        let second = encap.sequence_number(&mut sm);
        assert_eq!(second, first.wrapping_add(1));
    }

    #[test]
    fn test_upsert_span_extension_replaces() {
        let mut encap = Security2Encapsulation::new(NodeId::new(2), None)
            .with_extension(Extension::mgrp(7))
            .with_extension(Extension::span([0x01; 16]));

        encap.upsert_span_extension([0x02; 16]);
        assert_eq!(encap.span_sender_ei(), Some([0x02; 16]));
        assert_eq!(
            encap
                .extensions
                .iter()
                .filter(|e| matches!(e.kind, ExtensionKind::Span { .. }))
                .count(),
            1
        );

        let mut without = Security2Encapsulation::new(NodeId::new(2), None);
        without.upsert_span_extension([0x03; 16]);
        assert_eq!(without.span_sender_ei(), Some([0x03; 16]));
    }
}
