//! KEX dialog commands.
//!
//! Codecs for the bootstrap handshake: scheme/profile negotiation
//! (KEXGet/Report/Set/Fail), the Curve25519 public key exchange, network
//! key transfer and verification, and the supported-commands query pair.
//! The sequencing lives in [`crate::s2::bootstrap`].

use crate::cc::{encode_cc_list, parse_cc_list, CcList, CommandClasses, CommandRaw, PayloadError};
use crate::s2::Security2Command;
use crate::types::SecurityClass;
use std::fmt;

/// Byte 0 bit 0 of KEXReport/KEXSet: this frame echoes an earlier one.
const FLAG_ECHO: u8 = 0x01;

/// Byte 0 bit 1 of KEXReport/KEXSet: request/permit client-side auth.
const FLAG_CSA: u8 = 0x02;

// ============================================================================
// Schemes and Profiles
// ============================================================================

/// Key exchange schemes. Bit 0 of the scheme bitmask is reserved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KexScheme {
    /// KEX Scheme 1 (the only scheme defined).
    Scheme1,
}

impl KexScheme {
    /// Bit position in the scheme bitmask.
    pub fn bit(&self) -> u8 {
        match self {
            KexScheme::Scheme1 => 1,
        }
    }

    fn decode_mask(mask: u8) -> Vec<KexScheme> {
        let mut schemes = Vec::new();
        if mask & (1 << 1) != 0 {
            schemes.push(KexScheme::Scheme1);
        }
        schemes
    }

    fn encode_mask(schemes: &[KexScheme]) -> u8 {
        schemes.iter().fold(0, |mask, s| mask | (1 << s.bit()))
    }
}

/// ECDH profiles for the public key exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EcdhProfile {
    /// Curve25519, 32-byte public keys.
    Curve25519,
}

impl EcdhProfile {
    /// Bit position in the profile bitmask.
    pub fn bit(&self) -> u8 {
        match self {
            EcdhProfile::Curve25519 => 0,
        }
    }

    fn decode_mask(mask: u8) -> Vec<EcdhProfile> {
        let mut profiles = Vec::new();
        if mask & 1 != 0 {
            profiles.push(EcdhProfile::Curve25519);
        }
        profiles
    }

    fn encode_mask(profiles: &[EcdhProfile]) -> u8 {
        profiles.iter().fold(0, |mask, p| mask | (1 << p.bit()))
    }
}

// ============================================================================
// KEXGet / KEXReport / KEXSet / KEXFail
// ============================================================================

/// Ask a node what KEX parameters it supports. Empty payload.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KexGet;

impl KexGet {
    pub fn parse(_payload: &[u8]) -> Result<Self, PayloadError> {
        Ok(Self)
    }

    pub fn to_raw(&self) -> CommandRaw {
        CommandRaw::new(
            CommandClasses::Security2.to_byte(),
            Security2Command::KexGet.to_byte(),
            Vec::new(),
        )
    }
}

/// A node's supported KEX parameters and requested keys.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KexReport {
    /// Set on the echoed copy during bootstrap verification.
    pub echo: bool,
    /// Node requests client-side authentication.
    pub request_csa: bool,
    /// Supported key exchange schemes.
    pub supported_schemes: Vec<KexScheme>,
    /// Supported ECDH profiles.
    pub supported_profiles: Vec<EcdhProfile>,
    /// Security classes the node requests keys for.
    pub requested_keys: Vec<SecurityClass>,
}

impl KexReport {
    pub fn parse(payload: &[u8]) -> Result<Self, PayloadError> {
        if payload.len() < 4 {
            return Err(PayloadError::PayloadTooShort {
                expected: 4,
                got: payload.len(),
            });
        }
        Ok(Self {
            echo: payload[0] & FLAG_ECHO != 0,
            request_csa: payload[0] & FLAG_CSA != 0,
            supported_schemes: KexScheme::decode_mask(payload[1]),
            supported_profiles: EcdhProfile::decode_mask(payload[2]),
            requested_keys: SecurityClass::decode_mask(payload[3]),
        })
    }

    pub fn to_raw(&self) -> CommandRaw {
        let mut flags = 0u8;
        if self.echo {
            flags |= FLAG_ECHO;
        }
        if self.request_csa {
            flags |= FLAG_CSA;
        }
        CommandRaw::new(
            CommandClasses::Security2.to_byte(),
            Security2Command::KexReport.to_byte(),
            vec![
                flags,
                KexScheme::encode_mask(&self.supported_schemes),
                EcdhProfile::encode_mask(&self.supported_profiles),
                SecurityClass::encode_mask(&self.requested_keys),
            ],
        )
    }
}

/// The controller's selection: one scheme, one profile, the granted keys.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KexSet {
    /// Set on the echoed copy during bootstrap verification.
    pub echo: bool,
    /// Controller permits client-side authentication.
    pub permit_csa: bool,
    /// The selected scheme (exactly one bit on the wire).
    pub selected_scheme: KexScheme,
    /// The selected ECDH profile (exactly one bit on the wire).
    pub selected_profile: EcdhProfile,
    /// Security classes the controller grants keys for.
    pub granted_keys: Vec<SecurityClass>,
}

impl KexSet {
    pub fn parse(payload: &[u8]) -> Result<Self, PayloadError> {
        if payload.len() < 4 {
            return Err(PayloadError::PayloadTooShort {
                expected: 4,
                got: payload.len(),
            });
        }

        // A Set must select exactly one scheme and one profile
        if payload[1].count_ones() != 1 {
            return Err(PayloadError::InvalidField {
                field: "selected_scheme",
                value: payload[1],
            });
        }
        if payload[2].count_ones() != 1 {
            return Err(PayloadError::InvalidField {
                field: "selected_profile",
                value: payload[2],
            });
        }

        let selected_scheme = KexScheme::decode_mask(payload[1])
            .into_iter()
            .next()
            .ok_or(PayloadError::InvalidField {
                field: "selected_scheme",
                value: payload[1],
            })?;
        let selected_profile = EcdhProfile::decode_mask(payload[2])
            .into_iter()
            .next()
            .ok_or(PayloadError::InvalidField {
                field: "selected_profile",
                value: payload[2],
            })?;

        Ok(Self {
            echo: payload[0] & FLAG_ECHO != 0,
            permit_csa: payload[0] & FLAG_CSA != 0,
            selected_scheme,
            selected_profile,
            granted_keys: SecurityClass::decode_mask(payload[3]),
        })
    }

    pub fn to_raw(&self) -> CommandRaw {
        let mut flags = 0u8;
        if self.echo {
            flags |= FLAG_ECHO;
        }
        if self.permit_csa {
            flags |= FLAG_CSA;
        }
        CommandRaw::new(
            CommandClasses::Security2.to_byte(),
            Security2Command::KexSet.to_byte(),
            vec![
                flags,
                1 << self.selected_scheme.bit(),
                1 << self.selected_profile.bit(),
                SecurityClass::encode_mask(&self.granted_keys),
            ],
        )
    }
}

/// Reasons a party may abort the KEX dialog.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum KexFailReason {
    /// No keys were requested, or none can be granted.
    NoKeysRequested = 0x01,
    /// No mutually supported KEX scheme.
    NoSupportedScheme = 0x02,
    /// No mutually supported ECDH profile.
    NoSupportedCurve = 0x03,
    /// An encrypted bootstrap frame failed to decrypt.
    Decrypt = 0x05,
    /// The user or controller canceled bootstrapping.
    BootstrappingCanceled = 0x06,
    /// Echo verification failed.
    WrongSecurityLevel = 0x07,
    /// A key was requested that was not granted.
    KeyNotGranted = 0x08,
    /// Key verification did not complete.
    NoVerify = 0x09,
    /// The node proved possession of a different key.
    DifferentKey = 0x0A,
}

impl KexFailReason {
    /// Try to convert from a byte.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(KexFailReason::NoKeysRequested),
            0x02 => Some(KexFailReason::NoSupportedScheme),
            0x03 => Some(KexFailReason::NoSupportedCurve),
            0x05 => Some(KexFailReason::Decrypt),
            0x06 => Some(KexFailReason::BootstrappingCanceled),
            0x07 => Some(KexFailReason::WrongSecurityLevel),
            0x08 => Some(KexFailReason::KeyNotGranted),
            0x09 => Some(KexFailReason::NoVerify),
            0x0A => Some(KexFailReason::DifferentKey),
            _ => None,
        }
    }

    /// Convert to a byte.
    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for KexFailReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Abort the KEX dialog.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KexFail {
    pub reason: KexFailReason,
}

impl KexFail {
    pub fn new(reason: KexFailReason) -> Self {
        Self { reason }
    }

    pub fn parse(payload: &[u8]) -> Result<Self, PayloadError> {
        let byte = *payload.first().ok_or(PayloadError::PayloadTooShort {
            expected: 1,
            got: 0,
        })?;
        let reason = KexFailReason::from_byte(byte).ok_or(PayloadError::InvalidField {
            field: "reason",
            value: byte,
        })?;
        Ok(Self { reason })
    }

    pub fn to_raw(&self) -> CommandRaw {
        CommandRaw::new(
            CommandClasses::Security2.to_byte(),
            Security2Command::KexFail.to_byte(),
            vec![self.reason.to_byte()],
        )
    }
}

// ============================================================================
// Public Key Exchange
// ============================================================================

/// One side's ECDH public key (32 bytes for Curve25519).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublicKeyReport {
    /// Whether the sender is the including (granting) side.
    pub including_node: bool,
    /// The Curve25519 public key.
    pub public_key: [u8; 32],
}

impl PublicKeyReport {
    pub fn parse(payload: &[u8]) -> Result<Self, PayloadError> {
        if payload.len() < 33 {
            return Err(PayloadError::PayloadTooShort {
                expected: 33,
                got: payload.len(),
            });
        }
        let mut public_key = [0u8; 32];
        public_key.copy_from_slice(&payload[1..33]);
        Ok(Self {
            including_node: payload[0] & 0x01 != 0,
            public_key,
        })
    }

    pub fn to_raw(&self) -> CommandRaw {
        let mut payload = Vec::with_capacity(33);
        payload.push(u8::from(self.including_node));
        payload.extend_from_slice(&self.public_key);
        CommandRaw::new(
            CommandClasses::Security2.to_byte(),
            Security2Command::PublicKeyReport.to_byte(),
            payload,
        )
    }
}

// ============================================================================
// Network Key Transfer
// ============================================================================

/// Request the network key of one granted class.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NetworkKeyGet {
    pub requested_key: SecurityClass,
}

impl NetworkKeyGet {
    pub fn parse(payload: &[u8]) -> Result<Self, PayloadError> {
        let byte = *payload.first().ok_or(PayloadError::PayloadTooShort {
            expected: 1,
            got: 0,
        })?;
        if byte.count_ones() != 1 {
            return Err(PayloadError::InvalidField {
                field: "requested_key",
                value: byte,
            });
        }
        let requested_key = SecurityClass::decode_mask(byte)
            .into_iter()
            .next()
            .ok_or(PayloadError::InvalidField {
                field: "requested_key",
                value: byte,
            })?;
        Ok(Self { requested_key })
    }

    pub fn to_raw(&self) -> CommandRaw {
        CommandRaw::new(
            CommandClasses::Security2.to_byte(),
            Security2Command::NetworkKeyGet.to_byte(),
            vec![SecurityClass::encode_mask(&[self.requested_key])],
        )
    }
}

/// Transfer of one class's permanent network key. Always rides inside an
/// encapsulation under the temp key.
#[derive(Clone, PartialEq, Eq)]
pub struct NetworkKeyReport {
    pub granted_key: SecurityClass,
    pub network_key: [u8; 16],
}

impl NetworkKeyReport {
    pub fn parse(payload: &[u8]) -> Result<Self, PayloadError> {
        if payload.len() < 17 {
            return Err(PayloadError::PayloadTooShort {
                expected: 17,
                got: payload.len(),
            });
        }
        if payload[0].count_ones() != 1 {
            return Err(PayloadError::InvalidField {
                field: "granted_key",
                value: payload[0],
            });
        }
        let granted_key = SecurityClass::decode_mask(payload[0])
            .into_iter()
            .next()
            .ok_or(PayloadError::InvalidField {
                field: "granted_key",
                value: payload[0],
            })?;
        let mut network_key = [0u8; 16];
        network_key.copy_from_slice(&payload[1..17]);
        Ok(Self {
            granted_key,
            network_key,
        })
    }

    pub fn to_raw(&self) -> CommandRaw {
        let mut payload = Vec::with_capacity(17);
        payload.push(SecurityClass::encode_mask(&[self.granted_key]));
        payload.extend_from_slice(&self.network_key);
        CommandRaw::new(
            CommandClasses::Security2.to_byte(),
            Security2Command::NetworkKeyReport.to_byte(),
            payload,
        )
    }
}

impl fmt::Debug for NetworkKeyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkKeyReport")
            .field("granted_key", &self.granted_key)
            .field("network_key", &"[redacted]")
            .finish()
    }
}

/// Prove possession of a just-received key by sending this encapsulated
/// under it. Empty payload.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NetworkKeyVerify;

impl NetworkKeyVerify {
    pub fn parse(_payload: &[u8]) -> Result<Self, PayloadError> {
        Ok(Self)
    }

    pub fn to_raw(&self) -> CommandRaw {
        CommandRaw::new(
            CommandClasses::Security2.to_byte(),
            Security2Command::NetworkKeyVerify.to_byte(),
            Vec::new(),
        )
    }
}

/// Close one key transfer (controller, `key_verified`) or the whole
/// exchange (node, `key_request_complete`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransferEnd {
    pub key_verified: bool,
    pub key_request_complete: bool,
}

impl TransferEnd {
    pub fn parse(payload: &[u8]) -> Result<Self, PayloadError> {
        let flags = *payload.first().ok_or(PayloadError::PayloadTooShort {
            expected: 1,
            got: 0,
        })?;
        Ok(Self {
            key_verified: flags & 0x02 != 0,
            key_request_complete: flags & 0x01 != 0,
        })
    }

    pub fn to_raw(&self) -> CommandRaw {
        let flags =
            (u8::from(self.key_verified) << 1) | u8::from(self.key_request_complete);
        CommandRaw::new(
            CommandClasses::Security2.to_byte(),
            Security2Command::TransferEnd.to_byte(),
            vec![flags],
        )
    }
}

// ============================================================================
// Supported Commands Query
// ============================================================================

/// Ask which CCs the node supports securely. Empty payload; always
/// encapsulated.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandsSupportedGet;

impl CommandsSupportedGet {
    pub fn parse(_payload: &[u8]) -> Result<Self, PayloadError> {
        Ok(Self)
    }

    pub fn to_raw(&self) -> CommandRaw {
        CommandRaw::new(
            CommandClasses::Security2.to_byte(),
            Security2Command::CommandsSupportedGet.to_byte(),
            Vec::new(),
        )
    }
}

/// The CCs a node supports (and controls) at the queried security class.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandsSupportedReport {
    pub cc_list: CcList,
}

impl CommandsSupportedReport {
    pub fn parse(payload: &[u8]) -> Result<Self, PayloadError> {
        Ok(Self {
            cc_list: parse_cc_list(payload),
        })
    }

    pub fn to_raw(&self) -> CommandRaw {
        CommandRaw::new(
            CommandClasses::Security2.to_byte(),
            Security2Command::CommandsSupportedReport.to_byte(),
            encode_cc_list(&self.cc_list),
        )
    }
}

// ============================================================================
// Echo Verification
// ============================================================================

/// Whether an echoed KEXReport/KEXSet equals the original serialization,
/// ignoring only the echo bit.
pub fn echo_matches(original: &CommandRaw, echoed: &CommandRaw) -> bool {
    if original.cc_id != echoed.cc_id
        || original.command != echoed.command
        || original.payload.len() != echoed.payload.len()
        || original.payload.is_empty()
    {
        return false;
    }
    if original.payload[0] | FLAG_ECHO != echoed.payload[0] | FLAG_ECHO {
        return false;
    }
    original.payload[1..] == echoed.payload[1..]
}

#[cfg(test)]
mod tests {
    use super::*;

    // ===== KEXReport / KEXSet Tests =====

    #[test]
    fn test_kex_report_roundtrip() {
        let report = KexReport {
            echo: false,
            request_csa: true,
            supported_schemes: vec![KexScheme::Scheme1],
            supported_profiles: vec![EcdhProfile::Curve25519],
            requested_keys: vec![
                SecurityClass::S2AccessControl,
                SecurityClass::S2Authenticated,
            ],
        };
        let raw = report.to_raw();
        assert_eq!(raw.payload, vec![0x02, 0x02, 0x01, 0x06]);
        assert_eq!(KexReport::parse(&raw.payload).unwrap(), report);
    }

    #[test]
    fn test_kex_set_roundtrip() {
        let set = KexSet {
            echo: true,
            permit_csa: false,
            selected_scheme: KexScheme::Scheme1,
            selected_profile: EcdhProfile::Curve25519,
            granted_keys: vec![SecurityClass::S2Authenticated],
        };
        let raw = set.to_raw();
        assert_eq!(raw.payload, vec![0x01, 0x02, 0x01, 0x02]);
        assert_eq!(KexSet::parse(&raw.payload).unwrap(), set);
    }

    #[test]
    fn test_kex_set_rejects_multiple_schemes() {
        // Two scheme bits set
        assert!(matches!(
            KexSet::parse(&[0x00, 0x06, 0x01, 0x02]),
            Err(PayloadError::InvalidField {
                field: "selected_scheme",
                ..
            })
        ));
        // Zero profile bits set
        assert!(matches!(
            KexSet::parse(&[0x00, 0x02, 0x00, 0x02]),
            Err(PayloadError::InvalidField {
                field: "selected_profile",
                ..
            })
        ));
    }

    #[test]
    fn test_kex_fail_roundtrip() {
        let fail = KexFail::new(KexFailReason::Decrypt);
        let raw = fail.to_raw();
        assert_eq!(raw.payload, vec![0x05]);
        assert_eq!(KexFail::parse(&raw.payload).unwrap(), fail);

        assert!(KexFail::parse(&[0x04]).is_err());
        assert!(KexFail::parse(&[]).is_err());
    }

    // ===== Public Key Tests =====

    #[test]
    fn test_public_key_report_roundtrip() {
        let report = PublicKeyReport {
            including_node: true,
            public_key: [0x5A; 32],
        };
        let raw = report.to_raw();
        assert_eq!(raw.payload.len(), 33);
        assert_eq!(raw.payload[0], 0x01);
        assert_eq!(PublicKeyReport::parse(&raw.payload).unwrap(), report);
    }

    // ===== Network Key Transfer Tests =====

    #[test]
    fn test_network_key_get_roundtrip() {
        let get = NetworkKeyGet {
            requested_key: SecurityClass::S2AccessControl,
        };
        let raw = get.to_raw();
        assert_eq!(raw.payload, vec![0x04]);
        assert_eq!(NetworkKeyGet::parse(&raw.payload).unwrap(), get);

        assert!(NetworkKeyGet::parse(&[0x05]).is_err());
        assert!(NetworkKeyGet::parse(&[0x00]).is_err());
    }

    #[test]
    fn test_network_key_report_roundtrip() {
        let report = NetworkKeyReport {
            granted_key: SecurityClass::S2Unauthenticated,
            network_key: [0x33; 16],
        };
        let raw = report.to_raw();
        assert_eq!(raw.payload.len(), 17);
        assert_eq!(raw.payload[0], 0x01);
        assert_eq!(NetworkKeyReport::parse(&raw.payload).unwrap(), report);
    }

    #[test]
    fn test_transfer_end_roundtrip() {
        let end = TransferEnd {
            key_verified: true,
            key_request_complete: false,
        };
        let raw = end.to_raw();
        assert_eq!(raw.payload, vec![0x02]);
        assert_eq!(TransferEnd::parse(&raw.payload).unwrap(), end);

        let end = TransferEnd {
            key_verified: false,
            key_request_complete: true,
        };
        assert_eq!(end.to_raw().payload, vec![0x01]);
    }

    // ===== Supported Commands Tests =====

    #[test]
    fn test_commands_supported_report_roundtrip() {
        let report = CommandsSupportedReport {
            cc_list: CcList {
                supported: vec![0x25, 0x80],
                controlled: vec![],
            },
        };
        let raw = report.to_raw();
        assert_eq!(raw.payload, vec![0x25, 0x80]);
        assert_eq!(CommandsSupportedReport::parse(&raw.payload).unwrap(), report);
    }

    // ===== Echo Verification Tests =====

    #[test]
    fn test_echo_matches_ignores_echo_bit() {
        let original = KexSet {
            echo: false,
            permit_csa: true,
            selected_scheme: KexScheme::Scheme1,
            selected_profile: EcdhProfile::Curve25519,
            granted_keys: vec![SecurityClass::S2Authenticated],
        };
        let mut echoed = original.clone();
        echoed.echo = true;

        assert!(echo_matches(&original.to_raw(), &echoed.to_raw()));
    }

    #[test]
    fn test_echo_mismatch_detected() {
        let original = KexSet {
            echo: false,
            permit_csa: false,
            selected_scheme: KexScheme::Scheme1,
            selected_profile: EcdhProfile::Curve25519,
            granted_keys: vec![SecurityClass::S2Authenticated],
        };

        // Different grant set
        let mut tampered = original.clone();
        tampered.echo = true;
        tampered.granted_keys = vec![SecurityClass::S2AccessControl];
        assert!(!echo_matches(&original.to_raw(), &tampered.to_raw()));

        // Different CSA bit (same byte as echo, different bit)
        let mut tampered = original.clone();
        tampered.echo = true;
        tampered.permit_csa = true;
        assert!(!echo_matches(&original.to_raw(), &tampered.to_raw()));
    }
}
