//! CMAC-based key schedule (CKDF).
//!
//! Every key the S2 layer uses is expanded from a 16-byte source key with
//! AES-CMAC: the permanent network keys expand into the CCM key, the
//! multicast key and the DRBG personalization string; the bootstrap temp
//! key expands from the ECDH shared secret; and each SPAN seeds its DRBG
//! from a MEI expanded out of the exchanged entropy inputs.

use aes::Aes128;
use cmac::{Cmac, Mac};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Expansion constant for permanent network keys.
const CONSTANT_NK: [u8; 15] = [0x55; 15];

/// Expansion constant for the bootstrap temp key.
const CONSTANT_TE: [u8; 15] = [0x88; 15];

/// PRK constant for the temp-key extraction step.
const CONSTANT_PRK: [u8; 16] = [0x33; 16];

/// PRK constant for the nonce schedule.
const CONSTANT_NONCE: [u8; 16] = [0x26; 16];

/// Expansion constant for the MEI.
const CONSTANT_EI: [u8; 15] = [0x88; 15];

/// AES-CMAC over `data` under `key`.
fn cmac_aes128(key: &[u8; 16], data: &[u8]) -> [u8; 16] {
    let mut mac =
        Cmac::<Aes128>::new_from_slice(key).expect("AES-128 CMAC accepts 16-byte keys");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

// ============================================================================
// Derived Key Sets
// ============================================================================

/// Keys derived from one permanent network key (PNK).
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct NetworkKeys {
    /// The permanent network key itself.
    pub pnk: [u8; 16],
    /// Encryption/authentication key for AES-CCM.
    pub key_ccm: [u8; 16],
    /// Multicast (MPAN) key. Carried for completeness; multicast
    /// decryption is not implemented.
    pub key_mpan: [u8; 16],
    /// Personalization string for the SPAN CTR_DRBG.
    pub personalization_string: [u8; 32],
}

impl fmt::Debug for NetworkKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkKeys").field("pnk", &"[redacted]").finish()
    }
}

/// Keys derived from the bootstrap ECDH exchange.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct TempNetworkKeys {
    /// Encryption/authentication key for AES-CCM during bootstrap.
    pub key_ccm: [u8; 16],
    /// Personalization string for the temp SPAN CTR_DRBG.
    pub personalization_string: [u8; 32],
}

impl fmt::Debug for TempNetworkKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TempNetworkKeys")
            .field("key_ccm", &"[redacted]")
            .finish()
    }
}

// ============================================================================
// Derivations
// ============================================================================

/// CKDF-NetworkKey-Expand: derive the working key set from a PNK.
pub fn derive_network_keys(pnk: &[u8; 16]) -> NetworkKeys {
    let t1 = cmac_aes128(pnk, &concat(&[&CONSTANT_NK, &[0x01]]));
    let t2 = cmac_aes128(pnk, &concat(&[&t1, &CONSTANT_NK, &[0x02]]));
    let t3 = cmac_aes128(pnk, &concat(&[&t2, &CONSTANT_NK, &[0x03]]));
    let t4 = cmac_aes128(pnk, &concat(&[&t3, &CONSTANT_NK, &[0x04]]));

    let mut personalization_string = [0u8; 32];
    personalization_string[..16].copy_from_slice(&t3);
    personalization_string[16..].copy_from_slice(&t4);

    NetworkKeys {
        pnk: *pnk,
        key_ccm: t1,
        key_mpan: t2,
        personalization_string,
    }
}

/// CKDF-TempKey-Extract: PRK from the ECDH shared secret and both public
/// keys (A = including side, B = joining side).
pub fn compute_temp_prk(
    ecdh_shared_secret: &[u8; 32],
    public_key_a: &[u8; 32],
    public_key_b: &[u8; 32],
) -> [u8; 16] {
    cmac_aes128(
        &CONSTANT_PRK,
        &concat(&[ecdh_shared_secret, public_key_a, public_key_b]),
    )
}

/// CKDF-TempKey-Expand: derive the bootstrap key set from the temp PRK.
pub fn derive_temp_keys(temp_prk: &[u8; 16]) -> TempNetworkKeys {
    let t1 = cmac_aes128(temp_prk, &concat(&[&CONSTANT_TE, &[0x01]]));
    let t2 = cmac_aes128(temp_prk, &concat(&[&t1, &CONSTANT_TE, &[0x02]]));
    let t3 = cmac_aes128(temp_prk, &concat(&[&t2, &CONSTANT_TE, &[0x03]]));

    let mut personalization_string = [0u8; 32];
    personalization_string[..16].copy_from_slice(&t2);
    personalization_string[16..].copy_from_slice(&t3);

    TempNetworkKeys {
        key_ccm: t1,
        personalization_string,
    }
}

/// Nonce PRK from the two exchanged entropy inputs.
pub fn compute_nonce_prk(sender_ei: &[u8; 16], receiver_ei: &[u8; 16]) -> [u8; 16] {
    cmac_aes128(&CONSTANT_NONCE, &concat(&[sender_ei, receiver_ei]))
}

/// CKDF-MEI-Expand: the 32-byte Mixed Entropy Input seeding a SPAN DRBG.
pub fn derive_mei(nonce_prk: &[u8; 16]) -> [u8; 32] {
    let t1 = cmac_aes128(nonce_prk, &concat(&[&CONSTANT_EI, &[0x00], &[0x01]]));
    let t2 = cmac_aes128(nonce_prk, &concat(&[&t1, &CONSTANT_EI, &[0x02]]));

    let mut mei = [0u8; 32];
    mei[..16].copy_from_slice(&t1);
    mei[16..].copy_from_slice(&t2);
    mei
}

fn concat(parts: &[&[u8]]) -> Vec<u8> {
    let mut out = Vec::with_capacity(parts.iter().map(|p| p.len()).sum());
    for part in parts {
        out.extend_from_slice(part);
    }
    out
}
