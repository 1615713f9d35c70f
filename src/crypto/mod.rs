//! Crypto primitives for the S2 layer.
//!
//! Three building blocks, all on AES-128:
//! - CCM authenticated encryption for the encapsulated payload,
//! - CTR_DRBG for the pre-agreed nonce (SPAN) streams,
//! - CMAC-based CKDF for the key schedule.

mod ccm;
mod ckdf;
mod ctr_drbg;

pub use ccm::{
    decrypt_aes128_ccm, encrypt_aes128_ccm, CryptoError, CCM_NONCE_LENGTH,
    SECURITY_S2_AUTH_TAG_LENGTH,
};
pub use ckdf::{
    compute_nonce_prk, compute_temp_prk, derive_mei, derive_network_keys, derive_temp_keys,
    NetworkKeys, TempNetworkKeys,
};
pub use ctr_drbg::CtrDrbg;
