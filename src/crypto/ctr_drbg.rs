//! AES-128 CTR_DRBG for the SPAN nonce streams.
//!
//! NIST SP 800-90A CTR_DRBG without a derivation function and without
//! prediction resistance: seedlen = keylen + blocklen = 32 bytes, the seed
//! material is the entropy input XORed with the personalization string.
//! Both SPAN peers instantiate from the same seed material and stay in
//! lockstep by drawing one block per nonce.

use aes::cipher::{BlockEncrypt, KeyInit};
use aes::{Aes128, Block};
use std::fmt;

/// Seed length for AES-128 CTR_DRBG without derivation function.
const SEED_LEN: usize = 32;

/// Deterministic random bit generator backing one SPAN.
#[derive(Clone, PartialEq, Eq)]
pub struct CtrDrbg {
    key: [u8; 16],
    v: [u8; 16],
}

impl CtrDrbg {
    /// Instantiate from a 32-byte entropy input and a 32-byte
    /// personalization string.
    pub fn new(entropy_input: &[u8; SEED_LEN], personalization: &[u8; SEED_LEN]) -> Self {
        let mut seed_material = [0u8; SEED_LEN];
        for i in 0..SEED_LEN {
            seed_material[i] = entropy_input[i] ^ personalization[i];
        }

        let mut drbg = Self {
            key: [0u8; 16],
            v: [0u8; 16],
        };
        drbg.update(&seed_material);
        drbg
    }

    /// Generate one 16-byte block of output, then rekey per the
    /// generate-function's trailing update with zero additional input.
    pub fn generate_16(&mut self) -> [u8; 16] {
        let cipher = Aes128::new(&self.key.into());

        self.increment_v();
        let mut block = Block::clone_from_slice(&self.v);
        cipher.encrypt_block(&mut block);

        let mut output = [0u8; 16];
        output.copy_from_slice(&block);

        self.update(&[0u8; SEED_LEN]);
        output
    }

    /// CTR_DRBG_Update: clock two blocks of the counter keystream and XOR
    /// in the provided data to form the next (key, V).
    fn update(&mut self, provided_data: &[u8; SEED_LEN]) {
        let cipher = Aes128::new(&self.key.into());
        let mut temp = [0u8; SEED_LEN];

        for chunk in temp.chunks_mut(16) {
            self.increment_v();
            let mut block = Block::clone_from_slice(&self.v);
            cipher.encrypt_block(&mut block);
            chunk.copy_from_slice(&block);
        }

        for i in 0..SEED_LEN {
            temp[i] ^= provided_data[i];
        }

        self.key.copy_from_slice(&temp[..16]);
        self.v.copy_from_slice(&temp[16..]);
    }

    /// Increment V as a big-endian 128-bit counter.
    fn increment_v(&mut self) {
        for byte in self.v.iter_mut().rev() {
            let (next, overflow) = byte.overflowing_add(1);
            *byte = next;
            if !overflow {
                break;
            }
        }
    }
}

impl fmt::Debug for CtrDrbg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CtrDrbg")
            .field("key", &"[redacted]")
            .field("v", &"[redacted]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic_stream() {
        let entropy = [0xAB; 32];
        let pstring = [0x12; 32];

        let mut a = CtrDrbg::new(&entropy, &pstring);
        let mut b = CtrDrbg::new(&entropy, &pstring);

        for _ in 0..8 {
            assert_eq!(a.generate_16(), b.generate_16());
        }
    }

    #[test]
    fn test_output_advances() {
        let mut drbg = CtrDrbg::new(&[0x01; 32], &[0x00; 32]);
        let first = drbg.generate_16();
        let second = drbg.generate_16();
        assert_ne!(first, second);
    }

    #[test]
    fn test_entropy_changes_stream() {
        let mut a = CtrDrbg::new(&[0x01; 32], &[0x00; 32]);
        let mut b = CtrDrbg::new(&[0x02; 32], &[0x00; 32]);
        assert_ne!(a.generate_16(), b.generate_16());
    }

    #[test]
    fn test_personalization_changes_stream() {
        let mut a = CtrDrbg::new(&[0x01; 32], &[0x10; 32]);
        let mut b = CtrDrbg::new(&[0x01; 32], &[0x20; 32]);
        assert_ne!(a.generate_16(), b.generate_16());
    }

    #[test]
    fn test_clone_preserves_position() {
        let mut drbg = CtrDrbg::new(&[0x55; 32], &[0xAA; 32]);
        drbg.generate_16();

        let mut snapshot = drbg.clone();
        assert_eq!(drbg.generate_16(), snapshot.generate_16());
    }

    #[test]
    fn test_increment_v_carries() {
        let mut drbg = CtrDrbg {
            key: [0; 16],
            v: [0xFF; 16],
        };
        drbg.increment_v();
        assert_eq!(drbg.v, [0x00; 16]);

        let mut drbg = CtrDrbg {
            key: [0; 16],
            v: {
                let mut v = [0u8; 16];
                v[15] = 0xFF;
                v
            },
        };
        drbg.increment_v();
        assert_eq!(drbg.v[15], 0x00);
        assert_eq!(drbg.v[14], 0x01);
    }
}
