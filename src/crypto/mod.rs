//! Cryptographic primitives used by the tunnel layer.
//!
//! Only the symmetric side lives here: the AES core behind the per-hop layer
//! cipher and the variable-record reply cipher. The asymmetric sealing of
//! build request records (the ElGamal / ECIES-X25519 hybrid) belongs to the
//! router's crypto subsystem and is reached through [`RecordSealer`].

use aes::cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit};
use rand::{rngs::OsRng, RngCore};
use std::fmt;

use crate::data::RouterIdentity;

pub(crate) mod frame;

pub(crate) const AES_BLOCK_SIZE: usize = 16;

/// A symmetric key used for AES-256 and ChaCha20 operations.
#[derive(Clone)]
pub struct SessionKey(pub [u8; 32]);

impl SessionKey {
    pub fn from_bytes(buf: &[u8; 32]) -> Self {
        let mut x = [0u8; 32];
        x.copy_from_slice(buf);
        SessionKey(x)
    }

    /// A fresh key from the system's cryptographic RNG.
    pub fn generate() -> Self {
        let mut x = [0u8; 32];
        OsRng.fill_bytes(&mut x);
        SessionKey(x)
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        "SessionKey(..)".fmt(f)
    }
}

/// Crypto errors
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    InvalidKey,
    InvalidRecord,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidKey => "Invalid key material".fmt(f),
            Error::InvalidRecord => "Record cannot be sealed".fmt(f),
        }
    }
}

/// Seals one build request record toward a hop.
///
/// This is the seam behind which the asymmetric handshake lives: ElGamal for
/// variable records, ECIES-X25519 for short records. `sealed` is the record
/// slot minus the recipient prefix, and must be exactly
/// `clear.len() + overhead()` bytes.
pub trait RecordSealer: Send + Sync {
    /// Sealing overhead in bytes (ephemeral keys, MACs) within a record slot.
    fn overhead(&self) -> usize;

    fn seal(&self, to: &RouterIdentity, clear: &[u8], sealed: &mut [u8]) -> Result<(), Error>;
}

//
// Algorithm implementations
//

/// AES-256 in CBC mode, with the IV chained across calls on the same
/// instance in the manner of the transport ciphers.
pub(crate) struct Aes256 {
    cipher: aes::Aes256,
    iv_enc: [u8; AES_BLOCK_SIZE],
    iv_dec: [u8; AES_BLOCK_SIZE],
}

impl Aes256 {
    pub fn new(
        key: &SessionKey,
        iv_enc: &[u8; AES_BLOCK_SIZE],
        iv_dec: &[u8; AES_BLOCK_SIZE],
    ) -> Self {
        let mut iv_enc_copy = [0; AES_BLOCK_SIZE];
        let mut iv_dec_copy = [0; AES_BLOCK_SIZE];
        iv_enc_copy.copy_from_slice(iv_enc);
        iv_dec_copy.copy_from_slice(iv_dec);
        Aes256 {
            cipher: aes::Aes256::new(GenericArray::from_slice(&key.0)),
            iv_enc: iv_enc_copy,
            iv_dec: iv_dec_copy,
        }
    }

    fn encrypt(&self, block: &mut [u8; AES_BLOCK_SIZE]) {
        self.cipher
            .encrypt_block(GenericArray::from_mut_slice(block));
    }

    fn decrypt(&self, block: &mut [u8; AES_BLOCK_SIZE]) {
        self.cipher
            .decrypt_block(GenericArray::from_mut_slice(block));
    }

    pub fn encrypt_blocks(&mut self, buf: &mut [u8]) -> Option<usize> {
        // Wait until we have at least a block to encrypt
        if buf.len() < AES_BLOCK_SIZE {
            return None;
        }

        // Integer division, leaves extra bytes unencrypted at the end
        let end = buf.len() / AES_BLOCK_SIZE;
        for i in 0..end {
            // CBC mode, chained across calls
            for j in 0..AES_BLOCK_SIZE {
                if i == 0 {
                    buf[j] ^= self.iv_enc[j];
                } else {
                    buf[i * AES_BLOCK_SIZE + j] ^= buf[(i - 1) * AES_BLOCK_SIZE + j];
                }
            }
            self.encrypt(array_mut_ref![buf, i * AES_BLOCK_SIZE, AES_BLOCK_SIZE]);
        }
        // Copy ciphertext from the last block for use with the next call
        self.iv_enc
            .copy_from_slice(&buf[(end - 1) * AES_BLOCK_SIZE..end * AES_BLOCK_SIZE]);

        Some(end * AES_BLOCK_SIZE)
    }

    pub fn decrypt_blocks(&mut self, buf: &mut [u8]) -> Option<usize> {
        // Wait until we have at least a block to decrypt
        if buf.len() < AES_BLOCK_SIZE {
            return None;
        }

        // Integer division, leaves extra bytes undecrypted at the end
        let mut tmp_block = [0; AES_BLOCK_SIZE];
        let end = buf.len() / AES_BLOCK_SIZE;
        for i in 0..end {
            // Copy the block ciphertext for use in the next round
            tmp_block.copy_from_slice(&buf[i * AES_BLOCK_SIZE..(i + 1) * AES_BLOCK_SIZE]);
            // Decrypt the block
            self.decrypt(array_mut_ref![buf, i * AES_BLOCK_SIZE, AES_BLOCK_SIZE]);
            // CBC mode, chained across calls
            for j in 0..AES_BLOCK_SIZE {
                buf[i * AES_BLOCK_SIZE + j] ^= self.iv_dec[j];
            }
            // Swap for efficiency
            let tmp = self.iv_dec;
            self.iv_dec = tmp_block;
            tmp_block = tmp;
        }

        Some(end * AES_BLOCK_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestVector {
        key: SessionKey,
        plaintext: [u8; 16],
        ciphertext: [u8; 16],
    }

    #[test]
    fn aes_256_ecb_test_vectors() {
        // From https://csrc.nist.gov/CSRC/media/Projects/Cryptographic-Algorithm-Validation-Program/documents/aes/KAT_AES.zip
        // Source: http://csrc.nist.gov/groups/STM/cavp/block-ciphers.html
        let test_vectors = vec![
            TestVector {
                // ECBVarKey256 count 0
                key: SessionKey([
                    0x80, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
                    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
                    0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
                ]),
                plaintext: [
                    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
                    0x00, 0x00, 0x00,
                ],
                ciphertext: [
                    0xe3, 0x5a, 0x6d, 0xcb, 0x19, 0xb2, 0x01, 0xa0, 0x1e, 0xbc, 0xfa, 0x8a, 0xa2,
                    0x2b, 0x57, 0x59,
                ],
            },
            TestVector {
                // ECBVarKey256 count 255
                key: SessionKey([
                    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
                    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
                    0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
                ]),
                plaintext: [
                    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
                    0x00, 0x00, 0x00,
                ],
                ciphertext: [
                    0x4b, 0xf8, 0x5f, 0x1b, 0x5d, 0x54, 0xad, 0xbc, 0x30, 0x7b, 0x0a, 0x04, 0x83,
                    0x89, 0xad, 0xcb,
                ],
            },
        ];

        let unused = [0u8; AES_BLOCK_SIZE];
        for tv in test_vectors {
            let aes = Aes256::new(&tv.key, &unused, &unused);

            let mut block = tv.plaintext;
            aes.encrypt(&mut block);
            assert_eq!(block, tv.ciphertext);
            aes.decrypt(&mut block);
            assert_eq!(block, tv.plaintext);
        }
    }

    #[test]
    fn aes_256_cbc_round_trip() {
        let key = SessionKey([7; 32]);
        let iv = [3; AES_BLOCK_SIZE];

        let mut buf = [0u8; 64];
        for (i, b) in buf.iter_mut().enumerate() {
            *b = i as u8;
        }
        let orig = buf;

        let mut enc = Aes256::new(&key, &iv, &iv);
        assert_eq!(enc.encrypt_blocks(&mut buf), Some(64));
        assert!(buf[..] != orig[..]);

        let mut dec = Aes256::new(&key, &iv, &iv);
        assert_eq!(dec.decrypt_blocks(&mut buf), Some(64));
        assert_eq!(&buf[..], &orig[..]);
    }

    #[test]
    fn aes_256_cbc_chains_across_calls() {
        let key = SessionKey([9; 32]);
        let iv = [1; AES_BLOCK_SIZE];

        // One call over 32 bytes must equal two chained calls of 16.
        let mut whole = [0x5au8; 32];
        let mut split = [0x5au8; 32];

        let mut aes = Aes256::new(&key, &iv, &iv);
        aes.encrypt_blocks(&mut whole);

        let mut aes = Aes256::new(&key, &iv, &iv);
        aes.encrypt_blocks(&mut split[..16]);
        aes.encrypt_blocks(&mut split[16..]);

        assert_eq!(whole, split);
    }
}
