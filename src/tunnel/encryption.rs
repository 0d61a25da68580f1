//! Tunnel encryption operations.

use aes::cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit};
use chacha20::cipher::{KeyIvInit, StreamCipher};
use chacha20::ChaCha20;

use crate::constants::TUNNEL_DATA_MSG_SIZE;
use crate::crypto::{Aes256, SessionKey};

/// Implements layered encryption and decryption of tunnel-data messages.
///
/// The 16-byte IV at the front of the message is transformed with AES-256/ECB
/// under the IV key before and after the body is run through AES-256/CBC
/// under the layer key, so that no hop sees the IV another hop saw.
#[derive(Clone)]
pub struct LayerCipher {
    iv_cipher: aes::Aes256,
    layer_key: SessionKey,
}

impl LayerCipher {
    /// Create a `LayerCipher` for the tunnel hop with the given IV and layer
    /// keys.
    pub fn new(iv_key: &SessionKey, layer_key: SessionKey) -> Self {
        LayerCipher {
            iv_cipher: aes::Aes256::new(GenericArray::from_slice(&iv_key.0)),
            layer_key,
        }
    }

    /// Encrypt the data of a tunnel-data message using the IV and layer keys
    /// for this hop. This is what the hop itself applies in flight.
    pub fn encrypt_layer(&self, data: &mut [u8; TUNNEL_DATA_MSG_SIZE]) {
        // Encrypt the received IV with AES256/ECB using the IV key to determine the current IV
        self.iv_cipher
            .encrypt_block(GenericArray::from_mut_slice(&mut data[0..16]));

        // Use that IV with the layer key to encrypt the data
        let iv = *array_ref![data, 0, 16];
        let mut cipher = Aes256::new(&self.layer_key, &iv, &[0; 16]);
        assert_eq!(cipher.encrypt_blocks(&mut data[16..]), Some(1008));

        // Encrypt the current IV with AES256/ECB using the IV key again
        self.iv_cipher
            .encrypt_block(GenericArray::from_mut_slice(&mut data[0..16]));
    }

    /// Decrypt the data of a tunnel-data message using the IV and layer keys
    /// for this hop.
    ///
    /// Used by the tunnel creator to preprocess outgoing messages on an
    /// outbound tunnel, and to postprocess incoming messages on an inbound
    /// one.
    pub fn decrypt_layer(&self, data: &mut [u8; TUNNEL_DATA_MSG_SIZE]) {
        // Decrypt the received IV with AES256/ECB using the IV key to determine the current IV
        self.iv_cipher
            .decrypt_block(GenericArray::from_mut_slice(&mut data[0..16]));

        // Use that IV with the layer key to decrypt the data
        let iv = *array_ref![data, 0, 16];
        let mut cipher = Aes256::new(&self.layer_key, &[0; 16], &iv);
        assert_eq!(cipher.decrypt_blocks(&mut data[16..]), Some(1008));

        // Decrypt the current IV with AES256/ECB using the IV key again
        self.iv_cipher
            .decrypt_block(GenericArray::from_mut_slice(&mut data[0..16]));
    }
}

/// The symmetric transform a hop applies to every record slot of a build
/// message it has processed, and that the builder applies in reverse during
/// the pre-obfuscation pass and the reply peel.
///
/// Variable records use AES-256/CBC under the hop's reply key and IV, fresh
/// on every call. Short records use a ChaCha20 keystream whose nonce carries
/// the slot index, so the same slot transforms identically in both
/// directions.
#[derive(Clone)]
pub enum ReplyCipher {
    Cbc { key: SessionKey, iv: [u8; 16] },
    ChaCha { key: SessionKey },
}

impl ReplyCipher {
    /// Removes one application of the hop's reply transform from a record.
    pub fn decrypt(&self, record: &mut [u8], idx: usize) {
        match self {
            ReplyCipher::Cbc { key, iv } => {
                let mut cipher = Aes256::new(key, iv, iv);
                cipher.decrypt_blocks(record);
            }
            ReplyCipher::ChaCha { key } => Self::chacha(key, record, idx),
        }
    }

    /// Applies the hop's reply transform to a record, as the hop does in
    /// flight.
    pub fn encrypt(&self, record: &mut [u8], idx: usize) {
        match self {
            ReplyCipher::Cbc { key, iv } => {
                let mut cipher = Aes256::new(key, iv, iv);
                cipher.encrypt_blocks(record);
            }
            ReplyCipher::ChaCha { key } => Self::chacha(key, record, idx),
        }
    }

    fn chacha(key: &SessionKey, record: &mut [u8], idx: usize) {
        let mut nonce = [0u8; 12];
        nonce[4] = idx as u8;
        let mut cipher = ChaCha20::new((&key.0).into(), (&nonce).into());
        cipher.apply_keystream(record);
    }
}

#[cfg(test)]
mod tests {
    use super::{LayerCipher, ReplyCipher};
    use crate::constants::{SHORT_TUNNEL_BUILD_RECORD_SIZE, TUNNEL_BUILD_RECORD_SIZE};
    use crate::crypto::SessionKey;

    #[test]
    fn layer_round_trip() {
        let iv_key = SessionKey([1; 32]);
        let layer_key = SessionKey([2; 32]);

        let mut data = [0u8; 1024];

        let cipher = LayerCipher::new(&iv_key, layer_key);

        cipher.encrypt_layer(&mut data);
        assert!(data[..] != [0; 1024][..]);
        cipher.decrypt_layer(&mut data);
        assert_eq!(&data[..], &[0; 1024][..]);

        cipher.decrypt_layer(&mut data);
        assert!(data[..] != [0; 1024][..]);
        cipher.encrypt_layer(&mut data);
        assert_eq!(&data[..], &[0; 1024][..]);
    }

    #[test]
    fn layered_peel_in_reverse_order() {
        // Three hops encrypt in chain order; peeling in reverse recovers the
        // plaintext.
        let hops: Vec<LayerCipher> = (0..3)
            .map(|i| LayerCipher::new(&SessionKey([i; 32]), SessionKey([i + 10; 32])))
            .collect();

        let mut data = [0x77u8; 1024];
        for hop in &hops {
            hop.encrypt_layer(&mut data);
        }
        for hop in hops.iter().rev() {
            hop.decrypt_layer(&mut data);
        }
        assert_eq!(&data[..], &[0x77; 1024][..]);
    }

    #[test]
    fn reply_cipher_cbc_round_trip() {
        let cipher = ReplyCipher::Cbc {
            key: SessionKey([3; 32]),
            iv: [4; 16],
        };
        let mut record = [0x5au8; TUNNEL_BUILD_RECORD_SIZE];
        cipher.encrypt(&mut record, 2);
        assert!(record[..] != [0x5a; TUNNEL_BUILD_RECORD_SIZE][..]);
        cipher.decrypt(&mut record, 2);
        assert_eq!(&record[..], &[0x5a; TUNNEL_BUILD_RECORD_SIZE][..]);
    }

    #[test]
    fn reply_cipher_chacha_round_trip() {
        let cipher = ReplyCipher::ChaCha {
            key: SessionKey([5; 32]),
        };
        let mut record = [0xc3u8; SHORT_TUNNEL_BUILD_RECORD_SIZE];
        cipher.encrypt(&mut record, 6);
        assert!(record[..] != [0xc3; SHORT_TUNNEL_BUILD_RECORD_SIZE][..]);
        cipher.decrypt(&mut record, 6);
        assert_eq!(&record[..], &[0xc3; SHORT_TUNNEL_BUILD_RECORD_SIZE][..]);
    }

    #[test]
    fn reply_cipher_chacha_depends_on_slot() {
        let cipher = ReplyCipher::ChaCha {
            key: SessionKey([5; 32]),
        };
        let mut a = [0u8; SHORT_TUNNEL_BUILD_RECORD_SIZE];
        let mut b = [0u8; SHORT_TUNNEL_BUILD_RECORD_SIZE];
        cipher.encrypt(&mut a, 0);
        cipher.encrypt(&mut b, 1);
        assert!(a[..] != b[..]);
    }
}
