//! Common data types shared across the engine.

use data_encoding::BASE32;
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub(crate) mod frame;

//
// Simple data types
//

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    pub fn from_bytes(buf: &[u8; 32]) -> Self {
        let mut x = [0u8; 32];
        x.copy_from_slice(buf);
        Hash(x)
    }

    pub fn digest(buf: &[u8]) -> Self {
        let mut hasher = Sha256::default();
        hasher.update(buf);
        let hash = hasher.finalize();
        Hash::from_bytes(array_ref![hash.as_slice(), 0, 32])
    }

    pub fn xor(&mut self, other: &Hash) {
        for i in 0..32 {
            self.0[i] ^= other.0[i];
        }
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", BASE32.encode(&self.0))
    }
}

/// The number of milliseconds since midnight on January 1, 1970 in the GMT
/// timezone. If the number is 0, the date is undefined or null.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct I2PDate(pub u64);

impl I2PDate {
    pub fn from_system_time(t: SystemTime) -> Self {
        let d = t.duration_since(UNIX_EPOCH).unwrap_or(Duration::new(0, 0));
        I2PDate(d.as_secs() * 1_000 + u64::from(d.subsec_nanos() / 1_000_000))
    }
}

/// The local identifier of a tunnel: the id under which its next element
/// (or the local endpoint) receives messages.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct TunnelId(pub u32);

impl TunnelId {
    /// A fresh non-zero tunnel id from the cryptographic RNG.
    pub fn random() -> Self {
        loop {
            let tid = OsRng.next_u32();
            if tid != 0 {
                break TunnelId(tid);
            }
        }
    }
}

impl fmt::Display for TunnelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The identity of a router: its identity hash and the static encryption key
/// build request records are sealed toward.
#[derive(Clone, Debug, PartialEq)]
pub struct RouterIdentity {
    pub hash: Hash,
    pub enc_key: [u8; 32],
}

impl RouterIdentity {
    pub fn new(hash: Hash, enc_key: [u8; 32]) -> Self {
        RouterIdentity { hash, enc_key }
    }
}

/// Events the engine reports about a router's tunnel-building behaviour,
/// folded into that router's profile by the network database.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProfileEvent {
    /// The router answered a build request with the given reply code
    /// (0 = accepted).
    BuildResponse(u8),
    /// The router never answered a build request.
    NonReplied,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_digest() {
        // SHA-256 of the empty string
        assert_eq!(
            Hash::digest(b"").0,
            [
                0xe3, 0xb0, 0xc4, 0x42, 0x98, 0xfc, 0x1c, 0x14, 0x9a, 0xfb, 0xf4, 0xc8, 0x99,
                0x6f, 0xb9, 0x24, 0x27, 0xae, 0x41, 0xe4, 0x64, 0x9b, 0x93, 0x4c, 0xa4, 0x95,
                0x99, 0x1b, 0x78, 0x52, 0xb8, 0x55,
            ]
        );
    }

    #[test]
    fn hash_xor() {
        let mut a = Hash([0x0f; 32]);
        let b = Hash([0xff; 32]);
        a.xor(&b);
        assert_eq!(a, Hash([0xf0; 32]));
    }

    #[test]
    fn tunnel_id_random_is_nonzero() {
        for _ in 0..16 {
            assert_ne!(TunnelId::random().0, 0);
        }
    }
}
