use cookie_factory::{combinator::slice as gen_slice, SerializeFn};
use nom::{bytes::complete::take, combinator::map, IResult};
use std::io::Write;

use super::SessionKey;

pub fn session_key(i: &[u8]) -> IResult<&[u8], SessionKey> {
    map(take(32usize), |bytes: &[u8]| {
        SessionKey::from_bytes(array_ref![bytes, 0, 32])
    })(i)
}

pub fn gen_session_key<'a, W: 'a + Write>(key: &'a SessionKey) -> impl SerializeFn<W> + 'a {
    gen_slice(&key.0)
}

pub fn iv(i: &[u8]) -> IResult<&[u8], [u8; 16]> {
    map(take(16usize), |bytes: &[u8]| {
        let mut x = [0u8; 16];
        x.copy_from_slice(bytes);
        x
    })(i)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::serialize;

    #[test]
    fn session_key_round_trip() {
        let key = SessionKey([0x42; 32]);
        let bytes = serialize(gen_session_key(&key));
        assert_eq!(bytes.len(), 32);
        let (rest, parsed) = session_key(&bytes).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed.0, key.0);
    }
}
