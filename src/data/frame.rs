use cookie_factory::{
    bytes::be_u32 as gen_be_u32, combinator::slice as gen_slice, SerializeFn,
};
use nom::{bytes::complete::take, combinator::map, number::complete::be_u32, IResult};
use std::io::Write;

use super::{Hash, TunnelId};

pub fn hash(i: &[u8]) -> IResult<&[u8], Hash> {
    map(take(32usize), |bytes: &[u8]| {
        Hash::from_bytes(array_ref![bytes, 0, 32])
    })(i)
}

pub fn gen_hash<'a, W: 'a + Write>(h: &'a Hash) -> impl SerializeFn<W> + 'a {
    gen_slice(&h.0)
}

pub fn tunnel_id(i: &[u8]) -> IResult<&[u8], TunnelId> {
    map(be_u32, TunnelId)(i)
}

pub fn gen_tunnel_id<W: Write>(tid: &TunnelId) -> impl SerializeFn<W> {
    gen_be_u32(tid.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::serialize;

    #[test]
    fn hash_round_trip() {
        let h = Hash([0xab; 32]);
        let bytes = serialize(gen_hash(&h));
        assert_eq!(hash(&bytes), Ok((&[][..], h)));
    }

    #[test]
    fn tunnel_id_round_trip() {
        let tid = TunnelId(0xdead_beef);
        let bytes = serialize(gen_tunnel_id(&tid));
        assert_eq!(bytes, vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(tunnel_id(&bytes), Ok((&[][..], tid)));
    }
}
