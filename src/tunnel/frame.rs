use cookie_factory::{
    bytes::{be_u16 as gen_be_u16, be_u32 as gen_be_u32, be_u8 as gen_be_u8},
    combinator::slice as gen_slice,
    sequence::tuple as gen_tuple,
    SerializeFn, WriteContext,
};
use nom::{
    bytes::complete::{take, take_until},
    combinator::{complete, cond, map, peek},
    error::{Error as NomError, ErrorKind},
    multi::{length_data, many0},
    number::complete::{be_u16, be_u32, be_u8},
    sequence::pair,
    Err, IResult,
};
use sha2::{Digest, Sha256};
use std::io::Write;

use super::gateway::{
    FirstFragmentDeliveryInstructions, FollowOnFragmentDeliveryInstructions, TunnelMessage,
    TunnelMessageDeliveryInstructions, TunnelMessageDeliveryType,
};
use crate::constants::TUNNEL_DATA_MAX_PAYLOAD_SIZE;
use crate::data::frame::{gen_hash, gen_tunnel_id, hash, tunnel_id};

// Checksum

pub(super) fn checksum(buf: &[u8], iv: &[u8]) -> u32 {
    let mut hasher = Sha256::default();
    hasher.update(buf);
    hasher.update(iv);
    let mut cs = [0; 4];
    cs.copy_from_slice(&hasher.finalize()[0..4]);
    u32::from_be_bytes(cs)
}

// FirstFragmentDeliveryInstructions

const DELIVERY_TYPE_LOCAL: u8 = 0;
const DELIVERY_TYPE_TUNNEL: u8 = 1;
const DELIVERY_TYPE_ROUTER: u8 = 2;

fn first_frag_di(i: &[u8]) -> IResult<&[u8], FirstFragmentDeliveryInstructions> {
    let (i, flags) = be_u8(i)?;
    let fragmented = flags & 0b0000_1000 != 0;

    let (i, delivery_type) = match (flags & 0b0110_0000) >> 5 {
        DELIVERY_TYPE_LOCAL => Ok((i, TunnelMessageDeliveryType::Local)),
        DELIVERY_TYPE_TUNNEL => map(pair(tunnel_id, hash), |(tid, to)| {
            TunnelMessageDeliveryType::Tunnel(tid, to)
        })(i),
        DELIVERY_TYPE_ROUTER => map(hash, TunnelMessageDeliveryType::Router)(i),
        _ => Err(Err::Error(NomError::new(i, ErrorKind::Char))),
    }?;

    let (i, msg_id) = cond(fragmented, be_u32)(i)?;

    Ok((
        i,
        FirstFragmentDeliveryInstructions {
            delivery_type,
            msg_id,
        },
    ))
}

fn gen_first_frag_di<'a, W: 'a + Write>(
    di: &'a FirstFragmentDeliveryInstructions,
) -> impl SerializeFn<W> + 'a {
    let mut flags = 0;
    flags |= (match di.delivery_type {
        TunnelMessageDeliveryType::Local => DELIVERY_TYPE_LOCAL,
        TunnelMessageDeliveryType::Tunnel(_, _) => DELIVERY_TYPE_TUNNEL,
        TunnelMessageDeliveryType::Router(_) => DELIVERY_TYPE_ROUTER,
    } << 5)
        & 0b0110_0000;
    if di.msg_id.is_some() {
        flags |= 0b0000_1000;
    }
    move |mut w: WriteContext<W>| {
        w = gen_be_u8(flags)(w)?;
        match &di.delivery_type {
            TunnelMessageDeliveryType::Local => (),
            TunnelMessageDeliveryType::Tunnel(tid, to) => {
                w = gen_tunnel_id(tid)(w)?;
                w = gen_hash(to)(w)?;
            }
            TunnelMessageDeliveryType::Router(to) => {
                w = gen_hash(to)(w)?;
            }
        }
        if let Some(msg_id) = di.msg_id {
            w = gen_be_u32(msg_id)(w)?;
        }
        Ok(w)
    }
}

// FollowOnFragmentDeliveryInstructions

fn follow_on_frag_di(i: &[u8]) -> IResult<&[u8], FollowOnFragmentDeliveryInstructions> {
    let (i, flags) = be_u8(i)?;
    let (i, msg_id) = be_u32(i)?;
    Ok((
        i,
        FollowOnFragmentDeliveryInstructions {
            fragment_number: (flags >> 1) & 0b011_1111,
            last_fragment: flags & 0b1 != 0,
            msg_id,
        },
    ))
}

fn gen_follow_on_frag_di<'a, W: 'a + Write>(
    di: &'a FollowOnFragmentDeliveryInstructions,
) -> impl SerializeFn<W> + 'a {
    let mut flags = 0b1000_0000;
    flags |= (di.fragment_number << 1) & 0b0111_1110;
    if di.last_fragment {
        flags |= 0b1;
    }
    move |w: WriteContext<W>| gen_tuple((gen_be_u8(flags), gen_be_u32(di.msg_id)))(w)
}

// TunnelMessageDeliveryInstructions

fn tmdi(i: &[u8]) -> IResult<&[u8], TunnelMessageDeliveryInstructions> {
    let (_, flags) = peek(be_u8)(i)?;
    if flags & 0b1000_0000 == 0 {
        map(first_frag_di, TunnelMessageDeliveryInstructions::First)(i)
    } else {
        map(follow_on_frag_di, TunnelMessageDeliveryInstructions::FollowOn)(i)
    }
}

fn gen_tmdi<'a, W: 'a + Write>(
    tmdi: &'a TunnelMessageDeliveryInstructions,
) -> impl SerializeFn<W> + 'a {
    move |w: WriteContext<W>| match tmdi {
        TunnelMessageDeliveryInstructions::First(di) => gen_first_frag_di(di)(w),
        TunnelMessageDeliveryInstructions::FollowOn(di) => gen_follow_on_frag_di(di)(w),
    }
}

/// One delivery-instruction + length-prefixed fragment entry, the unit the
/// gateway appends to a tunnel-data message under construction.
pub(super) fn gen_tmdi_fragment_pair<'a, W: 'a + Write>(
    di: &'a TunnelMessageDeliveryInstructions,
    frag: &'a [u8],
) -> impl SerializeFn<W> + 'a {
    move |w: WriteContext<W>| {
        gen_tuple((gen_tmdi(di), gen_be_u16(frag.len() as u16), gen_slice(frag)))(w)
    }
}

// TunnelMessage

pub(crate) fn tunnel_message(i: &[u8]) -> IResult<&[u8], TunnelMessage<'_>> {
    let (i, iv) = take(16usize)(i)?;
    let (i, cs) = be_u32(i)?;
    let (i, padding) = take_until(&b"\x00"[..])(i)?;
    let (i, _) = take(1usize)(i)?;
    let (_, msg_bytes) = peek(take(TUNNEL_DATA_MAX_PAYLOAD_SIZE - padding.len()))(i)?;
    if cs != checksum(msg_bytes, iv) {
        return Err(Err::Error(NomError::new(i, ErrorKind::Verify)));
    }
    let (i, msg) = many0(complete(pair(tmdi, length_data(be_u16))))(i)?;
    Ok((i, TunnelMessage(msg)))
}
