use cookie_factory::{
    bytes::{be_u16 as gen_be_u16, be_u32 as gen_be_u32, be_u64 as gen_be_u64, be_u8 as gen_be_u8},
    combinator::slice as gen_slice,
    sequence::tuple as gen_tuple,
    SerializeFn, WriteContext,
};
use nom::{
    bytes::complete::take,
    combinator::{map, rest},
    error::{Error as NomError, ErrorKind},
    number::complete::{be_u16, be_u32, be_u64, be_u8},
    sequence::tuple,
    Err, IResult,
};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use std::io::Write;

use super::*;
use crate::constants::{SHORT_TUNNEL_BUILD_RECORD_SIZE, TUNNEL_BUILD_RECORD_SIZE};
use crate::crypto::frame::{gen_session_key, iv, session_key};
use crate::data::frame::{gen_hash, gen_tunnel_id, hash, tunnel_id};
use crate::util::serialize;

//
// Message type codes
//

const MSG_TYPE_TUNNEL_DATA: u8 = 18;
const MSG_TYPE_TUNNEL_GATEWAY: u8 = 19;
const MSG_TYPE_DATA: u8 = 20;
const MSG_TYPE_TUNNEL_BUILD: u8 = 21;
const MSG_TYPE_TUNNEL_BUILD_REPLY: u8 = 22;
const MSG_TYPE_VARIABLE_TUNNEL_BUILD: u8 = 23;
const MSG_TYPE_VARIABLE_TUNNEL_BUILD_REPLY: u8 = 24;
const MSG_TYPE_SHORT_TUNNEL_BUILD: u8 = 25;
const MSG_TYPE_SHORT_TUNNEL_BUILD_REPLY: u8 = 26;

/// Number of records in a deprecated fixed-size build message.
const LEGACY_NUM_RECORDS: usize = 8;

//
// Common structures
//

/// Serialized length of the fields of a build request record, before padding.
pub(crate) const BUILD_REQUEST_RECORD_LEN: usize = 193;

const FLAG_INBOUND_GATEWAY: u8 = 0b1000_0000;
const FLAG_OUTBOUND_ENDPOINT: u8 = 0b0100_0000;

pub fn build_request_record(i: &[u8]) -> IResult<&[u8], BuildRequestRecord> {
    let (i, (receive_tid, our_ident, next_tid, next_ident)) =
        tuple((tunnel_id, hash, tunnel_id, hash))(i)?;
    let (i, (layer_key, iv_key, reply_key, reply_iv)) =
        tuple((session_key, session_key, session_key, iv))(i)?;
    let (i, flags) = be_u8(i)?;
    let hop_type = match flags {
        0 => ParticipantType::Intermediate,
        FLAG_INBOUND_GATEWAY => ParticipantType::InboundGateway,
        FLAG_OUTBOUND_ENDPOINT => ParticipantType::OutboundEndpoint,
        _ => return Err(Err::Error(NomError::new(i, ErrorKind::Verify))),
    };
    let (i, (request_time, send_msg_id)) = tuple((be_u32, be_u32))(i)?;
    Ok((
        i,
        BuildRequestRecord {
            receive_tid,
            our_ident,
            next_tid,
            next_ident,
            layer_key,
            iv_key,
            reply_key,
            reply_iv,
            hop_type,
            request_time,
            send_msg_id,
        },
    ))
}

/// Generates a build request record, padded with random bytes to
/// `BUILD_REQUEST_RECORD_LEN + padding_len`.
pub fn gen_build_request_record<'a, W: 'a + Write>(
    brr: &'a BuildRequestRecord,
    padding_len: usize,
) -> impl SerializeFn<W> + 'a {
    let flags: u8 = match brr.hop_type {
        ParticipantType::Intermediate => 0,
        ParticipantType::InboundGateway => FLAG_INBOUND_GATEWAY,
        ParticipantType::OutboundEndpoint => FLAG_OUTBOUND_ENDPOINT,
    };
    let mut padding = vec![0; padding_len];
    OsRng.fill_bytes(&mut padding);
    move |w: WriteContext<W>| {
        gen_tuple((
            gen_tunnel_id(&brr.receive_tid),
            gen_hash(&brr.our_ident),
            gen_tunnel_id(&brr.next_tid),
            gen_hash(&brr.next_ident),
            gen_session_key(&brr.layer_key),
            gen_session_key(&brr.iv_key),
            gen_session_key(&brr.reply_key),
            gen_slice(&brr.reply_iv),
            gen_be_u8(flags),
            gen_be_u32(brr.request_time),
            gen_be_u32(brr.send_msg_id),
            gen_slice(&padding),
        ))(w)
    }
}

//
// Message payloads
//

fn tunnel_data(i: &[u8]) -> IResult<&[u8], MessagePayload> {
    map(tuple((tunnel_id, take(1024usize))), |(tid, data)| {
        MessagePayload::TunnelData(TunnelData::from(tid, array_ref![data, 0, 1024]))
    })(i)
}

fn tunnel_gateway(i: &[u8]) -> IResult<&[u8], MessagePayload> {
    let (i, tid) = tunnel_id(i)?;
    let (i, len) = be_u16(i)?;
    let (i, data) = take(len)(i)?;
    Ok((
        i,
        MessagePayload::TunnelGateway(TunnelGateway {
            tid,
            data: data.to_vec(),
        }),
    ))
}

fn build_records(record_size: usize) -> impl Fn(&[u8]) -> IResult<&[u8], BuildRecords> {
    move |i| {
        let (i, count) = be_u8(i)?;
        let (i, data) = take(count as usize * record_size)(i)?;
        let mut buf = Vec::with_capacity(1 + data.len());
        buf.push(count);
        buf.extend_from_slice(data);
        Ok((i, BuildRecords(buf)))
    }
}

fn legacy_build_records(i: &[u8]) -> IResult<&[u8], BuildRecords> {
    let (i, data) = take(LEGACY_NUM_RECORDS * TUNNEL_BUILD_RECORD_SIZE)(i)?;
    let mut buf = Vec::with_capacity(1 + data.len());
    buf.push(LEGACY_NUM_RECORDS as u8);
    buf.extend_from_slice(data);
    Ok((i, BuildRecords(buf)))
}

fn payload(msg_type: u8, i: &[u8]) -> IResult<&[u8], MessagePayload> {
    match msg_type {
        MSG_TYPE_TUNNEL_DATA => tunnel_data(i),
        MSG_TYPE_TUNNEL_GATEWAY => tunnel_gateway(i),
        MSG_TYPE_DATA => map(rest, |d: &[u8]| MessagePayload::Data(d.to_vec()))(i),
        MSG_TYPE_SHORT_TUNNEL_BUILD => map(
            build_records(SHORT_TUNNEL_BUILD_RECORD_SIZE),
            MessagePayload::ShortTunnelBuild,
        )(i),
        MSG_TYPE_SHORT_TUNNEL_BUILD_REPLY => map(
            build_records(SHORT_TUNNEL_BUILD_RECORD_SIZE),
            MessagePayload::ShortTunnelBuildReply,
        )(i),
        MSG_TYPE_VARIABLE_TUNNEL_BUILD => map(
            build_records(TUNNEL_BUILD_RECORD_SIZE),
            MessagePayload::VariableTunnelBuild,
        )(i),
        MSG_TYPE_VARIABLE_TUNNEL_BUILD_REPLY => map(
            build_records(TUNNEL_BUILD_RECORD_SIZE),
            MessagePayload::VariableTunnelBuildReply,
        )(i),
        MSG_TYPE_TUNNEL_BUILD => map(legacy_build_records, MessagePayload::TunnelBuild)(i),
        MSG_TYPE_TUNNEL_BUILD_REPLY => {
            map(legacy_build_records, MessagePayload::TunnelBuildReply)(i)
        }
        _ => Err(Err::Error(NomError::new(i, ErrorKind::Switch))),
    }
}

fn msg_type(payload: &MessagePayload) -> u8 {
    match payload {
        MessagePayload::TunnelData(_) => MSG_TYPE_TUNNEL_DATA,
        MessagePayload::TunnelGateway(_) => MSG_TYPE_TUNNEL_GATEWAY,
        MessagePayload::ShortTunnelBuild(_) => MSG_TYPE_SHORT_TUNNEL_BUILD,
        MessagePayload::ShortTunnelBuildReply(_) => MSG_TYPE_SHORT_TUNNEL_BUILD_REPLY,
        MessagePayload::VariableTunnelBuild(_) => MSG_TYPE_VARIABLE_TUNNEL_BUILD,
        MessagePayload::VariableTunnelBuildReply(_) => MSG_TYPE_VARIABLE_TUNNEL_BUILD_REPLY,
        MessagePayload::TunnelBuild(_) => MSG_TYPE_TUNNEL_BUILD,
        MessagePayload::TunnelBuildReply(_) => MSG_TYPE_TUNNEL_BUILD_REPLY,
        MessagePayload::Data(_) => MSG_TYPE_DATA,
    }
}

pub(crate) fn serialize_payload(payload: &MessagePayload) -> Vec<u8> {
    match payload {
        MessagePayload::TunnelData(td) => serialize(gen_tuple((
            gen_tunnel_id(&td.tid),
            gen_slice(&td.data[..]),
        ))),
        MessagePayload::TunnelGateway(tg) => serialize(gen_tuple((
            gen_tunnel_id(&tg.tid),
            gen_be_u16(tg.data.len() as u16),
            gen_slice(&tg.data),
        ))),
        MessagePayload::ShortTunnelBuild(r)
        | MessagePayload::ShortTunnelBuildReply(r)
        | MessagePayload::VariableTunnelBuild(r)
        | MessagePayload::VariableTunnelBuildReply(r) => r.0.clone(),
        // The deprecated format carries no record count on the wire.
        MessagePayload::TunnelBuild(r) | MessagePayload::TunnelBuildReply(r) => r.0[1..].to_vec(),
        MessagePayload::Data(d) => d.clone(),
    }
}

//
// Messages
//

pub fn message(i: &[u8]) -> IResult<&[u8], Message> {
    let (i, (mtype, id, expiration, len, chks)) =
        tuple((be_u8, be_u32, be_u64, be_u16, be_u8))(i)?;
    let (i, payload_bytes) = take(len)(i)?;
    if Sha256::digest(payload_bytes)[0] != chks {
        return Err(Err::Error(NomError::new(i, ErrorKind::Verify)));
    }
    let (_, payload) = payload(mtype, payload_bytes)?;
    Ok((
        i,
        Message {
            id,
            expiration: I2PDate(expiration),
            payload,
            on_drop: None,
        },
    ))
}

pub fn gen_message<'a, W: 'a + Write>(msg: &'a Message) -> impl SerializeFn<W> + 'a {
    let payload = serialize_payload(&msg.payload);
    let chks = Sha256::digest(&payload)[0];
    move |w: WriteContext<W>| {
        gen_tuple((
            gen_be_u8(msg_type(&msg.payload)),
            gen_be_u32(msg.id),
            gen_be_u64(msg.expiration.0),
            gen_be_u16(payload.len() as u16),
            gen_be_u8(chks),
            gen_slice(&payload),
        ))(w)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::SessionKey;

    fn check_round_trip(msg: Message) {
        let bytes = serialize(gen_message(&msg));
        assert_eq!(msg.byte_len(), bytes.len());
        let (rest, parsed) = message(&bytes).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, msg);
        match (&parsed.payload, &msg.payload) {
            (MessagePayload::TunnelData(a), MessagePayload::TunnelData(b)) => {
                assert_eq!(a.tid, b.tid);
                assert_eq!(&a.data[..], &b.data[..]);
            }
            (MessagePayload::TunnelGateway(a), MessagePayload::TunnelGateway(b)) => {
                assert_eq!(a.tid, b.tid);
                assert_eq!(a.data, b.data);
            }
            (MessagePayload::ShortTunnelBuild(a), MessagePayload::ShortTunnelBuild(b)) => {
                assert_eq!(a, b);
            }
            (MessagePayload::Data(a), MessagePayload::Data(b)) => assert_eq!(a, b),
            _ => (),
        }
    }

    #[test]
    fn tunnel_data_round_trip() {
        let mut data = [0u8; 1024];
        for (i, b) in data.iter_mut().enumerate() {
            *b = i as u8;
        }
        check_round_trip(Message::from_payload(MessagePayload::TunnelData(
            TunnelData::from(TunnelId(77), &data),
        )));
    }

    #[test]
    fn tunnel_gateway_round_trip() {
        check_round_trip(Message::from_payload(MessagePayload::TunnelGateway(
            TunnelGateway {
                tid: TunnelId(12),
                data: vec![1, 2, 3, 4, 5],
            },
        )));
    }

    #[test]
    fn short_tunnel_build_round_trip() {
        let mut records = vec![4u8];
        records.extend_from_slice(&[0xaa; 4 * SHORT_TUNNEL_BUILD_RECORD_SIZE]);
        check_round_trip(Message::from_payload(MessagePayload::ShortTunnelBuild(
            BuildRecords(records),
        )));
    }

    #[test]
    fn data_round_trip() {
        check_round_trip(Message::dummy_data());
    }

    #[test]
    fn corrupted_checksum_is_rejected() {
        let msg = Message::dummy_data();
        let mut bytes = serialize(gen_message(&msg));
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        assert!(message(&bytes).is_err());
    }

    #[test]
    fn unknown_message_type_is_rejected() {
        let msg = Message::dummy_data();
        let mut bytes = serialize(gen_message(&msg));
        bytes[0] = 99;
        assert!(message(&bytes).is_err());
    }

    #[test]
    fn build_request_record_round_trip() {
        let brr = BuildRequestRecord {
            receive_tid: TunnelId(1),
            our_ident: Hash([2; 32]),
            next_tid: TunnelId(3),
            next_ident: Hash([4; 32]),
            layer_key: SessionKey([5; 32]),
            iv_key: SessionKey([6; 32]),
            reply_key: SessionKey([7; 32]),
            reply_iv: [8; 16],
            hop_type: ParticipantType::OutboundEndpoint,
            request_time: 12345,
            send_msg_id: 67890,
        };
        let bytes = serialize(gen_build_request_record(&brr, 29));
        assert_eq!(bytes.len(), BUILD_REQUEST_RECORD_LEN + 29);

        let (padding, parsed) = build_request_record(&bytes).unwrap();
        assert_eq!(padding.len(), 29);
        assert_eq!(parsed.receive_tid, brr.receive_tid);
        assert_eq!(parsed.our_ident, brr.our_ident);
        assert_eq!(parsed.next_tid, brr.next_tid);
        assert_eq!(parsed.next_ident, brr.next_ident);
        assert_eq!(parsed.layer_key.0, brr.layer_key.0);
        assert_eq!(parsed.iv_key.0, brr.iv_key.0);
        assert_eq!(parsed.reply_key.0, brr.reply_key.0);
        assert_eq!(parsed.reply_iv, brr.reply_iv);
        assert_eq!(parsed.hop_type, brr.hop_type);
        assert_eq!(parsed.request_time, brr.request_time);
        assert_eq!(parsed.send_msg_id, brr.send_msg_id);
    }
}
