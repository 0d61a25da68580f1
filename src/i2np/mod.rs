//! Messages within the network.
//!
//! The subset of the I2P Network Protocol (I2NP) that the tunnel engine
//! routes: tunnel-data and tunnel-gateway messages, and the build
//! request/reply families. Everything else a router exchanges is handled by
//! other subsystems and reaches the engine, if at all, as opaque payload.

use rand::{rngs::OsRng, RngCore};
use std::fmt;
use std::time::{Duration, SystemTime};

use crate::crypto::SessionKey;
use crate::data::{Hash, I2PDate, TunnelId};

pub(crate) mod frame;

const MESSAGE_EXPIRATION_MS: u64 = 60 * 1000;

//
// Common structures
//

/// The position a hop is asked to fill.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParticipantType {
    Intermediate,
    InboundGateway,
    OutboundEndpoint,
}

/// One record in a set of multiple records to request the creation of one
/// hop in the tunnel. This is the clear text a record slot carries before
/// the asymmetric sealing toward its hop.
pub struct BuildRequestRecord {
    pub receive_tid: TunnelId,
    pub our_ident: Hash,
    pub next_tid: TunnelId,
    pub next_ident: Hash,
    pub layer_key: SessionKey,
    pub iv_key: SessionKey,
    pub reply_key: SessionKey,
    pub reply_iv: [u8; 16],
    pub hop_type: ParticipantType,
    pub request_time: u32,
    pub send_msg_id: u32,
}

//
// Messages
//

/// A message sent from a tunnel's gateway or participant to the next
/// participant or endpoint. The data is of fixed length, containing I2NP
/// messages that are fragmented, batched, padded, and encrypted.
pub struct TunnelData {
    pub tid: TunnelId,
    pub data: [u8; 1024],
}

impl TunnelData {
    pub fn from(tid: TunnelId, data: &[u8; 1024]) -> Self {
        let mut x = [0u8; 1024];
        x.copy_from_slice(data);
        TunnelData { tid, data: x }
    }
}

/// Wraps another I2NP message to be sent into a tunnel at the tunnel's
/// inbound gateway.
pub struct TunnelGateway {
    pub tid: TunnelId,
    pub data: Vec<u8>,
}

/// The raw records of a build request or reply, preceded by their count.
///
/// Byte 0 is the record count; the records follow back to back. Keeping the
/// wire form intact lets the record peel work in place.
#[derive(Clone, PartialEq)]
pub struct BuildRecords(pub Vec<u8>);

impl BuildRecords {
    pub fn num_records(&self) -> usize {
        self.0.first().copied().unwrap_or(0) as usize
    }
}

impl fmt::Debug for BuildRecords {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BuildRecords({} records)", self.num_records())
    }
}

pub enum MessagePayload {
    TunnelData(TunnelData),
    TunnelGateway(TunnelGateway),
    ShortTunnelBuild(BuildRecords),
    ShortTunnelBuildReply(BuildRecords),
    VariableTunnelBuild(BuildRecords),
    VariableTunnelBuildReply(BuildRecords),
    /// Deprecated fixed-size build message; logged and dropped on receipt.
    TunnelBuild(BuildRecords),
    /// Deprecated fixed-size build reply; logged and dropped on receipt.
    TunnelBuildReply(BuildRecords),
    /// Used to wrap arbitrary data.
    Data(Vec<u8>),
}

impl MessagePayload {
    fn byte_len(&self) -> usize {
        match self {
            MessagePayload::TunnelData(_) => 4 + 1024,
            MessagePayload::TunnelGateway(tg) => 4 + 2 + tg.data.len(),
            MessagePayload::ShortTunnelBuild(r)
            | MessagePayload::ShortTunnelBuildReply(r)
            | MessagePayload::VariableTunnelBuild(r)
            | MessagePayload::VariableTunnelBuildReply(r) => r.0.len(),
            MessagePayload::TunnelBuild(r) | MessagePayload::TunnelBuildReply(r) => r.0.len() - 1,
            MessagePayload::Data(d) => d.len(),
        }
    }
}

impl fmt::Debug for MessagePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessagePayload::TunnelData(td) => write!(f, "TunnelData (tid: {})", td.tid),
            MessagePayload::TunnelGateway(tg) => write!(f, "TunnelGateway (tid: {})", tg.tid),
            MessagePayload::ShortTunnelBuild(_) => "ShortTunnelBuild".fmt(f),
            MessagePayload::ShortTunnelBuildReply(_) => "ShortTunnelBuildReply".fmt(f),
            MessagePayload::VariableTunnelBuild(_) => "VariableTunnelBuild".fmt(f),
            MessagePayload::VariableTunnelBuildReply(_) => "VariableTunnelBuildReply".fmt(f),
            MessagePayload::TunnelBuild(_) => "TunnelBuild".fmt(f),
            MessagePayload::TunnelBuildReply(_) => "TunnelBuildReply".fmt(f),
            MessagePayload::Data(_) => "Data".fmt(f),
        }
    }
}

pub struct Message {
    pub id: u32,
    pub expiration: I2PDate,
    pub payload: MessagePayload,
    on_drop: Option<Box<dyn FnOnce() + Send>>,
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Message (id: {}, payload: {:?})", self.id, self.payload)
    }
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.expiration == other.expiration
    }
}

impl Message {
    pub fn from_payload(payload: MessagePayload) -> Self {
        Message {
            id: OsRng.next_u32(),
            expiration: I2PDate::from_system_time(
                SystemTime::now() + Duration::from_millis(MESSAGE_EXPIRATION_MS),
            ),
            payload,
            on_drop: None,
        }
    }

    pub fn dummy_data() -> Self {
        Message {
            id: 0,
            expiration: I2PDate(0x123_4567_87c0),
            payload: MessagePayload::Data(vec![0, 1, 2, 3, 4, 5, 6, 7, 8, 9]),
            on_drop: None,
        }
    }

    /// Serialized size: the standard 16-byte header plus the payload.
    pub fn byte_len(&self) -> usize {
        16 + self.payload.byte_len()
    }

    /// Registers a callback to run if the message is discarded before it
    /// leaves the router.
    pub fn set_on_drop<F>(&mut self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_drop = Some(Box::new(f));
    }

    /// Invoked by transports that discard the message instead of sending it.
    pub fn dropped(mut self) {
        if let Some(f) = self.on_drop.take() {
            f();
        }
    }
}
