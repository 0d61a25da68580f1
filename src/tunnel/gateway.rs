//! The sending side of an outbound tunnel: batches I2NP messages into
//! fixed-size tunnel-data messages, fragmenting across messages when needed.

use rand::{rngs::OsRng, RngCore};
use std::sync::Arc;

use super::frame::{checksum, gen_tmdi_fragment_pair};
use crate::constants::{TUNNEL_DATA_MAX_PAYLOAD_SIZE, TUNNEL_DATA_MSG_SIZE};
use crate::data::{Hash, TunnelId};
use crate::i2np::{frame as i2np_frame, Message, TunnelData};
use crate::util::{serialize, MemoryPool};

/// How the remote endpoint should dispatch a payload.
#[derive(Clone, Debug, PartialEq)]
pub enum TunnelMessageDeliveryType {
    /// Consume at the endpoint itself.
    Local,
    /// Forward into the tunnel with the given id at the given router.
    Tunnel(TunnelId, Hash),
    /// Forward directly to the given router.
    Router(Hash),
}

/// One message handed to an outbound tunnel, together with its delivery
/// instructions for the far end.
pub struct TunnelMessageBlock {
    pub delivery_type: TunnelMessageDeliveryType,
    pub msg: Message,
}

/// The delivery instructions included with the first fragment of an I2NP
/// message, or an unfragmented message.
///
/// The delay and extended options flag bits are not implemented.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct FirstFragmentDeliveryInstructions {
    pub delivery_type: TunnelMessageDeliveryType,
    pub msg_id: Option<u32>,
}

/// The delivery instructions included with the second and subsequent
/// fragments of an I2NP message.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct FollowOnFragmentDeliveryInstructions {
    pub fragment_number: u8,
    pub last_fragment: bool,
    pub msg_id: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum TunnelMessageDeliveryInstructions {
    First(FirstFragmentDeliveryInstructions),
    FollowOn(FollowOnFragmentDeliveryInstructions),
}

impl TunnelMessageDeliveryInstructions {
    pub(crate) fn byte_len(&self) -> usize {
        match self {
            TunnelMessageDeliveryInstructions::First(di) => {
                let mut len = 1 + match di.delivery_type {
                    TunnelMessageDeliveryType::Local => 0,
                    TunnelMessageDeliveryType::Tunnel(_, _) => 36,
                    TunnelMessageDeliveryType::Router(_) => 32,
                };
                if di.msg_id.is_some() {
                    len += 4;
                }
                len
            }
            TunnelMessageDeliveryInstructions::FollowOn(_) => 5,
        }
    }
}

/// A set of I2NP message fragments that serializes to at most 1003 bytes.
/// Forms the plaintext inside a tunnel-data message.
#[derive(Debug, PartialEq)]
pub(crate) struct TunnelMessage<'a>(pub(crate) Vec<(TunnelMessageDeliveryInstructions, &'a [u8])>);

/// Packs message blocks into tunnel-data messages addressed to the tunnel's
/// first hop.
///
/// Entries accumulate in a partially filled message until it cannot take the
/// next fragment; completed messages wait for the owning tunnel to encrypt
/// and emit them on flush.
pub(crate) struct TunnelGatewayBuffer {
    next_tid: TunnelId,
    pool: Arc<MemoryPool>,
    current: Vec<u8>,
    completed: Vec<TunnelData>,
}

impl TunnelGatewayBuffer {
    pub fn new(next_tid: TunnelId, pool: Arc<MemoryPool>) -> Self {
        let current = pool.acquire();
        TunnelGatewayBuffer {
            next_tid,
            pool,
            current,
            completed: Vec::new(),
        }
    }

    fn remaining(&self) -> usize {
        TUNNEL_DATA_MAX_PAYLOAD_SIZE - self.current.len()
    }

    fn append_entry(&mut self, di: &TunnelMessageDeliveryInstructions, frag: &[u8]) {
        let entry = serialize(gen_tmdi_fragment_pair(di, frag));
        self.current.extend_from_slice(&entry);
    }

    pub fn put_tunnel_data_msg(&mut self, block: TunnelMessageBlock) {
        let msg_id = block.msg.id;
        let msg_bytes = serialize(i2np_frame::gen_message(&block.msg));

        let whole_di = TunnelMessageDeliveryInstructions::First(FirstFragmentDeliveryInstructions {
            delivery_type: block.delivery_type.clone(),
            msg_id: None,
        });
        if whole_di.byte_len() + 2 + msg_bytes.len() <= self.remaining() {
            self.append_entry(&whole_di, &msg_bytes);
            return;
        }

        // Fragment. The first fragment carries the message id the follow-ons
        // will be matched against.
        let first_di = TunnelMessageDeliveryInstructions::First(FirstFragmentDeliveryInstructions {
            delivery_type: block.delivery_type,
            msg_id: Some(msg_id),
        });
        let first_overhead = first_di.byte_len() + 2;
        if self.remaining() <= first_overhead {
            self.complete_current_message();
        }
        // A fresh message may take it whole after all.
        if whole_di.byte_len() + 2 + msg_bytes.len() <= self.remaining() {
            self.append_entry(&whole_di, &msg_bytes);
            return;
        }

        let mut offset = self.remaining() - first_overhead;
        self.append_entry(&first_di, &msg_bytes[..offset]);
        self.complete_current_message();

        let mut fragment_number = 1;
        while offset < msg_bytes.len() {
            const FOLLOW_ON_OVERHEAD: usize = 5 + 2;
            let take = (msg_bytes.len() - offset).min(self.remaining() - FOLLOW_ON_OVERHEAD);
            let last_fragment = offset + take == msg_bytes.len();
            let di = TunnelMessageDeliveryInstructions::FollowOn(
                FollowOnFragmentDeliveryInstructions {
                    fragment_number,
                    last_fragment,
                    msg_id,
                },
            );
            self.append_entry(&di, &msg_bytes[offset..offset + take]);
            offset += take;
            fragment_number += 1;
            if !last_fragment {
                self.complete_current_message();
            }
        }
    }

    /// Pads, checksums and seals the message under construction.
    fn complete_current_message(&mut self) {
        if self.current.is_empty() {
            return;
        }
        let entries = std::mem::replace(&mut self.current, self.pool.acquire());

        let mut iv = [0u8; 16];
        OsRng.fill_bytes(&mut iv);

        let mut data = [0u8; TUNNEL_DATA_MSG_SIZE];
        data[0..16].copy_from_slice(&iv);
        data[16..20].copy_from_slice(&checksum(&entries, &iv).to_be_bytes());

        let padding_len = TUNNEL_DATA_MAX_PAYLOAD_SIZE - entries.len();
        let padding = &mut data[20..20 + padding_len];
        OsRng.fill_bytes(padding);
        for b in padding.iter_mut() {
            if *b == 0 {
                *b = 1;
            }
        }
        data[20 + padding_len] = 0;
        data[21 + padding_len..].copy_from_slice(&entries);

        self.completed.push(TunnelData {
            tid: self.next_tid,
            data,
        });
        self.pool.release(entries);
    }

    /// Completes the open message and hands back everything ready to send.
    pub fn flush(&mut self) -> Vec<TunnelData> {
        self.complete_current_message();
        std::mem::take(&mut self.completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::i2np::MessagePayload;
    use crate::tunnel::frame::tunnel_message;

    fn buffer() -> TunnelGatewayBuffer {
        TunnelGatewayBuffer::new(TunnelId(5), Arc::new(MemoryPool::new(1024)))
    }

    fn block(delivery_type: TunnelMessageDeliveryType, payload_len: usize) -> TunnelMessageBlock {
        TunnelMessageBlock {
            delivery_type,
            msg: Message::from_payload(MessagePayload::Data(vec![0xab; payload_len])),
        }
    }

    #[test]
    fn small_block_packs_unfragmented() {
        let mut buf = buffer();
        let block = block(TunnelMessageDeliveryType::Local, 100);
        let msg_bytes = serialize(i2np_frame::gen_message(&block.msg));

        buf.put_tunnel_data_msg(block);
        let out = buf.flush();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].tid, TunnelId(5));

        let (_, tm) = tunnel_message(&out[0].data).unwrap();
        assert_eq!(tm.0.len(), 1);
        match &tm.0[0].0 {
            TunnelMessageDeliveryInstructions::First(di) => {
                assert_eq!(di.delivery_type, TunnelMessageDeliveryType::Local);
                assert_eq!(di.msg_id, None);
            }
            other => panic!("Unexpected instructions: {:?}", other),
        }
        assert_eq!(tm.0[0].1, &msg_bytes[..]);
    }

    #[test]
    fn consecutive_blocks_share_a_message() {
        let mut buf = buffer();
        buf.put_tunnel_data_msg(block(TunnelMessageDeliveryType::Local, 100));
        buf.put_tunnel_data_msg(block(
            TunnelMessageDeliveryType::Router(Hash([2; 32])),
            200,
        ));
        let out = buf.flush();
        assert_eq!(out.len(), 1);

        let (_, tm) = tunnel_message(&out[0].data).unwrap();
        assert_eq!(tm.0.len(), 2);
    }

    #[test]
    fn large_message_fragments_and_reassembles() {
        let mut buf = buffer();
        let block = block(
            TunnelMessageDeliveryType::Tunnel(TunnelId(9), Hash([3; 32])),
            2500,
        );
        let msg_id = block.msg.id;
        let msg_bytes = serialize(i2np_frame::gen_message(&block.msg));

        buf.put_tunnel_data_msg(block);
        let out = buf.flush();
        assert!(out.len() >= 3);

        let mut reassembled = Vec::new();
        let mut expected_fragment = 0;
        let mut saw_last = false;
        for td in &out {
            let (_, tm) = tunnel_message(&td.data).unwrap();
            for (di, frag) in &tm.0 {
                match di {
                    TunnelMessageDeliveryInstructions::First(di) => {
                        assert_eq!(expected_fragment, 0);
                        assert_eq!(di.msg_id, Some(msg_id));
                        expected_fragment = 1;
                    }
                    TunnelMessageDeliveryInstructions::FollowOn(di) => {
                        assert_eq!(di.fragment_number, expected_fragment);
                        assert_eq!(di.msg_id, msg_id);
                        assert!(!saw_last);
                        saw_last = di.last_fragment;
                        expected_fragment += 1;
                    }
                }
                reassembled.extend_from_slice(frag);
            }
        }
        assert!(saw_last);
        assert_eq!(reassembled, msg_bytes);
    }

    #[test]
    fn flush_with_nothing_buffered_is_empty() {
        let mut buf = buffer();
        assert!(buf.flush().is_empty());
    }
}
