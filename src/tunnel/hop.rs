//! Per-hop build state: one record slot of the build message belongs to each
//! hop, and the hop's keys drive both the record's creation and the peeling
//! of the layered reply.

use rand::{rngs::OsRng, RngCore};

use super::encryption::ReplyCipher;
use crate::constants::{
    RECORD_TO_PEER_LEN, SHORT_TUNNEL_BUILD_RECORD_SIZE, TUNNEL_BUILD_RECORD_SIZE,
};
use crate::crypto::{self, RecordSealer, SessionKey};
use crate::data::{Hash, RouterIdentity, TunnelId};
use crate::i2np::{frame, BuildRequestRecord, ParticipantType};
use crate::util;

/// The configuration of one hop of a tunnel being built.
///
/// Hops are planned as an ordered sequence; each one knows the identity and
/// receive tunnel id of its successor. The configuration only lives until the
/// build reply is processed: an established tunnel keeps nothing of it but
/// the hop identities and layer decryptors.
pub struct TunnelHopConfig {
    pub ident: RouterIdentity,
    /// The tunnel id under which this hop receives.
    pub tunnel_id: TunnelId,
    pub next_ident: Hash,
    pub next_tunnel_id: TunnelId,
    pub layer_key: SessionKey,
    pub iv_key: SessionKey,
    pub reply_key: SessionKey,
    pub reply_iv: [u8; 16],
    /// One-time reply key material registered with the garlic layer when the
    /// build reply comes back through another tunnel.
    pub garlic_reply_key: SessionKey,
    pub garlic_tag: u64,
    pub hop_type: ParticipantType,
    /// The slot this hop's record occupies in the build message.
    pub record_index: usize,
    is_short: bool,
}

impl TunnelHopConfig {
    pub fn new(ident: RouterIdentity, is_short: bool) -> Self {
        let mut reply_iv = [0u8; 16];
        OsRng.fill_bytes(&mut reply_iv);
        TunnelHopConfig {
            ident,
            tunnel_id: TunnelId::random(),
            next_ident: Hash([0; 32]),
            next_tunnel_id: TunnelId(0),
            layer_key: SessionKey::generate(),
            iv_key: SessionKey::generate(),
            reply_key: SessionKey::generate(),
            reply_iv,
            garlic_reply_key: SessionKey::generate(),
            garlic_tag: u64::from(OsRng.next_u32()) << 32 | u64::from(OsRng.next_u32()),
            hop_type: ParticipantType::Intermediate,
            record_index: 0,
            is_short,
        }
    }

    pub(crate) fn set_next(&mut self, next_ident: Hash, next_tunnel_id: TunnelId) {
        self.next_ident = next_ident;
        self.next_tunnel_id = next_tunnel_id;
    }

    pub fn record_size(&self) -> usize {
        if self.is_short {
            SHORT_TUNNEL_BUILD_RECORD_SIZE
        } else {
            TUNNEL_BUILD_RECORD_SIZE
        }
    }

    fn reply_cipher(&self) -> ReplyCipher {
        if self.is_short {
            ReplyCipher::ChaCha {
                key: self.reply_key.clone(),
            }
        } else {
            ReplyCipher::Cbc {
                key: self.reply_key.clone(),
                iv: self.reply_iv,
            }
        }
    }

    /// The reply key material to hand to the garlic layer so the build reply
    /// can be opened when it is injected into a different inbound tunnel.
    pub fn garlic_key(&self) -> ([u8; 32], u64) {
        (self.garlic_reply_key.0, self.garlic_tag)
    }

    /// Writes this hop's record into its slot of the build message, sealed
    /// toward the hop. `records` starts at the first record slot.
    pub fn create_build_request_record(
        &self,
        records: &mut [u8],
        our_ident: &Hash,
        reply_msg_id: u32,
        sealer: &dyn RecordSealer,
    ) -> Result<(), crypto::Error> {
        let record_size = self.record_size();
        let clear_len = record_size - RECORD_TO_PEER_LEN - sealer.overhead();
        if clear_len < frame::BUILD_REQUEST_RECORD_LEN {
            return Err(crypto::Error::InvalidRecord);
        }

        let brr = BuildRequestRecord {
            receive_tid: self.tunnel_id,
            our_ident: our_ident.clone(),
            next_tid: self.next_tunnel_id,
            next_ident: self.next_ident.clone(),
            layer_key: self.layer_key.clone(),
            iv_key: self.iv_key.clone(),
            reply_key: self.reply_key.clone(),
            reply_iv: self.reply_iv,
            hop_type: self.hop_type,
            request_time: (util::seconds_since_epoch() / 60) as u32,
            send_msg_id: reply_msg_id,
        };
        let clear = util::serialize(frame::gen_build_request_record(
            &brr,
            clear_len - frame::BUILD_REQUEST_RECORD_LEN,
        ));

        let slot = &mut records[self.record_index * record_size..][..record_size];
        slot[..RECORD_TO_PEER_LEN].copy_from_slice(&self.ident.hash.0[..RECORD_TO_PEER_LEN]);
        sealer.seal(&self.ident, &clear, &mut slot[RECORD_TO_PEER_LEN..])
    }

    /// Removes one application of this hop's reply transform from slot `idx`.
    ///
    /// Used for the pre-obfuscation of downstream slots at build time, and
    /// for peeling the slots of hops closer to the gateway when the reply
    /// comes back.
    pub fn decrypt_record(&self, records: &mut [u8], idx: usize) {
        let record_size = self.record_size();
        self.reply_cipher()
            .decrypt(&mut records[idx * record_size..][..record_size], idx);
    }

    /// Applies this hop's reply transform to slot `idx`, exactly as the hop
    /// does in flight after processing the build message.
    pub fn encrypt_record(&self, records: &mut [u8], idx: usize) {
        let record_size = self.record_size();
        self.reply_cipher()
            .encrypt(&mut records[idx * record_size..][..record_size], idx);
    }

    /// Removes this hop's own outer layer from its slot, exposing its build
    /// response.
    pub fn decrypt_build_response_record(&self, records: &mut [u8]) -> bool {
        self.decrypt_record(records, self.record_index);
        true
    }

    /// Reads the reply code from this hop's slot of a fully peeled reply.
    /// 0 is acceptance; anything else is a decline.
    pub fn ret_code(&self, records: &[u8]) -> u8 {
        let record_size = self.record_size();
        records[self.record_index * record_size + record_size - 1]
    }

    /// Writes a reply code into this hop's slot, as the hop does when
    /// answering. The rest of the slot is overwritten with random bytes.
    #[cfg(test)]
    pub(crate) fn write_build_response(&self, records: &mut [u8], ret: u8) {
        let record_size = self.record_size();
        let slot = &mut records[self.record_index * record_size..][..record_size];
        OsRng.fill_bytes(slot);
        slot[record_size - 1] = ret;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::mock::{mock_router_identity, PlainSealer};

    #[test]
    fn record_occupies_assigned_slot() {
        let mut hop = TunnelHopConfig::new(mock_router_identity(), true);
        hop.record_index = 2;
        let record_size = hop.record_size();

        let mut records = vec![0u8; 4 * record_size];
        hop.create_build_request_record(&mut records, &Hash([9; 32]), 42, &PlainSealer)
            .unwrap();

        // Slots other than the assigned one stay untouched.
        assert_eq!(&records[..2 * record_size], &vec![0u8; 2 * record_size][..]);
        assert_eq!(&records[3 * record_size..], &vec![0u8; record_size][..]);

        // The slot leads with the truncated identity of its owner.
        let slot = &records[2 * record_size..3 * record_size];
        assert_eq!(&slot[..16], &hop.ident.hash.0[..16]);

        // With the plain sealer the clear record is readable in place.
        let (_, brr) = frame::build_request_record(&slot[16..]).unwrap();
        assert_eq!(brr.receive_tid, hop.tunnel_id);
        assert_eq!(brr.send_msg_id, 42);
        assert_eq!(brr.our_ident, Hash([9; 32]));
    }

    #[test]
    fn record_peel_inverts_in_flight_transform() {
        let mut hop = TunnelHopConfig::new(mock_router_identity(), false);
        hop.record_index = 0;

        let mut records = vec![0x11u8; 2 * hop.record_size()];
        let orig = records.clone();

        hop.encrypt_record(&mut records, 1);
        assert!(records != orig);
        hop.decrypt_record(&mut records, 1);
        assert_eq!(records, orig);
    }
}
