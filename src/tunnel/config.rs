//! Tunnel configurations: the ordered hop chain a build request is issued
//! for.

use std::fmt;

use super::hop::TunnelHopConfig;
use crate::constants::{
    MAX_NUM_RECORDS, SHORT_TUNNEL_BUILD_RECORD_SIZE, TUNNEL_BUILD_RECORD_SIZE,
};
use crate::data::{Hash, RouterIdentity, TunnelId};
use crate::i2np::ParticipantType;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TunnelDirection {
    Inbound,
    Outbound,
}

/// The plan for a tunnel: its hops in first-to-last order, its direction,
/// and the record format its build message uses.
///
/// Like the per-hop state it carries, a configuration is consumed by a
/// successful build; only the layer decryptors survive.
pub struct TunnelConfig {
    hops: Vec<TunnelHopConfig>,
    direction: TunnelDirection,
    is_short: bool,
    tunnel_id: TunnelId,
    next_tunnel_id: TunnelId,
    next_ident: Hash,
    far_end_ident: Hash,
}

impl TunnelConfig {
    /// Plans an inbound tunnel: `peers[0]` is the gateway, the last peer is
    /// adjacent to the local endpoint identified by `our_ident`.
    pub fn inbound(peers: Vec<RouterIdentity>, our_ident: &Hash, is_short: bool) -> Self {
        assert!(!peers.is_empty() && peers.len() <= MAX_NUM_RECORDS);
        let mut hops: Vec<TunnelHopConfig> = peers
            .into_iter()
            .map(|ident| TunnelHopConfig::new(ident, is_short))
            .collect();
        hops[0].hop_type = ParticipantType::InboundGateway;
        let our_tid = TunnelId::random();
        Self::wire(&mut hops, our_ident.clone(), our_tid);

        let far_end_ident = hops[0].ident.hash.clone();
        TunnelConfig {
            tunnel_id: our_tid,
            next_tunnel_id: hops[0].tunnel_id,
            next_ident: hops[0].ident.hash.clone(),
            far_end_ident,
            hops,
            direction: TunnelDirection::Inbound,
            is_short,
        }
    }

    /// Plans an outbound tunnel: `peers[0]` is adjacent to the local
    /// gateway, the last peer is the endpoint. The build reply is delivered
    /// to `reply_ident`/`reply_tid`, the gateway of an inbound tunnel back
    /// to this router.
    pub fn outbound(
        peers: Vec<RouterIdentity>,
        reply_tid: TunnelId,
        reply_ident: Hash,
        is_short: bool,
    ) -> Self {
        assert!(!peers.is_empty() && peers.len() <= MAX_NUM_RECORDS);
        let mut hops: Vec<TunnelHopConfig> = peers
            .into_iter()
            .map(|ident| TunnelHopConfig::new(ident, is_short))
            .collect();
        let last = hops.len() - 1;
        hops[last].hop_type = ParticipantType::OutboundEndpoint;
        Self::wire(&mut hops, reply_ident, reply_tid);

        let far_end_ident = hops[last].ident.hash.clone();
        TunnelConfig {
            tunnel_id: hops[0].tunnel_id,
            next_tunnel_id: hops[0].tunnel_id,
            next_ident: hops[0].ident.hash.clone(),
            far_end_ident,
            hops,
            direction: TunnelDirection::Outbound,
            is_short,
        }
    }

    /// The degenerate local-only plan: no remote hops, loopback delivery.
    pub fn zero_hops(our_ident: Hash, direction: TunnelDirection) -> Self {
        let tid = TunnelId::random();
        TunnelConfig {
            hops: Vec::new(),
            direction,
            is_short: false,
            tunnel_id: tid,
            next_tunnel_id: tid,
            next_ident: our_ident.clone(),
            far_end_ident: our_ident,
        }
    }

    /// Chains each hop to its successor; the last hop points at the tunnel's
    /// terminus.
    fn wire(hops: &mut [TunnelHopConfig], terminus_ident: Hash, terminus_tid: TunnelId) {
        for i in 0..hops.len() - 1 {
            let (ident, tid) = (hops[i + 1].ident.hash.clone(), hops[i + 1].tunnel_id);
            hops[i].set_next(ident, tid);
        }
        let last = hops.len() - 1;
        hops[last].set_next(terminus_ident, terminus_tid);
    }

    pub fn num_hops(&self) -> usize {
        self.hops.len()
    }

    pub fn is_short(&self) -> bool {
        self.is_short
    }

    pub fn direction(&self) -> TunnelDirection {
        self.direction
    }

    pub fn record_size(&self) -> usize {
        if self.is_short {
            SHORT_TUNNEL_BUILD_RECORD_SIZE
        } else {
            TUNNEL_BUILD_RECORD_SIZE
        }
    }

    /// The local tunnel id: the id the local terminus receives under for an
    /// inbound tunnel, the first hop's receive id for an outbound one.
    pub fn tunnel_id(&self) -> TunnelId {
        self.tunnel_id
    }

    pub fn next_tunnel_id(&self) -> TunnelId {
        self.next_tunnel_id
    }

    /// The first remote element of the tunnel, where locally originated
    /// messages (including the build request) are sent.
    pub fn next_ident(&self) -> &Hash {
        &self.next_ident
    }

    /// The identity at the far end: the gateway of an inbound tunnel, the
    /// endpoint of an outbound one.
    pub fn far_end_ident(&self) -> &Hash {
        &self.far_end_ident
    }

    pub fn peers(&self) -> Vec<RouterIdentity> {
        self.hops.iter().map(|hop| hop.ident.clone()).collect()
    }

    pub(crate) fn hops(&self) -> &[TunnelHopConfig] {
        &self.hops
    }

    pub(crate) fn hops_mut(&mut self) -> &mut [TunnelHopConfig] {
        &mut self.hops
    }
}

impl fmt::Debug for TunnelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TunnelConfig ({:?}, {} hops)",
            self.direction,
            self.hops.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::mock::mock_router_identity;

    fn peers(n: usize) -> Vec<RouterIdentity> {
        (0..n).map(|_| mock_router_identity()).collect()
    }

    #[test]
    fn inbound_chain_is_wired_first_to_last() {
        let peers = peers(3);
        let our_ident = Hash([7; 32]);
        let config = TunnelConfig::inbound(peers.clone(), &our_ident, true);

        assert_eq!(config.num_hops(), 3);
        let hops = config.hops();
        assert_eq!(hops[0].next_ident, hops[1].ident.hash);
        assert_eq!(hops[0].next_tunnel_id, hops[1].tunnel_id);
        assert_eq!(hops[1].next_ident, hops[2].ident.hash);
        // The last hop delivers to us, under the tunnel's own id.
        assert_eq!(hops[2].next_ident, our_ident);
        assert_eq!(hops[2].next_tunnel_id, config.tunnel_id());
        // Senders reach the tunnel through its gateway.
        assert_eq!(*config.next_ident(), peers[0].hash);
        assert_eq!(config.next_tunnel_id(), hops[0].tunnel_id);
        assert_eq!(hops[0].hop_type, crate::i2np::ParticipantType::InboundGateway);
    }

    #[test]
    fn outbound_chain_ends_at_reply_gateway() {
        let peers = peers(2);
        let config =
            TunnelConfig::outbound(peers.clone(), TunnelId(99), Hash([8; 32]), false);

        let hops = config.hops();
        assert_eq!(hops[1].hop_type, crate::i2np::ParticipantType::OutboundEndpoint);
        assert_eq!(hops[1].next_ident, Hash([8; 32]));
        assert_eq!(hops[1].next_tunnel_id, TunnelId(99));
        assert_eq!(*config.next_ident(), peers[0].hash);
        assert_eq!(*config.far_end_ident(), peers[1].hash);
    }

    #[test]
    fn zero_hops_loops_back_to_us() {
        let config = TunnelConfig::zero_hops(Hash([1; 32]), TunnelDirection::Inbound);
        assert_eq!(config.num_hops(), 0);
        assert_eq!(config.tunnel_id(), config.next_tunnel_id());
        assert_eq!(*config.next_ident(), Hash([1; 32]));
    }
}
