//! Tunnel pools: groups of inbound and outbound tunnels serving one local
//! destination, with their replenishment policy.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use super::config::TunnelConfig;
use super::manager::Engine;
use super::{InboundTunnel, OutboundTunnel};
use crate::constants::MAX_NUM_RECORDS;
use crate::data::RouterIdentity;
use crate::router::types::LocalDestination;

/// The shape of a pool: hop counts, tunnel quantities, and selection knobs.
#[derive(Clone, Debug)]
pub struct PoolSettings {
    pub num_inbound_hops: usize,
    pub num_outbound_hops: usize,
    pub num_inbound_tunnels: usize,
    pub num_outbound_tunnels: usize,
    pub inbound_variance: isize,
    pub outbound_variance: isize,
    pub high_bandwidth: bool,
}

/// A group of related tunnels owned by a local destination.
///
/// The pool holds strong references to its active tunnels; tunnels refer
/// back to their pool weakly, so either side may outlive the other.
pub struct TunnelPool {
    settings: PoolSettings,
    engine: Weak<Engine>,
    active: AtomicBool,
    inbound: Mutex<Vec<Arc<InboundTunnel>>>,
    outbound: Mutex<Vec<Arc<OutboundTunnel>>>,
    local_destination: Mutex<Option<Arc<dyn LocalDestination>>>,
    rng: Mutex<StdRng>,
}

impl TunnelPool {
    pub(crate) fn new(settings: PoolSettings, engine: Weak<Engine>) -> Arc<Self> {
        Arc::new(TunnelPool {
            settings,
            engine,
            active: AtomicBool::new(true),
            inbound: Mutex::new(Vec::new()),
            outbound: Mutex::new(Vec::new()),
            local_destination: Mutex::new(None),
            rng: Mutex::new(StdRng::seed_from_u64(crate::util::clock_seed())),
        })
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    pub fn num_inbound_hops(&self) -> usize {
        self.settings.num_inbound_hops
    }

    pub fn num_outbound_hops(&self) -> usize {
        self.settings.num_outbound_hops
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }

    pub fn local_destination(&self) -> Option<Arc<dyn LocalDestination>> {
        self.local_destination.lock().unwrap().clone()
    }

    pub fn set_local_destination(&self, dest: Option<Arc<dyn LocalDestination>>) {
        *self.local_destination.lock().unwrap() = dest;
    }

    /// The pool-scoped RNG, used for its tunnels' record shuffles.
    pub(crate) fn rng(&self) -> &Mutex<StdRng> {
        &self.rng
    }

    pub fn num_inbound_tunnels(&self) -> usize {
        self.inbound.lock().unwrap().len()
    }

    pub fn num_outbound_tunnels(&self) -> usize {
        self.outbound.lock().unwrap().len()
    }

    pub(crate) fn inbound_tunnel_created(&self, tunnel: &Arc<InboundTunnel>) {
        self.inbound.lock().unwrap().push(tunnel.clone());
        if let Some(dest) = self.local_destination() {
            dest.set_leaseset_updated();
        }
    }

    pub(crate) fn outbound_tunnel_created(&self, tunnel: &Arc<OutboundTunnel>) {
        self.outbound.lock().unwrap().push(tunnel.clone());
    }

    pub(crate) fn inbound_tunnel_expired(&self, tunnel: &Arc<InboundTunnel>) {
        self.inbound
            .lock()
            .unwrap()
            .retain(|t| !Arc::ptr_eq(t, tunnel));
        if let Some(dest) = self.local_destination() {
            dest.set_leaseset_updated();
        }
    }

    pub(crate) fn outbound_tunnel_expired(&self, tunnel: &Arc<OutboundTunnel>) {
        self.outbound
            .lock()
            .unwrap()
            .retain(|t| !Arc::ptr_eq(t, tunnel));
    }

    /// Severs the pool from all of its tunnels.
    pub(crate) fn detach_tunnels(&self) {
        for tunnel in self.inbound.lock().unwrap().drain(..) {
            tunnel.base.set_tunnel_pool(None);
        }
        for tunnel in self.outbound.lock().unwrap().drain(..) {
            tunnel.base.set_tunnel_pool(None);
        }
    }

    /// Tops the pool up to its configured quantities.
    pub(crate) fn manage_tunnels(self: &Arc<Self>, _ts: u64) {
        let engine = match self.engine.upgrade() {
            Some(engine) => engine,
            None => return,
        };

        let needed_inbound = (self.settings.num_inbound_tunnels)
            .saturating_sub(self.num_inbound_tunnels() + engine.count_pending_inbound_for(self));
        for _ in 0..needed_inbound {
            let num_hops = self.hops_with_variance(
                self.settings.num_inbound_hops,
                self.settings.inbound_variance,
            );
            let peers = match self.select_peers(&engine, num_hops) {
                Some(peers) => peers,
                None => {
                    warn!("Tunnels: Can't select peers for inbound tunnel");
                    break;
                }
            };
            let config =
                TunnelConfig::inbound(peers, &engine.ctx().our_ident.hash, true);
            let carrier = engine.get_next_outbound_tunnel();
            engine.create_inbound_tunnel(Some(config), Some(self), carrier.as_ref());
        }

        let needed_outbound = (self.settings.num_outbound_tunnels)
            .saturating_sub(self.num_outbound_tunnels() + engine.count_pending_outbound_for(self));
        for _ in 0..needed_outbound {
            // Replies to outbound builds come back through an inbound tunnel.
            let reply_tunnel = match engine.get_next_inbound_tunnel() {
                Some(tunnel) => tunnel,
                None => {
                    warn!("Tunnels: No inbound tunnel to receive an outbound build reply");
                    break;
                }
            };
            let num_hops = self.hops_with_variance(
                self.settings.num_outbound_hops,
                self.settings.outbound_variance,
            );
            let peers = match self.select_peers(&engine, num_hops) {
                Some(peers) => peers,
                None => {
                    warn!("Tunnels: Can't select peers for outbound tunnel");
                    break;
                }
            };
            let config = TunnelConfig::outbound(
                peers,
                reply_tunnel.next_tunnel_id(),
                reply_tunnel.next_ident().clone(),
                true,
            );
            engine.create_outbound_tunnel(Some(config), Some(self), None);
        }
    }

    /// Builds a replacement inbound tunnel through the expiring tunnel's own
    /// chain.
    pub(crate) fn recreate_inbound_tunnel(self: &Arc<Self>, tunnel: &Arc<InboundTunnel>) {
        let engine = match self.engine.upgrade() {
            Some(engine) => engine,
            None => return,
        };
        let peers = tunnel.base.peers();
        if peers.is_empty() {
            return;
        }
        let config = TunnelConfig::inbound(
            peers,
            &engine.ctx().our_ident.hash,
            tunnel.base.is_short_build_message(),
        );
        let carrier = engine.get_next_outbound_tunnel();
        engine.create_inbound_tunnel(Some(config), Some(self), carrier.as_ref());
    }

    /// Builds a replacement outbound tunnel through the expiring tunnel's
    /// own chain.
    pub(crate) fn recreate_outbound_tunnel(self: &Arc<Self>, tunnel: &Arc<OutboundTunnel>) {
        let engine = match self.engine.upgrade() {
            Some(engine) => engine,
            None => return,
        };
        let peers = tunnel.base.peers();
        if peers.is_empty() {
            return;
        }
        let reply_tunnel = match engine.get_next_inbound_tunnel() {
            Some(reply_tunnel) => reply_tunnel,
            None => return,
        };
        let config = TunnelConfig::outbound(
            peers,
            reply_tunnel.next_tunnel_id(),
            reply_tunnel.next_ident().clone(),
            tunnel.base.is_short_build_message(),
        );
        engine.create_outbound_tunnel(Some(config), Some(self), None);
    }

    fn hops_with_variance(&self, len: usize, variance: isize) -> usize {
        let len = if variance == 0 {
            len
        } else {
            let delta = self.rng.lock().unwrap().gen_range(-variance..=variance);
            (len as isize + delta).max(1) as usize
        };
        len.min(MAX_NUM_RECORDS)
    }

    fn select_peers(&self, engine: &Arc<Engine>, num_hops: usize) -> Option<Vec<RouterIdentity>> {
        let our_hash = &engine.ctx().our_ident.hash;
        let mut peers = Vec::with_capacity(num_hops);
        let mut chosen: HashSet<[u8; 32]> = HashSet::new();
        let mut attempts = 0;
        while peers.len() < num_hops {
            attempts += 1;
            if attempts > num_hops * 4 {
                return None;
            }
            let router = engine.ctx().netdb.random_router(our_hash, true)?;
            if router.hash == *our_hash || !chosen.insert(router.hash.0) {
                continue;
            }
            peers.push(router);
        }
        Some(peers)
    }
}
