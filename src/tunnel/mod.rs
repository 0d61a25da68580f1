//! Implementation of tunnels: unidirectional, multi-hop, layer-encrypted
//! paths through a sequence of remote routers.
//!
//! A tunnel is built by issuing a layered build request and interpreting the
//! layered reply; established tunnels carry fixed-size tunnel-data messages
//! that are peeled (inbound) or pre-encrypted (outbound) one hop layer at a
//! time. The [`manager::Tunnels`] engine owns the population.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{rngs::OsRng, RngCore, SeedableRng};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::constants::{
    MAX_NUM_RECORDS, STANDARD_NUM_RECORDS, TUNNEL_DATA_MSG_SIZE,
};
use crate::data::{Hash, ProfileEvent, RouterIdentity, TunnelId};
use crate::i2np::{BuildRecords, Message, MessagePayload, TunnelData, TunnelGateway};
use crate::router::Context;
use crate::util;

pub mod config;
pub mod encryption;
pub(crate) mod frame;
pub mod gateway;
pub mod hop;
pub mod manager;
pub mod pool;

pub use self::config::{TunnelConfig, TunnelDirection};
pub use self::gateway::{TunnelMessageBlock, TunnelMessageDeliveryType};
pub use self::hop::TunnelHopConfig;
pub use self::manager::Tunnels;
pub use self::pool::{PoolSettings, TunnelPool};

use self::encryption::LayerCipher;
use self::gateway::TunnelGatewayBuffer;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TunnelState {
    Pending,
    BuildReplyReceived,
    Established,
    BuildFailed,
    Expiring,
}

/// One established hop: its identity, and the decryptor that removes its
/// layer from tunnel-data messages.
pub(crate) struct TunnelHop {
    pub ident: RouterIdentity,
    pub decryption: LayerCipher,
}

/// The behaviour the dispatch loop needs from anything registered under a
/// tunnel id.
pub trait TunnelBase: Send + Sync {
    fn tunnel_id(&self) -> TunnelId;

    /// A tunnel-data message addressed to this tunnel arrived.
    fn handle_tunnel_data_msg(&self, msg: TunnelData);

    /// An I2NP message is to be sent through this tunnel (the gateway side).
    fn send_tunnel_data_msg(&self, msg: Message);

    /// Emit whatever the tunnel's gateway has buffered.
    fn flush_tunnel_data_msgs(&self);

    fn creation_time(&self) -> u64;
}

struct LatencyEstimate {
    sum_ms: u64,
    samples: u32,
}

/// State common to inbound and outbound tunnels.
///
/// Holds the build configuration until the tunnel is established, then only
/// the established hops, stored in reverse chain order because that is the
/// order data-message decryption streams through them.
pub struct Tunnel {
    tunnel_id: TunnelId,
    next_tunnel_id: TunnelId,
    next_ident: Hash,
    direction: TunnelDirection,
    far_end_ident: Hash,
    ctx: Arc<Context>,
    state: Mutex<TunnelState>,
    config: Mutex<Option<TunnelConfig>>,
    hops: Mutex<Vec<TunnelHop>>,
    is_short: bool,
    is_recreated: AtomicBool,
    creation_time: AtomicU64,
    latency: Mutex<LatencyEstimate>,
    pool: Mutex<Weak<TunnelPool>>,
}

impl Tunnel {
    fn new(config: TunnelConfig, ctx: Arc<Context>) -> Self {
        Tunnel {
            tunnel_id: config.tunnel_id(),
            next_tunnel_id: config.next_tunnel_id(),
            next_ident: config.next_ident().clone(),
            direction: config.direction(),
            far_end_ident: config.far_end_ident().clone(),
            ctx,
            state: Mutex::new(TunnelState::Pending),
            is_short: config.is_short(),
            config: Mutex::new(Some(config)),
            hops: Mutex::new(Vec::new()),
            is_recreated: AtomicBool::new(false),
            creation_time: AtomicU64::new(util::seconds_since_epoch()),
            latency: Mutex::new(LatencyEstimate {
                sum_ms: 0,
                samples: 0,
            }),
            pool: Mutex::new(Weak::new()),
        }
    }

    pub fn tunnel_id(&self) -> TunnelId {
        self.tunnel_id
    }

    pub fn next_tunnel_id(&self) -> TunnelId {
        self.next_tunnel_id
    }

    pub fn next_ident(&self) -> &Hash {
        &self.next_ident
    }

    pub fn direction(&self) -> TunnelDirection {
        self.direction
    }

    /// The far end of the tunnel: the gateway of an inbound tunnel, the
    /// endpoint of an outbound one. For a zero-hops tunnel this is the local
    /// router itself.
    pub fn far_end_ident(&self) -> &Hash {
        &self.far_end_ident
    }

    pub fn state(&self) -> TunnelState {
        *self.state.lock().unwrap()
    }

    pub fn set_state(&self, state: TunnelState) {
        *self.state.lock().unwrap() = state;
    }

    pub fn is_established(&self) -> bool {
        self.state() == TunnelState::Established
    }

    pub fn is_failed(&self) -> bool {
        self.state() == TunnelState::BuildFailed
    }

    pub fn is_recreated(&self) -> bool {
        self.is_recreated.load(Ordering::SeqCst)
    }

    pub fn set_recreated(&self, recreated: bool) {
        self.is_recreated.store(recreated, Ordering::SeqCst);
    }

    pub fn is_short_build_message(&self) -> bool {
        self.is_short
    }

    pub fn creation_time(&self) -> u64 {
        self.creation_time.load(Ordering::SeqCst)
    }

    pub fn set_creation_time(&self, ts: u64) {
        self.creation_time.store(ts, Ordering::SeqCst);
    }

    pub fn num_hops(&self) -> usize {
        let hops = self.hops.lock().unwrap();
        if hops.is_empty() {
            match &*self.config.lock().unwrap() {
                Some(config) => config.num_hops(),
                None => 0,
            }
        } else {
            hops.len()
        }
    }

    pub fn tunnel_pool(&self) -> Option<Arc<TunnelPool>> {
        self.pool.lock().unwrap().upgrade()
    }

    pub fn set_tunnel_pool(&self, pool: Option<&Arc<TunnelPool>>) {
        *self.pool.lock().unwrap() = match pool {
            Some(pool) => Arc::downgrade(pool),
            None => Weak::new(),
        };
    }

    pub fn add_latency_sample(&self, ms: u32) {
        let mut latency = self.latency.lock().unwrap();
        latency.sum_ms += u64::from(ms);
        latency.samples += 1;
    }

    pub fn mean_latency(&self) -> Option<u32> {
        let latency = self.latency.lock().unwrap();
        if latency.samples == 0 {
            None
        } else {
            Some((latency.sum_ms / u64::from(latency.samples)) as u32)
        }
    }

    pub fn latency_fits_range(&self, lowerbound: u32, upperbound: u32) -> bool {
        match self.mean_latency() {
            Some(latency) => latency >= lowerbound && latency <= upperbound,
            None => false,
        }
    }

    /// The established hop identities in chain order (gateway first).
    pub fn peers(&self) -> Vec<RouterIdentity> {
        let mut peers = self.inverted_peers();
        peers.reverse();
        peers
    }

    /// The established hop identities in stored (reverse) order.
    pub fn inverted_peers(&self) -> Vec<RouterIdentity> {
        self.hops
            .lock()
            .unwrap()
            .iter()
            .map(|hop| hop.ident.clone())
            .collect()
    }

    /// The peers of the pending configuration, if it is still held.
    pub(crate) fn config_peers(&self) -> Vec<RouterIdentity> {
        match &*self.config.lock().unwrap() {
            Some(config) => config.peers(),
            None => Vec::new(),
        }
    }

    /// Assembles and dispatches the build request for this tunnel.
    ///
    /// Real hop records take shuffled slots; the rest of the message is
    /// filled with random bytes indistinguishable from them. Every hop
    /// receives a fresh inner reply message id except the last, which
    /// carries `reply_msg_id`, the correlation id the builder will look for.
    fn build(
        &self,
        reply_msg_id: u32,
        carrier: Option<&Arc<OutboundTunnel>>,
        on_drop: Box<dyn FnOnce() + Send>,
    ) {
        let mut config_guard = self.config.lock().unwrap();
        let config = match config_guard.as_mut() {
            Some(config) => config,
            // Already established and released.
            None => return,
        };

        let num_hops = config.num_hops();
        if num_hops == 0 {
            // Zero-hops tunnels have nothing to build.
            return;
        }
        let num_records = if num_hops <= STANDARD_NUM_RECORDS {
            STANDARD_NUM_RECORDS
        } else {
            MAX_NUM_RECORDS
        };
        let record_size = config.record_size();
        let is_short = config.is_short();
        let mut records = vec![0u8; num_records * record_size];

        // Shuffle the record slots.
        let mut indices: Vec<usize> = (0..num_records).collect();
        let pool = self.tunnel_pool();
        match &pool {
            Some(pool) => indices.shuffle(&mut *pool.rng().lock().unwrap()),
            None => indices.shuffle(&mut StdRng::seed_from_u64(util::clock_seed())),
        }

        // Create the real records.
        let our_ident = self.ctx.our_ident.hash.clone();
        let sealer = self.ctx.record_sealer(is_short);
        let mut record_error = None;
        for (i, hop) in config.hops_mut().iter_mut().enumerate() {
            let msg_id = if i + 1 == num_hops {
                reply_msg_id
            } else {
                OsRng.next_u32()
            };
            hop.record_index = indices[i];
            if let Err(e) = hop.create_build_request_record(&mut records, &our_ident, msg_id, sealer)
            {
                record_error = Some(e);
                break;
            }
        }
        if let Some(e) = record_error {
            error!("Tunnel: Couldn't create build request record: {}", e);
            drop(config_guard);
            self.set_state(TunnelState::BuildFailed);
            return;
        }

        // Fill up the fake records with random data.
        for idx in &indices[num_hops..] {
            OsRng.fill_bytes(&mut records[idx * record_size..][..record_size]);
        }

        // Pre-obfuscate the records after each hop, so the on-the-wire state
        // matches what the hop will see once its predecessors have stripped
        // their layers.
        let hops = config.hops();
        for i in (0..num_hops.saturating_sub(1)).rev() {
            for j in i + 1..num_hops {
                hops[i].decrypt_record(&mut records, hops[j].record_index);
            }
        }

        let mut payload = Vec::with_capacity(1 + records.len());
        payload.push(num_records as u8);
        payload.extend_from_slice(&records);
        let mut msg = Message::from_payload(if is_short {
            MessagePayload::ShortTunnelBuild(BuildRecords(payload))
        } else {
            MessagePayload::VariableTunnelBuild(BuildRecords(payload))
        });
        msg.set_on_drop(on_drop);

        let first_hop = config.hops().first().map(|hop| hop.ident.clone());
        let last_hop = config
            .hops()
            .last()
            .map(|hop| (hop.ident.hash.clone(), hop.next_ident.clone(), hop.garlic_key()));
        drop(config_guard);

        // Send the message.
        match carrier {
            Some(carrier) => {
                if is_short {
                    if let Some(first_hop) = &first_hop {
                        // Don't wrap if the carrier's endpoint is the new
                        // tunnel's gateway.
                        if first_hop.hash != carrier.endpoint_ident_hash() {
                            msg = self.ctx.garlic.wrap_for_router(first_hop, msg);
                        }
                    }
                }
                carrier.send_tunnel_data_msg_to(Some(&self.next_ident), None, msg);
            }
            None => {
                if is_short {
                    if let Some((last_ident, last_next_ident, (key, tag))) = last_hop {
                        // The reply will be injected into a different inbound
                        // tunnel; register a one-time key to open it.
                        if last_ident != last_next_ident {
                            match pool.as_ref().and_then(|pool| pool.local_destination()) {
                                Some(dest) => dest.submit_ecies_key(key, tag),
                                None => self.ctx.garlic.submit_reply_key(key, tag),
                            }
                        }
                    }
                }
                self.ctx.transport.send_message(&self.next_ident, msg);
            }
        }
    }

    /// Interprets the layered build reply.
    ///
    /// `msg` starts at the record-count byte. On acceptance the established
    /// hops are materialized in reverse chain order and the configuration is
    /// released; on any decline or malformation the tunnel fails.
    pub fn handle_tunnel_build_response(&self, msg: &mut [u8]) -> bool {
        let mut config_guard = self.config.lock().unwrap();
        let config = match config_guard.as_mut() {
            Some(config) => config,
            None => return false,
        };

        if msg.is_empty() {
            return false;
        }
        let num = msg[0] as usize;
        debug!("Tunnel: TunnelBuildResponse {} records", num);
        if num > MAX_NUM_RECORDS {
            error!("Tunnel: Too many records in TunnelBuildResponse {}", num);
            drop(config_guard);
            self.set_state(TunnelState::BuildFailed);
            return false;
        }
        if msg.len() < num * config.record_size() + 1 {
            error!(
                "Tunnel: TunnelBuildResponse of {} records is too short {}",
                num,
                msg.len()
            );
            drop(config_guard);
            self.set_state(TunnelState::BuildFailed);
            return false;
        }
        let records = &mut msg[1..];

        // Peel the reply: each hop's own layer off its own slot, then its
        // transform off every slot closer to the gateway.
        let mut peeled = true;
        let hops = config.hops();
        for i in (0..hops.len()).rev() {
            let hop = &hops[i];
            if hop.record_index >= num {
                warn!("Tunnel: Hop index {} is out of range", hop.record_index);
                peeled = false;
                break;
            }
            if !hop.decrypt_build_response_record(records) {
                peeled = false;
                break;
            }
            for j in (0..i).rev() {
                let idx = hops[j].record_index;
                if idx < num {
                    hop.decrypt_record(records, idx);
                } else {
                    warn!("Tunnel: Hop index {} is out of range", idx);
                }
            }
        }
        if !peeled {
            drop(config_guard);
            self.set_state(TunnelState::BuildFailed);
            return false;
        }

        let mut established = true;
        for hop in config.hops() {
            let ret = hop.ret_code(records);
            debug!("Tunnel: Build response ret code={}", ret);
            self.ctx
                .netdb
                .update_router_profile(&hop.ident.hash, ProfileEvent::BuildResponse(ret));
            if ret != 0 {
                // If any of the participants declined, the tunnel is not established.
                established = false;
            }
        }

        if established {
            // Create the layer decryptors from the layer and IV keys, in
            // reverse order.
            let mut tunnel_hops = Vec::with_capacity(config.num_hops());
            for hop in config.hops().iter().rev() {
                tunnel_hops.push(TunnelHop {
                    ident: hop.ident.clone(),
                    decryption: LayerCipher::new(&hop.iv_key, hop.layer_key.clone()),
                });
            }
            *self.hops.lock().unwrap() = tunnel_hops;
            *config_guard = None;
            drop(config_guard);
            self.set_state(TunnelState::Established);
        } else {
            drop(config_guard);
            self.set_state(TunnelState::BuildFailed);
        }
        established
    }

    /// Streams a tunnel-data message through the established hop decryptors
    /// in stored order. The 4-byte tunnel id field is not part of `data` and
    /// is never transformed.
    pub fn encrypt_tunnel_msg(&self, data: &mut [u8; TUNNEL_DATA_MSG_SIZE]) {
        for hop in self.hops.lock().unwrap().iter() {
            hop.decryption.decrypt_layer(data);
        }
    }
}

/// Uniform access to the shared tunnel state of either direction.
pub(crate) trait AsTunnel {
    fn tunnel(&self) -> &Tunnel;
}

impl AsTunnel for InboundTunnel {
    fn tunnel(&self) -> &Tunnel {
        &self.base
    }
}

impl AsTunnel for OutboundTunnel {
    fn tunnel(&self) -> &Tunnel {
        &self.base
    }
}

/// A tunnel whose endpoint is local; remote senders reach it through its
/// gateway.
pub struct InboundTunnel {
    pub(crate) base: Tunnel,
    zero_hops: bool,
    num_received_bytes: AtomicU64,
}

impl InboundTunnel {
    pub(crate) fn new(config: TunnelConfig, ctx: Arc<Context>) -> Self {
        InboundTunnel {
            base: Tunnel::new(config, ctx),
            zero_hops: false,
            num_received_bytes: AtomicU64::new(0),
        }
    }

    /// The degenerate local-only tunnel used for loopback and bootstrap.
    pub(crate) fn zero_hops(ctx: Arc<Context>) -> Self {
        let our_ident = ctx.our_ident.hash.clone();
        InboundTunnel {
            base: Tunnel::new(
                TunnelConfig::zero_hops(our_ident, TunnelDirection::Inbound),
                ctx,
            ),
            zero_hops: true,
            num_received_bytes: AtomicU64::new(0),
        }
    }

    pub fn is_established(&self) -> bool {
        self.base.is_established()
    }

    pub fn state(&self) -> TunnelState {
        self.base.state()
    }

    pub fn next_tunnel_id(&self) -> TunnelId {
        self.base.next_tunnel_id()
    }

    pub fn next_ident(&self) -> &Hash {
        self.base.next_ident()
    }

    pub fn num_hops(&self) -> usize {
        self.base.num_hops()
    }

    pub fn num_received_bytes(&self) -> u64 {
        self.num_received_bytes.load(Ordering::SeqCst)
    }

    pub(crate) fn build(
        self: &Arc<Self>,
        reply_msg_id: u32,
        carrier: Option<&Arc<OutboundTunnel>>,
    ) {
        let tunnel = Arc::clone(self);
        self.base.build(
            reply_msg_id,
            carrier,
            Box::new(move || {
                info!(
                    "Tunnel: Tunnel {} request was not sent",
                    tunnel.base.tunnel_id()
                );
                tunnel.base.set_state(TunnelState::BuildFailed);
            }),
        );
    }

    /// Asks the owning pool to build a replacement through the same chain.
    /// Latches, so a tunnel is recreated at most once.
    pub fn recreate(self: &Arc<Self>) -> bool {
        if !self.base.is_recreated() {
            if let Some(pool) = self.base.tunnel_pool() {
                self.base.set_recreated(true);
                pool.recreate_inbound_tunnel(self);
                return true;
            }
        }
        false
    }
}

impl TunnelBase for InboundTunnel {
    fn tunnel_id(&self) -> TunnelId {
        self.base.tunnel_id()
    }

    fn handle_tunnel_data_msg(&self, mut msg: TunnelData) {
        if !self.base.is_established() && self.base.state() != TunnelState::Expiring {
            // Incoming messages mean the tunnel is alive.
            self.base.set_state(TunnelState::Established);
            if let Some(pool) = self.base.tunnel_pool() {
                if let Some(dest) = pool.local_destination() {
                    dest.set_leaseset_updated();
                }
            }
        }
        self.base.encrypt_tunnel_msg(&mut msg.data);
        self.base
            .ctx
            .endpoint
            .handle_decrypted(self.base.tunnel_id(), msg);
    }

    fn send_tunnel_data_msg(&self, msg: Message) {
        if self.zero_hops {
            self.num_received_bytes
                .fetch_add(msg.byte_len() as u64, Ordering::SeqCst);
            self.base.ctx.local.handle(msg);
        } else {
            warn!("Tunnel: Can't send I2NP messages without delivery instructions");
        }
    }

    fn flush_tunnel_data_msgs(&self) {}

    fn creation_time(&self) -> u64 {
        self.base.creation_time()
    }
}

/// A tunnel whose gateway is local; its endpoint dispatches our messages at
/// the far end.
pub struct OutboundTunnel {
    pub(crate) base: Tunnel,
    zero_hops: bool,
    gateway: Mutex<TunnelGatewayBuffer>,
    num_sent_bytes: AtomicU64,
}

impl OutboundTunnel {
    pub(crate) fn new(config: TunnelConfig, ctx: Arc<Context>) -> Self {
        let gateway = TunnelGatewayBuffer::new(config.next_tunnel_id(), ctx.tunnel_msg_pool.clone());
        OutboundTunnel {
            base: Tunnel::new(config, ctx),
            zero_hops: false,
            gateway: Mutex::new(gateway),
            num_sent_bytes: AtomicU64::new(0),
        }
    }

    pub(crate) fn zero_hops(ctx: Arc<Context>) -> Self {
        let our_ident = ctx.our_ident.hash.clone();
        let config = TunnelConfig::zero_hops(our_ident, TunnelDirection::Outbound);
        let gateway = TunnelGatewayBuffer::new(config.next_tunnel_id(), ctx.tunnel_msg_pool.clone());
        OutboundTunnel {
            base: Tunnel::new(config, ctx),
            zero_hops: true,
            gateway: Mutex::new(gateway),
            num_sent_bytes: AtomicU64::new(0),
        }
    }

    pub fn is_established(&self) -> bool {
        self.base.is_established()
    }

    pub fn state(&self) -> TunnelState {
        self.base.state()
    }

    pub fn num_hops(&self) -> usize {
        self.base.num_hops()
    }

    pub fn num_sent_bytes(&self) -> u64 {
        self.num_sent_bytes.load(Ordering::SeqCst)
    }

    /// The identity at the far end of this tunnel, where its messages are
    /// dispatched.
    pub fn endpoint_ident_hash(&self) -> Hash {
        self.base.far_end_ident().clone()
    }

    /// Wraps a message for the far end with inferred delivery instructions
    /// and sends it through the tunnel.
    pub fn send_tunnel_data_msg_to(
        &self,
        gw_hash: Option<&Hash>,
        gw_tunnel: Option<TunnelId>,
        msg: Message,
    ) {
        let delivery_type = match (gw_hash, gw_tunnel) {
            (Some(hash), Some(tid)) => TunnelMessageDeliveryType::Tunnel(tid, hash.clone()),
            (Some(hash), None) => TunnelMessageDeliveryType::Router(hash.clone()),
            (None, _) => TunnelMessageDeliveryType::Local,
        };
        self.send_tunnel_data_msgs(vec![TunnelMessageBlock { delivery_type, msg }]);
    }

    /// Enqueues the blocks into the gateway and flushes it. The per-tunnel
    /// lock serializes gateway mutation, and flushing inside it keeps the
    /// emission ordered.
    pub fn send_tunnel_data_msgs(&self, msgs: Vec<TunnelMessageBlock>) {
        if self.zero_hops {
            return self.dispatch_locally(msgs);
        }
        let mut gateway = self.gateway.lock().unwrap();
        for block in msgs {
            self.num_sent_bytes
                .fetch_add(block.msg.byte_len() as u64, Ordering::SeqCst);
            gateway.put_tunnel_data_msg(block);
        }
        self.send_buffer(&mut gateway);
    }

    fn send_buffer(&self, gateway: &mut TunnelGatewayBuffer) {
        for mut td in gateway.flush() {
            self.base.encrypt_tunnel_msg(&mut td.data);
            self.base.ctx.transport.send_message(
                &self.base.next_ident,
                Message::from_payload(MessagePayload::TunnelData(td)),
            );
        }
    }

    /// Zero-hops dispatch: no remote gateway, so each block goes straight to
    /// where its delivery type points.
    fn dispatch_locally(&self, msgs: Vec<TunnelMessageBlock>) {
        for block in msgs {
            self.num_sent_bytes
                .fetch_add(block.msg.byte_len() as u64, Ordering::SeqCst);
            match block.delivery_type {
                TunnelMessageDeliveryType::Local => self.base.ctx.local.handle(block.msg),
                TunnelMessageDeliveryType::Tunnel(tid, hash) => {
                    let msg = self.tunnel_gateway_msg(tid, &block.msg);
                    self.base.ctx.transport.send_message(&hash, msg);
                }
                TunnelMessageDeliveryType::Router(hash) => {
                    self.base.ctx.transport.send_message(&hash, block.msg)
                }
            }
        }
    }

    fn tunnel_gateway_msg(&self, tid: TunnelId, msg: &Message) -> Message {
        let buf = self.base.ctx.endpoint_msg_pool.acquire();
        let data = util::serialize_into(buf, crate::i2np::frame::gen_message(msg));
        Message::from_payload(MessagePayload::TunnelGateway(TunnelGateway { tid, data }))
    }

    pub(crate) fn build(
        self: &Arc<Self>,
        reply_msg_id: u32,
        carrier: Option<&Arc<OutboundTunnel>>,
    ) {
        let tunnel = Arc::clone(self);
        self.base.build(
            reply_msg_id,
            carrier,
            Box::new(move || {
                info!(
                    "Tunnel: Tunnel {} request was not sent",
                    tunnel.base.tunnel_id()
                );
                tunnel.base.set_state(TunnelState::BuildFailed);
            }),
        );
    }

    /// Asks the owning pool to build a replacement through the same chain.
    /// Latches, so a tunnel is recreated at most once.
    pub fn recreate(self: &Arc<Self>) -> bool {
        if !self.base.is_recreated() {
            if let Some(pool) = self.base.tunnel_pool() {
                self.base.set_recreated(true);
                pool.recreate_outbound_tunnel(self);
                return true;
            }
        }
        false
    }
}

impl TunnelBase for OutboundTunnel {
    fn tunnel_id(&self) -> TunnelId {
        self.base.tunnel_id()
    }

    fn handle_tunnel_data_msg(&self, _msg: TunnelData) {
        error!(
            "Tunnel: Incoming message for outbound tunnel {}",
            self.base.tunnel_id()
        );
    }

    fn send_tunnel_data_msg(&self, _msg: Message) {
        warn!("Tunnel: Can't send I2NP messages without delivery instructions");
    }

    fn flush_tunnel_data_msgs(&self) {
        let mut gateway = self.gateway.lock().unwrap();
        self.send_buffer(&mut gateway);
    }

    fn creation_time(&self) -> u64 {
        self.base.creation_time()
    }
}

#[cfg(test)]
mod tests;
