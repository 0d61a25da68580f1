//! The tunnels engine: the registry of live tunnels, the dispatch loop that
//! routes incoming I2NP messages to them, and the lifecycle management that
//! keeps the population replenished.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{rngs::OsRng, Rng, RngCore, SeedableRng};
use std::collections::{hash_map::Entry, HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use super::pool::{PoolSettings, TunnelPool};
use super::{
    AsTunnel, InboundTunnel, OutboundTunnel, TunnelBase, TunnelConfig, TunnelState,
};
use crate::constants::{
    DEFAULT_MAX_NUM_TRANSIT_TUNNELS, MAX_TUNNEL_MSGS_BATCH_SIZE, TCSR_SMOOTHING_CONSTANT,
    TCSR_START_VALUE, TUNNEL_CREATION_TIMEOUT, TUNNEL_EXPIRATION_THRESHOLD,
    TUNNEL_EXPIRATION_TIMEOUT, TUNNEL_MANAGE_INTERVAL, TUNNEL_MEMORY_POOL_MANAGE_INTERVAL,
    TUNNEL_POOLS_MANAGE_INTERVAL, TUNNEL_RECREATION_THRESHOLD,
};
use crate::data::{ProfileEvent, TunnelId};
use crate::i2np::{frame, Message, MessagePayload, TunnelGateway};
use crate::router::Context;
use crate::util;

/// A tunnel queued for recreation during a lifecycle tick.
enum RecreateCandidate {
    Inbound(Arc<InboundTunnel>),
    Outbound(Arc<OutboundTunnel>),
}

impl RecreateCandidate {
    fn recreate(&self) {
        match self {
            RecreateCandidate::Inbound(tunnel) => {
                tunnel.recreate();
            }
            RecreateCandidate::Outbound(tunnel) => {
                tunnel.recreate();
            }
        }
    }
}

/// The tunnel engine.
///
/// One dedicated worker thread runs the dispatch loop; everything else
/// interacts with the engine by posting messages to its queue or through the
/// lock-guarded registry and pool APIs.
pub struct Tunnels {
    engine: Arc<Engine>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Tunnels {
    pub fn new(ctx: Arc<Context>) -> Self {
        Tunnels {
            engine: Engine::new(ctx),
            thread: Mutex::new(None),
        }
    }

    /// Spawns the dispatch thread.
    pub fn start(&self) {
        self.engine.is_running.store(true, Ordering::SeqCst);
        if let Some(rx) = self.engine.queue_rx.lock().unwrap().take() {
            let engine = self.engine.clone();
            let handle = thread::Builder::new()
                .name("Tunnels".to_string())
                .spawn(move || engine.run(rx))
                .expect("failed to spawn tunnels thread");
            *self.thread.lock().unwrap() = Some(handle);
        }
    }

    /// Stops and joins the dispatch thread. Nothing further is drained from
    /// the queue.
    pub fn stop(&self) {
        self.engine.is_running.store(false, Ordering::SeqCst);
        // Wake the queue so the worker notices.
        let _ = self
            .engine
            .queue_tx
            .lock()
            .unwrap()
            .send(Message::dummy_data());
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    /// Thread-safe enqueue into the dispatch queue.
    pub fn post_tunnel_data(&self, msg: Message) {
        self.engine.post_tunnel_data(msg);
    }

    pub fn post_tunnel_data_msgs(&self, msgs: Vec<Message>) {
        let tx = self.engine.queue_tx.lock().unwrap();
        for msg in msgs {
            let _ = tx.send(msg);
        }
    }

    pub fn get_tunnel(&self, tid: TunnelId) -> Option<Arc<dyn TunnelBase>> {
        self.engine.get_tunnel(tid)
    }

    pub fn add_tunnel(&self, tunnel: Arc<dyn TunnelBase>) -> bool {
        self.engine.add_tunnel(tunnel)
    }

    pub fn remove_tunnel(&self, tid: TunnelId) {
        self.engine.remove_tunnel(tid);
    }

    /// The established inbound tunnel with the lowest received-byte count.
    pub fn get_next_inbound_tunnel(&self) -> Option<Arc<InboundTunnel>> {
        self.engine.get_next_inbound_tunnel()
    }

    /// A uniformly random established outbound tunnel.
    pub fn get_next_outbound_tunnel(&self) -> Option<Arc<OutboundTunnel>> {
        self.engine.get_next_outbound_tunnel()
    }

    pub fn create_tunnel_pool(&self, settings: PoolSettings) -> Arc<TunnelPool> {
        self.engine.create_tunnel_pool(settings)
    }

    pub fn delete_tunnel_pool(&self, pool: &Arc<TunnelPool>) {
        self.engine.delete_tunnel_pool(pool);
    }

    pub fn stop_tunnel_pool(&self, pool: &Arc<TunnelPool>) {
        self.engine.stop_tunnel_pool(pool);
    }

    pub fn create_inbound_tunnel(
        &self,
        config: Option<TunnelConfig>,
        pool: Option<&Arc<TunnelPool>>,
        carrier: Option<&Arc<OutboundTunnel>>,
    ) -> Arc<InboundTunnel> {
        self.engine.create_inbound_tunnel(config, pool, carrier)
    }

    pub fn create_outbound_tunnel(
        &self,
        config: Option<TunnelConfig>,
        pool: Option<&Arc<TunnelPool>>,
        carrier: Option<&Arc<OutboundTunnel>>,
    ) -> Arc<OutboundTunnel> {
        self.engine.create_outbound_tunnel(config, pool, carrier)
    }

    /// Advisory: a snapshot under the list lock, possibly already stale.
    pub fn count_inbound_tunnels(&self) -> usize {
        self.engine.inbound.lock().unwrap().len()
    }

    /// Advisory: a snapshot under the list lock, possibly already stale.
    pub fn count_outbound_tunnels(&self) -> usize {
        self.engine.outbound.lock().unwrap().len()
    }

    pub fn set_max_num_transit_tunnels(&self, max: u32) {
        self.engine.set_max_num_transit_tunnels(max);
    }

    pub fn max_num_transit_tunnels(&self) -> u32 {
        self.engine.max_num_transit_tunnels.load(Ordering::SeqCst)
    }

    pub fn tunnel_creation_success_rate(&self) -> f64 {
        self.engine.tunnel_creation_success_rate()
    }

    #[cfg(test)]
    pub(crate) fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }
}

impl Drop for Tunnels {
    fn drop(&mut self) {
        if self.engine.is_running() {
            self.stop();
        }
        let exploratory = self.engine.exploratory_pool.lock().unwrap().take();
        if let Some(pool) = exploratory {
            self.engine.delete_tunnel_pool(&pool);
        }
    }
}

pub(crate) struct Engine {
    ctx: Arc<Context>,
    is_running: AtomicBool,
    queue_tx: Mutex<Sender<Message>>,
    queue_rx: Mutex<Option<Receiver<Message>>>,
    tunnels: Mutex<HashMap<u32, Arc<dyn TunnelBase>>>,
    inbound: Mutex<Vec<Arc<InboundTunnel>>>,
    outbound: Mutex<Vec<Arc<OutboundTunnel>>>,
    pending_inbound: Mutex<HashMap<u32, Arc<InboundTunnel>>>,
    pending_outbound: Mutex<HashMap<u32, Arc<OutboundTunnel>>>,
    pools: Mutex<Vec<Arc<TunnelPool>>>,
    exploratory_pool: Mutex<Option<Arc<TunnelPool>>>,
    rng: Mutex<StdRng>,
    max_num_transit_tunnels: AtomicU32,
    total_successive_creations: AtomicU64,
    total_failed_creations: AtomicU64,
    creation_success_rate: Mutex<f64>,
    creation_attempts: AtomicU64,
}

impl Engine {
    fn new(ctx: Arc<Context>) -> Arc<Self> {
        let (tx, rx) = mpsc::channel();
        Arc::new(Engine {
            ctx,
            is_running: AtomicBool::new(false),
            queue_tx: Mutex::new(tx),
            queue_rx: Mutex::new(Some(rx)),
            tunnels: Mutex::new(HashMap::new()),
            inbound: Mutex::new(Vec::new()),
            outbound: Mutex::new(Vec::new()),
            pending_inbound: Mutex::new(HashMap::new()),
            pending_outbound: Mutex::new(HashMap::new()),
            pools: Mutex::new(Vec::new()),
            exploratory_pool: Mutex::new(None),
            rng: Mutex::new(StdRng::seed_from_u64(util::clock_seed())),
            max_num_transit_tunnels: AtomicU32::new(DEFAULT_MAX_NUM_TRANSIT_TUNNELS),
            total_successive_creations: AtomicU64::new(0),
            total_failed_creations: AtomicU64::new(0),
            creation_success_rate: Mutex::new(TCSR_START_VALUE),
            creation_attempts: AtomicU64::new(0),
        })
    }

    pub(crate) fn ctx(&self) -> &Arc<Context> {
        &self.ctx
    }

    fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    pub(crate) fn post_tunnel_data(&self, msg: Message) {
        let _ = self.queue_tx.lock().unwrap().send(msg);
    }

    //
    // Registry
    //

    pub(crate) fn get_tunnel(&self, tid: TunnelId) -> Option<Arc<dyn TunnelBase>> {
        self.tunnels.lock().unwrap().get(&tid.0).cloned()
    }

    /// Registers a tunnel under its id. Fails on a collision, leaving the
    /// existing tunnel in place.
    pub(crate) fn add_tunnel(&self, tunnel: Arc<dyn TunnelBase>) -> bool {
        match self.tunnels.lock().unwrap().entry(tunnel.tunnel_id().0) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                entry.insert(tunnel);
                true
            }
        }
    }

    pub(crate) fn remove_tunnel(&self, tid: TunnelId) {
        self.tunnels.lock().unwrap().remove(&tid.0);
    }

    //
    // Selection
    //

    pub(crate) fn get_next_inbound_tunnel(&self) -> Option<Arc<InboundTunnel>> {
        let inbound = self.inbound.lock().unwrap();
        let mut selected: Option<&Arc<InboundTunnel>> = None;
        let mut min_received = 0;
        for tunnel in inbound.iter() {
            if !tunnel.is_established() {
                continue;
            }
            if selected.is_none() || tunnel.num_received_bytes() < min_received {
                min_received = tunnel.num_received_bytes();
                selected = Some(tunnel);
            }
        }
        selected.cloned()
    }

    pub(crate) fn get_next_outbound_tunnel(&self) -> Option<Arc<OutboundTunnel>> {
        let outbound = self.outbound.lock().unwrap();
        let established: Vec<&Arc<OutboundTunnel>> =
            outbound.iter().filter(|t| t.is_established()).collect();
        if established.is_empty() {
            return None;
        }
        let idx = self.rng.lock().unwrap().gen_range(0..established.len());
        Some(established[idx].clone())
    }

    //
    // Pools
    //

    pub(crate) fn create_tunnel_pool(self: &Arc<Self>, settings: PoolSettings) -> Arc<TunnelPool> {
        let pool = TunnelPool::new(settings, Arc::downgrade(self));
        self.pools.lock().unwrap().push(pool.clone());
        pool
    }

    pub(crate) fn delete_tunnel_pool(&self, pool: &Arc<TunnelPool>) {
        self.stop_tunnel_pool(pool);
        self.pools.lock().unwrap().retain(|p| !Arc::ptr_eq(p, pool));
    }

    pub(crate) fn stop_tunnel_pool(&self, pool: &Arc<TunnelPool>) {
        pool.set_active(false);
        pool.detach_tunnels();
    }

    pub(crate) fn count_pending_inbound_for(&self, pool: &Arc<TunnelPool>) -> usize {
        self.pending_inbound
            .lock()
            .unwrap()
            .values()
            .filter(|t| matches!(t.base.tunnel_pool(), Some(p) if Arc::ptr_eq(&p, pool)))
            .count()
    }

    pub(crate) fn count_pending_outbound_for(&self, pool: &Arc<TunnelPool>) -> usize {
        self.pending_outbound
            .lock()
            .unwrap()
            .values()
            .filter(|t| matches!(t.base.tunnel_pool(), Some(p) if Arc::ptr_eq(&p, pool)))
            .count()
    }

    //
    // Tunnel creation
    //

    pub(crate) fn create_inbound_tunnel(
        self: &Arc<Self>,
        config: Option<TunnelConfig>,
        pool: Option<&Arc<TunnelPool>>,
        carrier: Option<&Arc<OutboundTunnel>>,
    ) -> Arc<InboundTunnel> {
        let config = match config {
            Some(config) => config,
            None => return self.create_zero_hops_inbound_tunnel(pool),
        };
        let tunnel = Arc::new(InboundTunnel::new(config, self.ctx.clone()));
        tunnel.base.set_tunnel_pool(pool);
        let reply_msg_id = OsRng.next_u32();
        self.pending_inbound
            .lock()
            .unwrap()
            .insert(reply_msg_id, tunnel.clone());
        tunnel.build(reply_msg_id, carrier);
        tunnel
    }

    pub(crate) fn create_outbound_tunnel(
        self: &Arc<Self>,
        config: Option<TunnelConfig>,
        pool: Option<&Arc<TunnelPool>>,
        carrier: Option<&Arc<OutboundTunnel>>,
    ) -> Arc<OutboundTunnel> {
        let config = match config {
            Some(config) => config,
            None => return self.create_zero_hops_outbound_tunnel(pool),
        };
        let tunnel = Arc::new(OutboundTunnel::new(config, self.ctx.clone()));
        tunnel.base.set_tunnel_pool(pool);
        let reply_msg_id = OsRng.next_u32();
        self.pending_outbound
            .lock()
            .unwrap()
            .insert(reply_msg_id, tunnel.clone());
        tunnel.build(reply_msg_id, carrier);
        tunnel
    }

    fn create_zero_hops_inbound_tunnel(
        &self,
        pool: Option<&Arc<TunnelPool>>,
    ) -> Arc<InboundTunnel> {
        let tunnel = Arc::new(InboundTunnel::zero_hops(self.ctx.clone()));
        tunnel.base.set_tunnel_pool(pool);
        tunnel.base.set_state(TunnelState::Established);
        self.inbound.lock().unwrap().push(tunnel.clone());
        self.add_tunnel(tunnel.clone());
        tunnel
    }

    fn create_zero_hops_outbound_tunnel(
        &self,
        pool: Option<&Arc<TunnelPool>>,
    ) -> Arc<OutboundTunnel> {
        let tunnel = Arc::new(OutboundTunnel::zero_hops(self.ctx.clone()));
        tunnel.base.set_tunnel_pool(pool);
        tunnel.base.set_state(TunnelState::Established);
        // Outbound tunnels are not looked up by id.
        self.outbound.lock().unwrap().push(tunnel.clone());
        tunnel
    }

    fn add_inbound_tunnel(self: &Arc<Self>, tunnel: Arc<InboundTunnel>) {
        if self.add_tunnel(tunnel.clone()) {
            self.inbound.lock().unwrap().push(tunnel.clone());
            match tunnel.base.tunnel_pool() {
                None => {
                    // Build a symmetric outbound tunnel through the inverse
                    // of this tunnel's hops.
                    let config = TunnelConfig::outbound(
                        tunnel.base.inverted_peers(),
                        tunnel.next_tunnel_id(),
                        tunnel.next_ident().clone(),
                        tunnel.base.is_short_build_message(),
                    );
                    let carrier = self.get_next_outbound_tunnel();
                    self.create_outbound_tunnel(Some(config), None, carrier.as_ref());
                }
                Some(pool) => {
                    if pool.is_active() {
                        pool.inbound_tunnel_created(&tunnel);
                    } else {
                        tunnel.base.set_tunnel_pool(None);
                    }
                }
            }
        } else {
            error!(
                "Tunnel: Tunnel with id {} already exists",
                tunnel.tunnel_id()
            );
        }
    }

    fn add_outbound_tunnel(&self, tunnel: Arc<OutboundTunnel>) {
        // We don't register outbound tunnels by id.
        self.outbound.lock().unwrap().push(tunnel.clone());
        match tunnel.base.tunnel_pool() {
            Some(pool) => {
                if pool.is_active() {
                    pool.outbound_tunnel_created(&tunnel);
                } else {
                    tunnel.base.set_tunnel_pool(None);
                }
            }
            None => (),
        }
    }

    //
    // Pending tunnels
    //

    fn get_pending_inbound_tunnel(&self, reply_msg_id: u32) -> Option<Arc<InboundTunnel>> {
        Self::get_pending_tunnel(&self.pending_inbound, reply_msg_id)
    }

    fn get_pending_outbound_tunnel(&self, reply_msg_id: u32) -> Option<Arc<OutboundTunnel>> {
        Self::get_pending_tunnel(&self.pending_outbound, reply_msg_id)
    }

    /// The first matching reply wins: the state moves out of `Pending`, so
    /// duplicates no longer find the entry.
    fn get_pending_tunnel<T: AsTunnel>(
        pending: &Mutex<HashMap<u32, Arc<T>>>,
        reply_msg_id: u32,
    ) -> Option<Arc<T>> {
        if let Some(tunnel) = pending.lock().unwrap().get(&reply_msg_id) {
            if tunnel.tunnel().state() == TunnelState::Pending {
                tunnel
                    .tunnel()
                    .set_state(TunnelState::BuildReplyReceived);
                return Some(tunnel.clone());
            }
        }
        None
    }

    //
    // Dispatch loop
    //

    fn run(self: Arc<Self>, rx: Receiver<Message>) {
        // Wait for the other router parts to come up.
        thread::sleep(Duration::from_secs(1));

        let mut last_ts = 0u64;
        let mut last_pools_ts = 0u64;
        let mut last_memory_pool_ts = 0u64;
        while self.is_running() {
            let iteration = panic::catch_unwind(AssertUnwindSafe(|| {
                self.run_iteration(
                    &rx,
                    &mut last_ts,
                    &mut last_pools_ts,
                    &mut last_memory_pool_ts,
                );
            }));
            if iteration.is_err() {
                error!("Tunnel: Runtime fault in dispatch loop");
            }
        }
    }

    fn run_iteration(
        self: &Arc<Self>,
        rx: &Receiver<Message>,
        last_ts: &mut u64,
        last_pools_ts: &mut u64,
        last_memory_pool_ts: &mut u64,
    ) {
        match rx.recv_timeout(Duration::from_secs(1)) {
            Ok(msg) => {
                if !self.is_running() {
                    return;
                }
                let mut msgs = VecDeque::new();
                msgs.push_back(msg);
                msgs.extend(rx.try_iter());
                self.process_batch(rx, msgs);
            }
            Err(RecvTimeoutError::Timeout) => (),
            Err(RecvTimeoutError::Disconnected) => {
                self.is_running.store(false, Ordering::SeqCst);
                return;
            }
        }

        if self.ctx.transport.is_online() {
            let ts = util::seconds_since_epoch();
            // Either direction of a large delta re-arms the schedule, so a
            // backward clock jump cannot wedge it.
            if ts >= *last_ts + TUNNEL_MANAGE_INTERVAL || ts + TUNNEL_MANAGE_INTERVAL < *last_ts {
                self.manage_tunnels(ts);
                *last_ts = ts;
            }
            if ts >= *last_pools_ts + TUNNEL_POOLS_MANAGE_INTERVAL
                || ts + TUNNEL_POOLS_MANAGE_INTERVAL < *last_pools_ts
            {
                self.manage_tunnel_pools(ts);
                *last_pools_ts = ts;
            }
            if ts >= *last_memory_pool_ts + TUNNEL_MEMORY_POOL_MANAGE_INTERVAL
                || ts + TUNNEL_MEMORY_POOL_MANAGE_INTERVAL < *last_memory_pool_ts
            {
                self.ctx.tunnel_msg_pool.clean_up();
                self.ctx.endpoint_msg_pool.clean_up();
                *last_memory_pool_ts = ts;
            }
        }
    }

    /// Routes one batch of queued messages, swallowing more from the queue
    /// while the batch stays under `MAX_TUNNEL_MSGS_BATCH_SIZE`. Consecutive
    /// messages for the same tunnel id skip the registry lookup and share
    /// one gateway flush.
    fn process_batch(self: &Arc<Self>, rx: &Receiver<Message>, mut msgs: VecDeque<Message>) {
        let mut num_msgs = 0usize;
        let mut prev_tunnel_id = TunnelId(0);
        let mut prev_tunnel: Option<Arc<dyn TunnelBase>> = None;
        while let Some(msg) = msgs.pop_front() {
            let mut tunnel_id = prev_tunnel_id;
            let mut tunnel: Option<Arc<dyn TunnelBase>> = None;

            let data_tid = match &msg.payload {
                MessagePayload::TunnelData(td) => Some(td.tid),
                MessagePayload::TunnelGateway(tg) => Some(tg.tid),
                _ => None,
            };
            match data_tid {
                Some(tid) => {
                    tunnel_id = tid;
                    if tunnel_id == prev_tunnel_id {
                        tunnel = prev_tunnel.clone();
                    } else if let Some(prev) = prev_tunnel.take() {
                        prev.flush_tunnel_data_msgs();
                    }
                    if tunnel.is_none() {
                        tunnel = self.get_tunnel(tunnel_id);
                    }
                    match &tunnel {
                        Some(t) => match msg.payload {
                            MessagePayload::TunnelData(td) => t.handle_tunnel_data_msg(td),
                            MessagePayload::TunnelGateway(tg) => {
                                Self::handle_tunnel_gateway_msg(t, tg)
                            }
                            _ => (),
                        },
                        None => warn!(
                            "Tunnel: Tunnel not found, tunnelID={} previousTunnelID={}",
                            tunnel_id, prev_tunnel_id
                        ),
                    }
                }
                None => self.dispatch_non_data_msg(msg),
            }

            prev_tunnel_id = tunnel_id;
            prev_tunnel = tunnel.clone();
            num_msgs += 1;

            if msgs.is_empty() {
                if num_msgs < MAX_TUNNEL_MSGS_BATCH_SIZE {
                    // Try more.
                    msgs.extend(rx.try_iter());
                }
                if msgs.is_empty() {
                    // Otherwise flush the last tunnel.
                    if let Some(t) = &tunnel {
                        t.flush_tunnel_data_msgs();
                    }
                }
            }
        }
    }

    fn dispatch_non_data_msg(self: &Arc<Self>, msg: Message) {
        match msg.payload {
            MessagePayload::ShortTunnelBuild(_) => self.handle_short_tunnel_build_msg(msg),
            MessagePayload::VariableTunnelBuild(_) => self.handle_variable_tunnel_build_msg(msg),
            MessagePayload::ShortTunnelBuildReply(_) => {
                self.handle_tunnel_build_reply_msg(msg, true)
            }
            MessagePayload::VariableTunnelBuildReply(_) => {
                self.handle_tunnel_build_reply_msg(msg, false)
            }
            MessagePayload::TunnelBuild(_) | MessagePayload::TunnelBuildReply(_) => {
                warn!("Tunnel: TunnelBuild is too old for an ECIES router")
            }
            _ => warn!("Tunnel: Unexpected message {:?}", msg),
        }
    }

    /// Reinterprets a gateway payload as a nested I2NP message and feeds it
    /// into the located tunnel.
    fn handle_tunnel_gateway_msg(tunnel: &Arc<dyn TunnelBase>, tg: TunnelGateway) {
        match frame::message(&tg.data) {
            Ok((_, nested)) => {
                debug!(
                    "Tunnel: Gateway of {} bytes for tunnel {}, msg {:?}",
                    tg.data.len(),
                    tunnel.tunnel_id(),
                    nested
                );
                tunnel.send_tunnel_data_msg(nested);
            }
            Err(_) => error!(
                "Tunnel: Invalid gateway payload for tunnel {}",
                tunnel.tunnel_id()
            ),
        }
    }

    fn handle_short_tunnel_build_msg(self: &Arc<Self>, msg: Message) {
        match self.get_pending_inbound_tunnel(msg.id) {
            Some(tunnel) => {
                // Endpoint of an inbound tunnel.
                debug!(
                    "Tunnel: ShortTunnelBuild reply for tunnel {}",
                    tunnel.tunnel_id()
                );
                let mut records = match msg.payload {
                    MessagePayload::ShortTunnelBuild(records) => records,
                    _ => return,
                };
                if tunnel.base.handle_tunnel_build_response(&mut records.0) {
                    info!(
                        "Tunnel: Inbound tunnel {} has been created",
                        tunnel.tunnel_id()
                    );
                    self.add_inbound_tunnel(tunnel);
                } else {
                    info!(
                        "Tunnel: Inbound tunnel {} has been declined",
                        tunnel.tunnel_id()
                    );
                    tunnel.base.set_state(TunnelState::BuildFailed);
                }
            }
            None => self.post_transit_build_msg(msg),
        }
    }

    fn handle_variable_tunnel_build_msg(self: &Arc<Self>, msg: Message) {
        match self.get_pending_inbound_tunnel(msg.id) {
            Some(tunnel) => {
                debug!(
                    "Tunnel: VariableTunnelBuild reply for tunnel {}",
                    tunnel.tunnel_id()
                );
                let mut records = match msg.payload {
                    MessagePayload::VariableTunnelBuild(records) => records,
                    _ => return,
                };
                if tunnel.base.handle_tunnel_build_response(&mut records.0) {
                    info!(
                        "Tunnel: Inbound tunnel {} has been created",
                        tunnel.tunnel_id()
                    );
                    self.add_inbound_tunnel(tunnel);
                } else {
                    info!(
                        "Tunnel: Inbound tunnel {} has been declined",
                        tunnel.tunnel_id()
                    );
                    tunnel.base.set_state(TunnelState::BuildFailed);
                }
            }
            None => self.post_transit_build_msg(msg),
        }
    }

    fn post_transit_build_msg(&self, msg: Message) {
        match &self.ctx.transit {
            Some(transit) => transit.post_build_message(msg),
            None => debug!("Tunnel: No transit subsystem, dropping build message"),
        }
    }

    fn handle_tunnel_build_reply_msg(self: &Arc<Self>, msg: Message, is_short: bool) {
        match self.get_pending_outbound_tunnel(msg.id) {
            Some(tunnel) => {
                // Reply for an outbound tunnel.
                debug!(
                    "Tunnel: TunnelBuildReply for tunnel {} (short: {})",
                    tunnel.tunnel_id(),
                    is_short
                );
                let mut records = match msg.payload {
                    MessagePayload::ShortTunnelBuildReply(records)
                    | MessagePayload::VariableTunnelBuildReply(records) => records,
                    _ => return,
                };
                if tunnel.base.handle_tunnel_build_response(&mut records.0) {
                    info!(
                        "Tunnel: Outbound tunnel {} has been created",
                        tunnel.tunnel_id()
                    );
                    self.add_outbound_tunnel(tunnel);
                } else {
                    info!(
                        "Tunnel: Outbound tunnel {} has been declined",
                        tunnel.tunnel_id()
                    );
                    tunnel.base.set_state(TunnelState::BuildFailed);
                }
            }
            None => warn!("Tunnel: Pending tunnel for message {} not found", msg.id),
        }
    }

    //
    // Lifecycle management
    //

    pub(crate) fn manage_tunnels(self: &Arc<Self>, ts: u64) {
        self.manage_pending_tunnels(ts);
        let mut to_recreate = Vec::new();
        self.manage_inbound_tunnels(ts, &mut to_recreate);
        self.manage_outbound_tunnels(ts, &mut to_recreate);
        // Recreate in random order, so replacements are not correlated.
        if to_recreate.len() > 1 {
            to_recreate.shuffle(&mut *self.rng.lock().unwrap());
        }
        for candidate in &to_recreate {
            candidate.recreate();
        }
    }

    pub(crate) fn manage_pending_tunnels(&self, ts: u64) {
        let (successes, failures) =
            Self::sweep_pending(&self.ctx, &mut self.pending_inbound.lock().unwrap(), ts);
        self.record_creations(successes, failures);
        let (successes, failures) =
            Self::sweep_pending(&self.ctx, &mut self.pending_outbound.lock().unwrap(), ts);
        self.record_creations(successes, failures);
    }

    /// Checks pending tunnels, deleting the failed and timed out.
    fn sweep_pending<T: AsTunnel>(
        ctx: &Context,
        pending: &mut HashMap<u32, Arc<T>>,
        ts: u64,
    ) -> (u64, u64) {
        let mut successes = 0;
        let mut failures = 0;
        pending.retain(|reply_msg_id, tunnel| {
            let tunnel = tunnel.tunnel();
            match tunnel.state() {
                TunnelState::Pending => {
                    if ts > tunnel.creation_time() + TUNNEL_CREATION_TIMEOUT
                        || ts + TUNNEL_CREATION_TIMEOUT < tunnel.creation_time()
                    {
                        debug!(
                            "Tunnel: Pending build request {} timeout, deleted",
                            reply_msg_id
                        );
                        for peer in tunnel.config_peers() {
                            ctx.netdb
                                .update_router_profile(&peer.hash, ProfileEvent::NonReplied);
                        }
                        failures += 1;
                        false
                    } else {
                        true
                    }
                }
                TunnelState::BuildFailed => {
                    debug!(
                        "Tunnel: Pending build request {} failed, deleted",
                        reply_msg_id
                    );
                    failures += 1;
                    false
                }
                // Intermediate state, will become established or failed.
                TunnelState::BuildReplyReceived => true,
                // Success.
                _ => {
                    successes += 1;
                    false
                }
            }
        });
        (successes, failures)
    }

    fn manage_inbound_tunnels(
        self: &Arc<Self>,
        ts: u64,
        to_recreate: &mut Vec<RecreateCandidate>,
    ) {
        {
            let mut inbound = self.inbound.lock().unwrap();
            inbound.retain(|tunnel| {
                let base = &tunnel.base;
                if base.is_failed()
                    || ts > base.creation_time() + TUNNEL_EXPIRATION_TIMEOUT
                    || ts + TUNNEL_EXPIRATION_TIMEOUT < base.creation_time()
                {
                    debug!(
                        "Tunnel: Tunnel with id {} expired or failed",
                        base.tunnel_id()
                    );
                    if let Some(pool) = base.tunnel_pool() {
                        pool.inbound_tunnel_expired(tunnel);
                    }
                    self.remove_tunnel(base.tunnel_id());
                    false
                } else {
                    if base.is_established() {
                        if !base.is_recreated()
                            && ts + TUNNEL_RECREATION_THRESHOLD
                                > base.creation_time() + TUNNEL_EXPIRATION_TIMEOUT
                        {
                            // Let it die if the pool was reconfigured with a
                            // different length.
                            if let Some(pool) = base.tunnel_pool() {
                                if base.num_hops() == pool.num_inbound_hops() {
                                    to_recreate.push(RecreateCandidate::Inbound(tunnel.clone()));
                                }
                            }
                        }
                        if ts + TUNNEL_EXPIRATION_THRESHOLD
                            > base.creation_time() + TUNNEL_EXPIRATION_TIMEOUT
                        {
                            base.set_state(TunnelState::Expiring);
                        }
                    }
                    true
                }
            });
        }

        if self.inbound.lock().unwrap().is_empty() {
            debug!("Tunnel: Creating zero hops inbound tunnel");
            self.create_zero_hops_inbound_tunnel(None);
            self.create_zero_hops_outbound_tunnel(None);
            let mut exploratory = self.exploratory_pool.lock().unwrap();
            if exploratory.is_none() {
                let config = &self.ctx.config;
                *exploratory = Some(self.create_tunnel_pool(PoolSettings {
                    num_inbound_hops: config.exploratory_inbound_length,
                    num_outbound_hops: config.exploratory_outbound_length,
                    num_inbound_tunnels: config.exploratory_inbound_quantity,
                    num_outbound_tunnels: config.exploratory_outbound_quantity,
                    inbound_variance: 0,
                    outbound_variance: 0,
                    high_bandwidth: false,
                }));
            }
            return;
        }

        if self.outbound.lock().unwrap().is_empty() || self.inbound.lock().unwrap().len() < 3 {
            // Try to create one more inbound tunnel. It has one hop, so the
            // router must be reachable by us: we send the build request
            // directly.
            let router = if self.ctx.transport.routes_restricted() {
                self.ctx.transport.restricted_peer()
            } else {
                self.ctx.netdb.random_router(&self.ctx.our_ident.hash, true)
            };
            let router = match router {
                Some(router) => router,
                None => {
                    warn!("Tunnel: Can't find any router, skip creating tunnel");
                    return;
                }
            };
            debug!("Tunnel: Creating one hop inbound tunnel");
            let config = TunnelConfig::inbound(vec![router], &self.ctx.our_ident.hash, false);
            self.create_inbound_tunnel(Some(config), None, None);
        }
    }

    fn manage_outbound_tunnels(
        self: &Arc<Self>,
        ts: u64,
        to_recreate: &mut Vec<RecreateCandidate>,
    ) {
        {
            let mut outbound = self.outbound.lock().unwrap();
            outbound.retain(|tunnel| {
                let base = &tunnel.base;
                if base.is_failed()
                    || ts > base.creation_time() + TUNNEL_EXPIRATION_TIMEOUT
                    || ts + TUNNEL_EXPIRATION_TIMEOUT < base.creation_time()
                {
                    debug!(
                        "Tunnel: Tunnel with id {} expired or failed",
                        base.tunnel_id()
                    );
                    if let Some(pool) = base.tunnel_pool() {
                        pool.outbound_tunnel_expired(tunnel);
                    }
                    // We don't keep outbound tunnels in the registry.
                    false
                } else {
                    if base.is_established() {
                        if !base.is_recreated()
                            && ts + TUNNEL_RECREATION_THRESHOLD
                                > base.creation_time() + TUNNEL_EXPIRATION_TIMEOUT
                        {
                            if let Some(pool) = base.tunnel_pool() {
                                if base.num_hops() == pool.num_outbound_hops() {
                                    to_recreate.push(RecreateCandidate::Outbound(tunnel.clone()));
                                }
                            }
                        }
                        if ts + TUNNEL_EXPIRATION_THRESHOLD
                            > base.creation_time() + TUNNEL_EXPIRATION_TIMEOUT
                        {
                            base.set_state(TunnelState::Expiring);
                        }
                    }
                    true
                }
            });
        }

        if self.outbound.lock().unwrap().len() < 3 {
            // Try to create one more outbound tunnel.
            let inbound_tunnel = self.get_next_inbound_tunnel();
            let router = if self.ctx.transport.routes_restricted() {
                self.ctx.transport.restricted_peer()
            } else {
                self.ctx.netdb.random_router(&self.ctx.our_ident.hash, true)
            };
            let (inbound_tunnel, router) = match (inbound_tunnel, router) {
                (Some(inbound_tunnel), Some(router)) => (inbound_tunnel, router),
                _ => return,
            };
            debug!("Tunnel: Creating one hop outbound tunnel");
            let config = TunnelConfig::outbound(
                vec![router],
                inbound_tunnel.next_tunnel_id(),
                inbound_tunnel.next_ident().clone(),
                false,
            );
            self.create_outbound_tunnel(Some(config), None, None);
        }
    }

    fn manage_tunnel_pools(self: &Arc<Self>, ts: u64) {
        let pools: Vec<Arc<TunnelPool>> = self.pools.lock().unwrap().clone();
        for pool in pools {
            if pool.is_active() {
                pool.manage_tunnels(ts);
            }
        }
    }

    //
    // Creation statistics
    //

    fn record_creations(&self, successes: u64, failures: u64) {
        for _ in 0..successes {
            self.successive_tunnel_creation();
        }
        for _ in 0..failures {
            self.failed_tunnel_creation();
        }
    }

    fn successive_tunnel_creation(&self) {
        self.total_successive_creations.fetch_add(1, Ordering::SeqCst);
        self.update_success_rate(1.0);
    }

    fn failed_tunnel_creation(&self) {
        self.total_failed_creations.fetch_add(1, Ordering::SeqCst);
        self.update_success_rate(0.0);
    }

    /// Exponential moving average with a `1/attempts` boost while the
    /// history is short.
    fn update_success_rate(&self, outcome: f64) {
        let attempts = self.creation_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let alpha = TCSR_SMOOTHING_CONSTANT + 1.0 / attempts as f64;
        let mut rate = self.creation_success_rate.lock().unwrap();
        *rate = alpha * outcome + (1.0 - alpha) * *rate;
    }

    pub(crate) fn tunnel_creation_success_rate(&self) -> f64 {
        *self.creation_success_rate.lock().unwrap()
    }

    fn set_max_num_transit_tunnels(&self, max: u32) {
        if max > 0 && self.max_num_transit_tunnels.load(Ordering::SeqCst) != max {
            debug!("Tunnel: Max number of transit tunnels set to {}", max);
            self.max_num_transit_tunnels.store(max, Ordering::SeqCst);
        }
    }
}
