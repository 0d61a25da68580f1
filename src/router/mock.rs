//! Mock implementations of the router components.
//!
//! Each implementation keeps sufficient internal state as to ensure
//! self-consistency across its component's API, and records what the engine
//! asked of it so tests can assert on the traffic.

use rand::{rngs::OsRng, RngCore};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::types::{
    GarlicService, LocalDestination, LocalMessageHandler, NetworkDatabase, Transport,
    TransitDispatch, TunnelEndpointHandler,
};
use crate::crypto::{self, RecordSealer};
use crate::data::{Hash, ProfileEvent, RouterIdentity, TunnelId};
use crate::i2np::{Message, TunnelData};

pub(crate) fn mock_router_identity() -> RouterIdentity {
    let mut hash = [0u8; 32];
    OsRng.fill_bytes(&mut hash);
    let mut enc_key = [0u8; 32];
    OsRng.fill_bytes(&mut enc_key);
    RouterIdentity::new(Hash(hash), enc_key)
}

/// Records outgoing messages; optionally discards them to exercise the
/// drop path.
pub(crate) struct MockTransport {
    online: AtomicBool,
    drop_all: AtomicBool,
    sent: Mutex<Vec<(Hash, Message)>>,
}

impl MockTransport {
    pub fn new() -> Self {
        MockTransport {
            online: AtomicBool::new(true),
            drop_all: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// All further sends are discarded, firing the messages' drop callbacks.
    pub fn drop_all(&self) {
        self.drop_all.store(true, Ordering::SeqCst);
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn take_sent(&self) -> Vec<(Hash, Message)> {
        std::mem::take(&mut self.sent.lock().unwrap())
    }
}

impl Transport for MockTransport {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    fn send_message(&self, to: &Hash, msg: Message) {
        if self.drop_all.load(Ordering::SeqCst) {
            msg.dropped();
        } else {
            self.sent.lock().unwrap().push((to.clone(), msg));
        }
    }
}

/// Hands out routers from a scripted set and records profile updates.
pub(crate) struct MockNetworkDatabase {
    routers: Mutex<Vec<RouterIdentity>>,
    profile_events: Mutex<Vec<(Hash, ProfileEvent)>>,
}

impl MockNetworkDatabase {
    pub fn new() -> Self {
        MockNetworkDatabase {
            routers: Mutex::new(Vec::new()),
            profile_events: Mutex::new(Vec::new()),
        }
    }

    pub fn add_router(&self, ident: RouterIdentity) {
        self.routers.lock().unwrap().push(ident);
    }

    pub fn profile_events(&self) -> Vec<(Hash, ProfileEvent)> {
        self.profile_events.lock().unwrap().clone()
    }
}

impl NetworkDatabase for MockNetworkDatabase {
    fn random_router(&self, exclude: &Hash, _reachable_only: bool) -> Option<RouterIdentity> {
        let routers = self.routers.lock().unwrap();
        let candidates: Vec<&RouterIdentity> =
            routers.iter().filter(|ri| ri.hash != *exclude).collect();
        if candidates.is_empty() {
            return None;
        }
        let idx = OsRng.next_u32() as usize % candidates.len();
        Some(candidates[idx].clone())
    }

    fn update_router_profile(&self, ident: &Hash, event: ProfileEvent) {
        self.profile_events
            .lock()
            .unwrap()
            .push((ident.clone(), event));
    }
}

pub(crate) struct MockLocalHandler {
    handled: Mutex<Vec<Message>>,
}

impl MockLocalHandler {
    pub fn new() -> Self {
        MockLocalHandler {
            handled: Mutex::new(Vec::new()),
        }
    }

    pub fn handled_count(&self) -> usize {
        self.handled.lock().unwrap().len()
    }

    pub fn take_handled(&self) -> Vec<Message> {
        std::mem::take(&mut self.handled.lock().unwrap())
    }
}

impl LocalMessageHandler for MockLocalHandler {
    fn handle(&self, msg: Message) {
        self.handled.lock().unwrap().push(msg);
    }
}

pub(crate) struct MockEndpointHandler {
    received: Mutex<Vec<(TunnelId, TunnelData)>>,
}

impl MockEndpointHandler {
    pub fn new() -> Self {
        MockEndpointHandler {
            received: Mutex::new(Vec::new()),
        }
    }

    pub fn take_received(&self) -> Vec<(TunnelId, TunnelData)> {
        std::mem::take(&mut self.received.lock().unwrap())
    }
}

impl TunnelEndpointHandler for MockEndpointHandler {
    fn handle_decrypted(&self, from: TunnelId, msg: TunnelData) {
        self.received.lock().unwrap().push((from, msg));
    }
}

pub(crate) struct MockGarlicService {
    submitted: Mutex<Vec<([u8; 32], u64)>>,
}

impl MockGarlicService {
    pub fn new() -> Self {
        MockGarlicService {
            submitted: Mutex::new(Vec::new()),
        }
    }

    pub fn submitted_count(&self) -> usize {
        self.submitted.lock().unwrap().len()
    }
}

impl GarlicService for MockGarlicService {
    fn wrap_for_router(&self, _to: &RouterIdentity, msg: Message) -> Message {
        msg
    }

    fn submit_reply_key(&self, key: [u8; 32], tag: u64) {
        self.submitted.lock().unwrap().push((key, tag));
    }
}

pub(crate) struct MockDestination {
    submitted: Mutex<Vec<([u8; 32], u64)>>,
    leaseset_updates: Mutex<usize>,
}

impl MockDestination {
    pub fn new() -> Self {
        MockDestination {
            submitted: Mutex::new(Vec::new()),
            leaseset_updates: Mutex::new(0),
        }
    }

    pub fn submitted_count(&self) -> usize {
        self.submitted.lock().unwrap().len()
    }

    pub fn leaseset_updates(&self) -> usize {
        *self.leaseset_updates.lock().unwrap()
    }
}

impl LocalDestination for MockDestination {
    fn submit_ecies_key(&self, key: [u8; 32], tag: u64) {
        self.submitted.lock().unwrap().push((key, tag));
    }

    fn set_leaseset_updated(&self) {
        *self.leaseset_updates.lock().unwrap() += 1;
    }
}

pub(crate) struct MockTransitDispatch {
    posted: Mutex<Vec<Message>>,
}

impl MockTransitDispatch {
    pub fn new() -> Self {
        MockTransitDispatch {
            posted: Mutex::new(Vec::new()),
        }
    }

    pub fn posted_count(&self) -> usize {
        self.posted.lock().unwrap().len()
    }
}

impl TransitDispatch for MockTransitDispatch {
    fn post_build_message(&self, msg: Message) {
        self.posted.lock().unwrap().push(msg);
    }
}

/// Stands in for the asymmetric record sealing: the clear record is copied
/// into the slot unchanged.
pub(crate) struct PlainSealer;

impl RecordSealer for PlainSealer {
    fn overhead(&self) -> usize {
        0
    }

    fn seal(
        &self,
        _to: &RouterIdentity,
        clear: &[u8],
        sealed: &mut [u8],
    ) -> Result<(), crypto::Error> {
        if sealed.len() != clear.len() {
            return Err(crypto::Error::InvalidRecord);
        }
        sealed.copy_from_slice(clear);
        Ok(())
    }
}
