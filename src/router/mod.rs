//! The bundle of router components the tunnel engine runs against.

use std::sync::Arc;

use crate::constants::TUNNEL_DATA_MSG_SIZE;
use crate::crypto::RecordSealer;
use crate::data::RouterIdentity;
use crate::util::MemoryPool;

mod config;
pub(crate) mod mock;
pub mod types;

pub use self::config::Config;
use self::types::{
    GarlicService, LocalMessageHandler, NetworkDatabase, Transport, TransitDispatch,
    TunnelEndpointHandler,
};

/// Everything outside the tunnel engine that it needs a handle on, plus the
/// shared message-buffer pools.
pub struct Context {
    pub our_ident: RouterIdentity,
    pub transport: Arc<dyn Transport>,
    pub netdb: Arc<dyn NetworkDatabase>,
    pub local: Arc<dyn LocalMessageHandler>,
    pub endpoint: Arc<dyn TunnelEndpointHandler>,
    pub garlic: Arc<dyn GarlicService>,
    pub transit: Option<Arc<dyn TransitDispatch>>,
    pub short_record_sealer: Arc<dyn RecordSealer>,
    pub full_record_sealer: Arc<dyn RecordSealer>,
    pub config: Config,
    pub(crate) tunnel_msg_pool: Arc<MemoryPool>,
    pub(crate) endpoint_msg_pool: Arc<MemoryPool>,
}

impl Context {
    pub fn builder() -> Builder {
        Builder::new()
    }

    pub(crate) fn record_sealer(&self, short: bool) -> &dyn RecordSealer {
        if short {
            &*self.short_record_sealer
        } else {
            &*self.full_record_sealer
        }
    }
}

/// Assembles a [`Context`], defaulting every component that is not supplied
/// to its mock implementation.
pub struct Builder {
    our_ident: Option<RouterIdentity>,
    transport: Option<Arc<dyn Transport>>,
    netdb: Option<Arc<dyn NetworkDatabase>>,
    local: Option<Arc<dyn LocalMessageHandler>>,
    endpoint: Option<Arc<dyn TunnelEndpointHandler>>,
    garlic: Option<Arc<dyn GarlicService>>,
    transit: Option<Arc<dyn TransitDispatch>>,
    short_record_sealer: Option<Arc<dyn RecordSealer>>,
    full_record_sealer: Option<Arc<dyn RecordSealer>>,
    config: Option<Config>,
}

impl Builder {
    /// Create a blank Builder.
    pub fn new() -> Self {
        Builder {
            our_ident: None,
            transport: None,
            netdb: None,
            local: None,
            endpoint: None,
            garlic: None,
            transit: None,
            short_record_sealer: None,
            full_record_sealer: None,
            config: None,
        }
    }

    pub fn our_ident(mut self, ident: RouterIdentity) -> Self {
        self.our_ident = Some(ident);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn netdb(mut self, netdb: Arc<dyn NetworkDatabase>) -> Self {
        self.netdb = Some(netdb);
        self
    }

    pub fn local(mut self, local: Arc<dyn LocalMessageHandler>) -> Self {
        self.local = Some(local);
        self
    }

    pub fn endpoint(mut self, endpoint: Arc<dyn TunnelEndpointHandler>) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    pub fn garlic(mut self, garlic: Arc<dyn GarlicService>) -> Self {
        self.garlic = Some(garlic);
        self
    }

    pub fn transit(mut self, transit: Arc<dyn TransitDispatch>) -> Self {
        self.transit = Some(transit);
        self
    }

    pub fn record_sealers(
        mut self,
        short: Arc<dyn RecordSealer>,
        full: Arc<dyn RecordSealer>,
    ) -> Self {
        self.short_record_sealer = Some(short);
        self.full_record_sealer = Some(full);
        self
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Build a Context.
    pub fn build(self) -> Arc<Context> {
        let plain_sealer: Arc<dyn RecordSealer> = Arc::new(mock::PlainSealer);
        Arc::new(Context {
            our_ident: self
                .our_ident
                .unwrap_or_else(mock::mock_router_identity),
            transport: self
                .transport
                .unwrap_or_else(|| Arc::new(mock::MockTransport::new())),
            netdb: self
                .netdb
                .unwrap_or_else(|| Arc::new(mock::MockNetworkDatabase::new())),
            local: self
                .local
                .unwrap_or_else(|| Arc::new(mock::MockLocalHandler::new())),
            endpoint: self
                .endpoint
                .unwrap_or_else(|| Arc::new(mock::MockEndpointHandler::new())),
            garlic: self
                .garlic
                .unwrap_or_else(|| Arc::new(mock::MockGarlicService::new())),
            transit: self.transit,
            short_record_sealer: self
                .short_record_sealer
                .unwrap_or_else(|| plain_sealer.clone()),
            full_record_sealer: self.full_record_sealer.unwrap_or(plain_sealer),
            config: self.config.unwrap_or_default(),
            tunnel_msg_pool: Arc::new(MemoryPool::new(TUNNEL_DATA_MSG_SIZE)),
            endpoint_msg_pool: Arc::new(MemoryPool::new(TUNNEL_DATA_MSG_SIZE)),
        })
    }
}

impl Default for Builder {
    fn default() -> Self {
        Builder::new()
    }
}
