//! The traits for the router components the tunnel engine collaborates
//! with.
//!
//! The engine never blocks on any of these: transports are fire-and-forget,
//! and everything else is a synchronous notification or lookup against local
//! state.

use crate::data::{Hash, ProfileEvent, RouterIdentity, TunnelId};
use crate::i2np::{Message, TunnelData};

/// Manages the communication subsystem between peers, including connections,
/// listeners, transports, connection keys, etc.
pub trait Transport: Send + Sync {
    /// Whether any transport is currently usable. Lifecycle management is
    /// suspended while offline.
    fn is_online(&self) -> bool {
        true
    }

    /// Whether this router only routes through an explicitly configured set
    /// of peers.
    fn routes_restricted(&self) -> bool {
        false
    }

    /// A random peer from the restricted-route set, if any.
    fn restricted_peer(&self) -> Option<RouterIdentity> {
        None
    }

    /// Send an I2NP message to a peer. Fire-and-forget; implementations
    /// invoke [`Message::dropped`] on messages they discard before sending.
    fn send_message(&self, to: &Hash, msg: Message);
}

/// Defines the mechanism for interacting with the network database.
pub trait NetworkDatabase: Send + Sync {
    /// A random known router, excluding the given identity. When
    /// `reachable_only` is set, only routers we can reach directly qualify.
    fn random_router(&self, exclude: &Hash, reachable_only: bool) -> Option<RouterIdentity>;

    /// Folds a tunnel-building observation into a router's profile.
    fn update_router_profile(&self, ident: &Hash, event: ProfileEvent);
}

/// The local I2NP dispatcher: messages terminating at this router.
pub trait LocalMessageHandler: Send + Sync {
    fn handle(&self, msg: Message);
}

/// Consumes the decrypted payload of inbound tunnel-data messages, parsing
/// delivery instructions and dispatching the reassembled messages.
pub trait TunnelEndpointHandler: Send + Sync {
    fn handle_decrypted(&self, from: TunnelId, msg: TunnelData);
}

/// The garlic/ratchet layer of the router context.
pub trait GarlicService: Send + Sync {
    /// Wraps a message in a one-time asymmetric envelope addressed to the
    /// given router, or returns it unchanged if that is not possible.
    fn wrap_for_router(&self, to: &RouterIdentity, msg: Message) -> Message;

    /// Registers a one-time reply decryption key with the router context.
    fn submit_reply_key(&self, key: [u8; 32], tag: u64);
}

/// A local destination served by a tunnel pool.
pub trait LocalDestination: Send + Sync {
    /// Registers a one-time reply decryption key with the destination.
    fn submit_ecies_key(&self, key: [u8; 32], tag: u64);

    /// Marks the destination's lease set as needing re-publication.
    fn set_leaseset_updated(&self);
}

/// The transit-tunnel subsystem: build messages that are not replies to our
/// own pending tunnels are requests to participate in someone else's.
pub trait TransitDispatch: Send + Sync {
    fn post_build_message(&self, msg: Message);
}
