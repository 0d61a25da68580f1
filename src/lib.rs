//! The tunnel engine of an I2P-style anonymity router.
//!
//! Tunnels are unidirectional, multi-hop, layer-encrypted paths through a
//! sequence of remote routers. This crate builds them (layered build requests
//! and replies), tracks them through their lifecycle, routes incoming tunnel
//! messages to the right tunnel instance, and keeps the tunnel population
//! replenished before existing tunnels expire.
//!
//! The surrounding router (transports, network database, garlic layer, local
//! destinations) is reached through the traits in [`router::types`].

#[macro_use]
extern crate arrayref;
#[macro_use]
extern crate log;

mod constants;
pub mod crypto;
pub mod data;
pub mod i2np;
pub mod router;
pub mod tunnel;
mod util;
