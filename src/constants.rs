//! Protocol and timing constants for the tunnel engine.

// Build records

/// Size of one record in a variable (ElGamal-era) build message.
pub const TUNNEL_BUILD_RECORD_SIZE: usize = 528;
/// Size of one record in a short (ECIES) build message.
pub const SHORT_TUNNEL_BUILD_RECORD_SIZE: usize = 218;
/// Bytes at the front of a record naming its owner (truncated identity hash).
pub const RECORD_TO_PEER_LEN: usize = 16;

/// Hard cap on the number of records in a build message.
pub const MAX_NUM_RECORDS: usize = 8;
/// Record count used for compact builds of up to this many hops.
pub const STANDARD_NUM_RECORDS: usize = 4;

// Tunnel-data messages

/// Total size of the encrypted portion of a tunnel-data message: a 16-byte
/// IV followed by 1008 bytes of layered payload.
pub const TUNNEL_DATA_MSG_SIZE: usize = 1024;
/// Room left for delivery instructions and fragments once the IV, checksum
/// and zero separator are accounted for.
pub const TUNNEL_DATA_MAX_PAYLOAD_SIZE: usize = TUNNEL_DATA_MSG_SIZE - 16 - 4 - 1;

// Timing, in seconds

pub const TUNNEL_EXPIRATION_TIMEOUT: u64 = 660;
pub const TUNNEL_CREATION_TIMEOUT: u64 = 30;
/// Tunnels within this long of expiring are queued for recreation.
pub const TUNNEL_RECREATION_THRESHOLD: u64 = 90;
/// Tunnels within this long of expiring are marked expiring to dampen use.
pub const TUNNEL_EXPIRATION_THRESHOLD: u64 = 60;

pub const TUNNEL_MANAGE_INTERVAL: u64 = 15;
pub const TUNNEL_POOLS_MANAGE_INTERVAL: u64 = 5;
pub const TUNNEL_MEMORY_POOL_MANAGE_INTERVAL: u64 = 120;

/// Upper bound on messages handled in one dispatch run before the gateway of
/// the last-touched tunnel is flushed.
pub const MAX_TUNNEL_MSGS_BATCH_SIZE: usize = 100;

// Tunnel creation success rate

/// Seed for the creation success-rate moving average.
pub const TCSR_START_VALUE: f64 = 0.1;
pub const TCSR_SMOOTHING_CONSTANT: f64 = 0.0005;

pub const DEFAULT_MAX_NUM_TRANSIT_TUNNELS: u32 = 10_000;
