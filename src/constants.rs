//! Gateway-wide compile-time constants.
//!
//! Mirrors the fixed sizes and thresholds a Newcamd client actually
//! depends on — these are wire-format and protocol constants, not tuning
//! knobs, and must not be changed independently of the client population.

// =============================================================================
// FRAME / PROTOCOL
// =============================================================================

/// Maximum accepted inner (post-decrypt) frame length. Frames above this
/// are rejected as `InvalidFrame` before any decrypt attempt.
pub const NC_MSG_MAX: u16 = 400;

/// Bytes of fixed inner header before the command/status/length fields:
/// message-id(2) + service-id(2) + CAID-hint(2) + program-id(3) + reserved(1).
pub const NC_HDR_LEN: usize = 8;

/// Control word length in bytes.
pub const CW_LEN: usize = 16;

/// Session seed length (also the root-key length) prior to key-spread.
pub const SESSION_SEED_LEN: usize = 14;

// Newcamd command bytes.
pub const MSG_CLIENT_LOGIN: u8 = 0xe0;
pub const MSG_CLIENT_LOGIN_ACK: u8 = 0xe1;
pub const MSG_CLIENT_LOGIN_NAK: u8 = 0xe2;
pub const MSG_CARD_DATA_REQ: u8 = 0xe3;
pub const MSG_CARD_DATA: u8 = 0xe4;
pub const MSG_KEEPALIVE: u8 = 0x8d;
pub const MSG_ADDCARD: u8 = 0xD3;
pub const MSG_GET_VERSION: u8 = 0xD6;
pub const MSG_ECM_0: u8 = 0x80;
pub const MSG_ECM_1: u8 = 0x81;

/// Version string reported to GET-VERSION requests.
pub const VERSION_STRING: &str = "1.67";

// =============================================================================
// CONNECTION LIMITS
// =============================================================================

/// Maximum concurrently accepted connections (client registry capacity).
pub const MAX_CONNS: usize = 256;

/// Default socket read/write timeout in seconds.
pub const DEFAULT_SOCKET_TIMEOUT_SECS: u64 = 30;

// =============================================================================
// FAIL-BAN
// =============================================================================

/// Consecutive failures from one IP before it is banned.
pub const BAN_MAX_FAILS: u32 = 5;

/// Ban duration in seconds once the threshold is reached.
pub const BAN_SECS: u64 = 300;

// =============================================================================
// CW CACHE
// =============================================================================

/// Bucket count, must stay a power of two (index derived via bitmask).
pub const CW_CACHE_SIZE: usize = 512;

/// Seconds a cached CW remains valid for reuse.
pub const CW_CACHE_TTL_S: u64 = 30;

// =============================================================================
// ACCOUNT LIMITS
// =============================================================================

pub const MAX_ECMKEYS_PER_ACC: usize = 8;
pub const MAX_IP_WHITELIST: usize = 16;
pub const MAX_CAIDS_PER_ACC: usize = 8;
pub const MAX_SID_WHITELIST: usize = 64;

// =============================================================================
// LOGGING
// =============================================================================

/// Capacity of the in-memory log ring mirrored for the admin interface.
pub const LOG_RING_MAX: usize = 2000;

// =============================================================================
// SHUTDOWN
// =============================================================================

/// How long the supervisor waits for active connections to drain on
/// shutdown, polling every 100ms.
pub const SHUTDOWN_DRAIN_SECS: u64 = 5;
pub const SHUTDOWN_POLL_MS: u64 = 100;

/// How often the accept loop checks the reload flag even with no
/// incoming connections.
pub const RELOAD_POLL_SECS: u64 = 1;
