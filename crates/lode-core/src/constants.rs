//! Protocol constants. All monetary values are integer coin units.

/// Four-byte network identifier prepended to all wire messages.
pub const MAGIC_BYTES: [u8; 4] = [0x4C, 0x4F, 0x44, 0x45]; // "LODE"

/// Smallest allowed per-block work target. Targets at or below this are
/// rejected during structural validation.
pub const MIN_WORK_TARGET: u64 = 100_000;

/// Storage fee charged per 32 bytes of canonical block encoding, deducted
/// from the coins a block issues.
pub const FEE_PER_32_BYTES: u64 = 1_000;

/// Maximum number of hashes a `block_request` may carry; servers truncate
/// anything beyond this.
pub const MAX_BLOCK_REQUEST: usize = 50;

/// Maximum number of locator hashes accepted in a `chain_primary` request.
pub const MAX_LOCATOR_SIZE: usize = 64;

/// Maximum wire message size in bytes before decoding is refused.
pub const MAX_MESSAGE_SIZE: usize = 2_097_152; // 2 MiB

/// Seconds the seeker waits before re-requesting an unanswered hash.
pub const SEEK_FOLLOW_UP_SECS: u64 = 2;

/// Maximum hashes re-requested per follow-up cycle.
pub const MAX_REREQUESTS_PER_CYCLE: usize = 50;

/// A hash re-requested more than this many times is dropped from tracking.
pub const MAX_SEEK_RETRIES: u32 = 10;

/// Seconds between chain-info polls of connected peers.
pub const SYNC_POLL_SECS: u64 = 30;

/// Default chunk size used when paging a peer's primary chain.
pub const CHAIN_PRIMARY_CHUNK: u64 = 10_000;

/// Default TCP port for peer connections.
pub const DEFAULT_P2P_PORT: u16 = 22810;
