//! Wire-level and timing constants shared across the subsystem.

use std::time::Duration;

/// Zero address, used by the exchange as the "revoke agent" sentinel.
pub const PERPS_EMPTY_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

/// EVM chain id embedded in user-signed actions (Arbitrum One).
pub const SIGNATURE_CHAIN_ID: u64 = 42_161;

/// Hex form of [`SIGNATURE_CHAIN_ID`] as the exchange expects it in action payloads.
pub const SIGNATURE_CHAIN_ID_HEX: &str = "0xa4b1";

/// Chain selector string for user-signed actions.
pub const HYPERLIQUID_CHAIN_NAME: &str = "Mainnet";

/// Source tag for L1 (agent-signed) actions on mainnet.
pub const L1_ACTION_SOURCE: &str = "a";

/// Builder address used when server config has not delivered one yet.
pub const FALLBACK_BUILDER_ADDRESS: &str = "0x1924b8561eef20e70eccdeed775a2450249b2895";

/// Builder fee used when server config has not delivered one, in tenths of a
/// basis point (45 = 0.045%).
pub const FALLBACK_MAX_BUILDER_FEE: i64 = 45;

/// Default agent lifetime when server config has not delivered one (30 days).
pub const AGENT_TTL_DEFAULT_MS: i64 = 30 * 24 * 60 * 60 * 1000;

/// Referral code registered for new agents when config carries none.
pub const DEFAULT_REFERRAL_CODE: &str = "PERPDESK";

/// Network id used for rebate-binding lookups against the rebate backend.
pub const REBATE_NETWORK_ID: &str = "evm--1";

/// A credential must remain valid at least this long past "now" to be usable.
pub const AGENT_USABLE_MARGIN_MS: i64 = 24 * 60 * 60 * 1000;

/// The exchange's transient error string while a prior removal settles.
/// Recognized verbatim; every other error string is terminal.
pub const PENDING_AGENT_REMOVAL: &str = "User has pending agent removal";

/// Total approveAgent attempts while the removal-pending signal persists.
pub const APPROVE_AGENT_ATTEMPTS: u32 = 5;

/// Backoff between approveAgent attempts.
pub const APPROVE_AGENT_BACKOFF: Duration = Duration::from_millis(500);

/// Total budget for confirming an agent removal by polling the listing.
pub const REMOVAL_POLL_BUDGET: Duration = Duration::from_secs(10);

/// Delay between removal-confirmation polls.
pub const REMOVAL_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Per-request timeout inside the removal-confirmation poll.
pub const REMOVAL_POLL_REQUEST_TIMEOUT: Duration = Duration::from_secs(3);

/// TTL for the registered-agents listing cache.
pub const EXTRA_AGENTS_CACHE_TTL: Duration = Duration::from_secs(120);

/// TTL for the user-approved builder fee cache.
pub const BUILDER_FEE_CACHE_TTL: Duration = Duration::from_secs(600);

/// TTL for rebate-binding status lookups.
pub const REBATE_BINDING_CACHE_TTL: Duration = Duration::from_secs(60);

/// Minimum visible duration of the orchestrator's loading flag.
pub const LOADING_DEBOUNCE: Duration = Duration::from_millis(300);
