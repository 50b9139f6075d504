//! System-wide constants for SettleMesh.

/// Decimal places of the base currency (POLYX) and of settlement amounts.
pub const AMOUNT_DECIMALS: u32 = 6;

/// `10^AMOUNT_DECIMALS`: micro-units per whole unit.
pub const AMOUNT_SCALE: i128 = 1_000_000;

/// Fixed-point scale of [`crate::Percent`]: a ratio of 1.0 is stored as this.
/// 10% is therefore 100_000.
pub const PERCENT_SCALE: i128 = 1_000_000;

/// Display symbol of the base currency.
pub const BASE_CURRENCY_SYMBOL: &str = "POLYX";

/// Maximum length of an asset ticker.
pub const TICKER_MAX_LENGTH: usize = 12;

/// Number of hex digits after the `0x` prefix of a DID.
pub const DID_HEX_LENGTH: usize = 64;

/// Maximum instruction memo size in bytes (stored on-chain as 32 bytes).
pub const MEMO_MAX_BYTES: usize = 32;

// ---------------------------------------------------------------------------
// Network endpoints
// ---------------------------------------------------------------------------

pub const MAINNET_RPC: &str = "wss://mainnet-rpc.polymesh.network";
pub const MAINNET_MIDDLEWARE: &str = "https://mainnet-graphql.polymesh.network/graphql";
pub const TESTNET_RPC: &str = "wss://testnet-rpc.polymesh.live";
pub const TESTNET_MIDDLEWARE: &str = "https://testnet-graphql.polymesh.live/graphql";
pub const STAGING_RPC: &str = "wss://staging-rpc.polymesh.dev";
pub const STAGING_MIDDLEWARE: &str = "https://staging-graphql.polymesh.dev/graphql";
pub const LOCAL_RPC: &str = "ws://127.0.0.1:9944";
pub const LOCAL_MIDDLEWARE: &str = "http://localhost:3000/graphql";

/// Default bound on establishing the upstream feed connection.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 60_000;

// ---------------------------------------------------------------------------
// Synthesized event types
// ---------------------------------------------------------------------------

/// Event type delivered for every new block header.
pub const NEW_BLOCK_EVENT: &str = "system.NewBlock";

/// Event type delivered when a block is finalized.
pub const FINALIZED_EVENT: &str = "system.Finalized";

/// Event type delivered for a watched account's balance change.
pub const BALANCE_CHANGED_EVENT: &str = "balances.BalanceSet";
