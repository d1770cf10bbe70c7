/// Contract hosting NEP-245 multi-token balances for NEAR Intents
pub const INTENTS_CONTRACT: &str = "intents.near";

/// Token identifier used for the native asset in transfer records
pub const NATIVE_TOKEN: &str = "near";

/// Default lookback when seeding a new account with no ledger yet (~30 days of blocks)
pub const SEED_LOOKBACK_BLOCKS: u64 = 2_592_000;

/// How many blocks to scan backward when walking a receipt to its signer transaction
pub const RECEIPT_WALK_DEPTH: u64 = 10;

/// How many keyset widenings to attempt before recording a change as unattributable
pub const MAX_ATTRIBUTION_WIDENINGS: u32 = 3;
