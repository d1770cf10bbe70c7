pub mod account_monitor;
pub mod attribution;
pub mod balance;
pub mod binary_search;
pub mod block_info;
pub mod gap_detector;
pub mod gap_filler;
pub mod ledger;
pub mod snapshot;
pub mod token_discovery;
pub mod transfer_hints;
