// electrum-sync: Electrum thin client with a local header store

pub mod adapter;
pub mod cli;
pub mod coin;
pub mod config;
pub mod core;
pub mod error;
pub mod network;
pub mod storage;
pub mod sync;

// Re-exports for convenience
pub use adapter::{CoinAdapter, ScripthashChanges, ServerInfo};
pub use cli::{Cli, CliHandler, Commands};
pub use coin::{Bitcoin, Coin, FeeEstimator, Network};
pub use config::{ClientConfig, Config};
pub use crate::core::{BlockHeader, Hash256, Script, ScriptHash};
pub use error::{Error, Result};
pub use network::{ConnectionState, ElectrumClient, Subscription, Transport};
pub use storage::{HeaderReader, HeaderStore};
pub use sync::{HeaderSource, HeaderSynchronizer, ReorgPolicy, SyncConfig, SyncEvent, SyncStatus};
