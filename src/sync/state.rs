// Synchronizer settings and observable state

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Headers requested per catch-up call unless configured otherwise
pub const DEFAULT_BATCH_SIZE: u64 = 20;

/// Deepest rewind attempted before giving up
pub const DEFAULT_MAX_REORG_DEPTH: u64 = 100;

fn default_max_depth() -> u64 {
    DEFAULT_MAX_REORG_DEPTH
}

/// What to do when the server's chain no longer extends the stored one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ReorgPolicy {
    /// Log, publish `SyncEvent::ReorgDetected` and leave the store untouched
    #[default]
    Report,
    /// Locate the fork point within `max_depth` blocks, truncate and refetch
    Rewind {
        #[serde(default = "default_max_depth")]
        max_depth: u64,
    },
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub batch_size: u64,
    /// Pause between full catch-up batches
    pub batch_delay: Duration,
    pub reorg_policy: ReorgPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            batch_delay: Duration::from_millis(50),
            reorg_policy: ReorgPolicy::default(),
        }
    }
}

/// Snapshot published after every change to the store or the known network tip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncStatus {
    /// Highest stored height
    pub stored_tip: Option<u64>,
    /// Highest height the server has announced
    pub network_tip: Option<u64>,
    /// Catch-up finished and the store reaches the network tip
    pub synced: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    TipChanged { height: u64 },
    /// Server chain diverges from the stored one at or below `height`
    ReorgDetected { height: u64, stored_tip: u64 },
    /// Store truncated back to `fork_height`
    Rewound { fork_height: u64, dropped: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reorg_policy_serde() {
        let policy: ReorgPolicy = serde_json::from_str(r#"{"mode": "rewind"}"#).unwrap();
        assert_eq!(policy, ReorgPolicy::Rewind { max_depth: DEFAULT_MAX_REORG_DEPTH });

        let policy: ReorgPolicy = serde_json::from_str(r#"{"mode": "report"}"#).unwrap();
        assert_eq!(policy, ReorgPolicy::Report);
    }
}
