// CLI commands

use crate::adapter::CoinAdapter;
use crate::coin::{Bitcoin, Network};
use crate::config::Config;
use crate::core::{Hash256, ScriptHash};
use crate::error::{Error, Result};
use crate::sync::SyncEvent;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "electrum-sync")]
#[command(about = "Electrum thin client with a local header store", long_about = None)]
pub struct Cli {
    /// JSON config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Server as host[:port]
    #[arg(short, long, global = true)]
    pub server: Option<String>,

    /// Connect over TLS
    #[arg(long, global = true)]
    pub tls: bool,

    /// mainnet, testnet or regtest
    #[arg(short, long, global = true)]
    pub network: Option<Network>,

    /// Directory holding the header store
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Log raw wire traffic
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Download headers up to the network tip
    Sync {
        /// Keep following new blocks until interrupted
        #[arg(long)]
        follow: bool,
    },

    /// Show the stored and network tip
    Tip,

    /// Show the header at a height
    Header { height: u64 },

    /// Balance of an address or script hash
    Balance { target: String },

    /// History of an address or script hash
    History { target: String },

    /// Unspent outputs of an address or script hash
    Unspent { target: String },

    /// Fetch a transaction
    Tx {
        txid: String,
        /// Show the server-decoded form instead of raw hex
        #[arg(long)]
        verbose: bool,
    },

    /// Broadcast a raw transaction given as hex
    Broadcast { hex: String },

    /// Fee rate estimate in sat/vB
    Fee {
        #[arg(short, long, default_value = "6")]
        blocks: u32,
    },

    /// Server version, banner and peers
    Server,

    /// Print status changes of addresses or script hashes until interrupted
    Watch {
        #[arg(required = true)]
        targets: Vec<String>,
    },
}

impl Cli {
    /// File configuration with command-line overrides applied
    pub fn load_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };
        if let Some(server) = &self.server {
            config.server = server.clone();
        }
        if self.tls {
            config.tls = true;
        }
        if let Some(network) = self.network {
            config.network = network;
        }
        if let Some(dir) = &self.data_dir {
            config.data_dir = dir.clone();
        }
        if self.debug {
            config.debug = true;
        }
        config.validate()?;
        Ok(config)
    }
}

/// CLI handler
pub struct CliHandler {
    adapter: CoinAdapter,
}

impl CliHandler {
    pub fn new(config: Config) -> Self {
        Self {
            adapter: CoinAdapter::new(Arc::new(Bitcoin), config),
        }
    }

    /// Run one command against a fresh session
    pub async fn handle(&self, command: Commands) -> Result<()> {
        self.adapter.start().await?;
        let result = self.dispatch(command).await;
        self.adapter.stop().await;
        result
    }

    async fn dispatch(&self, command: Commands) -> Result<()> {
        match command {
            Commands::Sync { follow } => self.sync(follow).await,
            Commands::Tip => self.tip().await,
            Commands::Header { height } => self.header(height).await,
            Commands::Balance { target } => {
                let scripthash = self.scripthash(&target)?;
                let balance = self.adapter.get_balance(&scripthash).await?;
                println!("Balance for {}:", target);
                println!("  Confirmed:   {} sat ({:.8} BTC)", balance.confirmed, to_btc(balance.confirmed));
                println!("  Unconfirmed: {} sat", balance.unconfirmed);
                Ok(())
            }
            Commands::History { target } => {
                let scripthash = self.scripthash(&target)?;
                let history = self.adapter.get_history(&scripthash).await?;
                println!("History for {} ({} entries):", target, history.len());
                for item in history {
                    println!("  {:>8}  {}", item.height, item.tx_hash);
                }
                Ok(())
            }
            Commands::Unspent { target } => {
                let scripthash = self.scripthash(&target)?;
                let unspent = self.adapter.get_list_unspent(&scripthash).await?;
                println!("Unspent outputs for {} ({}):", target, unspent.len());
                for utxo in unspent {
                    println!("  {}:{}  {} sat  (height {})", utxo.tx_hash, utxo.tx_pos, utxo.value, utxo.height);
                }
                Ok(())
            }
            Commands::Tx { txid, verbose } => {
                let txid = Hash256::from_hex(&txid)?;
                if verbose {
                    let tx = self.adapter.get_transaction(&txid).await?;
                    println!("{}", serde_json::to_string_pretty(&tx)?);
                } else {
                    let raw = self.adapter.get_raw_transaction(&txid).await?;
                    println!("{}", hex::encode(raw));
                }
                Ok(())
            }
            Commands::Broadcast { hex } => {
                let raw = hex::decode(hex.trim())?;
                let txid = self.adapter.broadcast(&raw).await?;
                println!("Broadcast: {}", txid);
                Ok(())
            }
            Commands::Fee { blocks } => {
                let rate = self.adapter.estimate_fee_rate(blocks).await?;
                println!("Fee rate for {} blocks: {:.2} sat/vB", blocks, rate);
                Ok(())
            }
            Commands::Server => self.server().await,
            Commands::Watch { targets } => self.watch(&targets).await,
        }
    }

    async fn sync(&self, follow: bool) -> Result<()> {
        let status = self.adapter.wait_synced().await?;
        println!("Synced to {}", describe(status.stored_tip));
        if !follow {
            return Ok(());
        }

        let mut events = self.adapter.sync_events().await?;
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => return Ok(()),
                event = events.recv() => match event {
                    Ok(SyncEvent::TipChanged { height }) => println!("New tip: {}", height),
                    Ok(SyncEvent::ReorgDetected { height, stored_tip }) => {
                        println!("Reorganization near {} (stored tip {})", height, stored_tip)
                    }
                    Ok(SyncEvent::Rewound { fork_height, dropped }) => {
                        println!("Rewound to {} ({} headers dropped)", fork_height, dropped)
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        return Err(self.session_error());
                    }
                },
            }
        }
    }

    async fn tip(&self) -> Result<()> {
        let status = self.adapter.sync_status().await?;
        println!("Stored tip:  {}", describe(status.stored_tip));
        println!("Network tip: {}", describe(status.network_tip));
        println!("Synced:      {}", status.synced);
        Ok(())
    }

    async fn header(&self, height: u64) -> Result<()> {
        let header = self.adapter.block_header(height).await?;
        println!("Header {}:", height);
        println!("  Hash: {}", header.hash());
        println!("  Previous: {}", header.prev_block_hash);
        println!("  Merkle root: {}", header.merkle_root);
        println!("  Timestamp: {}", header.timestamp);
        println!("  Bits: {:#010x}", header.bits);
        println!("  Nonce: {}", header.nonce);
        Ok(())
    }

    async fn server(&self) -> Result<()> {
        let info = self.adapter.server_info().await?;
        println!("Server: {}", info.address);
        println!("  Software: {}", info.version.software);
        println!("  Protocol: {}", info.version.protocol);
        println!("  Banner: {}", info.banner.trim());
        println!("  Peers ({}):", info.peers.len());
        for peer in info.peers {
            let tcp = peer.port('t').map(|p| p.to_string()).unwrap_or_else(|| "-".to_string());
            let tls = peer.port('s').map(|p| p.to_string()).unwrap_or_else(|| "-".to_string());
            println!("    {} ({}) tcp {} tls {}", peer.host, peer.address, tcp, tls);
        }
        Ok(())
    }

    async fn watch(&self, targets: &[String]) -> Result<()> {
        let mut changes = self.adapter.scripthash_changes().await?;
        for target in targets {
            let scripthash = self.scripthash(target)?;
            let status = self.adapter.subscribe_scripthash(&scripthash).await?;
            println!("{} ({}): {}", target, scripthash, status.as_deref().unwrap_or("no history"));
        }

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => return Ok(()),
                change = changes.recv() => match change {
                    Some(change) => println!(
                        "{}: {}",
                        change.scripthash,
                        change.status.as_deref().unwrap_or("no history")
                    ),
                    None => return Err(self.session_error()),
                },
            }
        }
    }

    /// Address or 64-hex script hash
    fn scripthash(&self, target: &str) -> Result<ScriptHash> {
        if target.len() == 64 && target.chars().all(|c| c.is_ascii_hexdigit()) {
            return ScriptHash::from_hex(target);
        }
        self.adapter.address_to_scripthash(target)
    }

    fn session_error(&self) -> Error {
        match self.adapter.last_error() {
            Some(reason) => Error::Connection(format!("session ended: {}", reason)),
            None => Error::NotRunning,
        }
    }
}

fn describe(height: Option<u64>) -> String {
    height.map(|h| h.to_string()).unwrap_or_else(|| "none".to_string())
}

fn to_btc(sat: i64) -> f64 {
    sat as f64 / 100_000_000.0
}
