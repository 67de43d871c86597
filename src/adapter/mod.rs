// Coin adapter: one chain's narrow API over the client and header synchronizer

mod supervisor;

use crate::coin::{Coin, FeeEstimator};
use crate::config::{Config, with_default_port};
use crate::core::{BlockHeader, Hash256, ScriptHash};
use crate::error::{Error, Result};
use crate::network::{
    Balance, ElectrumClient, HistoryItem, MAX_HEADERS_PER_CALL, METHOD_HEADERS_SUBSCRIBE,
    METHOD_SCRIPTHASH_SUBSCRIBE, PeerEntry, ScripthashStatus, ServerVersion, Subscription, Transaction,
    Unspent,
};
use crate::storage::{HeaderReader, HeaderStore};
use crate::sync::{HeaderSynchronizer, SyncEvent, SyncStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use supervisor::Supervisor;
use tokio::sync::{RwLock, broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const SATOSHIS_PER_COIN: f64 = 100_000_000.0;

/// Server details gathered on demand
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub address: String,
    pub version: ServerVersion,
    pub banner: String,
    /// Known peers, capped by the coin's peer policy
    pub peers: Vec<PeerEntry>,
}

/// Typed stream of script status changes
pub struct ScripthashChanges {
    inner: Subscription,
}

impl ScripthashChanges {
    /// Next status change, or None once the session is gone
    pub async fn recv(&mut self) -> Option<ScripthashStatus> {
        loop {
            let notification = self.inner.recv().await?;
            match ScripthashStatus::from_notification(&notification) {
                Ok(status) => return Some(status),
                Err(e) => log::warn!("Ignoring malformed scripthash notification: {}", e),
            }
        }
    }
}

/// Everything belonging to one started connection
struct Session {
    client: Arc<ElectrumClient>,
    version: ServerVersion,
    reader: HeaderReader,
    status: watch::Receiver<SyncStatus>,
    events: broadcast::Receiver<SyncEvent>,
    cancel: CancellationToken,
    running: Arc<AtomicBool>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

/// Chain-specific client facade.
///
/// Every operation except `start` fails with `NotRunning` until `start`
/// succeeds, and again once `stop` is called or the session failed.
pub struct CoinAdapter {
    coin: Arc<dyn Coin>,
    config: Config,
    fee_estimator: Option<Arc<dyn FeeEstimator>>,
    session: RwLock<Option<Arc<Session>>>,
    last_error: Arc<Mutex<Option<String>>>,
}

impl CoinAdapter {
    pub fn new(coin: Arc<dyn Coin>, config: Config) -> Self {
        Self {
            coin,
            config,
            fee_estimator: None,
            session: RwLock::new(None),
            last_error: Arc::new(Mutex::new(None)),
        }
    }

    /// Consult `estimator` when the server has no fee estimate
    pub fn with_fee_estimator(mut self, estimator: Arc<dyn FeeEstimator>) -> Self {
        self.fee_estimator = Some(estimator);
        self
    }

    pub fn coin(&self) -> &dyn Coin {
        self.coin.as_ref()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Server address with the coin's default port filled in
    pub fn server_address(&self) -> String {
        with_default_port(
            &self.config.server,
            self.coin.default_port(self.config.network, self.config.tls),
        )
    }

    /// Connect, negotiate, open the header store and start following the chain.
    pub async fn start(&self) -> Result<()> {
        let mut slot = self.session.write().await;
        if let Some(session) = slot.as_ref()
            && session.running.load(Ordering::Acquire)
        {
            log::debug!("Adapter already running");
            return Ok(());
        }

        let cancel = CancellationToken::new();
        let client_config = self.config.client_config(self.server_address());
        let (client, errors) = ElectrumClient::connect(client_config, &cancel).await?;

        match self.open_session(client.clone(), errors, cancel.clone()).await {
            Ok(session) => {
                *self.last_error.lock().unwrap_or_else(|e| e.into_inner()) = None;
                *slot = Some(session);
                Ok(())
            }
            Err(e) => {
                log::error!("Failed to start session with {}: {}", client.peer(), e);
                cancel.cancel();
                client.disconnect().await;
                Err(e)
            }
        }
    }

    async fn open_session(
        &self,
        client: Arc<ElectrumClient>,
        errors: tokio::sync::mpsc::Receiver<Error>,
        cancel: CancellationToken,
    ) -> Result<Arc<Session>> {
        let version = client
            .server_version(&self.config.client_name, &self.config.protocol_version)
            .await?;
        log::info!(
            "Server {} runs {} (protocol {})",
            client.peer(),
            version.software,
            version.protocol
        );

        let network = self.config.network;
        let store = HeaderStore::open(
            self.config.data_dir.join(self.coin.store_file_name(network)),
            self.coin.header_size(),
            self.coin.checkpoint(network),
        )?;
        let mut synchronizer = HeaderSynchronizer::new(
            self.coin.clone(),
            client.clone(),
            store,
            self.config.sync_config(),
        )?;

        // listen before subscribing so no announcement falls in between
        let notifications = client.listen_push(METHOD_HEADERS_SUBSCRIBE);
        let tip = client.headers_subscribe().await?;
        log::info!("Network tip is {}", tip.height);

        let reader = synchronizer.reader();
        let status = synchronizer.status();
        let events = synchronizer.events();

        let (sync_tx, sync_result) = oneshot::channel();
        let sync_cancel = cancel.clone();
        tokio::spawn(async move {
            let result = synchronizer.run(notifications, Some(tip), &sync_cancel).await;
            let _ = sync_tx.send(result);
        });

        let running = Arc::new(AtomicBool::new(true));
        let supervisor = Supervisor {
            client: client.clone(),
            errors,
            sync_result,
            cancel: cancel.clone(),
            running: running.clone(),
            last_error: self.last_error.clone(),
        };
        let supervisor = tokio::spawn(async move {
            let shutdown = supervisor.run().await;
            log::debug!("Supervisor finished: {:?}", shutdown);
        });

        Ok(Arc::new(Session {
            client,
            version,
            reader,
            status,
            events,
            cancel,
            running,
            supervisor: Mutex::new(Some(supervisor)),
        }))
    }

    /// Tear the session down and wait for its tasks. Safe to call when stopped.
    pub async fn stop(&self) {
        let Some(session) = self.session.write().await.take() else {
            return;
        };
        session.cancel.cancel();
        let supervisor = session
            .supervisor
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = supervisor
            && let Err(e) = handle.await
        {
            log::warn!("Supervisor task failed: {}", e);
        }
        log::info!("Adapter stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.session().await.is_ok()
    }

    /// Failure that ended the last session, if any
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    async fn session(&self) -> Result<Arc<Session>> {
        match self.session.read().await.as_ref() {
            Some(session) if session.running.load(Ordering::Acquire) => Ok(session.clone()),
            _ => Err(Error::NotRunning),
        }
    }

    async fn client(&self) -> Result<Arc<ElectrumClient>> {
        Ok(self.session().await?.client.clone())
    }

    // ---- headers ----

    /// Highest stored header height
    pub async fn tip(&self) -> Result<Option<u64>> {
        Ok(self.session().await?.reader.tip())
    }

    pub async fn sync_status(&self) -> Result<SyncStatus> {
        Ok(*self.session().await?.status.borrow())
    }

    /// Resolve once catch-up reached the network tip
    pub async fn wait_synced(&self) -> Result<SyncStatus> {
        let mut status = self.session().await?.status.clone();
        let synced = status.wait_for(|s| s.synced).await.map_err(|_| Error::NotRunning)?;
        Ok(*synced)
    }

    /// Header at `height`, from the store when present, otherwise from the server
    pub async fn block_header(&self, height: u64) -> Result<BlockHeader> {
        let session = self.session().await?;
        if let Some(raw) = session.reader.header(height)? {
            return self.coin.deserialize_header(&raw);
        }
        let headers = self.fetch_headers(&session.client, height, 1).await?;
        headers
            .into_iter()
            .next()
            .ok_or_else(|| Error::Decode(format!("server has no header at {}", height)))
    }

    /// Up to `count` headers from `start`
    pub async fn block_headers(&self, start: u64, count: u64) -> Result<Vec<BlockHeader>> {
        let session = self.session().await?;
        let count = count.min(MAX_HEADERS_PER_CALL);
        let stored = session.reader.headers(start, count)?;
        if stored.len() as u64 == count {
            return stored.iter().map(|raw| self.coin.deserialize_header(raw)).collect();
        }
        self.fetch_headers(&session.client, start, count).await
    }

    async fn fetch_headers(&self, client: &ElectrumClient, start: u64, count: u64) -> Result<Vec<BlockHeader>> {
        let result = client.block_headers(start, count).await?;
        let raw = hex::decode(&result.hex)?;
        let size = self.coin.header_size();
        if raw.len() % size != 0 {
            return Err(Error::Decode(format!(
                "header range at {} is {} bytes, not a multiple of {}",
                start,
                raw.len(),
                size
            )));
        }
        raw.chunks(size).map(|record| self.coin.deserialize_header(record)).collect()
    }

    pub async fn tip_changes(&self) -> Result<watch::Receiver<SyncStatus>> {
        Ok(self.session().await?.status.clone())
    }

    pub async fn sync_events(&self) -> Result<broadcast::Receiver<SyncEvent>> {
        Ok(self.session().await?.events.resubscribe())
    }

    // ---- scripts ----

    /// Script hash of an address on the configured network
    pub fn address_to_scripthash(&self, address: &str) -> Result<ScriptHash> {
        self.coin.address_to_scripthash(self.config.network, address)
    }

    /// Start watching a script; returns its current status
    pub async fn subscribe_scripthash(&self, scripthash: &ScriptHash) -> Result<Option<String>> {
        self.client().await?.scripthash_subscribe(scripthash).await
    }

    pub async fn unsubscribe_scripthash(&self, scripthash: &ScriptHash) -> Result<bool> {
        self.client().await?.scripthash_unsubscribe(scripthash).await
    }

    /// Status changes of every subscribed script
    pub async fn scripthash_changes(&self) -> Result<ScripthashChanges> {
        let inner = self.client().await?.listen_push(METHOD_SCRIPTHASH_SUBSCRIBE);
        Ok(ScripthashChanges { inner })
    }

    pub async fn get_balance(&self, scripthash: &ScriptHash) -> Result<Balance> {
        self.client().await?.scripthash_get_balance(scripthash).await
    }

    pub async fn get_history(&self, scripthash: &ScriptHash) -> Result<Vec<HistoryItem>> {
        self.client().await?.scripthash_get_history(scripthash).await
    }

    pub async fn get_list_unspent(&self, scripthash: &ScriptHash) -> Result<Vec<Unspent>> {
        self.client().await?.scripthash_listunspent(scripthash).await
    }

    // ---- transactions ----

    /// Verbose transaction as decoded by the server
    pub async fn get_transaction(&self, txid: &Hash256) -> Result<Transaction> {
        self.client().await?.transaction_get(txid, true).await
    }

    pub async fn get_raw_transaction(&self, txid: &Hash256) -> Result<Vec<u8>> {
        self.client().await?.transaction_get(txid, false).await?.raw()
    }

    pub async fn broadcast(&self, raw_tx: &[u8]) -> Result<Hash256> {
        let txid = self.client().await?.transaction_broadcast(raw_tx).await?;
        log::info!("Broadcast transaction {}", txid);
        Ok(txid)
    }

    /// Fee rate in satoshis per virtual byte for confirmation within `blocks`
    pub async fn estimate_fee_rate(&self, blocks: u32) -> Result<f64> {
        let per_kb = self.client().await?.estimate_fee(blocks).await?;
        if per_kb >= 0.0 {
            return Ok(coin_per_kb_to_sat_per_vbyte(per_kb));
        }

        match &self.fee_estimator {
            Some(estimator) => {
                log::debug!("Server has no fee estimate for {} blocks, asking fallback", blocks);
                estimator.fee_rate(blocks).await
            }
            None => Err(Error::FeeUnavailable),
        }
    }

    // ---- server ----

    pub async fn server_info(&self) -> Result<ServerInfo> {
        let session = self.session().await?;
        let banner = session.client.server_banner().await?;
        let mut peers = session.client.server_peers().await?;
        peers.truncate(self.coin.max_peers(self.config.network));

        Ok(ServerInfo {
            address: session.client.peer().to_string(),
            version: session.version.clone(),
            banner,
            peers,
        })
    }
}

fn coin_per_kb_to_sat_per_vbyte(per_kb: f64) -> f64 {
    per_kb * SATOSHIS_PER_COIN / 1000.0
}
