// Header synchronizer: catch-up, live extension, gap-fill and reorg handling

use crate::coin::Coin;
use crate::core::Hash256;
use crate::error::{Error, Result};
use crate::network::{ElectrumClient, HeaderNotification, MAX_HEADERS_PER_CALL, Subscription};
use crate::storage::{HeaderReader, HeaderStore};
use crate::sync::{ReorgPolicy, SyncConfig, SyncEvent, SyncStatus};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

const EVENT_CAPACITY: usize = 64;

/// Raw headers returned by one range call
#[derive(Debug, Clone, Default)]
pub struct HeaderBatch {
    pub count: u64,
    pub raw: Vec<u8>,
}

/// Where headers come from. The protocol client is the production source.
#[async_trait]
pub trait HeaderSource: Send + Sync {
    /// Up to `count` consecutive headers starting at `start`; fewer at the tip
    async fn block_headers(&self, start: u64, count: u64) -> Result<HeaderBatch>;
}

#[async_trait]
impl HeaderSource for ElectrumClient {
    async fn block_headers(&self, start: u64, count: u64) -> Result<HeaderBatch> {
        let result = ElectrumClient::block_headers(self, start, count).await?;
        Ok(HeaderBatch {
            count: result.count,
            raw: hex::decode(&result.hex)?,
        })
    }
}

enum Append {
    Done(u64),
    /// First new record does not build on the stored tip
    Conflict,
}

/// Single writer of the header store.
pub struct HeaderSynchronizer {
    coin: Arc<dyn Coin>,
    source: Arc<dyn HeaderSource>,
    store: HeaderStore,
    config: SyncConfig,
    /// Hash of the stored tip record
    tip_hash: Option<Hash256>,
    network_tip: Option<u64>,
    caught_up: bool,
    status: watch::Sender<SyncStatus>,
    events: broadcast::Sender<SyncEvent>,
}

impl HeaderSynchronizer {
    /// Take over `store`. Its last record must deserialize, or nothing it
    /// holds can be extended.
    pub fn new(
        coin: Arc<dyn Coin>,
        source: Arc<dyn HeaderSource>,
        store: HeaderStore,
        config: SyncConfig,
    ) -> Result<Self> {
        if store.record_size() != coin.header_size() {
            return Err(Error::Config(format!(
                "store record size {} does not match {} header size {}",
                store.record_size(),
                coin.name(),
                coin.header_size()
            )));
        }

        let tip_hash = match store.last()? {
            Some(raw) => {
                coin.deserialize_header(&raw)
                    .map_err(|e| Error::CorruptStore(format!("stored tip unreadable: {}", e)))?;
                Some(coin.header_hash(&raw))
            }
            None => None,
        };

        let (status, _) = watch::channel(SyncStatus {
            stored_tip: store.tip(),
            ..SyncStatus::default()
        });
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            coin,
            source,
            store,
            config,
            tip_hash,
            network_tip: None,
            caught_up: false,
            status,
            events,
        })
    }

    pub fn tip(&self) -> Option<u64> {
        self.store.tip()
    }

    pub fn reader(&self) -> HeaderReader {
        self.store.reader()
    }

    pub fn status(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Follow the server: catch up, apply the tip seen at subscription time,
    /// then every notification in arrival order.
    ///
    /// Returns Ok on cancellation and `Disconnected` when the notification
    /// stream ends. Any error returned is fatal for this synchronizer.
    pub async fn run(
        &mut self,
        mut notifications: Subscription,
        initial_tip: Option<HeaderNotification>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            caught_up = self.bootstrap() => { caught_up?; }
        }

        if let Some(tip) = initial_tip {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                applied = self.apply_notification(&tip) => self.absorb(applied)?,
            }
        }

        loop {
            let notification = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                n = notifications.recv() => n,
            };
            let Some(notification) = notification else {
                log::info!("Header notification stream closed");
                return Err(Error::Disconnected);
            };

            let header = match HeaderNotification::from_notification(&notification) {
                Ok(header) => header,
                Err(e) => {
                    log::warn!("Ignoring malformed header notification: {}", e);
                    continue;
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                applied = self.apply_notification(&header) => self.absorb(applied)?,
            }
        }
    }

    /// Non-fatal failures are logged; the next notification resumes from the
    /// durable tip.
    fn absorb(&self, result: Result<()>) -> Result<()> {
        match result {
            Err(e) if !e.is_fatal() => {
                log::warn!("Header update failed, will retry on next notification: {}", e);
                Ok(())
            }
            other => other,
        }
    }

    /// Fetch batches from the next missing height until the server returns a
    /// short batch. Returns the number of records appended.
    pub async fn bootstrap(&mut self) -> Result<u64> {
        let batch_size = self.batch_size();
        let start = self.store.next_height();
        let mut appended = 0;
        log::info!("Catching up {} headers from height {}", self.coin.name(), start);

        loop {
            let next = self.store.next_height();
            let batch = self.source.block_headers(next, batch_size).await?;

            let added = match self.append_batch(next, batch, batch_size)? {
                Append::Done(added) => added,
                Append::Conflict => {
                    let tip = next.saturating_sub(1);
                    let before = self.tip_hash;
                    if !self.handle_reorg(tip, tip).await? {
                        break;
                    }
                    if self.tip_hash == before {
                        // the server agrees with our tip yet sends a child of something else
                        return Err(Error::CorruptStore(format!(
                            "server sent header {} that does not connect to its own header {}",
                            next, tip
                        )));
                    }
                    continue;
                }
            };
            appended += added;
            if added < batch_size {
                break;
            }
            log::debug!("Stored headers up to {}", next + added - 1);
            tokio::time::sleep(self.config.batch_delay).await;
        }

        self.caught_up = true;
        if let Some(tip) = self.store.tip() {
            self.network_tip = Some(self.network_tip.map_or(tip, |n| n.max(tip)));
        }
        self.publish_status();
        log::info!(
            "Header catch-up done: {} new, tip {:?}",
            appended,
            self.store.tip()
        );
        Ok(appended)
    }

    /// Apply one live tip announcement.
    pub async fn apply_notification(&mut self, notification: &HeaderNotification) -> Result<()> {
        let height = notification.height;
        let checkpoint = self.store.checkpoint();
        if height < checkpoint {
            log::debug!("Ignoring header {} below checkpoint {}", height, checkpoint);
            return Ok(());
        }

        self.network_tip = Some(self.network_tip.map_or(height, |n| n.max(height)));
        let next = self.store.next_height();

        if height == next {
            let raw = notification.raw()?;
            let batch = HeaderBatch { count: 1, raw };
            match self.append_batch(height, batch, 1)? {
                Append::Done(_) => {}
                Append::Conflict => {
                    let tip = height.saturating_sub(1);
                    self.handle_reorg(tip, height).await?;
                }
            }
        } else if height > next {
            log::debug!("Gap: tip {:?}, notified {}", self.store.tip(), height);
            self.fill(next, height).await?;
        } else {
            let raw = notification.raw()?;
            if self.store.header(height)?.as_deref() == Some(raw.as_slice()) {
                log::debug!("Duplicate header notification for {}", height);
            } else {
                self.handle_reorg(height, height).await?;
            }
        }

        self.publish_status();
        Ok(())
    }

    /// Fetch and append `[start, end]`, stopping early on a short batch.
    async fn fill(&mut self, start: u64, end: u64) -> Result<()> {
        let mut next = start;
        while next <= end {
            let count = (end - next + 1).min(self.batch_size());
            let batch = self.source.block_headers(next, count).await?;
            match self.append_batch(next, batch, count)? {
                Append::Done(added) => {
                    next += added;
                    if added < count {
                        break;
                    }
                }
                Append::Conflict => {
                    let tip = next.saturating_sub(1);
                    self.handle_reorg(tip, end).await?;
                    break;
                }
            }
        }
        Ok(())
    }

    /// Validate and persist one batch that should start at `start`.
    fn append_batch(&mut self, start: u64, batch: HeaderBatch, requested: u64) -> Result<Append> {
        let size = self.store.record_size();
        if batch.count > requested || batch.raw.len() as u64 != batch.count * size as u64 {
            return Err(Error::Decode(format!(
                "header batch at {}: {} bytes for {} headers (requested {})",
                start,
                batch.raw.len(),
                batch.count,
                requested
            )));
        }
        if batch.count == 0 {
            return Ok(Append::Done(0));
        }

        let mut parent = self.tip_hash;
        for (offset, record) in batch.raw.chunks(size).enumerate() {
            let height = start + offset as u64;
            let header = self
                .coin
                .deserialize_header(record)
                .map_err(|e| Error::CorruptStore(format!("header {} unreadable: {}", height, e)))?;

            if let Some(parent) = parent
                && !header.connects_to(&parent)
            {
                if offset == 0 {
                    return Ok(Append::Conflict);
                }
                return Err(Error::CorruptStore(format!(
                    "server sent header {} that does not connect to {}",
                    height,
                    height - 1
                )));
            }
            parent = Some(self.coin.header_hash(record));
        }

        self.store.append(&batch.raw)?;
        self.tip_hash = parent;

        let tip = start + batch.count - 1;
        let _ = self.events.send(SyncEvent::TipChanged { height: tip });
        self.publish_status();
        Ok(Append::Done(batch.count))
    }

    /// The server's chain no longer extends ours at or below `height`.
    /// Returns true when the store was rewound and refilled up to `target`.
    async fn handle_reorg(&mut self, height: u64, target: u64) -> Result<bool> {
        let stored_tip = self.store.tip().unwrap_or(height);

        let max_depth = match self.config.reorg_policy {
            ReorgPolicy::Report => {
                log::warn!(
                    "Possible reorganization at height {} (stored tip {}), store left as is",
                    height,
                    stored_tip
                );
                let _ = self.events.send(SyncEvent::ReorgDetected { height, stored_tip });
                return Ok(false);
            }
            ReorgPolicy::Rewind { max_depth } => max_depth,
        };

        log::warn!("Reorganization at height {}, searching fork point", height);
        let _ = self.events.send(SyncEvent::ReorgDetected { height, stored_tip });

        let fork = self.find_fork(height.min(stored_tip), stored_tip, max_depth).await?;
        let dropped = stored_tip - fork;
        self.store.truncate(fork - self.store.checkpoint() + 1)?;

        let raw = self
            .store
            .last()?
            .ok_or_else(|| Error::CorruptStore(format!("fork header {} missing after rewind", fork)))?;
        self.tip_hash = Some(self.coin.header_hash(&raw));

        log::warn!("Rewound header store to {} ({} headers dropped)", fork, dropped);
        let _ = self.events.send(SyncEvent::Rewound {
            fork_height: fork,
            dropped,
        });
        self.publish_status();

        // refill the new branch; it must connect to the fork header
        let mut next = fork + 1;
        while next <= target {
            let count = (target - next + 1).min(self.batch_size());
            let batch = self.source.block_headers(next, count).await?;
            match self.append_batch(next, batch, count)? {
                Append::Done(added) => {
                    next += added;
                    if added < count {
                        break;
                    }
                }
                Append::Conflict => {
                    return Err(Error::CorruptStore(format!(
                        "server chain does not connect to fork point {}",
                        fork
                    )));
                }
            }
        }
        // the abandoned branch may have been longer than the new one
        self.network_tip = self.store.tip();
        Ok(true)
    }

    /// Highest stored height, at most `from`, whose record equals the
    /// server's record at that height.
    async fn find_fork(&self, from: u64, stored_tip: u64, max_depth: u64) -> Result<u64> {
        let lowest = stored_tip.saturating_sub(max_depth).max(self.store.checkpoint());
        let too_deep = Error::ReorgTooDeep {
            height: from,
            max_depth,
        };
        if from < lowest {
            return Err(too_deep);
        }

        let size = self.store.record_size();
        let mut hi = from;
        loop {
            let lo = hi.saturating_sub(self.batch_size() - 1).max(lowest);
            let batch = self.source.block_headers(lo, hi - lo + 1).await?;
            if batch.raw.len() as u64 != batch.count * size as u64 {
                return Err(Error::Decode(format!("header batch at {} has bad length", lo)));
            }

            let remote: Vec<&[u8]> = batch.raw.chunks(size).collect();
            for height in (lo..=hi).rev() {
                let Some(theirs) = remote.get((height - lo) as usize) else {
                    continue;
                };
                if self.store.header(height)?.as_deref() == Some(*theirs) {
                    return Ok(height);
                }
            }

            if lo == lowest {
                return Err(too_deep);
            }
            hi = lo - 1;
        }
    }

    fn batch_size(&self) -> u64 {
        self.config.batch_size.clamp(1, MAX_HEADERS_PER_CALL)
    }

    fn publish_status(&self) {
        let stored_tip = self.store.tip();
        let synced = self.caught_up
            && match (stored_tip, self.network_tip) {
                (Some(stored), Some(network)) => stored >= network,
                (_, None) => true,
                (None, Some(_)) => false,
            };
        self.status.send_replace(SyncStatus {
            stored_tip,
            network_tip: self.network_tip,
            synced,
        });
    }
}
