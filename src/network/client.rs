// Electrum protocol client - request correlation, notification dispatch, keepalive

use crate::config::ClientConfig;
use crate::core::{Hash256, ScriptHash};
use crate::error::{Error, Result};
use crate::network::message::{Incoming, Request, parse_line};
use crate::network::types::decode_result;
use crate::network::{
    Balance, BlockHeaders, HeaderNotification, HistoryItem, PeerEntry, ServerVersion, Subscription,
    SubscriptionRegistry, Transaction, Transport, TransportChannels, Unspent,
};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const METHOD_HEADERS_SUBSCRIBE: &str = "blockchain.headers.subscribe";
pub const METHOD_SCRIPTHASH_SUBSCRIBE: &str = "blockchain.scripthash.subscribe";
pub const METHOD_ADDRESS_SUBSCRIBE: &str = "blockchain.address.subscribe";

/// Largest header count ElectrumX returns from one `blockchain.block.headers` call
pub const MAX_HEADERS_PER_CALL: u64 = 2016;

const ERROR_CHANNEL_CAPACITY: usize = 8;

/// Connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

struct PendingCall {
    method: String,
    slot: oneshot::Sender<Result<Value>>,
}

/// Calls waiting for their response, keyed by request id
#[derive(Default)]
struct PendingCalls {
    calls: Mutex<HashMap<u64, PendingCall>>,
}

impl PendingCalls {
    fn register(&self, id: u64, method: &str) -> oneshot::Receiver<Result<Value>> {
        let (slot, receiver) = oneshot::channel();
        self.lock().insert(
            id,
            PendingCall {
                method: method.to_string(),
                slot,
            },
        );
        receiver
    }

    fn complete(&self, id: u64, outcome: Result<Value>) -> bool {
        let Some(call) = self.lock().remove(&id) else {
            return false;
        };
        if call.slot.send(outcome).is_err() {
            log::debug!("Caller of {} (id {}) stopped waiting", call.method, id);
        }
        true
    }

    fn remove(&self, id: u64) {
        self.lock().remove(&id);
    }

    /// Fail every outstanding call with `Disconnected`
    fn fail_all(&self) {
        let calls: Vec<(u64, PendingCall)> = self.lock().drain().collect();
        for (id, call) in calls {
            log::debug!("Failing pending {} (id {}): disconnected", call.method, id);
            let _ = call.slot.send(Err(Error::Disconnected));
        }
    }

    fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, PendingCall>> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Removes the pending entry when the waiting caller goes away for any reason
struct PendingGuard<'a> {
    pending: &'a PendingCalls,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(self.id);
    }
}

/// Client for one Electrum server connection
pub struct ElectrumClient {
    config: ClientConfig,
    transport: Transport,
    next_id: AtomicU64,
    ids_exhausted: AtomicBool,
    pending: PendingCalls,
    subscriptions: SubscriptionRegistry,
    errors: mpsc::Sender<Error>,
    lifecycle: CancellationToken,
    state: watch::Sender<ConnectionState>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ElectrumClient {
    /// Dial the configured server and start the background tasks.
    ///
    /// Returns the client and the receiving end of its error channel. The owner
    /// must watch that channel and call `disconnect` on anything it yields.
    /// Cancelling `cancel` stops reads, sends and keepalive but does not close
    /// the socket.
    pub async fn connect(
        config: ClientConfig,
        cancel: &CancellationToken,
    ) -> Result<(Arc<Self>, mpsc::Receiver<Error>)> {
        log::info!("Connecting to {} (tls: {})", config.server, config.tls.is_some());
        let transport = Transport::connect(
            &config.server,
            config.tls.clone(),
            config.connect_timeout,
            config.debug,
        )
        .await?;
        Self::with_transport(transport, config, cancel)
    }

    /// Start a client over an already-open transport
    pub fn with_transport(
        transport: Transport,
        config: ClientConfig,
        cancel: &CancellationToken,
    ) -> Result<(Arc<Self>, mpsc::Receiver<Error>)> {
        let lifecycle = cancel.child_token();
        let (errors, errors_rx) = mpsc::channel(ERROR_CHANNEL_CAPACITY);
        let (state, _) = watch::channel(ConnectionState::Connecting);

        let client = Arc::new(Self {
            subscriptions: SubscriptionRegistry::new(config.subscription_capacity),
            config,
            transport,
            next_id: AtomicU64::new(1),
            ids_exhausted: AtomicBool::new(false),
            pending: PendingCalls::default(),
            errors,
            lifecycle,
            state,
            tasks: Mutex::new(Vec::new()),
        });

        let (channels, listener) = client.transport.listen(client.lifecycle.clone())?;
        let dispatcher = tokio::spawn(Self::dispatch_loop(Arc::downgrade(&client), channels));
        let keepalive = tokio::spawn(Self::keepalive_loop(Arc::downgrade(&client)));
        client.lock_tasks().extend([listener, dispatcher, keepalive]);

        client.state.send_replace(ConnectionState::Connected);
        Ok((client, errors_rx))
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn peer(&self) -> &str {
        self.transport.peer()
    }

    /// Number of calls still waiting for a response
    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    /// Tear the connection down. Safe to call more than once.
    pub async fn disconnect(&self) {
        let was = self.state.send_replace(ConnectionState::Disconnected);
        self.lifecycle.cancel();

        let tasks: Vec<JoinHandle<()>> = self.lock_tasks().drain(..).collect();
        for task in tasks {
            task.abort();
        }

        if was != ConnectionState::Disconnected {
            if let Err(e) = self.transport.close().await {
                log::debug!("Closing {}: {}", self.peer(), e);
            }
            log::info!("Disconnected from {}", self.peer());
        }

        self.pending.fail_all();
        self.subscriptions.close();
    }

    /// Independent notification stream for `method`
    pub fn listen_push(&self, method: &str) -> Subscription {
        self.subscriptions.subscribe(method)
    }

    /// Issue one call and decode its result
    pub async fn request<T: DeserializeOwned>(&self, method: &str, params: Vec<Value>) -> Result<T> {
        let value = self.request_value(method, params).await?;
        decode_result(method, value)
    }

    /// Issue one call and return the raw JSON result
    pub async fn request_value(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        if self.state() != ConnectionState::Connected {
            return Err(Error::Disconnected);
        }

        let id = self.allocate_id()?;
        let receiver = self.pending.register(id, method);
        let _guard = PendingGuard {
            pending: &self.pending,
            id,
        };

        let line = Request::new(id, method, &params).to_line()?;
        log::debug!("Calling {} (id {})", method, id);
        self.transport.send_message(&line, self.config.request_timeout).await?;

        tokio::select! {
            _ = self.lifecycle.cancelled() => Err(Error::Timeout { method: method.to_string() }),
            answer = tokio::time::timeout(self.config.request_timeout, receiver) => match answer {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(_)) => Err(Error::Disconnected),
                Err(_) => Err(Error::Timeout { method: method.to_string() }),
            },
        }
    }

    fn allocate_id(&self) -> Result<u64> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if id > self.config.max_request_id {
            if !self.ids_exhausted.swap(true, Ordering::Relaxed) {
                log::warn!("Request ids exhausted on {}, connection must be replaced", self.peer());
                self.report(Error::IdsExhausted(self.config.max_request_id));
            }
            return Err(Error::IdsExhausted(self.config.max_request_id));
        }
        Ok(id)
    }

    /// Push a fatal condition to the owner
    fn report(&self, error: Error) {
        if let Err(e) = self.errors.try_send(error) {
            log::warn!("Error channel full, dropping: {}", e);
        }
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Route inbound lines to pending calls or subscribers
    async fn dispatch_loop(client: Weak<Self>, mut channels: TransportChannels) {
        loop {
            tokio::select! {
                biased;
                line = channels.lines.recv() => {
                    let Some(line) = line else { break };
                    let Some(client) = client.upgrade() else { break };
                    client.handle_line(&line);
                }
                error = channels.errors.recv() => {
                    let Some(error) = error else { break };
                    let Some(client) = client.upgrade() else { break };
                    log::error!("Connection to {} failed: {}", client.peer(), error);
                    client.state.send_replace(ConnectionState::Disconnected);
                    client.pending.fail_all();
                    client.report(error);
                    break;
                }
            }
        }
    }

    fn handle_line(&self, line: &str) {
        match parse_line(line) {
            Ok(Incoming::Response { id, outcome }) => {
                if !self.pending.complete(id, outcome) {
                    log::debug!("Dropping response for unknown id {}", id);
                }
            }
            Ok(Incoming::Notification(notification)) => {
                self.subscriptions.dispatch(notification);
            }
            Err(e) => {
                log::warn!("Ignoring malformed message from {}: {}", self.peer(), e);
            }
        }
    }

    /// Periodic liveness call; a failure is fatal for the connection
    async fn keepalive_loop(client: Weak<Self>) {
        let (interval, cancel) = match client.upgrade() {
            Some(c) => (c.config.keepalive_interval, c.lifecycle.clone()),
            None => return,
        };
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }

            let Some(client) = client.upgrade() else { return };
            if client.state() != ConnectionState::Connected {
                return;
            }
            let ping = tokio::select! {
                _ = cancel.cancelled() => return,
                ping = client.ping() => ping,
            };
            if let Err(e) = ping {
                if cancel.is_cancelled() || client.state() != ConnectionState::Connected {
                    return;
                }
                log::error!("Keepalive to {} failed: {}", client.peer(), e);
                client.report(Error::Keepalive(Box::new(e)));
                return;
            }
        }
    }

    // ---- server.* ----

    /// Negotiate the protocol version; must be the first call on a session
    pub async fn server_version(&self, client_name: &str, protocol_version: &str) -> Result<ServerVersion> {
        self.request("server.version", vec![json!(client_name), json!(protocol_version)])
            .await
    }

    pub async fn server_banner(&self) -> Result<String> {
        self.request("server.banner", vec![]).await
    }

    pub async fn server_donation_address(&self) -> Result<String> {
        self.request("server.donation_address", vec![]).await
    }

    pub async fn server_peers(&self) -> Result<Vec<PeerEntry>> {
        self.request("server.peers.subscribe", vec![]).await
    }

    pub async fn ping(&self) -> Result<()> {
        self.request_value("server.ping", vec![]).await.map(|_| ())
    }

    // ---- blockchain.headers / block ----

    /// Register for tip notifications and return the current tip
    pub async fn headers_subscribe(&self) -> Result<HeaderNotification> {
        self.request(METHOD_HEADERS_SUBSCRIBE, vec![]).await
    }

    pub async fn block_headers(&self, start_height: u64, count: u64) -> Result<BlockHeaders> {
        self.request("blockchain.block.headers", vec![json!(start_height), json!(count)])
            .await
    }

    /// Fee rate in coins per kilobyte; negative when the server cannot estimate
    pub async fn estimate_fee(&self, blocks: u32) -> Result<f64> {
        self.request("blockchain.estimatefee", vec![json!(blocks)]).await
    }

    // ---- blockchain.scripthash ----

    pub async fn scripthash_get_balance(&self, scripthash: &ScriptHash) -> Result<Balance> {
        self.request("blockchain.scripthash.get_balance", vec![json!(scripthash.to_hex())])
            .await
    }

    pub async fn scripthash_get_history(&self, scripthash: &ScriptHash) -> Result<Vec<HistoryItem>> {
        self.request("blockchain.scripthash.get_history", vec![json!(scripthash.to_hex())])
            .await
    }

    pub async fn scripthash_listunspent(&self, scripthash: &ScriptHash) -> Result<Vec<Unspent>> {
        self.request("blockchain.scripthash.listunspent", vec![json!(scripthash.to_hex())])
            .await
    }

    /// Subscribe to status changes; returns the current status
    pub async fn scripthash_subscribe(&self, scripthash: &ScriptHash) -> Result<Option<String>> {
        self.request(METHOD_SCRIPTHASH_SUBSCRIBE, vec![json!(scripthash.to_hex())])
            .await
    }

    /// Returns false if the script hash was not subscribed
    pub async fn scripthash_unsubscribe(&self, scripthash: &ScriptHash) -> Result<bool> {
        self.request("blockchain.scripthash.unsubscribe", vec![json!(scripthash.to_hex())])
            .await
    }

    // ---- blockchain.address (pre-1.3 servers) ----

    pub async fn address_get_balance(&self, address: &str) -> Result<Balance> {
        self.request("blockchain.address.get_balance", vec![json!(address)]).await
    }

    pub async fn address_get_history(&self, address: &str) -> Result<Vec<HistoryItem>> {
        self.request("blockchain.address.get_history", vec![json!(address)]).await
    }

    pub async fn address_listunspent(&self, address: &str) -> Result<Vec<Unspent>> {
        self.request("blockchain.address.listunspent", vec![json!(address)]).await
    }

    pub async fn address_subscribe(&self, address: &str) -> Result<Option<String>> {
        self.request(METHOD_ADDRESS_SUBSCRIBE, vec![json!(address)]).await
    }

    // ---- blockchain.transaction ----

    /// Fetch a transaction. Without `verbose` the server answers with bare hex,
    /// which is wrapped into a `Transaction` carrying only `hex`.
    pub async fn transaction_get(&self, txid: &Hash256, verbose: bool) -> Result<Transaction> {
        let params = vec![json!(txid.to_hex()), json!(verbose)];
        if verbose {
            self.request("blockchain.transaction.get", params).await
        } else {
            let hex: String = self.request("blockchain.transaction.get", params).await?;
            Ok(Transaction::from_hex(hex))
        }
    }

    /// Broadcast a raw transaction; returns its txid
    pub async fn transaction_broadcast(&self, raw_tx: &[u8]) -> Result<Hash256> {
        let txid: String = self
            .request("blockchain.transaction.broadcast", vec![json!(hex::encode(raw_tx))])
            .await?;
        Hash256::from_hex(&txid)
    }
}

impl Drop for ElectrumClient {
    fn drop(&mut self) {
        self.lifecycle.cancel();
        for task in self.lock_tasks().drain(..) {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, WriteHalf};

    const WAIT: Duration = Duration::from_secs(5);

    /// Scripted far end of a duplex connection
    struct FakeServer {
        lines: Lines<BufReader<tokio::io::ReadHalf<DuplexStream>>>,
        writer: WriteHalf<DuplexStream>,
    }

    impl FakeServer {
        async fn next_request(&mut self) -> Value {
            let line = tokio::time::timeout(WAIT, self.lines.next_line())
                .await
                .expect("request in time")
                .unwrap()
                .expect("open stream");
            serde_json::from_str(&line).unwrap()
        }

        async fn send(&mut self, value: Value) {
            self.send_raw(&value.to_string()).await;
        }

        async fn send_raw(&mut self, line: &str) {
            self.writer.write_all(line.as_bytes()).await.unwrap();
            self.writer.write_all(b"\n").await.unwrap();
        }
    }

    fn test_config() -> ClientConfig {
        ClientConfig {
            request_timeout: Duration::from_secs(2),
            keepalive_interval: Duration::from_secs(3600),
            ..ClientConfig::default()
        }
    }

    fn pair(config: ClientConfig, cancel: &CancellationToken) -> (Arc<ElectrumClient>, mpsc::Receiver<Error>, FakeServer) {
        let (near, far) = tokio::io::duplex(64 * 1024);
        let transport = Transport::from_stream(near, "duplex", false);
        let (client, errors) = ElectrumClient::with_transport(transport, config, cancel).unwrap();
        let (read, writer) = tokio::io::split(far);
        let server = FakeServer {
            lines: BufReader::new(read).lines(),
            writer,
        };
        (client, errors, server)
    }

    #[tokio::test]
    async fn test_out_of_order_responses_match_by_id() {
        let cancel = CancellationToken::new();
        let (client, _errors, mut server) = pair(test_config(), &cancel);

        let server_task = tokio::spawn(async move {
            let first = server.next_request().await;
            let second = server.next_request().await;
            // answer in reverse order, echoing the method name
            for req in [&second, &first] {
                server
                    .send(json!({"jsonrpc": "2.0", "id": req["id"], "result": req["method"]}))
                    .await;
            }
            server
        });

        let c1 = client.clone();
        let c2 = client.clone();
        let (a, b) = tokio::join!(
            async move { c1.request::<String>("server.banner", vec![]).await },
            async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                c2.request::<String>("server.donation_address", vec![]).await
            }
        );

        assert_eq!(a.unwrap(), "server.banner");
        assert_eq!(b.unwrap(), "server.donation_address");
        assert_eq!(client.pending_calls(), 0);
        let _server = server_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_server_error_becomes_protocol_error() {
        let cancel = CancellationToken::new();
        let (client, _errors, mut server) = pair(test_config(), &cancel);

        tokio::spawn(async move {
            let req = server.next_request().await;
            server
                .send(json!({"id": req["id"], "error": {"code": 1, "message": "bad tx"}}))
                .await;
            server
        });

        let err = client.transaction_broadcast(&[0u8; 4]).await.unwrap_err();
        assert!(matches!(err, Error::Protocol { code: 1, .. }));
    }

    #[tokio::test]
    async fn test_malformed_line_does_not_abort() {
        let cancel = CancellationToken::new();
        let (client, mut errors, mut server) = pair(test_config(), &cancel);

        tokio::spawn(async move {
            let req = server.next_request().await;
            server.send_raw("{{{ garbage").await;
            server.send(json!({"id": req["id"], "result": "hello"})).await;
            server
        });

        assert_eq!(client.server_banner().await.unwrap(), "hello");
        assert_eq!(client.state(), ConnectionState::Connected);
        assert!(errors.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_notifications_fan_out_to_all_subscribers() {
        let cancel = CancellationToken::new();
        let (client, _errors, mut server) = pair(test_config(), &cancel);

        let mut a = client.listen_push(METHOD_HEADERS_SUBSCRIBE);
        let mut b = client.listen_push(METHOD_HEADERS_SUBSCRIBE);

        for height in [10, 11, 12] {
            server
                .send(json!({"method": METHOD_HEADERS_SUBSCRIBE, "params": [{"height": height, "hex": "00"}]}))
                .await;
        }

        for sub in [&mut a, &mut b] {
            for height in [10, 11, 12] {
                let n = tokio::time::timeout(WAIT, sub.recv()).await.unwrap().unwrap();
                assert_eq!(HeaderNotification::from_notification(&n).unwrap().height, height);
            }
        }
    }

    #[tokio::test]
    async fn test_non_verbose_transaction_is_wrapped() {
        let cancel = CancellationToken::new();
        let (client, _errors, mut server) = pair(test_config(), &cancel);

        tokio::spawn(async move {
            let req = server.next_request().await;
            assert_eq!(req["params"][1], json!(false));
            server.send(json!({"id": req["id"], "result": "0100beef"})).await;
            server
        });

        let tx = client.transaction_get(&Hash256::zero(), false).await.unwrap();
        assert_eq!(tx.hex, "0100beef");
        assert!(tx.txid.is_empty());
        assert!(tx.vout.is_empty());
    }

    #[tokio::test]
    async fn test_history_and_address_calls_use_wire_names() {
        let cancel = CancellationToken::new();
        let (client, _errors, mut server) = pair(test_config(), &cancel);

        let server_task = tokio::spawn(async move {
            let mut seen = Vec::new();
            for _ in 0..6 {
                let req = server.next_request().await;
                let method = req["method"].as_str().unwrap().to_string();
                let result = match method.as_str() {
                    "blockchain.scripthash.get_history" | "blockchain.address.get_history" => json!([
                        {"tx_hash": "aa", "height": 200},
                        {"tx_hash": "bb", "height": 0, "fee": 450},
                    ]),
                    "blockchain.scripthash.listunspent" | "blockchain.address.listunspent" => {
                        json!([{"tx_hash": "cc", "tx_pos": 1, "height": 210, "value": 5000}])
                    }
                    "blockchain.address.get_balance" => json!({"confirmed": 7, "unconfirmed": 0}),
                    "blockchain.address.subscribe" => Value::Null,
                    other => panic!("unexpected method {}", other),
                };
                seen.push((method, req["params"][0].clone()));
                server.send(json!({"id": req["id"], "result": result})).await;
            }
            seen
        });

        let scripthash = ScriptHash::from_script(&[0x51]);
        let address = "mipcBbFg9gMiCh81Kj8tqqdgoZub1ZJRfn";

        let history = client.scripthash_get_history(&scripthash).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].fee, Some(450));
        let unspent = client.scripthash_listunspent(&scripthash).await.unwrap();
        assert_eq!(unspent[0].value, 5000);
        assert_eq!(client.address_get_balance(address).await.unwrap().confirmed, 7);
        assert_eq!(client.address_get_history(address).await.unwrap()[0].height, 200);
        assert_eq!(client.address_listunspent(address).await.unwrap()[0].tx_pos, 1);
        assert_eq!(client.address_subscribe(address).await.unwrap(), None);

        let seen = server_task.await.unwrap();
        let hex = json!(scripthash.to_hex());
        assert_eq!(
            seen,
            vec![
                ("blockchain.scripthash.get_history".to_string(), hex.clone()),
                ("blockchain.scripthash.listunspent".to_string(), hex),
                ("blockchain.address.get_balance".to_string(), json!(address)),
                ("blockchain.address.get_history".to_string(), json!(address)),
                ("blockchain.address.listunspent".to_string(), json!(address)),
                ("blockchain.address.subscribe".to_string(), json!(address)),
            ]
        );
    }

    #[tokio::test]
    async fn test_request_times_out_and_cleans_up() {
        let cancel = CancellationToken::new();
        let config = ClientConfig {
            request_timeout: Duration::from_millis(50),
            ..test_config()
        };
        let (client, _errors, _server) = pair(config, &cancel);

        let err = client.server_banner().await.unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
        assert_eq!(client.pending_calls(), 0);
    }

    #[tokio::test]
    async fn test_peer_close_reports_error_and_fails_pending() {
        let cancel = CancellationToken::new();
        let (client, mut errors, mut server) = pair(test_config(), &cancel);

        tokio::spawn(async move {
            let _req = server.next_request().await;
            drop(server);
        });

        let err = client.server_banner().await.unwrap_err();
        assert!(matches!(err, Error::Disconnected));

        let reported = tokio::time::timeout(WAIT, errors.recv()).await.unwrap().unwrap();
        assert!(matches!(reported, Error::EndOfStream));
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_keepalive_failure_is_reported() {
        let cancel = CancellationToken::new();
        let config = ClientConfig {
            request_timeout: Duration::from_millis(50),
            keepalive_interval: Duration::from_millis(20),
            ..test_config()
        };
        // server never answers
        let (_client, mut errors, _server) = pair(config, &cancel);

        let reported = tokio::time::timeout(WAIT, errors.recv()).await.unwrap().unwrap();
        assert!(matches!(reported, Error::Keepalive(_)));
    }

    #[tokio::test]
    async fn test_id_exhaustion_triggers_reconnect_signal() {
        let cancel = CancellationToken::new();
        let config = ClientConfig {
            max_request_id: 1,
            ..test_config()
        };
        let (client, mut errors, mut server) = pair(config, &cancel);

        tokio::spawn(async move {
            let req = server.next_request().await;
            server.send(json!({"id": req["id"], "result": null})).await;
            server
        });

        client.ping().await.unwrap();
        assert!(matches!(client.ping().await, Err(Error::IdsExhausted(1))));
        assert!(matches!(errors.recv().await, Some(Error::IdsExhausted(1))));
    }

    #[tokio::test]
    async fn test_cancel_then_disconnect_is_clean() {
        let cancel = CancellationToken::new();
        let (client, mut errors, _server) = pair(test_config(), &cancel);
        let mut sub = client.listen_push(METHOD_HEADERS_SUBSCRIBE);

        cancel.cancel();
        client.disconnect().await;

        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(tokio::time::timeout(WAIT, sub.recv()).await.unwrap().is_none());
        // every sender is gone and nothing was ever reported
        drop(client);
        assert!(tokio::time::timeout(WAIT, errors.recv()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_request_after_disconnect_fails() {
        let cancel = CancellationToken::new();
        let (client, _errors, _server) = pair(test_config(), &cancel);
        client.disconnect().await;
        client.disconnect().await;

        assert!(matches!(client.ping().await, Err(Error::Disconnected)));
    }
}
