// Framed line transport over TCP or TLS

use crate::error::{Error, Result};
use futures::{SinkExt, StreamExt};
use rustls::pki_types::ServerName;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_rustls::TlsConnector;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tokio_util::sync::CancellationToken;

/// Longest inbound line accepted; large verbose transactions stay well below it
pub const MAX_LINE_LENGTH: usize = 32 * 1024 * 1024;

const LINE_CHANNEL_CAPACITY: usize = 256;

/// Log target for raw wire traffic
const WIRE_TARGET: &str = "electrum_sync::wire";

/// Any bidirectional byte stream the transport can own
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + 'static> AsyncStream for T {}

type BoxedStream = Box<dyn AsyncStream>;
type LineReader = FramedRead<ReadHalf<BoxedStream>, LinesCodec>;
type LineWriter = FramedWrite<WriteHalf<BoxedStream>, LinesCodec>;

/// Output side of a listening transport
pub struct TransportChannels {
    /// Every inbound line, in arrival order
    pub lines: mpsc::Receiver<String>,
    /// At most one terminal error
    pub errors: mpsc::Receiver<Error>,
}

/// One socket, framed as newline-delimited messages
pub struct Transport {
    peer: String,
    writer: Mutex<LineWriter>,
    reader: std::sync::Mutex<Option<LineReader>>,
    debug: bool,
    opened: Instant,
}

impl Transport {
    /// Dial `host:port`, optionally wrapping the socket in TLS.
    pub async fn connect(
        addr: &str,
        tls: Option<Arc<rustls::ClientConfig>>,
        timeout: Duration,
        debug: bool,
    ) -> Result<Self> {
        let dial = async {
            let tcp = TcpStream::connect(addr)
                .await
                .map_err(|e| Error::Connection(format!("failed to connect to {}: {}", addr, e)))?;
            tcp.set_nodelay(true)
                .map_err(|e| Error::Connection(format!("failed to configure socket: {}", e)))?;

            let stream: BoxedStream = match tls {
                Some(config) => {
                    let host = host_of(addr);
                    let server_name = ServerName::try_from(host.to_string())
                        .map_err(|e| Error::Connection(format!("invalid TLS server name {}: {}", host, e)))?;
                    let tls_stream = TlsConnector::from(config)
                        .connect(server_name, tcp)
                        .await
                        .map_err(|e| Error::Connection(format!("TLS handshake with {} failed: {}", addr, e)))?;
                    Box::new(tls_stream)
                }
                None => Box::new(tcp),
            };
            Ok::<_, Error>(stream)
        };

        let stream = tokio::time::timeout(timeout, dial)
            .await
            .map_err(|_| Error::Connection(format!("timed out connecting to {}", addr)))??;

        log::info!("Connected to {}", addr);
        Ok(Self::with_boxed(stream, addr.to_string(), debug))
    }

    /// Wrap an already-open stream
    pub fn from_stream<S: AsyncStream>(stream: S, peer: impl Into<String>, debug: bool) -> Self {
        Self::with_boxed(Box::new(stream), peer.into(), debug)
    }

    fn with_boxed(stream: BoxedStream, peer: String, debug: bool) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            peer,
            writer: Mutex::new(FramedWrite::new(write_half, LinesCodec::new())),
            reader: std::sync::Mutex::new(Some(FramedRead::new(
                read_half,
                LinesCodec::new_with_max_length(MAX_LINE_LENGTH),
            ))),
            debug,
            opened: Instant::now(),
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Write one framed message
    pub async fn send_message(&self, payload: &str, timeout: Duration) -> Result<()> {
        self.trace(">>", payload);

        let write = async {
            let mut writer = self.writer.lock().await;
            writer.send(payload).await
        };

        match tokio::time::timeout(timeout, write).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(Error::Send(format!("write to {} failed: {}", self.peer, e))),
            Err(_) => Err(Error::Send(format!("write to {} timed out", self.peer))),
        }
    }

    /// Start the read side. Lines and the terminal error are forwarded until
    /// `cancel` fires or the socket fails. Can only be called once.
    pub fn listen(&self, cancel: CancellationToken) -> Result<(TransportChannels, JoinHandle<()>)> {
        let framed = self
            .reader
            .lock()
            .map_err(|_| Error::Read("reader lock poisoned".to_string()))?
            .take()
            .ok_or_else(|| Error::Read("transport is already listening".to_string()))?;

        let (lines_tx, lines_rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);
        let (errors_tx, errors_rx) = mpsc::channel(1);

        let tracer = self.tracer();
        let handle = tokio::spawn(async move {
            let (inner_lines_tx, mut inner_lines) = mpsc::channel::<String>(LINE_CHANNEL_CAPACITY);
            let (inner_err_tx, mut inner_errors) = mpsc::channel::<Error>(1);
            let reader = tokio::spawn(read_lines(framed, inner_lines_tx, inner_err_tx));

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    Some(line) = inner_lines.recv() => {
                        tracer.trace("<<", &line);
                        if lines_tx.send(line).await.is_err() {
                            break;
                        }
                    }
                    Some(err) = inner_errors.recv() => {
                        log::debug!("Transport {} terminated: {}", tracer.peer, err);
                        let _ = errors_tx.send(err).await;
                        break;
                    }
                    else => break,
                }
            }

            reader.abort();
        });

        Ok((
            TransportChannels {
                lines: lines_rx,
                errors: errors_rx,
            },
            handle,
        ))
    }

    /// Flush and shut down the write half
    pub async fn close(&self) -> Result<()> {
        let mut writer = self.writer.lock().await;
        SinkExt::<&str>::close(&mut *writer)
            .await
            .map_err(|e| Error::Send(format!("close {} failed: {}", self.peer, e)))
    }

    fn trace(&self, direction: &str, payload: &str) {
        self.tracer().trace(direction, payload);
    }

    fn tracer(&self) -> WireTracer {
        WireTracer {
            peer: self.peer.clone(),
            enabled: self.debug,
            opened: self.opened,
        }
    }
}

/// Per-connection raw traffic logger
#[derive(Clone)]
struct WireTracer {
    peer: String,
    enabled: bool,
    opened: Instant,
}

impl WireTracer {
    fn trace(&self, direction: &str, payload: &str) {
        if self.enabled {
            log::debug!(
                target: WIRE_TARGET,
                "[{:>10.3}s] {} {} {}",
                self.opened.elapsed().as_secs_f64(),
                self.peer,
                direction,
                payload
            );
        }
    }
}

/// Blocking-read task: forwards lines, then exactly one terminal error.
async fn read_lines(mut framed: LineReader, lines: mpsc::Sender<String>, errors: mpsc::Sender<Error>) {
    while let Some(item) = framed.next().await {
        match item {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                if lines.send(line).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                let _ = errors.send(Error::Read(e.to_string())).await;
                return;
            }
        }
    }
    let _ = errors.send(Error::EndOfStream).await;
}

fn host_of(addr: &str) -> &str {
    let host = addr.rsplit_once(':').map(|(host, _)| host).unwrap_or(addr);
    host.trim_start_matches('[').trim_end_matches(']')
}
