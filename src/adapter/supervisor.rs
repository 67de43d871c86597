// Connection lifecycle owner

use crate::error::{Error, Result};
use crate::network::ElectrumClient;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// Why a session ended
#[derive(Debug)]
pub(crate) enum Shutdown {
    /// `stop` or the caller's cancellation
    Requested,
    Fatal(Error),
}

/// Watches every source of fatal conditions for one session and tears the
/// session down on the first of them.
pub(crate) struct Supervisor {
    pub client: Arc<ElectrumClient>,
    /// Transport errors, keepalive failures, id exhaustion
    pub errors: mpsc::Receiver<Error>,
    /// Outcome of the synchronizer task
    pub sync_result: oneshot::Receiver<Result<()>>,
    pub cancel: CancellationToken,
    pub running: Arc<AtomicBool>,
    pub last_error: Arc<Mutex<Option<String>>>,
}

impl Supervisor {
    pub async fn run(mut self) -> Shutdown {
        let mut sync_done = false;
        let shutdown = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Shutdown::Requested,
            error = self.errors.recv() => Shutdown::Fatal(error.unwrap_or(Error::Disconnected)),
            result = &mut self.sync_result => {
                sync_done = true;
                match result {
                    Ok(Ok(())) => Shutdown::Requested,
                    Ok(Err(e)) => Shutdown::Fatal(e),
                    Err(_) => Shutdown::Fatal(Error::CorruptStore("header synchronizer aborted".to_string())),
                }
            }
        };

        self.running.store(false, Ordering::Release);
        match &shutdown {
            Shutdown::Requested => log::info!("Stopping session with {}", self.client.peer()),
            Shutdown::Fatal(e) => {
                log::error!("Session with {} failed: {}", self.client.peer(), e);
                *self.last_error.lock().unwrap_or_else(|e| e.into_inner()) = Some(e.to_string());
            }
        }

        self.cancel.cancel();
        self.client.disconnect().await;

        // anything still queued happened after the first fatal condition
        while let Ok(error) = self.errors.try_recv() {
            log::warn!("Further failure after shutdown: {}", error);
        }
        if !sync_done
            && let Ok(Err(e)) = self.sync_result.await
            && !matches!(e, Error::Disconnected)
        {
            log::warn!("Header synchronizer ended with: {}", e);
        }

        shutdown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::network::Transport;
    use std::time::Duration;

    fn supervisor() -> (
        Supervisor,
        tokio::io::DuplexStream,
        oneshot::Sender<Result<()>>,
        CancellationToken,
    ) {
        let cancel = CancellationToken::new();
        let (near, far) = tokio::io::duplex(1024);
        let config = ClientConfig {
            keepalive_interval: Duration::from_secs(3600),
            ..ClientConfig::default()
        };
        let transport = Transport::from_stream(near, "duplex", false);
        let (client, errors) = ElectrumClient::with_transport(transport, config, &cancel).unwrap();
        let (sync_tx, sync_result) = oneshot::channel();

        let supervisor = Supervisor {
            client,
            errors,
            sync_result,
            cancel: cancel.clone(),
            running: Arc::new(AtomicBool::new(true)),
            last_error: Arc::new(Mutex::new(None)),
        };
        (supervisor, far, sync_tx, cancel)
    }

    async fn wait_stopped(running: &AtomicBool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while running.load(Ordering::Acquire) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_peer_close_is_fatal() {
        let (supervisor, far, sync_tx, _cancel) = supervisor();
        let running = supervisor.running.clone();
        let last_error = supervisor.last_error.clone();
        let client = supervisor.client.clone();
        let handle = tokio::spawn(supervisor.run());

        drop(far);
        wait_stopped(&running).await;
        drop(sync_tx);
        let shutdown = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();

        assert!(matches!(shutdown, Shutdown::Fatal(Error::EndOfStream)));
        assert!(!running.load(Ordering::Acquire));
        assert!(last_error.lock().unwrap().is_some());
        assert_eq!(client.state(), crate::network::ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_synchronizer_failure_is_fatal() {
        let (supervisor, _far, sync_tx, _cancel) = supervisor();
        let running = supervisor.running.clone();
        let handle = tokio::spawn(supervisor.run());

        sync_tx
            .send(Err(Error::CorruptStore("bad record".to_string())))
            .unwrap();
        let shutdown = handle.await.unwrap();

        assert!(matches!(shutdown, Shutdown::Fatal(Error::CorruptStore(_))));
        assert!(!running.load(Ordering::Acquire));
    }

    #[tokio::test]
    async fn test_cancel_is_not_an_error() {
        let (supervisor, _far, sync_tx, cancel) = supervisor();
        let last_error = supervisor.last_error.clone();
        let running = supervisor.running.clone();
        let handle = tokio::spawn(supervisor.run());

        cancel.cancel();
        wait_stopped(&running).await;
        drop(sync_tx);
        let shutdown = handle.await.unwrap();

        assert!(matches!(shutdown, Shutdown::Requested));
        assert!(last_error.lock().unwrap().is_none());
    }
}
