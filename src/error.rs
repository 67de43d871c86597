// Error taxonomy shared by the transport, client, synchronizer and adapter

use thiserror::Error;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong talking to an Electrum server or keeping
/// the local header store.
#[derive(Debug, Error)]
pub enum Error {
    /// Dial, TLS handshake or connect timeout
    #[error("connection failed: {0}")]
    Connection(String),

    /// Write failure or write timeout
    #[error("send failed: {0}")]
    Send(String),

    /// Read failure on the socket (including over-long lines)
    #[error("read failed: {0}")]
    Read(String),

    /// Peer closed the stream
    #[error("connection closed by peer")]
    EndOfStream,

    /// Malformed or unexpected JSON shape
    #[error("decode error: {0}")]
    Decode(String),

    /// The server answered with an RPC error object
    #[error("server error {code}: {message}")]
    Protocol { code: i64, message: String },

    /// No matching response before the deadline or cancellation
    #[error("request {method} timed out")]
    Timeout { method: String },

    /// Header file is not a whole number of records, or a record is unusable
    #[error("corrupt header store: {0}")]
    CorruptStore(String),

    /// Adapter used before start or after teardown
    #[error("client is not running")]
    NotRunning,

    /// Intentionally unsupported operation
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// The connection went away while a call was outstanding
    #[error("disconnected")]
    Disconnected,

    /// Request id space used up; the connection must be replaced
    #[error("request ids exhausted after id {0}")]
    IdsExhausted(u64),

    /// Periodic liveness call failed
    #[error("keepalive failed: {0}")]
    Keepalive(Box<Error>),

    /// No common ancestor found within the configured rewind depth
    #[error("reorganization at height {height} deeper than {max_depth} blocks")]
    ReorgTooDeep { height: u64, max_depth: u64 },

    /// Server has no fee estimate and no fallback estimator is configured
    #[error("fee estimate unavailable")]
    FeeUnavailable,

    /// Invalid configuration value
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for failures that leave the connection unusable.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Connection(_)
                | Error::Read(_)
                | Error::EndOfStream
                | Error::Disconnected
                | Error::IdsExhausted(_)
                | Error::Keepalive(_)
                | Error::CorruptStore(_)
                | Error::ReorgTooDeep { .. }
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Decode(e.to_string())
    }
}

impl From<hex::FromHexError> for Error {
    fn from(e: hex::FromHexError) -> Self {
        Error::Decode(format!("invalid hex: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classes() {
        assert!(Error::EndOfStream.is_fatal());
        assert!(Error::Keepalive(Box::new(Error::Timeout { method: "server.ping".into() })).is_fatal());
        assert!(Error::CorruptStore("x".into()).is_fatal());
        assert!(!Error::Timeout { method: "server.ping".into() }.is_fatal());
        assert!(!Error::Protocol { code: 1, message: "bad".into() }.is_fatal());
    }

    #[test]
    fn test_json_error_maps_to_decode() {
        let err: Error = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, Error::Decode(_)));
    }
}
