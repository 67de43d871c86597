// Electrum protocol engine: framed transport, JSON-RPC correlation, notification fan-out

mod client;
mod message;
mod subscription;
mod transport;
mod types;

pub use client::{
    ConnectionState, ElectrumClient, MAX_HEADERS_PER_CALL, METHOD_ADDRESS_SUBSCRIBE, METHOD_HEADERS_SUBSCRIBE,
    METHOD_SCRIPTHASH_SUBSCRIBE,
};
pub use message::{Incoming, Notification, Request, parse_line};
pub use subscription::{Subscription, SubscriptionRegistry};
pub use transport::{AsyncStream, MAX_LINE_LENGTH, Transport, TransportChannels};
pub use types::*;
