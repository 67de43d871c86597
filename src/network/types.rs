// Typed results of the Electrum methods we call

use crate::error::{Error, Result};
use crate::network::Notification;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `blockchain.headers.subscribe` result and notification payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderNotification {
    pub height: u64,
    pub hex: String,
}

impl HeaderNotification {
    /// Extract from a push message: `params = [{"height": H, "hex": "..."}]`
    pub fn from_notification(notification: &Notification) -> Result<Self> {
        let payload = notification
            .params
            .get(0)
            .cloned()
            .ok_or_else(|| Error::Decode("header notification without params".to_string()))?;
        Ok(serde_json::from_value(payload)?)
    }

    pub fn raw(&self) -> Result<Vec<u8>> {
        Ok(hex::decode(&self.hex)?)
    }
}

/// `blockchain.block.headers` result
#[derive(Debug, Clone, Deserialize)]
pub struct BlockHeaders {
    pub count: u64,
    pub hex: String,
    #[serde(default)]
    pub max: u64,
}

/// Scripthash status change: `params = [scripthash, status]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScripthashStatus {
    pub scripthash: String,
    /// None when the script has no history
    pub status: Option<String>,
}

impl ScripthashStatus {
    pub fn from_notification(notification: &Notification) -> Result<Self> {
        let (scripthash, status): (String, Option<String>) =
            serde_json::from_value(notification.params.clone())?;
        Ok(Self { scripthash, status })
    }
}

/// Balance in satoshis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Balance {
    pub confirmed: i64,
    pub unconfirmed: i64,
}

/// One entry of a script's history. `height` is 0 or -1 for mempool entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryItem {
    pub tx_hash: String,
    pub height: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee: Option<u64>,
}

/// Unspent output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unspent {
    pub tx_hash: String,
    pub tx_pos: u32,
    pub height: u64,
    pub value: u64,
}

/// `server.peers.subscribe` entry: `[ip, hostname, [features...]]`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "(String, String, Vec<String>)")]
pub struct PeerEntry {
    pub address: String,
    pub host: String,
    pub features: Vec<String>,
}

impl From<(String, String, Vec<String>)> for PeerEntry {
    fn from((address, host, features): (String, String, Vec<String>)) -> Self {
        Self {
            address,
            host,
            features,
        }
    }
}

impl PeerEntry {
    /// Advertised port for the given feature prefix (`t` = TCP, `s` = TLS)
    pub fn port(&self, prefix: char) -> Option<u16> {
        self.features
            .iter()
            .filter_map(|f| f.strip_prefix(prefix))
            .find_map(|port| port.parse().ok())
    }
}

/// `server.version` result: `[server_software, protocol_version]`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "(String, String)")]
pub struct ServerVersion {
    pub software: String,
    pub protocol: String,
}

impl From<(String, String)> for ServerVersion {
    fn from((software, protocol): (String, String)) -> Self {
        Self { software, protocol }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptSig {
    #[serde(default)]
    pub asm: String,
    #[serde(default)]
    pub hex: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TxIn {
    #[serde(default)]
    pub txid: Option<String>,
    #[serde(default)]
    pub vout: Option<u32>,
    #[serde(default)]
    pub coinbase: Option<String>,
    #[serde(default, rename = "scriptSig")]
    pub script_sig: Option<ScriptSig>,
    #[serde(default)]
    pub txinwitness: Vec<String>,
    #[serde(default)]
    pub sequence: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptPubKey {
    #[serde(default)]
    pub asm: String,
    #[serde(default)]
    pub hex: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub addresses: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TxOut {
    /// Amount in coins (not satoshis), as reported by the node
    #[serde(default)]
    pub value: f64,
    #[serde(default)]
    pub n: u32,
    #[serde(default, rename = "scriptPubKey")]
    pub script_pub_key: ScriptPubKey,
}

/// `blockchain.transaction.get` result.
/// Non-verbose calls only fill `hex`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(default)]
    pub hex: String,
    #[serde(default)]
    pub txid: String,
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub version: i32,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub vsize: u64,
    #[serde(default)]
    pub weight: u64,
    #[serde(default)]
    pub locktime: u32,
    #[serde(default)]
    pub vin: Vec<TxIn>,
    #[serde(default)]
    pub vout: Vec<TxOut>,
    #[serde(default)]
    pub blockhash: Option<String>,
    #[serde(default)]
    pub confirmations: Option<u64>,
    #[serde(default)]
    pub time: Option<u64>,
    #[serde(default)]
    pub blocktime: Option<u64>,
}

impl Transaction {
    /// Wrap a bare hex answer from a non-verbose call
    pub fn from_hex(hex: String) -> Self {
        Self {
            hex,
            ..Default::default()
        }
    }

    pub fn raw(&self) -> Result<Vec<u8>> {
        Ok(hex::decode(&self.hex)?)
    }
}

/// Decode `value` into `T`, naming the method on failure
pub(crate) fn decode_result<T: serde::de::DeserializeOwned>(method: &str, value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| Error::Decode(format!("{}: {}", method, e)))
}
