// Chain parameters and the domain-level adapter inputs

mod bitcoin;

pub use bitcoin::Bitcoin;

use crate::core::{BlockHeader, Hash256, ScriptHash, hash256};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Network selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Mainnet,
    Testnet,
    Regtest,
}

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
            Network::Regtest => "regtest",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Network {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" | "main" | "bitcoin" => Ok(Network::Mainnet),
            "testnet" | "test" => Ok(Network::Testnet),
            "regtest" => Ok(Network::Regtest),
            other => Err(Error::Config(format!("unknown network: {}", other))),
        }
    }
}

/// Everything chain-specific the client and synchronizer need.
pub trait Coin: Send + Sync + 'static {
    /// Short lowercase name, used in the header store file name
    fn name(&self) -> &'static str;

    /// Size of one serialized header record
    fn header_size(&self) -> usize;

    /// Lowest height kept in the local header store
    fn checkpoint(&self, network: Network) -> u64;

    fn deserialize_header(&self, raw: &[u8]) -> Result<BlockHeader>;

    /// Block hash of a raw header record
    fn header_hash(&self, raw: &[u8]) -> Hash256 {
        hash256(raw)
    }

    fn default_port(&self, network: Network, tls: bool) -> u16;

    /// How many server peers are worth reporting
    fn max_peers(&self, network: Network) -> usize;

    /// Output script hash for a human-readable address
    fn address_to_scripthash(&self, network: Network, address: &str) -> Result<ScriptHash> {
        let _ = (network, address);
        Err(Error::NotImplemented(format!("address decoding for {}", self.name())))
    }

    /// Header store file name for `network`
    fn store_file_name(&self, network: Network) -> String {
        format!("{}-{}.headers", self.name(), network)
    }
}

/// External fee-rate source consulted when the server has no estimate.
#[async_trait]
pub trait FeeEstimator: Send + Sync {
    /// Fee rate in satoshis per virtual byte for confirmation within `blocks`
    async fn fee_rate(&self, blocks: u32) -> Result<f64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_parse_and_display() {
        assert_eq!("testnet".parse::<Network>().unwrap(), Network::Testnet);
        assert_eq!("MAIN".parse::<Network>().unwrap(), Network::Mainnet);
        assert_eq!(Network::Regtest.to_string(), "regtest");
        assert!(matches!("signet".parse::<Network>(), Err(Error::Config(_))));
    }

    #[test]
    fn test_network_serde_lowercase() {
        assert_eq!(serde_json::to_string(&Network::Testnet).unwrap(), "\"testnet\"");
        let network: Network = serde_json::from_str("\"regtest\"").unwrap();
        assert_eq!(network, Network::Regtest);
    }

    struct Bare;

    impl Coin for Bare {
        fn name(&self) -> &'static str {
            "bare"
        }
        fn header_size(&self) -> usize {
            80
        }
        fn checkpoint(&self, _network: Network) -> u64 {
            0
        }
        fn deserialize_header(&self, raw: &[u8]) -> Result<BlockHeader> {
            BlockHeader::deserialize(raw)
        }
        fn default_port(&self, _network: Network, _tls: bool) -> u16 {
            1
        }
        fn max_peers(&self, _network: Network) -> usize {
            1
        }
    }

    #[test]
    fn test_default_address_decoding_is_not_implemented() {
        let err = Bare.address_to_scripthash(Network::Mainnet, "anything").unwrap_err();
        assert!(matches!(err, Error::NotImplemented(_)));
        assert_eq!(Bare.store_file_name(Network::Testnet), "bare-testnet.headers");
    }
}
