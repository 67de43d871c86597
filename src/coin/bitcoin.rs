// Bitcoin chain parameters

use crate::coin::{Coin, Network};
use crate::core::{BlockHeader, HEADER_SIZE, Script, ScriptHash, hash256};
use crate::error::{Error, Result};

const MAINNET_P2PKH: u8 = 0x00;
const MAINNET_P2SH: u8 = 0x05;
const TESTNET_P2PKH: u8 = 0x6f;
const TESTNET_P2SH: u8 = 0xc4;

/// Bitcoin: 80-byte headers, base58 legacy addresses
#[derive(Debug, Clone, Copy, Default)]
pub struct Bitcoin;

impl Bitcoin {
    /// Version byte and 20-byte hash of a base58check address
    fn decode_base58check(address: &str) -> Result<(u8, [u8; 20])> {
        let data = bs58::decode(address)
            .into_vec()
            .map_err(|e| Error::Decode(format!("invalid base58 address {}: {}", address, e)))?;

        if data.len() != 25 {
            return Err(Error::Decode(format!(
                "invalid address length {} for {}",
                data.len(),
                address
            )));
        }

        let (payload, checksum) = data.split_at(21);
        if &hash256(payload).as_bytes()[..4] != checksum {
            return Err(Error::Decode(format!("bad address checksum: {}", address)));
        }

        let mut hash = [0u8; 20];
        hash.copy_from_slice(&payload[1..]);
        Ok((payload[0], hash))
    }
}

impl Coin for Bitcoin {
    fn name(&self) -> &'static str {
        "btc"
    }

    fn header_size(&self) -> usize {
        HEADER_SIZE
    }

    fn checkpoint(&self, network: Network) -> u64 {
        match network {
            Network::Mainnet => 840_000,
            Network::Testnet | Network::Regtest => 0,
        }
    }

    fn deserialize_header(&self, raw: &[u8]) -> Result<BlockHeader> {
        BlockHeader::deserialize(raw)
    }

    fn default_port(&self, network: Network, tls: bool) -> u16 {
        match (network, tls) {
            (Network::Mainnet, false) => 50001,
            (Network::Mainnet, true) => 50002,
            (Network::Testnet, false) => 60001,
            (Network::Testnet, true) => 60002,
            (Network::Regtest, false) => 60401,
            (Network::Regtest, true) => 60402,
        }
    }

    fn max_peers(&self, network: Network) -> usize {
        match network {
            Network::Mainnet => 10,
            Network::Testnet => 4,
            Network::Regtest => 1,
        }
    }

    fn address_to_scripthash(&self, network: Network, address: &str) -> Result<ScriptHash> {
        let lower = address.to_ascii_lowercase();
        if lower.starts_with("bc1") || lower.starts_with("tb1") || lower.starts_with("bcrt1") {
            return Err(Error::NotImplemented("bech32 addresses".to_string()));
        }

        let (version, hash) = Self::decode_base58check(address)?;
        let (p2pkh, p2sh) = match network {
            Network::Mainnet => (MAINNET_P2PKH, MAINNET_P2SH),
            Network::Testnet | Network::Regtest => (TESTNET_P2PKH, TESTNET_P2SH),
        };

        let script = if version == p2pkh {
            Script::p2pkh_script_pubkey(&hash)
        } else if version == p2sh {
            Script::p2sh_script_pubkey(&hash)
        } else {
            return Err(Error::Decode(format!(
                "address {} is not a {} address (version {:#04x})",
                address, network, version
            )));
        };

        Ok(ScriptHash::from_script(&script))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GENESIS_ADDRESS: &str = "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa";

    fn encode(version: u8, hash: &[u8; 20]) -> String {
        let mut data = vec![version];
        data.extend_from_slice(hash);
        let checksum = hash256(&data);
        data.extend_from_slice(&checksum.as_bytes()[..4]);
        bs58::encode(data).into_string()
    }

    #[test]
    fn test_p2pkh_address_scripthash() {
        let hash = Bitcoin.address_to_scripthash(Network::Mainnet, GENESIS_ADDRESS).unwrap();
        assert_eq!(
            hash.to_hex(),
            "8b01df4e368ea28f8dc0423bcf7a4923e3a12d307c875e47a0cfbf90b5c39161"
        );
    }

    #[test]
    fn test_bad_checksum_rejected() {
        let result = Bitcoin.address_to_scripthash(Network::Mainnet, "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNb");
        assert!(matches!(result, Err(Error::Decode(_))));
    }

    #[test]
    fn test_network_mismatch_rejected() {
        let testnet = encode(TESTNET_P2PKH, &[3u8; 20]);
        assert!(Bitcoin.address_to_scripthash(Network::Testnet, &testnet).is_ok());
        assert!(Bitcoin.address_to_scripthash(Network::Mainnet, &testnet).is_err());
        assert!(Bitcoin.address_to_scripthash(Network::Testnet, GENESIS_ADDRESS).is_err());
    }

    #[test]
    fn test_p2sh_uses_script_template() {
        let address = encode(MAINNET_P2SH, &[9u8; 20]);
        let hash = Bitcoin.address_to_scripthash(Network::Mainnet, &address).unwrap();
        assert_eq!(hash, ScriptHash::from_script(&Script::p2sh_script_pubkey(&[9u8; 20])));
    }

    #[test]
    fn test_bech32_not_implemented() {
        let result = Bitcoin.address_to_scripthash(
            Network::Mainnet,
            "bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq",
        );
        assert!(matches!(result, Err(Error::NotImplemented(_))));
    }

    #[test]
    fn test_chain_constants() {
        assert_eq!(Bitcoin.header_size(), 80);
        assert_eq!(Bitcoin.checkpoint(Network::Mainnet), 840_000);
        assert_eq!(Bitcoin.checkpoint(Network::Testnet), 0);
        assert_eq!(Bitcoin.default_port(Network::Testnet, true), 60002);
        assert_eq!(Bitcoin.store_file_name(Network::Mainnet), "btc-mainnet.headers");
    }
}
