// src/config.rs
use std::str::FromStr;

use ethers::types::{Address, Bytes, H256};

use crate::error::PaymasterError;

/// Base Sepolia, the one network the paymaster sponsors on.
pub const BASE_SEPOLIA_CHAIN_ID: u64 = 84532;

/// ERC-4337 v0.6 entry point.
pub const ENTRY_POINT_V06: &str = "0x5FF137D4b0FDCD49DcA30c7CF57E578a026d2789";

/// Coinbase Smart Wallet factory. For undeployed senders, the initCode
/// must deploy through this factory and nothing else.
pub const SMART_WALLET_FACTORY: &str = "0x0BA5ED0c6AA8c49038F819E587E2633c4A9F428a";

/// Runtime bytecode of the ERC-1967 minimal proxy the factory deploys.
/// Compared byte-exact against the sender's on-chain code.
pub const SMART_WALLET_PROXY_BYTECODE: &str =
    "0x363d3d373d3d363d7f360894a13ba1a3210667c828492db98dca3e2076cc3735a920a3ca505d382bbc545af43d6000803e6038573d6000fd5b3d6000f3";

/// Smart wallet v1 implementation the proxy is expected to point at.
pub const SMART_WALLET_V1_IMPLEMENTATION: &str = "0x000100abaad02f1cfC8Bbe32bD5a564817339E72";

/// ERC-1967 implementation pointer slot, keccak256("eip1967.proxy.implementation") - 1.
pub const ERC1967_IMPLEMENTATION_SLOT: &str =
    "0x360894a13ba1a3210667c828492db98dca3e2076cc3735a920a3ca505d382bbc";

/// MagicSpend helper, the only contract allowed as an auxiliary first call
/// in a two-call batch.
pub const MAGIC_SPEND: &str = "0x011A61C07DbF256A68256B1cB51A5e246730aB92";

/// Everything the sponsorship policy compares a user operation against.
/// Parsed and validated once at startup; malformed constants abort the
/// process instead of failing requests.
#[derive(Debug, Clone)]
pub struct PolicyConfig {
    pub chain_id: u64,
    pub entry_point: Address,
    pub wallet_factory: Address,
    pub proxy_bytecode: Bytes,
    pub implementation_slot: H256,
    pub wallet_implementation: Address,
    pub magic_spend: Address,
    /// The DexaPay gateway contract, the only call target the policy sponsors.
    pub gateway: Address,
}

impl PolicyConfig {
    pub fn base_sepolia(gateway: &str) -> Result<Self, PaymasterError> {
        Ok(Self {
            chain_id: BASE_SEPOLIA_CHAIN_ID,
            entry_point: parse_address(ENTRY_POINT_V06)?,
            wallet_factory: parse_address(SMART_WALLET_FACTORY)?,
            proxy_bytecode: parse_bytecode(SMART_WALLET_PROXY_BYTECODE)?,
            implementation_slot: parse_slot(ERC1967_IMPLEMENTATION_SLOT)?,
            wallet_implementation: parse_address(SMART_WALLET_V1_IMPLEMENTATION)?,
            magic_spend: parse_address(MAGIC_SPEND)?,
            gateway: parse_address(gateway)?,
        })
    }

    /// Sponsor on a different network than the default. Every other
    /// constant keeps its value; use with care.
    pub fn with_chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = chain_id;
        self
    }
}

fn parse_address(value: &str) -> Result<Address, PaymasterError> {
    Address::from_str(value)
        .map_err(|e| PaymasterError::InvalidConfiguration(format!("bad address {value}: {e}")))
}

fn parse_slot(value: &str) -> Result<H256, PaymasterError> {
    H256::from_str(value)
        .map_err(|e| PaymasterError::InvalidConfiguration(format!("bad storage slot {value}: {e}")))
}

fn parse_bytecode(value: &str) -> Result<Bytes, PaymasterError> {
    let raw = hex::decode(value.trim_start_matches("0x"))
        .map_err(|e| PaymasterError::InvalidConfiguration(format!("bad bytecode hex: {e}")))?;
    if raw.is_empty() {
        return Err(PaymasterError::InvalidConfiguration(
            "proxy bytecode must not be empty".to_string(),
        ));
    }
    Ok(Bytes::from(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_sepolia_constants_are_well_formed() {
        let config = PolicyConfig::base_sepolia("0x1111111111111111111111111111111111111111")
            .expect("built-in constants must parse");
        assert_eq!(config.chain_id, 84532);
        assert_eq!(config.proxy_bytecode.len(), 61);
        // the proxy embeds the implementation slot it reads from
        let slot = config.implementation_slot.as_bytes();
        assert!(config
            .proxy_bytecode
            .windows(slot.len())
            .any(|window| window == slot));
    }

    #[test]
    fn chain_id_can_be_overridden() {
        let config = PolicyConfig::base_sepolia("0x1111111111111111111111111111111111111111")
            .unwrap()
            .with_chain_id(8453);
        assert_eq!(config.chain_id, 8453);
    }

    #[test]
    fn malformed_gateway_address_is_rejected_at_startup() {
        assert!(matches!(
            PolicyConfig::base_sepolia("0x1234"),
            Err(PaymasterError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            PolicyConfig::base_sepolia("not-an-address"),
            Err(PaymasterError::InvalidConfiguration(_))
        ));
    }
}
