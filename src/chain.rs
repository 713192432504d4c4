// src/chain.rs
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ethers::prelude::*;
use tokio::time::timeout;

use crate::error::PaymasterError;

/// Default bound on each read-only chain call. This sits on a
/// request-serving path, so a slow node must not stall the policy.
pub const DEFAULT_INSPECTION_TIMEOUT: Duration = Duration::from_secs(5);

/// Read-only chain access the sponsorship policy depends on.
/// Injected so the policy can be driven by fakes in tests.
#[async_trait]
pub trait ChainInspector: Send + Sync {
    /// Runtime bytecode at `address`; empty means no contract is deployed there.
    async fn bytecode(&self, address: Address) -> Result<Bytes, PaymasterError>;

    /// Raw storage word of `address` at `slot`, latest block.
    async fn storage_at(&self, address: Address, slot: H256) -> Result<H256, PaymasterError>;
}

/// `ChainInspector` backed by a JSON-RPC provider, with a bounded
/// timeout on every call.
pub struct ProviderInspector {
    client: Arc<Provider<Http>>,
    timeout: Duration,
}

impl ProviderInspector {
    pub fn new(client: Arc<Provider<Http>>) -> Self {
        Self {
            client,
            timeout: DEFAULT_INSPECTION_TIMEOUT,
        }
    }
}

#[async_trait]
impl ChainInspector for ProviderInspector {
    async fn bytecode(&self, address: Address) -> Result<Bytes, PaymasterError> {
        match timeout(self.timeout, self.client.get_code(address, None)).await {
            Ok(Ok(code)) => Ok(code),
            Ok(Err(e)) => Err(PaymasterError::EthereumProviderError(e.to_string())),
            Err(_) => Err(PaymasterError::ProviderTimeout),
        }
    }

    async fn storage_at(&self, address: Address, slot: H256) -> Result<H256, PaymasterError> {
        match timeout(self.timeout, self.client.get_storage_at(address, slot, None)).await {
            Ok(Ok(word)) => Ok(word),
            Ok(Err(e)) => Err(PaymasterError::EthereumProviderError(e.to_string())),
            Err(_) => Err(PaymasterError::ProviderTimeout),
        }
    }
}
