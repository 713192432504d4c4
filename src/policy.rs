// src/policy.rs
use std::sync::Arc;

use ethers::types::{Address, H256};
use thiserror::Error;
use tracing::debug;

use crate::chain::ChainInspector;
use crate::config::PolicyConfig;
use crate::decoder::CallDecoder;
use crate::error::PaymasterError;
use crate::types::{Call, UserOperation};

/// The factory address occupies the first 20 bytes of a v0.6 initCode.
const FACTORY_PREFIX_LEN: usize = 20;

/// Wallet-side batch entry point; the only outer call shape we sponsor.
const EXECUTE_BATCH: &str = "executeBatch";

/// Gateway entry point whose gas we agree to pay.
const SPONSORED_FUNCTION: &str = "payByEmail";

/// Why a user operation was not sponsored. Logged at debug level only;
/// the RPC boundary collapses every variant into one generic rejection
/// so callers cannot probe the allow-list check by check.
#[derive(Debug, Error)]
pub(crate) enum Reject {
    #[error("unsupported chain id {0}")]
    Chain(u64),
    #[error("unsupported entry point {0:?}")]
    EntryPoint(Address),
    #[error("initCode too short to name a factory")]
    InitCodeTooShort,
    #[error("initCode does not deploy through the known wallet factory")]
    UnknownFactory,
    #[error("sender bytecode is not the expected wallet proxy")]
    UnknownProxyBytecode,
    #[error("proxy does not point at the expected wallet implementation")]
    UnknownImplementation,
    #[error("callData is not an {EXECUTE_BATCH} call")]
    NotExecuteBatch,
    #[error("empty call batch")]
    EmptyBatch,
    #[error("batch of {0} calls is too large")]
    BatchTooLarge(usize),
    #[error("first call of a pair is not MagicSpend")]
    NotMagicSpend,
    #[error("call does not target the payment gateway")]
    WrongTarget,
    #[error("inner call is not {SPONSORED_FUNCTION}")]
    WrongInnerFunction,
    #[error(transparent)]
    Internal(#[from] PaymasterError),
}

/// Decides whether the paymaster will pay gas for a submitted user
/// operation. Pure allow-list over the operation's shape: one chain,
/// one entry point, one factory, one proxy fingerprint, one batch
/// convention, one sponsored target and function. Everything else,
/// including any internal fault, is a rejection.
pub struct SponsorshipPolicy {
    config: PolicyConfig,
    inspector: Arc<dyn ChainInspector>,
    decoder: CallDecoder,
}

impl SponsorshipPolicy {
    pub fn new(config: PolicyConfig, inspector: Arc<dyn ChainInspector>) -> Self {
        Self {
            config,
            inspector,
            decoder: CallDecoder::new(),
        }
    }

    /// Total over its inputs: never panics, never errors. Fail closed.
    pub async fn evaluate(
        &self,
        user_op: &UserOperation,
        entrypoint: Address,
        chain_id: u64,
    ) -> bool {
        match self.check(user_op, entrypoint, chain_id).await {
            Ok(()) => true,
            Err(reason) => {
                debug!(sender = %user_op.sender, %reason, "user operation rejected");
                false
            }
        }
    }

    async fn check(
        &self,
        user_op: &UserOperation,
        entrypoint: Address,
        chain_id: u64,
    ) -> Result<(), Reject> {
        if chain_id != self.config.chain_id {
            return Err(Reject::Chain(chain_id));
        }
        if entrypoint != self.config.entry_point {
            return Err(Reject::EntryPoint(entrypoint));
        }

        self.check_sender_provenance(user_op).await?;

        let decoded = self.decoder.decode_wallet_call(&user_op.call_data)?;
        if decoded.name != EXECUTE_BATCH {
            return Err(Reject::NotExecuteBatch);
        }
        let calls = self.decoder.batch_calls(&decoded)?;
        if calls.is_empty() {
            return Err(Reject::EmptyBatch);
        }
        if calls.len() > 2 {
            return Err(Reject::BatchTooLarge(calls.len()));
        }

        let inspected = if calls.len() == 2 {
            // a MagicSpend withdrawal is the one auxiliary call we allow
            if calls[0].target != self.config.magic_spend {
                return Err(Reject::NotMagicSpend);
            }
            &calls[1]
        } else {
            &calls[0]
        };

        self.check_sponsored_call(inspected)
    }

    /// The sender must either be deployed by the known factory (about to
    /// be, via initCode) or already be the known proxy pointing at the
    /// known implementation. Anything else could route sponsored gas
    /// into attacker-controlled wallet code.
    async fn check_sender_provenance(&self, user_op: &UserOperation) -> Result<(), Reject> {
        let code = self.inspector.bytecode(user_op.sender).await?;

        if code.is_empty() {
            if user_op.init_code.len() < FACTORY_PREFIX_LEN {
                return Err(Reject::InitCodeTooShort);
            }
            let factory = Address::from_slice(&user_op.init_code[..FACTORY_PREFIX_LEN]);
            if factory != self.config.wallet_factory {
                return Err(Reject::UnknownFactory);
            }
            return Ok(());
        }

        // byte-exact on raw bytecode, not a hex-string compare
        if code != self.config.proxy_bytecode {
            return Err(Reject::UnknownProxyBytecode);
        }
        let word = self
            .inspector
            .storage_at(user_op.sender, self.config.implementation_slot)
            .await?;
        if address_from_word(word) != self.config.wallet_implementation {
            return Err(Reject::UnknownImplementation);
        }
        Ok(())
    }

    fn check_sponsored_call(&self, call: &Call) -> Result<(), Reject> {
        if call.target != self.config.gateway {
            return Err(Reject::WrongTarget);
        }
        let inner = self.decoder.decode_gateway_call(&call.data)?;
        if inner.name != SPONSORED_FUNCTION {
            return Err(Reject::WrongInnerFunction);
        }
        Ok(())
    }
}

/// ABI-decode an address out of a storage word: the low-order 20 bytes.
fn address_from_word(word: H256) -> Address {
    Address::from_slice(&word.as_bytes()[12..])
}
