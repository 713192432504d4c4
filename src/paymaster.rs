// src/paymaster.rs
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use ethers::abi::{self, Token};
use ethers::prelude::*;
use ethers::signers::{LocalWallet, Signer};
use ethers::utils::keccak256;
use tracing::info;

use crate::chain::ProviderInspector;
use crate::config::PolicyConfig;
use crate::error::PaymasterError;
use crate::policy::SponsorshipPolicy;
use crate::types::{PaymasterResponse, UserOperation};

/// Dummy ECDSA-sized signature returned in stub data so bundlers can
/// estimate gas before the real signature exists.
const STUB_SIGNATURE: [u8; 65] = [0x01; 65];

pub struct Paymaster {
    wallet: LocalWallet,
    client: Arc<Provider<Http>>,
    policy: SponsorshipPolicy,
    pub paymaster_address: Address,
    entry_point: Address,
    chain_id: u64,
    valid_duration: u64,   // validity time window in seconds
    gas_price_buffer: u64, // buffer percentage on the operation's gas price
}

impl Paymaster {
    pub fn new(private_key: &str, eth_rpc_url: &str, config: PolicyConfig) -> Result<Self> {
        let wallet = private_key
            .parse::<LocalWallet>()?
            .with_chain_id(config.chain_id);
        let client = Arc::new(Provider::<Http>::try_from(eth_rpc_url)?);

        let paymaster_address = wallet.address();
        let entry_point = config.entry_point;
        let chain_id = config.chain_id;
        let inspector = Arc::new(ProviderInspector::new(client.clone()));
        let policy = SponsorshipPolicy::new(config, inspector);

        info!("Initialized paymaster with address: {}", paymaster_address);

        Ok(Self {
            wallet,
            client,
            policy,
            paymaster_address,
            entry_point,
            chain_id,
            valid_duration: 3600,
            gas_price_buffer: 10,
        })
    }

    /// `pm_getPaymasterStubData`: run the sponsorship policy, then hand
    /// out paymasterAndData carrying a dummy signature.
    pub async fn stub_data(
        &self,
        user_op: &UserOperation,
        entrypoint: Address,
        chain_id: u64,
    ) -> Result<PaymasterResponse, PaymasterError> {
        self.gate(user_op, entrypoint, chain_id).await?;

        let (valid_until, valid_after) = self.validity_window()?;
        let paymaster_and_data = self.encode_paymaster_data(
            valid_until,
            valid_after,
            Bytes::from(STUB_SIGNATURE.to_vec()),
        );
        Ok(PaymasterResponse { paymaster_and_data })
    }

    /// `pm_getPaymasterData`: run the sponsorship policy, check we can
    /// afford the operation, then sign it.
    pub async fn sponsor_data(
        &self,
        user_op: &UserOperation,
        entrypoint: Address,
        chain_id: u64,
    ) -> Result<PaymasterResponse, PaymasterError> {
        self.gate(user_op, entrypoint, chain_id).await?;

        let max_cost = self.max_operation_cost(user_op)?;
        self.check_paymaster_balance(max_cost).await?;

        let (valid_until, valid_after) = self.validity_window()?;
        let signature = self
            .sign_paymaster_data(user_op, valid_until, valid_after)
            .await?;
        let paymaster_and_data = self.encode_paymaster_data(valid_until, valid_after, signature);
        Ok(PaymasterResponse { paymaster_and_data })
    }

    async fn gate(
        &self,
        user_op: &UserOperation,
        entrypoint: Address,
        chain_id: u64,
    ) -> Result<(), PaymasterError> {
        if self.policy.evaluate(user_op, entrypoint, chain_id).await {
            Ok(())
        } else {
            Err(PaymasterError::NotSponsorable)
        }
    }

    fn validity_window(&self) -> Result<(u64, u64), PaymasterError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| PaymasterError::SigningFailed(e.to_string()))?
            .as_secs();
        Ok((now + self.valid_duration, now))
    }

    /// callGasLimit + verificationGasLimit + preVerificationGas, priced
    /// at maxFeePerGas plus the configured buffer.
    fn max_operation_cost(&self, user_op: &UserOperation) -> Result<U256, PaymasterError> {
        let total_gas = user_op
            .call_gas_limit
            .checked_add(user_op.verification_gas_limit)
            .and_then(|sum| sum.checked_add(user_op.pre_verification_gas))
            .ok_or_else(|| {
                PaymasterError::InvalidUserOperation("Gas limit overflow".to_string())
            })?;

        let buffered_gas_price = user_op
            .max_fee_per_gas
            .checked_mul(U256::from(100 + self.gas_price_buffer))
            .and_then(|product| product.checked_div(U256::from(100)))
            .ok_or_else(|| {
                PaymasterError::InvalidUserOperation("Gas price calculation error".to_string())
            })?;

        total_gas.checked_mul(buffered_gas_price).ok_or_else(|| {
            PaymasterError::InvalidUserOperation("Max cost calculation overflow".to_string())
        })
    }

    async fn check_paymaster_balance(&self, max_cost: U256) -> Result<(), PaymasterError> {
        let balance = self
            .client
            .get_balance(self.paymaster_address, None)
            .await
            .map_err(|e| PaymasterError::EthereumProviderError(e.to_string()))?;

        if balance <= max_cost {
            return Err(PaymasterError::InsufficientFunds);
        }
        Ok(())
    }

    async fn sign_paymaster_data(
        &self,
        user_op: &UserOperation,
        valid_until: u64,
        valid_after: u64,
    ) -> Result<Bytes, PaymasterError> {
        let user_op_hash = self.user_operation_hash(user_op);

        // paymaster + validUntil + validAfter + userOpHash
        let mut message = vec![];
        message.extend_from_slice(self.paymaster_address.as_bytes());
        message.extend_from_slice(&valid_until.to_be_bytes());
        message.extend_from_slice(&valid_after.to_be_bytes());
        message.extend_from_slice(user_op_hash.as_bytes());
        let message_hash = keccak256(&message);

        let signature = self
            .wallet
            .sign_message(message_hash)
            .await
            .map_err(|e| PaymasterError::SigningFailed(e.to_string()))?;
        Ok(Bytes::from(signature.to_vec()))
    }

    /// paymaster address (20 bytes) + validUntil (32 bytes) + validAfter
    /// (32 bytes) + signature.
    fn encode_paymaster_data(&self, valid_until: u64, valid_after: u64, signature: Bytes) -> Bytes {
        let mut data = vec![];
        data.extend_from_slice(self.paymaster_address.as_bytes());

        let mut word = [0u8; 32];
        word[24..].copy_from_slice(&valid_until.to_be_bytes());
        data.extend_from_slice(&word);

        let mut word = [0u8; 32];
        word[24..].copy_from_slice(&valid_after.to_be_bytes());
        data.extend_from_slice(&word);

        data.extend_from_slice(&signature);
        Bytes::from(data)
    }

    /// ERC-4337 user operation hash over the signed fields, bound to the
    /// entry point and chain id.
    fn user_operation_hash(&self, user_op: &UserOperation) -> H256 {
        let packed = abi::encode(&[
            Token::Address(user_op.sender),
            Token::Uint(user_op.nonce),
            Token::FixedBytes(keccak256(&user_op.init_code).to_vec()),
            Token::FixedBytes(keccak256(&user_op.call_data).to_vec()),
            Token::Uint(user_op.call_gas_limit),
            Token::Uint(user_op.verification_gas_limit),
            Token::Uint(user_op.pre_verification_gas),
            Token::Uint(user_op.max_fee_per_gas),
            Token::Uint(user_op.max_priority_fee_per_gas),
        ]);
        let inner = keccak256(packed);

        let bound = abi::encode(&[
            Token::FixedBytes(inner.to_vec()),
            Token::Address(self.entry_point),
            Token::Uint(U256::from(self.chain_id)),
        ]);
        H256::from(keccak256(bound))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // well-known anvil/hardhat developer key
    const TEST_KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const GATEWAY: &str = "0x52908400098527886E0F7030069857D2E4169EE7";

    fn test_paymaster() -> Paymaster {
        let config = PolicyConfig::base_sepolia(GATEWAY).unwrap();
        Paymaster::new(TEST_KEY, "http://localhost:8545", config).unwrap()
    }

    #[test]
    fn paymaster_and_data_layout() {
        let paymaster = test_paymaster();
        let signature = Bytes::from(vec![0xaa; 65]);
        let data = paymaster.encode_paymaster_data(100, 50, signature);

        assert_eq!(data.len(), 20 + 32 + 32 + 65);
        assert_eq!(&data[..20], paymaster.paymaster_address.as_bytes());
        assert_eq!(&data[44..52], &100u64.to_be_bytes());
        assert_eq!(&data[76..84], &50u64.to_be_bytes());
        assert_eq!(&data[84..], &[0xaa; 65][..]);
    }

    #[test]
    fn max_cost_applies_gas_price_buffer() {
        let paymaster = test_paymaster();
        let user_op = UserOperation {
            call_gas_limit: U256::from(100_000),
            verification_gas_limit: U256::from(50_000),
            pre_verification_gas: U256::from(21_000),
            max_fee_per_gas: U256::from(100),
            ..Default::default()
        };
        // 171_000 gas at 100 wei + 10% buffer
        assert_eq!(
            paymaster.max_operation_cost(&user_op).unwrap(),
            U256::from(171_000u64 * 110)
        );
    }

    #[test]
    fn max_cost_rejects_gas_overflow() {
        let paymaster = test_paymaster();
        let user_op = UserOperation {
            call_gas_limit: U256::MAX,
            verification_gas_limit: U256::one(),
            ..Default::default()
        };
        assert!(matches!(
            paymaster.max_operation_cost(&user_op),
            Err(PaymasterError::InvalidUserOperation(_))
        ));
    }

    #[tokio::test]
    async fn paymaster_signature_is_ecdsa_sized() {
        let paymaster = test_paymaster();
        let user_op = UserOperation::default();
        let signature = paymaster
            .sign_paymaster_data(&user_op, 100, 50)
            .await
            .unwrap();
        assert_eq!(signature.len(), 65);
    }

    #[test]
    fn user_operation_hash_commits_to_call_data() {
        let paymaster = test_paymaster();
        let base = UserOperation::default();
        let changed = UserOperation {
            call_data: Bytes::from(vec![0x01]),
            ..base.clone()
        };
        assert_ne!(
            paymaster.user_operation_hash(&base),
            paymaster.user_operation_hash(&changed)
        );
    }
}
