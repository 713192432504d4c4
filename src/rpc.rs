// src/rpc.rs
use std::sync::Arc;

use ethers::types::Address;
use jsonrpsee::core::{async_trait, RpcResult};
use jsonrpsee::proc_macros::rpc;
use jsonrpsee::types::error::ErrorObject;
use tracing::{debug, error, info};

use crate::error::PaymasterError;
use crate::paymaster::Paymaster;
use crate::types::{PaymasterResponse, UserOperation};

const NOT_SPONSORABLE_CODE: i32 = -32000;
const INTERNAL_ERROR_CODE: i32 = -32603;

/// ERC-7677 paymaster methods, params `[userOp, entrypoint, chainId]`.
#[rpc(server, namespace = "pm")]
pub trait PaymasterApi {
    /// Stub sponsorship data for gas estimation.
    #[method(name = "getPaymasterStubData")]
    async fn get_paymaster_stub_data(
        &self,
        user_op: UserOperation,
        entrypoint: Address,
        chain_id: u64,
    ) -> RpcResult<PaymasterResponse>;

    /// Signed sponsorship data for submission.
    #[method(name = "getPaymasterData")]
    async fn get_paymaster_data(
        &self,
        user_op: UserOperation,
        entrypoint: Address,
        chain_id: u64,
    ) -> RpcResult<PaymasterResponse>;
}

pub struct PaymasterApiServerImpl {
    paymaster: Arc<Paymaster>,
}

impl PaymasterApiServerImpl {
    pub fn new(paymaster: Arc<Paymaster>) -> Self {
        Self { paymaster }
    }
}

#[async_trait]
impl PaymasterApiServer for PaymasterApiServerImpl {
    async fn get_paymaster_stub_data(
        &self,
        user_op: UserOperation,
        entrypoint: Address,
        chain_id: u64,
    ) -> RpcResult<PaymasterResponse> {
        debug!("Stub data request for sender: {}", user_op.sender);
        let result = self.paymaster.stub_data(&user_op, entrypoint, chain_id).await;
        into_rpc_result(result, &user_op)
    }

    async fn get_paymaster_data(
        &self,
        user_op: UserOperation,
        entrypoint: Address,
        chain_id: u64,
    ) -> RpcResult<PaymasterResponse> {
        debug!("Paymaster data request for sender: {}", user_op.sender);
        let result = self
            .paymaster
            .sponsor_data(&user_op, entrypoint, chain_id)
            .await;
        into_rpc_result(result, &user_op)
    }
}

/// Rejections collapse into one generic error object; which policy
/// check failed is never revealed to the caller.
fn into_rpc_result(
    result: Result<PaymasterResponse, PaymasterError>,
    user_op: &UserOperation,
) -> RpcResult<PaymasterResponse> {
    match result {
        Ok(response) => {
            info!("Sponsoring operation for {}", user_op.sender);
            Ok(response)
        }
        Err(PaymasterError::NotSponsorable) => Err(ErrorObject::owned(
            NOT_SPONSORABLE_CODE,
            "Not a sponsorable operation",
            None::<()>,
        )),
        Err(e) => {
            error!("Failed to produce paymaster data: {}", e);
            Err(ErrorObject::owned(
                INTERNAL_ERROR_CODE,
                "Internal paymaster error",
                None::<()>,
            ))
        }
    }
}
