// src/error.rs
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PaymasterError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Operation is not sponsorable")]
    NotSponsorable,

    #[error("Invalid UserOperation: {0}")]
    InvalidUserOperation(String),

    #[error("Insufficient funds for sponsoring transaction")]
    InsufficientFunds,

    #[error("Calldata decode failed: {0}")]
    Decode(String),

    #[error("Ethereum provider error: {0}")]
    EthereumProviderError(String),

    #[error("Ethereum provider call timed out")]
    ProviderTimeout,

    #[error("Signing failed: {0}")]
    SigningFailed(String),
}
