// src/decoder.rs
use ethers::abi::{Function, Param, ParamType, StateMutability, Token};
use ethers::types::Bytes;

use crate::error::PaymasterError;
use crate::types::{Call, DecodedCall};

/// Decodes user-operation calldata against the two ABIs the policy
/// cares about: the smart wallet's execution entry points and the
/// DexaPay gateway. Built once at startup.
pub struct CallDecoder {
    wallet: Vec<Function>,
    gateway: Vec<Function>,
}

impl CallDecoder {
    pub fn new() -> Self {
        Self {
            wallet: wallet_abi(),
            gateway: gateway_abi(),
        }
    }

    /// Decode the outer `callData` of a user operation against the
    /// smart wallet ABI.
    pub fn decode_wallet_call(&self, data: &[u8]) -> Result<DecodedCall, PaymasterError> {
        decode_function_call(&self.wallet, data)
    }

    /// Decode a sub-call payload against the gateway ABI.
    pub fn decode_gateway_call(&self, data: &[u8]) -> Result<DecodedCall, PaymasterError> {
        decode_function_call(&self.gateway, data)
    }

    /// Interpret a decoded `executeBatch` call as its ordered list of
    /// `(target, value, data)` sub-calls.
    pub fn batch_calls(&self, decoded: &DecodedCall) -> Result<Vec<Call>, PaymasterError> {
        let tokens = match decoded.args.first() {
            Some(Token::Array(tokens)) => tokens,
            _ => {
                return Err(PaymasterError::Decode(
                    "executeBatch argument is not a call array".to_string(),
                ))
            }
        };
        tokens.iter().map(call_from_token).collect()
    }
}

impl Default for CallDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Selector dispatch followed by ABI decoding of the argument tail.
/// Anything that does not match one of `functions` exactly is a decode error.
fn decode_function_call(
    functions: &[Function],
    data: &[u8],
) -> Result<DecodedCall, PaymasterError> {
    if data.len() < 4 {
        return Err(PaymasterError::Decode(
            "calldata shorter than a function selector".to_string(),
        ));
    }
    for function in functions {
        if function.short_signature()[..] == data[..4] {
            let args = function
                .decode_input(&data[4..])
                .map_err(|e| PaymasterError::Decode(e.to_string()))?;
            return Ok(DecodedCall {
                name: function.name.clone(),
                args,
            });
        }
    }
    Err(PaymasterError::Decode(format!(
        "unknown function selector 0x{}",
        hex::encode(&data[..4])
    )))
}

fn call_from_token(token: &Token) -> Result<Call, PaymasterError> {
    let fields = match token {
        Token::Tuple(fields) => fields,
        _ => {
            return Err(PaymasterError::Decode(
                "batch entry is not a (target, value, data) tuple".to_string(),
            ))
        }
    };
    match fields.as_slice() {
        [Token::Address(target), Token::Uint(value), Token::Bytes(data)] => Ok(Call {
            target: *target,
            value: *value,
            data: Bytes::from(data.clone()),
        }),
        _ => Err(PaymasterError::Decode(
            "batch entry has unexpected field types".to_string(),
        )),
    }
}

fn call_tuple() -> ParamType {
    ParamType::Tuple(vec![
        ParamType::Address,
        ParamType::Uint(256),
        ParamType::Bytes,
    ])
}

pub(crate) fn wallet_abi() -> Vec<Function> {
    vec![
        function(
            "execute",
            vec![
                ("target", ParamType::Address),
                ("value", ParamType::Uint(256)),
                ("data", ParamType::Bytes),
            ],
        ),
        function(
            "executeBatch",
            vec![("calls", ParamType::Array(Box::new(call_tuple())))],
        ),
    ]
}

pub(crate) fn gateway_abi() -> Vec<Function> {
    vec![
        function(
            "payByEmail",
            vec![
                ("amount", ParamType::Uint(256)),
                ("email", ParamType::Bytes),
                ("remark", ParamType::String),
                ("token", ParamType::Address),
                ("payId", ParamType::Bytes),
            ],
        ),
        function(
            "claimEmailBalance",
            vec![
                ("emailHash", ParamType::Bytes),
                ("token", ParamType::Address),
                ("payIdHash", ParamType::Bytes),
                ("sig", ParamType::Bytes),
            ],
        ),
        function(
            "transferExternal",
            vec![
                ("token", ParamType::Address),
                ("to", ParamType::Address),
                ("amount", ParamType::Uint(256)),
            ],
        ),
    ]
}

// Function literals carry the deprecated `constant` field in ethers 2.x.
#[allow(deprecated)]
fn function(name: &str, inputs: Vec<(&str, ParamType)>) -> Function {
    Function {
        name: name.to_string(),
        inputs: inputs
            .into_iter()
            .map(|(name, kind)| Param {
                name: name.to_string(),
                kind,
                internal_type: None,
            })
            .collect(),
        outputs: vec![],
        constant: None,
        state_mutability: StateMutability::NonPayable,
    }
}

#[cfg(test)]
pub(crate) fn abi_function<'a>(functions: &'a [Function], name: &str) -> &'a Function {
    functions
        .iter()
        .find(|function| function.name == name)
        .expect("function present in test ABI")
}
