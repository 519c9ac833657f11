//! RPC-boundary types: the closed method set, block tag parsing, wire
//! shapes for proof and receipt responses, and the provider error taxonomy.

use alloy_primitives::{Address, Bytes, B256, U256, U64};
use alloy_rpc_types_eth::TransactionRequest;
use lodestone_core::{AccountClaim, ProofError};
use serde::Deserialize;
use thiserror::Error;

use crate::source::SourceError;

/// Provider errors, mapped onto the standard JSON-RPC error codes.
#[derive(Debug, Error)]
pub enum RpcError {
    /// The request itself is unacceptable: malformed parameters, an
    /// unsupported block tag, or a block outside the serving window.
    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("method not found: {0}")]
    MethodNotFound(String),

    /// Everything that goes wrong after the request was accepted, including
    /// upstream data that fails proof verification.
    #[error("internal error: {0}")]
    Internal(String),
}

impl RpcError {
    pub fn code(&self) -> i64 {
        match self {
            RpcError::InvalidParams(_) => -32602,
            RpcError::MethodNotFound(_) => -32601,
            RpcError::Internal(_) => -32603,
        }
    }
}

impl From<SourceError> for RpcError {
    fn from(e: SourceError) -> Self {
        RpcError::Internal(e.to_string())
    }
}

impl From<ProofError> for RpcError {
    fn from(e: ProofError) -> Self {
        RpcError::Internal(format!("proof verification failed: {e}"))
    }
}

/// The closed set of methods the provider answers. Parsed once at the
/// boundary; anything else is a `MethodNotFound`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RpcMethod {
    GetBalance,
    GetCode,
    GetTransactionCount,
    Call,
    EstimateGas,
    SendRawTransaction,
    GetTransactionReceipt,
    BlockNumber,
    ChainId,
}

impl RpcMethod {
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "eth_getBalance" => Self::GetBalance,
            "eth_getCode" => Self::GetCode,
            "eth_getTransactionCount" => Self::GetTransactionCount,
            "eth_call" => Self::Call,
            "eth_estimateGas" => Self::EstimateGas,
            "eth_sendRawTransaction" => Self::SendRawTransaction,
            "eth_getTransactionReceipt" => Self::GetTransactionReceipt,
            "eth_blockNumber" => Self::BlockNumber,
            "eth_chainId" => Self::ChainId,
            _ => return None,
        })
    }
}

/// A resolved block reference: the verified head, or a literal number.
/// The speculative tags (`pending`) and the checkpoint tags the client has no
/// consensus data for (`earliest`, `finalized`, `safe`) are rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockTag {
    Latest,
    Number(u64),
}

impl BlockTag {
    pub fn parse(value: &serde_json::Value) -> Result<Self, RpcError> {
        match value {
            serde_json::Value::Null => Ok(Self::Latest),
            serde_json::Value::Number(n) => n
                .as_u64()
                .map(Self::Number)
                .ok_or_else(|| RpcError::InvalidParams(format!("invalid block number {n}"))),
            serde_json::Value::String(s) => match s.as_str() {
                "latest" => Ok(Self::Latest),
                "pending" | "earliest" | "finalized" | "safe" => Err(RpcError::InvalidParams(
                    format!("block tag \"{s}\" is not supported"),
                )),
                hex => {
                    let digits = hex.strip_prefix("0x").ok_or_else(|| {
                        RpcError::InvalidParams(format!("invalid block tag \"{hex}\""))
                    })?;
                    u64::from_str_radix(digits, 16).map(Self::Number).map_err(|_| {
                        RpcError::InvalidParams(format!("invalid block number \"{hex}\""))
                    })
                }
            },
            other => Err(RpcError::InvalidParams(format!(
                "invalid block tag {other}"
            ))),
        }
    }
}

/// `eth_getProof` response.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofResponse {
    pub address: Address,
    pub balance: U256,
    pub code_hash: B256,
    pub nonce: U64,
    pub storage_hash: B256,
    pub account_proof: Vec<Bytes>,
    pub storage_proof: Vec<StorageProofEntry>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageProofEntry {
    pub key: U256,
    pub value: U256,
    pub proof: Vec<Bytes>,
}

impl ProofResponse {
    pub fn account_claim(&self) -> AccountClaim {
        AccountClaim {
            nonce: self.nonce.to::<u64>(),
            balance: self.balance,
            storage_root: self.storage_hash,
            code_hash: self.code_hash,
        }
    }

    pub fn account_proof_nodes(&self) -> Vec<Vec<u8>> {
        self.account_proof.iter().map(|b| b.to_vec()).collect()
    }
}

impl StorageProofEntry {
    pub fn proof_nodes(&self) -> Vec<Vec<u8>> {
        self.proof.iter().map(|b| b.to_vec()).collect()
    }
}

/// The subset of an `eth_getTransactionReceipt` response the provider can
/// anchor to verified data.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptResponse {
    pub transaction_hash: B256,
    pub transaction_index: U64,
    pub block_hash: B256,
    pub block_number: U64,
    pub from: Address,
    pub to: Option<Address>,
    pub contract_address: Option<Address>,
    pub status: Option<U64>,
}

/// Reject parameter combinations before any network traffic happens.
pub fn validate_tx_request(tx: &TransactionRequest) -> Result<(), RpcError> {
    if tx.gas_price.is_some()
        && (tx.max_fee_per_gas.is_some() || tx.max_priority_fee_per_gas.is_some())
    {
        return Err(RpcError::InvalidParams(
            "cannot specify both gasPrice and EIP-1559 fee fields".to_string(),
        ));
    }
    if let (Some(input), Some(data)) = (&tx.input.input, &tx.input.data) {
        if input != data {
            return Err(RpcError::InvalidParams(
                "both \"input\" and \"data\" are set and differ".to_string(),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn block_tag_parsing() {
        assert_eq!(BlockTag::parse(&json!("latest")).unwrap(), BlockTag::Latest);
        assert_eq!(BlockTag::parse(&json!(null)).unwrap(), BlockTag::Latest);
        assert_eq!(
            BlockTag::parse(&json!("0x10")).unwrap(),
            BlockTag::Number(16)
        );

        for rejected in ["pending", "earliest", "finalized", "safe", "16", "0xzz"] {
            assert!(matches!(
                BlockTag::parse(&json!(rejected)),
                Err(RpcError::InvalidParams(_))
            ));
        }
    }

    #[test]
    fn method_parsing_is_closed() {
        assert_eq!(RpcMethod::parse("eth_call"), Some(RpcMethod::Call));
        assert_eq!(RpcMethod::parse("eth_getLogs"), None);
        assert_eq!(RpcMethod::parse("eth_getBlockByNumber"), None);
    }

    #[test]
    fn conflicting_fee_fields_are_rejected() {
        let tx = TransactionRequest {
            gas_price: Some(1),
            max_fee_per_gas: Some(1),
            ..Default::default()
        };
        assert!(matches!(
            validate_tx_request(&tx),
            Err(RpcError::InvalidParams(_))
        ));
        assert!(validate_tx_request(&TransactionRequest::default()).is_ok());
    }
}
