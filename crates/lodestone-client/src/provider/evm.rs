//! Local EVM execution against verified state.
//!
//! `eth_call` and `eth_estimateGas` never trust the upstream node's
//! execution: the node only supplies an access list hint and the proofs for
//! the accounts it names. Every account and slot is proof-checked against
//! the resolved header's state root before it enters the in-memory database,
//! then revm runs the transaction locally.

use std::collections::{BTreeMap, BTreeSet};

use alloy_consensus::Header;
use alloy_primitives::{Address, Bytes, B256, U256};
use alloy_rpc_types_eth::TransactionRequest;
use lodestone_core::{verify_account_proof, verify_code_hash, verify_storage_proof};
use revm::context::result::{ExecutionResult, Output};
use revm::context::{BlockEnv, TxEnv};
use revm::database::CacheDB;
use revm::database_interface::EmptyDB;
use revm::primitives::TxKind;
use revm::state::{AccountInfo, Bytecode};
use revm::{Context, ExecuteEvm, MainBuilder, MainContext};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::provider::types::{ProofResponse, RpcError};
use crate::provider::VerifyingProvider;
use crate::source::ExecutionSource;

pub(crate) async fn execute_call<E: ExecutionSource>(
    provider: &VerifyingProvider<E>,
    request: &TransactionRequest,
    header: &Header,
) -> Result<Bytes, RpcError> {
    let db = load_state(provider, request, header).await?;
    let tx = build_tx_env(request, provider.chain_id(), header.gas_limit)?;

    let mut evm = Context::mainnet()
        .with_db(db)
        .modify_block_chained(|block| apply_block_env(block, header))
        .modify_cfg_chained(|cfg| {
            cfg.chain_id = provider.chain_id();
            cfg.disable_nonce_check = true;
            cfg.disable_balance_check = true;
            cfg.disable_base_fee = true;
        })
        .build_mainnet();

    let result = evm
        .transact_one(tx)
        .map_err(|e| RpcError::Internal(format!("evm execution failed: {e:?}")))?;

    match result {
        ExecutionResult::Success { output, .. } => Ok(output.into_data()),
        ExecutionResult::Revert { output, .. } => Err(RpcError::Internal(format!(
            "execution reverted: 0x{}",
            hex::encode(&output)
        ))),
        ExecutionResult::Halt { reason, .. } => {
            Err(RpcError::Internal(format!("execution halted: {reason:?}")))
        }
    }
}

/// Dry-run the transaction with balance, nonce, block-gas-limit, and base-fee
/// enforcement disabled, and report the gas it used.
pub(crate) async fn execute_estimate<E: ExecutionSource>(
    provider: &VerifyingProvider<E>,
    request: &TransactionRequest,
    header: &Header,
) -> Result<u64, RpcError> {
    let db = load_state(provider, request, header).await?;
    let tx = build_tx_env(request, provider.chain_id(), header.gas_limit)?;

    let mut evm = Context::mainnet()
        .with_db(db)
        .modify_block_chained(|block| apply_block_env(block, header))
        .modify_cfg_chained(|cfg| {
            cfg.chain_id = provider.chain_id();
            cfg.disable_nonce_check = true;
            cfg.disable_balance_check = true;
            cfg.disable_block_gas_limit = true;
            cfg.disable_base_fee = true;
        })
        .build_mainnet();

    let result = evm
        .transact_one(tx)
        .map_err(|e| RpcError::Internal(format!("evm execution failed: {e:?}")))?;

    match result {
        ExecutionResult::Success { gas_used, .. } => Ok(gas_used),
        ExecutionResult::Revert { output, .. } => Err(RpcError::Internal(format!(
            "execution reverted: 0x{}",
            hex::encode(&output)
        ))),
        ExecutionResult::Halt { reason, .. } => {
            Err(RpcError::Internal(format!("execution halted: {reason:?}")))
        }
    }
}

#[derive(Deserialize)]
struct AccessListResponse {
    #[serde(rename = "accessList")]
    access_list: alloy_rpc_types_eth::AccessList,
}

/// Build the verified EVM database for one execution.
///
/// The access list is only a hint for *which* state to fetch; the proofs
/// bind the fetched values to the verified state root, so a lying node can
/// at worst cause a failed execution, never a wrong result.
async fn load_state<E: ExecutionSource>(
    provider: &VerifyingProvider<E>,
    request: &TransactionRequest,
    header: &Header,
) -> Result<CacheDB<EmptyDB>, RpcError> {
    let block_hex = format!("0x{:x}", header.number);

    let mut list_request = request.clone();
    list_request.gas_price = Some(0);
    let response = provider
        .execution()
        .request("eth_createAccessList", json!([list_request, block_hex]))
        .await?;
    let access: AccessListResponse = serde_json::from_value(response)
        .map_err(|e| RpcError::Internal(format!("malformed eth_createAccessList response: {e}")))?;

    let mut targets: BTreeMap<Address, BTreeSet<B256>> = BTreeMap::new();
    for item in access.access_list.0 {
        targets
            .entry(item.address)
            .or_default()
            .extend(item.storage_keys);
    }
    targets.entry(request.from.unwrap_or_default()).or_default();
    if let Some(TxKind::Call(to)) = request.to {
        targets.entry(to).or_default();
    }
    debug!(accounts = targets.len(), block = header.number, "loading evm state");

    let calls: Vec<(&str, serde_json::Value)> = targets
        .iter()
        .flat_map(|(address, slots)| {
            let slots: Vec<&B256> = slots.iter().collect();
            [
                ("eth_getProof", json!([address, slots, block_hex])),
                ("eth_getCode", json!([address, block_hex])),
            ]
        })
        .collect();
    let responses = provider.execution().request_batch(&calls).await?;
    if responses.len() != calls.len() {
        return Err(RpcError::Internal(
            "batch response count does not match request count".to_string(),
        ));
    }

    let mut db = CacheDB::new(EmptyDB::default());
    for ((address, slots), pair) in targets.iter().zip(responses.chunks(2)) {
        let proof: ProofResponse = serde_json::from_value(pair[0].clone())
            .map_err(|e| RpcError::Internal(format!("malformed eth_getProof response: {e}")))?;
        let code: Bytes = serde_json::from_value(pair[1].clone())
            .map_err(|e| RpcError::Internal(format!("malformed eth_getCode response: {e}")))?;

        let claim = proof.account_claim();
        verify_account_proof(
            header.state_root.0,
            address.into_array(),
            &proof.account_proof_nodes(),
            &claim,
        )?;
        if !verify_code_hash(&code, claim.code_hash.0) {
            return Err(RpcError::Internal(format!(
                "code for {address} does not match the proven code hash"
            )));
        }
        if proof.storage_proof.len() != slots.len() {
            return Err(RpcError::Internal(format!(
                "missing storage proofs for {address}"
            )));
        }

        db.insert_account_info(
            *address,
            AccountInfo::new(claim.balance, claim.nonce, claim.code_hash, Bytecode::new_raw(code)),
        );
        for entry in &proof.storage_proof {
            let slot = B256::from(entry.key);
            verify_storage_proof(claim.storage_root.0, slot.0, &entry.proof_nodes(), entry.value)?;
            db.insert_account_storage(*address, entry.key, entry.value)
                .map_err(|e| RpcError::Internal(format!("evm database error: {e:?}")))?;
        }
    }

    Ok(db)
}

fn build_tx_env(
    request: &TransactionRequest,
    chain_id: u64,
    default_gas_limit: u64,
) -> Result<TxEnv, RpcError> {
    // gas price is forced to zero so executions never depend on the
    // caller's (possibly unfunded) balance
    TxEnv::builder()
        .caller(request.from.unwrap_or_default())
        .kind(request.to.unwrap_or(TxKind::Create))
        .data(request.input.input().cloned().unwrap_or_default())
        .value(request.value.unwrap_or(U256::ZERO))
        .gas_limit(request.gas.unwrap_or(default_gas_limit))
        .gas_price(0)
        .nonce(request.nonce.unwrap_or_default())
        .chain_id(Some(chain_id))
        .build()
        .map_err(|e| RpcError::InvalidParams(format!("unbuildable transaction: {e:?}")))
}

fn apply_block_env(block: &mut BlockEnv, header: &Header) {
    block.number = U256::from(header.number);
    block.timestamp = U256::from(header.timestamp);
    block.beneficiary = header.beneficiary;
    block.gas_limit = header.gas_limit;
    block.basefee = header.base_fee_per_gas.unwrap_or_default();
    block.difficulty = header.difficulty;
    block.prevrandao = Some(header.mix_hash);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tx_env_defaults_are_sane() {
        let request = TransactionRequest {
            from: Some(Address::repeat_byte(0x11)),
            to: Some(TxKind::Call(Address::repeat_byte(0x22))),
            value: Some(U256::from(5)),
            ..Default::default()
        };
        let tx = build_tx_env(&request, 1, 30_000_000).unwrap();
        assert_eq!(tx.gas_limit, 30_000_000);
        assert_eq!(tx.gas_price, 0);
        assert_eq!(tx.value, U256::from(5));
        assert_eq!(tx.kind, TxKind::Call(Address::repeat_byte(0x22)));
    }
}
