//! The verifying execution provider.
//!
//! Answers a closed set of JSON-RPC methods by fetching data from an
//! untrusted execution node and verifying every piece of it against the
//! block ledger: a map of block numbers to hashes rooted in consensus-
//! verified heads. Headers below the newest anchor are admitted only by
//! walking `parent_hash` links down from a verified hash, re-hashing each
//! fetched header on the way.

mod evm;
pub mod types;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use alloy_consensus::{Header, TxEnvelope};
use alloy_eips::eip2718::Decodable2718;
use alloy_primitives::{Address, Bytes, B256, U256};
use alloy_rpc_types_eth::{Block, Transaction, TransactionRequest};
use lodestone_core::verify_account_proof;
use serde_json::{json, Value};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::config::{MAX_BLOCK_FUTURE, MAX_BLOCK_HISTORY};
use crate::source::ExecutionSource;
use types::{
    validate_tx_request, BlockTag, ProofResponse, ReceiptResponse, RpcError, RpcMethod,
};

struct BlockLedger {
    /// Newest verified block number. Mirrored into the watch channel;
    /// never moves backward.
    latest: u64,
    hashes: BTreeMap<u64, B256>,
    headers: HashMap<B256, Header>,
}

pub struct VerifyingProvider<E> {
    execution: Arc<E>,
    chain_id: u64,
    head: watch::Sender<u64>,
    ledger: Mutex<BlockLedger>,
}

impl<E: ExecutionSource> VerifyingProvider<E> {
    /// Start the ledger from one consensus-verified `(number, hash)` anchor.
    pub fn new(execution: Arc<E>, block_number: u64, block_hash: B256, chain_id: u64) -> Self {
        let (head, _) = watch::channel(block_number);
        let mut hashes = BTreeMap::new();
        hashes.insert(block_number, block_hash);
        Self {
            execution,
            chain_id,
            head,
            ledger: Mutex::new(BlockLedger {
                latest: block_number,
                hashes,
                headers: HashMap::new(),
            }),
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn latest_block_number(&self) -> u64 {
        *self.head.borrow()
    }

    pub(crate) fn execution(&self) -> &E {
        &self.execution
    }

    /// Record a newly verified head. A differing hash at an already-known
    /// number is a reorg: the stale block and every cached descendant above
    /// it are evicted before the new hash is recorded. Advancing the head
    /// releases every request suspended on a block number at or below it.
    pub fn update(&self, block_hash: B256, block_number: u64) {
        let mut ledger = self.ledger.lock().unwrap();

        if let Some(existing) = ledger.hashes.get(&block_number).copied() {
            if existing != block_hash {
                warn!(
                    number = block_number,
                    old = %existing,
                    new = %block_hash,
                    "reorg detected, evicting stale descendants"
                );
                let stale: Vec<u64> = ledger.hashes.range(block_number..).map(|(n, _)| *n).collect();
                for number in stale {
                    if let Some(hash) = ledger.hashes.remove(&number) {
                        ledger.headers.remove(&hash);
                    }
                }
            }
        }

        ledger.hashes.insert(block_number, block_hash);
        if block_number > ledger.latest {
            ledger.latest = block_number;
            self.head.send_replace(block_number);
        }
    }

    /// Single JSON-RPC entry point. The method set is closed; parameters are
    /// parsed and validated here, before any network traffic.
    pub async fn rpc_method(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let Some(method) = RpcMethod::parse(method) else {
            return Err(RpcError::MethodNotFound(method.to_string()));
        };
        let params = params.as_array().cloned().unwrap_or_default();

        match method {
            RpcMethod::GetBalance => {
                let address = required_param(&params, 0, "address")?;
                let balance = self.get_balance(address, tag_param(&params, 1)?).await?;
                Ok(json!(balance))
            }
            RpcMethod::GetTransactionCount => {
                let address = required_param(&params, 0, "address")?;
                let nonce = self
                    .get_transaction_count(address, tag_param(&params, 1)?)
                    .await?;
                Ok(json!(format!("0x{nonce:x}")))
            }
            RpcMethod::GetCode => {
                let address = required_param(&params, 0, "address")?;
                let code = self.get_code(address, tag_param(&params, 1)?).await?;
                Ok(json!(code))
            }
            RpcMethod::Call => {
                let request = required_param(&params, 0, "transaction")?;
                let output = self.call(&request, tag_param(&params, 1)?).await?;
                Ok(json!(output))
            }
            RpcMethod::EstimateGas => {
                let request = required_param(&params, 0, "transaction")?;
                let gas = self.estimate_gas(&request, tag_param(&params, 1)?).await?;
                Ok(json!(format!("0x{gas:x}")))
            }
            RpcMethod::SendRawTransaction => {
                let raw = required_param(&params, 0, "raw transaction")?;
                let hash = self.send_raw_transaction(raw).await?;
                Ok(json!(hash))
            }
            RpcMethod::GetTransactionReceipt => {
                let hash = required_param(&params, 0, "transaction hash")?;
                match self.get_transaction_receipt(hash).await? {
                    Some(receipt) => Ok(receipt),
                    None => Ok(Value::Null),
                }
            }
            RpcMethod::BlockNumber => {
                Ok(json!(format!("0x{:x}", self.latest_block_number())))
            }
            RpcMethod::ChainId => Ok(json!(format!("0x{:x}", self.chain_id))),
        }
    }

    pub async fn get_balance(&self, address: Address, tag: BlockTag) -> Result<U256, RpcError> {
        let header = self.header_for_tag(&tag).await?;
        let proof = self.fetch_proof(address, &[], header.number).await?;
        verify_account_proof(
            header.state_root.0,
            address.into_array(),
            &proof.account_proof_nodes(),
            &proof.account_claim(),
        )?;
        Ok(proof.balance)
    }

    pub async fn get_transaction_count(
        &self,
        address: Address,
        tag: BlockTag,
    ) -> Result<u64, RpcError> {
        let header = self.header_for_tag(&tag).await?;
        let proof = self.fetch_proof(address, &[], header.number).await?;
        verify_account_proof(
            header.state_root.0,
            address.into_array(),
            &proof.account_proof_nodes(),
            &proof.account_claim(),
        )?;
        Ok(proof.nonce.to::<u64>())
    }

    pub async fn get_code(&self, address: Address, tag: BlockTag) -> Result<Bytes, RpcError> {
        let header = self.header_for_tag(&tag).await?;
        let block_hex = format!("0x{:x}", header.number);

        let calls = [
            ("eth_getProof", json!([address, Vec::<B256>::new(), block_hex])),
            ("eth_getCode", json!([address, block_hex])),
        ];
        let responses = self.execution.request_batch(&calls).await?;
        if responses.len() != calls.len() {
            return Err(RpcError::Internal(
                "batch response count does not match request count".to_string(),
            ));
        }
        let proof: ProofResponse = serde_json::from_value(responses[0].clone())
            .map_err(|e| RpcError::Internal(format!("malformed eth_getProof response: {e}")))?;
        let code: Bytes = serde_json::from_value(responses[1].clone())
            .map_err(|e| RpcError::Internal(format!("malformed eth_getCode response: {e}")))?;

        let claim = proof.account_claim();
        verify_account_proof(
            header.state_root.0,
            address.into_array(),
            &proof.account_proof_nodes(),
            &claim,
        )?;
        if !lodestone_core::verify_code_hash(&code, claim.code_hash.0) {
            return Err(RpcError::Internal(format!(
                "code for {address} does not match the proven code hash"
            )));
        }
        Ok(code)
    }

    pub async fn call(&self, request: &TransactionRequest, tag: BlockTag) -> Result<Bytes, RpcError> {
        validate_tx_request(request)?;
        let header = self.header_for_tag(&tag).await?;
        evm::execute_call(self, request, &header).await
    }

    pub async fn estimate_gas(
        &self,
        request: &TransactionRequest,
        tag: BlockTag,
    ) -> Result<u64, RpcError> {
        validate_tx_request(request)?;
        let header = self.header_for_tag(&tag).await?;
        evm::execute_estimate(self, request, &header).await
    }

    /// Relay a signed transaction unmodified and return its locally computed
    /// hash, so the caller never depends on the node echoing the right one.
    pub async fn send_raw_transaction(&self, raw: Bytes) -> Result<B256, RpcError> {
        TxEnvelope::decode_2718(&mut raw.as_ref())
            .map_err(|e| RpcError::InvalidParams(format!("undecodable raw transaction: {e}")))?;
        let hash = B256::from(lodestone_core::keccak256(&raw));

        self.execution
            .request("eth_sendRawTransaction", json!([raw]))
            .await?;
        Ok(hash)
    }

    /// Receipt lookup with inclusion verification only: the containing block
    /// is resolved through the verified ledger and its transaction list is
    /// re-merkleized against the header's transactions root. Gas, log, and
    /// bloom fields cannot be verified from header data alone and are
    /// returned zeroed.
    pub async fn get_transaction_receipt(&self, tx_hash: B256) -> Result<Option<Value>, RpcError> {
        let response = self
            .execution
            .request("eth_getTransactionReceipt", json!([tx_hash]))
            .await?;
        if response.is_null() {
            return Ok(None);
        }
        let receipt: ReceiptResponse = serde_json::from_value(response).map_err(|e| {
            RpcError::Internal(format!("malformed eth_getTransactionReceipt response: {e}"))
        })?;

        let header = self
            .header_for_tag(&BlockTag::Number(receipt.block_number.to::<u64>()))
            .await?;
        if receipt.block_hash != header.hash_slow() {
            return Err(RpcError::Internal(
                "receipt references a block outside the verified chain".to_string(),
            ));
        }

        let block = self
            .execution
            .request("eth_getBlockByHash", json!([receipt.block_hash, true]))
            .await?;
        let block: Block<Transaction> = serde_json::from_value(block)
            .map_err(|e| RpcError::Internal(format!("malformed eth_getBlockByHash response: {e}")))?;
        let envelopes: Vec<TxEnvelope> = block
            .transactions
            .into_transactions()
            .map(|tx| tx.inner.into_inner())
            .collect();

        let computed = alloy_consensus::proofs::calculate_transaction_root(&envelopes);
        if computed != header.transactions_root {
            return Err(RpcError::Internal(
                "block transactions do not match the verified transactions root".to_string(),
            ));
        }
        if !envelopes.iter().any(|tx| *tx.tx_hash() == tx_hash) {
            return Err(RpcError::Internal(
                "receipt transaction is not present in its block".to_string(),
            ));
        }

        Ok(Some(sanitized_receipt(&receipt)))
    }

    async fn fetch_proof(
        &self,
        address: Address,
        slots: &[B256],
        block_number: u64,
    ) -> Result<ProofResponse, RpcError> {
        let response = self
            .execution
            .request(
                "eth_getProof",
                json!([address, slots, format!("0x{block_number:x}")]),
            )
            .await?;
        serde_json::from_value(response)
            .map_err(|e| RpcError::Internal(format!("malformed eth_getProof response: {e}")))
    }

    async fn header_for_tag(&self, tag: &BlockTag) -> Result<Header, RpcError> {
        let number = self.resolve_tag(tag).await?;
        self.header_at(number).await
    }

    /// Resolve a block tag to a number within the serving window. A number
    /// ahead of the verified head (but inside the future window) suspends
    /// until `update()` reaches it.
    async fn resolve_tag(&self, tag: &BlockTag) -> Result<u64, RpcError> {
        let latest = *self.head.borrow();
        let number = match tag {
            BlockTag::Latest => return Ok(latest),
            BlockTag::Number(n) => *n,
        };

        if number > latest + MAX_BLOCK_FUTURE {
            return Err(RpcError::InvalidParams(format!(
                "block {number} is more than {MAX_BLOCK_FUTURE} blocks ahead of the verified head"
            )));
        }
        if number + MAX_BLOCK_HISTORY < latest {
            return Err(RpcError::InvalidParams(format!(
                "block {number} is older than the {MAX_BLOCK_HISTORY}-block history window"
            )));
        }
        if number > latest {
            debug!(number, latest, "suspending until the head advances");
            let mut rx = self.head.subscribe();
            rx.wait_for(|head| *head >= number)
                .await
                .map_err(|_| RpcError::Internal("provider shut down".to_string()))?;
        }
        Ok(number)
    }

    /// Header for a verified block number, backfilling the ledger by walking
    /// `parent_hash` links down from the nearest verified block above it.
    /// Every fetched header must hash to the link that referenced it.
    async fn header_at(&self, number: u64) -> Result<Header, RpcError> {
        let (mut cursor_number, mut cursor_hash) = {
            let ledger = self.ledger.lock().unwrap();
            match ledger.hashes.get(&number) {
                Some(hash) => {
                    if let Some(header) = ledger.headers.get(hash) {
                        return Ok(header.clone());
                    }
                    (number, *hash)
                }
                None => ledger
                    .hashes
                    .range(number..)
                    .next()
                    .map(|(n, h)| (*n, *h))
                    .ok_or_else(|| {
                        RpcError::Internal(format!("no verified block at or above {number}"))
                    })?,
            }
        };

        loop {
            let cached = self.ledger.lock().unwrap().headers.get(&cursor_hash).cloned();
            let header = match cached {
                Some(header) => header,
                None => {
                    let header = self.fetch_header(cursor_hash).await?;
                    if header.number != cursor_number {
                        return Err(RpcError::Internal(format!(
                            "header {cursor_hash} claims number {} instead of {cursor_number}",
                            header.number
                        )));
                    }
                    let mut ledger = self.ledger.lock().unwrap();
                    ledger.hashes.insert(cursor_number, cursor_hash);
                    ledger.headers.insert(cursor_hash, header.clone());
                    header
                }
            };

            if cursor_number == number {
                return Ok(header);
            }
            cursor_number -= 1;
            cursor_hash = header.parent_hash;
        }
    }

    /// Fetch a header by hash and verify it actually hashes to that value.
    async fn fetch_header(&self, hash: B256) -> Result<Header, RpcError> {
        let response = self
            .execution
            .request("eth_getBlockByHash", json!([hash, false]))
            .await?;
        if response.is_null() {
            return Err(RpcError::Internal(format!("block {hash} not found")));
        }
        let block: Block = serde_json::from_value(response)
            .map_err(|e| RpcError::Internal(format!("malformed eth_getBlockByHash response: {e}")))?;

        let header = block.header.inner;
        if header.hash_slow() != hash {
            return Err(RpcError::Internal(format!(
                "fetched header does not hash to {hash}"
            )));
        }
        Ok(header)
    }
}

/// Rebuild the receipt from its verified parts, zeroing everything that
/// inclusion verification cannot vouch for.
fn sanitized_receipt(receipt: &ReceiptResponse) -> Value {
    json!({
        "transactionHash": receipt.transaction_hash,
        "transactionIndex": receipt.transaction_index,
        "blockHash": receipt.block_hash,
        "blockNumber": receipt.block_number,
        "from": receipt.from,
        "to": receipt.to,
        "contractAddress": receipt.contract_address,
        "status": receipt.status,
        // unverified: recomputing these needs the receipts trie
        "cumulativeGasUsed": "0x0",
        "gasUsed": "0x0",
        "effectiveGasPrice": "0x0",
        "logs": [],
        "logsBloom": format!("0x{}", hex::encode([0u8; 256])),
    })
}

fn required_param<T: serde::de::DeserializeOwned>(
    params: &[Value],
    index: usize,
    name: &str,
) -> Result<T, RpcError> {
    let value = params
        .get(index)
        .ok_or_else(|| RpcError::InvalidParams(format!("missing {name}")))?;
    serde_json::from_value(value.clone())
        .map_err(|e| RpcError::InvalidParams(format!("invalid {name}: {e}")))
}

fn tag_param(params: &[Value], index: usize) -> Result<BlockTag, RpcError> {
    BlockTag::parse(params.get(index).unwrap_or(&Value::Null))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceError;
    use async_trait::async_trait;

    struct NullExecution;

    #[async_trait]
    impl ExecutionSource for NullExecution {
        async fn request(
            &self,
            _method: &str,
            _params: Value,
        ) -> Result<Value, SourceError> {
            Err(SourceError::Transport("unused".into()))
        }
    }

    fn provider() -> VerifyingProvider<NullExecution> {
        VerifyingProvider::new(Arc::new(NullExecution), 1000, B256::repeat_byte(0xaa), 1)
    }

    #[tokio::test]
    async fn tag_windows_are_enforced() {
        let p = provider();

        assert_eq!(p.resolve_tag(&BlockTag::Latest).await.unwrap(), 1000);
        assert_eq!(p.resolve_tag(&BlockTag::Number(900)).await.unwrap(), 900);

        let err = p.resolve_tag(&BlockTag::Number(1005)).await.unwrap_err();
        assert!(matches!(err, RpcError::InvalidParams(_)));
        let err = p.resolve_tag(&BlockTag::Number(700)).await.unwrap_err();
        assert!(matches!(err, RpcError::InvalidParams(_)));
    }

    #[tokio::test]
    async fn near_future_request_suspends_until_update() {
        let p = Arc::new(provider());

        let waiter = {
            let p = p.clone();
            tokio::spawn(async move { p.resolve_tag(&BlockTag::Number(1002)).await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        // an intermediate head does not release the waiter
        p.update(B256::repeat_byte(0x01), 1001);
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        p.update(B256::repeat_byte(0x02), 1002);
        assert_eq!(waiter.await.unwrap().unwrap(), 1002);
    }

    #[tokio::test]
    async fn reorg_evicts_descendants_above_the_fork() {
        let p = provider();
        p.update(B256::repeat_byte(0x01), 1001);
        p.update(B256::repeat_byte(0x02), 1002);
        p.update(B256::repeat_byte(0x03), 1003);

        // reorg at 1001: 1002 and 1003 are no longer trustworthy
        p.update(B256::repeat_byte(0x11), 1001);

        let ledger = p.ledger.lock().unwrap();
        assert_eq!(ledger.hashes.get(&1001), Some(&B256::repeat_byte(0x11)));
        assert_eq!(ledger.hashes.get(&1002), None);
        assert_eq!(ledger.hashes.get(&1003), None);
        // the head never moves backward
        assert_eq!(ledger.latest, 1003);
    }

    #[tokio::test]
    async fn unknown_methods_are_rejected() {
        let p = provider();
        let err = p.rpc_method("eth_getLogs", json!([])).await.unwrap_err();
        assert!(matches!(err, RpcError::MethodNotFound(_)));
    }

    /// A transport answering a batch with the wrong number of responses.
    struct ShortBatchExecution {
        block: Value,
    }

    #[async_trait]
    impl ExecutionSource for ShortBatchExecution {
        async fn request(&self, method: &str, _params: Value) -> Result<Value, SourceError> {
            match method {
                "eth_getBlockByHash" => Ok(self.block.clone()),
                other => Err(SourceError::Transport(format!("unexpected {other}"))),
            }
        }

        async fn request_batch(
            &self,
            _calls: &[(&str, Value)],
        ) -> Result<Vec<Value>, SourceError> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn short_batch_response_is_an_error_not_a_panic() {
        use alloy_primitives::Sealable;

        let header = Header {
            number: 1000,
            ..Default::default()
        };
        let sealed = header.seal_slow();
        let hash = sealed.hash();
        let block = alloy_rpc_types_eth::Block {
            header: alloy_rpc_types_eth::Header::from_consensus(sealed, None, None),
            uncles: vec![],
            transactions: alloy_rpc_types_eth::BlockTransactions::<Transaction>::Hashes(vec![]),
            withdrawals: None,
        };
        let source = ShortBatchExecution {
            block: serde_json::to_value(block).unwrap(),
        };
        let p = VerifyingProvider::new(Arc::new(source), 1000, hash, 1);

        let err = p
            .get_code(Address::repeat_byte(0x11), BlockTag::Latest)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("batch response count"));
    }
}
