// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Base chain client.
//!
//! Connects over a WebSocket provider so Transfer logs arrive as a push
//! subscription rather than a poll loop. Outbound treasury transfers carry
//! a UTF-8 memo appended to the ERC-20 `transfer` calldata, the same
//! convention inbound bridge transfers are decoded with.

use std::str::FromStr;
use std::time::Duration;

use alloy::consensus::Transaction as _;
use alloy::eips::BlockNumberOrTag;
use alloy::network::EthereumWallet;
use alloy::primitives::{Address, FixedBytes, B256, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder, WsConnect};
use alloy::rpc::types::{Filter, Log, TransactionRequest};
use alloy::signers::local::PrivateKeySigner;
use alloy::sol;
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{ChainError, EvmChain, EvmPayout, PayoutReceipt, TransferEvent, TransferSubscription};
use crate::config::BaseChainSettings;

sol! {
    interface IERC20 {
        function transfer(address to, uint256 amount) external returns (bool);
    }
}

/// keccak256("Transfer(address,address,uint256)")
const TRANSFER_TOPIC: FixedBytes<32> = FixedBytes::new([
    0xdd, 0xf2, 0x52, 0xad, 0x1b, 0xe2, 0xc8, 0x9b, 0x69, 0xc2, 0xb0, 0x68, 0xfc, 0x37, 0x8d, 0xaa,
    0x95, 0x2b, 0xa7, 0xf1, 0x63, 0xc4, 0xa1, 0x16, 0x28, 0xf5, 0x5a, 0x4d, 0xf5, 0x23, 0xb3, 0xef,
]);

/// ERC-20 `transfer(address,uint256)` calldata length: selector + 2 words.
const TRANSFER_CALLDATA_LEN: usize = 4 + 32 + 32;

/// Poll cadence while waiting on the `finalized` block tag.
const FINALITY_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Buffered transfer events between the subscription task and the watcher.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Base chain client over a WebSocket provider.
pub struct BaseChain {
    provider: DynProvider,
    token_contract: Address,
    confirmations: u64,
    can_sign: bool,
}

impl BaseChain {
    /// Connect to the configured WebSocket RPC endpoint. When a treasury
    /// key is configured the provider signs outbound transactions with it.
    pub async fn connect(settings: &BaseChainSettings) -> Result<Self, ChainError> {
        let token_contract = Address::from_str(&settings.token_contract)
            .map_err(|e| ChainError::InvalidAddress(e.to_string()))?;

        let ws = WsConnect::new(settings.ws_url.clone());

        let (provider, can_sign) = match &settings.treasury_key {
            Some(key_hex) => {
                let key_bytes = alloy::hex::decode(key_hex.trim_start_matches("0x"))
                    .map_err(|e| ChainError::InvalidAddress(format!("treasury key: {e}")))?;
                let signer = PrivateKeySigner::from_slice(&key_bytes)
                    .map_err(|e| ChainError::InvalidAddress(format!("treasury key: {e}")))?;

                let provider = ProviderBuilder::new()
                    .wallet(EthereumWallet::from(signer))
                    .connect_ws(ws)
                    .await
                    .map_err(|e| ChainError::Rpc(e.to_string()))?;
                (provider.erased(), true)
            }
            None => {
                let provider = ProviderBuilder::new()
                    .connect_ws(ws)
                    .await
                    .map_err(|e| ChainError::Rpc(e.to_string()))?;
                (provider.erased(), false)
            }
        };

        Ok(Self {
            provider,
            token_contract,
            confirmations: settings.confirmations,
            can_sign,
        })
    }
}

#[async_trait]
impl EvmChain for BaseChain {
    async fn subscribe_transfers(&self) -> Result<TransferSubscription, ChainError> {
        let filter = Filter::new()
            .address(self.token_contract)
            .event_signature(TRANSFER_TOPIC);

        let subscription = self
            .provider
            .subscribe_logs(&filter)
            .await
            .map_err(|e| ChainError::Subscription(e.to_string()))?;

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();

        tokio::spawn(async move {
            let mut stream = subscription.into_stream();
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    log = stream.next() => match log {
                        Some(log) => {
                            if let Some(event) = decode_transfer_log(&log) {
                                if tx.send(event).await.is_err() {
                                    break;
                                }
                            }
                        }
                        None => {
                            tracing::warn!("Base transfer log stream ended");
                            break;
                        }
                    }
                }
            }
        });

        Ok(TransferSubscription::new(rx, cancel))
    }

    async fn transaction_memo(&self, tx_hash: &str) -> Result<Option<String>, ChainError> {
        let hash: B256 = tx_hash
            .parse()
            .map_err(|_| ChainError::InvalidAddress(format!("invalid tx hash {tx_hash}")))?;

        let transaction = self
            .provider
            .get_transaction_by_hash(hash)
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))?
            .ok_or_else(|| ChainError::Rpc(format!("transaction {tx_hash} not found")))?;

        Ok(extract_memo(transaction.input()))
    }

    async fn await_finalization(&self, tx_hash: &str) -> Result<(), ChainError> {
        let hash: B256 = tx_hash
            .parse()
            .map_err(|_| ChainError::InvalidAddress(format!("invalid tx hash {tx_hash}")))?;

        // The transaction must land in a block before it can finalize.
        let included_in = loop {
            let receipt = self
                .provider
                .get_transaction_receipt(hash)
                .await
                .map_err(|e| ChainError::Rpc(e.to_string()))?;

            if let Some(block) = receipt.and_then(|r| r.block_number) {
                break block;
            }

            tokio::time::sleep(FINALITY_POLL_INTERVAL).await;
        };

        loop {
            let finalized = self
                .provider
                .get_block_by_number(BlockNumberOrTag::Finalized)
                .await
                .map_err(|e| ChainError::Rpc(e.to_string()))?;

            if let Some(block) = finalized {
                if block.header.number >= included_in + self.confirmations {
                    return Ok(());
                }
            }

            tokio::time::sleep(FINALITY_POLL_INTERVAL).await;
        }
    }

    async fn transfer(
        &self,
        to: &str,
        amount_wei: U256,
        memo: &str,
    ) -> Result<String, ChainError> {
        if !self.can_sign {
            return Err(ChainError::NotConfigured("Base treasury signer"));
        }

        let to_addr = Address::from_str(to)
            .map_err(|e| ChainError::InvalidAddress(format!("invalid recipient: {e}")))?;

        let call = IERC20::transferCall {
            to: to_addr,
            amount: amount_wei,
        };
        let mut data = call.abi_encode();
        data.extend_from_slice(memo.as_bytes());

        let request = TransactionRequest::default()
            .to(self.token_contract)
            .input(data.into());

        let pending = self
            .provider
            .send_transaction(request)
            .await
            .map_err(|e| ChainError::Transaction(e.to_string()))?;

        Ok(format!("{:#x}", pending.tx_hash()))
    }
}

/// Decode a Transfer log into an event. Logs with missing topics or no
/// transaction hash are skipped.
fn decode_transfer_log(log: &Log) -> Option<TransferEvent> {
    // Transfer has 3 topics: [event_sig, from, to] and data = value.
    if log.topics().len() < 3 {
        return None;
    }

    let tx_hash = log.transaction_hash.map(|h| format!("{h:#x}"))?;

    // Addresses occupy the last 20 bytes of each 32-byte topic.
    let from = format!("0x{}", alloy::hex::encode(&log.topics()[1][12..]));
    let to = format!("0x{}", alloy::hex::encode(&log.topics()[2][12..]));

    let data = &log.data().data;
    let amount = if data.len() >= 32 {
        U256::from_be_slice(&data[..32])
    } else {
        U256::ZERO
    };

    Some(TransferEvent {
        tx_hash,
        from,
        to,
        amount,
    })
}

/// Memo bytes appended past the fixed-length `transfer` arguments.
fn extract_memo(input: &[u8]) -> Option<String> {
    if input.len() <= TRANSFER_CALLDATA_LEN {
        return None;
    }

    let memo = std::str::from_utf8(&input[TRANSFER_CALLDATA_LEN..])
        .ok()?
        .trim_matches(char::from(0))
        .to_string();

    (!memo.is_empty()).then_some(memo)
}

/// Direct treasury payout: submits the transfer immediately.
pub struct DirectPayout {
    chain: std::sync::Arc<dyn EvmChain>,
}

impl DirectPayout {
    pub fn new(chain: std::sync::Arc<dyn EvmChain>) -> Self {
        Self { chain }
    }
}

#[async_trait]
impl EvmPayout for DirectPayout {
    async fn pay_out(
        &self,
        to: &str,
        amount_wei: U256,
        memo: &str,
    ) -> Result<PayoutReceipt, ChainError> {
        let tx_hash = self.chain.transfer(to, amount_wei, memo).await?;
        Ok(PayoutReceipt::Submitted { tx_hash })
    }
}

/// Production payout: proposes the transfer to the multi-signature wallet
/// service and settles asynchronously once co-signed.
pub struct MultisigPayout {
    api_url: String,
    client: reqwest::Client,
}

#[derive(serde::Serialize)]
struct ProposalRequest<'a> {
    to: &'a str,
    amount_wei: String,
    memo: &'a str,
}

#[derive(serde::Deserialize)]
struct ProposalResponse {
    proposal_id: String,
}

impl MultisigPayout {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("Failed to create HTTP client"),
        }
    }
}

#[async_trait]
impl EvmPayout for MultisigPayout {
    async fn pay_out(
        &self,
        to: &str,
        amount_wei: U256,
        memo: &str,
    ) -> Result<PayoutReceipt, ChainError> {
        let url = format!("{}/v1/proposals", self.api_url);
        let response = self
            .client
            .post(&url)
            .json(&ProposalRequest {
                to,
                amount_wei: amount_wei.to_string(),
                memo,
            })
            .send()
            .await
            .map_err(|e| ChainError::Transaction(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ChainError::Transaction(format!(
                "HTTP {} from multisig service",
                response.status()
            )));
        }

        let proposal: ProposalResponse = response
            .json()
            .await
            .map_err(|e| ChainError::Transaction(e.to_string()))?;

        Ok(PayoutReceipt::Proposed {
            proposal_id: proposal.proposal_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::LogData;

    #[test]
    fn transfer_topic_is_correct() {
        let expected = "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";
        let actual = format!("0x{}", alloy::hex::encode(TRANSFER_TOPIC.as_slice()));
        assert_eq!(actual, expected);
    }

    fn transfer_log(from: Address, to: Address, amount: U256, tx_hash: B256) -> Log {
        let mut from_topic = [0u8; 32];
        from_topic[12..].copy_from_slice(from.as_slice());
        let mut to_topic = [0u8; 32];
        to_topic[12..].copy_from_slice(to.as_slice());

        Log {
            inner: alloy::primitives::Log {
                address: Address::ZERO,
                data: LogData::new_unchecked(
                    vec![TRANSFER_TOPIC, from_topic.into(), to_topic.into()],
                    amount.to_be_bytes::<32>().to_vec().into(),
                ),
            },
            transaction_hash: Some(tx_hash),
            ..Default::default()
        }
    }

    #[test]
    fn decodes_transfer_log() {
        let from = Address::from_str("0x8de48baf638e4cd8dab07ef12375369cb9b841db").unwrap();
        let to = Address::from_str("0x76c6227db16b6ee03e4f15ca64cb1fbebd530cea").unwrap();
        let hash = B256::from([0x11u8; 32]);
        let amount = U256::from(1_000_000_000_000_000_000u128);

        let event = decode_transfer_log(&transfer_log(from, to, amount, hash)).unwrap();
        assert_eq!(event.tx_hash, format!("{hash:#x}"));
        assert_eq!(event.from, "0x8de48baf638e4cd8dab07ef12375369cb9b841db");
        assert_eq!(event.to, "0x76c6227db16b6ee03e4f15ca64cb1fbebd530cea");
        assert_eq!(event.amount, amount);
    }

    #[test]
    fn skips_log_without_transaction_hash() {
        let from = Address::from([1u8; 20]);
        let to = Address::from([2u8; 20]);
        let mut log = transfer_log(from, to, U256::from(1), B256::ZERO);
        log.transaction_hash = None;
        assert!(decode_transfer_log(&log).is_none());
    }

    #[test]
    fn memo_rides_past_the_transfer_arguments() {
        let call = IERC20::transferCall {
            to: Address::from([3u8; 20]),
            amount: U256::from(42),
        };
        let mut data = call.abi_encode();
        assert_eq!(data.len(), TRANSFER_CALLDATA_LEN);
        assert_eq!(extract_memo(&data), None);

        data.extend_from_slice(b"swap:abc123:alice");
        assert_eq!(extract_memo(&data), Some("swap:abc123:alice".to_string()));
    }

    #[test]
    fn empty_or_binary_memo_is_ignored() {
        let mut data = vec![0u8; TRANSFER_CALLDATA_LEN];
        data.extend_from_slice(&[0u8; 4]);
        assert_eq!(extract_memo(&data), None);

        let mut data = vec![0u8; TRANSFER_CALLDATA_LEN];
        data.extend_from_slice(&[0xff, 0xfe]);
        assert_eq!(extract_memo(&data), None);
    }
}
