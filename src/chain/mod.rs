// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Chain collaborator seams.
//!
//! The relay services consume both chains through the traits below so the
//! swap executor and transfer watcher never depend on a live RPC endpoint.
//! [`evm`] implements the Base side over alloy, [`ledger`] the platform
//! ledger over its HTTP API.

pub mod evm;
pub mod ledger;

use alloy::primitives::U256;
use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Fractional digits of a ledger token amount.
pub const ASSET_DECIMALS: usize = 6;

const MICRO_PER_UNIT: u64 = 1_000_000;

/// Base tokens carry 18 decimals; ledger amounts carry 6.
const WEI_PER_MICRO: u128 = 1_000_000_000_000;

#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("transaction failed: {0}")]
    Transaction(String),

    #[error("subscription error: {0}")]
    Subscription(String),

    #[error("{0} is not configured")]
    NotConfigured(&'static str),
}

/// Fixed-point ledger token amount, rendered as `"12.345678 REL"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    micro: u64,
    symbol: String,
}

impl Asset {
    pub fn from_micro(micro: u64, symbol: impl Into<String>) -> Self {
        Self {
            micro,
            symbol: symbol.into(),
        }
    }

    /// Parse `"<amount> <symbol>"`, enforcing the expected symbol and the
    /// six-decimal precision of the ledger.
    pub fn parse(raw: &str, expected_symbol: &str) -> Result<Self, String> {
        let mut parts = raw.split_whitespace();
        let (Some(amount), Some(symbol), None) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(format!("expected '<amount> {expected_symbol}'"));
        };

        if symbol != expected_symbol {
            return Err(format!("expected symbol {expected_symbol}, got {symbol}"));
        }

        let (whole, frac) = match amount.split_once('.') {
            Some((whole, frac)) => (whole, frac),
            None => (amount, ""),
        };

        if frac.len() > ASSET_DECIMALS {
            return Err(format!("too many decimal places (max {ASSET_DECIMALS})"));
        }

        let whole: u64 = whole
            .parse()
            .map_err(|_| format!("invalid amount '{amount}'"))?;
        let frac_micro: u64 = if frac.is_empty() {
            0
        } else {
            format!("{:0<width$}", frac, width = ASSET_DECIMALS)
                .parse()
                .map_err(|_| format!("invalid amount '{amount}'"))?
        };

        let micro = whole
            .checked_mul(MICRO_PER_UNIT)
            .and_then(|w| w.checked_add(frac_micro))
            .ok_or_else(|| format!("amount '{amount}' overflows"))?;

        Ok(Self {
            micro,
            symbol: symbol.to_string(),
        })
    }

    pub fn micro(&self) -> u64 {
        self.micro
    }

    pub fn is_zero(&self) -> bool {
        self.micro == 0
    }

    /// The 18-decimal Base-side equivalent of this amount.
    pub fn to_wei(&self) -> U256 {
        U256::from(self.micro) * U256::from(WEI_PER_MICRO)
    }

    /// Convert an 18-decimal Base amount, truncating below the ledger's
    /// precision. `None` when the amount overflows the ledger range.
    pub fn from_wei(wei: U256, symbol: impl Into<String>) -> Option<Self> {
        let micro = u64::try_from(wei / U256::from(WEI_PER_MICRO)).ok()?;
        Some(Self::from_micro(micro, symbol))
    }
}

impl std::fmt::Display for Asset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}.{:06} {}",
            self.micro / MICRO_PER_UNIT,
            self.micro % MICRO_PER_UNIT,
            self.symbol
        )
    }
}

/// One ERC-20 Transfer observed on the Base token contract.
#[derive(Debug, Clone)]
pub struct TransferEvent {
    /// Lowercase `0x…` transaction hash.
    pub tx_hash: String,
    /// Lowercase `0x…` sender address.
    pub from: String,
    /// Lowercase `0x…` recipient address.
    pub to: String,
    /// Raw 18-decimal amount.
    pub amount: U256,
}

/// Live transfer-event subscription. Dropping it (or calling
/// [`unsubscribe`](Self::unsubscribe)) tears down the underlying stream.
pub struct TransferSubscription {
    events: mpsc::Receiver<TransferEvent>,
    cancel: CancellationToken,
}

impl TransferSubscription {
    pub fn new(events: mpsc::Receiver<TransferEvent>, cancel: CancellationToken) -> Self {
        Self { events, cancel }
    }

    /// Next observed transfer; `None` once the stream has ended.
    pub async fn next_event(&mut self) -> Option<TransferEvent> {
        self.events.recv().await
    }

    pub fn unsubscribe(&self) {
        self.cancel.cancel();
    }
}

impl Drop for TransferSubscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Base (EVM) chain operations the bridge needs.
#[async_trait]
pub trait EvmChain: Send + Sync {
    /// Push-based subscription to the token contract's Transfer events.
    async fn subscribe_transfers(&self) -> Result<TransferSubscription, ChainError>;

    /// The memo carried in a transfer transaction's calldata, if any.
    async fn transaction_memo(&self, tx_hash: &str) -> Result<Option<String>, ChainError>;

    /// Block until the transaction is irreversible per the chain's
    /// consensus rules. Unbounded; the caller owns any cancellation.
    async fn await_finalization(&self, tx_hash: &str) -> Result<(), ChainError>;

    /// Transfer tokens from the treasury, carrying `memo` in the calldata.
    /// Returns the transaction hash.
    async fn transfer(&self, to: &str, amount_wei: U256, memo: &str)
        -> Result<String, ChainError>;
}

/// Platform ledger operations.
#[async_trait]
pub trait LedgerChain: Send + Sync {
    async fn transfer(
        &self,
        from: &str,
        to: &str,
        amount: Asset,
        memo: &str,
    ) -> Result<String, ChainError>;

    async fn issue(&self, to: &str, amount: Asset, memo: &str) -> Result<String, ChainError>;

    async fn retire(&self, from: &str, amount: Asset, memo: &str) -> Result<String, ChainError>;

    async fn await_finalization(&self, tx_id: &str) -> Result<(), ChainError>;
}

/// Outcome of a Base-side payout. The direct path submits immediately;
/// the production path proposes to a multi-signature wallet and settles
/// asynchronously once co-signed.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PayoutReceipt {
    Submitted { tx_hash: String },
    Proposed { proposal_id: String },
}

/// Base-side payout route for ledger-to-Base swaps.
#[async_trait]
pub trait EvmPayout: Send + Sync {
    async fn pay_out(
        &self,
        to: &str,
        amount_wei: U256,
        memo: &str,
    ) -> Result<PayoutReceipt, ChainError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asset_parses_whole_and_fractional_amounts() {
        let asset = Asset::parse("1 REL", "REL").unwrap();
        assert_eq!(asset.micro(), 1_000_000);

        let asset = Asset::parse("1.5 REL", "REL").unwrap();
        assert_eq!(asset.micro(), 1_500_000);

        let asset = Asset::parse("0.000001 REL", "REL").unwrap();
        assert_eq!(asset.micro(), 1);

        let asset = Asset::parse("12.345678 REL", "REL").unwrap();
        assert_eq!(asset.to_string(), "12.345678 REL");
    }

    #[test]
    fn asset_rejects_bad_input() {
        assert!(Asset::parse("1 TONO", "REL").is_err());
        assert!(Asset::parse("1", "REL").is_err());
        assert!(Asset::parse("1.0000001 REL", "REL").is_err());
        assert!(Asset::parse("abc REL", "REL").is_err());
        assert!(Asset::parse("1 REL extra", "REL").is_err());
    }

    #[test]
    fn asset_display_pads_fraction() {
        assert_eq!(Asset::from_micro(500_000_000, "REL").to_string(), "500.000000 REL");
        assert_eq!(Asset::from_micro(1, "REL").to_string(), "0.000001 REL");
        assert_eq!(Asset::from_micro(0, "REL").to_string(), "0.000000 REL");
    }

    #[test]
    fn asset_wei_round_trip() {
        // 1 token = 1e18 wei = 1e6 micro.
        let one = Asset::parse("1 REL", "REL").unwrap();
        assert_eq!(one.to_wei(), U256::from(1_000_000_000_000_000_000u128));

        let back = Asset::from_wei(U256::from(1_500_000_000_000_000_000u128), "REL").unwrap();
        assert_eq!(back.to_string(), "1.500000 REL");

        // Sub-micro dust truncates.
        let dust = Asset::from_wei(U256::from(1_999_999_999_999u128), "REL").unwrap();
        assert_eq!(dust.micro(), 1);
    }
}
