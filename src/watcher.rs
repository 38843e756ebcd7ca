// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Cross-Chain Transfer Watcher
//!
//! Background task that observes the Base token contract's Transfer events
//! and mirrors qualifying bridge deposits onto the platform ledger.
//!
//! ## Strategy
//!
//! 1. Only transfers into the configured bridge address are relevant.
//! 2. A record is claimed for the transaction hash *before* any await, so
//!    duplicate event deliveries are no-ops even while the first delivery
//!    is still waiting on finalization.
//! 3. The memo convention `swap:<swapId>:<destinationAccount>` separates
//!    bridge swaps from incidental transfers to the same address.
//! 4. After source-chain finalization, the amount is issued on the ledger
//!    exactly once and the destination session is notified, if connected.
//!
//! A per-event failure is logged with full context and never tears down
//! the subscription; the loop keeps observing subsequent events.
//!
//! ## Retention
//!
//! Records are garbage collected after 24 hours by an hourly sweep. This
//! bounds memory against an unbounded event stream; it is not a
//! correctness mechanism, since a swap that was going to execute has long
//! completed by then.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy::primitives::U256;
use chrono::{DateTime, Utc};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::chain::{Asset, ChainError, EvmChain, LedgerChain, TransferEvent};
use crate::models::EVENT_SWAP_RECEIVE;
use crate::relay::RelayCore;
use crate::resolver::did_for_account;

/// How long a transfer record is retained after first observation.
const RECORD_RETENTION_HOURS: i64 = 24;

/// Cadence of the retention sweep.
const SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

/// One observed bridge transfer, keyed by transaction hash.
#[derive(Debug, Clone)]
pub struct TransferRecord {
    pub tx_hash: String,
    pub from: String,
    pub to: String,
    pub amount: U256,
    pub swap_id: Option<String>,
    pub destination_account: Option<String>,
    pub finalized: bool,
    pub date_added: DateTime<Utc>,
    pub date_finalized: Option<DateTime<Utc>>,
}

pub struct TransferWatcher {
    chain: Arc<dyn EvmChain>,
    ledger: Arc<dyn LedgerChain>,
    relay: Arc<RelayCore>,
    /// Lowercase bridge mint/burn address; transfers into it are swap intents.
    bridge_address: String,
    ledger_chain_id: String,
    currency_symbol: String,
    records: Mutex<HashMap<String, TransferRecord>>,
}

impl TransferWatcher {
    pub fn new(
        chain: Arc<dyn EvmChain>,
        ledger: Arc<dyn LedgerChain>,
        relay: Arc<RelayCore>,
        bridge_address: &str,
        ledger_chain_id: &str,
        currency_symbol: &str,
    ) -> Self {
        Self {
            chain,
            ledger,
            relay,
            bridge_address: bridge_address.to_ascii_lowercase(),
            ledger_chain_id: ledger_chain_id.to_string(),
            currency_symbol: currency_symbol.to_string(),
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Run the watcher until the cancellation token is triggered.
    ///
    /// Should be spawned as a background task:
    /// ```rust,ignore
    /// tokio::spawn(watcher.run(shutdown.clone()));
    /// ```
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut subscription = match self.chain.subscribe_transfers().await {
            Ok(subscription) => subscription,
            Err(error) => {
                error!(%error, "Failed to subscribe to Base Transfer events");
                return;
            }
        };

        info!(bridge = %self.bridge_address, "Bridge transfer watcher starting");

        let mut sweep = tokio::time::interval(SWEEP_INTERVAL);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    subscription.unsubscribe();
                    info!("Bridge transfer watcher shutting down");
                    return;
                }
                _ = sweep.tick() => {
                    let removed = self.sweep(Utc::now());
                    if removed > 0 {
                        debug!(removed, "Swept expired transfer records");
                    }
                }
                event = subscription.next_event() => match event {
                    Some(event) => {
                        if self.claim(&event, Utc::now()) {
                            // Processing waits on finalization, so it runs
                            // detached; the claim above already guards
                            // against duplicate deliveries.
                            let watcher = Arc::clone(&self);
                            tokio::spawn(async move {
                                if let Err(error) = watcher.process(&event).await {
                                    error!(
                                        tx_hash = %event.tx_hash,
                                        from = %event.from,
                                        to = %event.to,
                                        amount = %event.amount,
                                        %error,
                                        "Bridge swap processing failed"
                                    );
                                }
                            });
                        }
                    }
                    None => {
                        warn!("Transfer event stream ended");
                        return;
                    }
                }
            }
        }
    }

    /// Claim the transaction hash before any await point.
    ///
    /// Returns `false` for transfers that are not addressed to the bridge
    /// (never recorded) and for hashes already claimed (duplicate event
    /// delivery).
    fn claim(&self, event: &TransferEvent, now: DateTime<Utc>) -> bool {
        if event.to.to_ascii_lowercase() != self.bridge_address {
            return false;
        }

        let mut records = self.records.lock().expect("record map lock poisoned");

        if records.contains_key(&event.tx_hash) {
            debug!(tx_hash = %event.tx_hash, "Duplicate transfer event discarded");
            return false;
        }

        records.insert(
            event.tx_hash.clone(),
            TransferRecord {
                tx_hash: event.tx_hash.clone(),
                from: event.from.clone(),
                to: event.to.clone(),
                amount: event.amount,
                swap_id: None,
                destination_account: None,
                finalized: false,
                date_added: now,
                date_finalized: None,
            },
        );

        true
    }

    /// Mirror a claimed bridge transfer onto the ledger.
    async fn process(&self, event: &TransferEvent) -> Result<(), ChainError> {
        let memo = self.chain.transaction_memo(&event.tx_hash).await?;

        let Some((swap_id, account)) = memo.as_deref().and_then(parse_swap_memo) else {
            debug!(
                tx_hash = %event.tx_hash,
                "Transfer to bridge address without swap memo, ignoring"
            );
            return Ok(());
        };

        {
            let mut records = self.records.lock().expect("record map lock poisoned");
            if let Some(record) = records.get_mut(&event.tx_hash) {
                record.swap_id = Some(swap_id.clone());
                record.destination_account = Some(account.clone());
            }
        }

        let did = did_for_account(&self.ledger_chain_id, &account);

        let Some(quantity) = Asset::from_wei(event.amount, &self.currency_symbol) else {
            warn!(
                tx_hash = %event.tx_hash,
                amount = %event.amount,
                "Transfer amount exceeds ledger range, ignoring"
            );
            return Ok(());
        };

        debug!(
            tx_hash = %event.tx_hash,
            from = %event.from,
            %quantity,
            "Swap transfer detected (pending), awaiting finalization"
        );

        self.chain.await_finalization(&event.tx_hash).await?;

        let memo_text = format!("{} swap to ledger {}", self.currency_symbol, swap_id);
        self.ledger
            .issue(&account, quantity.clone(), &memo_text)
            .await?;

        {
            let mut records = self.records.lock().expect("record map lock poisoned");
            if let Some(record) = records.get_mut(&event.tx_hash) {
                record.finalized = true;
                record.date_finalized = Some(Utc::now());
            }
        }

        // The issue is already irreversible; an offline recipient only
        // misses the push, not the funds.
        let delivered = self.relay.notify_by_identity(
            &did,
            EVENT_SWAP_RECEIVE,
            json!({
                "tx_hash": event.tx_hash,
                "quantity": quantity.to_string(),
                "memo": memo_text,
            }),
        );

        if !delivered {
            debug!(%did, "Swap recipient not connected, notification dropped");
        }

        info!(
            tx_hash = %event.tx_hash,
            %account,
            %quantity,
            %swap_id,
            "Bridge swap completed"
        );

        Ok(())
    }

    /// Remove records older than the retention window, regardless of
    /// their finalized state. Returns how many were removed.
    fn sweep(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - chrono::Duration::hours(RECORD_RETENTION_HOURS);
        let mut records = self.records.lock().expect("record map lock poisoned");
        let before = records.len();
        records.retain(|_, record| record.date_added > cutoff);
        before - records.len()
    }

    pub fn record(&self, tx_hash: &str) -> Option<TransferRecord> {
        let records = self.records.lock().expect("record map lock poisoned");
        records.get(tx_hash).cloned()
    }

    pub fn record_count(&self) -> usize {
        let records = self.records.lock().expect("record map lock poisoned");
        records.len()
    }
}

/// Parse the `swap:<swapId>:<destinationAccount>` memo convention.
fn parse_swap_memo(memo: &str) -> Option<(String, String)> {
    let mut parts = memo.split(':');
    let (Some("swap"), Some(swap_id), Some(account), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return None;
    };

    if swap_id.is_empty() || account.is_empty() {
        return None;
    }

    Some((swap_id.to_string(), account.to_string()))
}
