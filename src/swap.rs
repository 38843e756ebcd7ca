// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Throttled Swap/Faucet Executor
//!
//! Executes the two chain-touching request channels: testnet faucet
//! grants, throttled per identity over a rolling 24-hour window, and
//! ledger-to-Base swaps, restricted to envelopes issued through the
//! platform wallet application.
//!
//! The faucet ledger is owned exclusively by this service; entries are
//! appended only after the chain transfer succeeds, so a failed transfer
//! never consumes quota.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use alloy::primitives::{Address, Signature};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::chain::{Asset, EvmPayout, LedgerChain};
use crate::config::{Environment, Settings};
use crate::envelope;
use crate::error::RelayError;
use crate::registry::{SessionId, SessionRegistry};
use crate::resolver::{account_from_did, fragment_of, without_fragment, DidResolver};

/// Largest single faucet grant, in micro units (1 000 tokens).
pub const MAX_FAUCET_GRANT_MICRO: u64 = 1_000 * 1_000_000;

/// Rolling 24-hour cumulative faucet cap per identity (20 000 tokens).
pub const DAILY_FAUCET_CAP_MICRO: u64 = 20_000 * 1_000_000;

const THROTTLE_WINDOW_HOURS: i64 = 24;

struct GrantEntry {
    amount_micro: u64,
    granted_at: DateTime<Utc>,
}

pub struct SwapService {
    registry: Arc<SessionRegistry>,
    resolver: Arc<dyn DidResolver>,
    ledger: Arc<dyn LedgerChain>,
    payout: Option<Arc<dyn EvmPayout>>,
    environment: Environment,
    treasury_account: String,
    wallet_app_account: String,
    currency_symbol: String,
    /// Per-DID grant history inside the throttle window, lazily pruned.
    grants: Mutex<HashMap<String, Vec<GrantEntry>>>,
}

impl SwapService {
    pub fn new(
        registry: Arc<SessionRegistry>,
        resolver: Arc<dyn DidResolver>,
        ledger: Arc<dyn LedgerChain>,
        payout: Option<Arc<dyn EvmPayout>>,
        settings: &Settings,
    ) -> Self {
        Self {
            registry,
            resolver,
            ledger,
            payout,
            environment: settings.environment,
            treasury_account: settings.treasury_account.clone(),
            wallet_app_account: settings.wallet_app_account.clone(),
            currency_symbol: settings.currency_symbol.clone(),
            grants: Mutex::new(HashMap::new()),
        }
    }

    /// Grant test tokens from the treasury to the requesting identity.
    ///
    /// `now` is passed explicitly so the throttle window is testable.
    pub async fn faucet(
        &self,
        raw: &str,
        session: SessionId,
        now: DateTime<Utc>,
    ) -> Result<Value, RelayError> {
        if !self.registry.is_authorized(session) {
            return Err(RelayError::Unauthenticated);
        }

        let message = envelope::verify(
            raw,
            Some(envelope::FAUCET_MESSAGE),
            self.resolver.as_ref(),
        )
        .await?;

        if self.environment.is_production() {
            return Err(RelayError::FaucetUnavailable);
        }

        let quantity = message
            .payload()
            .get("quantity")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                RelayError::InvalidAmount("faucet request has no quantity".to_string())
            })?;

        let amount =
            Asset::parse(quantity, &self.currency_symbol).map_err(RelayError::InvalidAmount)?;

        if amount.is_zero() {
            return Err(RelayError::InvalidAmount(
                "amount must be greater than zero".to_string(),
            ));
        }

        if amount.micro() > MAX_FAUCET_GRANT_MICRO {
            return Err(RelayError::InvalidAmount(format!(
                "amount exceeds the {} per-request limit",
                Asset::from_micro(MAX_FAUCET_GRANT_MICRO, &self.currency_symbol)
            )));
        }

        let sender = message.sender().to_string();
        let granted = self.granted_in_window(&sender, now);

        if granted + amount.micro() > DAILY_FAUCET_CAP_MICRO {
            let remaining = Asset::from_micro(
                DAILY_FAUCET_CAP_MICRO.saturating_sub(granted),
                &self.currency_symbol,
            );
            return Err(RelayError::ThrottleLimitExceeded {
                remaining: remaining.to_string(),
            });
        }

        let account = account_from_did(&sender).ok_or_else(|| {
            RelayError::MalformedEnvelope("sender DID has no ledger account".to_string())
        })?;

        let transaction_id = self
            .ledger
            .transfer(
                &self.treasury_account,
                account,
                amount.clone(),
                "faucet grant",
            )
            .await?;

        // Quota is consumed only once the transfer went through.
        self.record_grant(&sender, amount.micro(), now);

        tracing::info!(
            did = %sender,
            quantity = %amount,
            %transaction_id,
            "Faucet grant executed"
        );

        Ok(json!({
            "transaction_id": transaction_id,
            "quantity": amount.to_string(),
        }))
    }

    /// Retire tokens on the ledger and pay out the mirrored amount on
    /// Base, to an address the requester has proven control of.
    pub async fn swap_to_evm(&self, raw: &str, session: SessionId) -> Result<Value, RelayError> {
        if !self.registry.is_authorized(session) {
            return Err(RelayError::Unauthenticated);
        }

        let message = envelope::verify(
            raw,
            Some(envelope::SWAP_MESSAGE),
            self.resolver.as_ref(),
        )
        .await?;

        let sender = message.sender().to_string();

        // Only envelopes issued through the platform wallet application
        // may move ledger funds onto Base.
        if fragment_of(&sender) != Some(self.wallet_app_account.as_str()) {
            return Err(RelayError::UntrustedIssuer { did: sender });
        }

        let payload = message.payload();

        let address_raw = payload
            .get("address")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                RelayError::MalformedEnvelope("swap request has no address".to_string())
            })?;
        let address = Address::from_str(address_raw).map_err(|_| {
            RelayError::MalformedEnvelope(format!("invalid destination address {address_raw}"))
        })?;

        // The proof is an EIP-191 signature over the sender DID, made
        // with the destination address's key.
        let proof_raw = payload
            .get("address_proof")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                RelayError::MalformedEnvelope("swap request has no address proof".to_string())
            })?;
        let proof = Signature::from_str(proof_raw).map_err(|_| RelayError::SignatureInvalid {
            did: sender.clone(),
        })?;

        let recovered = proof
            .recover_address_from_msg(without_fragment(&sender).as_bytes())
            .map_err(|_| RelayError::SignatureInvalid { did: sender.clone() })?;

        if recovered != address {
            return Err(RelayError::SignatureInvalid { did: sender });
        }

        let quantity = payload
            .get("quantity")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                RelayError::InvalidAmount("swap request has no quantity".to_string())
            })?;
        let amount =
            Asset::parse(quantity, &self.currency_symbol).map_err(RelayError::InvalidAmount)?;

        if amount.is_zero() {
            return Err(RelayError::InvalidAmount(
                "amount must be greater than zero".to_string(),
            ));
        }

        let account = account_from_did(&sender)
            .ok_or_else(|| {
                RelayError::MalformedEnvelope("sender DID has no ledger account".to_string())
            })?
            .to_string();

        let payout = self
            .payout
            .as_ref()
            .ok_or_else(|| RelayError::ChainOperationFailed("no payout route configured".into()))?;

        let swap_id = Uuid::new_v4().to_string();

        let retire_tx = self
            .ledger
            .retire(
                &account,
                amount.clone(),
                &format!("swap:{swap_id}:{address}"),
            )
            .await?;

        self.ledger.await_finalization(&retire_tx).await?;

        let memo = format!("{} swap to base {}", self.currency_symbol, swap_id);

        match payout.pay_out(&address.to_string(), amount.to_wei(), &memo).await {
            Ok(receipt) => {
                tracing::info!(
                    %swap_id,
                    %account,
                    %address,
                    quantity = %amount,
                    "Ledger-to-Base swap executed"
                );
                Ok(json!({
                    "swap_id": swap_id,
                    "retire_transaction_id": retire_tx,
                    "payout": receipt,
                }))
            }
            Err(error) => {
                // The retire already finalized and is not reversible by
                // this service. Surfaced to operators, not compensated.
                tracing::error!(
                    %swap_id,
                    %account,
                    %address,
                    quantity = %amount,
                    %retire_tx,
                    %error,
                    "Base payout failed after ledger retire; manual intervention required"
                );
                Err(RelayError::ChainOperationFailed(error.to_string()))
            }
        }
    }

    /// Total granted to `did` inside the window, pruning stale entries.
    fn granted_in_window(&self, did: &str, now: DateTime<Utc>) -> u64 {
        let cutoff = now - chrono::Duration::hours(THROTTLE_WINDOW_HOURS);
        let mut grants = self.grants.lock().expect("faucet ledger lock poisoned");

        let Some(entries) = grants.get_mut(did) else {
            return 0;
        };

        entries.retain(|entry| entry.granted_at > cutoff);
        entries.iter().map(|entry| entry.amount_micro).sum()
    }

    fn record_grant(&self, did: &str, amount_micro: u64, now: DateTime<Utc>) {
        let mut grants = self.grants.lock().expect("faucet ledger lock poisoned");
        grants.entry(did.to_string()).or_default().push(GrantEntry {
            amount_micro,
            granted_at: now,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use alloy::primitives::U256;
    use alloy::signers::local::PrivateKeySigner;
    use alloy::signers::SignerSync;
    use async_trait::async_trait;
    use ed25519_dalek::SigningKey;
    use tokio::sync::mpsc;

    use crate::chain::{ChainError, PayoutReceipt};
    use crate::resolver::StaticResolver;

    #[derive(Default)]
    struct MockLedger {
        transfers: AtomicUsize,
        retires: AtomicUsize,
        fail_transfers: AtomicBool,
    }

    #[async_trait]
    impl LedgerChain for MockLedger {
        async fn transfer(
            &self,
            _from: &str,
            _to: &str,
            _amount: Asset,
            _memo: &str,
        ) -> Result<String, ChainError> {
            if self.fail_transfers.load(Ordering::SeqCst) {
                return Err(ChainError::Transaction("ledger unavailable".to_string()));
            }
            let n = self.transfers.fetch_add(1, Ordering::SeqCst);
            Ok(format!("tx-{n}"))
        }

        async fn issue(&self, _to: &str, _amount: Asset, _memo: &str) -> Result<String, ChainError> {
            Ok("tx-issue".to_string())
        }

        async fn retire(
            &self,
            _from: &str,
            _amount: Asset,
            _memo: &str,
        ) -> Result<String, ChainError> {
            self.retires.fetch_add(1, Ordering::SeqCst);
            Ok("tx-retire".to_string())
        }

        async fn await_finalization(&self, _tx_id: &str) -> Result<(), ChainError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockPayout {
        payouts: AtomicUsize,
        fail: AtomicBool,
    }

    #[async_trait]
    impl EvmPayout for MockPayout {
        async fn pay_out(
            &self,
            _to: &str,
            _amount_wei: U256,
            _memo: &str,
        ) -> Result<PayoutReceipt, ChainError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(ChainError::Transaction("rpc down".to_string()));
            }
            self.payouts.fetch_add(1, Ordering::SeqCst);
            Ok(PayoutReceipt::Submitted {
                tx_hash: "0xabc".to_string(),
            })
        }
    }

    struct Harness {
        service: SwapService,
        ledger: Arc<MockLedger>,
        payout: Arc<MockPayout>,
        session: SessionId,
        key: SigningKey,
        did: String,
    }

    fn settings(environment: Environment) -> Settings {
        Settings {
            host: "127.0.0.1".to_string(),
            port: 0,
            environment,
            ledger_api_url: "http://localhost:9".to_string(),
            ledger_chain_id: "rel-testnet".to_string(),
            currency_symbol: "REL".to_string(),
            treasury_account: "relay.treasury".to_string(),
            wallet_app_account: "relational.id".to_string(),
            base: None,
            multisig_api_url: None,
            verification_webhook_secret: "secret".to_string(),
        }
    }

    fn harness(environment: Environment, did: &str, logged_in: bool) -> Harness {
        let key = SigningKey::generate(&mut rand::rngs::OsRng);
        let registry = Arc::new(SessionRegistry::new());
        let resolver = StaticResolver::new().with_key(did, key.verifying_key());
        let ledger = Arc::new(MockLedger::default());
        let payout = Arc::new(MockPayout::default());

        let (tx, _rx) = mpsc::unbounded_channel();
        let session = registry.connect(tx);
        if logged_in {
            registry.bind(did, session);
        }

        let service = SwapService::new(
            Arc::clone(&registry),
            Arc::new(resolver),
            Arc::clone(&ledger) as Arc<dyn LedgerChain>,
            Some(Arc::clone(&payout) as Arc<dyn EvmPayout>),
            &settings(environment),
        );

        Harness {
            service,
            ledger,
            payout,
            session,
            key,
            did: did.to_string(),
        }
    }

    fn faucet_envelope(h: &Harness, quantity: &str) -> String {
        envelope::seal(
            &h.key,
            &h.did,
            None,
            envelope::FAUCET_MESSAGE,
            json!({"quantity": quantity}),
        )
    }

    const ALICE: &str = "did:rel:rel-testnet:alice";
    const ALICE_APP: &str = "did:rel:rel-testnet:alice#relational.id";

    #[tokio::test]
    async fn faucet_requires_login() {
        let h = harness(Environment::Testnet, ALICE, false);
        let raw = faucet_envelope(&h, "100.000000 REL");

        let err = h.service.faucet(&raw, h.session, Utc::now()).await.unwrap_err();
        assert!(matches!(err, RelayError::Unauthenticated));
    }

    #[tokio::test]
    async fn faucet_is_unavailable_in_production() {
        let h = harness(Environment::Production, ALICE, true);
        let raw = faucet_envelope(&h, "100.000000 REL");

        let err = h.service.faucet(&raw, h.session, Utc::now()).await.unwrap_err();
        assert!(matches!(err, RelayError::FaucetUnavailable));
        assert_eq!(h.ledger.transfers.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn faucet_rejects_oversized_request_regardless_of_allowance() {
        let h = harness(Environment::Testnet, ALICE, true);
        let raw = faucet_envelope(&h, "1500.000000 REL");

        let err = h.service.faucet(&raw, h.session, Utc::now()).await.unwrap_err();
        assert!(matches!(err, RelayError::InvalidAmount(_)));
        assert_eq!(h.ledger.transfers.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn faucet_rejects_zero_and_malformed_amounts() {
        let h = harness(Environment::Testnet, ALICE, true);

        for quantity in ["0.000000 REL", "100 TONO", "abc REL"] {
            let raw = faucet_envelope(&h, quantity);
            let err = h.service.faucet(&raw, h.session, Utc::now()).await.unwrap_err();
            assert!(matches!(err, RelayError::InvalidAmount(_)), "quantity: {quantity}");
        }
    }

    #[tokio::test]
    async fn faucet_allows_reaching_the_cap_exactly_then_throttles() {
        let h = harness(Environment::Testnet, ALICE, true);
        let now = Utc::now();

        // Twenty max-sized grants land exactly on the 20 000 cap.
        for _ in 0..20 {
            let raw = faucet_envelope(&h, "1000.000000 REL");
            h.service.faucet(&raw, h.session, now).await.unwrap();
        }
        assert_eq!(h.ledger.transfers.load(Ordering::SeqCst), 20);

        let raw = faucet_envelope(&h, "0.000001 REL");
        let err = h.service.faucet(&raw, h.session, now).await.unwrap_err();
        match err {
            RelayError::ThrottleLimitExceeded { remaining } => {
                assert_eq!(remaining, "0.000000 REL");
            }
            other => panic!("expected throttle error, got {other:?}"),
        }
        assert_eq!(h.ledger.transfers.load(Ordering::SeqCst), 20);
    }

    #[tokio::test]
    async fn faucet_window_slides() {
        let h = harness(Environment::Testnet, ALICE, true);
        let yesterday = Utc::now() - chrono::Duration::hours(25);

        for _ in 0..20 {
            let raw = faucet_envelope(&h, "1000.000000 REL");
            h.service.faucet(&raw, h.session, yesterday).await.unwrap();
        }

        // The exhausted window has rolled past; fresh quota is available.
        let raw = faucet_envelope(&h, "1000.000000 REL");
        h.service.faucet(&raw, h.session, Utc::now()).await.unwrap();
        assert_eq!(h.ledger.transfers.load(Ordering::SeqCst), 21);
    }

    #[tokio::test]
    async fn failed_transfer_does_not_consume_quota() {
        let h = harness(Environment::Testnet, ALICE, true);
        let now = Utc::now();

        h.ledger.fail_transfers.store(true, Ordering::SeqCst);
        let raw = faucet_envelope(&h, "1000.000000 REL");
        let err = h.service.faucet(&raw, h.session, now).await.unwrap_err();
        assert!(matches!(err, RelayError::ChainOperationFailed(_)));

        h.ledger.fail_transfers.store(false, Ordering::SeqCst);
        for _ in 0..20 {
            let raw = faucet_envelope(&h, "1000.000000 REL");
            h.service.faucet(&raw, h.session, now).await.unwrap();
        }
    }

    fn swap_envelope(h: &Harness, signer: &PrivateKeySigner, quantity: &str) -> String {
        let proof = signer
            .sign_message_sync(without_fragment(&h.did).as_bytes())
            .unwrap();
        envelope::seal(
            &h.key,
            &h.did,
            None,
            envelope::SWAP_MESSAGE,
            json!({
                "address": signer.address().to_string(),
                "address_proof": format!("0x{}", alloy::hex::encode(proof.as_bytes())),
                "quantity": quantity,
            }),
        )
    }

    #[tokio::test]
    async fn swap_requires_wallet_app_issuer() {
        // No application fragment on the DID.
        let h = harness(Environment::Testnet, ALICE, true);
        let signer = PrivateKeySigner::random();
        let raw = swap_envelope(&h, &signer, "1.000000 REL");

        let err = h.service.swap_to_evm(&raw, h.session).await.unwrap_err();
        assert!(matches!(err, RelayError::UntrustedIssuer { .. }));
        assert_eq!(h.ledger.retires.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn swap_rejects_proof_from_a_different_key() {
        let h = harness(Environment::Testnet, ALICE_APP, true);
        let signer = PrivateKeySigner::random();
        let other = PrivateKeySigner::random();

        let proof = other
            .sign_message_sync(without_fragment(&h.did).as_bytes())
            .unwrap();
        let raw = envelope::seal(
            &h.key,
            &h.did,
            None,
            envelope::SWAP_MESSAGE,
            json!({
                "address": signer.address().to_string(),
                "address_proof": format!("0x{}", alloy::hex::encode(proof.as_bytes())),
                "quantity": "1.000000 REL",
            }),
        );

        let err = h.service.swap_to_evm(&raw, h.session).await.unwrap_err();
        assert!(matches!(err, RelayError::SignatureInvalid { .. }));
        assert_eq!(h.ledger.retires.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn swap_retires_then_pays_out() {
        let h = harness(Environment::Testnet, ALICE_APP, true);
        let signer = PrivateKeySigner::random();
        let raw = swap_envelope(&h, &signer, "2.500000 REL");

        let details = h.service.swap_to_evm(&raw, h.session).await.unwrap();
        assert_eq!(h.ledger.retires.load(Ordering::SeqCst), 1);
        assert_eq!(h.payout.payouts.load(Ordering::SeqCst), 1);
        assert_eq!(details["retire_transaction_id"], "tx-retire");
        assert_eq!(details["payout"]["kind"], "submitted");
    }

    #[tokio::test]
    async fn swap_rejects_zero_amount() {
        let h = harness(Environment::Testnet, ALICE_APP, true);
        let signer = PrivateKeySigner::random();
        let raw = swap_envelope(&h, &signer, "0.000000 REL");

        let err = h.service.swap_to_evm(&raw, h.session).await.unwrap_err();
        assert!(matches!(err, RelayError::InvalidAmount(_)));
    }

    #[tokio::test]
    async fn payout_failure_after_retire_is_surfaced_not_compensated() {
        let h = harness(Environment::Testnet, ALICE_APP, true);
        let signer = PrivateKeySigner::random();
        h.payout.fail.store(true, Ordering::SeqCst);

        let raw = swap_envelope(&h, &signer, "1.000000 REL");
        let err = h.service.swap_to_evm(&raw, h.session).await.unwrap_err();

        assert!(matches!(err, RelayError::ChainOperationFailed(_)));
        // The retire went through and stays retired.
        assert_eq!(h.ledger.retires.load(Ordering::SeqCst), 1);
    }
}
