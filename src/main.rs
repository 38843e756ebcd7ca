// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use relational_relay_server::api::router;
use relational_relay_server::chain::evm::{BaseChain, DirectPayout, MultisigPayout};
use relational_relay_server::chain::ledger::LedgerHttpChain;
use relational_relay_server::chain::{EvmChain, EvmPayout, LedgerChain};
use relational_relay_server::config::Settings;
use relational_relay_server::registry::SessionRegistry;
use relational_relay_server::relay::RelayCore;
use relational_relay_server::resolver::{DidResolver, HttpDidResolver};
use relational_relay_server::state::AppState;
use relational_relay_server::swap::SwapService;
use relational_relay_server::watcher::TransferWatcher;

#[tokio::main]
async fn main() {
    init_tracing();

    let settings = Settings::from_env().expect("Failed to load settings");

    let registry = Arc::new(SessionRegistry::new());
    let resolver: Arc<dyn DidResolver> =
        Arc::new(HttpDidResolver::new(settings.ledger_api_url.clone()));
    let relay = Arc::new(RelayCore::new(Arc::clone(&registry), Arc::clone(&resolver)));
    let ledger: Arc<dyn LedgerChain> = Arc::new(LedgerHttpChain::new(settings.ledger_api_url.clone()));

    let base_chain: Option<Arc<BaseChain>> = match &settings.base {
        Some(base_settings) => Some(Arc::new(
            BaseChain::connect(base_settings)
                .await
                .expect("Failed to connect to Base RPC"),
        )),
        None => {
            tracing::info!("BASE_WS_URL not set, bridge watcher and payouts disabled");
            None
        }
    };

    // Production payouts go through the multisig wallet flow; elsewhere
    // the treasury signs directly.
    let payout: Option<Arc<dyn EvmPayout>> = if settings.environment.is_production() {
        settings
            .multisig_api_url
            .clone()
            .map(|url| Arc::new(MultisigPayout::new(url)) as Arc<dyn EvmPayout>)
    } else {
        base_chain.clone().map(|chain| {
            Arc::new(DirectPayout::new(chain as Arc<dyn EvmChain>)) as Arc<dyn EvmPayout>
        })
    };

    let swap = Arc::new(SwapService::new(
        Arc::clone(&registry),
        Arc::clone(&resolver),
        Arc::clone(&ledger),
        payout,
        &settings,
    ));

    let shutdown = CancellationToken::new();

    if let Some(chain) = &base_chain {
        let base_settings = settings.base.as_ref().expect("base settings present");
        let watcher = Arc::new(TransferWatcher::new(
            Arc::clone(chain) as Arc<dyn EvmChain>,
            Arc::clone(&ledger),
            Arc::clone(&relay),
            &base_settings.bridge_address,
            &settings.ledger_chain_id,
            &settings.currency_symbol,
        ));
        tokio::spawn(watcher.run(shutdown.clone()));
    }

    let addr: SocketAddr = format!("{}:{}", settings.host, settings.port)
        .parse()
        .expect("Failed to parse bind address");

    let state = AppState::new(settings, registry, relay, swap);
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind listener");

    tracing::info!(%addr, "Relay gateway listening");

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received");
            signal_shutdown.cancel();
        }
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .expect("Server failed");
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));

    let format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    if format == "json" {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
