// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Configuration is loaded from the environment once at startup into a
//! [`Settings`] value that the rest of the service borrows.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `5000` |
//! | `ENVIRONMENT` | `production`, `staging`, `testnet` or `development` | `development` |
//! | `LEDGER_API_URL` | Platform ledger chain API endpoint | `http://localhost:8888` |
//! | `LEDGER_CHAIN_ID` | Chain identifier used in `did:rel:<chain>:<account>` | `rel-testnet` |
//! | `CURRENCY_SYMBOL` | Ledger token symbol | `REL` |
//! | `TREASURY_ACCOUNT` | Ledger account funding faucet grants | `relay.treasury` |
//! | `WALLET_APP_ACCOUNT` | Well-known wallet application account trusted for swaps | `relational.id` |
//! | `BASE_WS_URL` | Base chain WebSocket RPC endpoint (watcher disabled if unset) | unset |
//! | `BASE_TOKEN_CONTRACT` | REL token contract address on Base | required with `BASE_WS_URL` |
//! | `BASE_BRIDGE_ADDRESS` | Mint/burn address whose incoming transfers are swap intents | required with `BASE_WS_URL` |
//! | `BASE_TREASURY_KEY` | Hex private key for outbound Base payouts | unset |
//! | `BASE_CONFIRMATIONS` | Extra confirmations before treating a payout as sent | `1` |
//! | `MULTISIG_API_URL` | Multisig wallet service for production payouts | unset |
//! | `VERIFICATION_WEBHOOK_SECRET` | Shared secret for the identity-verification webhook HMAC | required |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |

use std::env;

/// Deployment environment. The faucet only operates outside production.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Production,
    Staging,
    Testnet,
    Development,
}

impl Environment {
    fn parse(raw: &str) -> Result<Self, SettingsError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "production" => Ok(Self::Production),
            "staging" => Ok(Self::Staging),
            "testnet" => Ok(Self::Testnet),
            "development" | "local" => Ok(Self::Development),
            other => Err(SettingsError::Invalid {
                var: "ENVIRONMENT",
                value: other.to_string(),
            }),
        }
    }

    pub fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }
}

/// Base chain (EVM) configuration. Present only when the bridge watcher
/// and outbound payouts are enabled for this deployment.
#[derive(Debug, Clone)]
pub struct BaseChainSettings {
    /// WebSocket RPC endpoint used for log subscriptions.
    pub ws_url: String,
    /// REL token contract address on Base.
    pub token_contract: String,
    /// Bridge mint/burn address; transfers into it are swap intents.
    pub bridge_address: String,
    /// Hex-encoded private key for the Base treasury (payout signer).
    pub treasury_key: Option<String>,
    /// Confirmations to wait on top of the `finalized` tag for payouts.
    pub confirmations: u64,
}

/// Immutable service configuration loaded from the environment at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub environment: Environment,
    pub ledger_api_url: String,
    pub ledger_chain_id: String,
    pub currency_symbol: String,
    pub treasury_account: String,
    pub wallet_app_account: String,
    pub base: Option<BaseChainSettings>,
    pub multisig_api_url: Option<String>,
    pub verification_webhook_secret: String,
}

impl Settings {
    /// Load settings from the process environment.
    pub fn from_env() -> Result<Self, SettingsError> {
        let environment = Environment::parse(&var_or("ENVIRONMENT", "development"))?;

        let base = match env::var("BASE_WS_URL") {
            Ok(ws_url) => Some(BaseChainSettings {
                ws_url,
                token_contract: require("BASE_TOKEN_CONTRACT")?,
                bridge_address: require("BASE_BRIDGE_ADDRESS")?.to_lowercase(),
                treasury_key: env::var("BASE_TREASURY_KEY").ok(),
                confirmations: parse_var("BASE_CONFIRMATIONS", "1")?,
            }),
            Err(_) => None,
        };

        let ledger_api_url = var_or("LEDGER_API_URL", "http://localhost:8888");
        url::Url::parse(&ledger_api_url).map_err(|_| SettingsError::Invalid {
            var: "LEDGER_API_URL",
            value: ledger_api_url.clone(),
        })?;

        Ok(Self {
            host: var_or("HOST", "0.0.0.0"),
            port: parse_var("PORT", "5000")?,
            environment,
            ledger_api_url,
            ledger_chain_id: var_or("LEDGER_CHAIN_ID", "rel-testnet"),
            currency_symbol: var_or("CURRENCY_SYMBOL", "REL"),
            treasury_account: var_or("TREASURY_ACCOUNT", "relay.treasury"),
            wallet_app_account: var_or("WALLET_APP_ACCOUNT", "relational.id"),
            base,
            multisig_api_url: env::var("MULTISIG_API_URL").ok(),
            verification_webhook_secret: require("VERIFICATION_WEBHOOK_SECRET")?,
        })
    }
}

fn var_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn require(name: &'static str) -> Result<String, SettingsError> {
    env::var(name).map_err(|_| SettingsError::Missing { var: name })
}

fn parse_var<T: std::str::FromStr>(name: &'static str, default: &str) -> Result<T, SettingsError> {
    let raw = var_or(name, default);
    raw.parse().map_err(|_| SettingsError::Invalid {
        var: name,
        value: raw,
    })
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("missing required environment variable {var}")]
    Missing { var: &'static str },

    #[error("invalid value for {var}: {value}")]
    Invalid { var: &'static str, value: String },
}
