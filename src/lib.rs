// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Relational Relay - Wallet Communication & Bridge Gateway
//!
//! WebSocket relay service brokering signed-credential messages between
//! logged-in wallet clients, with a cross-chain token bridge between the
//! platform ledger and Base.
//!
//! ## Modules
//!
//! - `api` - HTTP/WebSocket handlers (Axum)
//! - `registry` - DID-to-session registry and authorization guard
//! - `envelope` - signed envelope verification
//! - `relay` - login/relay/disconnect orchestration
//! - `chain` - Base and ledger chain clients behind trait seams
//! - `watcher` - Base-to-ledger bridge transfer watcher
//! - `swap` - throttled faucet and ledger-to-Base swap executor

pub mod api;
pub mod chain;
pub mod config;
pub mod envelope;
pub mod error;
pub mod models;
pub mod registry;
pub mod relay;
pub mod resolver;
pub mod state;
pub mod swap;
pub mod watcher;
