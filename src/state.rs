// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use crate::config::Settings;
use crate::registry::SessionRegistry;
use crate::relay::RelayCore;
use crate::swap::SwapService;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub registry: Arc<SessionRegistry>,
    pub relay: Arc<RelayCore>,
    pub swap: Arc<SwapService>,
}

impl AppState {
    pub fn new(
        settings: Settings,
        registry: Arc<SessionRegistry>,
        relay: Arc<RelayCore>,
        swap: Arc<SwapService>,
    ) -> Self {
        Self {
            settings: Arc::new(settings),
            registry,
            relay,
            swap,
        }
    }
}
