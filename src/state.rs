// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use crate::blockchain::NetworkConfig;
use crate::orchestrator::Orchestrator;
use crate::storage::request_db::RequestDatabase;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub db: Arc<RequestDatabase>,
    /// Network name reported by health endpoints
    pub network_name: &'static str,
    pub chain_id: u64,
}

impl AppState {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        db: Arc<RequestDatabase>,
        network: &NetworkConfig,
    ) -> Self {
        Self {
            orchestrator,
            db,
            network_name: network.name,
            chain_id: network.chain_id,
        }
    }
}
