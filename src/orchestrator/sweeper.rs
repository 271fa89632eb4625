// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Expiry Sweeper
//!
//! Background task that moves overdue `pending` requests to `expired` and
//! prunes aged terminal records.
//!
//! ## Strategy
//!
//! Every `sweep_interval` (default 1 h) the sweeper:
//! 1. Scans for pending requests whose authorization window elapsed.
//! 2. Transitions each through the same conditional status update the
//!    orchestrator uses. A request being authorized at the same instant wins
//!    or loses that race cleanly; a lost swap is simply skipped.
//! 3. Deletes terminal records older than the retention period. Terminal
//!    records are kept for audit and removed by age only, never as part of a
//!    status change.
//!
//! ## Shutdown
//!
//! Uses `tokio_util::sync::CancellationToken` for graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::storage::request_db::{RequestDatabase, RequestDbError};
use crate::storage::requests::RequestStatus;

/// Default interval between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

/// Default retention for terminal records before pruning.
pub const DEFAULT_RETENTION_DAYS: i64 = 90;

/// Background task expiring stale requests and pruning aged terminal records.
pub struct ExpirySweeper {
    db: Arc<RequestDatabase>,
    sweep_interval: Duration,
    retention: chrono::Duration,
}

impl ExpirySweeper {
    pub fn new(db: Arc<RequestDatabase>) -> Self {
        Self {
            db,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            retention: chrono::Duration::days(DEFAULT_RETENTION_DAYS),
        }
    }

    pub fn with_interval(mut self, sweep_interval: Duration) -> Self {
        self.sweep_interval = sweep_interval;
        self
    }

    pub fn with_retention(mut self, retention: chrono::Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Run the sweep loop until the cancellation token is triggered.
    ///
    /// Should be spawned as a background task:
    /// ```rust,ignore
    /// tokio::spawn(sweeper.run(shutdown.clone()));
    /// ```
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.sweep_interval.as_secs(),
            retention_days = self.retention.num_days(),
            "Expiry sweeper starting"
        );

        loop {
            if shutdown.is_cancelled() {
                info!("Expiry sweeper shutting down");
                return;
            }

            self.sweep_step();

            tokio::select! {
                _ = tokio::time::sleep(self.sweep_interval) => {},
                _ = shutdown.cancelled() => {
                    info!("Expiry sweeper shutting down");
                    return;
                }
            }
        }
    }

    /// Execute one sweep: expire overdue pending requests, then prune.
    /// Returns (expired, pruned) counts.
    pub fn sweep_step(&self) -> (usize, usize) {
        let now = Utc::now();

        let overdue = match self.db.expired_pending_ids(now) {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "Expiry sweeper: scan failed");
                return (0, 0);
            }
        };

        let mut expired = 0;
        for request_id in &overdue {
            match self.db.transition(
                request_id,
                RequestStatus::Pending,
                RequestStatus::Expired,
                |_| {},
            ) {
                Ok(_) => expired += 1,
                // A concurrent authorize or cancel moved it first; theirs stands
                Err(RequestDbError::StatusConflict { .. }) => {}
                Err(e) => {
                    warn!(request_id = %request_id, error = %e, "Expiry sweeper: transition failed");
                }
            }
        }

        let pruned = match self.db.prune_terminal_before(now - self.retention) {
            Ok(count) => count,
            Err(e) => {
                warn!(error = %e, "Expiry sweeper: prune failed");
                0
            }
        };

        if expired > 0 || pruned > 0 {
            info!(expired, pruned, "Expiry sweeper: sweep complete");
        }

        (expired, pruned)
    }
}
