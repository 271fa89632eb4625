// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Embedded authorization request store backed by redb (pure Rust, ACID).
//!
//! ## Table Layout
//!
//! - `authorization_requests`: request_id → serialized AuthorizationRequest
//! - `auth_token_index`: auth_token → request_id
//! - `owner_request_index`: composite key (owner|!created_at|request_id) → request_id
//!
//! Status is only ever changed through [`RequestDatabase::transition`], a
//! compare-and-swap inside a single write transaction. Concurrent authorize
//! calls and the expiry sweeper all race through that one primitive, so at
//! most one of them can move a request out of any given status.

use std::path::Path;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use super::requests::{AuthorizationRequest, RequestStatus};

// =============================================================================
// Table Definitions
// =============================================================================

/// Primary table: request_id → serialized AuthorizationRequest (JSON bytes).
const REQUESTS: TableDefinition<&str, &[u8]> = TableDefinition::new("authorization_requests");

/// Index: auth_token → request_id.
const TOKEN_INDEX: TableDefinition<&str, &str> = TableDefinition::new("auth_token_index");

/// Index: composite key → request_id.
/// Key format: `owner|!created_at_be|request_id` for newest-first range scans.
const OWNER_INDEX: TableDefinition<&[u8], &str> = TableDefinition::new("owner_request_index");

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum RequestDbError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("status conflict for {request_id}: expected {expected}, found {actual}")]
    StatusConflict {
        request_id: String,
        expected: RequestStatus,
        actual: RequestStatus,
    },
}

pub type RequestDbResult<T> = Result<T, RequestDbError>;

// =============================================================================
// Index Key Helpers
// =============================================================================

/// Build a composite key for the owner_request_index table.
///
/// Format: `lowercase_owner | inverted_created_at_be_bytes | request_id`
///
/// The inverted timestamp ensures newest-first ordering when scanning forward.
fn make_owner_key(owner_address: &str, created_at: i64, request_id: &str) -> Vec<u8> {
    let owner = owner_address.to_lowercase();
    let mut key = Vec::with_capacity(owner.len() + 1 + 8 + 1 + request_id.len());
    key.extend_from_slice(owner.as_bytes());
    key.push(b'|');
    // Invert timestamp for descending order (newest first)
    key.extend_from_slice(&(!created_at as u64).to_be_bytes());
    key.push(b'|');
    key.extend_from_slice(request_id.as_bytes());
    key
}

/// Build a prefix key for range scanning all requests of an owner.
fn make_owner_prefix(owner_address: &str) -> Vec<u8> {
    let owner = owner_address.to_lowercase();
    let mut prefix = Vec::with_capacity(owner.len() + 1);
    prefix.extend_from_slice(owner.as_bytes());
    prefix.push(b'|');
    prefix
}

/// Build the upper bound for a range scan (prefix with all 0xFF bytes appended).
fn make_owner_prefix_end(owner_address: &str) -> Vec<u8> {
    let owner = owner_address.to_lowercase();
    let mut end = Vec::with_capacity(owner.len() + 1 + 20);
    end.extend_from_slice(owner.as_bytes());
    end.push(b'|');
    end.extend_from_slice(&[0xFF; 20]);
    end
}

// =============================================================================
// RequestDatabase
// =============================================================================

/// Embedded ACID store for authorization requests.
pub struct RequestDatabase {
    db: Database,
}

impl RequestDatabase {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> RequestDbResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let db = Database::create(path)?;

        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(REQUESTS)?;
            let _ = write_txn.open_table(TOKEN_INDEX)?;
            let _ = write_txn.open_table(OWNER_INDEX)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    /// Cheap liveness probe for readiness checks.
    pub fn check(&self) -> RequestDbResult<()> {
        let read_txn = self.db.begin_read()?;
        let _ = read_txn.open_table(REQUESTS)?;
        Ok(())
    }

    // =========================================================================
    // Insert / lookup
    // =========================================================================

    /// Insert a new request and both index entries in one transaction.
    ///
    /// Either everything lands durably or nothing does; a failed insert leaves
    /// no partial state behind.
    pub fn insert(&self, request: &AuthorizationRequest) -> RequestDbResult<()> {
        let json = serde_json::to_vec(request)?;
        let owner_key = make_owner_key(
            &request.owner_address,
            request.created_at.timestamp(),
            &request.request_id,
        );

        let write_txn = self.db.begin_write()?;
        {
            let mut req_table = write_txn.open_table(REQUESTS)?;
            let exists = req_table.get(request.request_id.as_str())?.is_some();
            if exists {
                return Err(RequestDbError::AlreadyExists(format!(
                    "Request {}",
                    request.request_id
                )));
            }
            req_table.insert(request.request_id.as_str(), json.as_slice())?;

            let mut token_table = write_txn.open_table(TOKEN_INDEX)?;
            let token_taken = token_table.get(request.auth_token.as_str())?.is_some();
            if token_taken {
                return Err(RequestDbError::AlreadyExists(format!(
                    "Auth token {}",
                    request.auth_token
                )));
            }
            token_table.insert(request.auth_token.as_str(), request.request_id.as_str())?;

            let mut owner_table = write_txn.open_table(OWNER_INDEX)?;
            owner_table.insert(owner_key.as_slice(), request.request_id.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Look up a single request by id.
    pub fn get(&self, request_id: &str) -> RequestDbResult<Option<AuthorizationRequest>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(REQUESTS)?;
        match table.get(request_id)? {
            Some(value) => {
                let request: AuthorizationRequest = serde_json::from_slice(value.value())?;
                Ok(Some(request))
            }
            None => Ok(None),
        }
    }

    /// Look up a single request by its auth token.
    pub fn get_by_token(&self, auth_token: &str) -> RequestDbResult<Option<AuthorizationRequest>> {
        let read_txn = self.db.begin_read()?;
        let token_table = read_txn.open_table(TOKEN_INDEX)?;
        let request_id = match token_table.get(auth_token)? {
            Some(v) => v.value().to_string(),
            None => return Ok(None),
        };

        let req_table = read_txn.open_table(REQUESTS)?;
        match req_table.get(request_id.as_str())? {
            Some(value) => {
                let request: AuthorizationRequest = serde_json::from_slice(value.value())?;
                Ok(Some(request))
            }
            None => Ok(None),
        }
    }

    /// List an owner's pending requests, newest first, capped at `limit`.
    pub fn list_pending_by_owner(
        &self,
        owner_address: &str,
        limit: usize,
    ) -> RequestDbResult<Vec<AuthorizationRequest>> {
        let read_txn = self.db.begin_read()?;
        let owner_table = read_txn.open_table(OWNER_INDEX)?;
        let req_table = read_txn.open_table(REQUESTS)?;

        let prefix = make_owner_prefix(owner_address);
        let prefix_end = make_owner_prefix_end(owner_address);

        let mut results = Vec::new();
        let range = owner_table.range(prefix.as_slice()..prefix_end.as_slice())?;
        for entry in range {
            let entry = entry?;
            let request_id = entry.1.value().to_string();
            if let Some(value) = req_table.get(request_id.as_str())? {
                let request: AuthorizationRequest = serde_json::from_slice(value.value())?;
                if request.status == RequestStatus::Pending {
                    results.push(request);
                }
            }
            if results.len() >= limit {
                break;
            }
        }

        Ok(results)
    }

    // =========================================================================
    // Conditional mutation
    // =========================================================================

    /// Compare-and-swap status transition.
    ///
    /// Within one write transaction: load the record, require its status to
    /// equal `expected`, apply `mutate`, set the new status, stamp
    /// `updated_at`, and write back. Fails with [`RequestDbError::StatusConflict`]
    /// when another caller moved the request first, and unconditionally for
    /// records already in a terminal state.
    pub fn transition<F>(
        &self,
        request_id: &str,
        expected: RequestStatus,
        next: RequestStatus,
        mutate: F,
    ) -> RequestDbResult<AuthorizationRequest>
    where
        F: FnOnce(&mut AuthorizationRequest),
    {
        self.mutate_conditional(request_id, expected, Some(next), mutate)
    }

    /// Mutate non-status fields of a record, conditional on its status.
    ///
    /// Same CAS rules as [`RequestDatabase::transition`], status unchanged.
    pub fn update_in_status<F>(
        &self,
        request_id: &str,
        expected: RequestStatus,
        mutate: F,
    ) -> RequestDbResult<AuthorizationRequest>
    where
        F: FnOnce(&mut AuthorizationRequest),
    {
        self.mutate_conditional(request_id, expected, None, mutate)
    }

    fn mutate_conditional<F>(
        &self,
        request_id: &str,
        expected: RequestStatus,
        next: Option<RequestStatus>,
        mutate: F,
    ) -> RequestDbResult<AuthorizationRequest>
    where
        F: FnOnce(&mut AuthorizationRequest),
    {
        let write_txn = self.db.begin_write()?;
        let updated = {
            let mut table = write_txn.open_table(REQUESTS)?;

            // Read existing value and deserialize before mutating
            let existing_bytes = {
                let existing = table
                    .get(request_id)?
                    .ok_or_else(|| RequestDbError::NotFound(format!("Request {request_id}")))?;
                existing.value().to_vec()
            };

            let mut request: AuthorizationRequest = serde_json::from_slice(&existing_bytes)?;

            // Terminal records are immutable, whatever the caller expected
            if request.status.is_terminal() || request.status != expected {
                return Err(RequestDbError::StatusConflict {
                    request_id: request_id.to_string(),
                    expected,
                    actual: request.status,
                });
            }

            if let Some(next) = next {
                request.status = next;
            }
            mutate(&mut request);
            request.updated_at = Utc::now();

            let json = serde_json::to_vec(&request)?;
            table.insert(request_id, json.as_slice())?;
            request
        };
        write_txn.commit()?;
        Ok(updated)
    }

    // =========================================================================
    // Sweeping
    // =========================================================================

    /// Ids of pending requests whose window elapsed before `now`.
    ///
    /// A read-only scan; the caller transitions each candidate through the
    /// normal CAS so a concurrent authorize still wins cleanly.
    pub fn expired_pending_ids(&self, now: DateTime<Utc>) -> RequestDbResult<Vec<String>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(REQUESTS)?;

        let mut ids = Vec::new();
        for entry in table.iter()? {
            let entry = entry?;
            let request: AuthorizationRequest = serde_json::from_slice(entry.1.value())?;
            if request.is_expired_at(now) {
                ids.push(request.request_id);
            }
        }
        Ok(ids)
    }

    /// Delete terminal records last touched before `cutoff`, with their index
    /// entries, in one transaction. Returns how many were removed.
    pub fn prune_terminal_before(&self, cutoff: DateTime<Utc>) -> RequestDbResult<usize> {
        let write_txn = self.db.begin_write()?;
        let pruned = {
            let mut req_table = write_txn.open_table(REQUESTS)?;

            let victims: Vec<AuthorizationRequest> = {
                let mut collected = Vec::new();
                for entry in req_table.iter()? {
                    let entry = entry?;
                    let request: AuthorizationRequest = serde_json::from_slice(entry.1.value())?;
                    if request.status.is_terminal() && request.updated_at < cutoff {
                        collected.push(request);
                    }
                }
                collected
            };

            let mut token_table = write_txn.open_table(TOKEN_INDEX)?;
            let mut owner_table = write_txn.open_table(OWNER_INDEX)?;
            for request in &victims {
                let owner_key = make_owner_key(
                    &request.owner_address,
                    request.created_at.timestamp(),
                    &request.request_id,
                );
                req_table.remove(request.request_id.as_str())?;
                token_table.remove(request.auth_token.as_str())?;
                owner_table.remove(owner_key.as_slice())?;
            }
            victims.len()
        };
        write_txn.commit()?;
        Ok(pruned)
    }
}

// =============================================================================
// Tests
// =============================================================================
