// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Request Storage Module
//!
//! Durable state for authorization requests, backed by a single redb
//! database file under `DATA_DIR`.
//!
//! ## Storage Layout
//!
//! ```text
//! {DATA_DIR}/
//!   requests.redb    # authorization_requests + auth_token_index + owner_request_index
//! ```
//!
//! Records are serialized as JSON bytes through the typed models in
//! [`requests`]; nothing is ever stringified ad hoc on the way in or out.
//! Terminal records stay in place for audit until the sweeper prunes them by
//! age.

pub mod request_db;
pub mod requests;

pub use request_db::{RequestDatabase, RequestDbError, RequestDbResult};
pub use requests::{
    AuthorizationRequest, ContentBinding, DebitRecord, RequestStatus, SettlementRecord,
};
