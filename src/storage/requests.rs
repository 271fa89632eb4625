// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authorization request model.
//!
//! An `AuthorizationRequest` tracks one owner's consent to mint one
//! data-wallet record. Requests move `pending → authorized → processed`,
//! or terminate early at `expired`/`cancelled`. A record that reaches a
//! terminal state is never mutated again.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Authorization request status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    /// Created, waiting for the owner's consent signature
    Pending,
    /// Signature verified and the debit issued; settlement not yet recorded
    Authorized,
    /// Settlement confirmed and recorded
    Processed,
    /// Authorization window elapsed before the owner signed
    Expired,
    /// Cancelled by the caller, or by a definitive debit failure
    Cancelled,
}

impl RequestStatus {
    /// Terminal states admit no further transition.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Processed | Self::Expired | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Authorized => "authorized",
            Self::Processed => "processed",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized email summary: content hashes plus a storage locator.
///
/// Produced by the upstream email processor; raw content never reaches this
/// service or the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ContentBinding {
    /// Hash of the normalized subject line
    pub subject_hash: String,
    /// Hash of the normalized sender identity
    pub sender_hash: String,
    /// Hash of the message body
    pub body_hash: String,
    /// Content hash of each attachment, in attachment order
    pub attachment_hashes: Vec<String>,
    /// Content-addressed locator for the stored raw email
    pub storage_locator: String,
}

/// Ledger debit recorded once the credit charge confirms.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DebitRecord {
    /// Ledger transaction hash (0x prefixed)
    pub tx_hash: String,
    /// Balance after the debit, in credit units
    pub new_balance: String,
    /// When the debit confirmed
    pub debited_at: DateTime<Utc>,
}

/// Settlement recorded once the registry confirms the data-wallet record.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SettlementRecord {
    /// Registry transaction hash. Absent only for records recovered from the
    /// registry during reconciliation, where the original hash is unknown.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    /// Minted data-wallet record id
    pub record_id: String,
    /// Content key the record was minted under (0x prefixed, 32 bytes)
    pub content_key: String,
    /// Block number, if known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
    /// When the settlement was recorded
    pub settled_at: DateTime<Utc>,
}

/// Stored authorization request record.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuthorizationRequest {
    /// Opaque unique id, the on-chain correlation key. Immutable.
    pub request_id: String,
    /// Second opaque id for human-facing links; independent of `request_id`
    pub auth_token: String,
    /// Lowercase 0x address expected to authorize this request. Immutable.
    pub owner_address: String,
    /// Normalized email summary. Immutable.
    pub content: ContentBinding,
    /// Credit units required, computed once at creation. Immutable.
    pub credit_cost: u64,
    /// Current lifecycle status
    pub status: RequestStatus,
    /// Settlement outcome, populated only on `processed`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settlement: Option<SettlementRecord>,
    /// Confirmed ledger debit, populated after the charge confirms
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debit: Option<DebitRecord>,
    /// Ledger transaction broadcast but not yet confirmed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_debit_tx: Option<String>,
    /// Registry transaction broadcast but not yet confirmed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_settlement_tx: Option<String>,
    /// Settlement submissions entered so far; feeds the content key derivation
    pub submission_attempts: u32,
    /// Why a request was cancelled without caller action
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    /// When the request was created
    pub created_at: DateTime<Utc>,
    /// `created_at` plus the fixed authorization window
    pub expires_at: DateTime<Utc>,
    /// When the record was last mutated
    pub updated_at: DateTime<Utc>,
}

impl AuthorizationRequest {
    /// Create a new pending request with freshly generated identifiers.
    ///
    /// `auth_token` is generated independently of `request_id` so the link
    /// token reveals nothing about the correlation key.
    pub fn new_pending(
        owner_address: String,
        content: ContentBinding,
        credit_cost: u64,
        window: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            auth_token: uuid::Uuid::new_v4().to_string(),
            owner_address: owner_address.to_lowercase(),
            content,
            credit_cost,
            status: RequestStatus::Pending,
            settlement: None,
            debit: None,
            pending_debit_tx: None,
            pending_settlement_tx: None,
            submission_attempts: 0,
            failure_reason: None,
            created_at: now,
            expires_at: now + window,
            updated_at: now,
        }
    }

    /// Whether a pending request's authorization window has elapsed at `now`.
    ///
    /// Only `pending` requests expire; later states have already consumed the
    /// window.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.status == RequestStatus::Pending && now > self.expires_at
    }
}
