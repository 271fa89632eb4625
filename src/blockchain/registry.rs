// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Data-wallet registry settlement submitter.
//!
//! Minting a data-wallet record is the irreversible tail of the authorization
//! flow. Every submission carries a content key derived from the request id
//! and its persisted attempt counter, so re-submitting the same logical
//! settlement hits the registry's duplicate check instead of minting twice.
//! [`SettlementSubmitter::find_existing`] resolves that duplicate back to the
//! original record during reconciliation.

use std::time::Duration;

use alloy::{
    primitives::{keccak256, Address, B256, U256},
    providers::Provider,
    rpc::types::Filter,
    sol,
    sol_types::SolEvent,
};
use async_trait::async_trait;
use chrono::Utc;

use super::client::{ChainClient, ChainClientError, HttpSignerProvider};
use crate::storage::requests::{ContentBinding, SettlementRecord};

sol! {
    #[sol(rpc)]
    interface IDataWalletRegistry {
        function createDataWallet(
            address owner,
            bytes32 contentKey,
            string subjectHash,
            string senderHash,
            string bodyHash,
            string attachmentRoot,
            string storageLocator
        ) external returns (uint256);

        function recordIdForKey(bytes32 contentKey) external view returns (uint256);

        event DataWalletCreated(uint256 indexed recordId, address indexed owner, bytes32 indexed contentKey);
    }
}

/// Longest string the registry accepts in any field.
pub const MAX_FIELD_LEN: usize = 256;

/// One settlement submission, fully resolved except for the remote outcome.
#[derive(Debug, Clone)]
pub struct SettlementJob {
    /// Owner the record is minted for
    pub owner: Address,
    /// Uniqueness-enforcing key, see [`derive_content_key`]
    pub content_key: B256,
    /// Hashes and locator going on-chain
    pub content: ContentBinding,
}

/// Rejection category reported by the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Registry is administratively paused
    Paused,
    /// Registry capacity limit reached
    CapacityExceeded,
    /// Submitting operator is not entitled to mint for this owner
    NotOwner,
    /// A record already exists under this content key
    DuplicateKey,
    /// Anything the registry reports that we do not recognize
    Other(String),
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Paused => f.write_str("paused"),
            Self::CapacityExceeded => f.write_str("capacity-exceeded"),
            Self::NotOwner => f.write_str("not-owner"),
            Self::DuplicateKey => f.write_str("duplicate-key"),
            Self::Other(msg) => write!(f, "other: {msg}"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SettlementError {
    #[error("settlement rejected ({reason})")]
    Rejected { reason: RejectReason },

    #[error("settlement broadcast but unconfirmed: {tx_hash}")]
    Unconfirmed { tx_hash: String },

    #[error("invalid settlement field: {0}")]
    InvalidField(String),

    #[error("registry unavailable: {0}")]
    Unavailable(String),
}

/// Registry interface the orchestrator runs against.
///
/// `submit` initiates at most one mint per call. Only a [`SettlementError::Rejected`]
/// outcome is final for the attempt; `Unconfirmed` means the record may still
/// land and must be resolved via `find_existing` before anything is retried.
#[async_trait]
pub trait SettlementSubmitter: Send + Sync {
    /// Submit one data-wallet mint and wait for confirmation.
    async fn submit(&self, job: &SettlementJob) -> Result<SettlementRecord, SettlementError>;

    /// Look up a record previously minted under `content_key`, if any.
    async fn find_existing(
        &self,
        content_key: B256,
    ) -> Result<Option<SettlementRecord>, SettlementError>;
}

/// Derive the registry content key for one logical submission.
///
/// keccak256 over the request id bytes plus the big-endian attempt counter.
/// Deterministic on purpose: a retry under the same attempt produces the same
/// key and is detectable as a duplicate, while wall-clock input would mint a
/// second record for the same authorization.
pub fn derive_content_key(request_id: &str, attempt: u32) -> B256 {
    let mut input = Vec::with_capacity(request_id.len() + 4);
    input.extend_from_slice(request_id.as_bytes());
    input.extend_from_slice(&attempt.to_be_bytes());
    keccak256(&input)
}

/// Digest of the attachment hash list, sent on-chain as a single field.
pub fn attachment_root(hashes: &[String]) -> String {
    let mut buf = Vec::new();
    for hash in hashes {
        buf.extend_from_slice(hash.as_bytes());
    }
    format!("{:#x}", keccak256(&buf))
}

/// Check the non-empty and length constraints the registry enforces.
pub fn validate_job_fields(content: &ContentBinding) -> Result<(), SettlementError> {
    let named = [
        ("subject_hash", &content.subject_hash),
        ("sender_hash", &content.sender_hash),
        ("body_hash", &content.body_hash),
        ("storage_locator", &content.storage_locator),
    ];
    for (name, value) in named {
        check_field(name, value)?;
    }
    for (i, hash) in content.attachment_hashes.iter().enumerate() {
        check_field(&format!("attachment_hashes[{i}]"), hash)?;
    }
    Ok(())
}

fn check_field(name: &str, value: &str) -> Result<(), SettlementError> {
    if value.is_empty() {
        return Err(SettlementError::InvalidField(format!("{name} is empty")));
    }
    if value.len() > MAX_FIELD_LEN {
        return Err(SettlementError::InvalidField(format!(
            "{name} exceeds {MAX_FIELD_LEN} chars"
        )));
    }
    Ok(())
}

/// Map a registry revert message onto the rejection taxonomy.
fn classify_reject_reason(message: &str) -> RejectReason {
    let lower = message.to_lowercase();
    if lower.contains("paused") {
        RejectReason::Paused
    } else if lower.contains("capacity") || lower.contains("limit exceeded") {
        RejectReason::CapacityExceeded
    } else if lower.contains("not owner") || lower.contains("not the owner") {
        RejectReason::NotOwner
    } else if lower.contains("duplicate") || lower.contains("already exists") {
        RejectReason::DuplicateKey
    } else {
        RejectReason::Other(message.to_string())
    }
}

/// Classify a failure from broadcasting the mint call.
///
/// A revert reported during gas estimation is a registry rejection; anything
/// else (transport, nonce, RPC) means the mint was never broadcast.
fn classify_submit_error(message: &str) -> SettlementError {
    if message.to_lowercase().contains("revert") {
        SettlementError::Rejected {
            reason: classify_reject_reason(message),
        }
    } else {
        SettlementError::Unavailable(message.to_string())
    }
}

/// EVM settlement submitter backed by the registry contract.
pub struct EvmSettlementSubmitter {
    contract: IDataWalletRegistry::IDataWalletRegistryInstance<HttpSignerProvider>,
    provider: HttpSignerProvider,
    registry_address: Address,
    deploy_block: u64,
    confirm_timeout: Duration,
}

impl EvmSettlementSubmitter {
    /// Bind the registry contract at `registry_address` to the operator-signed client.
    pub fn new(
        client: &ChainClient,
        registry_address: Address,
        deploy_block: u64,
        confirm_timeout: Duration,
    ) -> Result<Self, ChainClientError> {
        let contract = IDataWalletRegistry::new(registry_address, client.provider().clone());
        Ok(Self {
            contract,
            provider: client.provider().clone(),
            registry_address,
            deploy_block,
            confirm_timeout,
        })
    }

    async fn record_id_for_key(&self, content_key: B256) -> Result<U256, SettlementError> {
        self.contract
            .recordIdForKey(content_key)
            .call()
            .await
            .map_err(|e| SettlementError::Unavailable(e.to_string()))
    }

    /// Recover the original mint transaction from the event log, best effort.
    async fn lookup_mint_log(&self, content_key: B256) -> (Option<String>, Option<u64>) {
        let filter = Filter::new()
            .address(self.registry_address)
            .event_signature(IDataWalletRegistry::DataWalletCreated::SIGNATURE_HASH)
            .topic3(content_key)
            .from_block(self.deploy_block);

        match self.provider.get_logs(&filter).await {
            Ok(logs) => logs
                .first()
                .map(|log| {
                    (
                        log.transaction_hash.map(|h| format!("{h:#x}")),
                        log.block_number,
                    )
                })
                .unwrap_or((None, None)),
            Err(e) => {
                tracing::warn!(
                    content_key = %format!("{content_key:#x}"),
                    error = %e,
                    "Mint log lookup failed"
                );
                (None, None)
            }
        }
    }
}

#[async_trait]
impl SettlementSubmitter for EvmSettlementSubmitter {
    async fn submit(&self, job: &SettlementJob) -> Result<SettlementRecord, SettlementError> {
        validate_job_fields(&job.content)?;

        let root = attachment_root(&job.content.attachment_hashes);
        let pending = self
            .contract
            .createDataWallet(
                job.owner,
                job.content_key,
                job.content.subject_hash.clone(),
                job.content.sender_hash.clone(),
                job.content.body_hash.clone(),
                root,
                job.content.storage_locator.clone(),
            )
            .send()
            .await
            .map_err(|e| classify_submit_error(&e.to_string()))?;

        let tx_hash = format!("{:#x}", pending.tx_hash());

        let receipt = pending
            .with_timeout(Some(self.confirm_timeout))
            .get_receipt()
            .await;

        match receipt {
            Ok(r) if r.status() => {
                let record_id = self.record_id_for_key(job.content_key).await?;
                Ok(SettlementRecord {
                    tx_hash: Some(tx_hash),
                    record_id: record_id.to_string(),
                    content_key: format!("{:#x}", job.content_key),
                    block_number: r.block_number,
                    settled_at: Utc::now(),
                })
            }
            // Included but reverted: final for this attempt, no record minted.
            Ok(_) => Err(SettlementError::Rejected {
                reason: RejectReason::Other(format!("transaction {tx_hash} reverted on-chain")),
            }),
            Err(e) => {
                tracing::warn!(
                    tx_hash = %tx_hash,
                    error = %e,
                    "Settlement confirmation timed out"
                );
                Err(SettlementError::Unconfirmed { tx_hash })
            }
        }
    }

    async fn find_existing(
        &self,
        content_key: B256,
    ) -> Result<Option<SettlementRecord>, SettlementError> {
        let record_id = self.record_id_for_key(content_key).await?;
        if record_id.is_zero() {
            return Ok(None);
        }

        let (tx_hash, block_number) = self.lookup_mint_log(content_key).await;
        Ok(Some(SettlementRecord {
            tx_hash,
            record_id: record_id.to_string(),
            content_key: format!("{content_key:#x}"),
            block_number,
            settled_at: Utc::now(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding() -> ContentBinding {
        ContentBinding {
            subject_hash: "0xs".to_string(),
            sender_hash: "0xf".to_string(),
            body_hash: "0xb".to_string(),
            attachment_hashes: vec!["0xa1".to_string(), "0xa2".to_string()],
            storage_locator: "bafy-locator".to_string(),
        }
    }

    #[test]
    fn content_key_is_deterministic_per_attempt() {
        let a = derive_content_key("req-1", 1);
        let b = derive_content_key("req-1", 1);
        assert_eq!(a, b);

        // Attempt and request id both feed the key
        assert_ne!(derive_content_key("req-1", 2), a);
        assert_ne!(derive_content_key("req-2", 1), a);
    }

    #[test]
    fn attachment_root_depends_on_order_and_content() {
        let forward = attachment_root(&["0xa1".to_string(), "0xa2".to_string()]);
        let reversed = attachment_root(&["0xa2".to_string(), "0xa1".to_string()]);
        assert_ne!(forward, reversed);
        assert!(forward.starts_with("0x"));

        // Empty list still yields a non-empty digest
        let empty = attachment_root(&[]);
        assert_eq!(empty.len(), 66);
    }

    #[test]
    fn job_field_validation() {
        assert!(validate_job_fields(&binding()).is_ok());

        let mut empty_subject = binding();
        empty_subject.subject_hash = String::new();
        assert!(matches!(
            validate_job_fields(&empty_subject),
            Err(SettlementError::InvalidField(_))
        ));

        let mut oversized = binding();
        oversized.storage_locator = "x".repeat(MAX_FIELD_LEN + 1);
        assert!(matches!(
            validate_job_fields(&oversized),
            Err(SettlementError::InvalidField(_))
        ));

        let mut bad_attachment = binding();
        bad_attachment.attachment_hashes.push(String::new());
        assert!(validate_job_fields(&bad_attachment).is_err());
    }

    #[test]
    fn reject_reason_classification() {
        assert_eq!(
            classify_reject_reason("execution reverted: registry is paused"),
            RejectReason::Paused
        );
        assert_eq!(
            classify_reject_reason("execution reverted: capacity reached"),
            RejectReason::CapacityExceeded
        );
        assert_eq!(
            classify_reject_reason("execution reverted: caller is not owner"),
            RejectReason::NotOwner
        );
        assert_eq!(
            classify_reject_reason("execution reverted: duplicate content key"),
            RejectReason::DuplicateKey
        );
        assert!(matches!(
            classify_reject_reason("execution reverted: something else"),
            RejectReason::Other(_)
        ));
    }

    #[test]
    fn submit_error_classification() {
        assert!(matches!(
            classify_submit_error("server returned an error response: execution reverted: paused"),
            SettlementError::Rejected {
                reason: RejectReason::Paused
            }
        ));
        assert!(matches!(
            classify_submit_error("error sending request: dns error"),
            SettlementError::Unavailable(_)
        ));
    }
}
