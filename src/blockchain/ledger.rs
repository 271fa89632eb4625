// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Relational Credits ledger client.
//!
//! The ledger contract tracks pre-funded credit balances per owner. The
//! orchestrator charges it exactly once per authorized request through
//! [`CreditLedger::debit`]; an outcome that times out before confirmation is
//! reported as [`LedgerError::Unconfirmed`] and must be resolved through
//! [`CreditLedger::check_debit`], never by calling `debit` again.

use std::time::Duration;

use alloy::{
    primitives::{Address, B256, U256},
    providers::Provider,
    sol,
};
use async_trait::async_trait;

use super::client::{ChainClient, ChainClientError, HttpSignerProvider};

sol! {
    #[sol(rpc)]
    interface ICreditLedger {
        function balanceOf(address account) external view returns (uint256);
        function isRegistered(address account) external view returns (bool);
        function debit(address account, uint256 amount) external returns (uint256);

        event Debited(address indexed account, uint256 amount, uint256 newBalance);
    }
}

/// Confirmed ledger debit.
#[derive(Debug, Clone)]
pub struct DebitConfirmation {
    /// Ledger transaction hash (0x prefixed)
    pub tx_hash: String,
    /// Balance after the debit, in credit units
    pub new_balance: String,
}

/// Outcome of probing a previously broadcast debit transaction.
#[derive(Debug, Clone)]
pub enum DebitProbe {
    /// The debit landed and executed successfully
    Confirmed(DebitConfirmation),
    /// The debit was included but reverted; no credits moved
    Reverted,
    /// No receipt yet; try again later
    Unknown,
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("owner {0} is not registered with the credit ledger")]
    NotRegistered(String),

    #[error("insufficient credit balance: have {balance}, need {required}")]
    InsufficientBalance { balance: String, required: u64 },

    #[error("debit broadcast but unconfirmed: {tx_hash}")]
    Unconfirmed { tx_hash: String },

    #[error("credit ledger unavailable: {0}")]
    Unavailable(String),
}

/// Charge interface the orchestrator runs against.
///
/// Implementations must initiate at most one remote debit per `debit` call
/// and must never retry internally once a transaction has been broadcast.
#[async_trait]
pub trait CreditLedger: Send + Sync {
    /// Debit `amount` credit units from `owner`.
    async fn debit(&self, owner: Address, amount: u64) -> Result<DebitConfirmation, LedgerError>;

    /// Resolve a previously broadcast debit by transaction hash.
    async fn check_debit(&self, owner: Address, tx_hash: &str) -> Result<DebitProbe, LedgerError>;
}

/// EVM credit ledger backed by the on-chain contract.
pub struct EvmCreditLedger {
    contract: ICreditLedger::ICreditLedgerInstance<HttpSignerProvider>,
    confirm_timeout: Duration,
}

impl EvmCreditLedger {
    /// Bind the ledger contract at `ledger_address` to the operator-signed client.
    pub fn new(
        client: &ChainClient,
        ledger_address: Address,
        confirm_timeout: Duration,
    ) -> Result<Self, ChainClientError> {
        let contract = ICreditLedger::new(ledger_address, client.provider().clone());
        Ok(Self {
            contract,
            confirm_timeout,
        })
    }

    async fn balance_of(&self, owner: Address) -> Result<U256, LedgerError> {
        self.contract
            .balanceOf(owner)
            .call()
            .await
            .map_err(|e| LedgerError::Unavailable(e.to_string()))
    }
}

#[async_trait]
impl CreditLedger for EvmCreditLedger {
    async fn debit(&self, owner: Address, amount: u64) -> Result<DebitConfirmation, LedgerError> {
        let registered: bool = self
            .contract
            .isRegistered(owner)
            .call()
            .await
            .map_err(|e| LedgerError::Unavailable(e.to_string()))?;
        if !registered {
            return Err(LedgerError::NotRegistered(format!("{owner:#x}")));
        }

        let required = U256::from(amount);
        let balance = self.balance_of(owner).await?;
        if balance < required {
            return Err(LedgerError::InsufficientBalance {
                balance: balance.to_string(),
                required: amount,
            });
        }

        // Anything failing before broadcast means no debit happened; a race
        // that reverts the charge between our balance check and execution is
        // still reported as a definitive failure.
        let pending = self
            .contract
            .debit(owner, required)
            .send()
            .await
            .map_err(|e| classify_debit_send_error(amount, &e.to_string()))?;

        let tx_hash = format!("{:#x}", pending.tx_hash());

        let receipt = pending
            .with_timeout(Some(self.confirm_timeout))
            .get_receipt()
            .await;

        match receipt {
            Ok(r) if r.status() => {
                // Prefer the authoritative post-debit balance; fall back to
                // the locally computed one if the view call flakes out.
                let new_balance = match self.balance_of(owner).await {
                    Ok(b) => b.to_string(),
                    Err(e) => {
                        tracing::warn!(
                            tx_hash = %tx_hash,
                            error = %e,
                            "Balance read after confirmed debit failed"
                        );
                        (balance - required).to_string()
                    }
                };
                Ok(DebitConfirmation {
                    tx_hash,
                    new_balance,
                })
            }
            Ok(_) => {
                // Included but reverted: no credits moved.
                let current = self.balance_of(owner).await?;
                if current < required {
                    Err(LedgerError::InsufficientBalance {
                        balance: current.to_string(),
                        required: amount,
                    })
                } else {
                    Err(LedgerError::Unavailable(format!(
                        "debit transaction {tx_hash} reverted"
                    )))
                }
            }
            Err(e) => {
                tracing::warn!(
                    tx_hash = %tx_hash,
                    error = %e,
                    "Debit confirmation timed out"
                );
                Err(LedgerError::Unconfirmed { tx_hash })
            }
        }
    }

    async fn check_debit(&self, owner: Address, tx_hash: &str) -> Result<DebitProbe, LedgerError> {
        let hash: B256 = tx_hash
            .parse()
            .map_err(|_| LedgerError::Unavailable(format!("malformed debit tx hash {tx_hash}")))?;

        let receipt = self
            .contract
            .provider()
            .get_transaction_receipt(hash)
            .await
            .map_err(|e| LedgerError::Unavailable(e.to_string()))?;

        match receipt {
            Some(r) if r.status() => match self.balance_of(owner).await {
                Ok(balance) => Ok(DebitProbe::Confirmed(DebitConfirmation {
                    tx_hash: tx_hash.to_string(),
                    new_balance: balance.to_string(),
                })),
                // Receipt confirmed but balance unreadable; report unknown so
                // reconciliation retries with a working RPC.
                Err(_) => Ok(DebitProbe::Unknown),
            },
            Some(_) => Ok(DebitProbe::Reverted),
            None => Ok(DebitProbe::Unknown),
        }
    }
}

/// Classify a failure from broadcasting the debit call.
///
/// Nothing was broadcast when `send` errors (gas estimation simulates the
/// call first), so these are all definitive for this attempt.
fn classify_debit_send_error(required: u64, message: &str) -> LedgerError {
    let lower = message.to_lowercase();
    if lower.contains("insufficient") {
        LedgerError::InsufficientBalance {
            balance: "unknown".to_string(),
            required,
        }
    } else if lower.contains("not registered") {
        LedgerError::NotRegistered("reported by ledger".to_string())
    } else {
        LedgerError::Unavailable(message.to_string())
    }
}
