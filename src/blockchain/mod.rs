// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Blockchain integration module for Avalanche C-Chain.
//!
//! This module provides functionality for:
//! - Debiting the Relational Credits ledger contract
//! - Minting data-wallet records on the registry contract
//! - Operator-signed transaction broadcasting and confirmation

pub mod client;
pub mod ledger;
pub mod registry;
pub mod types;

pub use client::{parse_address, ChainClient, ChainClientError};
pub use ledger::{CreditLedger, DebitConfirmation, DebitProbe, EvmCreditLedger, LedgerError};
pub use registry::{
    derive_content_key, EvmSettlementSubmitter, RejectReason, SettlementError, SettlementJob,
    SettlementSubmitter,
};
pub use types::*;
