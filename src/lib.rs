// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Relational Mailvault - Consent-Gated Email Data Wallet Service
//!
//! This crate persists email authorization requests, verifies owner consent
//! signatures, and settles each authorized request on Avalanche exactly once:
//! one credit-ledger debit, one data-wallet record mint.
//!
//! ## Modules
//!
//! - `api` - HTTP API handlers (Axum)
//! - `orchestrator` - Request lifecycle state machine and settlement driver
//! - `blockchain` - Avalanche C-Chain integration (credit ledger and registry)
//! - `storage` - Durable request store (redb)

pub mod api;
pub mod blockchain;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod state;
pub mod storage;
