// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Environment variable names, default values, and the [`Settings`] loader
//! invoked once at startup.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `PUBLIC_BASE_URL` | Base URL embedded in authorization links | `http://localhost:8080` |
//! | `DATA_DIR` | Root directory for the request store | `/data` |
//! | `NETWORK` | Chain selection (`fuji` or `mainnet`) | `fuji` |
//! | `RPC_URL` | RPC endpoint override | network default |
//! | `OPERATOR_KEY` | Hex private key signing operator transactions | Required |
//! | `LEDGER_ADDRESS` | Credit ledger contract address | Required |
//! | `REGISTRY_ADDRESS` | Data-wallet registry contract address | Required |
//! | `REGISTRY_DEPLOY_BLOCK` | First block to scan for registry events | `0` |
//! | `AUTH_WINDOW_HOURS` | Authorization window for new requests | `24` |
//! | `SWEEP_INTERVAL_SECS` | Expiry sweeper interval | `3600` |
//! | `PRUNE_RETENTION_DAYS` | Terminal record retention before pruning | `90` |
//! | `CONFIRM_TIMEOUT_SECS` | Wait for on-chain confirmation per call | `45` |
//! | `FEE_BASE` | Base fee in credit units | `3` |
//! | `FEE_PER_ATTACHMENT` | Per-attachment fee in credit units | `2` |
//! | `FEE_RECORD` | Record fee in credit units | `1` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info` |

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::blockchain::{network_by_name, NetworkConfig};
use crate::orchestrator::FeeSchedule;

pub const HOST_ENV: &str = "HOST";
pub const PORT_ENV: &str = "PORT";
pub const PUBLIC_BASE_URL_ENV: &str = "PUBLIC_BASE_URL";
pub const DATA_DIR_ENV: &str = "DATA_DIR";
pub const NETWORK_ENV: &str = "NETWORK";
pub const RPC_URL_ENV: &str = "RPC_URL";
pub const OPERATOR_KEY_ENV: &str = "OPERATOR_KEY";
pub const LEDGER_ADDRESS_ENV: &str = "LEDGER_ADDRESS";
pub const REGISTRY_ADDRESS_ENV: &str = "REGISTRY_ADDRESS";
pub const REGISTRY_DEPLOY_BLOCK_ENV: &str = "REGISTRY_DEPLOY_BLOCK";
pub const AUTH_WINDOW_HOURS_ENV: &str = "AUTH_WINDOW_HOURS";
pub const SWEEP_INTERVAL_SECS_ENV: &str = "SWEEP_INTERVAL_SECS";
pub const PRUNE_RETENTION_DAYS_ENV: &str = "PRUNE_RETENTION_DAYS";
pub const CONFIRM_TIMEOUT_SECS_ENV: &str = "CONFIRM_TIMEOUT_SECS";
pub const FEE_BASE_ENV: &str = "FEE_BASE";
pub const FEE_PER_ATTACHMENT_ENV: &str = "FEE_PER_ATTACHMENT";
pub const FEE_RECORD_ENV: &str = "FEE_RECORD";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_PUBLIC_BASE_URL: &str = "http://localhost:8080";
pub const DEFAULT_DATA_DIR: &str = "/data";
pub const DEFAULT_NETWORK: &str = "fuji";
pub const DEFAULT_AUTH_WINDOW_HOURS: i64 = 24;
pub const DEFAULT_CONFIRM_TIMEOUT_SECS: u64 = 45;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Pretty,
        }
    }
}

/// Fully resolved runtime settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub public_base_url: String,
    pub data_dir: PathBuf,
    pub network: NetworkConfig,
    pub rpc_url: String,
    pub operator_key: String,
    pub ledger_address: String,
    pub registry_address: String,
    pub registry_deploy_block: u64,
    pub authorization_window: chrono::Duration,
    pub sweep_interval: std::time::Duration,
    pub prune_retention: chrono::Duration,
    pub confirm_timeout: std::time::Duration,
    pub fees: FeeSchedule,
    pub log_format: LogFormat,
}

impl Settings {
    /// Load settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let network = network_by_name(&env_or(NETWORK_ENV, DEFAULT_NETWORK))
            .map_err(|message| ConfigError::Invalid {
                name: NETWORK_ENV,
                value: message,
            })?;
        let rpc_url = env::var(RPC_URL_ENV).unwrap_or_else(|_| network.rpc_url.to_string());

        let default_fees = FeeSchedule::default();
        let fees = FeeSchedule {
            base_fee: parse_or(FEE_BASE_ENV, default_fees.base_fee)?,
            attachment_fee: parse_or(FEE_PER_ATTACHMENT_ENV, default_fees.attachment_fee)?,
            record_fee: parse_or(FEE_RECORD_ENV, default_fees.record_fee)?,
        };

        Ok(Self {
            host: env_or(HOST_ENV, DEFAULT_HOST),
            port: parse_or(PORT_ENV, DEFAULT_PORT)?,
            public_base_url: env_or(PUBLIC_BASE_URL_ENV, DEFAULT_PUBLIC_BASE_URL),
            data_dir: PathBuf::from(env_or(DATA_DIR_ENV, DEFAULT_DATA_DIR)),
            network,
            rpc_url,
            operator_key: required(OPERATOR_KEY_ENV)?,
            ledger_address: required(LEDGER_ADDRESS_ENV)?,
            registry_address: required(REGISTRY_ADDRESS_ENV)?,
            registry_deploy_block: parse_or(REGISTRY_DEPLOY_BLOCK_ENV, 0)?,
            authorization_window: chrono::Duration::hours(parse_or(
                AUTH_WINDOW_HOURS_ENV,
                DEFAULT_AUTH_WINDOW_HOURS,
            )?),
            sweep_interval: std::time::Duration::from_secs(parse_or(
                SWEEP_INTERVAL_SECS_ENV,
                crate::orchestrator::sweeper::DEFAULT_SWEEP_INTERVAL.as_secs(),
            )?),
            prune_retention: chrono::Duration::days(parse_or(
                PRUNE_RETENTION_DAYS_ENV,
                crate::orchestrator::sweeper::DEFAULT_RETENTION_DAYS,
            )?),
            confirm_timeout: std::time::Duration::from_secs(parse_or(
                CONFIRM_TIMEOUT_SECS_ENV,
                DEFAULT_CONFIRM_TIMEOUT_SECS,
            )?),
            fees,
            log_format: LogFormat::parse(&env_or(LOG_FORMAT_ENV, "pretty")),
        })
    }
}

fn env_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::Missing(name))
}

fn parse_or<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            name,
            value: raw,
        }),
        Err(_) => Ok(default),
    }
}
