// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Avalanche C-Chain client shared by the ledger and registry adapters.
//!
//! Both contract surfaces are driven by a single operator-signed provider:
//! views go through it unchanged, and state-changing calls are signed with
//! the service operator key.

use std::str::FromStr;

use alloy::{
    network::{Ethereum, EthereumWallet},
    primitives::Address,
    providers::{
        fillers::{
            BlobGasFiller, ChainIdFiller, FillProvider, GasFiller, JoinFill, NonceFiller,
            WalletFiller,
        },
        Identity, ProviderBuilder, RootProvider,
    },
    signers::local::PrivateKeySigner,
};

use super::types::NetworkConfig;

/// HTTP provider type with all fillers plus operator wallet signing.
pub type HttpSignerProvider = FillProvider<
    JoinFill<
        JoinFill<
            Identity,
            JoinFill<GasFiller, JoinFill<BlobGasFiller, JoinFill<NonceFiller, ChainIdFiller>>>,
        >,
        WalletFiller<EthereumWallet>,
    >,
    RootProvider<Ethereum>,
>;

/// Errors raised while constructing chain clients or parsing inputs.
#[derive(Debug, thiserror::Error)]
pub enum ChainClientError {
    #[error("Invalid RPC URL: {0}")]
    InvalidRpcUrl(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),
}

/// Avalanche C-Chain client bound to the service operator key.
pub struct ChainClient {
    /// Network configuration
    network: NetworkConfig,
    /// Alloy HTTP provider with wallet filler
    provider: HttpSignerProvider,
    /// Address derived from the operator key
    operator: Address,
}

impl ChainClient {
    /// Connect to `rpc_url` with transactions signed by `operator_key_hex`.
    pub fn connect(
        network: NetworkConfig,
        rpc_url: &str,
        operator_key_hex: &str,
    ) -> Result<Self, ChainClientError> {
        let url: url::Url = rpc_url
            .parse()
            .map_err(|e: url::ParseError| ChainClientError::InvalidRpcUrl(e.to_string()))?;

        let signer = create_signer(operator_key_hex)?;
        let operator = signer.address();
        let wallet = EthereumWallet::from(signer);
        let provider = ProviderBuilder::new().wallet(wallet).connect_http(url);

        Ok(Self {
            network,
            provider,
            operator,
        })
    }

    /// Get the underlying provider.
    pub fn provider(&self) -> &HttpSignerProvider {
        &self.provider
    }

    /// Get the network configuration.
    pub fn network(&self) -> &NetworkConfig {
        &self.network
    }

    /// Address the service signs settlement and debit transactions with.
    pub fn operator(&self) -> Address {
        self.operator
    }
}

/// Create a signer from a hex private key (with or without 0x prefix).
pub fn create_signer(private_key_hex: &str) -> Result<PrivateKeySigner, ChainClientError> {
    let trimmed = private_key_hex.trim().trim_start_matches("0x");
    let key_bytes = alloy::hex::decode(trimmed)
        .map_err(|e| ChainClientError::InvalidPrivateKey(e.to_string()))?;

    PrivateKeySigner::from_slice(&key_bytes)
        .map_err(|e| ChainClientError::InvalidPrivateKey(e.to_string()))
}

/// Parse and validate a 0x-prefixed EVM address.
pub fn parse_address(raw: &str) -> Result<Address, ChainClientError> {
    let s = raw.trim();
    if !s.starts_with("0x") || s.len() != 42 {
        return Err(ChainClientError::InvalidAddress(format!(
            "expected a 0x-prefixed 40-hex-char address, got `{s}`"
        )));
    }
    Address::from_str(s).map_err(|e| ChainClientError::InvalidAddress(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Well-known anvil development key, never funded anywhere that matters.
    const DEV_KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    #[test]
    fn signer_from_hex_key() {
        let signer = create_signer(DEV_KEY).unwrap();
        assert_eq!(
            format!("{:#x}", signer.address()),
            "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"
        );

        // 0x prefix accepted
        let prefixed = create_signer(&format!("0x{DEV_KEY}")).unwrap();
        assert_eq!(prefixed.address(), signer.address());
    }

    #[test]
    fn signer_rejects_malformed_key() {
        assert!(create_signer("not-hex").is_err());
        assert!(create_signer("abcd").is_err());
    }

    #[test]
    fn address_parsing() {
        assert!(parse_address("0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266").is_ok());
        assert!(parse_address("0x1234").is_err());
        assert!(parse_address("f39fd6e51aad88f6f4ce6ab8827279cfffb92266").is_err());
    }
}
