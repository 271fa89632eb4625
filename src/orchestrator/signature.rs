// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Consent signature verification.
//!
//! The signed message is exactly the request id string, wrapped in the
//! EIP-191 personal-sign envelope by the owner's wallet. Binding the
//! signature to the opaque id alone keeps it replay-proof across requests
//! and immune to field-reordering or encoding drift in the content binding.
//!
//! Verification is pure and identical for every identity; there is no
//! service-side bypass.

use alloy::primitives::{Address, Signature};

#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    /// Input is not a well-formed 65-byte hex signature
    #[error("malformed signature: {0}")]
    Malformed(String),

    /// Well-formed bytes that do not recover to any address
    #[error("signature recovery failed: {0}")]
    Recovery(String),
}

/// Recover the address that personal-signed `request_id`.
pub fn recover_signer(request_id: &str, signature_hex: &str) -> Result<Address, SignatureError> {
    let trimmed = signature_hex.trim().trim_start_matches("0x");
    let bytes = alloy::hex::decode(trimmed).map_err(|e| SignatureError::Malformed(e.to_string()))?;
    if bytes.len() != 65 {
        return Err(SignatureError::Malformed(format!(
            "expected 65 signature bytes, got {}",
            bytes.len()
        )));
    }

    let signature =
        Signature::from_raw(&bytes).map_err(|e| SignatureError::Malformed(e.to_string()))?;
    signature
        .recover_address_from_msg(request_id.as_bytes())
        .map_err(|e| SignatureError::Recovery(e.to_string()))
}

/// Whether `signature_hex` proves control of `owner` for this request.
pub fn matches_owner(
    request_id: &str,
    owner: Address,
    signature_hex: &str,
) -> Result<bool, SignatureError> {
    let recovered = recover_signer(request_id, signature_hex)?;
    Ok(recovered == owner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::signers::{local::PrivateKeySigner, SignerSync};

    fn sign(signer: &PrivateKeySigner, request_id: &str) -> String {
        let sig = signer.sign_message_sync(request_id.as_bytes()).unwrap();
        format!("0x{}", alloy::hex::encode(sig.as_bytes()))
    }

    #[test]
    fn recovers_the_signing_address() {
        let signer = PrivateKeySigner::random();
        let request_id = "7b0a2e44-9c46-4d4f-9ccd-1a5d508e2c0f";
        let sig_hex = sign(&signer, request_id);

        let recovered = recover_signer(request_id, &sig_hex).unwrap();
        assert_eq!(recovered, signer.address());
        assert!(matches_owner(request_id, signer.address(), &sig_hex).unwrap());

        // Prefix is optional
        let unprefixed = sig_hex.trim_start_matches("0x");
        assert!(matches_owner(request_id, signer.address(), unprefixed).unwrap());
    }

    #[test]
    fn rejects_a_different_identity() {
        let signer = PrivateKeySigner::random();
        let other = PrivateKeySigner::random();
        let request_id = "5b39c2a1-1111-4222-8333-94445a6b7c8d";
        let sig_hex = sign(&signer, request_id);

        assert!(!matches_owner(request_id, other.address(), &sig_hex).unwrap());
    }

    #[test]
    fn signature_is_bound_to_one_request() {
        let signer = PrivateKeySigner::random();
        let sig_for_a = sign(&signer, "request-a");

        // Valid for A, meaningless for B
        assert!(matches_owner("request-a", signer.address(), &sig_for_a).unwrap());
        assert!(!matches_owner("request-b", signer.address(), &sig_for_a).unwrap());
    }

    #[test]
    fn malformed_signatures_are_errors_not_mismatches() {
        let signer = PrivateKeySigner::random();
        assert!(matches!(
            matches_owner("id", signer.address(), "0x1234"),
            Err(SignatureError::Malformed(_))
        ));
        assert!(matches!(
            matches_owner("id", signer.address(), "zz"),
            Err(SignatureError::Malformed(_))
        ));
        assert!(matches!(
            matches_owner("id", signer.address(), ""),
            Err(SignatureError::Malformed(_))
        ));
    }
}
