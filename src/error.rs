// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::orchestrator::OrchestratorError;
use crate::storage::request_db::RequestDbError;
use crate::storage::requests::RequestStatus;

/// API-facing error: HTTP status, message, and (where known) the request's
/// authoritative lifecycle status, so a caller that retried a call it thought
/// failed can see whether it actually completed.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub request_status: Option<RequestStatus>,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<RequestStatus>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            request_status: None,
        }
    }

    pub fn with_request_status(mut self, request_status: RequestStatus) -> Self {
        self.request_status = Some(request_status);
        self
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn unprocessable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, message)
    }

    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        let message = err.to_string();
        match err {
            OrchestratorError::Validation(_) => Self::bad_request(message),
            OrchestratorError::NotFound => Self::not_found("Authorization request not found"),
            OrchestratorError::Unauthorized => Self::forbidden(message),
            OrchestratorError::AlreadyFinalized { status, .. } => {
                Self::conflict(message).with_request_status(status)
            }
            OrchestratorError::Expired => {
                Self::conflict(message).with_request_status(RequestStatus::Expired)
            }
            OrchestratorError::AuthorizationInFlight => {
                Self::conflict(message).with_request_status(RequestStatus::Authorized)
            }
            // These refusals cancelled the request before surfacing
            OrchestratorError::InsufficientBalance { .. } | OrchestratorError::NotRegistered => {
                Self::unprocessable(message).with_request_status(RequestStatus::Cancelled)
            }
            // All of these arise only after the pending -> authorized
            // transition, so the authoritative status is known
            OrchestratorError::SettlementRejected { .. }
            | OrchestratorError::SettlementUnconfirmed { .. }
            | OrchestratorError::DebitUnconfirmed { .. }
            | OrchestratorError::LedgerUnavailable(_)
            | OrchestratorError::RegistryUnavailable(_) => {
                Self::bad_gateway(message).with_request_status(RequestStatus::Authorized)
            }
            OrchestratorError::Store(RequestDbError::NotFound(_)) => {
                Self::not_found("Authorization request not found")
            }
            OrchestratorError::Store(_) => Self::service_unavailable(message),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
            status: self.request_status,
        });
        (self.status, body).into_response()
    }
}
