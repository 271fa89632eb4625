// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authorization request endpoints.
//!
//! Thin translation layer over [`crate::orchestrator::Orchestrator`]: handlers
//! decode the wire shapes, delegate, and map outcomes to HTTP. Every error
//! response that concerns a known request carries the request's current
//! status, so callers never have to guess what a conflict means.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::{
    error::ApiError,
    orchestrator::{CreatedRequest, OrchestratorError},
    state::AppState,
    storage::requests::{AuthorizationRequest, ContentBinding, RequestStatus},
};

/// Cap on pending-request listings per owner.
const PENDING_LIST_LIMIT: usize = 100;

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateRequestPayload {
    /// Address that must authorize the request (0x prefixed)
    pub owner_address: String,
    /// Normalized email summary produced by the upstream processor
    pub content: ContentBinding,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct AuthorizePayload {
    /// Address the signature is claimed to come from (0x prefixed)
    pub signer_address: String,
    /// 65-byte personal-sign signature over the request id, hex encoded
    pub signature: String,
}

/// Everything a caller needs to drive the authorization flow.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CreatedResponse {
    pub request_id: String,
    pub auth_token: String,
    pub owner_address: String,
    pub credit_cost: u64,
    pub status: RequestStatus,
    pub expires_at: DateTime<Utc>,
    /// Link the owner follows to review and sign the request
    pub authorization_reference: String,
}

impl From<CreatedRequest> for CreatedResponse {
    fn from(created: CreatedRequest) -> Self {
        Self {
            request_id: created.request.request_id,
            auth_token: created.request.auth_token,
            owner_address: created.request.owner_address,
            credit_cost: created.request.credit_cost,
            status: created.request.status,
            expires_at: created.request.expires_at,
            authorization_reference: created.authorization_reference,
        }
    }
}

#[derive(Deserialize, IntoParams)]
pub struct OwnerQuery {
    /// Owner address to list pending requests for (0x prefixed)
    pub owner: String,
}

#[utoipa::path(
    post,
    path = "/v1/requests",
    request_body = CreateRequestPayload,
    tag = "Requests",
    responses(
        (status = 201, description = "Request persisted, awaiting authorization", body = CreatedResponse),
        (status = 400, description = "Malformed owner address or content binding")
    )
)]
pub async fn create_request(
    State(state): State<AppState>,
    Json(payload): Json<CreateRequestPayload>,
) -> Result<(StatusCode, Json<CreatedResponse>), ApiError> {
    let created = state
        .orchestrator
        .create(&payload.owner_address, payload.content)?;
    Ok((StatusCode::CREATED, Json(created.into())))
}

#[utoipa::path(
    get,
    path = "/v1/requests",
    params(OwnerQuery),
    tag = "Requests",
    responses((status = 200, description = "Pending requests, newest first", body = [AuthorizationRequest]))
)]
pub async fn list_pending_requests(
    State(state): State<AppState>,
    Query(params): Query<OwnerQuery>,
) -> Result<Json<Vec<AuthorizationRequest>>, ApiError> {
    let requests = state
        .orchestrator
        .list_pending(&params.owner, PENDING_LIST_LIMIT)?;
    Ok(Json(requests))
}

#[utoipa::path(
    get,
    path = "/v1/requests/{request_id}",
    params(
        ("request_id" = String, Path, description = "Request id, or the auth token issued at creation")
    ),
    tag = "Requests",
    responses(
        (status = 200, body = AuthorizationRequest),
        (status = 404, description = "No request under either identifier")
    )
)]
pub async fn get_request(
    Path(request_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<AuthorizationRequest>, ApiError> {
    let request = state.orchestrator.get(&request_id)?;
    Ok(Json(request))
}

#[utoipa::path(
    post,
    path = "/v1/requests/{request_id}/authorize",
    params(
        ("request_id" = String, Path, description = "Request id the signature covers")
    ),
    request_body = AuthorizePayload,
    tag = "Requests",
    responses(
        (status = 200, description = "Settled now, or already settled by an earlier call", body = AuthorizationRequest),
        (status = 403, description = "Signature does not prove the owner"),
        (status = 409, description = "Request is not awaiting authorization"),
        (status = 422, description = "Debit refused; request cancelled"),
        (status = 502, description = "Settlement outcome unknown; reconcile later")
    )
)]
pub async fn authorize_request(
    Path(request_id): Path<String>,
    State(state): State<AppState>,
    Json(payload): Json<AuthorizePayload>,
) -> Result<Json<AuthorizationRequest>, ApiError> {
    match state
        .orchestrator
        .authorize(&request_id, &payload.signer_address, &payload.signature)
        .await
    {
        Ok(request) => Ok(Json(request)),
        // A repeat authorize of a settled request succeeds with the original
        // outcome; the caller cannot tell it was not first.
        Err(OrchestratorError::AlreadyFinalized {
            status: RequestStatus::Processed,
            ..
        }) => {
            let request = state.orchestrator.get(&request_id)?;
            Ok(Json(request))
        }
        Err(err) => Err(err.into()),
    }
}

#[utoipa::path(
    post,
    path = "/v1/requests/{request_id}/cancel",
    params(
        ("request_id" = String, Path, description = "Request id to cancel")
    ),
    tag = "Requests",
    responses(
        (status = 200, description = "Request cancelled", body = AuthorizationRequest),
        (status = 409, description = "Request already left the pending state")
    )
)]
pub async fn cancel_request(
    Path(request_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<AuthorizationRequest>, ApiError> {
    let request = state.orchestrator.cancel(&request_id)?;
    Ok(Json(request))
}

#[utoipa::path(
    post,
    path = "/v1/requests/{request_id}/reconcile",
    params(
        ("request_id" = String, Path, description = "Request id to reconcile")
    ),
    tag = "Requests",
    responses(
        (status = 200, description = "Request driven to its settled state", body = AuthorizationRequest),
        (status = 409, description = "Request is in a state reconciliation does not apply to"),
        (status = 502, description = "Chain state still unknown; try again later")
    )
)]
pub async fn reconcile_request(
    Path(request_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<AuthorizationRequest>, ApiError> {
    let request = state.orchestrator.reconcile(&request_id).await?;
    Ok(Json(request))
}
