// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    state::AppState,
    storage::requests::{
        AuthorizationRequest, ContentBinding, DebitRecord, RequestStatus, SettlementRecord,
    },
};

use health::{HealthChecks, HealthResponse, ReadyResponse};
use requests::{AuthorizePayload, CreateRequestPayload, CreatedResponse};

pub mod health;
pub mod requests;

pub fn router(state: AppState) -> Router {
    let v1_routes = Router::new()
        .route(
            "/requests",
            get(requests::list_pending_requests).post(requests::create_request),
        )
        .route("/requests/{request_id}", get(requests::get_request))
        .route(
            "/requests/{request_id}/authorize",
            post(requests::authorize_request),
        )
        .route(
            "/requests/{request_id}/cancel",
            post(requests::cancel_request),
        )
        .route(
            "/requests/{request_id}/reconcile",
            post(requests::reconcile_request),
        )
        .with_state(state.clone());

    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .with_state(state);

    // Request ids are attached before the trace layer so spans carry them,
    // and propagated back after it so responses do too.
    Router::new()
        .nest("/v1", v1_routes)
        .merge(health_routes)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(CorsLayer::permissive()),
        )
}

#[derive(OpenApi)]
#[openapi(
    paths(
        requests::create_request,
        requests::list_pending_requests,
        requests::get_request,
        requests::authorize_request,
        requests::cancel_request,
        requests::reconcile_request,
        health::health,
        health::liveness,
        health::readiness
    ),
    components(
        schemas(
            AuthorizationRequest,
            ContentBinding,
            DebitRecord,
            SettlementRecord,
            RequestStatus,
            CreateRequestPayload,
            AuthorizePayload,
            CreatedResponse,
            ReadyResponse,
            HealthChecks,
            HealthResponse
        )
    ),
    tags(
        (name = "Requests", description = "Authorization request lifecycle"),
        (name = "Health", description = "Service health probes")
    )
)]
struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::AVAX_FUJI;
    use crate::orchestrator::testing::harness;

    #[tokio::test]
    async fn router_builds_with_all_routes() {
        let h = harness();
        let state = AppState::new(h.orchestrator.clone(), h.db.clone(), &AVAX_FUJI);
        let app = router(state);
        // Ensure the router can be converted into a service without panicking.
        let _ = app.into_make_service();
    }
}
