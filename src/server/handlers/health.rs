// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use super::query::run_query;
use crate::server::shaper;
use crate::server::AppState;
use crate::trace::Explain;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Response;
use serde_json::json;

/// Liveness check: `200 {}` once a trivial query evaluates.
pub async fn health(State(state): State<AppState>) -> Response {
    let status = match run_query(&state, "true = true", Explain::Off).await {
        Ok(evaluation) if !evaluation.results.is_empty() => StatusCode::OK,
        Ok(_) => StatusCode::INTERNAL_SERVER_ERROR,
        Err(e) => {
            tracing::warn!(error = %e, "health check query failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    shaper::json(status, &json!({}), false)
}
