// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use super::{evaluate, Evaluation, Params};
use crate::compiler::{CompileError, Compiler};
use crate::interpreter::RootQuery;
use crate::parser::parse_query;
use crate::server::error::{ApiError, ApiResult};
use crate::server::shaper;
use crate::server::types::{MSG_COMPILE_QUERY, MSG_PARSE_QUERY};
use crate::server::AppState;
use crate::trace::Explain;

use axum::extract::{Query, State};
use axum::response::Response;

/// Parse, compile and evaluate the ad-hoc query `q`.
pub(crate) async fn run_query(state: &AppState, q: &str, explain: Explain) -> ApiResult<Evaluation> {
    let parsed = parse_query("query", q).map_err(|e| ApiError::Compile {
        message: MSG_PARSE_QUERY,
        errors: vec![CompileError::from_parse(&e)],
    })?;
    let compiled = Compiler::new()
        .compile_query(&parsed)
        .map_err(|e| ApiError::Compile {
            message: MSG_COMPILE_QUERY,
            errors: e.0,
        })?;
    let root = RootQuery::query(compiled).map_err(|e| ApiError::Internal(e.to_string()))?;
    tracing::debug!(query = q, "ad-hoc query");

    let snapshot = state.policies.snapshot();
    evaluate(state, snapshot, root, None, explain).await
}

/// `GET /query?q=<body>` evaluates an ad-hoc query and reports the
/// bindings of its variables.
pub async fn query(
    State(state): State<AppState>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> ApiResult<Response> {
    let params = Params::from_pairs(pairs);
    let Some(q) = params.q.as_deref() else {
        return Err(ApiError::InvalidParameter("missing parameter 'q'".to_string()));
    };

    let evaluation = run_query(&state, q, params.explain).await?;
    Ok(shaper::query_response(
        &evaluation.results,
        evaluation.events,
        params.pretty,
    ))
}
