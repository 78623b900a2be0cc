// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::server::error::{ApiError, ApiResult};
use crate::server::shaper;
use crate::server::types::ResponseV1;
use crate::server::AppState;
use crate::storage::{Path as DataPath, TxnParams};

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};

pub async fn list_policies(State(state): State<AppState>) -> ApiResult<Response> {
    let modules = state.policies.list();
    Ok(shaper::json(StatusCode::OK, &ResponseV1::result(modules), false))
}

/// `GET /policies/<id>` returns the parsed module; `GET /policies/<id>/raw`
/// returns its source text unchanged.
pub async fn get_policy(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    if let Some(id) = id.strip_suffix("/raw") {
        let raw = state.policies.get_raw(id)?;
        return Ok((
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            raw.to_string(),
        )
            .into_response());
    }
    let module = state.policies.get(&id)?;
    Ok(shaper::json(StatusCode::OK, &ResponseV1::result(module), false))
}

pub async fn put_policy(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: String,
) -> ApiResult<Response> {
    if id.is_empty() {
        return Err(ApiError::InvalidParameter("missing policy id".to_string()));
    }
    if id.ends_with("/raw") {
        return Err(ApiError::InvalidParameter(format!(
            "invalid policy id {id}: ids may not end in /raw"
        )));
    }

    // The root lease keeps data writes out until the new rules are published.
    let txn = state.store.begin(TxnParams::write(DataPath::root())).await?;
    let module = state.policies.put_checked(&id, &body, |path| {
        Ok(state.store.non_empty(&txn, &DataPath::new(path))?)
    });
    state.store.abort(txn);

    let module = module?;
    Ok(shaper::json(StatusCode::OK, &ResponseV1::result(module), false))
}

pub async fn delete_policy(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    state.policies.delete(&id)?;
    Ok(StatusCode::NO_CONTENT.into_response())
}
