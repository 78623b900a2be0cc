// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use super::{evaluate, Params};
use crate::compiler::{Compiled, Compiler};
use crate::interpreter::RootQuery;
use crate::server::error::{ApiError, ApiResult};
use crate::server::input::{describe_json_error, parse_body_input, parse_input_params, InputError};
use crate::server::routing::{check_write, classify};
use crate::server::shaper;
use crate::server::types::MSG_COMPILE_INPUT;
use crate::server::AppState;
use crate::storage::{PatchOp, Path, StorageError, Store, Transaction, TxnParams};
use crate::value::Value;

use axum::body::Bytes;
use axum::extract::{self, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;

fn data_path(path: Option<extract::Path<String>>) -> Path {
    path.map(|p| Path::from_url(&p.0)).unwrap_or_default()
}

async fn read_data(
    state: AppState,
    path: Path,
    params: Params,
    body_input: Option<Value>,
) -> ApiResult<Response> {
    let template = parse_input_params(&params.input)?;
    if template.is_some() && body_input.is_some() {
        return Err(InputError::Conflict.into());
    }

    let snapshot = state.policies.snapshot();
    let route = classify(snapshot.compiled(), &path);
    tracing::debug!(%path, ?route, "query data");

    let template = match template {
        Some(term) => Some(Compiler::new().compile_input(&term).map_err(|e| {
            ApiError::Compile {
                message: MSG_COMPILE_INPUT,
                errors: e.0,
            }
        })?),
        None => None,
    };
    let query = RootQuery::data(path.segments(), template)
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let evaluation = evaluate(&state, snapshot, query, body_input, params.explain).await?;
    Ok(shaper::data_response(
        &evaluation.results,
        evaluation.events,
        params.pretty,
    ))
}

pub async fn get_data(
    State(state): State<AppState>,
    path: Option<extract::Path<String>>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> ApiResult<Response> {
    read_data(state, data_path(path), Params::from_pairs(pairs), None).await
}

pub async fn post_data(
    State(state): State<AppState>,
    path: Option<extract::Path<String>>,
    Query(pairs): Query<Vec<(String, String)>>,
    body: Bytes,
) -> ApiResult<Response> {
    let input = parse_body_input(&body)?;
    read_data(state, data_path(path), Params::from_pairs(pairs), input).await
}

fn parse_json<T: DeserializeOwned>(body: &[u8]) -> ApiResult<T> {
    let text = String::from_utf8_lossy(body);
    serde_json::from_str(&text).map_err(|e| {
        ApiError::InvalidParameter(format!(
            "body contains malformed JSON: {}",
            describe_json_error(&text, &e)
        ))
    })
}

// Run `f` in a write transaction on `path`, committing on success. `f` sees
// the policy snapshot current once the write lease is held.
async fn write_txn<F>(state: &AppState, path: &Path, f: F) -> ApiResult<StatusCode>
where
    F: FnOnce(&Compiled, &dyn Store, &mut Transaction) -> ApiResult<StatusCode>,
{
    let mut txn = state.store.begin(TxnParams::write(path.clone())).await?;
    let snapshot = state.policies.snapshot();
    match f(snapshot.compiled(), state.store.as_ref(), &mut txn) {
        Ok(status) if status == StatusCode::NOT_MODIFIED => {
            state.store.abort(txn);
            Ok(status)
        }
        Ok(status) => {
            state.store.commit(txn)?;
            Ok(status)
        }
        Err(e) => {
            tracing::warn!(%path, error = %e, "aborting write transaction");
            state.store.abort(txn);
            Err(e)
        }
    }
}

pub async fn put_data(
    State(state): State<AppState>,
    path: Option<extract::Path<String>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    let path = data_path(path);
    let value: Value = parse_json(&body)?;
    let if_none_match = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim() == "*")
        .unwrap_or(false);

    let status = write_txn(&state, &path, |compiled, store, txn| {
        check_write(compiled, &path)?;
        let exists = match store.read(txn, &path) {
            Ok(_) => true,
            Err(StorageError::NotFound(_)) => false,
            Err(e) => return Err(e.into()),
        };
        if exists && if_none_match {
            return Ok(StatusCode::NOT_MODIFIED);
        }
        if exists || path.is_root() {
            store.write(txn, PatchOp::Replace, &path, value)?;
        } else {
            if let Some(parent) = path.parent() {
                store.make_dir(txn, &parent)?;
            }
            store.write(txn, PatchOp::Add, &path, value)?;
        }
        Ok(StatusCode::NO_CONTENT)
    })
    .await?;
    Ok(status.into_response())
}

#[derive(Debug, Deserialize)]
struct PatchV1 {
    op: String,
    path: String,
    #[serde(default)]
    value: Option<Value>,
}

pub async fn patch_data(
    State(state): State<AppState>,
    path: Option<extract::Path<String>>,
    body: Bytes,
) -> ApiResult<Response> {
    let root = data_path(path);
    let patches: Vec<PatchV1> = parse_json(&body)?;

    let mut ops = Vec::with_capacity(patches.len());
    for patch in patches {
        let op: PatchOp = patch.op.parse()?;
        let path = root.join(&Path::from_patch(&patch.path)?);
        ops.push((op, path, patch.value.unwrap_or(Value::Null)));
    }

    let status = write_txn(&state, &root, |compiled, store, txn| {
        for (op, path, value) in ops {
            check_write(compiled, &path)?;
            store.write(txn, op, &path, value)?;
        }
        Ok(StatusCode::NO_CONTENT)
    })
    .await?;
    Ok(status.into_response())
}

pub async fn delete_data(
    State(state): State<AppState>,
    path: Option<extract::Path<String>>,
) -> ApiResult<Response> {
    let path = data_path(path);
    let status = write_txn(&state, &path, |compiled, store, txn| {
        check_write(compiled, &path)?;
        store.read(txn, &path)?;
        store.write(txn, PatchOp::Remove, &path, Value::Null)?;
        Ok(StatusCode::NO_CONTENT)
    })
    .await?;
    Ok(status.into_response())
}
