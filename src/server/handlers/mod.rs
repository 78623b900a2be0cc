// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

mod data;
mod health;
mod index;
mod policies;
mod query;

pub use data::{delete_data, get_data, patch_data, post_data, put_data};
pub use health::health;
pub use index::index;
pub use policies::{delete_policy, get_policy, list_policies, put_policy};
pub use query::query;

use super::error::{ApiError, ApiResult};
use super::AppState;
use crate::interpreter::{Evaluator, QueryResult, RootQuery};
use crate::policy::Snapshot;
use crate::storage::TxnParams;
use crate::trace::{Event, Explain};
use crate::value::Value;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Query string parameters shared by the read endpoints.
#[derive(Debug, Default)]
pub(crate) struct Params {
    pub input: Vec<String>,
    pub explain: Explain,
    pub pretty: bool,
    pub q: Option<String>,
}

impl Params {
    pub fn from_pairs(pairs: Vec<(String, String)>) -> Params {
        let mut params = Params::default();
        for (key, value) in pairs {
            match key.as_str() {
                "input" => params.input.push(value),
                "explain" => params.explain = Explain::from_param(Some(&value)),
                "pretty" => params.pretty = value.is_empty() || value.eq_ignore_ascii_case("true"),
                "q" => params.q = Some(value),
                _ => (),
            }
        }
        params
    }
}

// Signals a running evaluation to stop when the request is dropped.
struct CancelOnDrop(Arc<AtomicBool>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

pub(crate) struct Evaluation {
    pub results: Vec<QueryResult>,
    pub events: Option<Vec<Event>>,
}

/// Run `query` in a read transaction on the blocking pool.
pub(crate) async fn evaluate(
    state: &AppState,
    snapshot: Arc<Snapshot>,
    query: RootQuery,
    input: Option<Value>,
    explain: Explain,
) -> ApiResult<Evaluation> {
    let txn = state.store.begin(TxnParams::read()).await?;
    let cancel = CancelOnDrop(Arc::new(AtomicBool::new(false)));
    let flag = cancel.0.clone();
    let store = state.store.clone();

    let task = tokio::task::spawn_blocking(move || {
        let mut evaluator = Evaluator::new(snapshot.compiled(), store.as_ref(), &txn)
            .with_input(input.unwrap_or(Value::Undefined))
            .with_tracing(explain != Explain::Off)
            .with_cancel(flag);
        let results = evaluator.eval(&query);
        let events = evaluator.take_trace();
        drop(evaluator);
        store.abort(txn);
        (results, events)
    });

    let (results, events) = match task.await {
        Ok(r) => r,
        Err(e) if e.is_panic() => {
            tracing::warn!("evaluation panicked");
            return Err(ApiError::Internal("internal error during evaluation".to_string()));
        }
        Err(e) => return Err(ApiError::Internal(e.to_string())),
    };
    drop(cancel);

    Ok(Evaluation {
        results: results?,
        events: super::shaper::explanation(explain, events),
    })
}
