// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Turns evaluation results into HTTP responses.

use super::error::ApiError;
use super::types::{ResponseV1, TraceEventV1};
use crate::ast::Var;
use crate::interpreter::QueryResult;
use crate::trace::{self, Event, Explain};
use crate::value::Value;

use std::collections::BTreeMap;

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Serialize `body` as JSON, indented when `pretty` is set.
pub fn json<T: Serialize>(status: StatusCode, body: &T, pretty: bool) -> Response {
    let bytes = match pretty {
        true => serde_json::to_vec_pretty(body),
        false => serde_json::to_vec(body),
    };
    match bytes {
        Ok(mut bytes) => {
            if pretty {
                bytes.push(b'\n');
            }
            (status, [(header::CONTENT_TYPE, "application/json")], bytes).into_response()
        }
        Err(e) => ApiError::Internal(format!("cannot serialize response: {e}")).into_response(),
    }
}

/// Events to report for the requested explain mode.
pub fn explanation(explain: Explain, events: Vec<Event>) -> Option<Vec<Event>> {
    match explain {
        Explain::Off => None,
        Explain::Full => Some(events),
        Explain::Truth => Some(trace::truth(&events)),
    }
}

fn render(events: &Option<Vec<Event>>) -> Option<Vec<TraceEventV1<'_>>> {
    events
        .as_ref()
        .map(|events| events.iter().map(TraceEventV1::new).collect())
}

#[derive(Serialize)]
#[serde(untagged)]
enum DataResult<'a> {
    Value(&'a Value),
    Bindings(Vec<(&'a Value, &'a BTreeMap<Var, Value>)>),
}

/// Respond to a query of the virtual document.
///
/// Undefined documents are a 404, with a body only when an explanation
/// was requested. Results that carry no bindings collapse to the single
/// value; otherwise every `[value, bindings]` pair is returned.
pub fn data_response(results: &[QueryResult], events: Option<Vec<Event>>, pretty: bool) -> Response {
    let explanation = render(&events);
    let result = match results {
        [] => {
            return match explanation {
                Some(explanation) => {
                    let body: ResponseV1<'_, ()> = ResponseV1 {
                        result: None,
                        explanation: Some(explanation),
                    };
                    json(StatusCode::NOT_FOUND, &body, pretty)
                }
                None => StatusCode::NOT_FOUND.into_response(),
            };
        }
        [first, ..] if results.iter().all(|r| r.bindings.is_empty()) => {
            DataResult::Value(&first.value)
        }
        _ => DataResult::Bindings(results.iter().map(|r| (&r.value, &r.bindings)).collect()),
    };
    let body = ResponseV1 {
        result: Some(result),
        explanation,
    };
    json(StatusCode::OK, &body, pretty)
}

/// Respond to an ad-hoc query with one binding map per solution.
pub fn query_response(results: &[QueryResult], events: Option<Vec<Event>>, pretty: bool) -> Response {
    let explanation = render(&events);
    if results.is_empty() {
        return match explanation {
            Some(explanation) => {
                let body: ResponseV1<'_, ()> = ResponseV1 {
                    result: None,
                    explanation: Some(explanation),
                };
                json(StatusCode::NOT_FOUND, &body, pretty)
            }
            None => StatusCode::NOT_FOUND.into_response(),
        };
    }
    let body = ResponseV1 {
        result: Some(results.iter().map(|r| &r.bindings).collect::<Vec<_>>()),
        explanation,
    };
    json(StatusCode::OK, &body, pretty)
}
