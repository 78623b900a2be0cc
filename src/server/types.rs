// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Wire types of the v1 HTTP API.

use crate::ast::ValueTerm;
use crate::compiler::CompileError;
use crate::trace::{Event, Node, Op};

use serde::Serialize;

pub const CODE_INVALID_PARAMETER: &str = "invalid_parameter";
pub const CODE_RESOURCE_NOT_FOUND: &str = "resource_not_found";
pub const CODE_RESOURCE_CONFLICT: &str = "resource_conflict";
pub const CODE_EVALUATION: &str = "evaluation_error";
pub const CODE_INTERNAL: &str = "internal_error";

pub const MSG_COMPILE_MODULE: &str = "error(s) occurred while compiling module(s)";
pub const MSG_PARSE_MODULE: &str = "error(s) occurred while parsing module(s)";
pub const MSG_PARSE_QUERY: &str = "error(s) occurred while parsing query";
pub const MSG_COMPILE_QUERY: &str = "error(s) occurred while compiling query";
pub const MSG_COMPILE_INPUT: &str = "error(s) occurred while compiling input";
pub const MSG_EVAL: &str = "error(s) occurred while evaluating query";

#[derive(Debug, Clone, Serialize)]
pub struct EvalErrorV1 {
    pub code: &'static str,
    pub sub_code: u32,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ErrorDetailV1 {
    Ast(CompileError),
    Eval(EvalErrorV1),
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorV1 {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ErrorDetailV1>,
}

#[derive(Debug, Serialize)]
struct VarTermV1<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    value: &'a str,
}

#[derive(Serialize)]
pub struct LocalV1<'a> {
    key: VarTermV1<'a>,
    value: ValueTerm<'a>,
}

#[derive(Serialize)]
pub struct TraceEventV1<'a> {
    pub op: Op,
    pub query_id: u64,
    pub parent_id: u64,
    #[serde(rename = "type")]
    pub node_type: &'static str,
    pub node: &'a Node,
    pub locals: Vec<LocalV1<'a>>,
}

impl<'a> TraceEventV1<'a> {
    pub fn new(event: &'a Event) -> TraceEventV1<'a> {
        TraceEventV1 {
            op: event.op,
            query_id: event.query_id,
            parent_id: event.parent_id,
            node_type: event.node.type_name(),
            node: &event.node,
            locals: event
                .locals
                .iter()
                .map(|(k, v)| LocalV1 {
                    key: VarTermV1 {
                        kind: "var",
                        value: k,
                    },
                    value: ValueTerm(v),
                })
                .collect(),
        }
    }
}

/// Body of a successful data, policy or query response.
#[derive(Serialize)]
pub struct ResponseV1<'a, T: Serialize> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<Vec<TraceEventV1<'a>>>,
}

impl<T: Serialize> ResponseV1<'_, T> {
    pub fn result(result: T) -> Self {
        ResponseV1 {
            result: Some(result),
            explanation: None,
        }
    }
}
