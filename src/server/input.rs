// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Parsing of the input document supplied with a data request.
//!
//! URL parameters use the form `[[<path>]:]<value>`. The path is either a
//! variable naming a top level key or a reference such as `a.b["c"]`; the
//! value is a JSON literal or a policy term that may reference `data`.

use crate::ast::Term;
use crate::lexer::Span;
use crate::parser::parse_term;
use crate::value::Value;

use std::collections::BTreeMap;

use serde::Deserialize;

const SOURCE: &str = "input";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InputError {
    #[error("input parameter format is [[<path>]:]<value> where <path> is either var or ref")]
    Format,

    #[error("query already defines input document")]
    Conflict,

    #[error("body contains malformed input document: {0}")]
    MalformedBody(String),
}

// Input document under construction.
enum Doc {
    Term(Term),
    Object(Span, BTreeMap<String, Doc>),
}

impl Doc {
    fn from_term(term: Term) -> Doc {
        if let Term::Object { span, fields } = &term {
            let mut object = BTreeMap::new();
            for (k, v) in fields {
                match k {
                    Term::Scalar {
                        value: Value::String(s),
                        ..
                    } => {
                        object.insert(s.to_string(), Doc::from_term(v.clone()));
                    }
                    _ => return Doc::Term(term),
                }
            }
            return Doc::Object(span.clone(), object);
        }
        Doc::Term(term)
    }

    fn insert(&mut self, path: &[String], value: Term) {
        let Some((first, rest)) = path.split_first() else {
            *self = Doc::from_term(value);
            return;
        };
        if !matches!(self, Doc::Object(..)) {
            *self = Doc::Object(value.span().clone(), BTreeMap::new());
        }
        if let Doc::Object(span, object) = self {
            let span = span.clone();
            object
                .entry(first.clone())
                .or_insert_with(|| Doc::Object(span, BTreeMap::new()))
                .insert(rest, value);
        }
    }

    fn into_term(self) -> Term {
        match self {
            Doc::Term(t) => t,
            Doc::Object(span, object) => Term::Object {
                fields: object
                    .into_iter()
                    .map(|(k, v)| (Term::scalar(span.clone(), Value::from(k)), v.into_term()))
                    .collect(),
                span,
            },
        }
    }
}

// Split at the first `:` outside of strings and brackets.
fn split_param(param: &str) -> (Option<&str>, &str) {
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in param.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => (),
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '[' | '{' | '(' => depth += 1,
            ']' | '}' | ')' => depth -= 1,
            ':' if depth == 0 => return (Some(&param[..i]), &param[i + 1..]),
            _ => (),
        }
    }
    (None, param)
}

fn parse_path(path: &str) -> Result<Vec<String>, InputError> {
    let term = parse_term(SOURCE, path.trim()).map_err(|_| InputError::Format)?;
    match term {
        Term::Var { name, .. } => Ok(vec![name.to_string()]),
        Term::Ref { head, path, .. } => {
            let mut segments = vec![head.to_string()];
            for t in path {
                match t {
                    Term::Scalar {
                        value: Value::String(s),
                        ..
                    } => segments.push(s.to_string()),
                    _ => return Err(InputError::Format),
                }
            }
            Ok(segments)
        }
        _ => Err(InputError::Format),
    }
}

/// Combine the values of all `input` URL parameters into one input
/// document. Returns `None` when no parameter was given.
pub fn parse_input_params(params: &[String]) -> Result<Option<Term>, InputError> {
    let mut doc: Option<Doc> = None;
    for param in params {
        let (path, value) = split_param(param);
        let path = match path {
            Some(p) if p.trim().is_empty() => return Err(InputError::Format),
            Some(p) => parse_path(p)?,
            None => vec![],
        };
        if value.trim().is_empty() {
            return Err(InputError::Format);
        }
        let value = parse_term(SOURCE, value.trim()).map_err(|_| InputError::Format)?;

        match &mut doc {
            Some(d) => d.insert(&path, value),
            None => {
                let mut d = Doc::Object(value.span().clone(), BTreeMap::new());
                d.insert(&path, value);
                doc = Some(d);
            }
        }
    }
    Ok(doc.map(Doc::into_term))
}

#[derive(Debug, Default, Deserialize)]
struct DataRequestV1 {
    #[serde(default)]
    input: Option<Value>,
}

/// Describe a JSON syntax error the way clients of the service expect,
/// e.g. `invalid character '@' looking for beginning of value`.
pub fn describe_json_error(body: &str, err: &serde_json::Error) -> String {
    if err.is_eof() {
        return "unexpected end of JSON input".to_string();
    }
    let found = body
        .lines()
        .nth(err.line().saturating_sub(1))
        .and_then(|line| {
            let col = err.column().saturating_sub(1);
            line.get(col..)
                .and_then(|s| s.chars().next())
                .filter(|c| !c.is_whitespace())
                .or_else(|| line.get(col + 1..).and_then(|s| s.chars().next()))
        });
    match found {
        Some(c) if err.is_syntax() && err.to_string().starts_with("expected value") => {
            format!("invalid character '{c}' looking for beginning of value")
        }
        Some(c) if err.is_syntax() => format!("invalid character '{c}'"),
        _ => err.to_string(),
    }
}

/// Parse the body of a `POST /data` request. An empty body has no input.
pub fn parse_body_input(body: &[u8]) -> Result<Option<Value>, InputError> {
    let text = String::from_utf8_lossy(body);
    if text.trim().is_empty() {
        return Ok(None);
    }
    match serde_json::from_str::<DataRequestV1>(&text) {
        Ok(request) => Ok(request.input),
        Err(e) => Err(InputError::MalformedBody(describe_json_error(&text, &e))),
    }
}
