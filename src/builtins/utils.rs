// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::lexer::Span;
use crate::number::Number;
use crate::value::Value;

use anyhow::{bail, Result};

pub fn ensure_args_count(
    span: &Span,
    fcn: &'static str,
    args: &[Value],
    expected: usize,
) -> Result<()> {
    if args.len() != expected {
        if expected == 1 {
            bail!("{}", span.message("error", &format!("`{fcn}` expects 1 argument")))
        } else {
            bail!(
                "{}",
                span.message("error", &format!("`{fcn}` expects {expected} arguments"))
            )
        }
    }
    Ok(())
}

pub fn ensure_numeric(span: &Span, fcn: &str, v: &Value) -> Result<Number> {
    Ok(match &v {
        Value::Number(n) => *n,
        _ => bail!(
            "{}",
            span.message(
                "error",
                &format!("`{fcn}` expects numeric argument. Got `{v}` instead")
            )
        ),
    })
}

/// Iterate the members of an array or set.
pub fn ensure_collection<'a>(
    span: &Span,
    fcn: &str,
    v: &'a Value,
) -> Result<Box<dyn Iterator<Item = &'a Value> + 'a>> {
    Ok(match v {
        Value::Array(a) => Box::new(a.iter()),
        Value::Set(s) => Box::new(s.iter()),
        _ => bail!(
            "{}",
            span.message(
                "error",
                &format!("`{fcn}` requires array/set argument. Got `{v}`.")
            )
        ),
    })
}
