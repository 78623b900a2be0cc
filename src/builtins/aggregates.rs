// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::builtins::utils::{ensure_args_count, ensure_collection, ensure_numeric};
use crate::builtins::Builtin;
use crate::lexer::Span;
use crate::number::Number;
use crate::value::Value;

use std::collections::HashMap;

use anyhow::{bail, Result};

pub fn register(m: &mut HashMap<&'static str, Builtin>) {
    for (name, func) in [
        ("count", count as crate::builtins::BuiltinFcn),
        ("max", max),
        ("min", min),
        ("sum", sum),
    ] {
        m.insert(
            name,
            Builtin {
                func,
                inputs: 1,
                output: true,
            },
        );
    }
}

fn count(span: &Span, args: &[Value]) -> Result<Value> {
    ensure_args_count(span, "count", args, 1)?;

    Ok(Value::from(match &args[0] {
        Value::Array(a) => a.len(),
        Value::Set(a) => a.len(),
        Value::Object(a) => a.len(),
        Value::String(a) => a.chars().count(),
        a => bail!(
            "{}",
            span.message(
                "error",
                &format!("`count` requires array/object/set/string argument. Got `{a}`.")
            )
        ),
    }))
}

fn max(span: &Span, args: &[Value]) -> Result<Value> {
    ensure_args_count(span, "max", args, 1)?;

    Ok(ensure_collection(span, "max", &args[0])?
        .max()
        .cloned()
        .unwrap_or(Value::Undefined))
}

fn min(span: &Span, args: &[Value]) -> Result<Value> {
    ensure_args_count(span, "min", args, 1)?;

    Ok(ensure_collection(span, "min", &args[0])?
        .min()
        .cloned()
        .unwrap_or(Value::Undefined))
}

fn sum(span: &Span, args: &[Value]) -> Result<Value> {
    ensure_args_count(span, "sum", args, 1)?;

    let mut total = Number::UInt(0);
    for v in ensure_collection(span, "sum", &args[0])? {
        total = total.add(&ensure_numeric(span, "sum", v)?);
    }
    Ok(Value::from(total))
}
