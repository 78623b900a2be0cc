// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::builtins::utils::{ensure_args_count, ensure_numeric};
use crate::builtins::{Builtin, BuiltinFcn};
use crate::lexer::Span;
use crate::number::Number;
use crate::value::Value;

use core::str::FromStr;
use std::collections::HashMap;

use anyhow::{bail, Result};

pub fn register(m: &mut HashMap<&'static str, Builtin>) {
    let binary: [(&'static str, BuiltinFcn); 4] =
        [("plus", plus), ("minus", minus), ("mul", mul), ("div", div)];
    for (name, func) in binary {
        m.insert(
            name,
            Builtin {
                func,
                inputs: 2,
                output: true,
            },
        );
    }
    m.insert(
        "to_number",
        Builtin {
            func: to_number,
            inputs: 1,
            output: true,
        },
    );
}

fn operands(span: &Span, fcn: &'static str, args: &[Value]) -> Result<(Number, Number)> {
    ensure_args_count(span, fcn, args, 2)?;
    Ok((
        ensure_numeric(span, fcn, &args[0])?,
        ensure_numeric(span, fcn, &args[1])?,
    ))
}

fn plus(span: &Span, args: &[Value]) -> Result<Value> {
    let (a, b) = operands(span, "plus", args)?;
    Ok(Value::from(a.add(&b)))
}

fn minus(span: &Span, args: &[Value]) -> Result<Value> {
    let (a, b) = operands(span, "minus", args)?;
    Ok(Value::from(a.sub(&b)))
}

fn mul(span: &Span, args: &[Value]) -> Result<Value> {
    let (a, b) = operands(span, "mul", args)?;
    Ok(Value::from(a.mul(&b)))
}

fn div(span: &Span, args: &[Value]) -> Result<Value> {
    let (a, b) = operands(span, "div", args)?;
    match a.divide(&b) {
        Ok(n) => Ok(Value::from(n)),
        Err(e) => bail!("{}", span.message("error", &format!("`div` failed: {e}"))),
    }
}

fn to_number(span: &Span, args: &[Value]) -> Result<Value> {
    ensure_args_count(span, "to_number", args, 1)?;

    Ok(match &args[0] {
        Value::Null => Value::from(0u64),
        Value::Bool(b) => Value::from(u64::from(*b)),
        Value::Number(n) => Value::from(*n),
        Value::String(s) => match Number::from_str(s) {
            Ok(n) => Value::from(n),
            Err(_) => bail!(
                "{}",
                span.message("error", &format!("`to_number` cannot convert `{s}`"))
            ),
        },
        v => bail!(
            "{}",
            span.message(
                "error",
                &format!("`to_number` expects null/bool/number/string argument. Got `{v}`.")
            )
        ),
    })
}
