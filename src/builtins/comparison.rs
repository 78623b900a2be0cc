// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::builtins::{Builtin, BuiltinFcn};
use crate::lexer::Span;
use crate::value::Value;

use std::collections::HashMap;

use anyhow::Result;

/// Values of different kinds are ordered null < bool < number < string <
/// array < set < object. The variants of `Value` are declared in that order,
/// so the derived ordering is used directly.
fn compare(op: fn(&Value, &Value) -> bool, args: &[Value]) -> Value {
    match args {
        [a, b] => Value::Bool(op(a, b)),
        _ => Value::Undefined,
    }
}

fn eq(_span: &Span, args: &[Value]) -> Result<Value> {
    Ok(compare(|a, b| a == b, args))
}

fn neq(_span: &Span, args: &[Value]) -> Result<Value> {
    Ok(compare(|a, b| a != b, args))
}

fn lt(_span: &Span, args: &[Value]) -> Result<Value> {
    Ok(compare(|a, b| a < b, args))
}

fn lte(_span: &Span, args: &[Value]) -> Result<Value> {
    Ok(compare(|a, b| a <= b, args))
}

fn gt(_span: &Span, args: &[Value]) -> Result<Value> {
    Ok(compare(|a, b| a > b, args))
}

fn gte(_span: &Span, args: &[Value]) -> Result<Value> {
    Ok(compare(|a, b| a >= b, args))
}

pub fn register(m: &mut HashMap<&'static str, Builtin>) {
    let ops: [(&'static str, BuiltinFcn); 6] = [
        ("eq", eq),
        ("neq", neq),
        ("lt", lt),
        ("lte", lte),
        ("gt", gt),
        ("gte", gte),
    ];
    for (name, func) in ops {
        m.insert(
            name,
            Builtin {
                func,
                inputs: 2,
                output: false,
            },
        );
    }
}
