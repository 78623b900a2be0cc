// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

pub mod aggregates;
pub mod comparison;
pub mod numbers;
pub mod utils;

use crate::lexer::Span;
use crate::value::Value;

use std::collections::HashMap;

use anyhow::Result;
use lazy_static::lazy_static;

/// Computes a builtin from its input arguments. Returning `Value::Undefined`
/// makes the calling expression undefined.
pub type BuiltinFcn = fn(&Span, &[Value]) -> Result<Value>;

#[derive(Clone, Copy)]
pub struct Builtin {
    pub func: BuiltinFcn,
    /// Number of input arguments.
    pub inputs: usize,
    /// Whether the call takes a trailing output argument that is unified
    /// with the result. Builtins without one succeed when they yield `true`.
    pub output: bool,
}

impl Builtin {
    pub fn arity(&self) -> usize {
        self.inputs + usize::from(self.output)
    }
}

#[rustfmt::skip]
lazy_static! {
    pub static ref BUILTINS: HashMap<&'static str, Builtin> = {
	let mut m : HashMap<&'static str, Builtin>  = HashMap::new();

	comparison::register(&mut m);
	aggregates::register(&mut m);
	numbers::register(&mut m);

	m
    };
}

pub fn lookup(name: &str) -> Option<&'static Builtin> {
    BUILTINS.get(name)
}
