// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

// Use README.md as crate documentation.
#![doc = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/README.md"))]

mod ast;
mod builtins;
pub mod compiler;
pub mod config;
pub mod interpreter;
mod lexer;
mod number;
mod parser;
pub mod policy;
pub mod server;
pub mod storage;
pub mod trace;
mod value;

pub use compiler::{CompileError, Compiler};
pub use interpreter::{EvalError, Evaluator, QueryResult, RootQuery};
pub use policy::{PolicyError, PolicyManager};
pub use server::{router, AppState, Server};
pub use storage::{InMemoryStore, Store};
pub use value::Value;

/// Items in `unstable` are likely to change.
pub mod unstable {
    pub use crate::ast::*;
    pub use crate::lexer::*;
    pub use crate::number::Number;
    pub use crate::parser::*;
}
