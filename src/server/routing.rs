// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::compiler::Compiled;
use crate::storage::{Path, StorageError};

/// Where a path below `data` lives in the virtual document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Only base documents are reachable at the path.
    Base,
    /// The path names a rule or a package that contains rules.
    Virtual,
    /// The path descends into the document produced by `rule`.
    VirtualDescent { rule: Path },
}

pub fn classify(compiled: &Compiled, path: &Path) -> Route {
    let mut node = &compiled.tree;
    for (i, segment) in path.segments().iter().enumerate() {
        if node.has_rules() {
            return Route::VirtualDescent {
                rule: path.prefix(i),
            };
        }
        match node.children.get(segment.as_ref()) {
            Some(child) => node = child,
            None => return Route::Base,
        }
    }
    if node.has_rules() || !node.children.is_empty() {
        Route::Virtual
    } else {
        Route::Base
    }
}

/// Reject writes that would overlap the rule namespace.
pub fn check_write(compiled: &Compiled, path: &Path) -> Result<(), StorageError> {
    match compiled.conflicting_rule(path.segments()) {
        Some(rule) => Err(StorageError::WriteConflict(Path::new(&rule))),
        None => Ok(()),
    }
}
