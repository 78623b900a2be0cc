// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Transactional storage for base documents.
//!
//! A [`Store`] hands out [`Transaction`]s. Readers see a consistent snapshot
//! of the data tree; writers additionally hold a lease on the path they
//! intend to modify so that writers on overlapping paths are serialized while
//! writers on disjoint subtrees proceed concurrently.

pub mod inmem;

pub use inmem::InMemoryStore;

use crate::value::{array_index, Value};

use core::fmt;
use core::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("storage_not_found_error: {0}: document does not exist")]
    NotFound(Path),

    #[error("storage_invalid_patch_error: {0}")]
    InvalidPatch(String),

    #[error("write conflict: {0}")]
    WriteConflict(Path),

    #[error("bad patch operation: {0}")]
    BadPatchOperation(String),

    #[error("bad patch path: {0}")]
    BadPatchPath(String),

    #[error("storage_internal_error: {0}")]
    Internal(String),
}

/// A sequence of string segments addressing a node of the data tree.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Path(Vec<Arc<str>>);

impl Path {
    pub fn root() -> Path {
        Path(vec![])
    }

    pub fn new<S: AsRef<str>>(segments: &[S]) -> Path {
        Path(segments.iter().map(|s| s.as_ref().into()).collect())
    }

    /// Parse a URL tail such as `a/b/c`. Empty segments are ignored so that
    /// `/data/` and `/data` both address the root.
    pub fn from_url(tail: &str) -> Path {
        Path(
            tail.split('/')
                .filter(|s| !s.is_empty())
                .map(|s| s.into())
                .collect(),
        )
    }

    /// Parse a patch path. Segments are separated by `/`, `/` alone is the
    /// root and `-` may only appear last, where it means "append".
    pub fn from_patch(path: &str) -> Result<Path, StorageError> {
        let parsed = Path::from_url(path);
        match parsed.0.split_last() {
            Some((_, init)) if init.iter().any(|s| s.as_ref() == "-") => {
                Err(StorageError::BadPatchPath(path.to_string()))
            }
            _ => Ok(parsed),
        }
    }

    pub fn segments(&self) -> &[Arc<str>] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn last(&self) -> Option<&str> {
        self.0.last().map(|s| s.as_ref())
    }

    pub fn parent(&self) -> Option<Path> {
        match self.0.split_last() {
            Some((_, rest)) => Some(Path(rest.to_vec())),
            None => None,
        }
    }

    pub fn join(&self, other: &Path) -> Path {
        let mut segments = self.0.clone();
        segments.extend(other.0.iter().cloned());
        Path(segments)
    }

    pub fn child(&self, segment: &str) -> Path {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Path(segments)
    }

    /// The path truncated to its first `n` segments.
    pub fn prefix(&self, n: usize) -> Path {
        Path(self.0[..n.min(self.0.len())].to_vec())
    }

    pub fn is_prefix_of(&self, other: &Path) -> bool {
        other.0.len() >= self.0.len() && other.0[..self.0.len()] == self.0[..]
    }

    /// Two paths overlap when one is a prefix of the other.
    pub fn overlaps(&self, other: &Path) -> bool {
        self.is_prefix_of(other) || other.is_prefix_of(self)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("/");
        }
        for s in &self.0 {
            write!(f, "/{s}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOp {
    Add,
    Remove,
    Replace,
}

impl FromStr for PatchOp {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "add" => Ok(PatchOp::Add),
            "remove" => Ok(PatchOp::Remove),
            "replace" => Ok(PatchOp::Replace),
            _ => Err(StorageError::BadPatchOperation(s.to_string())),
        }
    }
}

impl fmt::Display for PatchOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PatchOp::Add => "add",
            PatchOp::Remove => "remove",
            PatchOp::Replace => "replace",
        })
    }
}

#[derive(Debug, Clone)]
pub struct TxnParams {
    pub write: bool,
    /// Subtree a write transaction may modify.
    pub path: Path,
}

impl TxnParams {
    pub fn read() -> TxnParams {
        TxnParams {
            write: false,
            path: Path::root(),
        }
    }

    pub fn write(path: Path) -> TxnParams {
        TxnParams { write: true, path }
    }
}

#[derive(Debug, Clone)]
enum LogEntry {
    Patch(PatchOp, Path, Value),
    MakeDir(Path),
}

/// A unit of work against a store. Dropping a transaction without
/// committing it discards its writes and releases its lease.
pub struct Transaction {
    id: u64,
    params: TxnParams,
    root: Value,
    log: Vec<LogEntry>,
    lease: Option<Box<dyn Send + Sync>>,
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("write", &self.params.write)
            .field("path", &self.params.path.to_string())
            .field("log", &self.log.len())
            .finish()
    }
}

impl Transaction {
    pub(crate) fn new(
        id: u64,
        params: TxnParams,
        root: Value,
        lease: Option<Box<dyn Send + Sync>>,
    ) -> Transaction {
        Transaction {
            id,
            params,
            root,
            log: vec![],
            lease,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_write(&self) -> bool {
        self.params.write
    }

    pub fn path(&self) -> &Path {
        &self.params.path
    }

    pub fn is_dirty(&self) -> bool {
        !self.log.is_empty()
    }

    /// The transaction's view of the whole data tree.
    pub fn root(&self) -> &Value {
        &self.root
    }

    fn check_writable(&self, path: &Path) -> Result<(), StorageError> {
        if !self.params.write {
            return Err(StorageError::Internal(format!(
                "transaction {} is read-only",
                self.id
            )));
        }
        if !self.params.path.is_prefix_of(path) {
            return Err(StorageError::Internal(format!(
                "write to {path} is outside of transaction scope {}",
                self.params.path
            )));
        }
        Ok(())
    }

    pub(crate) fn read(&self, path: &Path) -> Result<Value, StorageError> {
        self.root
            .get_path(path.segments())
            .cloned()
            .ok_or_else(|| StorageError::NotFound(path.clone()))
    }

    pub(crate) fn patch(
        &mut self,
        op: PatchOp,
        path: &Path,
        value: Value,
    ) -> Result<(), StorageError> {
        self.check_writable(path)?;
        apply_patch(&mut self.root, op, path, value.clone())?;
        self.log.push(LogEntry::Patch(op, path.clone(), value));
        Ok(())
    }

    pub(crate) fn make_dir(&mut self, path: &Path) -> Result<(), StorageError> {
        if !self.params.write {
            return Err(StorageError::Internal(format!(
                "transaction {} is read-only",
                self.id
            )));
        }
        // Creating ancestors of the leased path only ever adds empty
        // objects, which commutes with other writers.
        if !path.overlaps(&self.params.path) {
            return Err(StorageError::Internal(format!(
                "write to {path} is outside of transaction scope {}",
                self.params.path
            )));
        }
        make_dir(&mut self.root, path)?;
        self.log.push(LogEntry::MakeDir(path.clone()));
        Ok(())
    }

    /// Replay the transaction's writes onto `root`.
    pub(crate) fn replay(&self, root: &mut Value) -> Result<(), StorageError> {
        for entry in &self.log {
            match entry {
                LogEntry::Patch(op, path, value) => apply_patch(root, *op, path, value.clone())?,
                LogEntry::MakeDir(path) => make_dir(root, path)?,
            }
        }
        Ok(())
    }

    pub(crate) fn release(&mut self) {
        self.lease = None;
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Start a transaction. Write transactions wait until no other writer
    /// holds an overlapping path.
    async fn begin(&self, params: TxnParams) -> Result<Transaction, StorageError>;

    fn read(&self, txn: &Transaction, path: &Path) -> Result<Value, StorageError>;

    fn write(
        &self,
        txn: &mut Transaction,
        op: PatchOp,
        path: &Path,
        value: Value,
    ) -> Result<(), StorageError>;

    /// Create every missing object along `path`. Existing non-object
    /// values on the way are a write conflict.
    fn make_dir(&self, txn: &mut Transaction, path: &Path) -> Result<(), StorageError>;

    fn commit(&self, txn: Transaction) -> Result<(), StorageError>;

    fn abort(&self, txn: Transaction);

    /// Whether a rule defined at `path` would hide base data: either a
    /// value exists at `path` or its closest existing ancestor is not an
    /// object.
    fn non_empty(&self, txn: &Transaction, path: &Path) -> Result<bool, StorageError> {
        match self.read(txn, path) {
            Ok(_) => return Ok(true),
            Err(StorageError::NotFound(_)) => (),
            Err(e) => return Err(e),
        }
        for n in (1..path.len()).rev() {
            match self.read(txn, &path.prefix(n)) {
                Ok(value) => return Ok(!value.is_object()),
                Err(StorageError::NotFound(_)) => (),
                Err(e) => return Err(e),
            }
        }
        Ok(false)
    }
}

fn segment_index(path: &Path, segment: &str, len: usize) -> Result<usize, StorageError> {
    match array_index(segment) {
        Some(i) if i < len => Ok(i),
        Some(_) => Err(StorageError::NotFound(path.clone())),
        None => Err(StorageError::InvalidPatch(format!(
            "{path}: array index must be integer"
        ))),
    }
}

/// Apply a single patch operation to a data tree.
pub fn apply_patch(
    root: &mut Value,
    op: PatchOp,
    path: &Path,
    value: Value,
) -> Result<(), StorageError> {
    let Some((last, parent)) = path.segments().split_last() else {
        return match op {
            PatchOp::Remove => Err(StorageError::InvalidPatch(
                "root cannot be removed".to_string(),
            )),
            PatchOp::Add | PatchOp::Replace => {
                if !value.is_object() {
                    return Err(StorageError::InvalidPatch(
                        "root must be object".to_string(),
                    ));
                }
                *root = value;
                Ok(())
            }
        };
    };

    let node = root
        .get_path_mut(parent)
        .ok_or_else(|| StorageError::NotFound(path.clone()))?;
    let key = Value::from(last.as_ref());

    match node {
        Value::Object(fields) => {
            let fields = Arc::make_mut(fields);
            match op {
                PatchOp::Add => {
                    fields.insert(key, value);
                }
                PatchOp::Replace => match fields.get_mut(&key) {
                    Some(v) => *v = value,
                    None => return Err(StorageError::NotFound(path.clone())),
                },
                PatchOp::Remove => {
                    if fields.remove(&key).is_none() {
                        return Err(StorageError::NotFound(path.clone()));
                    }
                }
            }
        }
        Value::Array(items) => {
            let items = Arc::make_mut(items);
            match op {
                PatchOp::Add if last.as_ref() == "-" => items.push(value),
                PatchOp::Add => {
                    let idx = segment_index(path, last, items.len() + 1)?;
                    items.insert(idx, value);
                }
                PatchOp::Replace => {
                    let idx = segment_index(path, last, items.len())?;
                    items[idx] = value;
                }
                PatchOp::Remove => {
                    let idx = segment_index(path, last, items.len())?;
                    items.remove(idx);
                }
            }
        }
        _ => return Err(StorageError::NotFound(path.clone())),
    }
    Ok(())
}

/// Ensure that every node along `path` exists and is an object.
pub fn make_dir(root: &mut Value, path: &Path) -> Result<(), StorageError> {
    let mut node = root;
    for (i, segment) in path.segments().iter().enumerate() {
        let Value::Object(fields) = node else {
            return Err(StorageError::WriteConflict(path.prefix(i)));
        };
        node = Arc::make_mut(fields)
            .entry(Value::from(segment.as_ref()))
            .or_insert_with(Value::new_object);
    }
    match node {
        Value::Object(_) => Ok(()),
        _ => Err(StorageError::WriteConflict(path.clone())),
    }
}
