// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::ast::{Module, Ref, Var};
use crate::compiler::{CompileError, Compiled, Compiler};
use crate::parser::parse_module;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path as FsPath, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

/// An installed policy module.
#[derive(Debug, Clone, Serialize)]
pub struct PolicyModule {
    pub id: String,
    pub revision: u64,
    pub module: Ref<Module>,
    #[serde(skip)]
    pub raw: Arc<str>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum PolicyError {
    #[error("error(s) occurred while parsing module(s)")]
    Parse(Vec<CompileError>),

    #[error("error(s) occurred while compiling module(s)")]
    Compile(Vec<CompileError>),

    #[error("policy module {0} not found")]
    NotFound(String),

    #[error("invalid policy id {id}: {reason}")]
    InvalidId { id: String, reason: &'static str },

    #[error("{0}")]
    Persist(String),
}

/// The installed modules together with the result of compiling them.
/// Snapshots are immutable; changes publish a new one.
#[derive(Debug, Default)]
pub struct Snapshot {
    modules: BTreeMap<String, PolicyModule>,
    compiled: Compiled,
    revision: u64,
}

impl Snapshot {
    pub fn compiled(&self) -> &Compiled {
        &self.compiled
    }

    pub fn modules(&self) -> impl Iterator<Item = &PolicyModule> {
        self.modules.values()
    }

    pub fn get(&self, id: &str) -> Option<&PolicyModule> {
        self.modules.get(id)
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }
}

struct PolicyDir {
    root: PathBuf,
}

impl PolicyDir {
    /// The file holding module `id`. Ids must name a single plain file
    /// inside the directory.
    fn file(&self, id: &str) -> Result<PathBuf, PolicyError> {
        let mut components = FsPath::new(id).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(name)), None) if !id.starts_with('.') && name == id => {
                Ok(self.root.join(format!("{id}.rego")))
            }
            _ => Err(PolicyError::InvalidId {
                id: id.to_string(),
                reason: "persisted ids must be plain file names",
            }),
        }
    }

    fn write(&self, id: &str, source: &str) -> Result<(), PolicyError> {
        let file = self.file(id)?;
        fs::create_dir_all(&self.root)
            .and_then(|_| fs::write(&file, source))
            .map_err(|e| PolicyError::Persist(format!("writing policy {id}: {e}")))
    }

    fn remove(&self, id: &str) -> Result<(), PolicyError> {
        match fs::remove_file(self.file(id)?) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                Err(PolicyError::Persist(format!("removing policy {id}: {e}")))
            }
            _ => Ok(()),
        }
    }

    // Module sources found in the directory, ordered by id.
    fn load(&self) -> Result<Vec<(String, String)>> {
        let mut sources = vec![];
        if !self.root.exists() {
            return Ok(sources);
        }
        let entries = fs::read_dir(&self.root)
            .with_context(|| format!("reading policy directory {}", self.root.display()))?;
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("rego") {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let source = fs::read_to_string(&path)
                .with_context(|| format!("reading policy {}", path.display()))?;
            sources.push((id.to_string(), source));
        }
        sources.sort();
        Ok(sources)
    }
}

/// Owns the installed policy modules and their compiled form.
///
/// Readers clone the current snapshot handle and evaluate against it
/// without holding any lock. Writers serialize on a mutex, compile the
/// candidate module set and publish it only when compilation succeeds.
pub struct PolicyManager {
    current: RwLock<Arc<Snapshot>>,
    writer: Mutex<()>,
    dir: Option<PolicyDir>,
    persist: bool,
}

impl Default for PolicyManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyManager {
    pub fn new() -> PolicyManager {
        PolicyManager {
            current: RwLock::new(Arc::new(Snapshot::default())),
            writer: Mutex::new(()),
            dir: None,
            persist: false,
        }
    }

    /// Create a manager whose modules are loaded from `dir` (when given).
    /// With `persist` set, installed and removed modules are written back.
    pub fn open(dir: Option<&FsPath>, persist: bool) -> Result<PolicyManager> {
        let mut manager = PolicyManager::new();
        manager.persist = persist;
        manager.dir = dir.map(|d| PolicyDir {
            root: d.to_path_buf(),
        });

        let sources = match &manager.dir {
            Some(dir) => dir.load()?,
            None => vec![],
        };
        if !sources.is_empty() {
            let _guard = manager.writer.lock();
            let mut modules = BTreeMap::new();
            for (id, source) in sources {
                let module = parse_module(&id, &source)
                    .with_context(|| format!("parsing policy {id}"))?;
                modules.insert(id.clone(), (Arc::<str>::from(source), Ref::new(module)));
            }
            let compiled = Compiler::new()
                .compile_modules(&modules.iter().map(|(id, (_, m))| (id.clone(), m.clone())).collect())
                .context("compiling stored policies")?;
            let snapshot = Snapshot {
                modules: modules
                    .into_iter()
                    .map(|(id, (raw, module))| {
                        let entry = PolicyModule {
                            id: id.clone(),
                            revision: 1,
                            module,
                            raw,
                        };
                        (id, entry)
                    })
                    .collect(),
                compiled,
                revision: 1,
            };
            tracing::info!(modules = snapshot.modules.len(), "loaded stored policies");
            *manager.current.write() = Arc::new(snapshot);
        }
        Ok(manager)
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.current.read().clone()
    }

    pub fn list(&self) -> Vec<PolicyModule> {
        self.snapshot().modules().cloned().collect()
    }

    pub fn get(&self, id: &str) -> Result<PolicyModule, PolicyError> {
        self.snapshot()
            .get(id)
            .cloned()
            .ok_or_else(|| PolicyError::NotFound(id.to_string()))
    }

    pub fn get_raw(&self, id: &str) -> Result<Arc<str>, PolicyError> {
        self.get(id).map(|m| m.raw)
    }

    fn persist_dir(&self) -> Result<Option<&PolicyDir>, PolicyError> {
        match (self.persist, &self.dir) {
            (false, _) => Ok(None),
            (true, Some(dir)) => Ok(Some(dir)),
            (true, None) => Err(PolicyError::Persist(
                "cannot persist without --policy-dir set".to_string(),
            )),
        }
    }

    fn compile(modules: &BTreeMap<String, PolicyModule>) -> Result<Compiled, PolicyError> {
        let set: BTreeMap<String, Ref<Module>> = modules
            .iter()
            .map(|(id, m)| (id.clone(), m.module.clone()))
            .collect();
        Compiler::new()
            .compile_modules(&set)
            .map_err(|e| PolicyError::Compile(e.0))
    }

    /// Install or replace the module `id`. Nothing changes unless the new
    /// module parses and the whole module set compiles.
    pub fn put(&self, id: &str, source: &str) -> Result<PolicyModule, PolicyError> {
        self.put_checked(id, source, |_| Ok(false))
    }

    /// Like [`PolicyManager::put`], but the module set is also rejected when
    /// `occupied` reports base data at the path of one of its rules.
    pub fn put_checked<F>(
        &self,
        id: &str,
        source: &str,
        occupied: F,
    ) -> Result<PolicyModule, PolicyError>
    where
        F: FnMut(&[Var]) -> anyhow::Result<bool>,
    {
        let _guard = self.writer.lock();
        let current = self.snapshot();

        let module = parse_module(id, source)
            .map_err(|e| PolicyError::Parse(vec![CompileError::from_parse(&e)]))?;
        let revision = current.revision + 1;
        let entry = PolicyModule {
            id: id.to_string(),
            revision,
            module: Ref::new(module),
            raw: source.into(),
        };

        let mut modules = current.modules.clone();
        modules.insert(id.to_string(), entry.clone());
        let compiled = Self::compile(&modules)?;
        let conflicts = compiled.path_conflicts(occupied);
        if !conflicts.is_empty() {
            return Err(PolicyError::Compile(conflicts));
        }

        if let Some(dir) = self.persist_dir()? {
            dir.write(id, source)?;
        }

        *self.current.write() = Arc::new(Snapshot {
            modules,
            compiled,
            revision,
        });
        tracing::info!(id, revision, "installed policy");
        Ok(entry)
    }

    pub fn delete(&self, id: &str) -> Result<(), PolicyError> {
        let _guard = self.writer.lock();
        let current = self.snapshot();
        if !current.modules.contains_key(id) {
            return Err(PolicyError::NotFound(id.to_string()));
        }

        let mut modules = current.modules.clone();
        modules.remove(id);
        let compiled = Self::compile(&modules)?;

        if let Some(dir) = self.persist_dir()? {
            dir.remove(id)?;
        }

        let revision = current.revision + 1;
        *self.current.write() = Arc::new(Snapshot {
            modules,
            compiled,
            revision,
        });
        tracing::info!(id, revision, "removed policy");
        Ok(())
    }
}
