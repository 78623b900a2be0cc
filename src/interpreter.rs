// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Top-down evaluation of compiled policies.
//!
//! Evaluation is written in continuation passing style: every step receives
//! a continuation that is invoked once per solution while the solution's
//! bindings are in place. Bindings are undone when the continuation returns,
//! which gives backtracking over all solutions.

use crate::ast::*;
use crate::builtins;
use crate::compiler::{is_evaluable, Compiled, CompiledQuery, InputTemplate, RuleTree};
use crate::lexer::{Source, Span};
use crate::storage::{Path, StorageError, Store, Transaction};
use crate::trace::{Event, Node, Op};
use crate::value::{array_index, Value};

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, thiserror::Error)]
pub enum EvalError {
    #[error("{path}: completely defined rules must produce exactly one value")]
    Conflict { path: String },

    #[error("{path}: partial rules must produce exactly one value per key")]
    ObjectConflict { path: String },

    #[error("{name}: {message}")]
    Builtin { name: String, message: String },

    #[error("undefined function {0}")]
    UnknownFunction(String),

    #[error("var {0} is unsafe")]
    UnsafeVar(String),

    #[error("{0}: rule is recursive")]
    Recursion(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("evaluation cancelled")]
    Cancelled,
}

impl EvalError {
    pub fn sub_code(&self) -> u32 {
        match self {
            EvalError::Conflict { .. } | EvalError::ObjectConflict { .. } => 1,
            EvalError::Builtin { .. } | EvalError::UnknownFunction(_) => 2,
            EvalError::UnsafeVar(_) | EvalError::Recursion(_) => 3,
            EvalError::Storage(_) => 4,
            EvalError::Cancelled => 5,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            EvalError::Conflict { .. } | EvalError::ObjectConflict { .. } => "eval_conflict_error",
            EvalError::Builtin { .. } | EvalError::UnknownFunction(_) => "eval_type_error",
            EvalError::UnsafeVar(_) | EvalError::Recursion(_) => "eval_internal_error",
            EvalError::Storage(_) => "eval_storage_error",
            EvalError::Cancelled => "eval_cancel_error",
        }
    }
}

type Cont<'k, 'a> = &'k mut dyn FnMut(&mut Evaluator<'a>) -> Result<(), EvalError>;
type ValueCont<'k, 'a> = &'k mut dyn FnMut(&mut Evaluator<'a>, Value) -> Result<(), EvalError>;
type ValuesCont<'k, 'a> = &'k mut dyn FnMut(&mut Evaluator<'a>, &[Value]) -> Result<(), EvalError>;

/// One solution of a query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    /// Value of the queried document. Undefined for ad-hoc queries.
    pub value: Value,
    pub bindings: BTreeMap<Var, Value>,
}

/// A query ready to run at the root of evaluation.
///
/// The body's first `input_at` expressions compute the bindings for the
/// input template. The remaining expressions run with the plugged template
/// as their input document.
#[derive(Debug, Clone)]
pub struct RootQuery {
    body: Ref<Query>,
    input_at: usize,
    input: Option<Term>,
    result: Option<Var>,
    vars: Vec<Var>,
}

const RESULT_VAR: &str = "$result";

fn query_span(text: &str) -> anyhow::Result<Span> {
    let source = Source::from_contents("query".to_string(), text.to_string())?;
    Ok(Span {
        source,
        line: 1,
        col: 1,
        start: 0,
        end: text.len() as u32,
    })
}

fn reindexed(exprs: impl Iterator<Item = Ref<Expr>>) -> Vec<Ref<Expr>> {
    exprs
        .enumerate()
        .map(|(index, e)| {
            Ref::new(Expr {
                index,
                ..e.as_ref().clone()
            })
        })
        .collect()
}

impl RootQuery {
    /// Query the document at `path` below `data`.
    pub fn data<S: AsRef<str>>(
        path: &[S],
        input: Option<InputTemplate>,
    ) -> anyhow::Result<RootQuery> {
        let target = Term::ref_from_path(query_span("data")?, DATA, path);
        let span = query_span(&format!("{target} = {RESULT_VAR}"))?;
        let target = Ref::new(Expr {
            span: span.clone(),
            index: 0,
            negated: false,
            kind: ExprKind::Call {
                op: "eq".into(),
                args: vec![target, Term::var(span.clone(), RESULT_VAR)],
            },
        });

        let (prelude, template, vars) = match input {
            Some(t) => (t.body, Some(t.term), t.vars),
            None => (vec![], None, vec![]),
        };
        let input_at = prelude.len();
        let exprs = reindexed(prelude.into_iter().chain(std::iter::once(target)));
        Ok(RootQuery {
            body: Ref::new(Query { span, exprs }),
            input_at,
            input: template,
            result: Some(RESULT_VAR.into()),
            vars,
        })
    }

    pub fn query(query: CompiledQuery) -> anyhow::Result<RootQuery> {
        let span = match query.body.first() {
            Some(e) => e.span.clone(),
            None => query_span("true")?,
        };
        let (prelude, template, mut vars) = match query.input {
            Some(t) => (t.body, Some(t.term), t.vars),
            None => (vec![], None, vec![]),
        };
        vars.extend(query.vars);
        vars.sort();
        vars.dedup();
        let input_at = prelude.len();
        let exprs = reindexed(prelude.into_iter().chain(query.body));
        Ok(RootQuery {
            body: Ref::new(Query { span, exprs }),
            input_at,
            input: template,
            result: None,
            vars,
        })
    }

    pub fn has_input(&self) -> bool {
        self.input.is_some()
    }
}

fn doc_name(path: &[Var]) -> String {
    let mut name = DATA.to_string();
    for p in path {
        name.push('.');
        name.push_str(p);
    }
    name
}

// The data tree is addressed by strings. Integers index base arrays.
fn segment_of(key: &Value) -> Option<Var> {
    match key {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => n.as_u64().map(|u| u.to_string().into()),
        _ => None,
    }
}

fn child_of(collection: &Value, key: &Value) -> Option<Value> {
    match (collection, key) {
        (Value::Object(fields), _) => fields.get(key).cloned(),
        (Value::Array(items), Value::Number(n)) => n
            .as_u64()
            .and_then(|i| usize::try_from(i).ok())
            .and_then(|i| items.get(i).cloned()),
        (Value::Array(items), Value::String(s)) => array_index(s).and_then(|i| items.get(i).cloned()),
        (Value::Set(members), _) if members.contains(key) => Some(key.clone()),
        _ => None,
    }
}

fn children_of(collection: &Value) -> Vec<(Value, Value)> {
    match collection {
        Value::Object(fields) => fields.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, v)| (Value::from(i), v.clone()))
            .collect(),
        Value::Set(members) => members.iter().map(|m| (m.clone(), m.clone())).collect(),
        _ => vec![],
    }
}

pub struct Evaluator<'a> {
    compiled: &'a Compiled,
    store: &'a dyn Store,
    txn: &'a Transaction,
    input: Value,
    // Bindings of the query being evaluated; saved while a rule body runs.
    frame: Vec<(Var, Value)>,
    cache: BTreeMap<Vec<Var>, Value>,
    active: BTreeSet<Vec<Var>>,
    // (query id, parent id) of each query being evaluated.
    queries: Vec<(u64, u64)>,
    next_query_id: u64,
    trace: Option<Vec<Event>>,
    cancel: Option<Arc<AtomicBool>>,
}

impl<'a> Evaluator<'a> {
    pub fn new(compiled: &'a Compiled, store: &'a dyn Store, txn: &'a Transaction) -> Self {
        Evaluator {
            compiled,
            store,
            txn,
            input: Value::Undefined,
            frame: vec![],
            cache: BTreeMap::new(),
            active: BTreeSet::new(),
            queries: vec![],
            next_query_id: 1,
            trace: None,
            cancel: None,
        }
    }

    pub fn with_input(mut self, input: Value) -> Self {
        self.input = input;
        self
    }

    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.trace = if enabled { Some(vec![]) } else { None };
        self
    }

    /// Abort evaluation once `flag` is set.
    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn take_trace(&mut self) -> Vec<Event> {
        self.trace.as_mut().map(std::mem::take).unwrap_or_default()
    }

    fn check_cancel(&self) -> Result<(), EvalError> {
        match &self.cancel {
            Some(flag) if flag.load(Ordering::Relaxed) => Err(EvalError::Cancelled),
            _ => Ok(()),
        }
    }

    fn trace_event(&mut self, op: Op, node: &Node) {
        let Some(trace) = self.trace.as_mut() else {
            return;
        };
        let (query_id, parent_id) = self.queries.last().copied().unwrap_or((0, 0));
        let locals: BTreeMap<Var, Value> = self.frame.iter().cloned().collect();
        trace.push(Event {
            op,
            query_id,
            parent_id,
            node: node.clone(),
            locals: locals.into_iter().collect(),
        });
    }

    fn lookup(&self, name: &str) -> Option<&Value> {
        self.frame
            .iter()
            .rev()
            .find(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v)
    }

    fn is_bound(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    fn evaluable(&self, term: &Term) -> bool {
        is_evaluable(term, &|v: &str| self.is_bound(v))
    }

    fn first_unbound(&self, terms: &[&Term]) -> String {
        terms
            .iter()
            .flat_map(|t| t.vars())
            .find(|v| v.as_ref() != DATA && v.as_ref() != INPUT && !self.is_bound(v))
            .map(|v| v.to_string())
            .unwrap_or_default()
    }

    /// Evaluate `query` and return all of its solutions.
    pub fn eval(&mut self, query: &RootQuery) -> Result<Vec<QueryResult>, EvalError> {
        self.frame.clear();
        self.queries = vec![(0, 0)];
        let node = Node::Body(query.body.clone());
        self.trace_event(Op::Enter, &node);

        let mut results = vec![];
        let (prelude, rest) = query
            .body
            .exprs
            .split_at(query.input_at.min(query.body.exprs.len()));
        self.eval_exprs(prelude, &mut |ev| {
            let saved = match &query.input {
                Some(template) => {
                    let input = ev.plug(template)?;
                    Some((
                        std::mem::replace(&mut ev.input, input),
                        std::mem::take(&mut ev.cache),
                    ))
                }
                None => None,
            };
            let r = ev.eval_exprs(rest, &mut |ev| {
                ev.trace_event(Op::Exit, &node);
                results.push(ev.collect(query));
                ev.trace_event(Op::Redo, &node);
                Ok(())
            });
            if let Some((input, cache)) = saved {
                ev.input = input;
                ev.cache = cache;
            }
            r
        })?;

        let op = if results.is_empty() { Op::Fail } else { Op::Exit };
        self.trace_event(op, &node);
        Ok(results)
    }

    fn collect(&self, query: &RootQuery) -> QueryResult {
        let value = query
            .result
            .as_ref()
            .and_then(|v| self.lookup(v).cloned())
            .unwrap_or(Value::Undefined);
        let bindings = query
            .vars
            .iter()
            .filter_map(|v| self.lookup(v).map(|b| (v.clone(), b.clone())))
            .collect();
        QueryResult { value, bindings }
    }

    // Value of a term whose variables are all bound.
    fn plug(&self, term: &Term) -> Result<Value, EvalError> {
        Ok(match term {
            Term::Scalar { value, .. } => value.clone(),
            Term::Var { name, .. } => self
                .lookup(name)
                .cloned()
                .ok_or_else(|| EvalError::UnsafeVar(name.to_string()))?,
            Term::Array { items, .. } => Value::from(
                items
                    .iter()
                    .map(|t| self.plug(t))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            Term::Object { fields, .. } => {
                let mut obj = BTreeMap::new();
                for (k, v) in fields {
                    obj.insert(self.plug(k)?, self.plug(v)?);
                }
                Value::from(obj)
            }
            Term::Ref { .. } => return Err(EvalError::UnsafeVar(term.to_string())),
        })
    }

    fn bind(&mut self, name: &Var, value: Value) -> usize {
        let mark = self.frame.len();
        self.frame.push((name.clone(), value));
        mark
    }

    fn eval_exprs(&mut self, exprs: &[Ref<Expr>], k: Cont<'_, 'a>) -> Result<(), EvalError> {
        match exprs.split_first() {
            None => k(self),
            Some((first, rest)) => self.eval_expr(first, &mut |ev| ev.eval_exprs(rest, &mut *k)),
        }
    }

    fn eval_expr(&mut self, expr: &Ref<Expr>, k: Cont<'_, 'a>) -> Result<(), EvalError> {
        self.check_cancel()?;
        let node = Node::Expr(expr.clone());
        self.trace_event(Op::Eval, &node);

        let mut matched = false;
        if expr.negated {
            self.eval_positive(expr, &mut |_| {
                matched = true;
                Ok(())
            })?;
            if matched {
                self.trace_event(Op::Fail, &node);
                return Ok(());
            }
            k(self)?;
            self.trace_event(Op::Redo, &node);
            return Ok(());
        }

        self.eval_positive(expr, &mut |ev| {
            matched = true;
            k(ev)?;
            ev.trace_event(Op::Redo, &node);
            Ok(())
        })?;
        if !matched {
            self.trace_event(Op::Fail, &node);
        }
        Ok(())
    }

    fn eval_positive(&mut self, expr: &Expr, k: Cont<'_, 'a>) -> Result<(), EvalError> {
        match &expr.kind {
            ExprKind::Term(t) => self.eval_term(t, &mut |ev, v| match v {
                Value::Bool(false) | Value::Undefined => Ok(()),
                _ => k(ev),
            }),
            ExprKind::Call { op, args } if op.as_ref() == "eq" && args.len() == 2 => {
                self.unify(&args[0], &args[1], k)
            }
            ExprKind::Call { op, args } => {
                let builtin =
                    builtins::lookup(op).ok_or_else(|| EvalError::UnknownFunction(op.to_string()))?;
                let inputs = &args[..builtin.inputs.min(args.len())];
                let output = if builtin.output {
                    args.get(builtin.inputs)
                } else {
                    None
                };
                let mut acc = vec![];
                self.eval_terms(inputs, &mut acc, &mut |ev, values| {
                    let result = (builtin.func)(&expr.span, values).map_err(|e| {
                        EvalError::Builtin {
                            name: op.to_string(),
                            message: e.to_string(),
                        }
                    })?;
                    match (output, result) {
                        (_, Value::Undefined) => Ok(()),
                        (Some(out), result) => ev.unify_value(out, &result, &mut *k),
                        (None, Value::Bool(true)) => k(ev),
                        (None, _) => Ok(()),
                    }
                })
            }
        }
    }

    fn eval_terms(
        &mut self,
        terms: &[Term],
        acc: &mut Vec<Value>,
        k: ValuesCont<'_, 'a>,
    ) -> Result<(), EvalError> {
        match terms.split_first() {
            None => k(self, acc.as_slice()),
            Some((first, rest)) => self.eval_term(first, &mut |ev, v| {
                acc.push(v);
                let r = ev.eval_terms(rest, acc, &mut *k);
                acc.pop();
                r
            }),
        }
    }

    /// Enumerate the values of `term`, binding any unbound reference
    /// indexes it contains.
    fn eval_term(&mut self, term: &Term, k: ValueCont<'_, 'a>) -> Result<(), EvalError> {
        match term {
            Term::Scalar { value, .. } => k(self, value.clone()),
            Term::Var { name, .. } => match self.lookup(name).cloned() {
                Some(v) => k(self, v),
                None => Err(EvalError::UnsafeVar(name.to_string())),
            },
            Term::Ref { head, path, .. } => self.eval_ref(head, path, k),
            Term::Array { items, .. } => {
                let mut acc = vec![];
                self.eval_terms(items, &mut acc, &mut |ev, values| {
                    k(ev, Value::from(values.to_vec()))
                })
            }
            Term::Object { fields, .. } => {
                let terms: Vec<Term> = fields
                    .iter()
                    .flat_map(|(key, value)| [key.clone(), value.clone()])
                    .collect();
                let mut acc = vec![];
                self.eval_terms(&terms, &mut acc, &mut |ev, values| {
                    let obj: BTreeMap<Value, Value> = values
                        .chunks(2)
                        .filter_map(|pair| match pair {
                            [key, value] => Some((key.clone(), value.clone())),
                            _ => None,
                        })
                        .collect();
                    k(ev, Value::from(obj))
                })
            }
        }
    }

    fn unify(&mut self, a: &Term, b: &Term, k: Cont<'_, 'a>) -> Result<(), EvalError> {
        if self.evaluable(a) {
            self.eval_term(a, &mut |ev, value| ev.unify_value(b, &value, &mut *k))
        } else if self.evaluable(b) {
            self.eval_term(b, &mut |ev, value| ev.unify_value(a, &value, &mut *k))
        } else {
            Err(EvalError::UnsafeVar(self.first_unbound(&[a, b])))
        }
    }

    /// Unify `pattern` with a known value.
    fn unify_value(&mut self, pattern: &Term, value: &Value, k: Cont<'_, 'a>) -> Result<(), EvalError> {
        match pattern {
            Term::Scalar { value: expected, .. } => {
                if expected == value {
                    k(self)
                } else {
                    Ok(())
                }
            }
            Term::Var { name, .. } => match self.lookup(name).map(|bound| bound == value) {
                Some(true) => k(self),
                Some(false) => Ok(()),
                None => {
                    let mark = self.bind(name, value.clone());
                    let r = k(self);
                    self.frame.truncate(mark);
                    r
                }
            },
            Term::Ref { .. } => self.eval_term(pattern, &mut |ev, v| {
                if &v == value {
                    k(ev)
                } else {
                    Ok(())
                }
            }),
            Term::Array { items, .. } => match value {
                Value::Array(values) if values.len() == items.len() => {
                    let values = values.clone();
                    self.unify_items(items, &values, k)
                }
                _ => Ok(()),
            },
            Term::Object { fields, .. } => match value {
                Value::Object(obj) if obj.len() == fields.len() => {
                    let obj = obj.clone();
                    self.unify_fields(fields, &obj, k)
                }
                _ => Ok(()),
            },
        }
    }

    fn unify_items(&mut self, items: &[Term], values: &[Value], k: Cont<'_, 'a>) -> Result<(), EvalError> {
        match (items.split_first(), values.split_first()) {
            (Some((t, ts)), Some((v, vs))) => {
                self.unify_value(t, v, &mut |ev| ev.unify_items(ts, vs, &mut *k))
            }
            _ => k(self),
        }
    }

    fn unify_fields(
        &mut self,
        fields: &[(Term, Term)],
        obj: &BTreeMap<Value, Value>,
        k: Cont<'_, 'a>,
    ) -> Result<(), EvalError> {
        let Some(((key, value), rest)) = fields.split_first() else {
            return k(self);
        };
        self.eval_term(key, &mut |ev, key| match obj.get(&key) {
            Some(v) => {
                let v = v.clone();
                ev.unify_value(value, &v, &mut |ev| ev.unify_fields(rest, obj, &mut *k))
            }
            None => Ok(()),
        })
    }

    fn eval_ref(&mut self, head: &Var, path: &[Term], k: ValueCont<'_, 'a>) -> Result<(), EvalError> {
        match head.as_ref() {
            DATA => {
                let mut at = vec![];
                self.eval_data(&mut at, path, k)
            }
            INPUT => {
                if self.input.is_undefined() {
                    return Ok(());
                }
                let input = self.input.clone();
                self.walk(input, path, k)
            }
            _ => match self.lookup(head).cloned() {
                Some(v) => self.walk(v, path, k),
                None => Err(EvalError::UnsafeVar(head.to_string())),
            },
        }
    }

    // Follow `path` through a value.
    fn walk(&mut self, value: Value, path: &[Term], k: ValueCont<'_, 'a>) -> Result<(), EvalError> {
        let Some((first, rest)) = path.split_first() else {
            return k(self, value);
        };
        if self.evaluable(first) {
            self.eval_term(first, &mut |ev, key| match child_of(&value, &key) {
                Some(child) => ev.walk(child, rest, &mut *k),
                None => Ok(()),
            })
        } else {
            for (key, child) in children_of(&value) {
                self.unify_value(first, &key, &mut |ev| ev.walk(child.clone(), rest, &mut *k))?;
            }
            Ok(())
        }
    }

    fn read_base(&self, at: &[Var]) -> Result<Option<Value>, EvalError> {
        match self.store.read(self.txn, &Path::new(at)) {
            Ok(v) => Ok(Some(v)),
            Err(StorageError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    // Follow `path` through the data tree, which combines base documents
    // with the documents produced by rules.
    fn eval_data(&mut self, at: &mut Vec<Var>, path: &[Term], k: ValueCont<'_, 'a>) -> Result<(), EvalError> {
        let compiled = self.compiled;
        let Some(node) = compiled.tree.node(at.as_slice()) else {
            return match self.read_base(at)? {
                Some(v) => self.walk(v, path, k),
                None => Ok(()),
            };
        };

        if node.has_rules() {
            let doc = self.eval_rule_doc(at, node)?;
            if doc.is_undefined() {
                return Ok(());
            }
            return self.walk(doc, path, k);
        }

        let Some((first, rest)) = path.split_first() else {
            let doc = self.compose(at, node)?;
            return k(self, doc);
        };

        if self.evaluable(first) {
            self.eval_term(first, &mut |ev, key| match segment_of(&key) {
                Some(segment) => {
                    at.push(segment);
                    let r = ev.eval_data(at, rest, &mut *k);
                    at.pop();
                    r
                }
                None => Ok(()),
            })
        } else {
            let mut keys: BTreeSet<Value> = match self.read_base(at)? {
                Some(base) => children_of(&base).into_iter().map(|(key, _)| key).collect(),
                None => BTreeSet::new(),
            };
            keys.extend(node.children.keys().map(|c| Value::from(c.as_ref())));
            for key in keys {
                let Some(segment) = segment_of(&key) else {
                    continue;
                };
                self.unify_value(first, &key, &mut |ev| {
                    at.push(segment.clone());
                    let r = ev.eval_data(at, rest, &mut *k);
                    at.pop();
                    r
                })?;
            }
            Ok(())
        }
    }

    // The document at a package node: base data merged with the documents
    // of every rule beneath it.
    fn compose(&mut self, at: &mut Vec<Var>, node: &'a RuleTree) -> Result<Value, EvalError> {
        let mut doc = match self.read_base(at)? {
            Some(base @ Value::Object(_)) => base,
            _ => Value::new_object(),
        };
        for (name, child) in &node.children {
            at.push(name.clone());
            let value = if child.has_rules() {
                self.eval_rule_doc(at, child)
            } else {
                self.compose(at, child)
            };
            at.pop();
            let value = value?;
            if value.is_undefined() {
                continue;
            }

            if let Value::Object(fields) = &mut doc {
                let fields = Arc::make_mut(fields);
                let key = Value::from(name.as_ref());
                match fields.get_mut(&key) {
                    Some(existing) if !child.has_rules() && existing.is_object() => {
                        existing.merge(value).map_err(|e| EvalError::Conflict {
                            path: format!("{}: {e}", doc_name(at)),
                        })?;
                    }
                    _ => {
                        fields.insert(key, value);
                    }
                }
            }
        }
        Ok(doc)
    }

    fn eval_rule_doc(&mut self, at: &[Var], node: &'a RuleTree) -> Result<Value, EvalError> {
        if let Some(doc) = self.cache.get(at) {
            return Ok(doc.clone());
        }
        let path = at.to_vec();
        if !self.active.insert(path.clone()) {
            return Err(EvalError::Recursion(doc_name(&path)));
        }
        let doc = self.eval_rules(&path, &node.rules);
        self.active.remove(&path);
        let doc = doc?;
        self.cache.insert(path, doc.clone());
        Ok(doc)
    }

    fn eval_rules(&mut self, path: &[Var], rules: &[Ref<Rule>]) -> Result<Value, EvalError> {
        let name = doc_name(path);
        match rules.first().map(|r| r.kind()) {
            None => Ok(Value::Undefined),
            Some(DocKind::Complete) => {
                let mut doc = Value::Undefined;
                for rule in rules {
                    let Some(value) = &rule.value else {
                        continue;
                    };
                    self.eval_rule_body(rule, &mut |ev| {
                        ev.eval_term(value, &mut |_, v| {
                            if doc.is_undefined() {
                                doc = v;
                            } else if doc != v {
                                return Err(EvalError::Conflict { path: name.clone() });
                            }
                            Ok(())
                        })
                    })?;
                }
                Ok(doc)
            }
            Some(DocKind::PartialSet) => {
                let mut set = BTreeSet::new();
                for rule in rules {
                    let Some(key) = &rule.key else {
                        continue;
                    };
                    self.eval_rule_body(rule, &mut |ev| {
                        ev.eval_term(key, &mut |_, v| {
                            set.insert(v);
                            Ok(())
                        })
                    })?;
                }
                Ok(Value::from(set))
            }
            Some(DocKind::PartialObject) => {
                let mut obj = BTreeMap::new();
                for rule in rules {
                    let (Some(key), Some(value)) = (&rule.key, &rule.value) else {
                        continue;
                    };
                    let terms = [key.clone(), value.clone()];
                    self.eval_rule_body(rule, &mut |ev| {
                        let mut acc = vec![];
                        ev.eval_terms(&terms, &mut acc, &mut |_, kv| {
                            let (k, v) = (kv[0].clone(), kv[1].clone());
                            match obj.get(&k) {
                                Some(prev) if *prev != v => {
                                    Err(EvalError::ObjectConflict { path: name.clone() })
                                }
                                _ => {
                                    obj.insert(k, v);
                                    Ok(())
                                }
                            }
                        })
                    })?;
                }
                Ok(Value::from(obj))
            }
        }
    }

    fn eval_rule_body(&mut self, rule: &Ref<Rule>, k: Cont<'_, 'a>) -> Result<(), EvalError> {
        let parent = self.queries.last().map(|(id, _)| *id).unwrap_or(0);
        let id = self.next_query_id;
        self.next_query_id += 1;
        self.queries.push((id, parent));
        let outer = std::mem::take(&mut self.frame);

        let node = Node::Rule(rule.clone());
        self.trace_event(Op::Enter, &node);
        let mut matched = false;
        let r = self.eval_exprs(&rule.body.exprs, &mut |ev| {
            matched = true;
            ev.trace_event(Op::Exit, &node);
            k(ev)?;
            ev.trace_event(Op::Redo, &node);
            Ok(())
        });
        if r.is_ok() && !matched {
            self.trace_event(Op::Fail, &node);
        }

        self.frame = outer;
        self.queries.pop();
        r
    }
}
