// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Turns parsed modules into a rule tree ready for evaluation.
//!
//! Compilation resolves every name a rule body mentions into a reference
//! rooted at `data` or `input`, orders body expressions so that each one is
//! evaluable when it is reached and rejects policies that reference unknown
//! builtins, define conflicting documents or depend on themselves.

use crate::ast::*;
use crate::builtins;
use crate::lexer::{SourceError, Span};
use crate::value::Value;

use core::fmt;
use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

pub const PARSE_ERROR: &str = "rego_parse_error";
pub const COMPILE_ERROR: &str = "rego_compile_error";
pub const UNSAFE_VAR_ERROR: &str = "rego_unsafe_var_error";
pub const RECURSION_ERROR: &str = "rego_recursion_error";
pub const TYPE_ERROR: &str = "rego_type_error";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Location {
    pub file: String,
    pub row: u32,
    pub col: u32,
}

impl Location {
    fn of(span: &Span) -> Location {
        Location {
            file: span.source.file().clone(),
            row: span.line,
            col: span.col,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CompileError {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
}

impl CompileError {
    pub fn new(code: &'static str, span: &Span, message: String) -> CompileError {
        CompileError {
            code,
            message,
            location: Some(Location::of(span)),
        }
    }

    /// Wrap a lexer or parser failure, keeping its location when known.
    pub fn from_parse(err: &anyhow::Error) -> CompileError {
        match err.downcast_ref::<SourceError>() {
            Some(e) => CompileError {
                code: PARSE_ERROR,
                message: e.message.clone(),
                location: Some(Location {
                    file: e.file.clone(),
                    row: e.line,
                    col: e.col,
                }),
            },
            None => CompileError {
                code: PARSE_ERROR,
                message: err.to_string(),
                location: None,
            },
        }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(l) => write!(f, "{}:{}: {}: {}", l.file, l.row, self.code, self.message),
            None => write!(f, "{}: {}", self.code, self.message),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompileErrors(pub Vec<CompileError>);

impl fmt::Display for CompileErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.as_slice() {
            [e] => write!(f, "{e}"),
            errors => {
                write!(f, "{} errors occurred:", errors.len())?;
                for e in errors {
                    write!(f, "\n{e}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for CompileErrors {}

impl From<CompileError> for CompileErrors {
    fn from(e: CompileError) -> Self {
        CompileErrors(vec![e])
    }
}

/// Virtual documents indexed by their path below `data`.
#[derive(Debug, Default, Clone)]
pub struct RuleTree {
    pub children: BTreeMap<Var, RuleTree>,
    pub rules: Vec<Ref<Rule>>,
}

impl RuleTree {
    fn insert(&mut self, path: &[Var], rule: Ref<Rule>) {
        let mut node = self;
        for segment in path {
            node = node.children.entry(segment.clone()).or_default();
        }
        node.rules.push(rule);
    }

    pub fn node<S: AsRef<str>>(&self, path: &[S]) -> Option<&RuleTree> {
        let mut node = self;
        for segment in path {
            node = node.children.get(segment.as_ref())?;
        }
        Some(node)
    }

    pub fn has_rules(&self) -> bool {
        !self.rules.is_empty()
    }

    pub fn kind(&self) -> Option<DocKind> {
        self.rules.first().map(|r| r.kind())
    }

    /// Paths of every node defining rules, in lexical order.
    pub fn rule_paths(&self) -> Vec<Vec<Var>> {
        fn walk(node: &RuleTree, prefix: &mut Vec<Var>, out: &mut Vec<Vec<Var>>) {
            if node.has_rules() {
                out.push(prefix.clone());
            }
            for (name, child) in &node.children {
                prefix.push(name.clone());
                walk(child, prefix, out);
                prefix.pop();
            }
        }
        let mut out = vec![];
        walk(self, &mut vec![], &mut out);
        out
    }
}

/// The result of compiling a set of modules.
#[derive(Debug, Default, Clone)]
pub struct Compiled {
    pub tree: RuleTree,
}

impl Compiled {
    /// The rule path a write to `path` would collide with, if any. Writes
    /// may not target a rule, a node inside a rule's document or a node
    /// that has rules beneath it.
    pub fn conflicting_rule<S: AsRef<str>>(&self, path: &[S]) -> Option<Vec<Var>> {
        let mut node = &self.tree;
        let mut prefix: Vec<Var> = vec![];
        if node.has_rules() {
            return Some(prefix);
        }
        for segment in path {
            match node.children.get(segment.as_ref()) {
                Some(child) => {
                    prefix.push(segment.as_ref().into());
                    node = child;
                    if node.has_rules() {
                        return Some(prefix);
                    }
                }
                None => return None,
            }
        }
        node.rule_paths().into_iter().next().map(|p| {
            let mut full = prefix.clone();
            full.extend(p);
            full
        })
    }

    /// Errors for every rule whose path already holds base data according
    /// to `occupied`.
    pub fn path_conflicts<F>(&self, mut occupied: F) -> Vec<CompileError>
    where
        F: FnMut(&[Var]) -> anyhow::Result<bool>,
    {
        let mut errors = vec![];
        for path in self.tree.rule_paths() {
            let Some(rule) = self.tree.node(&path).and_then(|n| n.rules.first()) else {
                continue;
            };
            let joined = path.join("/");
            let message = match occupied(&path) {
                Ok(false) => continue,
                Ok(true) => format!("conflicting rule for data path {joined} found"),
                Err(e) => format!("conflict check for data path {joined}: {e}"),
            };
            errors.push(CompileError::new(COMPILE_ERROR, &rule.span, message));
        }
        errors
    }
}

/// A compiled ad-hoc query.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    pub body: Vec<Ref<Expr>>,
    /// Template for the input document when the query itself contains
    /// `input = <term>`.
    pub input: Option<InputTemplate>,
    /// Variables whose bindings are reported.
    pub vars: Vec<Var>,
}

/// An input document that may embed references to `data`.
///
/// Every reference in the template is replaced by a generated variable and
/// `body` binds those variables. Plugging `term` with a solution of `body`
/// yields one input document.
#[derive(Debug, Clone)]
pub struct InputTemplate {
    pub body: Vec<Ref<Expr>>,
    pub term: Term,
    pub vars: Vec<Var>,
}

#[derive(Default)]
struct Scope {
    package: Vec<Var>,
    imports: BTreeMap<Var, Term>,
    rules: BTreeSet<Var>,
}

impl Scope {
    fn is_global_name(&self, name: &str) -> bool {
        name == DATA || name == INPUT || self.imports.contains_key(name) || self.rules.contains(name)
    }

    fn resolve(&self, span: &Span, head: &Var, path: Vec<Term>, locals: &BTreeSet<Var>) -> Term {
        let make = |head: &str, path: Vec<Term>| -> Term {
            if path.is_empty() && head != DATA && head != INPUT {
                Term::var(span.clone(), head)
            } else {
                Term::Ref {
                    span: span.clone(),
                    head: head.into(),
                    path,
                }
            }
        };

        if locals.contains(head) || head.as_ref() == DATA || head.as_ref() == INPUT {
            return make(head.as_ref(), path);
        }
        if let Some(import) = self.imports.get(head) {
            return match import {
                Term::Ref {
                    head: root,
                    path: prefix,
                    ..
                } => {
                    let mut full = prefix.clone();
                    full.extend(path);
                    make(root.as_ref(), full)
                }
                Term::Var { name, .. } => make(name.as_ref(), path),
                _ => make(head.as_ref(), path),
            };
        }
        let (root, mut full) = if self.rules.contains(head) {
            let mut full: Vec<Term> = self
                .package
                .iter()
                .map(|s| Term::scalar(span.clone(), Value::from(s.as_ref())))
                .collect();
            full.push(Term::scalar(span.clone(), Value::from(head.as_ref())));
            (DATA, full)
        } else {
            // Free variables refer to top-level fields of the input.
            (
                INPUT,
                vec![Term::scalar(span.clone(), Value::from(head.as_ref()))],
            )
        };
        full.extend(path);
        make(root, full)
    }

    fn resolve_term(&self, term: &Term, locals: &BTreeSet<Var>) -> Term {
        term.transform(&mut |t| match t {
            Term::Var { span, name } => self.resolve(&span, &name, vec![], locals),
            Term::Ref { span, head, path } => self.resolve(&span, &head, path, locals),
            other => other,
        })
    }
}

// Variables that occur inside the index of a reference.
fn ref_index_vars(term: &Term, out: &mut BTreeSet<Var>) {
    match term {
        Term::Ref { path, .. } => {
            for t in path {
                match t {
                    Term::Var { name, .. } => {
                        out.insert(name.clone());
                    }
                    Term::Ref { .. } => ref_index_vars(t, out),
                    _ => pattern_vars(t, out),
                }
            }
        }
        Term::Array { items, .. } => items.iter().for_each(|t| ref_index_vars(t, out)),
        Term::Object { fields, .. } => fields.iter().for_each(|(k, v)| {
            ref_index_vars(k, out);
            ref_index_vars(v, out);
        }),
        _ => (),
    }
}

// Variables that unification can bind.
fn pattern_vars(term: &Term, out: &mut BTreeSet<Var>) {
    match term {
        Term::Var { name, .. } => {
            out.insert(name.clone());
        }
        Term::Array { items, .. } => items.iter().for_each(|t| pattern_vars(t, out)),
        Term::Object { fields, .. } => fields.iter().for_each(|(_, v)| pattern_vars(v, out)),
        Term::Ref { .. } => ref_index_vars(term, out),
        Term::Scalar { .. } => (),
    }
}

fn output_vars(expr: &Expr, out: &mut BTreeSet<Var>) {
    for t in expr.terms() {
        ref_index_vars(t, out);
    }
    if expr.negated {
        return;
    }
    match &expr.kind {
        ExprKind::Call { op, args } if op.as_ref() == "eq" => {
            args.iter().for_each(|t| pattern_vars(t, out))
        }
        ExprKind::Call { op, args } => {
            if let (Some(b), Some(last)) = (builtins::lookup(op), args.last()) {
                if b.output && args.len() == b.arity() {
                    pattern_vars(last, out);
                }
            }
        }
        ExprKind::Term(_) => (),
    }
}

fn is_root(name: &str) -> bool {
    name == DATA || name == INPUT
}

/// Whether every variable needed to compute `term` is bound.
pub fn is_evaluable(term: &Term, bound: &dyn Fn(&str) -> bool) -> bool {
    match term {
        Term::Scalar { .. } => true,
        Term::Var { name, .. } => bound(name.as_ref()),
        Term::Ref { head, path, .. } => {
            (is_root(head) || bound(head.as_ref())) && path.iter().all(|t| is_pattern(t, bound))
        }
        Term::Array { items, .. } => items.iter().all(|t| is_evaluable(t, bound)),
        Term::Object { fields, .. } => fields
            .iter()
            .all(|(k, v)| is_evaluable(k, bound) && is_evaluable(v, bound)),
    }
}

/// Whether `term` can be unified against a value.
pub fn is_pattern(term: &Term, bound: &dyn Fn(&str) -> bool) -> bool {
    match term {
        Term::Scalar { .. } | Term::Var { .. } => true,
        Term::Array { items, .. } => items.iter().all(|t| is_pattern(t, bound)),
        Term::Object { fields, .. } => fields
            .iter()
            .all(|(k, v)| is_evaluable(k, bound) && is_pattern(v, bound)),
        Term::Ref { .. } => is_evaluable(term, bound),
    }
}

fn is_schedulable(expr: &Expr, bound: &BTreeSet<Var>) -> bool {
    let bound = |v: &str| bound.contains(v);
    match &expr.kind {
        ExprKind::Term(t) => is_evaluable(t, &bound),
        ExprKind::Call { op, args } if op.as_ref() == "eq" && args.len() == 2 => {
            (is_evaluable(&args[0], &bound) && is_pattern(&args[1], &bound))
                || (is_evaluable(&args[1], &bound) && is_pattern(&args[0], &bound))
        }
        ExprKind::Call { op, args } => match builtins::lookup(op) {
            Some(b) if b.output => {
                args[..b.inputs].iter().all(|t| is_evaluable(t, &bound))
                    && args[b.inputs..].iter().all(|t| is_pattern(t, &bound))
            }
            _ => args.iter().all(|t| is_evaluable(t, &bound)),
        },
    }
}

fn display_var(name: &str) -> &str {
    if is_generated(name) {
        "_"
    } else {
        name
    }
}

// Static `data` prefix of a reference, e.g. `data.a.b[x]` yields `[a, b]`.
fn data_prefix(term: &Term) -> Option<Vec<Var>> {
    match term {
        Term::Ref { head, path, .. } if head.as_ref() == DATA => Some(
            path.iter()
                .map_while(|t| match t {
                    Term::Scalar {
                        value: Value::String(s),
                        ..
                    } => Some(s.clone()),
                    _ => None,
                })
                .collect(),
        ),
        _ => None,
    }
}

fn collect_data_refs(term: &Term, out: &mut Vec<Vec<Var>>) {
    term.transform(&mut |t| {
        if let Some(p) = data_prefix(&t) {
            out.push(p);
        }
        t
    });
}

fn doc_path(path: &[Var]) -> String {
    let mut s = DATA.to_string();
    for p in path {
        s.push('.');
        s.push_str(p);
    }
    s
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Visit {
    New,
    Active,
    Done,
}

// Depth-first search for cycles in the rule dependency graph.
struct Cycles {
    edges: Vec<BTreeSet<usize>>,
    state: Vec<Visit>,
    stack: Vec<usize>,
    found: Vec<Vec<usize>>,
}

impl Cycles {
    fn visit(&mut self, i: usize) {
        self.state[i] = Visit::Active;
        self.stack.push(i);
        let next: Vec<usize> = self.edges[i].iter().copied().collect();
        for j in next {
            match self.state[j] {
                Visit::New => self.visit(j),
                Visit::Active => {
                    if let Some(start) = self.stack.iter().position(|&k| k == j) {
                        let cycle = self.stack[start..].to_vec();
                        if !self.found.iter().any(|c| c.contains(&j)) {
                            self.found.push(cycle);
                        }
                    }
                }
                Visit::Done => (),
            }
        }
        self.stack.pop();
        self.state[i] = Visit::Done;
    }
}

#[derive(Default)]
pub struct Compiler {
    errors: Vec<CompileError>,
    generated: usize,
}

impl Compiler {
    pub fn new() -> Compiler {
        Compiler::default()
    }

    fn error(&mut self, code: &'static str, span: &Span, message: String) {
        self.errors.push(CompileError::new(code, span, message));
    }

    fn finish<T>(&mut self, value: T) -> Result<T, CompileErrors> {
        if self.errors.is_empty() {
            Ok(value)
        } else {
            Err(CompileErrors(std::mem::take(&mut self.errors)))
        }
    }

    fn check_calls(&mut self, exprs: &[Expr]) -> bool {
        let before = self.errors.len();
        for e in exprs {
            if let ExprKind::Call { op, args } = &e.kind {
                match builtins::lookup(op) {
                    None => self.error(TYPE_ERROR, &e.span, format!("undefined function {op}")),
                    Some(b) if b.arity() != args.len() => self.error(
                        TYPE_ERROR,
                        &e.span,
                        format!(
                            "{op}: arity mismatch: have {} arguments, want {}",
                            args.len(),
                            b.arity()
                        ),
                    ),
                    Some(_) => (),
                }
            }
        }
        self.errors.len() == before
    }

    /// Order `exprs` so that each is evaluable once its predecessors have
    /// run. Returns the reindexed body and the variables it binds.
    fn reorder(&mut self, exprs: Vec<Expr>) -> (Vec<Ref<Expr>>, BTreeSet<Var>) {
        let mut bound = BTreeSet::new();
        let mut remaining = exprs;
        let mut ordered = vec![];

        while !remaining.is_empty() {
            match remaining.iter().position(|e| is_schedulable(e, &bound)) {
                Some(i) => {
                    let e = remaining.remove(i);
                    if !e.negated {
                        bound.extend(e.vars());
                    }
                    ordered.push(e);
                }
                None => {
                    let mut reported = BTreeSet::new();
                    for e in &remaining {
                        for v in e.vars() {
                            if !bound.contains(&v) && !is_root(&v) && reported.insert(v.clone()) {
                                self.error(
                                    UNSAFE_VAR_ERROR,
                                    &e.span,
                                    format!("var {} is unsafe", display_var(&v)),
                                );
                            }
                        }
                    }
                    ordered.append(&mut remaining);
                }
            }
        }

        let body = ordered
            .into_iter()
            .enumerate()
            .map(|(index, e)| Ref::new(Expr { index, ..e }))
            .collect();
        (body, bound)
    }

    fn compile_rule(&mut self, scope: &Scope, rule: &Rule) -> Option<Ref<Rule>> {
        let mut locals = BTreeSet::new();
        for e in &rule.body.exprs {
            output_vars(e, &mut locals);
        }
        // Head variables belong to the rule; they never name input fields.
        for t in rule.key.iter().chain(rule.value.iter()) {
            pattern_vars(t, &mut locals);
        }
        locals.retain(|v| !scope.is_global_name(v));

        let exprs: Vec<Expr> = rule
            .body
            .exprs
            .iter()
            .map(|e| e.map_terms(&mut |t| scope.resolve_term(t, &locals)))
            .collect();
        if !self.check_calls(&exprs) {
            return None;
        }
        let errors = self.errors.len();
        let (exprs, bound) = self.reorder(exprs);

        let key = rule.key.as_ref().map(|t| scope.resolve_term(t, &locals));
        let value = rule.value.as_ref().map(|t| scope.resolve_term(t, &locals));
        let mut head_vars = BTreeSet::new();
        for t in key.iter().chain(value.iter()) {
            t.vars_into(&mut head_vars);
        }
        for v in head_vars {
            if !is_root(&v) && !bound.contains(&v) {
                self.error(
                    UNSAFE_VAR_ERROR,
                    &rule.span,
                    format!("var {} is unsafe", display_var(&v)),
                );
            }
        }
        if self.errors.len() != errors {
            return None;
        }

        Some(Ref::new(Rule {
            span: rule.span.clone(),
            name: rule.name.clone(),
            key,
            value,
            body: Query {
                span: rule.body.span.clone(),
                exprs,
            },
        }))
    }

    fn check_conflicts(&mut self, tree: &RuleTree, modules: &BTreeMap<String, Ref<Module>>) {
        fn walk(c: &mut Compiler, node: &RuleTree) {
            if let Some(first) = node.rules.first() {
                let kind = first.kind();
                if let Some(r) = node.rules.iter().find(|r| r.kind() != kind) {
                    c.error(
                        TYPE_ERROR,
                        &r.span,
                        format!("conflicting rules named {} found", r.name),
                    );
                }
            }
            for child in node.children.values() {
                walk(c, child);
            }
        }
        walk(self, tree);

        for module in modules.values() {
            let package = &module.package.path;
            for n in 1..=package.len() {
                if let Some(rule) = tree.node(&package[..n]).and_then(|node| node.rules.first()) {
                    self.error(
                        COMPILE_ERROR,
                        &module.package.span,
                        format!(
                            "package {} conflicts with rule {} defined at {}:{}",
                            Term::ref_from_path(module.package.span.clone(), DATA, package),
                            rule.name,
                            rule.span.source.file(),
                            rule.span.line
                        ),
                    );
                    break;
                }
            }
        }
    }

    fn check_recursion(&mut self, tree: &RuleTree) {
        let paths = tree.rule_paths();
        let mut edges: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); paths.len()];
        for (i, path) in paths.iter().enumerate() {
            let mut refs = vec![];
            if let Some(node) = tree.node(path) {
                for rule in &node.rules {
                    for e in &rule.body.exprs {
                        e.terms()
                            .into_iter()
                            .for_each(|t| collect_data_refs(t, &mut refs));
                    }
                    for t in rule.key.iter().chain(rule.value.iter()) {
                        collect_data_refs(t, &mut refs);
                    }
                }
            }
            for r in refs {
                for (j, target) in paths.iter().enumerate() {
                    if r.starts_with(target) || target.starts_with(&r) {
                        edges[i].insert(j);
                    }
                }
            }
        }

        let mut cycles = Cycles {
            edges,
            state: vec![Visit::New; paths.len()],
            stack: vec![],
            found: vec![],
        };
        for i in 0..paths.len() {
            if cycles.state[i] == Visit::New {
                cycles.visit(i);
            }
        }

        for cycle in cycles.found {
            let Some(rule) = tree.node(&paths[cycle[0]]).and_then(|n| n.rules.first()) else {
                continue;
            };
            let names: Vec<String> = cycle
                .iter()
                .chain(cycle.first())
                .map(|&k| doc_path(&paths[k]))
                .collect();
            self.error(
                RECURSION_ERROR,
                &rule.span,
                format!("rule {} is recursive: {}", rule.name, names.join(" -> ")),
            );
        }
    }

    /// Compile a complete set of modules, keyed by module id.
    pub fn compile_modules(
        &mut self,
        modules: &BTreeMap<String, Ref<Module>>,
    ) -> Result<Compiled, CompileErrors> {
        let mut tree = RuleTree::default();
        for module in modules.values() {
            let scope = Scope {
                package: module.package.path.clone(),
                imports: module
                    .imports
                    .iter()
                    .filter_map(|i| i.name().map(|n| (n, i.path.clone())))
                    .collect(),
                rules: module.rules.iter().map(|r| r.name.clone()).collect(),
            };
            for rule in &module.rules {
                if let Some(compiled) = self.compile_rule(&scope, rule) {
                    let mut path = module.package.path.clone();
                    path.push(rule.name.clone());
                    tree.insert(&path, compiled);
                }
            }
        }
        if self.errors.is_empty() {
            self.check_conflicts(&tree, modules);
        }
        if self.errors.is_empty() {
            self.check_recursion(&tree);
        }
        self.finish(Compiled { tree })
    }

    fn fresh_var(&mut self, prefix: &str) -> Var {
        self.generated += 1;
        format!("${prefix}{}", self.generated).into()
    }

    /// Compile an input document that may reference `data`.
    pub fn compile_input(&mut self, term: &Term) -> Result<InputTemplate, CompileErrors> {
        let mut refs: Vec<(Term, Var)> = vec![];
        let mut unsafe_vars: Vec<(Span, Var)> = vec![];
        let mut index_vars = BTreeSet::new();

        fn lift(
            c: &mut Compiler,
            term: &Term,
            refs: &mut Vec<(Term, Var)>,
            unsafe_vars: &mut Vec<(Span, Var)>,
            index_vars: &mut BTreeSet<Var>,
        ) -> Term {
            match term {
                Term::Scalar { .. } => term.clone(),
                Term::Var { span, name } => {
                    unsafe_vars.push((span.clone(), name.clone()));
                    term.clone()
                }
                Term::Ref { span, head, .. } => {
                    if head.as_ref() != DATA {
                        unsafe_vars.push((span.clone(), head.clone()));
                        return term.clone();
                    }
                    ref_index_vars(term, index_vars);
                    let var = c.fresh_var("input");
                    refs.push((term.clone(), var.clone()));
                    Term::Var {
                        span: span.clone(),
                        name: var,
                    }
                }
                Term::Array { span, items } => Term::Array {
                    span: span.clone(),
                    items: items
                        .iter()
                        .map(|t| lift(c, t, refs, unsafe_vars, index_vars))
                        .collect(),
                },
                Term::Object { span, fields } => Term::Object {
                    span: span.clone(),
                    fields: fields
                        .iter()
                        .map(|(k, v)| {
                            (
                                lift(c, k, refs, unsafe_vars, index_vars),
                                lift(c, v, refs, unsafe_vars, index_vars),
                            )
                        })
                        .collect(),
                },
            }
        }

        let lifted = lift(self, term, &mut refs, &mut unsafe_vars, &mut index_vars);
        for (span, v) in unsafe_vars {
            self.error(
                UNSAFE_VAR_ERROR,
                &span,
                format!("var {} is unsafe", display_var(&v)),
            );
        }

        let exprs: Vec<Expr> = refs
            .into_iter()
            .map(|(r, var)| Expr {
                span: r.span().clone(),
                index: 0,
                negated: false,
                kind: ExprKind::Call {
                    op: "eq".into(),
                    args: vec![
                        r.clone(),
                        Term::Var {
                            span: r.span().clone(),
                            name: var,
                        },
                    ],
                },
            })
            .collect();
        let (body, _) = self.reorder(exprs);
        let template = InputTemplate {
            body,
            term: lifted,
            vars: index_vars.into_iter().filter(|v| !is_generated(v)).collect(),
        };
        self.finish(template)
    }

    /// Compile an ad-hoc query. A top-level `input = <term>` expression is
    /// removed from the body and becomes the query's input template.
    pub fn compile_query(&mut self, query: &Query) -> Result<CompiledQuery, CompileErrors> {
        let mut input = None;
        let mut rest = vec![];
        for e in &query.exprs {
            if input.is_none() && !e.negated {
                let is_input = |t: &Term| t.as_var().map(|v| v.as_ref() == INPUT) == Some(true);
                match e.as_equality() {
                    Some((a, b)) if is_input(a) => {
                        input = Some(b.clone());
                        continue;
                    }
                    Some((a, b)) if is_input(b) => {
                        input = Some(a.clone());
                        continue;
                    }
                    _ => (),
                }
            }
            rest.push(e.as_ref().clone());
        }

        let input = match input {
            Some(t) => match self.compile_input(&t) {
                Ok(template) => Some(template),
                Err(e) => {
                    self.errors = e.0;
                    None
                }
            },
            None => None,
        };

        let scope = Scope::default();
        let mut locals = BTreeSet::new();
        for e in &rest {
            output_vars(e, &mut locals);
        }
        locals.retain(|v| !scope.is_global_name(v));
        let exprs: Vec<Expr> = rest
            .iter()
            .map(|e| e.map_terms(&mut |t| scope.resolve_term(t, &locals)))
            .collect();
        let body = if self.check_calls(&exprs) {
            self.reorder(exprs).0
        } else {
            vec![]
        };

        let vars = locals.into_iter().filter(|v| !is_generated(v)).collect();
        self.finish(CompiledQuery { body, input, vars })
    }
}
