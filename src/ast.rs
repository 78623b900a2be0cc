// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::lexer::*;
use crate::value::Value;

use core::{cmp, fmt, ops::Deref};
use std::collections::BTreeSet;
use std::sync::Arc;

use serde::ser::{SerializeMap, SerializeSeq, Serializer};
use serde::Serialize;

pub type Var = Arc<str>;

pub struct NodeRef<T> {
    r: Arc<T>,
}

impl<T> Clone for NodeRef<T> {
    fn clone(&self) -> Self {
        Self { r: self.r.clone() }
    }
}

impl<T: fmt::Debug> fmt::Debug for NodeRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.r.as_ref().fmt(f)
    }
}

impl<T> cmp::PartialEq for NodeRef<T> {
    fn eq(&self, other: &Self) -> bool {
        Arc::as_ptr(&self.r).eq(&Arc::as_ptr(&other.r))
    }
}

impl<T> cmp::Eq for NodeRef<T> {}

impl<T> cmp::Ord for NodeRef<T> {
    fn cmp(&self, other: &Self) -> cmp::Ordering {
        Arc::as_ptr(&self.r).cmp(&Arc::as_ptr(&other.r))
    }
}

impl<T> cmp::PartialOrd for NodeRef<T> {
    fn partial_cmp(&self, other: &Self) -> Option<cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Deref for NodeRef<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.r
    }
}

impl<T> AsRef<T> for NodeRef<T> {
    fn as_ref(&self) -> &T {
        self.deref()
    }
}

impl<T: Serialize> Serialize for NodeRef<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.r.serialize(serializer)
    }
}

impl<T> NodeRef<T> {
    pub fn new(t: T) -> Self {
        Self { r: Arc::new(t) }
    }
}

pub type Ref<T> = NodeRef<T>;

/// Root documents a reference can start from.
pub const DATA: &str = "data";
pub const INPUT: &str = "input";

/// Names beginning with `$` are generated and never visible to callers.
pub fn is_generated(name: &str) -> bool {
    name.starts_with('$')
}

#[derive(Debug, Clone)]
pub enum Term {
    Scalar { span: Span, value: Value },
    Var { span: Span, name: Var },
    // `head` is a variable; dotted fields are stored as string scalars.
    Ref { span: Span, head: Var, path: Vec<Term> },
    Array { span: Span, items: Vec<Term> },
    Object { span: Span, fields: Vec<(Term, Term)> },
}

impl Term {
    pub fn span(&self) -> &Span {
        match self {
            Term::Scalar { span, .. }
            | Term::Var { span, .. }
            | Term::Ref { span, .. }
            | Term::Array { span, .. }
            | Term::Object { span, .. } => span,
        }
    }

    pub fn scalar(span: Span, value: Value) -> Term {
        Term::Scalar { span, value }
    }

    pub fn var(span: Span, name: &str) -> Term {
        Term::Var {
            span,
            name: name.into(),
        }
    }

    /// Build a ground reference such as `data.a.b` from a root and string segments.
    pub fn ref_from_path<S: AsRef<str>>(span: Span, head: &str, path: &[S]) -> Term {
        let path = path
            .iter()
            .map(|s| Term::scalar(span.clone(), Value::from(s.as_ref())))
            .collect();
        Term::Ref {
            span,
            head: head.into(),
            path,
        }
    }

    pub fn as_var(&self) -> Option<&Var> {
        match self {
            Term::Var { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Collect every variable occurring in the term, including ref heads.
    pub fn vars_into(&self, vars: &mut BTreeSet<Var>) {
        match self {
            Term::Scalar { .. } => (),
            Term::Var { name, .. } => {
                vars.insert(name.clone());
            }
            Term::Ref { head, path, .. } => {
                vars.insert(head.clone());
                for t in path {
                    t.vars_into(vars);
                }
            }
            Term::Array { items, .. } => {
                for t in items {
                    t.vars_into(vars);
                }
            }
            Term::Object { fields, .. } => {
                for (k, v) in fields {
                    k.vars_into(vars);
                    v.vars_into(vars);
                }
            }
        }
    }

    pub fn vars(&self) -> BTreeSet<Var> {
        let mut vars = BTreeSet::new();
        self.vars_into(&mut vars);
        vars
    }

    /// The value of a term that contains no variables or references.
    pub fn constant(&self) -> Option<Value> {
        match self {
            Term::Scalar { value, .. } => Some(value.clone()),
            Term::Array { items, .. } => items
                .iter()
                .map(|t| t.constant())
                .collect::<Option<Vec<_>>>()
                .map(Value::from),
            Term::Object { fields, .. } => {
                let mut obj = std::collections::BTreeMap::new();
                for (k, v) in fields {
                    obj.insert(k.constant()?, v.constant()?);
                }
                Some(Value::from(obj))
            }
            Term::Var { .. } | Term::Ref { .. } => None,
        }
    }

    /// Apply `f` to every nested term bottom-up, rebuilding the term.
    pub fn transform(&self, f: &mut dyn FnMut(Term) -> Term) -> Term {
        let rebuilt = match self {
            Term::Scalar { .. } | Term::Var { .. } => self.clone(),
            Term::Ref { span, head, path } => Term::Ref {
                span: span.clone(),
                head: head.clone(),
                path: path.iter().map(|t| t.transform(f)).collect(),
            },
            Term::Array { span, items } => Term::Array {
                span: span.clone(),
                items: items.iter().map(|t| t.transform(f)).collect(),
            },
            Term::Object { span, fields } => Term::Object {
                span: span.clone(),
                fields: fields
                    .iter()
                    .map(|(k, v)| (k.transform(f), v.transform(f)))
                    .collect(),
            },
        };
        f(rebuilt)
    }
}

fn write_ref_segment(f: &mut fmt::Formatter<'_>, term: &Term) -> fmt::Result {
    match term {
        Term::Scalar {
            value: Value::String(s),
            ..
        } if !s.is_empty()
            && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
            && !s.starts_with(|c: char| c.is_ascii_digit()) =>
        {
            write!(f, ".{s}")
        }
        _ => write!(f, "[{term}]"),
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Scalar { value, .. } => write!(f, "{value}"),
            Term::Var { name, .. } => write!(f, "{name}"),
            Term::Ref { head, path, .. } => {
                write!(f, "{head}")?;
                for t in path {
                    write_ref_segment(f, t)?;
                }
                Ok(())
            }
            Term::Array { items, .. } => {
                write!(f, "[")?;
                for (i, t) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{t}")?;
                }
                write!(f, "]")
            }
            Term::Object { fields, .. } => {
                write!(f, "{{")?;
                for (i, (k, v)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

struct TypedTerm<'a, T: Serialize + ?Sized>(&'static str, &'a T);

impl<T: Serialize + ?Sized> Serialize for TypedTerm<'_, T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("type", self.0)?;
        map.serialize_entry("value", self.1)?;
        map.end()
    }
}

struct VarTerm<'a>(&'a str);

impl Serialize for VarTerm<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        TypedTerm("var", self.0).serialize(serializer)
    }
}

struct RefValue<'a>(&'a str, &'a [Term]);

impl Serialize for RefValue<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.1.len() + 1))?;
        seq.serialize_element(&VarTerm(self.0))?;
        for t in self.1 {
            seq.serialize_element(t)?;
        }
        seq.end()
    }
}

struct ObjectFields<'a, T: Serialize>(&'a [(T, T)]);

impl<T: Serialize> Serialize for ObjectFields<'_, T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.0.len()))?;
        for (k, v) in self.0 {
            seq.serialize_element(&[k, v])?;
        }
        seq.end()
    }
}

/// Renders a value in the typed-term form used by the JSON AST, e.g.
/// `{"type": "number", "value": 1}`.
pub struct ValueTerm<'a>(pub &'a Value);

impl Serialize for ValueTerm<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0 {
            Value::Null => TypedTerm("null", &()).serialize(serializer),
            Value::Bool(b) => TypedTerm("boolean", b).serialize(serializer),
            Value::Number(n) => TypedTerm("number", n).serialize(serializer),
            Value::String(s) => TypedTerm("string", s.as_ref()).serialize(serializer),
            Value::Array(items) => {
                let items: Vec<ValueTerm> = items.iter().map(ValueTerm).collect();
                TypedTerm("array", &items).serialize(serializer)
            }
            Value::Set(items) => {
                let items: Vec<ValueTerm> = items.iter().map(ValueTerm).collect();
                TypedTerm("set", &items).serialize(serializer)
            }
            Value::Object(fields) => {
                let fields: Vec<(ValueTerm, ValueTerm)> = fields
                    .iter()
                    .map(|(k, v)| (ValueTerm(k), ValueTerm(v)))
                    .collect();
                TypedTerm("object", &ObjectFields(&fields)).serialize(serializer)
            }
            Value::Undefined => TypedTerm("undefined", &()).serialize(serializer),
        }
    }
}

impl Serialize for Term {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Term::Scalar { value, .. } => ValueTerm(value).serialize(serializer),
            Term::Var { name, .. } => VarTerm(name).serialize(serializer),
            Term::Ref { head, path, .. } => {
                TypedTerm("ref", &RefValue(head, path)).serialize(serializer)
            }
            Term::Array { items, .. } => TypedTerm("array", items).serialize(serializer),
            Term::Object { fields, .. } => {
                TypedTerm("object", &ObjectFields(fields)).serialize(serializer)
            }
        }
    }
}

/// Infix operators and the builtin names they are stored as.
pub const INFIX_OPS: [(&str, &str); 6] = [
    ("=", "eq"),
    ("!=", "neq"),
    ("<", "lt"),
    ("<=", "lte"),
    (">", "gt"),
    (">=", "gte"),
];

pub fn infix_symbol(op: &str) -> Option<&'static str> {
    INFIX_OPS.iter().find(|(_, name)| *name == op).map(|(s, _)| *s)
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Term(Term),
    Call { op: Var, args: Vec<Term> },
}

#[derive(Debug, Clone)]
pub struct Expr {
    pub span: Span,
    pub index: usize,
    pub negated: bool,
    pub kind: ExprKind,
}

impl Expr {
    pub fn terms(&self) -> Vec<&Term> {
        match &self.kind {
            ExprKind::Term(t) => vec![t],
            ExprKind::Call { args, .. } => args.iter().collect(),
        }
    }

    pub fn vars(&self) -> BTreeSet<Var> {
        let mut vars = BTreeSet::new();
        for t in self.terms() {
            t.vars_into(&mut vars);
        }
        vars
    }

    /// For `a = b`, the two sides.
    pub fn as_equality(&self) -> Option<(&Term, &Term)> {
        match &self.kind {
            ExprKind::Call { op, args } if op.as_ref() == "eq" && args.len() == 2 => {
                Some((&args[0], &args[1]))
            }
            _ => None,
        }
    }

    pub fn map_terms(&self, f: &mut dyn FnMut(&Term) -> Term) -> Expr {
        let kind = match &self.kind {
            ExprKind::Term(t) => ExprKind::Term(f(t)),
            ExprKind::Call { op, args } => ExprKind::Call {
                op: op.clone(),
                args: args.iter().map(|t| f(t)).collect(),
            },
        };
        Expr {
            span: self.span.clone(),
            index: self.index,
            negated: self.negated,
            kind,
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negated {
            write!(f, "not ")?;
        }
        match &self.kind {
            ExprKind::Term(t) => write!(f, "{t}"),
            ExprKind::Call { op, args } => match (infix_symbol(op), args.as_slice()) {
                (Some(sym), [a, b]) => write!(f, "{a} {sym} {b}"),
                _ => {
                    write!(f, "{op}(")?;
                    for (i, t) in args.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{t}")?;
                    }
                    write!(f, ")")
                }
            },
        }
    }
}

struct CallTerms<'a>(&'a str, &'a [Term]);

impl Serialize for CallTerms<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.1.len() + 1))?;
        seq.serialize_element(&TypedTerm("ref", &[VarTerm(self.0)]))?;
        for t in self.1 {
            seq.serialize_element(t)?;
        }
        seq.end()
    }
}

impl Serialize for Expr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("index", &self.index)?;
        if self.negated {
            map.serialize_entry("negated", &true)?;
        }
        match &self.kind {
            ExprKind::Term(t) => map.serialize_entry("terms", t)?,
            ExprKind::Call { op, args } => map.serialize_entry("terms", &CallTerms(op, args))?,
        }
        map.end()
    }
}

#[derive(Debug, Clone)]
pub struct Query {
    pub span: Span,
    pub exprs: Vec<Ref<Expr>>,
}

impl Serialize for Query {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.exprs.serialize(serializer)
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, e) in self.exprs.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", e.as_ref())?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocKind {
    Complete,
    PartialSet,
    PartialObject,
}

impl fmt::Display for DocKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DocKind::Complete => "complete",
            DocKind::PartialSet => "partial set",
            DocKind::PartialObject => "partial object",
        })
    }
}

#[derive(Debug, Clone)]
pub struct Rule {
    pub span: Span,
    pub name: Var,
    pub key: Option<Term>,
    pub value: Option<Term>,
    pub body: Query,
}

impl Rule {
    pub fn kind(&self) -> DocKind {
        match (&self.key, &self.value) {
            (Some(_), Some(_)) => DocKind::PartialObject,
            (Some(_), None) => DocKind::PartialSet,
            _ => DocKind::Complete,
        }
    }
}

impl Serialize for Rule {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("name", self.name.as_ref())?;
        if let Some(key) = &self.key {
            map.serialize_entry("key", key)?;
        }
        if let Some(value) = &self.value {
            map.serialize_entry("value", value)?;
        }
        map.serialize_entry("body", &self.body)?;
        map.end()
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(key) = &self.key {
            write!(f, "[{key}]")?;
        }
        if let Some(value) = &self.value {
            write!(f, " = {value}")?;
        }
        write!(f, " :- {}", self.body)
    }
}

#[derive(Debug, Clone)]
pub struct Package {
    pub span: Span,
    pub path: Vec<Var>,
}

impl Serialize for Package {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let path = Term::ref_from_path(self.span.clone(), DATA, &self.path);
        let mut map = serializer.serialize_map(Some(1))?;
        match &path {
            Term::Ref { head, path, .. } => map.serialize_entry("path", &RefValue(head, path))?,
            _ => map.serialize_entry("path", &path)?,
        }
        map.end()
    }
}

#[derive(Debug, Clone)]
pub struct Import {
    pub span: Span,
    pub path: Term,
    pub alias: Option<Var>,
}

impl Import {
    /// The name the import is referred to by inside rule bodies.
    pub fn name(&self) -> Option<Var> {
        if let Some(alias) = &self.alias {
            return Some(alias.clone());
        }
        match &self.path {
            Term::Ref { path, .. } => match path.last() {
                Some(Term::Scalar {
                    value: Value::String(s),
                    ..
                }) => Some(s.clone()),
                _ => None,
            },
            Term::Var { name, .. } => Some(name.clone()),
            _ => None,
        }
    }
}

impl Serialize for Import {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("path", &self.path)?;
        if let Some(alias) = &self.alias {
            map.serialize_entry("alias", alias.as_ref())?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Module {
    pub package: Package,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub imports: Vec<Import>,
    pub rules: Vec<Ref<Rule>>,
}
