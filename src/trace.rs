// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::ast::{DocKind, Expr, Query, Ref, Rule, Var};
use crate::value::Value;

use std::collections::{BTreeMap, BTreeSet};

use serde::ser::Serializer;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Op {
    Enter,
    Exit,
    Eval,
    Redo,
    Fail,
}

#[derive(Debug, Clone)]
pub enum Node {
    Body(Ref<Query>),
    Expr(Ref<Expr>),
    Rule(Ref<Rule>),
}

impl Node {
    pub fn type_name(&self) -> &'static str {
        match self {
            Node::Body(_) => "body",
            Node::Expr(_) => "expr",
            Node::Rule(_) => "rule",
        }
    }
}

impl Serialize for Node {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Node::Body(q) => q.serialize(serializer),
            Node::Expr(e) => e.serialize(serializer),
            Node::Rule(r) => r.serialize(serializer),
        }
    }
}

/// A single step of evaluation.
#[derive(Debug, Clone)]
pub struct Event {
    pub op: Op,
    pub query_id: u64,
    pub parent_id: u64,
    pub node: Node,
    /// Bindings of the query at the time of the event, sorted by name.
    pub locals: Vec<(Var, Value)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Explain {
    #[default]
    Off,
    Full,
    Truth,
}

impl Explain {
    /// Unrecognized modes disable explanations.
    pub fn from_param(param: Option<&str>) -> Explain {
        match param {
            Some("full") => Explain::Full,
            Some("truth") => Explain::Truth,
            _ => Explain::Off,
        }
    }
}

/// Filter a full trace down to the events on the derivation that made the
/// root query succeed. Returns nothing when the root query never exits.
pub fn truth(events: &[Event]) -> Vec<Event> {
    let mut graph = TruthGraph {
        events,
        edges: vec![vec![]; events.len()],
        by_time: 0,
        by_query: BTreeMap::new(),
        all_paths: BTreeSet::new(),
    };
    for i in 0..events.len() {
        graph.update(i);
    }
    graph.answer()
}

// Events are linked in time order except where evaluation backtracks. A
// redo is linked to the point the search restarted from, so the failed
// branch becomes a dead end that the final search does not traverse.
struct TruthGraph<'e> {
    events: &'e [Event],
    edges: Vec<Vec<usize>>,
    by_time: usize,
    by_query: BTreeMap<u64, Vec<usize>>,
    all_paths: BTreeSet<u64>,
}

impl TruthGraph<'_> {
    fn push(&mut self, i: usize) {
        self.by_time = i;
        self.by_query
            .entry(self.events[i].query_id)
            .or_default()
            .push(i);
    }

    fn update(&mut self, i: usize) {
        if i == 0 {
            self.push(i);
            return;
        }
        let events = self.events;
        let event = &events[i];
        if event.op != Op::Redo || self.check_all_paths(event) {
            self.edges[self.by_time].push(i);
            self.push(i);
            return;
        }

        let restart = match &event.node {
            Node::Rule(_) => self
                .by_query
                .get(&event.parent_id)
                .and_then(|q| q.last().copied()),
            Node::Expr(expr) => {
                let query = self.by_query.get(&event.query_id);
                query.and_then(|q| {
                    q.iter().rev().copied().find(|&j| match &events[j].node {
                        Node::Expr(prev) => expr.index > 0 && prev.index == expr.index - 1,
                        Node::Body(_) | Node::Rule(_) => expr.index == 0,
                    })
                })
            }
            Node::Body(_) => return,
        };
        if let Some(j) = restart {
            self.edges[j].push(i);
            self.push(i);
        }
    }

    // Every branch is kept for queries evaluated under a negated
    // expression and for partial documents, which are always enumerated.
    fn check_all_paths(&mut self, event: &Event) -> bool {
        if self.all_paths.contains(&event.query_id) {
            return true;
        }
        if event.query_id != event.parent_id && self.all_paths.contains(&event.parent_id) {
            self.all_paths.insert(event.query_id);
            return true;
        }
        if event.op != Op::Enter {
            return false;
        }
        let events = self.events;
        let Some(prev) = self
            .by_query
            .get(&event.parent_id)
            .and_then(|q| q.last())
            .map(|&j| &events[j])
        else {
            return false;
        };
        let Node::Expr(prev_expr) = &prev.node else {
            return false;
        };
        let all = match &event.node {
            Node::Rule(rule) => rule.kind() != DocKind::Complete,
            Node::Body(_) => prev_expr.negated,
            Node::Expr(_) => false,
        };
        if all {
            self.all_paths.insert(event.query_id);
        }
        all
    }

    fn answer(&self) -> Vec<Event> {
        let Some(root) = self.events.first() else {
            return vec![];
        };
        let sink = self.by_query.get(&root.query_id).and_then(|q| {
            q.iter()
                .copied()
                .find(|&j| self.events[j].op == Op::Exit)
        });
        let Some(sink) = sink else {
            return vec![];
        };

        let mut visited = vec![false; self.events.len()];
        let mut path = vec![];
        if self.dfs(0, sink, &mut visited, &mut path) {
            path.into_iter().map(|i| self.events[i].clone()).collect()
        } else {
            vec![]
        }
    }

    fn dfs(&self, u: usize, sink: usize, visited: &mut [bool], path: &mut Vec<usize>) -> bool {
        if visited[u] {
            return false;
        }
        visited[u] = true;
        path.push(u);
        if u == sink {
            return true;
        }
        for &v in &self.edges[u] {
            if self.dfs(v, sink, visited, path) {
                return true;
            }
        }
        path.pop();
        false
    }
}
