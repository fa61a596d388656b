//! Inheritance traversal and cycle detection.
//!
//! Base edges come straight from source text, so they may dangle (the base
//! was never ingested) or loop (`class A(B)` / `class B(A)` across files).
//! Traversal is breadth-first with a visited set; loops are reported, never
//! followed.

use std::collections::{HashMap, HashSet, VecDeque};

use petgraph::algo::{is_cyclic_directed, tarjan_scc};
use petgraph::graph::{DiGraph, NodeIndex};
use serde::Serialize;
use tracing::warn;

use crate::store::GraphStore;

/// One step of a breadth-first ancestor walk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "key", rename_all = "snake_case")]
pub enum Ancestor {
    /// A class present in the store.
    Resolved(String),
    /// A base key with no stored class. Never expanded.
    Dangling(String),
}

/// A class and every ancestor reachable from it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Lineage {
    /// Breadth-first order, starting with the class itself.
    pub ancestors: Vec<Ancestor>,
    /// The inheritance graph reachable from the class contains a loop.
    pub cycle: bool,
}

impl Lineage {
    /// Stored classes in breadth-first order.
    pub fn classes(&self) -> Vec<&str> {
        self.ancestors
            .iter()
            .filter_map(|a| match a {
                Ancestor::Resolved(key) => Some(key.as_str()),
                Ancestor::Dangling(_) => None,
            })
            .collect()
    }

    /// Base keys with no stored class, in breadth-first order.
    pub fn dangling(&self) -> Vec<&str> {
        self.ancestors
            .iter()
            .filter_map(|a| match a {
                Ancestor::Dangling(key) => Some(key.as_str()),
                Ancestor::Resolved(_) => None,
            })
            .collect()
    }

    /// Every ancestor is known and the chain is acyclic, so absence of a
    /// member is conclusive.
    pub fn is_complete(&self) -> bool {
        !self.ancestors.is_empty()
            && self.ancestors.iter().all(|a| matches!(a, Ancestor::Resolved(_)))
            && !self.cycle
    }
}

/// Collect the lineage of `class_key`. An unknown class yields an empty lineage.
pub async fn lineage<S: GraphStore + ?Sized>(
    store: &S,
    class_key: &str,
) -> crate::error::Result<Lineage> {
    let mut out = Lineage::default();
    let mut edges: Vec<(String, String)> = Vec::new();
    let mut visited: HashSet<String> = HashSet::from([class_key.to_string()]);
    let mut queue: VecDeque<String> = VecDeque::from([class_key.to_string()]);

    while let Some(key) = queue.pop_front() {
        let Some(class) = store.resolve_class(&key).await? else {
            if key != class_key {
                out.ancestors.push(Ancestor::Dangling(key));
            }
            continue;
        };
        out.ancestors.push(Ancestor::Resolved(class.key.clone()));
        for base in class.bases {
            edges.push((class.key.clone(), base.clone()));
            if visited.insert(base.clone()) {
                queue.push_back(base);
            }
        }
    }

    out.cycle = is_cyclic_directed(&build_graph(&edges).0);
    if out.cycle {
        warn!(class = class_key, "Inheritance cycle detected; ancestors searched once");
    }
    Ok(out)
}

/// Every inheritance cycle among `edges`, each as a sorted list of class keys.
pub fn find_cycles(edges: &[(String, String)]) -> Vec<Vec<String>> {
    let (graph, _) = build_graph(edges);
    let mut cycles: Vec<Vec<String>> = tarjan_scc(&graph)
        .into_iter()
        .filter(|scc| scc.len() > 1 || scc.iter().any(|n| graph.contains_edge(*n, *n)))
        .map(|scc| {
            let mut keys: Vec<String> = scc.into_iter().map(|n| graph[n].clone()).collect();
            keys.sort();
            keys
        })
        .collect();
    cycles.sort();
    cycles
}

fn build_graph(edges: &[(String, String)]) -> (DiGraph<String, ()>, HashMap<String, NodeIndex>) {
    let mut graph = DiGraph::new();
    let mut index: HashMap<String, NodeIndex> = HashMap::new();
    for (from, to) in edges {
        let a = *index
            .entry(from.clone())
            .or_insert_with(|| graph.add_node(from.clone()));
        let b = *index
            .entry(to.clone())
            .or_insert_with(|| graph.add_node(to.clone()));
        graph.add_edge(a, b, ());
    }
    (graph, index)
}
