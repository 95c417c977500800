//! K-best path search over one metric of a routing table
//!
//! Candidates sit in a `BinaryHeap` with reversed ordering so the cheapest
//! accumulated weight pops first; an insertion counter breaks ties so equal
//! weights come out in the order they were pushed. A candidate never revisits
//! a node already on its own path, and arrivals at the target are not expanded
//! further, so every result is a simple path. The search stops after `k`
//! arrivals at the target or when the frontier runs dry.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use super::table::{Metric, RoutingTable};
use crate::message::Route;

/// An ordered list of hops and their summed weight
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Path {
    pub hops: Vec<Route>,
    pub weight: f64,
}

impl Path {
    fn from_nodes(nodes: &[String], weight: f64) -> Self {
        let hops = nodes
            .windows(2)
            .map(|pair| Route::new(pair[0].clone(), pair[1].clone()))
            .collect();
        Self { hops, weight }
    }

    /// Labels visited, source first
    pub fn nodes(&self) -> Vec<&str> {
        let mut nodes: Vec<&str> = Vec::with_capacity(self.hops.len() + 1);
        if let Some(first) = self.hops.first() {
            nodes.push(&first.source);
        }
        nodes.extend(self.hops.iter().map(|hop| hop.target.as_str()));
        nodes
    }

    pub fn first_hop(&self) -> Option<&Route> {
        self.hops.first()
    }

    pub fn last_hop(&self) -> Option<&Route> {
        self.hops.last()
    }
}

impl std::fmt::Display for Path {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] = {:.2}", self.nodes().join("-"), self.weight)
    }
}

struct Graph<'a> {
    adjacency: HashMap<&'a str, Vec<(&'a str, f64)>>,
}

impl<'a> Graph<'a> {
    fn from_table(table: &'a RoutingTable, metric: Metric) -> Self {
        let mut adjacency: HashMap<&str, Vec<(&str, f64)>> = HashMap::new();
        for (source, target, weight) in table.edges(metric) {
            adjacency.entry(source).or_default().push((target, weight));
        }
        Self { adjacency }
    }

    fn outgoing(&self, node: &str) -> &[(&'a str, f64)] {
        self.adjacency.get(node).map(Vec::as_slice).unwrap_or(&[])
    }
}

struct Candidate {
    weight: f64,
    seq: u64,
    nodes: Vec<String>,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    // Reversed so the max-heap yields the lightest, then the oldest
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .weight
            .total_cmp(&self.weight)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Up to `k` paths from `source` to `target`, ascending by total weight
pub fn best_paths(
    table: &RoutingTable,
    metric: Metric,
    source: &str,
    target: &str,
    k: usize,
) -> Vec<Path> {
    let mut results = Vec::new();
    if k == 0 || source == target {
        return results;
    }

    let graph = Graph::from_table(table, metric);
    let mut heap = BinaryHeap::new();
    let mut seq = 0u64;
    heap.push(Candidate {
        weight: 0.0,
        seq,
        nodes: vec![source.to_string()],
    });

    while let Some(current) = heap.pop() {
        let Some(node) = current.nodes.last() else {
            continue;
        };

        if node == target {
            results.push(Path::from_nodes(&current.nodes, current.weight));
            if results.len() == k {
                break;
            }
            continue;
        }

        for &(next, weight) in graph.outgoing(node) {
            if current.nodes.iter().any(|visited| visited == next) {
                continue;
            }
            seq += 1;
            let mut nodes = current.nodes.clone();
            nodes.push(next.to_string());
            heap.push(Candidate {
                weight: current.weight + weight,
                seq,
                nodes,
            });
        }
    }

    results
}
