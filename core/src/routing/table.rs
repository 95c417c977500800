//! Routing table: weights addressed by `(metric, source, target)`
//!
//! A device's table holds its own links plus everything neighbors gossiped to
//! it. Rows only ever reference the three metrics of [`Metric`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::str::FromStr;

use crate::device::LinkQuality;
use crate::MeshError;

/// Quantity a path search minimizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Metric {
    Distance,
    Latency,
    ErrorRate,
}

impl Metric {
    pub const ALL: [Metric; 3] = [Metric::Distance, Metric::Latency, Metric::ErrorRate];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Distance => "distance",
            Self::Latency => "latency",
            Self::ErrorRate => "error-rate",
        }
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = MeshError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "distance" => Ok(Self::Distance),
            "latency" => Ok(Self::Latency),
            "error-rate" => Ok(Self::ErrorRate),
            other => Err(MeshError::UnknownMetric(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct RouteKey {
    metric: Metric,
    source: String,
    target: String,
}

/// One row of a routing table, as exposed to callers and carried on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingEntry {
    pub metric: Metric,
    pub source: String,
    pub target: String,
    pub weight: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<RoutingEntry>", into = "Vec<RoutingEntry>")]
pub struct RoutingTable {
    rows: BTreeMap<RouteKey, f64>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The three rows describing one direct link
    pub fn link_row(source: &str, target: &str, distance: f64, quality: LinkQuality) -> Self {
        let mut row = Self::new();
        row.insert(Metric::Distance, source, target, distance);
        row.insert(Metric::ErrorRate, source, target, quality.error_rate);
        row.insert(Metric::Latency, source, target, quality.latency);
        row
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Insert or overwrite one weight; returns the previous one
    pub fn insert(&mut self, metric: Metric, source: &str, target: &str, weight: f64) -> Option<f64> {
        self.rows.insert(
            RouteKey {
                metric,
                source: source.to_string(),
                target: target.to_string(),
            },
            weight,
        )
    }

    pub fn get(&self, metric: Metric, source: &str, target: &str) -> Option<f64> {
        self.rows
            .get(&RouteKey {
                metric,
                source: source.to_string(),
                target: target.to_string(),
            })
            .copied()
    }

    /// Copy every row of `other` over this table; incoming values win
    pub fn merge(&mut self, other: &RoutingTable) {
        for (key, weight) in &other.rows {
            self.rows.insert(key.clone(), *weight);
        }
    }

    /// Drop every row that has `label` as source or target
    pub fn purge_label(&mut self, label: &str) -> usize {
        let before = self.rows.len();
        self.rows
            .retain(|key, _| key.source != label && key.target != label);
        before - self.rows.len()
    }

    /// Drop every row whose source is `label`
    pub fn purge_source(&mut self, label: &str) -> usize {
        let before = self.rows.len();
        self.rows.retain(|key, _| key.source != label);
        before - self.rows.len()
    }

    pub fn entries(&self) -> impl Iterator<Item = RoutingEntry> + '_ {
        self.rows.iter().map(|(key, weight)| RoutingEntry {
            metric: key.metric,
            source: key.source.clone(),
            target: key.target.clone(),
            weight: *weight,
        })
    }

    /// Directed edges `(source, target, weight)` for one metric, in key order
    pub fn edges(&self, metric: Metric) -> impl Iterator<Item = (&str, &str, f64)> + '_ {
        self.rows
            .iter()
            .filter(move |(key, _)| key.metric == metric)
            .map(|(key, weight)| (key.source.as_str(), key.target.as_str(), *weight))
    }

    /// Fixed-width text rendering, one row per entry
    pub fn render(&self, device: &str) -> String {
        let rule = "-".repeat(40);
        let mut out = String::new();
        if self.is_empty() {
            let _ = writeln!(out, "No table found for {}", device);
            return out;
        }
        let _ = writeln!(out, "{}", rule);
        let _ = writeln!(out, "| {:<10} | {:<24} |", "Device", device);
        let _ = writeln!(out, "{}", rule);
        let _ = writeln!(
            out,
            "| {:<10} | {:<6} | {:<6} | {:<6} |",
            "Type", "Source", "Target", "Weight"
        );
        let _ = writeln!(out, "{}", rule);
        for entry in self.entries() {
            let _ = writeln!(
                out,
                "| {:<10} | {:<6} | {:<6} | {:<6.2} |",
                entry.metric, entry.source, entry.target, entry.weight
            );
        }
        let _ = writeln!(out, "{}", rule);
        out
    }
}

impl From<Vec<RoutingEntry>> for RoutingTable {
    fn from(entries: Vec<RoutingEntry>) -> Self {
        let mut table = Self::new();
        for entry in entries {
            table.insert(entry.metric, &entry.source, &entry.target, entry.weight);
        }
        table
    }
}

impl From<RoutingTable> for Vec<RoutingEntry> {
    fn from(table: RoutingTable) -> Self {
        table.entries().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names() {
        for metric in Metric::ALL {
            assert_eq!(metric.as_str().parse::<Metric>().unwrap(), metric);
        }
        assert_eq!(
            "hops".parse::<Metric>(),
            Err(MeshError::UnknownMetric("hops".to_string()))
        );
    }

    #[test]
    fn test_merge_same_row_twice_is_idempotent() {
        let mut row = RoutingTable::new();
        row.insert(Metric::Distance, "A", "B", 2.0);

        let mut once = RoutingTable::new();
        once.merge(&row);
        let mut twice = once.clone();
        twice.merge(&row);

        assert_eq!(once, twice);
    }

    #[test]
    fn test_merge_last_writer_wins() {
        let mut table = RoutingTable::new();
        table.insert(Metric::Latency, "A", "B", 1.0);

        let mut newer = RoutingTable::new();
        newer.insert(Metric::Latency, "A", "B", 9.0);
        newer.insert(Metric::Latency, "B", "C", 3.0);
        table.merge(&newer);

        assert_eq!(table.get(Metric::Latency, "A", "B"), Some(9.0));
        assert_eq!(table.get(Metric::Latency, "B", "C"), Some(3.0));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_same_pair_different_metrics_are_distinct_rows() {
        let table = RoutingTable::link_row(
            "A",
            "B",
            7.0,
            LinkQuality {
                error_rate: 0.5,
                latency: 3.0,
            },
        );
        assert_eq!(table.len(), 3);
        assert_eq!(table.get(Metric::Distance, "A", "B"), Some(7.0));
        assert_eq!(table.get(Metric::ErrorRate, "A", "B"), Some(0.5));
        assert_eq!(table.get(Metric::Latency, "A", "B"), Some(3.0));
        assert_eq!(table.get(Metric::Distance, "B", "A"), None);
    }

    #[test]
    fn test_purge_label_removes_both_directions() {
        let mut table = RoutingTable::new();
        table.insert(Metric::Distance, "A", "B", 1.0);
        table.insert(Metric::Distance, "B", "A", 1.0);
        table.insert(Metric::Distance, "B", "C", 1.0);

        assert_eq!(table.purge_label("A"), 2);
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(Metric::Distance, "B", "C"), Some(1.0));
    }

    #[test]
    fn test_purge_source_keeps_inbound_rows() {
        let mut table = RoutingTable::new();
        table.insert(Metric::Distance, "A", "B", 1.0);
        table.insert(Metric::Latency, "B", "C", 1.0);
        table.insert(Metric::Distance, "C", "B", 1.0);

        assert_eq!(table.purge_source("B"), 1);
        assert!(table.get(Metric::Distance, "C", "B").is_some());
        assert!(table.get(Metric::Distance, "A", "B").is_some());
    }

    #[test]
    fn test_edges_filter_by_metric() {
        let mut table = RoutingTable::new();
        table.insert(Metric::Distance, "A", "B", 1.0);
        table.insert(Metric::Latency, "A", "B", 5.0);
        let edges: Vec<_> = table.edges(Metric::Latency).collect();
        assert_eq!(edges, vec![("A", "B", 5.0)]);
    }

    #[test]
    fn test_serde_as_entry_list() {
        let mut table = RoutingTable::new();
        table.insert(Metric::ErrorRate, "A", "B", 0.25);
        let json = serde_json::to_string(&table).unwrap();
        assert!(json.contains("\"error-rate\""));
        let back: RoutingTable = serde_json::from_str(&json).unwrap();
        assert_eq!(back, table);
    }

    #[test]
    fn test_render() {
        let mut table = RoutingTable::new();
        assert!(table.render("A").contains("No table found"));
        table.insert(Metric::Distance, "A", "B", 7.071);
        let text = table.render("A");
        assert!(text.contains("distance"));
        assert!(text.contains("7.07"));
    }
}
