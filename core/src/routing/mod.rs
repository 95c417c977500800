//! Multi-metric routing
//!
//! - Table: per-device rows addressed by `(metric, source, target)`, merged
//!   last-writer-wins and gossiped to neighbors after every refresh
//! - Resolver: builds a weighted graph for one metric and pops the K cheapest
//!   paths off a min-heap

pub mod resolver;
pub mod table;

pub use resolver::{best_paths, Path};
pub use table::{Metric, RoutingEntry, RoutingTable};
