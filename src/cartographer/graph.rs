//! Graph Construction - Snapshot Edition
//!
//! Tokens are nodes, every venue quote is a directed edge weighted
//! `-ln(rate)`. A cycle whose weights sum below zero returns more than it
//! started with. Each tick builds a fresh [`GraphSnapshot`] and publishes it
//! through the [`SnapshotStore`]; readers holding the previous snapshot keep
//! a consistent view until they drop it.

use alloy_primitives::Address;
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::feed::Quote;

/// Rates outside this band are decimal bugs, not prices
const MAX_REASONABLE_RATE: f64 = 1e12;
const MIN_REASONABLE_RATE: f64 = 1e-12;

/// Edge data in the quote graph
#[derive(Debug, Clone)]
pub struct Edge {
    pub quote: Arc<Quote>,
    pub weight: f64,
}

/// Immutable view of one tick's quotes
pub struct GraphSnapshot {
    pub graph: DiGraph<Address, Edge>,
    token_to_node: HashMap<Address, NodeIndex>,
    pub built_at: DateTime<Utc>,
    /// Highest block any quote was read at
    pub block: u64,
    /// Publication counter, assigned by the store
    pub generation: u64,
    /// Some venues were missing when this snapshot was built
    pub partial: bool,
}

impl GraphSnapshot {
    pub fn empty() -> Self {
        Self {
            graph: DiGraph::new(),
            token_to_node: HashMap::new(),
            built_at: Utc::now(),
            block: 0,
            generation: 0,
            partial: false,
        }
    }

    pub fn build(quotes: &[Arc<Quote>], partial: bool) -> Self {
        let mut snapshot = Self { partial, ..Self::empty() };
        let mut skipped_invalid = 0;

        for quote in quotes {
            if !snapshot.add_quote(quote.clone()) {
                skipped_invalid += 1;
            }
        }

        let mut venue_counts: HashMap<&str, usize> = HashMap::new();
        for edge in snapshot.graph.edge_references() {
            *venue_counts.entry(edge.weight().quote.venue.as_str()).or_insert(0) += 1;
        }

        debug!(
            "Graph built: {} nodes, {} edges",
            snapshot.graph.node_count(),
            snapshot.graph.edge_count()
        );
        if skipped_invalid > 0 {
            warn!("  Skipped {} quotes with invalid rates", skipped_invalid);
        }
        for (venue, count) in &venue_counts {
            debug!("    {}: {}", venue, count);
        }

        snapshot
    }

    /// Add a quote as an edge. Returns false if its rate is unusable.
    fn add_quote(&mut self, quote: Arc<Quote>) -> bool {
        if quote.token_in == quote.token_out || quote.price_ratio.is_zero() {
            return false;
        }

        let rate = quote.price_ratio.to_f64();
        if !(MIN_REASONABLE_RATE..=MAX_REASONABLE_RATE).contains(&rate) {
            warn!(
                "Rate {:.2e} on {} pool {:?} out of range - likely decimal bug!",
                rate, quote.venue, quote.pool
            );
            return false;
        }

        let weight = quote.weight();
        if !weight.is_finite() {
            return false;
        }

        let from = self.get_or_create_node(quote.token_in);
        let to = self.get_or_create_node(quote.token_out);
        self.block = self.block.max(quote.block);
        self.graph.add_edge(from, to, Edge { quote, weight });
        true
    }

    fn get_or_create_node(&mut self, token: Address) -> NodeIndex {
        if let Some(&node) = self.token_to_node.get(&token) {
            return node;
        }
        let node = self.graph.add_node(token);
        self.token_to_node.insert(token, node);
        node
    }

    pub fn node(&self, token: &Address) -> Option<NodeIndex> {
        self.token_to_node.get(token).copied()
    }

    pub fn token(&self, node: NodeIndex) -> Option<Address> {
        self.graph.node_weight(node).copied()
    }

    pub fn edge(&self, edge: EdgeIndex) -> Option<&Edge> {
        self.graph.edge_weight(edge)
    }

    /// Parallel edges `from -> to`, one per venue pool
    pub fn edges_between(&self, from: NodeIndex, to: NodeIndex) -> impl Iterator<Item = (EdgeIndex, &Edge)> {
        self.graph
            .edges_connecting(from, to)
            .map(|e| (e.id(), e.weight()))
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn quote_count(&self) -> usize {
        self.graph.edge_count()
    }
}

/// Holds the current snapshot; publication is a single atomic pointer swap
pub struct SnapshotStore {
    current: ArcSwap<GraphSnapshot>,
    generation: AtomicU64,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(GraphSnapshot::empty()),
            generation: AtomicU64::new(0),
        }
    }

    /// Replace the current snapshot. Returns its generation.
    pub fn publish(&self, mut snapshot: GraphSnapshot) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        snapshot.generation = generation;
        info!(
            "🗺️  Snapshot #{}: {} tokens, {} edges @ block {}{}",
            generation,
            snapshot.node_count(),
            snapshot.edge_count(),
            snapshot.block,
            if snapshot.partial { " (partial)" } else { "" }
        );
        self.current.store(Arc::new(snapshot));
        generation
    }

    pub fn load(&self) -> Arc<GraphSnapshot> {
        self.current.load_full()
    }
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}
