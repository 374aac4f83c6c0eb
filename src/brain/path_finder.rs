//! Path Finder - Bounded Cycle Enumeration
//!
//! Walks the quote graph from every base token looking for closed 2-hop
//! (`A → B → A`, two different venues) and 3-hop (`A → B → C → A`) cycles.
//! A cycle only qualifies when its rate product clears the configured margin,
//! which is the same as its `-ln(rate)` weights summing below zero by that
//! margin.
//!
//! Each token cycle is reported once, with the best venue assignment picked
//! by the configured [`TieBreak`]. [`Candidates`] is lazy: start tokens are
//! expanded one at a time as the consumer pulls, so stopping early costs
//! nothing, and [`Candidates::reset`] replays the same finite sequence.

use alloy_primitives::Address;
use chrono::{DateTime, Utc};
use petgraph::graph::NodeIndex;
use std::cmp::Ordering;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cartographer::{GraphSnapshot, Quote};
use crate::config::{Config, TieBreak};
use crate::fixed::{Bps, Ratio, Usd};
use crate::tokens::TokenRegistry;

pub const MIN_HOPS: usize = 2;
pub const MAX_HOPS: usize = 3;

// ============================================
// PATH
// ============================================

/// One swap leg, backed by the quote it was priced from
#[derive(Debug, Clone)]
pub struct Hop {
    pub quote: Arc<Quote>,
}

impl Hop {
    pub fn new(quote: Arc<Quote>) -> Self {
        Self { quote }
    }

    pub fn venue(&self) -> &str {
        &self.quote.venue
    }

    pub fn token_in(&self) -> Address {
        self.quote.token_in
    }

    pub fn token_out(&self) -> Address {
        self.quote.token_out
    }

    pub fn pool(&self) -> Address {
        self.quote.pool
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathDefect {
    #[error("path has {0} hops, expected {MIN_HOPS}..={MAX_HOPS}")]
    BadLength(usize),

    #[error("hop {0} does not start where hop {prev} ends", prev = .0 - 1)]
    Broken(usize),

    #[error("path does not return to its start token")]
    NotClosed,

    #[error("token {0:?} visited twice")]
    RepeatedToken(Address),

    #[error("pool {0:?} used twice")]
    RepeatedPool(Address),

    #[error("2-hop cycle must cross two venues")]
    SingleVenue,
}

/// A closed cycle of 2 or 3 hops
#[derive(Debug, Clone)]
pub struct Path {
    pub hops: Vec<Hop>,
}

impl Path {
    /// Build a path, refusing anything that violates the cycle structure
    pub fn new(hops: Vec<Hop>) -> Result<Self, PathDefect> {
        let path = Self { hops };
        path.validate()?;
        Ok(path)
    }

    /// Check the structural invariants: chained hops, closure, no repeated
    /// intermediate token or pool, and two venues for a round trip
    pub fn validate(&self) -> Result<(), PathDefect> {
        let n = self.hops.len();
        if !(MIN_HOPS..=MAX_HOPS).contains(&n) {
            return Err(PathDefect::BadLength(n));
        }

        for i in 1..n {
            if self.hops[i - 1].token_out() != self.hops[i].token_in() {
                return Err(PathDefect::Broken(i));
            }
        }

        if self.hops[n - 1].token_out() != self.hops[0].token_in() {
            return Err(PathDefect::NotClosed);
        }

        let mut tokens = HashSet::new();
        for hop in &self.hops {
            if !tokens.insert(hop.token_in()) {
                return Err(PathDefect::RepeatedToken(hop.token_in()));
            }
        }

        let mut pools = HashSet::new();
        for hop in &self.hops {
            if !pools.insert(hop.pool()) {
                return Err(PathDefect::RepeatedPool(hop.pool()));
            }
        }

        if n == 2 && self.hops[0].venue() == self.hops[1].venue() {
            return Err(PathDefect::SingleVenue);
        }

        Ok(())
    }

    pub fn len(&self) -> usize {
        self.hops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }

    /// Token borrowed and repaid
    pub fn start_token(&self) -> Address {
        self.hops[0].token_in()
    }

    /// Visited tokens in order, without the closing repeat
    pub fn tokens(&self) -> Vec<Address> {
        self.hops.iter().map(Hop::token_in).collect()
    }

    pub fn venues(&self) -> Vec<String> {
        self.hops.iter().map(|h| h.venue().to_string()).collect()
    }

    /// Product of all hop rates; above one means the cycle gains
    pub fn rate_product(&self) -> Option<Ratio> {
        self.hops
            .iter()
            .try_fold(Ratio::ONE, |acc, hop| acc.checked_mul(hop.quote.price_ratio))
    }

    /// Rate product minus one, zero for a losing cycle
    pub fn margin(&self) -> Ratio {
        self.rate_product().unwrap_or(Ratio::ZERO).saturating_sub(Ratio::ONE)
    }

    pub fn margin_bps(&self) -> f64 {
        self.margin().to_f64() * 10_000.0
    }

    /// Sum of per-hop USD depth
    pub fn aggregate_liquidity(&self) -> Usd {
        self.hops.iter().map(|h| h.quote.liquidity_usd).sum()
    }

    /// Shallowest hop, the one that limits trade size
    pub fn min_liquidity(&self) -> Usd {
        self.hops
            .iter()
            .map(|h| h.quote.liquidity_usd)
            .min()
            .unwrap_or(Usd::ZERO)
    }

    /// Age of the oldest quote on the path
    pub fn max_quote_age_ms(&self, now: DateTime<Utc>) -> u64 {
        self.hops.iter().map(|h| h.quote.age_ms(now)).max().unwrap_or(0)
    }

    /// Order-independent identity of the pools involved
    pub fn signature(&self) -> String {
        let mut pools: Vec<String> = self.hops.iter().map(|h| format!("{:?}", h.pool())).collect();
        pools.sort();
        pools.join("-")
    }

    /// Human-readable route, e.g. `WETH -[uni]-> USDC -[sushi]-> WETH`
    pub fn describe(&self, tokens: &TokenRegistry) -> String {
        let mut out = tokens.symbol(&self.start_token());
        for hop in &self.hops {
            out.push_str(&format!(" -[{}]-> {}", hop.venue(), tokens.symbol(&hop.token_out())));
        }
        out
    }
}

// ============================================
// PATH FINDER
// ============================================

#[derive(Debug, Clone)]
pub struct PathFinder {
    max_hops: usize,
    /// Minimum rate-product margin a cycle must show
    min_margin: Bps,
    tie_break: TieBreak,
}

impl PathFinder {
    pub fn new(max_hops: usize, min_margin: Bps, tie_break: TieBreak) -> Self {
        Self {
            max_hops: max_hops.clamp(MIN_HOPS, MAX_HOPS),
            min_margin,
            tie_break,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.max_hops, Bps(config.min_cycle_margin_bps), config.tie_break)
    }

    /// Lazy candidate sequence over `snapshot`, starting from `start_tokens`
    /// that are present in the graph
    pub fn candidates(&self, snapshot: Arc<GraphSnapshot>, start_tokens: &[Address]) -> Candidates {
        let mut starts: Vec<NodeIndex> = start_tokens.iter().filter_map(|t| snapshot.node(t)).collect();
        starts.sort();
        starts.dedup();

        debug!(
            "🔍 Path search: {} start tokens, {} nodes, {} edges, max {} hops",
            starts.len(),
            snapshot.node_count(),
            snapshot.edge_count(),
            self.max_hops
        );

        Candidates {
            snapshot,
            starts,
            next_start: 0,
            pending: VecDeque::new(),
            seen: HashSet::new(),
            max_hops: self.max_hops,
            threshold: Ratio::ONE.saturating_add(self.min_margin.as_ratio()),
            tie_break: self.tie_break,
            emitted: 0,
        }
    }
}

// ============================================
// LAZY CANDIDATE SEQUENCE
// ============================================

/// Finite, restartable candidate stream for one snapshot
#[derive(Clone)]
pub struct Candidates {
    snapshot: Arc<GraphSnapshot>,
    starts: Vec<NodeIndex>,
    next_start: usize,
    pending: VecDeque<Path>,
    /// Token cycles already reported, in canonical rotation
    seen: HashSet<Vec<NodeIndex>>,
    max_hops: usize,
    threshold: Ratio,
    tie_break: TieBreak,
    emitted: usize,
}

impl Candidates {
    /// Start the sequence over from the first start token
    pub fn reset(&mut self) {
        self.next_start = 0;
        self.pending.clear();
        self.seen.clear();
        self.emitted = 0;
    }

    pub fn snapshot(&self) -> &Arc<GraphSnapshot> {
        &self.snapshot
    }

    /// Distinct successors of `node`, ascending
    fn successors(&self, node: NodeIndex) -> Vec<NodeIndex> {
        let mut next: Vec<NodeIndex> = self.snapshot.graph.neighbors(node).collect();
        next.sort();
        next.dedup();
        next
    }

    /// Enumerate every token cycle through `start` and queue the qualifying ones
    fn expand(&mut self, start: NodeIndex) {
        let mut found = Vec::new();

        for b in self.successors(start) {
            if b == start {
                continue;
            }
            if let Some(path) = self.consider(&[start, b]) {
                found.push(path);
            }

            if self.max_hops < 3 {
                continue;
            }
            for c in self.successors(b) {
                if c == start || c == b || !self.snapshot.graph.contains_edge(c, start) {
                    continue;
                }
                if let Some(path) = self.consider(&[start, b, c]) {
                    found.push(path);
                }
            }
        }

        // Widest margin first within one start token
        found.sort_by(|a, b| b.margin().cmp(&a.margin()));
        self.pending.extend(found);
    }

    /// Pick the best venue assignment for a token cycle, once per rotation
    fn consider(&mut self, cycle: &[NodeIndex]) -> Option<Path> {
        if !self.seen.insert(canonical_rotation(cycle)) {
            return None;
        }

        let mut legs: Vec<Vec<Arc<Quote>>> = Vec::with_capacity(cycle.len());
        for i in 0..cycle.len() {
            let from = cycle[i];
            let to = cycle[(i + 1) % cycle.len()];
            let quotes: Vec<Arc<Quote>> = self
                .snapshot
                .edges_between(from, to)
                .map(|(_, edge)| edge.quote.clone())
                .collect();
            if quotes.is_empty() {
                return None;
            }
            legs.push(quotes);
        }

        let mut best: Option<(Path, Ratio, Usd)> = None;
        let mut choice = vec![0usize; legs.len()];
        loop {
            let hops: Vec<Hop> = choice
                .iter()
                .zip(&legs)
                .map(|(&i, leg)| Hop::new(leg[i].clone()))
                .collect();

            if let Ok(path) = Path::new(hops) {
                if let Some(product) = path.rate_product().filter(|p| *p > self.threshold) {
                    let liquidity = path.aggregate_liquidity();
                    let better = match &best {
                        None => true,
                        Some((_, best_product, best_liquidity)) => {
                            rank(self.tie_break, (product, liquidity), (*best_product, *best_liquidity))
                                == Ordering::Greater
                        }
                    };
                    if better {
                        best = Some((path, product, liquidity));
                    }
                }
            }

            if !advance(&mut choice, &legs) {
                break;
            }
        }

        best.map(|(path, _, _)| path)
    }
}

impl Iterator for Candidates {
    type Item = Path;

    fn next(&mut self) -> Option<Path> {
        loop {
            if let Some(path) = self.pending.pop_front() {
                self.emitted += 1;
                return Some(path);
            }
            let Some(&start) = self.starts.get(self.next_start) else {
                if self.emitted > 0 {
                    debug!("Path search exhausted after {} candidates", self.emitted);
                }
                return None;
            };
            self.next_start += 1;
            self.expand(start);
        }
    }
}

/// Odometer step over the per-leg quote choices; false once every combination was seen
fn advance(choice: &mut [usize], legs: &[Vec<Arc<Quote>>]) -> bool {
    for i in (0..choice.len()).rev() {
        choice[i] += 1;
        if choice[i] < legs[i].len() {
            return true;
        }
        choice[i] = 0;
    }
    false
}

/// Rotation starting at the smallest node, so `A→B→C` and `B→C→A` collide
fn canonical_rotation(cycle: &[NodeIndex]) -> Vec<NodeIndex> {
    let pivot = cycle
        .iter()
        .enumerate()
        .min_by_key(|(_, node)| **node)
        .map(|(i, _)| i)
        .unwrap_or(0);
    cycle[pivot..].iter().chain(&cycle[..pivot]).copied().collect()
}

fn rank(policy: TieBreak, a: (Ratio, Usd), b: (Ratio, Usd)) -> Ordering {
    match policy {
        TieBreak::MarginThenLiquidity => a.0.cmp(&b.0).then(a.1.cmp(&b.1)),
        TieBreak::LiquidityThenMargin => a.1.cmp(&b.1).then(a.0.cmp(&b.0)),
    }
}

/// Log a summary of the candidates found this tick
pub fn log_candidates(paths: &[Path], tokens: &TokenRegistry) {
    if paths.is_empty() {
        info!("🔍 No cycles above margin this tick");
        return;
    }
    let two_hop = paths.iter().filter(|p| p.len() == 2).count();
    info!(
        "🔍 {} candidate cycles ({} two-hop, {} three-hop)",
        paths.len(),
        two_hop,
        paths.len() - two_hop
    );
    for (i, path) in paths.iter().take(5).enumerate() {
        info!("   #{} {} (+{:.2} bps)", i + 1, path.describe(tokens), path.margin_bps());
    }
    if paths.iter().any(|p| p.validate().is_err()) {
        warn!("Structurally invalid path reached the candidate log");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn token(n: u8) -> Address {
        Address::repeat_byte(n)
    }

    fn q(venue: &str, a: u8, b: u8, rate: f64, liquidity: i64) -> Arc<Quote> {
        Arc::new(Quote::new_for_test(
            venue,
            token(a),
            token(b),
            Ratio::from_f64(rate),
            Bps(30),
            Usd::from_whole(liquidity),
        ))
    }

    fn finder() -> PathFinder {
        PathFinder::new(3, Bps(1), TieBreak::MarginThenLiquidity)
    }

    fn snapshot(quotes: Vec<Arc<Quote>>) -> Arc<GraphSnapshot> {
        Arc::new(GraphSnapshot::build(&quotes, false))
    }

    #[test]
    fn test_finds_triangle() {
        let graph = snapshot(vec![
            q("uni", 1, 2, 1.00, 1_000_000),
            q("sushi", 2, 3, 1.00, 1_000_000),
            q("curve", 3, 1, 1.02, 1_000_000),
        ]);
        let paths: Vec<Path> = finder().candidates(graph, &[token(1)]).collect();
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].tokens(), vec![token(1), token(2), token(3)]);
        assert!((paths[0].margin_bps() - 200.0).abs() < 0.01);
    }

    #[test]
    fn test_two_hop_needs_two_venues() {
        let same = snapshot(vec![q("uni", 1, 2, 1.0, 1_000_000), q("uni", 2, 1, 1.01, 1_000_000)]);
        assert_eq!(finder().candidates(same, &[token(1)]).count(), 0);

        let cross = snapshot(vec![q("uni", 1, 2, 1.0, 1_000_000), q("sushi", 2, 1, 1.01, 1_000_000)]);
        let paths: Vec<Path> = finder().candidates(cross, &[token(1)]).collect();
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].venues(), vec!["uni".to_string(), "sushi".to_string()]);
    }

    #[test]
    fn test_losing_cycles_are_skipped() {
        let graph = snapshot(vec![
            q("uni", 1, 2, 1.0, 1_000_000),
            q("sushi", 2, 3, 1.0, 1_000_000),
            q("curve", 3, 1, 0.997, 1_000_000),
        ]);
        assert_eq!(finder().candidates(graph, &[token(1)]).count(), 0);
    }

    #[test]
    fn test_tie_break_policies() {
        // Two ways back from B: fatter margin on a thin pool, thinner margin on a deep one
        let quotes = vec![
            q("uni", 1, 2, 1.0, 1_000_000),
            q("sushi", 2, 1, 1.03, 10_000),
            q("curve", 2, 1, 1.01, 50_000_000),
        ];

        let by_margin: Vec<Path> = finder().candidates(snapshot(quotes.clone()), &[token(1)]).collect();
        assert_eq!(by_margin.len(), 1);
        assert_eq!(by_margin[0].hops[1].venue(), "sushi");

        let by_depth = PathFinder::new(3, Bps(1), TieBreak::LiquidityThenMargin);
        let paths: Vec<Path> = by_depth.candidates(snapshot(quotes), &[token(1)]).collect();
        assert_eq!(paths[0].hops[1].venue(), "curve");
    }

    #[test]
    fn test_rotations_reported_once() {
        let graph = snapshot(vec![
            q("uni", 1, 2, 1.0, 1_000_000),
            q("sushi", 2, 3, 1.0, 1_000_000),
            q("curve", 3, 1, 1.02, 1_000_000),
        ]);
        // Every node is a base token; the triangle still appears once
        let count = finder().candidates(graph, &[token(1), token(2), token(3)]).count();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_lazy_and_restartable() {
        let graph = snapshot(vec![
            q("uni", 1, 2, 1.0, 1_000_000),
            q("sushi", 2, 1, 1.02, 1_000_000),
            q("uni", 1, 3, 1.0, 1_000_000),
            q("sushi", 3, 1, 1.01, 1_000_000),
        ]);
        let mut candidates = finder().candidates(graph, &[token(1)]);
        let replay = candidates.clone();

        let first = candidates.next().unwrap();
        candidates.reset();
        let all: Vec<Path> = candidates.collect();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].signature(), first.signature());
        // Widest margin first
        assert!(all[0].margin() > all[1].margin());

        let replayed: Vec<String> = replay.map(|p| p.signature()).collect();
        assert_eq!(replayed, all.iter().map(|p| p.signature()).collect::<Vec<_>>());
    }

    #[test]
    fn test_max_hops_two_skips_triangles() {
        let graph = snapshot(vec![
            q("uni", 1, 2, 1.0, 1_000_000),
            q("sushi", 2, 3, 1.0, 1_000_000),
            q("curve", 3, 1, 1.02, 1_000_000),
        ]);
        let finder = PathFinder::new(2, Bps(1), TieBreak::MarginThenLiquidity);
        assert_eq!(finder.candidates(graph, &[token(1)]).count(), 0);
    }

    #[test]
    fn test_validate_rejects_broken_paths() {
        let open = Path { hops: vec![Hop::new(q("uni", 1, 2, 1.0, 1)), Hop::new(q("sushi", 2, 3, 1.0, 1))] };
        assert_eq!(open.validate(), Err(PathDefect::NotClosed));

        let gap = Path {
            hops: vec![
                Hop::new(q("uni", 1, 2, 1.0, 1)),
                Hop::new(q("uni", 3, 4, 1.0, 1)),
                Hop::new(q("uni", 4, 1, 1.0, 1)),
            ],
        };
        assert_eq!(gap.validate(), Err(PathDefect::Broken(1)));

        let single = Path { hops: vec![Hop::new(q("uni", 1, 2, 1.0, 1))] };
        assert_eq!(single.validate(), Err(PathDefect::BadLength(1)));
    }

    #[test]
    fn test_random_graphs_yield_valid_cycles() {
        let venues = ["uni", "sushi", "curve"];
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..25 {
            let mut quotes = Vec::new();
            for _ in 0..40 {
                let a = rng.gen_range(1..=8u8);
                let b = rng.gen_range(1..=8u8);
                if a == b {
                    continue;
                }
                let venue = venues[rng.gen_range(0..venues.len())];
                let rate = rng.gen_range(0.95..1.05);
                quotes.push(q(venue, a, b, rate, rng.gen_range(10_000..10_000_000)));
            }
            let graph = snapshot(quotes);
            let starts: Vec<Address> = (1..=4u8).map(token).collect();

            for path in finder().candidates(graph, &starts) {
                assert!(path.validate().is_ok(), "{:?}", path.validate());
                assert_eq!(path.hops.last().unwrap().token_out(), path.start_token());
                assert!(path.rate_product().unwrap() > Ratio::ONE);
                assert!(starts.contains(&path.start_token()));
            }
        }
    }
}
