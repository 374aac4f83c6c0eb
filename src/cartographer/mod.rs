//! Phase 1: The Cartographer (Data Ingest)
//!
//! Venue registry, quote feed and the per-tick quote graph snapshot.

mod feed;
mod graph;
mod venue;

pub use feed::{collect_quotes, OnChainFeed, PriceFeed, Quote};
pub use graph::{GraphSnapshot, SnapshotStore};
pub use venue::{ICurvePool, Pool, ProtocolFamily, Venue, VenueRegistry};
