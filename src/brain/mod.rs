//! Phase 2: The Brain
//!
//! Responsible for:
//! - Finding 2-hop and 3-hop cycles in the quote graph
//! - Scoring them for profit and risk, and deciding which are viable
//! - Tracking each opportunity through its lifecycle

mod evaluator;
mod opportunity;
mod path_finder;

pub use evaluator::{hop_impact, Evaluator, EvaluatorConfig, LoanQuoter, ScoringContext};
pub use opportunity::{Opportunity, OpportunityState};
pub use path_finder::{log_candidates, Hop, Path, PathFinder};
