//! Feedback ledger
//!
//! Append-only store of terminal submission outcomes, shared by every chain
//! scanner. Entries are never mutated; readers get `Arc` clones. The
//! evaluator reads venue reliability and realized shortfall from here, the
//! planner reads provider reliability.
//!
//! With a journal path configured, every entry is mirrored to a JSONL file
//! and the file is replayed on startup.

use alloy_primitives::Address;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::errors::FailureKind;
use crate::fixed::{Bps, Usd, BPS_DENOMINATOR};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InclusionOutcome {
    /// Landed and paid out
    Included,
    /// Landed and reverted on a guard; gas was spent
    Reverted,
    /// Never included within the attempt budget
    Expired,
    /// Relay simulation reverted; nothing was broadcast
    Abandoned,
}

impl std::fmt::Display for InclusionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            InclusionOutcome::Included => "included",
            InclusionOutcome::Reverted => "reverted",
            InclusionOutcome::Expired => "expired",
            InclusionOutcome::Abandoned => "abandoned",
        };
        write!(f, "{}", s)
    }
}

/// Terminal outcome of one planned execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionResult {
    pub opportunity_id: u64,
    pub chain_id: u64,
    pub asset: Address,
    pub provider: String,
    pub venues: Vec<String>,
    pub outcome: InclusionOutcome,
    pub failure: Option<FailureKind>,
    pub expected_profit: Usd,
    /// Net of gas; negative for a revert
    pub realized_profit: Usd,
    pub gas_used: u64,
    pub gas_cost: Usd,
    pub block: Option<u64>,
    pub attempts: u32,
    pub recorded_at: DateTime<Utc>,
}

impl SubmissionResult {
    pub fn is_success(&self) -> bool {
        self.outcome == InclusionOutcome::Included
    }

    /// Did the venues misbehave relative to their quotes?
    fn counts_against_venues(&self) -> Option<bool> {
        match self.outcome {
            InclusionOutcome::Included => Some(false),
            InclusionOutcome::Reverted | InclusionOutcome::Abandoned => Some(true),
            InclusionOutcome::Expired => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReliabilityStats {
    pub attempts: u64,
    pub failures: u64,
}

impl ReliabilityStats {
    pub fn failure_rate(&self) -> Bps {
        if self.attempts == 0 {
            return Bps::ZERO;
        }
        Bps((self.failures * BPS_DENOMINATOR as u64 / self.attempts) as u32)
    }

    /// Success share; an unknown record counts as fully reliable
    pub fn reliability(&self) -> Bps {
        self.failure_rate().complement()
    }

    fn record(&mut self, failed: bool) {
        self.attempts += 1;
        if failed {
            self.failures += 1;
        }
    }
}

/// JSONL mirror, opened on first write and kept open
struct Journal {
    path: PathBuf,
    file: Option<fs::File>,
}

impl Journal {
    fn new(path: PathBuf) -> Self {
        Self { path, file: None }
    }

    /// One `write_all` per entry; a failed handle is dropped and reopened next time
    fn write(&mut self, entry: &SubmissionResult) -> std::io::Result<()> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        if self.file.is_none() {
            if let Some(parent) = self.path.parent() {
                fs::create_dir_all(parent)?;
            }
            self.file = Some(fs::OpenOptions::new().create(true).append(true).open(&self.path)?);
        }
        let Some(file) = self.file.as_mut() else {
            return Ok(());
        };
        let written = file.write_all(line.as_bytes());
        if written.is_err() {
            self.file = None;
        }
        written
    }
}

pub struct FeedbackLedger {
    entries: RwLock<Vec<Arc<SubmissionResult>>>,
    /// Only locked while `entries` is write-locked, so file order matches memory order
    journal: Option<Mutex<Journal>>,
}

impl FeedbackLedger {
    /// In-memory only
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            journal: None,
        }
    }

    /// Ledger mirrored to `path`, seeded from whatever the file already holds
    pub fn with_journal<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let entries = match fs::File::open(&path) {
            Ok(file) => {
                let mut loaded = Vec::new();
                for (n, line) in BufReader::new(file).lines().enumerate() {
                    let Ok(line) = line else { break };
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<SubmissionResult>(&line) {
                        Ok(entry) => loaded.push(Arc::new(entry)),
                        Err(e) => warn!("Journal {}:{} unreadable: {}", path.display(), n + 1, e),
                    }
                }
                info!("📒 Replayed {} ledger entries from {}", loaded.len(), path.display());
                loaded
            }
            Err(_) => Vec::new(),
        };

        Self {
            entries: RwLock::new(entries),
            journal: Some(Mutex::new(Journal::new(path))),
        }
    }

    /// Record a terminal outcome. Journal write failures are logged, never fatal.
    pub fn append(&self, result: SubmissionResult) -> Arc<SubmissionResult> {
        let entry = Arc::new(result);
        {
            let mut entries = self.entries.write();
            if let Some(journal) = &self.journal {
                let mut journal = journal.lock();
                if let Err(e) = journal.write(&entry) {
                    warn!("Journal write to {} failed: {}", journal.path.display(), e);
                }
            }
            entries.push(entry.clone());
        }
        debug!(
            "Ledger: #{} {} on chain {} ({})",
            entry.opportunity_id, entry.outcome, entry.chain_id, entry.realized_profit
        );
        entry
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Newest `n` entries, oldest first
    pub fn recent(&self, n: usize) -> Vec<Arc<SubmissionResult>> {
        let entries = self.entries.read();
        let skip = entries.len().saturating_sub(n);
        entries[skip..].to_vec()
    }

    /// One record per entry touching `venue`, however many hops it took there
    pub fn venue_stats(&self, chain_id: u64, venue: &str) -> ReliabilityStats {
        let mut stats = ReliabilityStats::default();
        for entry in self.entries.read().iter() {
            if entry.chain_id != chain_id || !entry.venues.iter().any(|v| v == venue) {
                continue;
            }
            if let Some(failed) = entry.counts_against_venues() {
                stats.record(failed);
            }
        }
        stats
    }

    /// Failure rate of every venue seen on `chain_id`
    pub fn venue_failure_rates(&self, chain_id: u64) -> HashMap<String, Bps> {
        let mut stats: HashMap<String, ReliabilityStats> = HashMap::new();
        for entry in self.entries.read().iter().filter(|e| e.chain_id == chain_id) {
            let Some(failed) = entry.counts_against_venues() else {
                continue;
            };
            let mut venues = entry.venues.clone();
            venues.sort();
            venues.dedup();
            for venue in venues {
                stats.entry(venue).or_default().record(failed);
            }
        }
        stats.into_iter().map(|(venue, s)| (venue, s.failure_rate())).collect()
    }

    /// Landed executions through `provider`; expiries and abandoned plans say
    /// nothing about the lender
    pub fn provider_stats(&self, chain_id: u64, provider: &str) -> ReliabilityStats {
        let mut stats = ReliabilityStats::default();
        for entry in self.entries.read().iter() {
            if entry.chain_id != chain_id || entry.provider != provider {
                continue;
            }
            match entry.outcome {
                InclusionOutcome::Included => stats.record(false),
                InclusionOutcome::Reverted => stats.record(true),
                _ => {}
            }
        }
        stats
    }

    /// Mean of `expected − realized` over the last `window` inclusions on a
    /// chain, counting only shortfalls
    pub fn average_shortfall(&self, chain_id: u64, window: usize) -> Usd {
        let entries = self.entries.read();
        let shortfalls: Vec<Usd> = entries
            .iter()
            .rev()
            .filter(|e| e.chain_id == chain_id && e.is_success())
            .take(window)
            .map(|e| (e.expected_profit - e.realized_profit).max(Usd::ZERO))
            .collect();
        if shortfalls.is_empty() {
            return Usd::ZERO;
        }
        let total: Usd = shortfalls.iter().copied().sum();
        Usd(total.0 / shortfalls.len() as i128)
    }

    /// Realized profit across all chains
    pub fn total_realized(&self) -> Usd {
        self.entries.read().iter().map(|e| e.realized_profit).sum()
    }
}

impl Default for FeedbackLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(chain_id: u64, venues: &[&str], provider: &str, outcome: InclusionOutcome) -> SubmissionResult {
        SubmissionResult {
            opportunity_id: 1,
            chain_id,
            asset: Address::repeat_byte(1),
            provider: provider.to_string(),
            venues: venues.iter().map(|v| v.to_string()).collect(),
            outcome,
            failure: None,
            expected_profit: Usd::from_whole(10),
            realized_profit: Usd::from_whole(7),
            gas_used: 250_000,
            gas_cost: Usd::from_whole(3),
            block: Some(100),
            attempts: 1,
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn test_venue_stats() {
        let ledger = FeedbackLedger::new();
        ledger.append(entry(1, &["uni", "sushi"], "aave", InclusionOutcome::Included));
        ledger.append(entry(1, &["uni", "curve"], "aave", InclusionOutcome::Reverted));
        ledger.append(entry(1, &["uni"], "aave", InclusionOutcome::Expired));
        ledger.append(entry(2, &["uni"], "aave", InclusionOutcome::Reverted));

        let uni = ledger.venue_stats(1, "uni");
        assert_eq!(uni, ReliabilityStats { attempts: 2, failures: 1 });
        assert_eq!(uni.failure_rate(), Bps(5_000));

        let rates = ledger.venue_failure_rates(1);
        assert_eq!(rates.get("curve"), Some(&Bps(10_000)));
        assert_eq!(rates.get("sushi"), Some(&Bps::ZERO));
        assert_eq!(ledger.venue_stats(3, "uni").reliability(), Bps(10_000));
    }

    #[test]
    fn test_provider_stats_and_shortfall() {
        let ledger = FeedbackLedger::new();
        ledger.append(entry(1, &["uni"], "balancer", InclusionOutcome::Included));
        ledger.append(entry(1, &["uni"], "balancer", InclusionOutcome::Abandoned));
        ledger.append(entry(1, &["uni"], "aave", InclusionOutcome::Reverted));

        assert_eq!(ledger.provider_stats(1, "balancer").attempts, 1);
        assert_eq!(ledger.provider_stats(1, "aave").failure_rate(), Bps(10_000));
        // One inclusion, $10 expected vs $7 realized
        assert_eq!(ledger.average_shortfall(1, 10), Usd::from_whole(3));
        assert_eq!(ledger.average_shortfall(2, 10), Usd::ZERO);
        assert_eq!(ledger.recent(2).len(), 2);
        assert_eq!(ledger.recent(2)[1].provider, "aave");
    }

    #[test]
    fn test_journal_replay() {
        let path = std::env::temp_dir().join(format!("flashsnipe-ledger-{}.jsonl", std::process::id()));
        let _ = fs::remove_file(&path);

        let ledger = FeedbackLedger::with_journal(&path);
        ledger.append(entry(1, &["uni"], "aave", InclusionOutcome::Included));
        ledger.append(entry(1, &["sushi"], "aave", InclusionOutcome::Reverted));

        let replayed = FeedbackLedger::with_journal(&path);
        assert_eq!(replayed.len(), 2);
        assert_eq!(replayed.venue_stats(1, "sushi").failures, 1);
        let _ = fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_concurrent_appends() {
        let ledger = Arc::new(FeedbackLedger::new());
        let mut handles = Vec::new();
        for chain in 0..8u64 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..25 {
                    ledger.append(entry(chain, &["uni"], "aave", InclusionOutcome::Included));
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(ledger.len(), 200);
    }

    #[test]
    fn test_repeated_venue_counts_once() {
        let ledger = FeedbackLedger::new();
        ledger.append(entry(1, &["uni", "sushi", "uni"], "aave", InclusionOutcome::Reverted));
        ledger.append(entry(1, &["uni", "uni"], "aave", InclusionOutcome::Included));

        assert_eq!(ledger.venue_stats(1, "uni"), ReliabilityStats { attempts: 2, failures: 1 });
        assert_eq!(ledger.venue_stats(1, "sushi"), ReliabilityStats { attempts: 1, failures: 1 });
        assert_eq!(ledger.venue_failure_rates(1).get("uni"), Some(&ledger.venue_stats(1, "uni").failure_rate()));
    }

    #[test]
    fn test_journal_lines_follow_append_order() {
        let path = std::env::temp_dir().join(format!("flashsnipe-ledger-threads-{}.jsonl", std::process::id()));
        let _ = fs::remove_file(&path);
        let ledger = Arc::new(FeedbackLedger::with_journal(&path));

        let writers: Vec<_> = (0..8u64)
            .map(|chain| {
                let ledger = ledger.clone();
                std::thread::spawn(move || {
                    for n in 0..50u64 {
                        let mut e = entry(chain, &["uni", "curve"], "aave", InclusionOutcome::Included);
                        e.opportunity_id = chain * 1_000 + n;
                        ledger.append(e);
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        let lines: Vec<String> = fs::read_to_string(&path).unwrap().lines().map(String::from).collect();
        assert_eq!(lines.len(), 400);
        let journaled: Vec<u64> = lines
            .iter()
            .map(|line| serde_json::from_str::<SubmissionResult>(line).unwrap().opportunity_id)
            .collect();
        let in_memory: Vec<u64> = ledger.recent(400).iter().map(|e| e.opportunity_id).collect();
        assert_eq!(journaled, in_memory);
        let _ = fs::remove_file(&path);
    }
}
