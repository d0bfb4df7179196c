//! Admission history and the mutual-exclusion checker.
//!
//! Records every critical-section admission and verifies, after the run,
//! the properties the protocol promises:
//! - no two admissions ever overlap in time,
//! - each peer completes exactly its entry quota, in order,
//! - each peer's logical clock is strictly increasing across its entries.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::protocol::message::PeerId;
use crate::protocol::peer::CriticalSection;

/// One completed critical-section turn.
#[derive(Debug, Clone)]
pub struct AdmissionRecord {
    /// Peer that held the section.
    pub peer: PeerId,
    /// That peer's logical clock at entry.
    pub clock: u64,
    /// Per-peer entry counter, starting at 1.
    pub entry_index: u32,
    /// Wall-clock instant the section was entered.
    pub entered_at: Instant,
    /// Wall-clock instant the section was exited.
    pub exited_at: Instant,
}

/// Append-only log of admissions across the whole run.
#[derive(Debug, Default)]
pub struct History {
    records: Vec<AdmissionRecord>,
}

impl History {
    /// Create an empty history.
    pub fn new() -> Self {
        History { records: Vec::new() }
    }

    /// Append a completed admission.
    pub fn record(&mut self, record: AdmissionRecord) {
        self.records.push(record);
    }

    /// All recorded admissions, in completion order.
    pub fn records(&self) -> &[AdmissionRecord] {
        &self.records
    }
}

/// History shared between peer threads and the checker.
pub type SharedHistory = Arc<Mutex<History>>;

/// Create a fresh shared history.
pub fn shared_history() -> SharedHistory {
    Arc::new(Mutex::new(History::new()))
}

/// Wraps a [`CriticalSection`] and records each admission into a history.
///
/// The history lock is taken only after the inner section exits, so the
/// recording itself cannot serialize the thing it is checking.
pub struct Recorded<S> {
    inner: S,
    history: SharedHistory,
}

impl<S> Recorded<S> {
    /// Wrap `inner`, recording into `history`.
    pub fn new(inner: S, history: SharedHistory) -> Self {
        Recorded { inner, history }
    }
}

impl<S: CriticalSection> CriticalSection for Recorded<S> {
    fn enter(&mut self, peer: PeerId, clock: u64, entry_index: u32) {
        let entered_at = Instant::now();
        self.inner.enter(peer, clock, entry_index);
        let exited_at = Instant::now();

        self.history
            .lock()
            .expect("history mutex poisoned")
            .record(AdmissionRecord {
                peer,
                clock,
                entry_index,
                entered_at,
                exited_at,
            });
    }
}

/// A property violation found in a history.
#[derive(Debug, Clone)]
pub enum Violation {
    /// Two admissions overlapped in time.
    Overlap {
        first_peer: PeerId,
        second_peer: PeerId,
    },
    /// A peer completed a different number of entries than its quota.
    QuotaMismatch {
        peer: PeerId,
        expected: u32,
        actual: u32,
    },
    /// A peer's entry indices did not advance 1, 2, 3, ...
    EntryOrder { peer: PeerId, expected: u32, actual: u32 },
    /// A peer's logical clock failed to advance between its entries.
    ClockRegression { peer: PeerId, previous: u64, current: u64 },
}

/// Result of checking a history.
#[derive(Debug, Default)]
pub struct CheckResult {
    /// All violations found; empty means the run was correct.
    pub violations: Vec<Violation>,
}

impl CheckResult {
    /// True if no property was violated.
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Verifies a run's history against the protocol's guarantees.
pub struct Checker {
    num_peers: u32,
    entry_limit: u32,
}

impl Checker {
    /// Checker for a cluster of `num_peers`, each bounded by `entry_limit`.
    pub fn new(num_peers: u32, entry_limit: u32) -> Self {
        Checker {
            num_peers,
            entry_limit,
        }
    }

    /// Run all checks over `history`.
    pub fn check(&self, history: &History) -> CheckResult {
        let mut result = CheckResult::default();
        let records = history.records();

        self.check_overlap(records, &mut result);
        self.check_per_peer(records, &mut result);

        result
    }

    /// No two admission intervals may overlap.
    fn check_overlap(&self, records: &[AdmissionRecord], result: &mut CheckResult) {
        let mut by_entry: Vec<&AdmissionRecord> = records.iter().collect();
        by_entry.sort_by_key(|r| r.entered_at);

        for pair in by_entry.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            if b.entered_at < a.exited_at {
                result.violations.push(Violation::Overlap {
                    first_peer: a.peer,
                    second_peer: b.peer,
                });
            }
        }
    }

    /// Quota, entry ordering and clock monotonicity, per peer.
    fn check_per_peer(&self, records: &[AdmissionRecord], result: &mut CheckResult) {
        for peer in 1..=self.num_peers {
            let mut expected_index = 0u32;
            let mut last_clock: Option<u64> = None;

            for rec in records.iter().filter(|r| r.peer == peer) {
                expected_index += 1;
                if rec.entry_index != expected_index {
                    result.violations.push(Violation::EntryOrder {
                        peer,
                        expected: expected_index,
                        actual: rec.entry_index,
                    });
                }
                if let Some(prev) = last_clock {
                    if rec.clock <= prev {
                        result.violations.push(Violation::ClockRegression {
                            peer,
                            previous: prev,
                            current: rec.clock,
                        });
                    }
                }
                last_clock = Some(rec.clock);
            }

            if expected_index != self.entry_limit {
                result.violations.push(Violation::QuotaMismatch {
                    peer,
                    expected: self.entry_limit,
                    actual: expected_index,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn record(peer: PeerId, clock: u64, entry_index: u32, start_ms: u64, end_ms: u64) -> AdmissionRecord {
        let base = Instant::now();
        AdmissionRecord {
            peer,
            clock,
            entry_index,
            entered_at: base + Duration::from_millis(start_ms),
            exited_at: base + Duration::from_millis(end_ms),
        }
    }

    #[test]
    fn test_clean_history_passes() {
        let mut history = History::new();
        history.record(record(1, 3, 1, 0, 10));
        history.record(record(2, 5, 1, 12, 20));
        history.record(record(1, 8, 2, 22, 30));
        history.record(record(2, 11, 2, 32, 40));

        let result = Checker::new(2, 2).check(&history);
        assert!(result.passed(), "violations: {:?}", result.violations);
    }

    #[test]
    fn test_overlap_detected() {
        let mut history = History::new();
        history.record(record(1, 3, 1, 0, 20));
        history.record(record(2, 5, 1, 10, 30));

        let result = Checker::new(2, 1).check(&history);
        assert!(result
            .violations
            .iter()
            .any(|v| matches!(v, Violation::Overlap { .. })));
    }

    #[test]
    fn test_quota_mismatch_detected() {
        let mut history = History::new();
        history.record(record(1, 3, 1, 0, 10));

        let result = Checker::new(2, 1).check(&history);
        // Peer 2 never entered.
        assert!(result.violations.iter().any(|v| matches!(
            v,
            Violation::QuotaMismatch { peer: 2, expected: 1, actual: 0 }
        )));
    }

    #[test]
    fn test_clock_regression_detected() {
        let mut history = History::new();
        history.record(record(1, 9, 1, 0, 10));
        history.record(record(1, 9, 2, 12, 20));

        let result = Checker::new(1, 2).check(&history);
        assert!(result
            .violations
            .iter()
            .any(|v| matches!(v, Violation::ClockRegression { peer: 1, .. })));
    }
}
