//! Cooperative shutdown signal.
//!
//! Once raised, every enqueue path in the engine checks the sign and records a
//! suppressed unit of work under its origin code instead of pushing it. Work
//! already in flight still completes; only its hand-off is dropped, and the
//! tally gives an auditable count of what was dropped and where.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use tracing::info;

#[derive(Debug, Default)]
pub struct StopSign {
    signaled: AtomicBool,
    suppressed: DashMap<String, u32>,
}

impl StopSign {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the sign. Only the call that actually flips it returns `true`.
    pub fn raise(&self) -> bool {
        let raised = self
            .signaled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if raised {
            info!("Stop sign raised");
        }
        raised
    }

    pub fn signaled(&self) -> bool {
        self.signaled.load(Ordering::SeqCst)
    }

    /// Counts one suppressed unit of work for `code`. No-op until raised.
    pub fn record(&self, code: &str) {
        if !self.signaled() {
            return;
        }
        *self.suppressed.entry(code.to_string()).or_insert(0) += 1;
    }

    /// Lowers the sign and forgets all tallies.
    pub fn reset(&self) {
        self.signaled.store(false, Ordering::SeqCst);
        self.suppressed.clear();
    }

    pub fn count_for(&self, code: &str) -> u32 {
        self.suppressed.get(code).map(|count| *count).unwrap_or(0)
    }

    /// Sum of suppressed work across all origins.
    pub fn total_count(&self) -> u32 {
        self.suppressed.iter().map(|entry| *entry.value()).sum()
    }

    pub fn summary(&self) -> StopSignSummary {
        let mut counts: Vec<(String, u32)> = self
            .suppressed
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        counts.sort();
        StopSignSummary {
            signaled: self.signaled(),
            counts,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct StopSignSummary {
    pub signaled: bool,
    pub counts: Vec<(String, u32)>,
}

impl fmt::Display for StopSignSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "signaled: {}", self.signaled)?;
        if !self.counts.is_empty() {
            let counts = self
                .counts
                .iter()
                .map(|(code, count)| format!("{}: {}", code, count))
                .collect::<Vec<_>>()
                .join(", ");
            write!(f, ", suppressed: {{{}}}", counts)?;
        }
        Ok(())
    }
}
