//! Rate budget guard for quota-limited sources.
//!
//! Tracks one consumption counter per budgeted source against a fixed-length
//! periodic window anchored at guard construction (not a rolling window).
//! The guard only answers yes or no; it never blocks, sleeps, or retries.
//! Refusals are the aggregator's cue to route to a proxy source.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use sterling_core::Clock;

use crate::adapter::SourceId;

#[derive(Debug)]
struct BudgetState {
    window_start: DateTime<Utc>,
    consumed: u32,
}

/// Consumption snapshot for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct BudgetStatus {
    pub source: SourceId,
    pub consumed: u32,
    pub limit: u32,
    pub window_ends: DateTime<Utc>,
}

pub struct RateBudgetGuard {
    clock: Arc<dyn Clock>,
    window: Duration,
    limits: HashMap<SourceId, u32>,
    states: Mutex<HashMap<SourceId, BudgetState>>,
}

impl RateBudgetGuard {
    /// `limits` lists the budgeted sources and their per-window request
    /// limits; any source not listed is unbudgeted and always allowed.
    pub fn new(clock: Arc<dyn Clock>, window: Duration, limits: HashMap<SourceId, u32>) -> Self {
        let now = clock.now();
        let states = limits
            .keys()
            .map(|id| {
                (
                    *id,
                    BudgetState {
                        window_start: now,
                        consumed: 0,
                    },
                )
            })
            .collect();
        Self {
            clock,
            window,
            limits,
            states: Mutex::new(states),
        }
    }

    /// Atomically check the window, roll it over if elapsed, and consume one
    /// unit if the limit allows. Returns whether the caller may fetch.
    pub fn try_consume(&self, source: SourceId) -> bool {
        let limit = match self.limits.get(&source) {
            Some(limit) => *limit,
            None => return true, // not budgeted
        };

        let now = self.clock.now();
        let mut states = self.states.lock().unwrap();
        let state = states.entry(source).or_insert_with(|| BudgetState {
            window_start: now,
            consumed: 0,
        });

        // Advance past any fully elapsed windows before evaluating this call.
        let elapsed = now.signed_duration_since(state.window_start);
        if elapsed >= self.window {
            let windows = elapsed.num_seconds() / self.window.num_seconds().max(1);
            state.window_start = state.window_start + self.window * windows as i32;
            state.consumed = 0;
            tracing::debug!(source = %source, "rate budget window rolled over");
        }

        if state.consumed >= limit {
            tracing::warn!(
                source = %source,
                consumed = state.consumed,
                limit,
                "rate budget exhausted"
            );
            return false;
        }
        state.consumed += 1;
        true
    }

    pub fn status(&self) -> Vec<BudgetStatus> {
        let states = self.states.lock().unwrap();
        let mut out: Vec<BudgetStatus> = states
            .iter()
            .map(|(source, state)| BudgetStatus {
                source: *source,
                consumed: state.consumed,
                limit: self.limits[source],
                window_ends: state.window_start + self.window,
            })
            .collect();
        out.sort_by_key(|s| s.source.as_str());
        out
    }
}
