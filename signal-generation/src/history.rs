// Recent outcome history per strategy
// Written by the feedback loop, read by the quality gate

use common::OutcomeClassification;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrailingStats {
    pub wins: usize,
    pub losses: usize,
    pub total: usize,
    pub win_rate: f64,
}

/// Bounded window of labelled outcomes for each strategy
pub struct OutcomeHistory {
    window: usize,
    outcomes: DashMap<String, VecDeque<OutcomeClassification>>,
}

impl OutcomeHistory {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            outcomes: DashMap::new(),
        }
    }

    /// Invalidated signals carry no information about the strategy and are skipped.
    pub fn record(&self, strategy_id: &str, classification: OutcomeClassification) {
        if classification == OutcomeClassification::Invalidated {
            return;
        }
        let mut entry = self.outcomes.entry(strategy_id.to_string()).or_default();
        if entry.len() == self.window {
            entry.pop_front();
        }
        entry.push_back(classification);
    }

    /// Wins over all labelled outcomes in the window; timeouts count as non-wins.
    pub fn trailing(&self, strategy_id: &str) -> Option<TrailingStats> {
        let entry = self.outcomes.get(strategy_id)?;
        let total = entry.len();
        if total == 0 {
            return None;
        }
        let wins = entry.iter().filter(|c| c.is_win()).count();
        let losses = total - wins;
        Some(TrailingStats {
            wins,
            losses,
            total,
            win_rate: wins as f64 / total as f64,
        })
    }

    pub fn strategies(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.outcomes.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }
}

impl Default for OutcomeHistory {
    fn default() -> Self {
        Self::new(50)
    }
}
