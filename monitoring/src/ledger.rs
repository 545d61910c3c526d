// Outcome ledger
// One record per emitted signal, never overwritten

use common::{OutcomeRecord, PipelineError, PipelineResult, Uuid};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::BTreeMap;
use tracing::error;

#[derive(Default)]
pub struct OutcomeLedger {
    records: DashMap<Uuid, OutcomeRecord>,
}

impl OutcomeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the record for a signal. A second record for the same signal is refused.
    pub fn record(&self, record: OutcomeRecord) -> PipelineResult<()> {
        match self.records.entry(record.signal_id) {
            Entry::Occupied(existing) => {
                error!(
                    signal_id = %record.signal_id,
                    existing = existing.get().classification.as_str(),
                    rejected = record.classification.as_str(),
                    "Duplicate outcome refused"
                );
                Err(PipelineError::invariant(
                    "outcome_ledger",
                    format!("signal {} already resolved", record.signal_id),
                ))
            }
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(())
            }
        }
    }

    pub fn get(&self, signal_id: &Uuid) -> Option<OutcomeRecord> {
        self.records.get(signal_id).map(|r| r.clone())
    }

    pub fn contains(&self, signal_id: &Uuid) -> bool {
        self.records.contains_key(signal_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All records, oldest resolution first
    pub fn records(&self) -> Vec<OutcomeRecord> {
        let mut all: Vec<OutcomeRecord> = self.records.iter().map(|r| r.value().clone()).collect();
        all.sort_by_key(|r| r.resolved_at);
        all
    }

    /// Records per classification label
    pub fn counts(&self) -> BTreeMap<String, u64> {
        let mut counts = BTreeMap::new();
        for r in self.records.iter() {
            *counts.entry(r.classification.as_str().to_string()).or_insert(0) += 1;
        }
        counts
    }
}
