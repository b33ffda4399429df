use std::collections::BTreeMap;

use crate::{ErrorDetails, Event};

/// Outcome of a call as far as history knows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome {
    Pending,
    Completed(String),
    Failed(ErrorDetails),
}

impl CallOutcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CallOutcome::Pending)
    }
}

/// One row of the correlation table: the scheduled call and its outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallEntry {
    pub name: String,
    pub input: String,
    pub outcome: CallOutcome,
}

/// Maps sequence numbers to call outcomes for a single instance.
///
/// Derived entirely from history and rebuilt on every replay; never stored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorrelationTable {
    entries: BTreeMap<u64, CallEntry>,
    // seq of the outcome event appended last
    last_resolved: Option<u64>,
}

impl CorrelationTable {
    /// Build the table from an instance's history.
    ///
    /// # Errors
    ///
    /// Returns a description of the corruption when a completion refers to a
    /// sequence number that was never scheduled, or a sequence number is
    /// scheduled twice.
    pub fn from_history(history: &[Event]) -> Result<Self, String> {
        let mut entries: BTreeMap<u64, CallEntry> = BTreeMap::new();
        let mut last_resolved = None;
        for event in history {
            match event {
                Event::CallScheduled { seq, name, input } => {
                    if entries.contains_key(seq) {
                        return Err(format!("call {seq} scheduled twice"));
                    }
                    entries.insert(
                        *seq,
                        CallEntry {
                            name: name.clone(),
                            input: input.clone(),
                            outcome: CallOutcome::Pending,
                        },
                    );
                }
                Event::CallCompleted { seq, output } => {
                    if Self::resolve(&mut entries, *seq, CallOutcome::Completed(output.clone()))? {
                        last_resolved = Some(*seq);
                    }
                }
                Event::CallFailed { seq, error } => {
                    if Self::resolve(&mut entries, *seq, CallOutcome::Failed(error.clone()))? {
                        last_resolved = Some(*seq);
                    }
                }
                Event::OrchestrationStarted { .. }
                | Event::OrchestrationCompleted { .. }
                | Event::OrchestrationFailed { .. }
                | Event::OrchestrationTerminated { .. } => {}
            }
        }
        Ok(Self { entries, last_resolved })
    }

    /// Returns true when `outcome` took effect.
    fn resolve(entries: &mut BTreeMap<u64, CallEntry>, seq: u64, outcome: CallOutcome) -> Result<bool, String> {
        let entry = entries
            .get_mut(&seq)
            .ok_or_else(|| format!("no matching schedule for completion of call {seq}"))?;
        // First terminal outcome wins; later duplicates are ignored
        if entry.outcome.is_terminal() {
            return Ok(false);
        }
        entry.outcome = outcome;
        Ok(true)
    }

    pub fn get(&self, seq: u64) -> Option<&CallEntry> {
        self.entries.get(&seq)
    }

    pub fn outcome(&self, seq: u64) -> Option<&CallOutcome> {
        self.entries.get(&seq).map(|e| &e.outcome)
    }

    /// Call whose outcome was recorded most recently.
    pub fn last_resolved(&self) -> Option<u64> {
        self.last_resolved
    }

    /// Number of calls recorded as scheduled.
    pub fn scheduled_count(&self) -> u64 {
        self.entries.len() as u64
    }

    /// First failure that orchestration code must never observe, if any.
    pub fn first_configuration_failure(&self) -> Option<(u64, &ErrorDetails)> {
        self.entries.iter().find_map(|(seq, e)| match &e.outcome {
            CallOutcome::Failed(details @ ErrorDetails::Configuration { .. }) => Some((*seq, details)),
            _ => None,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, &CallEntry)> {
        self.entries.iter().map(|(seq, e)| (*seq, e))
    }
}
