use crate::error::{AppError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;

/// Raw crash data as reported by the fuzzer or crash collector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawCrash {
    /// Backtrace text, one frame per line
    pub trace: String,

    /// Faulting address, if known
    #[serde(default)]
    pub crash_address: Option<u64>,

    /// Relevant stderr/stdout lines (assertion messages, sanitizer summary)
    #[serde(default)]
    pub output: Vec<String>,
}

impl RawCrash {
    pub fn new(trace: impl Into<String>) -> Self {
        Self {
            trace: trace.into(),
            crash_address: None,
            output: Vec::new(),
        }
    }

    pub fn with_address(mut self, address: u64) -> Self {
        self.crash_address = Some(address);
        self
    }

    pub fn with_output(mut self, line: impl Into<String>) -> Self {
        self.output.push(line.into());
        self
    }
}

/// Lifecycle of a crash in triage
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum TriageState {
    /// Not looked at yet
    #[default]
    Unassigned,

    /// A bucket was suggested and awaits confirmation
    Candidate { bucket_id: u64 },

    /// No bucket fits, a new one was requested
    NewBucketRequested,

    /// Crash cannot be bucketed automatically
    ManualTriage { reason: String },

    /// Crash belongs to a bucket
    Assigned { bucket_id: u64 },
}

impl TriageState {
    /// Check whether `next` is a legal successor of this state
    pub fn can_transition_to(&self, next: &TriageState) -> bool {
        use TriageState::*;

        match (self, next) {
            (Unassigned, Candidate { .. })
            | (Unassigned, NewBucketRequested)
            | (Unassigned, ManualTriage { .. }) => true,
            (Candidate { .. }, Candidate { .. })
            | (Candidate { .. }, Assigned { .. })
            | (Candidate { .. }, NewBucketRequested) => true,
            (NewBucketRequested, Assigned { .. }) => true,
            (ManualTriage { .. }, NewBucketRequested) | (ManualTriage { .. }, Assigned { .. }) => {
                true
            }
            _ => false,
        }
    }

    pub fn is_assigned(&self) -> bool {
        matches!(self, TriageState::Assigned { .. })
    }

    pub fn assigned_bucket(&self) -> Option<u64> {
        match self {
            TriageState::Assigned { bucket_id } => Some(*bucket_id),
            _ => None,
        }
    }
}

/// A single reported crash
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrashEntry {
    /// Unique identifier
    pub id: u64,

    /// Creation timestamp
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    /// Last state change
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,

    /// Immutable crash data
    pub raw: RawCrash,

    /// Triage state
    #[serde(default)]
    pub state: TriageState,
}

impl CrashEntry {
    /// Create a new unassigned crash entry
    pub fn new(id: u64, raw: RawCrash) -> Self {
        let now = Utc::now();

        Self {
            id,
            created_at: now,
            updated_at: now,
            raw,
            state: TriageState::Unassigned,
        }
    }

    /// Move to `next`, rejecting transitions the lifecycle does not allow
    pub fn transition(&mut self, next: TriageState) -> Result<()> {
        if !self.state.can_transition_to(&next) {
            return Err(AppError::InvalidStateTransition(format!(
                "crash {}: {} -> {}",
                self.id, self.state, next
            )));
        }

        tracing::debug!(
            crash_id = self.id,
            from = %self.state,
            to = %next,
            "Crash triage state changed"
        );

        self.state = next;
        self.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_crash_is_unassigned() {
        let crash = CrashEntry::new(1, RawCrash::new("main"));
        assert_eq!(crash.state, TriageState::Unassigned);
        assert_eq!(crash.created_at, crash.updated_at);
    }

    #[test]
    fn test_candidate_then_assigned() {
        let mut crash = CrashEntry::new(1, RawCrash::new("main"));
        crash.transition(TriageState::Candidate { bucket_id: 5 }).unwrap();
        crash.transition(TriageState::Candidate { bucket_id: 6 }).unwrap();
        crash.transition(TriageState::Assigned { bucket_id: 6 }).unwrap();
        assert_eq!(crash.state.assigned_bucket(), Some(6));
    }

    #[test]
    fn test_new_bucket_path() {
        let mut crash = CrashEntry::new(1, RawCrash::new("main"));
        crash.transition(TriageState::NewBucketRequested).unwrap();
        crash.transition(TriageState::Assigned { bucket_id: 9 }).unwrap();
        assert!(crash.state.is_assigned());
    }

    #[test]
    fn test_assigned_is_terminal() {
        let mut crash = CrashEntry::new(1, RawCrash::new("main"));
        crash.transition(TriageState::NewBucketRequested).unwrap();
        crash.transition(TriageState::Assigned { bucket_id: 9 }).unwrap();

        let err = crash.transition(TriageState::Unassigned).unwrap_err();
        assert!(matches!(err, AppError::InvalidStateTransition(_)));
        assert!(crash
            .transition(TriageState::Assigned { bucket_id: 10 })
            .is_err());
    }

    #[test]
    fn test_unassigned_cannot_skip_to_assigned() {
        let state = TriageState::Unassigned;
        assert!(!state.can_transition_to(&TriageState::Assigned { bucket_id: 1 }));
        assert!(state.can_transition_to(&TriageState::ManualTriage {
            reason: "no frames".to_string()
        }));
    }
}
