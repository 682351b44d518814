//! Lifecycle of an evaluation task.
//!
//! ```text
//! Pending --> Running --> Succeeded
//!                    \--> Failed
//! ```
//!
//! No other transition exists; in particular a terminal state is never left.

use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::metrics::MetricsResult;

/// The name of a [`TaskState`], without its payload.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateKind {
    #[display(fmt = "pending")]
    Pending,
    #[display(fmt = "running")]
    Running,
    #[display(fmt = "succeeded")]
    Succeeded,
    #[display(fmt = "failed")]
    Failed,
}

impl StateKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StateKind::Pending => "pending",
            StateKind::Running => "running",
            StateKind::Succeeded => "succeeded",
            StateKind::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, StateKind::Succeeded | StateKind::Failed)
    }

    /// Checks whether a task may move from `self` to `next`.
    pub fn can_transition_to(self, next: StateKind) -> bool {
        matches!(
            (self, next),
            (StateKind::Pending, StateKind::Running)
                | (StateKind::Running, StateKind::Succeeded)
                | (StateKind::Running, StateKind::Failed)
        )
    }
}

/// Why an evaluation task failed.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// The stored model bundle or the evaluation dataset could not be found.
    #[display(fmt = "missing_artifact")]
    MissingArtifact,
    /// The bundle could not be turned into a scoreable model.
    #[display(fmt = "model_load_error")]
    ModelLoadError,
    /// Inference or metric computation failed.
    #[display(fmt = "scoring")]
    Scoring,
    /// The results could not be delivered to the model developer.
    #[display(fmt = "delivery_error")]
    DeliveryError,
    /// The evaluator stopped while the task was running.
    #[display(fmt = "interrupted")]
    Interrupted,
}

/// The state of an evaluation task as reported to callers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Running,
    Succeeded {
        /// The anonymized metrics delivered to the model developer.
        result: MetricsResult,
    },
    Failed {
        reason: FailureReason,
        error: String,
    },
}

impl TaskState {
    pub fn kind(&self) -> StateKind {
        match self {
            TaskState::Pending => StateKind::Pending,
            TaskState::Running => StateKind::Running,
            TaskState::Succeeded { .. } => StateKind::Succeeded,
            TaskState::Failed { .. } => StateKind::Failed,
        }
    }

    pub fn failed(reason: FailureReason, error: impl ToString) -> Self {
        TaskState::Failed {
            reason,
            error: error.to_string(),
        }
    }
}

/// The persisted record of an evaluation task.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub state: TaskState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// The anonymized metrics, kept even if delivering them failed.
    #[serde(default)]
    pub result: Option<MetricsResult>,
}

impl TaskRecord {
    /// A freshly accepted task.
    pub fn pending() -> Self {
        let now = Utc::now();
        Self {
            state: TaskState::Pending,
            created_at: now,
            updated_at: now,
            result: None,
        }
    }

    /// Returns a copy of this record moved to `state`.
    pub fn advance(&self, state: TaskState) -> Self {
        let result = match &state {
            TaskState::Succeeded { result } => Some(*result),
            _ => self.result,
        };
        Self {
            state,
            created_at: self.created_at,
            updated_at: Utc::now(),
            result,
        }
    }

    /// Attaches the computed metrics to this record.
    pub fn with_result(mut self, result: MetricsResult) -> Self {
        self.result = Some(result);
        self
    }
}
