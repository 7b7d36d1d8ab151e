use std::time::Instant;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Lifecycle status of a scoring session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Scorekeepers are submitting mutations.
    Active,
    /// Scoring is suspended (rain delay, break); resumable.
    Paused,
    /// Folded into a permanent record. Terminal.
    Finalized,
    /// Closed by the sweeper after a crash or inactivity. Terminal.
    Abandoned,
}

impl SessionStatus {
    /// Whether no further transition can leave this status.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finalized | Self::Abandoned)
    }
}

/// Events that can be applied to the lifecycle state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// A scorekeeper pauses the session.
    Pause,
    /// A scorekeeper resumes a paused session.
    Resume,
    /// The session is folded into its permanent record.
    Finalize,
    /// The sweeper gives up on the session.
    Abandon,
}

/// Error returned when attempting to apply an invalid transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while {from:?}")]
pub struct InvalidTransition {
    /// The status the session was in when the event was received.
    pub from: SessionStatus,
    /// The event that cannot be applied from this status.
    pub event: LifecycleEvent,
}

/// Errors that can occur when planning a transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    /// A transition is already pending and must be applied or aborted.
    #[error("a lifecycle transition is already pending")]
    AlreadyPending,
    /// The requested transition is not valid from the current status.
    #[error(transparent)]
    InvalidTransition(InvalidTransition),
}

/// Errors that can occur when applying a planned transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplyError {
    /// No transition is currently pending.
    #[error("no transition is pending")]
    NoPending,
    /// Plan ID does not match the pending plan.
    #[error("pending transition {expected} does not match {got}")]
    IdMismatch {
        /// Expected plan ID.
        expected: PlanId,
        /// Provided plan ID.
        got: PlanId,
    },
    /// Status changed since the plan was created.
    #[error("status changed during transition (expected {expected:?}, got {actual:?})")]
    StatusMismatch {
        /// Status when plan was created.
        expected: SessionStatus,
        /// Current status.
        actual: SessionStatus,
    },
}

/// Errors that can occur when aborting a planned transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AbortError {
    /// No transition is currently pending.
    #[error("no transition is pending")]
    NoPending,
    /// Plan ID does not match the pending plan.
    #[error("pending transition {expected} does not match {got}")]
    IdMismatch {
        /// Expected plan ID.
        expected: PlanId,
        /// Provided plan ID.
        got: PlanId,
    },
}

/// Unique identifier for a planned transition.
pub type PlanId = Uuid;

/// A transition that has been validated but not yet applied.
#[derive(Debug, Clone)]
pub struct Plan {
    /// Unique identifier for this plan.
    pub id: PlanId,
    /// Status the session is currently in.
    pub from: SessionStatus,
    /// Status the session will transition to.
    pub to: SessionStatus,
    /// Event that triggered this transition.
    pub event: LifecycleEvent,
    /// Version number after applying this transition.
    pub version_next: usize,
    /// Timestamp when this plan was created.
    pub pending_since: Instant,
}

/// Per-session lifecycle state machine.
///
/// Long transitions (finalize writes through to storage) are split into
/// `plan` and `apply`: while a plan is pending the session keeps its current
/// status but callers can see that a transition is in flight.
#[derive(Debug, Clone)]
pub struct SessionLifecycle {
    status: SessionStatus,
    version: usize,
    pending: Option<Plan>,
}

impl Default for SessionLifecycle {
    fn default() -> Self {
        Self::restore(SessionStatus::Active)
    }
}

impl SessionLifecycle {
    /// Create a lifecycle for a freshly started session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a lifecycle from a persisted status.
    pub fn restore(status: SessionStatus) -> Self {
        Self {
            status,
            version: 0,
            pending: None,
        }
    }

    /// Inspect the current status.
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Number of applied transitions.
    pub fn version(&self) -> usize {
        self.version
    }

    /// The transition currently in flight, if any.
    pub fn pending(&self) -> Option<&Plan> {
        self.pending.as_ref()
    }

    /// Plan a transition by validating that the event can be applied from the current status.
    pub fn plan(&mut self, event: LifecycleEvent) -> Result<Plan, PlanError> {
        if self.pending.is_some() {
            return Err(PlanError::AlreadyPending);
        }

        let next = self
            .compute_transition(event)
            .map_err(PlanError::InvalidTransition)?;

        let plan = Plan {
            id: Uuid::new_v4(),
            from: self.status,
            to: next,
            event,
            version_next: self.version + 1,
            pending_since: Instant::now(),
        };

        self.pending = Some(plan.clone());

        Ok(plan)
    }

    /// Apply a planned transition, returning the new status.
    pub fn apply(&mut self, plan_id: PlanId) -> Result<SessionStatus, ApplyError> {
        let plan = self.pending.take().ok_or(ApplyError::NoPending)?;

        if plan.id != plan_id {
            let expected = plan.id;
            self.pending = Some(plan);
            return Err(ApplyError::IdMismatch {
                expected,
                got: plan_id,
            });
        }

        if self.status != plan.from {
            return Err(ApplyError::StatusMismatch {
                expected: plan.from,
                actual: self.status,
            });
        }

        self.status = plan.to;
        self.version = plan.version_next;

        Ok(self.status)
    }

    /// Abort a planned transition, leaving the status untouched.
    pub fn abort(&mut self, plan_id: PlanId) -> Result<(), AbortError> {
        let plan = self.pending.as_ref().ok_or(AbortError::NoPending)?;

        if plan.id != plan_id {
            return Err(AbortError::IdMismatch {
                expected: plan.id,
                got: plan_id,
            });
        }

        self.pending = None;
        Ok(())
    }

    /// Plan and apply in one step for transitions that need no outside work.
    pub fn transition(&mut self, event: LifecycleEvent) -> Result<SessionStatus, PlanError> {
        let plan = self.plan(event)?;
        // The plan was created against the current status a line above.
        self.pending = None;
        self.status = plan.to;
        self.version = plan.version_next;
        Ok(self.status)
    }

    fn compute_transition(&self, event: LifecycleEvent) -> Result<SessionStatus, InvalidTransition> {
        let next = match (self.status, event) {
            (SessionStatus::Active, LifecycleEvent::Pause) => SessionStatus::Paused,
            (SessionStatus::Paused, LifecycleEvent::Resume) => SessionStatus::Active,
            (SessionStatus::Active | SessionStatus::Paused, LifecycleEvent::Finalize) => {
                SessionStatus::Finalized
            }
            (SessionStatus::Active | SessionStatus::Paused, LifecycleEvent::Abandon) => {
                SessionStatus::Abandoned
            }
            (from, event) => return Err(InvalidTransition { from, event }),
        };

        Ok(next)
    }
}
