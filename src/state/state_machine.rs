use std::time::Instant;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

/// Lifecycle phases of a live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// Created and accepting joins; play has not started.
    Pending,
    /// Questions are being played.
    Active,
    /// Results are final and flushed to durable storage. Terminal.
    Completed,
}

/// Events that can be applied to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// The controller starts play.
    Start,
    /// The current question index moved.
    AdvanceQuestion,
    /// A participant answer was scored.
    AnswerApplied,
    /// The session is closed and its results persisted.
    Complete,
}

/// Error returned when attempting to apply an invalid transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while {from:?}")]
pub struct InvalidTransition {
    /// The phase the state machine was in when the invalid event was received.
    pub from: SessionPhase,
    /// The event that cannot be applied from this phase.
    pub event: SessionEvent,
}

/// Why [`SessionStateMachine::plan`] refused an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// Another plan is in flight.
    AlreadyPending,
    /// The event is not allowed from the current phase.
    InvalidTransition(InvalidTransition),
}

/// Why [`SessionStateMachine::apply`] refused a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyError {
    /// Nothing to apply.
    NoPending,
    /// The caller holds a plan that is not the one in flight.
    IdMismatch {
        /// Id of the plan in flight.
        expected: PlanId,
        /// Id supplied by the caller.
        got: PlanId,
    },
    /// The phase moved under the plan.
    PhaseMismatch {
        /// Phase recorded in the plan.
        expected: SessionPhase,
        /// Phase found at apply time.
        actual: SessionPhase,
    },
    /// The version moved under the plan.
    VersionMismatch {
        /// Version the plan would produce.
        expected: usize,
        /// Version applying now would produce.
        actual: usize,
    },
}

/// Why [`SessionStateMachine::abort`] refused a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortError {
    /// Nothing to abort.
    NoPending,
    /// The caller holds a plan that is not the one in flight.
    IdMismatch {
        /// Id of the plan in flight.
        expected: PlanId,
        /// Id supplied by the caller.
        got: PlanId,
    },
}

/// Identifier handed out by [`SessionStateMachine::plan`].
pub type PlanId = Uuid;

/// A validated transition waiting for the side effects (durable flush, cache writes) to land.
#[derive(Debug, Clone)]
pub struct Plan {
    /// Plan identifier.
    pub id: PlanId,
    /// Phase before the transition.
    pub from: SessionPhase,
    /// Phase after the transition.
    pub to: SessionPhase,
    /// Triggering event.
    pub event: SessionEvent,
    /// Version once applied.
    pub version_next: usize,
    /// When the plan was made.
    pub pending_since: Instant,
}

/// Per-session state machine: `pending -> active -> completed` with an `active` self-loop.
#[derive(Debug, Clone)]
pub struct SessionStateMachine {
    phase: SessionPhase,
    version: usize,
    pending: Option<Plan>,
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self::resume(SessionPhase::Pending)
    }
}

impl SessionStateMachine {
    /// Fresh machine in [`SessionPhase::Pending`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a state machine from a phase read back from the ephemeral store.
    pub fn resume(phase: SessionPhase) -> Self {
        Self {
            phase,
            version: 0,
            pending: None,
        }
    }

    /// Current phase, ignoring any plan in flight.
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Validate `event` against the current phase and park it as the plan in flight.
    ///
    /// Only one plan may be in flight; it must be applied or aborted before the next one.
    pub fn plan(&mut self, event: SessionEvent) -> Result<Plan, PlanError> {
        if self.pending.is_some() {
            return Err(PlanError::AlreadyPending);
        }
        let to = next_phase(self.phase, event).map_err(PlanError::InvalidTransition)?;
        let plan = Plan {
            id: Uuid::new_v4(),
            from: self.phase,
            to,
            event,
            version_next: self.version + 1,
            pending_since: Instant::now(),
        };
        self.pending = Some(plan.clone());
        Ok(plan)
    }

    /// Commit the plan in flight and return the phase reached.
    pub fn apply(&mut self, plan_id: PlanId) -> Result<SessionPhase, ApplyError> {
        let plan = match self.pending.take() {
            None => return Err(ApplyError::NoPending),
            Some(plan) if plan.id != plan_id => {
                let expected = plan.id;
                self.pending = Some(plan);
                return Err(ApplyError::IdMismatch {
                    expected,
                    got: plan_id,
                });
            }
            Some(plan) => plan,
        };

        if plan.from != self.phase {
            return Err(ApplyError::PhaseMismatch {
                expected: plan.from,
                actual: self.phase,
            });
        }
        let version = self.version + 1;
        if version != plan.version_next {
            return Err(ApplyError::VersionMismatch {
                expected: plan.version_next,
                actual: version,
            });
        }

        self.phase = plan.to;
        self.version = version;
        Ok(self.phase)
    }

    /// Drop the plan in flight, leaving the phase untouched.
    pub fn abort(&mut self, plan_id: PlanId) -> Result<(), AbortError> {
        match &self.pending {
            None => Err(AbortError::NoPending),
            Some(plan) if plan.id != plan_id => Err(AbortError::IdMismatch {
                expected: plan.id,
                got: plan_id,
            }),
            Some(_) => {
                self.pending = None;
                Ok(())
            }
        }
    }
}

fn next_phase(from: SessionPhase, event: SessionEvent) -> Result<SessionPhase, InvalidTransition> {
    use SessionEvent as E;
    use SessionPhase as P;

    match (from, event) {
        (P::Pending, E::Start) => Ok(P::Active),
        (P::Active, E::AdvanceQuestion | E::AnswerApplied) => Ok(P::Active),
        (P::Active, E::Complete) => Ok(P::Completed),
        (from, event) => Err(InvalidTransition { from, event }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(sm: &mut SessionStateMachine, event: SessionEvent) -> SessionPhase {
        let plan = sm.plan(event).unwrap();
        sm.apply(plan.id).unwrap()
    }

    #[test]
    fn initial_state_is_pending() {
        let sm = SessionStateMachine::new();
        assert_eq!(sm.phase(), SessionPhase::Pending);
    }

    #[test]
    fn full_happy_path_through_session() {
        let mut sm = SessionStateMachine::new();

        assert_eq!(apply(&mut sm, SessionEvent::Start), SessionPhase::Active);
        assert_eq!(
            apply(&mut sm, SessionEvent::AnswerApplied),
            SessionPhase::Active
        );
        assert_eq!(
            apply(&mut sm, SessionEvent::AdvanceQuestion),
            SessionPhase::Active
        );
        assert_eq!(apply(&mut sm, SessionEvent::Complete), SessionPhase::Completed);
        assert_eq!(sm.version, 4);
    }

    #[test]
    fn nothing_leaves_completed() {
        let mut sm = SessionStateMachine::resume(SessionPhase::Completed);
        for event in [
            SessionEvent::Start,
            SessionEvent::AdvanceQuestion,
            SessionEvent::AnswerApplied,
            SessionEvent::Complete,
        ] {
            assert_eq!(
                sm.plan(event).unwrap_err(),
                PlanError::InvalidTransition(InvalidTransition {
                    from: SessionPhase::Completed,
                    event,
                })
            );
        }
    }

    #[test]
    fn answers_are_rejected_before_start() {
        let mut sm = SessionStateMachine::new();
        assert!(matches!(
            sm.plan(SessionEvent::AnswerApplied),
            Err(PlanError::InvalidTransition(_))
        ));
        assert!(matches!(
            sm.plan(SessionEvent::Complete),
            Err(PlanError::InvalidTransition(_))
        ));
    }

    #[test]
    fn second_plan_while_pending_is_rejected() {
        let mut sm = SessionStateMachine::resume(SessionPhase::Active);
        let plan = sm.plan(SessionEvent::Complete).unwrap();
        assert_eq!(plan.to, SessionPhase::Completed);
        assert_eq!(sm.phase(), SessionPhase::Active);
        assert_eq!(
            sm.plan(SessionEvent::AnswerApplied).unwrap_err(),
            PlanError::AlreadyPending
        );
        assert_eq!(sm.apply(plan.id).unwrap(), SessionPhase::Completed);
    }

    #[test]
    fn abort_clears_pending() {
        let mut sm = SessionStateMachine::resume(SessionPhase::Active);
        let plan = sm.plan(SessionEvent::Complete).unwrap();

        assert!(matches!(
            sm.abort(Uuid::new_v4()),
            Err(AbortError::IdMismatch { expected, .. }) if expected == plan.id
        ));
        sm.abort(plan.id).unwrap();
        assert_eq!(sm.phase(), SessionPhase::Active);
        assert_eq!(sm.apply(plan.id).unwrap_err(), ApplyError::NoPending);
        assert!(sm.plan(SessionEvent::AdvanceQuestion).is_ok());
    }
}
