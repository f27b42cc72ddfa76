use std::{future::Future, time::Duration};

use tokio::time::timeout;
use tracing::warn;

use crate::{
    error::ServiceError,
    state::state_machine::{Plan, SessionEvent, SessionPhase, SessionStateMachine},
};

/// Run `work` between planning and applying `event`. `work` receives the phase the
/// session will be in once the plan is applied.
///
/// The plan is aborted when the work fails or exceeds `limit`, leaving the phase untouched.
/// Callers hold the session lock for the whole call, which serializes transitions.
pub async fn run_transition<F, Fut, T>(
    machine: &mut SessionStateMachine,
    event: SessionEvent,
    limit: Option<Duration>,
    work: F,
) -> Result<(T, SessionPhase), ServiceError>
where
    F: FnOnce(SessionPhase) -> Fut,
    Fut: Future<Output = Result<T, ServiceError>>,
{
    let Plan {
        id: plan_id, to, ..
    } = machine.plan(event)?;

    let work_future = work(to);
    let outcome = if let Some(limit) = limit {
        match timeout(limit, work_future).await {
            Ok(result) => result,
            Err(_) => {
                if let Err(abort_err) = machine.abort(plan_id) {
                    warn!(
                        event = ?event,
                        plan_id = %plan_id,
                        error = ?abort_err,
                        "failed to abort transition after timeout"
                    );
                }
                return Err(ServiceError::Timeout);
            }
        }
    } else {
        work_future.await
    };

    match outcome {
        Ok(value) => {
            let next = machine.apply(plan_id)?;
            Ok((value, next))
        }
        Err(err) => {
            if let Err(abort_err) = machine.abort(plan_id) {
                warn!(
                    event = ?event,
                    plan_id = %plan_id,
                    error = ?abort_err,
                    "failed to abort transition after work error"
                );
            }
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn failed_work_leaves_phase_untouched() {
        let mut machine = SessionStateMachine::resume(SessionPhase::Active);
        let result: Result<((), SessionPhase), _> =
            run_transition(&mut machine, SessionEvent::Complete, None, |_| async {
                Err(ServiceError::Degraded)
            })
            .await;

        assert!(matches!(result, Err(ServiceError::Degraded)));
        assert_eq!(machine.phase(), SessionPhase::Active);
        assert!(machine.plan(SessionEvent::AdvanceQuestion).is_ok());
    }

    #[tokio::test]
    async fn slow_work_times_out_and_aborts() {
        let mut machine = SessionStateMachine::resume(SessionPhase::Active);
        let result = run_transition(
            &mut machine,
            SessionEvent::Complete,
            Some(Duration::from_millis(10)),
            |_| async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(())
            },
        )
        .await;

        assert!(matches!(result, Err(ServiceError::Timeout)));
        assert_eq!(machine.phase(), SessionPhase::Active);
    }

    #[tokio::test]
    async fn successful_work_applies_the_plan() {
        let mut machine = SessionStateMachine::resume(SessionPhase::Active);
        let (value, next) = run_transition(
            &mut machine,
            SessionEvent::Complete,
            Some(Duration::from_secs(1)),
            |next| async move {
                assert_eq!(next, SessionPhase::Completed);
                Ok(42)
            },
        )
        .await
        .unwrap();

        assert_eq!(value, 42);
        assert_eq!(next, SessionPhase::Completed);
    }

    #[tokio::test]
    async fn refused_events_never_run_the_work() {
        let mut machine = SessionStateMachine::new();
        let mut ran = false;
        let result = run_transition(&mut machine, SessionEvent::AnswerApplied, None, |_| {
            ran = true;
            async { Ok(()) }
        })
        .await;

        assert!(matches!(result, Err(ServiceError::InvalidState(_))));
        assert!(!ran);
        assert_eq!(machine.phase(), SessionPhase::Pending);
    }
}
