// restart/coordinator.rs - Restart Coordinator

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::lock::{LockGuard, RestartLock};
use super::service::ServiceManager;
use super::RestartError;
use crate::convergence::{ConfigContext, ConvergenceController};
use crate::observability;
use crate::relation::UnitId;

/// Restart lifecycle of one unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPhase {
    /// Nothing to apply
    Idle,
    /// A context diff is waiting for the lock
    PendingRestart,
    /// Lock held, services not touched yet
    Locked,
    /// Services are being restarted
    Restarting,
    /// Context applied and recorded
    Committed,
    /// Restart failed; the request stays queued
    Failed,
}

impl RestartPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RestartPhase::Idle => "idle",
            RestartPhase::PendingRestart => "pending_restart",
            RestartPhase::Locked => "locked",
            RestartPhase::Restarting => "restarting",
            RestartPhase::Committed => "committed",
            RestartPhase::Failed => "failed",
        }
    }
}

/// Inputs moving the restart state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartStep {
    Request,
    LockBusy,
    LockAcquired,
    Begin,
    Succeeded,
    Failed,
    Withdraw,
}

/// A queued restart with the context it will apply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartRequest {
    pub id: String,
    pub context: ConfigContext,
    pub services: Vec<String>,
    pub requested_at: DateTime<Utc>,
    /// Evaluations that tried and did not get through
    pub attempts: u32,
}

impl RestartRequest {
    pub fn new(context: ConfigContext, services: Vec<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            context,
            services,
            requested_at: Utc::now(),
            attempts: 0,
        }
    }
}

/// Result of driving a pending restart
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestartOutcome {
    NothingPending,
    /// Another unit holds the lock; retry on a later evaluation
    Deferred,
    Committed,
    Failed(String),
}

/// Applies queued restarts one unit at a time across the cluster
#[derive(Debug, Clone)]
pub struct RestartCoordinator {
    phase: RestartPhase,
    pending: Option<RestartRequest>,
}

impl RestartCoordinator {
    /// Resume from persisted state
    pub fn new(pending: Option<RestartRequest>) -> Self {
        let phase = if pending.is_some() {
            RestartPhase::PendingRestart
        } else {
            RestartPhase::Idle
        };
        Self { phase, pending }
    }

    pub fn phase(&self) -> RestartPhase {
        self.phase
    }

    pub fn pending(&self) -> Option<&RestartRequest> {
        self.pending.as_ref()
    }

    /// Hand the queued request back for persistence
    pub fn into_pending(self) -> Option<RestartRequest> {
        self.pending
    }

    fn validate_transition(&self, step: RestartStep) -> Result<RestartPhase, RestartError> {
        use RestartPhase as P;
        use RestartStep as S;

        match (self.phase, step) {
            (P::Idle | P::PendingRestart | P::Committed | P::Failed, S::Request) => {
                Ok(P::PendingRestart)
            }
            (P::PendingRestart | P::Failed, S::LockBusy) => Ok(P::PendingRestart),
            (P::PendingRestart | P::Failed, S::LockAcquired) => Ok(P::Locked),
            (P::Locked, S::Begin) => Ok(P::Restarting),
            (P::Restarting, S::Succeeded) => Ok(P::Committed),
            (P::Restarting, S::Failed) => Ok(P::Failed),
            (P::Idle | P::PendingRestart | P::Committed | P::Failed, S::Withdraw) => Ok(P::Idle),
            (phase, step) => Err(RestartError::InvalidTransition {
                from: phase.as_str().to_string(),
                to: format!("{:?}", step),
            }),
        }
    }

    fn advance(&mut self, step: RestartStep) -> Result<(), RestartError> {
        let next = self.validate_transition(step)?;
        debug!(from = self.phase.as_str(), to = next.as_str(), "Restart phase");
        self.phase = next;
        Ok(())
    }

    /// Queue a restart applying `context`. A pending request absorbs later
    /// ones: its context is replaced, no second request is queued. Returns
    /// whether a new request was queued.
    pub fn request(
        &mut self,
        context: ConfigContext,
        services: Vec<String>,
    ) -> Result<bool, RestartError> {
        self.advance(RestartStep::Request)?;

        match self.pending.as_mut() {
            Some(pending) => {
                if pending.context != context {
                    info!(request = %pending.id, "Pending restart now targets a newer context");
                    pending.context = context;
                    pending.services = services;
                } else {
                    debug!(request = %pending.id, "Restart already pending");
                }
                Ok(false)
            }
            None => {
                let request = RestartRequest::new(context, services);
                info!(request = %request.id, "Restart requested");
                self.pending = Some(request);
                Ok(true)
            }
        }
    }

    /// Drop the pending request: the desired context is running already.
    /// Returns whether a request was dropped.
    pub fn withdraw(&mut self) -> Result<bool, RestartError> {
        self.advance(RestartStep::Withdraw)?;
        match self.pending.take() {
            Some(request) => {
                info!(request = %request.id, "Pending restart no longer needed");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Try to apply the pending restart.
    ///
    /// The lock is released on every path once acquired, including service
    /// failures and errors bubbling out of this function.
    pub fn drive(
        &mut self,
        unit: &UnitId,
        lock: &mut dyn RestartLock,
        services: &dyn ServiceManager,
        controller: &mut ConvergenceController,
    ) -> Result<RestartOutcome, RestartError> {
        let Some(request) = self.pending.as_mut() else {
            return Ok(RestartOutcome::NothingPending);
        };
        request.attempts += 1;

        let Some(guard) = LockGuard::acquire(lock, unit)? else {
            info!(unit = %unit, attempts = request.attempts, "Restart lock busy, deferring");
            self.advance(RestartStep::LockBusy)?;
            observability::record_restart("deferred");
            return Ok(RestartOutcome::Deferred);
        };
        self.advance(RestartStep::LockAcquired)?;
        self.advance(RestartStep::Begin)?;

        let result = restart_all(services, &self.pending_services());
        match result {
            Ok(()) => {
                if let Some(request) = &self.pending {
                    controller.commit(&request.context)?;
                    info!(request = %request.id, attempts = request.attempts, "Restart committed");
                }
                self.pending = None;
                self.advance(RestartStep::Succeeded)?;
                observability::record_restart("committed");
                guard.release()?;
                Ok(RestartOutcome::Committed)
            }
            Err(e) => {
                warn!(unit = %unit, "Restart failed: {}", e);
                self.advance(RestartStep::Failed)?;
                observability::record_restart("failed");
                guard.release()?;
                Ok(RestartOutcome::Failed(e.to_string()))
            }
        }
    }

    fn pending_services(&self) -> Vec<String> {
        self.pending
            .as_ref()
            .map(|r| r.services.clone())
            .unwrap_or_default()
    }
}

fn restart_all(services: &dyn ServiceManager, names: &[String]) -> Result<(), RestartError> {
    services.reload()?;
    for name in names {
        services.restart(name)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relation::DirectoryError;
    use crate::restart::{LocalRestartLock, LockState, ServiceError};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct FakeServices {
        fail: bool,
        restarted: Mutex<Vec<String>>,
    }

    impl ServiceManager for FakeServices {
        fn reload(&self) -> Result<(), ServiceError> {
            Ok(())
        }

        fn restart(&self, service: &str) -> Result<(), ServiceError> {
            if self.fail {
                return Err(ServiceError::Restart {
                    service: service.to_string(),
                    source: crate::command::CommandError::Failed {
                        program: "systemctl".into(),
                        status: Some(1),
                        stderr: "boom".into(),
                    },
                });
            }
            self.restarted.lock().push(service.to_string());
            Ok(())
        }

        fn is_running(&self, _service: &str) -> bool {
            !self.fail
        }
    }

    fn context(password: &str) -> ConfigContext {
        let mut ctx = ConfigContext::default();
        ctx.env.root_password = password.into();
        ctx
    }

    fn services() -> Vec<String> {
        vec!["minio".into()]
    }

    #[test]
    fn test_duplicate_requests_collapse() {
        let mut coordinator = RestartCoordinator::new(None);
        assert!(coordinator.request(context("a"), services()).unwrap());
        assert!(!coordinator.request(context("a"), services()).unwrap());
        assert!(!coordinator.request(context("b"), services()).unwrap());

        assert_eq!(coordinator.phase(), RestartPhase::PendingRestart);
        assert_eq!(coordinator.pending().unwrap().context, context("b"));
    }

    #[test]
    fn test_successful_restart_commits_and_frees_lock() {
        let unit = UnitId::from("minio/0");
        let mut lock = LocalRestartLock::new();
        let observer = lock.clone();
        let fake = FakeServices::default();
        let mut controller = ConvergenceController::default();

        let mut coordinator = RestartCoordinator::new(None);
        coordinator.request(context("a"), services()).unwrap();
        let outcome = coordinator
            .drive(&unit, &mut lock, &fake, &mut controller)
            .unwrap();

        assert_eq!(outcome, RestartOutcome::Committed);
        assert_eq!(coordinator.phase(), RestartPhase::Committed);
        assert!(coordinator.pending().is_none());
        assert_eq!(observer.state(), LockState::Free);
        assert_eq!(*fake.restarted.lock(), vec!["minio".to_string()]);
        assert!(!controller.needs_restart(&context("a")).unwrap());
    }

    #[test]
    fn test_failed_restart_releases_lock_and_keeps_request() {
        let unit = UnitId::from("minio/0");
        let mut lock = LocalRestartLock::new();
        let observer = lock.clone();
        let fake = FakeServices {
            fail: true,
            ..Default::default()
        };
        let mut controller = ConvergenceController::default();

        let mut coordinator = RestartCoordinator::new(None);
        coordinator.request(context("a"), services()).unwrap();
        let outcome = coordinator
            .drive(&unit, &mut lock, &fake, &mut controller)
            .unwrap();

        assert!(matches!(outcome, RestartOutcome::Failed(_)));
        assert_eq!(coordinator.phase(), RestartPhase::Failed);
        assert_eq!(observer.state(), LockState::Free);
        assert!(controller.is_bootstrap());
        assert_eq!(coordinator.pending().unwrap().attempts, 1);

        // The retry goes through once the service recovers
        let outcome = coordinator
            .drive(&unit, &mut lock, &FakeServices::default(), &mut controller)
            .unwrap();
        assert_eq!(outcome, RestartOutcome::Committed);
    }

    /// Grants the lock to anyone and fails to hand it back
    struct StuckLock;

    impl RestartLock for StuckLock {
        fn state(&self) -> LockState {
            LockState::Free
        }

        fn try_acquire(&mut self, _unit: &UnitId) -> Result<bool, RestartError> {
            Ok(true)
        }

        fn release(&mut self, _unit: &UnitId) -> Result<(), RestartError> {
            Err(DirectoryError::Io("relation data unavailable".into()).into())
        }
    }

    #[test]
    fn test_release_error_after_restart_keeps_phase_consistent() {
        let mut controller = ConvergenceController::default();
        let mut coordinator = RestartCoordinator::new(None);
        coordinator.request(context("a"), services()).unwrap();

        let result = coordinator.drive(
            &"minio/0".into(),
            &mut StuckLock,
            &FakeServices::default(),
            &mut controller,
        );

        assert!(matches!(result, Err(RestartError::Directory(_))));
        assert_eq!(coordinator.phase(), RestartPhase::Committed);
        assert!(coordinator.pending().is_none());
        assert!(!controller.needs_restart(&context("a")).unwrap());

        // A failed restart lands in Failed even when the release errors too
        let failing = FakeServices {
            fail: true,
            ..Default::default()
        };
        coordinator.request(context("b"), services()).unwrap();
        let result = coordinator.drive(&"minio/0".into(), &mut StuckLock, &failing, &mut controller);
        assert!(result.is_err());
        assert_eq!(coordinator.phase(), RestartPhase::Failed);
        assert!(coordinator.pending().is_some());
    }

    #[test]
    fn test_busy_lock_defers() {
        let mut lock = LocalRestartLock::new();
        let mut other = lock.clone();
        other.try_acquire(&"minio/1".into()).unwrap();

        let mut controller = ConvergenceController::default();
        let mut coordinator = RestartCoordinator::new(None);
        coordinator.request(context("a"), services()).unwrap();
        let outcome = coordinator
            .drive(&"minio/0".into(), &mut lock, &FakeServices::default(), &mut controller)
            .unwrap();

        assert_eq!(outcome, RestartOutcome::Deferred);
        assert_eq!(coordinator.phase(), RestartPhase::PendingRestart);
        assert!(lock.state().is_held_by(&"minio/1".into()));
    }

    #[test]
    fn test_withdraw_drops_stale_request() {
        let mut coordinator = RestartCoordinator::new(None);
        coordinator.request(context("a"), services()).unwrap();
        assert!(coordinator.withdraw().unwrap());
        assert_eq!(coordinator.phase(), RestartPhase::Idle);
        assert!(coordinator.pending().is_none());
        assert!(!coordinator.withdraw().unwrap());
    }

    #[test]
    fn test_nothing_pending() {
        let mut lock = LocalRestartLock::new();
        let mut controller = ConvergenceController::default();
        let mut coordinator = RestartCoordinator::new(None);
        let outcome = coordinator
            .drive(&"minio/0".into(), &mut lock, &FakeServices::default(), &mut controller)
            .unwrap();
        assert_eq!(outcome, RestartOutcome::NothingPending);
        assert_eq!(coordinator.phase(), RestartPhase::Idle);
    }

    #[test]
    fn test_invalid_transition_rejected() {
        let coordinator = RestartCoordinator::new(None);
        assert!(matches!(
            coordinator.validate_transition(RestartStep::Begin),
            Err(RestartError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_two_units_never_locked_together() {
        let lock = LocalRestartLock::new();
        let fake = FakeServices::default();
        let mut a = RestartCoordinator::new(None);
        let mut b = RestartCoordinator::new(None);
        a.request(context("a"), services()).unwrap();
        b.request(context("b"), services()).unwrap();

        let (u0, u1) = (UnitId::from("minio/0"), UnitId::from("minio/1"));
        let mut lock_a = lock.clone();
        let mut lock_b = lock.clone();

        // minio/1 holds the lock while minio/0 evaluates
        let guard = LockGuard::acquire(&mut lock_b, &u1).unwrap().unwrap();
        let outcome = a
            .drive(&u0, &mut lock_a, &fake, &mut ConvergenceController::default())
            .unwrap();
        assert_eq!(outcome, RestartOutcome::Deferred);
        guard.release().unwrap();

        let outcome = a
            .drive(&u0, &mut lock_a, &fake, &mut ConvergenceController::default())
            .unwrap();
        assert_eq!(outcome, RestartOutcome::Committed);
        let outcome = b
            .drive(&u1, &mut lock_b, &fake, &mut ConvergenceController::default())
            .unwrap();
        assert_eq!(outcome, RestartOutcome::Committed);
        assert_eq!(lock.state(), LockState::Free);
    }
}
