// restart/lock.rs - Cluster Restart Lock

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, error, info};

use super::RestartError;
use crate::relation::{
    keys, ApplicationRecord, ApplicationWriter, LeaderToken, PeerDirectory, PeerRecord, UnitId,
    LOCK_REQUESTED,
};

/// Observable state of the restart lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockState {
    Free,
    Held(UnitId),
}

impl LockState {
    pub fn is_held_by(&self, unit: &UnitId) -> bool {
        matches!(self, LockState::Held(holder) if holder == unit)
    }
}

/// Cluster-wide mutual exclusion for service restarts
pub trait RestartLock {
    fn state(&self) -> LockState;

    /// Try to take the lock. Never blocks: `false` means another unit holds
    /// it and the caller should retry on a later evaluation.
    fn try_acquire(&mut self, unit: &UnitId) -> Result<bool, RestartError>;

    /// Give the lock up. Releasing a lock that is not held is a no-op.
    fn release(&mut self, unit: &UnitId) -> Result<(), RestartError>;
}

/// Scoped lock ownership, released on every exit path
pub struct LockGuard<'l> {
    lock: &'l mut dyn RestartLock,
    unit: UnitId,
    released: bool,
}

impl<'l> LockGuard<'l> {
    /// Take the lock, or return `None` when another unit holds it
    pub fn acquire(
        lock: &'l mut dyn RestartLock,
        unit: &UnitId,
    ) -> Result<Option<Self>, RestartError> {
        if !lock.try_acquire(unit)? {
            return Ok(None);
        }
        debug!(unit = %unit, "Restart lock acquired");
        Ok(Some(Self {
            lock,
            unit: unit.clone(),
            released: false,
        }))
    }

    pub fn unit(&self) -> &UnitId {
        &self.unit
    }

    /// Release explicitly, surfacing errors
    pub fn release(mut self) -> Result<(), RestartError> {
        self.released = true;
        self.lock.release(&self.unit)?;
        debug!(unit = %self.unit, "Restart lock released");
        Ok(())
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.lock.release(&self.unit) {
            error!(unit = %self.unit, "Failed to release restart lock: {}", e);
        }
    }
}

/// In-process lock. Clones share the same state, which lets several
/// simulated units contend for it.
#[derive(Debug, Clone, Default)]
pub struct LocalRestartLock {
    holder: Arc<Mutex<Option<UnitId>>>,
}

impl LocalRestartLock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RestartLock for LocalRestartLock {
    fn state(&self) -> LockState {
        match self.holder.lock().as_ref() {
            Some(unit) => LockState::Held(unit.clone()),
            None => LockState::Free,
        }
    }

    fn try_acquire(&mut self, unit: &UnitId) -> Result<bool, RestartError> {
        let mut holder = self.holder.lock();
        match holder.as_ref() {
            Some(current) if current != unit => Ok(false),
            _ => {
                *holder = Some(unit.clone());
                Ok(true)
            }
        }
    }

    fn release(&mut self, unit: &UnitId) -> Result<(), RestartError> {
        let mut holder = self.holder.lock();
        if holder.as_ref() == Some(unit) {
            *holder = None;
        }
        Ok(())
    }
}

/// Lock negotiated over the peer relation.
///
/// Units raise `restart_lock=requested` in their unit data. The leader
/// grants the lock to the lowest requesting unit by writing
/// `restart_lock_holder` in application data, and hands it on once the
/// holder withdraws its request or leaves. A holder that withdrew its
/// request no longer counts as holding the lock.
pub struct DirectoryRestartLock<'a> {
    dir: &'a mut dyn PeerDirectory,
    token: Option<&'a LeaderToken>,
    relation: &'a str,
}

impl<'a> DirectoryRestartLock<'a> {
    pub fn new(
        dir: &'a mut dyn PeerDirectory,
        token: Option<&'a LeaderToken>,
        relation: &'a str,
    ) -> Self {
        Self {
            dir,
            token,
            relation,
        }
    }

    /// Leader bookkeeping: keep the current holder while it still asks for
    /// the lock, otherwise pass it to the lowest requester. Returns the
    /// holder after the decision.
    pub fn grant(
        dir: &mut dyn PeerDirectory,
        token: &LeaderToken,
        relation: &str,
    ) -> Result<Option<UnitId>, RestartError> {
        let requesters = requesters(dir, relation);
        let current = ApplicationRecord::from_relation_data(&dir.app_data(relation))
            .restart_lock_holder;

        let next = match &current {
            Some(holder) if requesters.contains(holder) => Some(holder.clone()),
            _ => requesters.first().cloned(),
        };

        if next != current {
            info!(
                from = current.as_ref().map(UnitId::as_str).unwrap_or("-"),
                to = next.as_ref().map(UnitId::as_str).unwrap_or("-"),
                "Handing over restart lock"
            );
            ApplicationWriter::new(dir, token, relation).set_restart_lock_holder(next.as_ref())?;
        }
        Ok(next)
    }

    fn set_request(&mut self, requested: bool) -> Result<(), RestartError> {
        let value = if requested { LOCK_REQUESTED } else { "" };
        self.dir.set_unit_data(self.relation, keys::RESTART_LOCK, value)?;
        Ok(())
    }

    fn regrant(&mut self) -> Result<(), RestartError> {
        if let Some(token) = self.token {
            Self::grant(self.dir, token, self.relation)?;
        }
        Ok(())
    }
}

impl RestartLock for DirectoryRestartLock<'_> {
    fn state(&self) -> LockState {
        let holder = ApplicationRecord::from_relation_data(&self.dir.app_data(self.relation))
            .restart_lock_holder;
        match holder {
            Some(unit) if requesters(&*self.dir, self.relation).contains(&unit) => {
                LockState::Held(unit)
            }
            _ => LockState::Free,
        }
    }

    fn try_acquire(&mut self, unit: &UnitId) -> Result<bool, RestartError> {
        self.set_request(true)?;
        self.regrant()?;
        Ok(self.state().is_held_by(unit))
    }

    fn release(&mut self, unit: &UnitId) -> Result<(), RestartError> {
        debug!(unit = %unit, "Withdrawing restart lock request");
        self.set_request(false)?;
        self.regrant()
    }
}

/// Every unit on the relation currently asking for the lock, sorted
fn requesters(dir: &dyn PeerDirectory, relation: &str) -> Vec<UnitId> {
    let local = dir.local_unit().clone();
    let mut units = dir.remote_units(relation);
    units.push(local);
    units.sort();

    units
        .into_iter()
        .filter(|unit| {
            let data = dir.unit_data(relation, unit);
            PeerRecord::from_relation_data(unit.clone(), &data).restart_lock
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relation::{MemoryDirectory, RelationFabric};

    fn units(fabric: &RelationFabric) -> (MemoryDirectory, MemoryDirectory) {
        fabric.join("cluster", &"minio/0".into());
        fabric.join("cluster", &"minio/1".into());
        (
            MemoryDirectory::new(fabric.clone(), "minio/0".into(), true),
            MemoryDirectory::new(fabric.clone(), "minio/1".into(), false),
        )
    }

    #[test]
    fn test_local_lock_excludes_second_holder() {
        let mut a = LocalRestartLock::new();
        let mut b = a.clone();
        let (u0, u1) = (UnitId::from("minio/0"), UnitId::from("minio/1"));

        assert!(a.try_acquire(&u0).unwrap());
        assert!(!b.try_acquire(&u1).unwrap());
        assert_eq!(b.state(), LockState::Held(u0.clone()));

        a.release(&u0).unwrap();
        assert_eq!(b.state(), LockState::Free);
        assert!(b.try_acquire(&u1).unwrap());
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let mut lock = LocalRestartLock::new();
        let observer = lock.clone();
        let unit = UnitId::from("minio/0");
        {
            let guard = LockGuard::acquire(&mut lock, &unit).unwrap();
            assert!(guard.is_some());
            assert!(observer.state().is_held_by(&unit));
        }
        assert_eq!(observer.state(), LockState::Free);
    }

    #[test]
    fn test_follower_waits_for_leader_grant() {
        let fabric = RelationFabric::new();
        let (mut leader, mut follower) = units(&fabric);
        let token = LeaderToken::acquire(&leader).unwrap();
        let u1 = UnitId::from("minio/1");

        {
            let mut lock = DirectoryRestartLock::new(&mut follower, None, "cluster");
            assert!(!lock.try_acquire(&u1).unwrap());
        }

        // Leader evaluates and grants
        let holder = DirectoryRestartLock::grant(&mut leader, &token, "cluster").unwrap();
        assert_eq!(holder, Some(u1.clone()));

        let mut lock = DirectoryRestartLock::new(&mut follower, None, "cluster");
        assert!(lock.try_acquire(&u1).unwrap());
        lock.release(&u1).unwrap();
        assert_eq!(lock.state(), LockState::Free);
    }

    #[test]
    fn test_leader_never_grants_two_holders() {
        let fabric = RelationFabric::new();
        let (mut leader, mut follower) = units(&fabric);
        let token = LeaderToken::acquire(&leader).unwrap();
        let (u0, u1) = (UnitId::from("minio/0"), UnitId::from("minio/1"));

        {
            let mut lock = DirectoryRestartLock::new(&mut follower, None, "cluster");
            lock.try_acquire(&u1).unwrap();
        }
        DirectoryRestartLock::grant(&mut leader, &token, "cluster").unwrap();

        // The leader asks too but minio/1 already holds the lock
        let mut lock = DirectoryRestartLock::new(&mut leader, Some(&token), "cluster");
        assert!(!lock.try_acquire(&u0).unwrap());
        assert!(lock.state().is_held_by(&u1));
        drop(lock);

        // Holder withdraws, the leader picks itself up on its next pass
        {
            let mut lock = DirectoryRestartLock::new(&mut follower, None, "cluster");
            lock.release(&u1).unwrap();
        }
        let mut lock = DirectoryRestartLock::new(&mut leader, Some(&token), "cluster");
        assert!(lock.try_acquire(&u0).unwrap());
        lock.release(&u0).unwrap();
        assert_eq!(lock.state(), LockState::Free);
    }

    #[test]
    fn test_departed_holder_is_reclaimed() {
        let fabric = RelationFabric::new();
        let (mut leader, mut follower) = units(&fabric);
        let token = LeaderToken::acquire(&leader).unwrap();
        {
            let mut lock = DirectoryRestartLock::new(&mut follower, None, "cluster");
            lock.try_acquire(&"minio/1".into()).unwrap();
        }
        DirectoryRestartLock::grant(&mut leader, &token, "cluster").unwrap();

        fabric.depart("cluster", &"minio/1".into());
        let holder = DirectoryRestartLock::grant(&mut leader, &token, "cluster").unwrap();
        assert_eq!(holder, None);
    }
}
