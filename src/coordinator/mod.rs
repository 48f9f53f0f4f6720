//! The dual-write coordinator: the only code that mutates both stores.
//!
//! Every mutation is a [`QuadDiff`] applied under a [`ScopeGuard`]:
//!
//! ```text
//! Idle ─► TxOpen ─► RelationalCommitted ─► TripleStoreSynced
//!           │                 │
//!           ▼                 ▼
//!       RolledBack         Degraded
//! ```
//!
//! The relational commit is the atomicity boundary. It also persists a
//! write intent naming the units the mirror still has to reach, so a crash
//! before the mirror finishes leaves the space degraded on restart. A
//! mirror failure does not fail the write; the intent becomes the space's
//! degraded state and a resync is queued.

pub mod locks;

use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;

use crate::diff::QuadDiff;
use crate::error::{SyncResult, TripleStoreError, WriteError};
use crate::space::{PendingResync, SpaceId, SyncState};
use crate::store::RelationalStore;
use crate::triplestore::TripleStore;

pub use locks::{ScopeGuard, UnitLockTable, UnitScope};

/// Where an `apply_diff` call is in its lifecycle. Logged on each
/// transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteState {
    Idle,
    TxOpen,
    RelationalCommitted,
    TripleStoreSynced,
    RolledBack,
    Degraded,
}

/// Outcome of a write whose relational commit succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ApplyOutcome {
    Synced,
    /// Committed, but the triple store has not seen it yet.
    Degraded { reason: String },
}

impl ApplyOutcome {
    pub fn is_degraded(&self) -> bool {
        matches!(self, ApplyOutcome::Degraded { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    #[serde(flatten)]
    pub outcome: ApplyOutcome,
    /// Quads that existed and were removed.
    pub deleted: usize,
    /// Quads that did not exist and were added.
    pub inserted: usize,
}

impl ApplyReport {
    fn noop() -> Self {
        Self {
            outcome: ApplyOutcome::Synced,
            deleted: 0,
            inserted: 0,
        }
    }
}

/// Request for the background resync worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResyncRequest {
    pub space: SpaceId,
}

pub struct DualWriteCoordinator {
    relational: Arc<RelationalStore>,
    triples: Arc<dyn TripleStore>,
    locks: UnitLockTable,
    mirror_retries: u32,
    resync_queue: Mutex<Option<Sender<ResyncRequest>>>,
}

impl DualWriteCoordinator {
    pub fn new(relational: Arc<RelationalStore>, triples: Arc<dyn TripleStore>, mirror_retries: u32) -> Self {
        Self {
            relational,
            triples,
            locks: UnitLockTable::new(),
            mirror_retries,
            resync_queue: Mutex::new(None),
        }
    }

    pub fn relational(&self) -> &Arc<RelationalStore> {
        &self.relational
    }

    pub fn triples(&self) -> &Arc<dyn TripleStore> {
        &self.triples
    }

    pub fn locks(&self) -> &UnitLockTable {
        &self.locks
    }

    /// Block until `scope` is free and take it.
    pub fn lock(&self, scope: UnitScope) -> ScopeGuard {
        self.locks.acquire(scope)
    }

    /// Route degraded spaces to a resync worker.
    pub fn set_resync_queue(&self, queue: Option<Sender<ResyncRequest>>) {
        *self
            .resync_queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = queue;
    }

    /// Apply `diff` to `space`: relational first (atomic), then the mirror.
    ///
    /// Fails only if the relational transaction fails, in which case
    /// neither store changed. A mirror failure yields
    /// [`ApplyOutcome::Degraded`].
    pub fn apply_diff(&self, guard: &ScopeGuard, space: &SpaceId, diff: &QuadDiff) -> SyncResult<ApplyReport> {
        if guard.space() != space {
            return Err(WriteError::ScopeMismatch {
                guard_space: guard.space().to_string(),
                space: space.to_string(),
            }
            .into());
        }
        if diff.is_empty() {
            return Ok(ApplyReport::noop());
        }

        let span = tracing::info_span!(
            "apply_diff",
            space = %space,
            delete = diff.delete.len(),
            insert = diff.insert.len(),
        );
        let _enter = span.enter();

        let mut state = WriteState::Idle;
        let pending = guard.scope().pending();
        let (deleted, inserted, intent) = match self.commit_relational(space, diff, pending, &mut state) {
            Ok(counts) => counts,
            Err(source) => {
                transition(&mut state, WriteState::RolledBack);
                tracing::warn!(error = %source, "relational transaction rolled back");
                return Err(WriteError::RelationalTransaction {
                    space: space.to_string(),
                    source,
                }
                .into());
            }
        };
        transition(&mut state, WriteState::RelationalCommitted);

        let outcome = match self.mirror(space, diff) {
            Ok(()) => {
                transition(&mut state, WriteState::TripleStoreSynced);
                if let Err(e) = self.relational.settle_intent(space, intent, true) {
                    // The intent stays and is treated as stale on the next open.
                    tracing::warn!(error = %e, intent, "could not clear write intent");
                }
                ApplyOutcome::Synced
            }
            Err(e) => {
                transition(&mut state, WriteState::Degraded);
                ApplyOutcome::Degraded {
                    reason: self.degrade(space, intent, &e),
                }
            }
        };
        tracing::info!(deleted, inserted, degraded = outcome.is_degraded(), "diff applied");
        Ok(ApplyReport {
            outcome,
            deleted,
            inserted,
        })
    }

    fn commit_relational(
        &self,
        space: &SpaceId,
        diff: &QuadDiff,
        pending: PendingResync,
        state: &mut WriteState,
    ) -> Result<(usize, usize, u64), crate::error::RelationalError> {
        let mut tx = self.relational.begin(space)?;
        transition(state, WriteState::TxOpen);
        let deleted = tx.delete_quads(&diff.delete)?;
        let inserted = tx.insert_quads(&diff.insert)?;
        let intent = tx.record_intent(pending);
        tx.commit()?;
        Ok((deleted, inserted, intent))
    }

    /// Mirror the concrete diff, with up to `mirror_retries` extra attempts.
    fn mirror(&self, space: &SpaceId, diff: &QuadDiff) -> Result<(), TripleStoreError> {
        let mut attempt = 0;
        loop {
            match self.triples.apply_diff(space, &diff.delete, &diff.insert) {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.mirror_retries => {
                    attempt += 1;
                    tracing::debug!(attempt, error = %e, "mirror failed, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Turn the write intent into the space's degraded state and queue a
    /// resync. Returns the reason reported to the caller.
    fn degrade(&self, space: &SpaceId, intent: u64, error: &TripleStoreError) -> String {
        let mut reason = error.to_string();
        match self.relational.settle_intent(space, intent, false) {
            Ok(sync) => {
                tracing::warn!(error = %error, sync = %sync, "triple store mirror failed, space degraded");
            }
            Err(persist) => {
                // The committed intent still marks the space stale on the next open.
                tracing::error!(error = %error, persist = %persist, "could not record degraded state");
                reason = format!("{reason}; degraded state pending until restart: {persist}");
            }
        }
        self.notify_resync(space);
        reason
    }

    fn notify_resync(&self, space: &SpaceId) {
        let queue = self.resync_queue.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(queue) = queue.as_ref() {
            if queue.send(ResyncRequest { space: space.clone() }).is_err() {
                tracing::debug!(space = %space, "resync worker gone, relying on sweep");
            }
        }
    }

    /// Current persisted sync state of a space.
    pub fn sync_state(&self, space: &SpaceId) -> SyncResult<SyncState> {
        Ok(self.relational.space(space)?.sync)
    }
}

fn transition(state: &mut WriteState, next: WriteState) {
    tracing::debug!(from = ?*state, to = ?next, "write state");
    *state = next;
}

impl std::fmt::Debug for DualWriteCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DualWriteCoordinator")
            .field("relational", &self.relational)
            .field("mirror_retries", &self.mirror_retries)
            .field("locks", &self.locks)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::quad::Quad;
    use crate::term::Term;
    use crate::triplestore::{EmbeddedTripleStore, Solution, TripleStoreResult};

    /// Fails the first `failures` updates, delegates everything else.
    struct Flaky {
        inner: EmbeddedTripleStore,
        failures: AtomicUsize,
    }

    impl TripleStore for Flaky {
        fn create_space(&self, space: &SpaceId) -> TripleStoreResult<()> {
            self.inner.create_space(space)
        }
        fn drop_space(&self, space: &SpaceId) -> TripleStoreResult<()> {
            self.inner.drop_space(space)
        }
        fn execute_update(&self, space: &SpaceId, update: &str) -> TripleStoreResult<()> {
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(TripleStoreError::Transport {
                    endpoint: "flaky".into(),
                    message: "connection refused".into(),
                });
            }
            self.inner.execute_update(space, update)
        }
        fn execute_query(&self, space: &SpaceId, query: &str) -> TripleStoreResult<Vec<Solution>> {
            self.inner.execute_query(space, query)
        }
        fn execute_ask(&self, space: &SpaceId, query: &str) -> TripleStoreResult<bool> {
            self.inner.execute_ask(space, query)
        }
        fn execute_construct(&self, space: &SpaceId, query: &str) -> TripleStoreResult<Vec<Quad>> {
            self.inner.execute_construct(space, query)
        }
    }

    fn setup(failures: usize, retries: u32) -> (DualWriteCoordinator, SpaceId) {
        let relational = Arc::new(RelationalStore::in_memory().unwrap());
        let triples = Arc::new(Flaky {
            inner: EmbeddedTripleStore::in_memory(),
            failures: AtomicUsize::new(failures),
        });
        let ns = SpaceId::new("ns").unwrap();
        relational.create_space(&ns).unwrap();
        triples.create_space(&ns).unwrap();
        (DualWriteCoordinator::new(relational, triples, retries), ns)
    }

    fn r1(value: &str) -> Quad {
        Quad::triple(
            Term::iri("http://ex.org/r1"),
            Term::iri("http://ex.org/p1"),
            Term::literal(value),
        )
        .unwrap()
    }

    #[test]
    fn synced_write_reaches_both_stores() {
        let (coord, ns) = setup(0, 0);
        let guard = coord.lock(UnitScope::unit(&ns, &Term::iri("http://ex.org/r1")));
        let report = coord
            .apply_diff(&guard, &ns, &QuadDiff::insert_only([r1("v1")]))
            .unwrap();
        assert_eq!(report.outcome, ApplyOutcome::Synced);
        assert_eq!(report.inserted, 1);
        assert_eq!(coord.relational().snapshot(&ns).unwrap().count().unwrap(), 1);
        assert_eq!(coord.triples().count_quads(&ns).unwrap(), 1);
    }

    #[test]
    fn mirror_failure_degrades_but_commits() {
        let (coord, ns) = setup(1, 0);
        let root = Term::iri("http://ex.org/r1");
        let guard = coord.lock(UnitScope::unit(&ns, &root));
        let report = coord
            .apply_diff(&guard, &ns, &QuadDiff::insert_only([r1("v1")]))
            .unwrap();
        assert!(report.outcome.is_degraded());
        assert_eq!(coord.relational().snapshot(&ns).unwrap().count().unwrap(), 1);
        assert_eq!(coord.triples().count_quads(&ns).unwrap(), 0);
        match coord.sync_state(&ns).unwrap() {
            SyncState::Degraded {
                pending: PendingResync::Units(roots),
                ..
            } => assert!(roots.contains("http://ex.org/r1")),
            other => panic!("expected degraded, got {other:?}"),
        }
    }

    #[test]
    fn intents_are_settled_either_way() {
        let (coord, ns) = setup(1, 0);
        let root = Term::iri("http://ex.org/r1");
        let guard = coord.lock(UnitScope::unit(&ns, &root));
        coord
            .apply_diff(&guard, &ns, &QuadDiff::insert_only([r1("v1")]))
            .unwrap();
        coord
            .apply_diff(&guard, &ns, &QuadDiff::insert_only([r1("v2")]))
            .unwrap();
        let record = coord.relational().space(&ns).unwrap();
        assert!(record.in_flight.is_empty());
        assert_eq!(record.next_write_id, 3);
        assert!(record.sync.is_degraded());
    }

    #[test]
    fn retries_absorb_transient_failures() {
        let (coord, ns) = setup(2, 2);
        let guard = coord.lock(UnitScope::Space(ns.clone()));
        let report = coord
            .apply_diff(&guard, &ns, &QuadDiff::insert_only([r1("v1")]))
            .unwrap();
        assert_eq!(report.outcome, ApplyOutcome::Synced);
        assert!(!coord.sync_state(&ns).unwrap().is_degraded());
    }

    #[test]
    fn guard_for_other_space_is_rejected() {
        let (coord, ns) = setup(0, 0);
        let other = SpaceId::new("other").unwrap();
        let guard = coord.lock(UnitScope::Space(other));
        let err = coord
            .apply_diff(&guard, &ns, &QuadDiff::insert_only([r1("v1")]))
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::SyncError::Write(WriteError::ScopeMismatch { .. })
        ));
    }

    #[test]
    fn relational_failure_rolls_back_and_skips_mirror() {
        let (coord, _ns) = setup(0, 0);
        let missing = SpaceId::new("missing").unwrap();
        let guard = coord.lock(UnitScope::Space(missing.clone()));
        let err = coord
            .apply_diff(&guard, &missing, &QuadDiff::insert_only([r1("v1")]))
            .unwrap_err();
        assert!(err.is_relational_transaction());
    }

    #[test]
    fn empty_diff_is_a_noop() {
        let (coord, ns) = setup(1, 0);
        let guard = coord.lock(UnitScope::Space(ns.clone()));
        let report = coord.apply_diff(&guard, &ns, &QuadDiff::default()).unwrap();
        assert_eq!(report, ApplyReport::noop());
        assert!(!coord.sync_state(&ns).unwrap().is_degraded());
    }
}
