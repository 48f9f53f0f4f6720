//! Per-unit lock table.
//!
//! A scope is either a set of outer-unit roots in one space, or the whole
//! space. A unit scope may also claim node ids it is about to adopt, which
//! are locked like roots but never recorded as pending. All keys of a scope
//! are taken together or not at all, so two callers with overlapping scopes
//! can never hold one key each and wait on the other.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use crate::space::{PendingResync, SpaceId};
use crate::term::Term;

/// What a caller intends to mutate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitScope {
    /// Outer units identified by their roots, plus claimed member ids.
    Units {
        space: SpaceId,
        roots: BTreeSet<Term>,
        claims: BTreeSet<Term>,
    },
    /// Every unit of the space (full resync, space teardown).
    Space(SpaceId),
}

impl UnitScope {
    pub fn unit(space: &SpaceId, root: &Term) -> Self {
        Self::units(space, [root.clone()])
    }

    pub fn units(space: &SpaceId, roots: impl IntoIterator<Item = Term>) -> Self {
        UnitScope::Units {
            space: space.clone(),
            roots: roots.into_iter().collect(),
            claims: BTreeSet::new(),
        }
    }

    /// Also lock `ids`, node ids a write is about to give to these units.
    pub fn claiming(mut self, ids: impl IntoIterator<Item = Term>) -> Self {
        if let UnitScope::Units { roots, claims, .. } = &mut self {
            claims.extend(ids.into_iter().filter(|id| !roots.contains(id)));
        }
        self
    }

    pub fn space(&self) -> &SpaceId {
        match self {
            UnitScope::Units { space, .. } | UnitScope::Space(space) => space,
        }
    }

    /// Whether `root` is covered by this scope.
    pub fn covers(&self, root: &Term) -> bool {
        match self {
            UnitScope::Units { roots, claims, .. } => roots.contains(root) || claims.contains(root),
            UnitScope::Space(_) => true,
        }
    }

    /// The resync scope to record if a write under this scope goes unmirrored.
    /// Blank roots cannot be rediscovered by name, so they widen to the space.
    pub fn pending(&self) -> PendingResync {
        match self {
            UnitScope::Units { roots, .. } if roots.iter().all(Term::is_iri) => {
                PendingResync::Units(roots.iter().map(|r| r.lexical().to_string()).collect())
            }
            _ => PendingResync::Space,
        }
    }
}

#[derive(Default)]
struct Held {
    units: HashSet<(SpaceId, Term)>,
    units_per_space: HashMap<SpaceId, usize>,
    spaces: HashSet<SpaceId>,
}

impl Held {
    fn available(&self, scope: &UnitScope) -> bool {
        match scope {
            UnitScope::Units { space, roots, claims } => {
                !self.spaces.contains(space)
                    && roots
                        .iter()
                        .chain(claims)
                        .all(|key| !self.units.contains(&(space.clone(), key.clone())))
            }
            UnitScope::Space(space) => {
                !self.spaces.contains(space) && self.units_per_space.get(space).copied().unwrap_or(0) == 0
            }
        }
    }

    fn take(&mut self, scope: &UnitScope) {
        match scope {
            UnitScope::Units { space, roots, claims } => {
                for key in roots.iter().chain(claims) {
                    self.units.insert((space.clone(), key.clone()));
                }
                *self.units_per_space.entry(space.clone()).or_default() += roots.len() + claims.len();
            }
            UnitScope::Space(space) => {
                self.spaces.insert(space.clone());
            }
        }
    }

    fn release(&mut self, scope: &UnitScope) {
        match scope {
            UnitScope::Units { space, roots, claims } => {
                for key in roots.iter().chain(claims) {
                    self.units.remove(&(space.clone(), key.clone()));
                }
                if let Some(count) = self.units_per_space.get_mut(space) {
                    *count = count.saturating_sub(roots.len() + claims.len());
                    if *count == 0 {
                        self.units_per_space.remove(space);
                    }
                }
            }
            UnitScope::Space(space) => {
                self.spaces.remove(space);
            }
        }
    }
}

struct Shared {
    held: Mutex<Held>,
    released: Condvar,
}

impl Shared {
    // The held set stays consistent even if a holder panicked: guards
    // release in Drop, which also runs during unwinding.
    fn lock(&self) -> MutexGuard<'_, Held> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Table of currently locked unit scopes. Cheap to clone.
#[derive(Clone)]
pub struct UnitLockTable {
    shared: Arc<Shared>,
}

impl Default for UnitLockTable {
    fn default() -> Self {
        Self::new()
    }
}

impl UnitLockTable {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                held: Mutex::new(Held::default()),
                released: Condvar::new(),
            }),
        }
    }

    /// Block until every key of `scope` is free, then take them all.
    pub fn acquire(&self, scope: UnitScope) -> ScopeGuard {
        let mut held = self.shared.lock();
        while !held.available(&scope) {
            held = self
                .shared
                .released
                .wait(held)
                .unwrap_or_else(PoisonError::into_inner);
        }
        held.take(&scope);
        drop(held);
        tracing::trace!(?scope, "scope acquired");
        ScopeGuard {
            shared: Arc::clone(&self.shared),
            scope,
        }
    }

    /// Take `scope` only if it is free right now.
    pub fn try_acquire(&self, scope: UnitScope) -> Option<ScopeGuard> {
        let mut held = self.shared.lock();
        if !held.available(&scope) {
            return None;
        }
        held.take(&scope);
        Some(ScopeGuard {
            shared: Arc::clone(&self.shared),
            scope,
        })
    }
}

impl std::fmt::Debug for UnitLockTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let held = self.shared.lock();
        f.debug_struct("UnitLockTable")
            .field("units", &held.units.len())
            .field("spaces", &held.spaces.len())
            .finish()
    }
}

/// Proof that the holder owns a [`UnitScope`]. Released on drop.
pub struct ScopeGuard {
    shared: Arc<Shared>,
    scope: UnitScope,
}

impl ScopeGuard {
    pub fn scope(&self) -> &UnitScope {
        &self.scope
    }

    pub fn space(&self) -> &SpaceId {
        self.scope.space()
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        self.shared.lock().release(&self.scope);
        self.shared.released.notify_all();
        tracing::trace!(scope = ?self.scope, "scope released");
    }
}

impl std::fmt::Debug for ScopeGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopeGuard").field("scope", &self.scope).finish()
    }
}
