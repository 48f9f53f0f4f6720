//! The engine facade: owns both stores and every subsystem.
//!
//! All public operations go through [`SyncEngine`]. Structured mutations
//! ([`MutationRequest`]) are discovered, ownership-checked, rendered and
//! applied as a full unit replace or delete; declarative statements are
//! parsed, resolved and applied as a concrete diff. Both paths end in
//! [`DualWriteCoordinator::apply_diff`].

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{EngineConfig, TripleStoreConfig};
use crate::consistency::{
    ConsistencyReport, ResyncReport, ResyncWorker, Resynchronizer, UnitConsistency, ValidationMode,
};
use crate::coordinator::{ApplyReport, DualWriteCoordinator, UnitScope};
use crate::diff::{QuadDiff, build_replace_diff};
use crate::error::{DiscoveryError, SyncError, SyncResult};
use crate::space::{SpaceId, SpaceRecord, SyncState};
use crate::store::{RelationalSnapshot, RelationalStore};
use crate::term::Term;
use crate::triplestore::{EmbeddedTripleStore, HttpTripleStore, TripleStore, TripleStoreView};
use crate::unit::discovery::{DiscoveryReport, UnitDiscovery};
use crate::unit::render::{render_inner, render_unit};
use crate::unit::{InnerState, UnitKind, UnitSchema, UnitState};
use crate::update::{UpdateKind, parse_update, resolve};

/// What to do with a unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    /// Replace the whole outer unit (upsert when it does not exist).
    Replace(UnitState),
    /// Delete the whole outer unit.
    Delete,
    /// Replace one inner unit (a frame and its slots).
    ReplaceInner { inner: Term, state: InnerState },
    /// Delete one inner unit with its descendant frames.
    DeleteInner { inner: Term },
}

/// A structured mutation of one outer unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationRequest {
    pub space: SpaceId,
    pub root: Term,
    pub kind: UnitKind,
    pub operation: Operation,
}

/// Result of [`SyncEngine::execute_update`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateReport {
    pub kind: UpdateKind,
    /// Where-pattern solutions (1 for data statements).
    pub solutions: usize,
    #[serde(flatten)]
    pub apply: ApplyReport,
}

/// Summary of one space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpaceStatus {
    pub name: SpaceId,
    pub created_at: u64,
    pub sync: SyncState,
    pub quads: u64,
    pub terms: u64,
}

pub struct SyncEngine {
    config: EngineConfig,
    coordinator: Arc<DualWriteCoordinator>,
    resync: Arc<Resynchronizer>,
    worker: Mutex<Option<ResyncWorker>>,
}

impl SyncEngine {
    /// Open the stores named by `config`.
    pub fn new(config: EngineConfig) -> SyncResult<Self> {
        config.validate()?;
        let relational = match &config.data_dir {
            Some(dir) => RelationalStore::open(dir)?,
            None => RelationalStore::in_memory()?,
        };
        let triples: Arc<dyn TripleStore> = match &config.triple_store {
            TripleStoreConfig::Embedded { .. } => match config.embedded_dir() {
                Some(dir) => Arc::new(EmbeddedTripleStore::open(dir)?),
                None => Arc::new(EmbeddedTripleStore::in_memory()),
            },
            TripleStoreConfig::Http(http) => Arc::new(HttpTripleStore::new(http.clone())),
        };
        Self::with_stores(config, Arc::new(relational), triples)
    }

    /// Build an engine around existing stores.
    pub fn with_stores(
        config: EngineConfig,
        relational: Arc<RelationalStore>,
        triples: Arc<dyn TripleStore>,
    ) -> SyncResult<Self> {
        config.validate()?;
        let coordinator = Arc::new(DualWriteCoordinator::new(
            relational,
            triples,
            config.write.mirror_retries,
        ));
        let resync = Arc::new(Resynchronizer::new(
            Arc::clone(&coordinator),
            config.schema.clone(),
            config.discovery.max_depth,
            config.resync.insert_chunk,
        ));
        let engine = Self {
            config,
            coordinator,
            resync,
            worker: Mutex::new(None),
        };
        if engine.config.resync.worker {
            engine.start_worker()?;
        }
        tracing::info!(
            persistent = engine.config.data_dir.is_some(),
            mirror_retries = engine.config.write.mirror_retries,
            "sync engine ready"
        );
        Ok(engine)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn schema(&self) -> &UnitSchema {
        &self.config.schema
    }

    pub fn coordinator(&self) -> &Arc<DualWriteCoordinator> {
        &self.coordinator
    }

    fn discovery(&self) -> UnitDiscovery<'_> {
        UnitDiscovery::new(&self.config.schema, self.config.discovery.max_depth)
    }

    // -- spaces ---------------------------------------------------------------

    /// Create a space in both stores. If the triple store cannot provision
    /// its dataset the relational space is dropped again.
    pub fn create_space(&self, space: &SpaceId) -> SyncResult<SpaceRecord> {
        let relational = self.coordinator.relational();
        let record = relational.create_space(space)?;
        if let Err(e) = self.coordinator.triples().create_space(space) {
            tracing::warn!(space = %space, error = %e, "triple store dataset not created, undoing");
            relational.drop_space(space)?;
            return Err(e.into());
        }
        tracing::info!(space = %space, "space created");
        Ok(record)
    }

    /// Drop a space from both stores. Returns `false` if it did not exist.
    pub fn drop_space(&self, space: &SpaceId) -> SyncResult<bool> {
        let _guard = self.coordinator.lock(UnitScope::Space(space.clone()));
        self.coordinator.triples().drop_space(space)?;
        let existed = self.coordinator.relational().drop_space(space)?;
        tracing::info!(space = %space, existed, "space dropped");
        Ok(existed)
    }

    pub fn list_spaces(&self) -> SyncResult<Vec<SpaceRecord>> {
        Ok(self.coordinator.relational().list_spaces()?)
    }

    pub fn space_status(&self, space: &SpaceId) -> SyncResult<SpaceStatus> {
        let relational = self.coordinator.relational();
        let record = relational.space(space)?;
        let snapshot = relational.snapshot(space)?;
        Ok(SpaceStatus {
            name: record.name,
            created_at: record.created_at,
            sync: record.sync,
            quads: snapshot.count()?,
            terms: snapshot.term_count()?,
        })
    }

    // -- structured mutations ---------------------------------------------------

    /// Apply a structured mutation under the unit's lock.
    ///
    /// Ownership and structure problems are rejected before anything is
    /// written.
    pub fn submit(&self, request: &MutationRequest) -> SyncResult<ApplyReport> {
        let MutationRequest {
            space,
            root,
            kind,
            operation,
        } = request;
        if !root.is_iri() {
            return Err(invalid(root, "unit roots must be IRIs"));
        }

        let span = tracing::info_span!("submit", space = %space, root = %root);
        let _enter = span.enter();

        // Node ids the request claims are locked with the root, so two
        // writers cannot both adopt the same new id.
        let claimed: Vec<Term> = match operation {
            Operation::Replace(state) => state.ids().into_iter().cloned().collect(),
            Operation::ReplaceInner { state, .. } => {
                state.slots.iter().map(|slot| slot.id.clone()).collect()
            }
            Operation::Delete | Operation::DeleteInner { .. } => Vec::new(),
        };
        let guard = self.coordinator.lock(UnitScope::unit(space, root).claiming(claimed));
        let diff = {
            let discovery = self.discovery();
            let snapshot = self.coordinator.relational().snapshot(space)?;

            let owner = discovery.owning_root(&snapshot, root)?;
            if owner != *root {
                return Err(DiscoveryError::Ownership {
                    root: root.lexical().to_string(),
                    unit: root.lexical().to_string(),
                    owner: Some(owner.lexical().to_string()),
                }
                .into());
            }

            match operation {
                Operation::Replace(state) => {
                    if state.root.id != *root || state.kind != *kind {
                        return Err(invalid(root, "state root and kind must match the request"));
                    }
                    state.validate()?;
                    let current = discovery.discover_outer(&snapshot, root)?.require_well_formed()?;
                    discovery.check_foreign_ids(&snapshot, root, state.ids())?;
                    let rendered = render_unit(&self.config.schema, state)?;
                    build_replace_diff(current.quads, rendered)
                }
                Operation::Delete => {
                    let current = discovery.discover_outer(&snapshot, root)?.require_well_formed()?;
                    if current.is_empty() {
                        return Err(DiscoveryError::UnitNotFound {
                            unit: root.lexical().to_string(),
                        }
                        .into());
                    }
                    QuadDiff::delete_only(current.quads)
                }
                Operation::ReplaceInner { inner, state } => {
                    state.validate(inner)?;
                    if inner == root && *kind == UnitKind::Entity {
                        return Err(invalid(inner, "an entity root is not an inner unit"));
                    }
                    let outer = discovery
                        .check_ownership(&snapshot, root, inner)?
                        .require_well_formed()?;
                    let slot_ids = || state.slots.iter().map(|s| &s.id);
                    discovery.check_foreign_ids(&snapshot, root, slot_ids())?;
                    discovery.check_slot_ids(&snapshot, &outer, inner, slot_ids())?;
                    let current = discovery.discover_inner(&snapshot, inner)?;
                    let rendered = render_inner(&self.config.schema, root, state)?;
                    build_replace_diff(current.quads, rendered)
                }
                Operation::DeleteInner { inner } => {
                    if inner == root {
                        return Err(invalid(inner, "delete the root through the outer unit"));
                    }
                    let current = discovery
                        .check_ownership(&snapshot, root, inner)?
                        .require_well_formed()?;
                    QuadDiff::delete_only(current.frame_subtree_quads(inner))
                }
            }
        };
        self.coordinator.apply_diff(&guard, space, &diff)
    }

    // -- declarative updates ----------------------------------------------------

    /// Parse, resolve and apply an update statement.
    ///
    /// The where-pattern is resolved against the triple store, or against
    /// the relational store while the space is degraded (or the triple
    /// store cannot answer). Every outer unit the resulting diff touches is
    /// locked for the write.
    pub fn execute_update(&self, space: &SpaceId, statement: &str) -> SyncResult<UpdateReport> {
        let operation = parse_update(statement)?;
        let relational = self.coordinator.relational();
        let snapshot = relational.snapshot(space)?;

        let resolved = if relational.space(space)?.sync.is_degraded() {
            resolve(&operation, &snapshot)?
        } else {
            let view = TripleStoreView::new(self.coordinator.triples().as_ref(), space);
            match resolve(&operation, &view) {
                Ok(resolved) => resolved,
                Err(SyncError::TripleStore(e)) => {
                    tracing::warn!(space = %space, error = %e, "resolving against relational store");
                    resolve(&operation, &snapshot)?
                }
                Err(e) => return Err(e),
            }
        };
        let kind = resolved.kind;
        let solutions = resolved.solutions;
        let diff = QuadDiff::from(resolved);

        let roots = self.touched_roots(&snapshot, &diff)?;
        drop(snapshot);
        let guard = self.coordinator.lock(UnitScope::units(space, roots));
        let apply = self.coordinator.apply_diff(&guard, space, &diff)?;
        Ok(UpdateReport {
            kind,
            solutions,
            apply,
        })
    }

    /// Outer roots owning every subject in `diff`, plus the targets of
    /// outer markers being inserted.
    fn touched_roots(
        &self,
        snapshot: &RelationalSnapshot,
        diff: &QuadDiff,
    ) -> SyncResult<BTreeSet<Term>> {
        let discovery = self.discovery();
        let marker = self.config.schema.outer_marker();
        let mut roots = BTreeSet::new();
        for subject in diff.affected_subjects() {
            roots.insert(discovery.owning_root(snapshot, subject)?);
        }
        for quad in diff.insert.iter().filter(|q| q.predicate == marker) {
            roots.insert(quad.object.clone());
        }
        Ok(roots)
    }

    // -- discovery and consistency ------------------------------------------------

    /// Discover an outer unit in the relational store.
    pub fn discover_unit(&self, space: &SpaceId, root: &Term) -> SyncResult<DiscoveryReport> {
        let snapshot = self.coordinator.relational().snapshot(space)?;
        self.discovery().discover_outer(&snapshot, root)
    }

    pub fn validate(&self, space: &SpaceId, mode: ValidationMode) -> SyncResult<ConsistencyReport> {
        self.resync.validate(space, mode)
    }

    pub fn validate_unit(&self, space: &SpaceId, root: &Term) -> SyncResult<UnitConsistency> {
        self.resync.validate_unit(space, root)
    }

    /// Rebuild the triple store for a space (`root = None`) or one unit.
    pub fn resync(&self, space: &SpaceId, root: Option<&Term>) -> SyncResult<ResyncReport> {
        self.resync.resync(space, root)
    }

    /// Resync whatever the space's sync state lists as pending.
    pub fn resync_pending(&self, space: &SpaceId) -> SyncResult<Vec<ResyncReport>> {
        self.resync.resync_pending(space)
    }

    pub fn sync_state(&self, space: &SpaceId) -> SyncResult<SyncState> {
        self.coordinator.sync_state(space)
    }

    // -- background worker --------------------------------------------------------

    /// Start the background resync worker. No-op if already running.
    pub fn start_worker(&self) -> SyncResult<()> {
        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if worker.is_none() {
            let interval = Duration::from_secs(self.config.resync.sweep_interval_secs);
            *worker = Some(ResyncWorker::spawn(Arc::clone(&self.resync), interval)?);
        }
        Ok(())
    }

    pub fn stop_worker(&self) {
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(worker);
    }
}

fn invalid(unit: &Term, message: &str) -> SyncError {
    DiscoveryError::InvalidStructure {
        unit: unit.lexical().to_string(),
        message: message.to_string(),
    }
    .into()
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("coordinator", &self.coordinator)
            .field("data_dir", &self.config.data_dir)
            .finish()
    }
}
