//! Consistency validation and resynchronization.
//!
//! The relational store is authoritative: validation measures how far the
//! triple store has drifted from it, resync rebuilds the triple store from
//! it. Validation is read-only and takes no locks, so a concurrent write
//! may show up as a transient difference.

pub mod worker;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crate::coordinator::{DualWriteCoordinator, UnitScope};
use crate::error::{ConsistencyError, SyncResult};
use crate::quad::{Quad, QuadSet};
use crate::space::{PendingResync, SpaceId, SyncState};
use crate::term::Term;
use crate::triplestore::TripleStoreView;
use crate::unit::UnitSchema;
use crate::unit::discovery::UnitDiscovery;

pub use worker::ResyncWorker;

/// Quads listed per side in full validation reports.
pub const SAMPLE_LIMIT: usize = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationMode {
    /// Total and per-graph counts only.
    #[default]
    Counts,
    /// Counts plus a full quad-set comparison.
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct GraphCounts {
    pub relational: u64,
    pub triplestore: u64,
}

/// Result of [`Resynchronizer::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsistencyReport {
    pub space: SpaceId,
    pub mode: ValidationMode,
    pub consistent: bool,
    pub relational_count: u64,
    pub triplestore_count: u64,
    /// Keyed by graph label (`default` or the graph IRI).
    pub per_graph: BTreeMap<String, GraphCounts>,
    /// Full mode only: number of relational quads absent from the triple store.
    pub missing_total: usize,
    /// Full mode only: number of triple-store quads absent from the relational store.
    pub unexpected_total: usize,
    /// Up to [`SAMPLE_LIMIT`] missing quads.
    pub missing_in_triplestore: Vec<Quad>,
    /// Up to [`SAMPLE_LIMIT`] unexpected quads.
    pub unexpected_in_triplestore: Vec<Quad>,
    /// Persisted sync state at validation time.
    pub sync: SyncState,
}

/// Result of [`Resynchronizer::validate_unit`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitConsistency {
    pub root: Term,
    pub consistent: bool,
    pub relational_count: usize,
    pub triplestore_count: usize,
    pub missing_in_triplestore: Vec<Quad>,
    pub unexpected_in_triplestore: Vec<Quad>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum ResyncScope {
    Space,
    Unit { root: Term },
}

/// Result of a resync pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResyncReport {
    pub space: SpaceId,
    #[serde(flatten)]
    pub scope: ResyncScope,
    /// Quads removed from the triple store (unit scope only; a full resync
    /// clears the dataset wholesale).
    pub removed: usize,
    /// Quads written to the triple store.
    pub written: usize,
    /// Sync state after the pass.
    pub sync: SyncState,
}

/// Convert a divergent report into [`ConsistencyError::Divergence`].
pub fn ensure_consistent(report: &ConsistencyReport) -> SyncResult<()> {
    if report.consistent {
        return Ok(());
    }
    Err(ConsistencyError::Divergence {
        space: report.space.to_string(),
        relational: report.relational_count,
        triplestore: report.triplestore_count,
    }
    .into())
}

/// Validates and repairs the triple store against the relational store.
#[derive(Debug)]
pub struct Resynchronizer {
    coordinator: Arc<DualWriteCoordinator>,
    schema: UnitSchema,
    max_depth: usize,
    insert_chunk: usize,
}

impl Resynchronizer {
    pub fn new(
        coordinator: Arc<DualWriteCoordinator>,
        schema: UnitSchema,
        max_depth: usize,
        insert_chunk: usize,
    ) -> Self {
        Self {
            coordinator,
            schema,
            max_depth,
            insert_chunk,
        }
    }

    pub fn coordinator(&self) -> &Arc<DualWriteCoordinator> {
        &self.coordinator
    }

    /// Compare both stores for one space.
    pub fn validate(&self, space: &SpaceId, mode: ValidationMode) -> SyncResult<ConsistencyReport> {
        let relational = self.coordinator.relational();
        let triples = self.coordinator.triples();

        let snapshot = relational.snapshot(space)?;
        let sync = relational.space(space)?.sync;
        let relational_count = snapshot.count()?;
        let triplestore_count = triples.count_quads(space)?;

        let mut per_graph: BTreeMap<String, GraphCounts> = BTreeMap::new();
        for (graph, n) in snapshot.graph_breakdown()? {
            per_graph.entry(graph.label()).or_default().relational = n;
        }
        for (graph, n) in triples.graph_breakdown(space)? {
            per_graph.entry(graph.label()).or_default().triplestore = n;
        }
        let mut consistent = relational_count == triplestore_count
            && per_graph.values().all(|c| c.relational == c.triplestore);

        let mut report = ConsistencyReport {
            space: space.clone(),
            mode,
            consistent,
            relational_count,
            triplestore_count,
            per_graph,
            missing_total: 0,
            unexpected_total: 0,
            missing_in_triplestore: Vec::new(),
            unexpected_in_triplestore: Vec::new(),
            sync,
        };

        if mode == ValidationMode::Full {
            let ours: QuadSet = snapshot.all_quads()?.into_iter().collect();
            let theirs: QuadSet = triples.all_quads(space)?.into_iter().collect();
            let missing: Vec<&Quad> = ours.difference(&theirs).collect();
            let unexpected: Vec<&Quad> = theirs.difference(&ours).collect();
            consistent &= missing.is_empty() && unexpected.is_empty();
            report.missing_total = missing.len();
            report.unexpected_total = unexpected.len();
            report.missing_in_triplestore = missing.into_iter().take(SAMPLE_LIMIT).cloned().collect();
            report.unexpected_in_triplestore = unexpected.into_iter().take(SAMPLE_LIMIT).cloned().collect();
            report.consistent = consistent;
        }

        tracing::info!(
            space = %space,
            consistent = report.consistent,
            relational = relational_count,
            triplestore = triplestore_count,
            "validated"
        );
        Ok(report)
    }

    /// Compare one outer unit as discovered in each store.
    pub fn validate_unit(&self, space: &SpaceId, root: &Term) -> SyncResult<UnitConsistency> {
        let discovery = UnitDiscovery::new(&self.schema, self.max_depth);
        let snapshot = self.coordinator.relational().snapshot(space)?;
        let ours = discovery.discover_outer(&snapshot, root)?.quads;
        let view = TripleStoreView::new(self.coordinator.triples().as_ref(), space);
        let theirs = discovery.discover_outer(&view, root)?.quads;

        let missing: Vec<Quad> = ours.difference(&theirs).cloned().collect();
        let unexpected: Vec<Quad> = theirs.difference(&ours).cloned().collect();
        Ok(UnitConsistency {
            root: root.clone(),
            consistent: missing.is_empty() && unexpected.is_empty(),
            relational_count: ours.len(),
            triplestore_count: theirs.len(),
            missing_in_triplestore: missing,
            unexpected_in_triplestore: unexpected,
        })
    }

    /// Rebuild the triple store from the relational store, for the whole
    /// space or one outer unit. Idempotent. On failure the space is left
    /// (or marked) degraded and the error returned.
    pub fn resync(&self, space: &SpaceId, root: Option<&Term>) -> SyncResult<ResyncReport> {
        let result = match root {
            None => self.resync_space(space),
            Some(root) => self.resync_unit(space, root),
        };
        if let Err(e) = &result {
            tracing::warn!(space = %space, error = %e, "resync failed");
            let pending = match root {
                Some(root) => UnitScope::unit(space, root).pending(),
                None => PendingResync::Space,
            };
            // The space may not exist at all; nothing to record then.
            let _ = self
                .coordinator
                .relational()
                .update_sync_state(space, |sync| sync.degrade(pending, crate::space::unix_now()));
        }
        result
    }

    fn resync_space(&self, space: &SpaceId) -> SyncResult<ResyncReport> {
        let _guard = self.coordinator.lock(UnitScope::Space(space.clone()));
        let triples = self.coordinator.triples();
        let quads = self.coordinator.relational().snapshot(space)?.all_quads()?;

        triples.create_space(space)?;
        triples.clear_space(space)?;
        triples.insert_quads(space, &quads, self.insert_chunk)?;

        let sync = self
            .coordinator
            .relational()
            .update_sync_state(space, |sync| *sync = SyncState::InSync)?;
        tracing::info!(space = %space, written = quads.len(), "space resynced");
        Ok(ResyncReport {
            space: space.clone(),
            scope: ResyncScope::Space,
            removed: 0,
            written: quads.len(),
            sync,
        })
    }

    /// Resync the outer unit owning `root`. Pending scopes may name a
    /// member id a write claimed, which resolves to its owner here.
    fn resync_unit(&self, space: &SpaceId, root: &Term) -> SyncResult<ResyncReport> {
        let discovery = UnitDiscovery::new(&self.schema, self.max_depth);
        let relational = self.coordinator.relational();
        let owner = discovery.owning_root(&relational.snapshot(space)?, root)?;
        let _guard = self
            .coordinator
            .lock(UnitScope::units(space, [root.clone(), owner.clone()]));
        let snapshot = relational.snapshot(space)?;
        let requested = root;
        let root = &owner;
        let ours = discovery.discover_outer(&snapshot, root)?.quads;
        let triples = self.coordinator.triples();
        let view = TripleStoreView::new(triples.as_ref(), space);
        let theirs = discovery.discover_outer(&view, root)?.quads;

        let delete: Vec<Quad> = theirs.difference(&ours).cloned().collect();
        let insert: Vec<Quad> = ours.difference(&theirs).cloned().collect();
        triples.apply_diff(space, &delete, &insert)?;

        let keys = [requested.lexical().to_string(), root.lexical().to_string()];
        let sync = self
            .coordinator
            .relational()
            .update_sync_state(space, |sync| {
                for key in &keys {
                    sync.unit_resynced(key);
                }
            })?;
        tracing::info!(
            space = %space,
            root = %root,
            removed = delete.len(),
            written = insert.len(),
            "unit resynced"
        );
        Ok(ResyncReport {
            space: space.clone(),
            scope: ResyncScope::Unit { root: root.clone() },
            removed: delete.len(),
            written: insert.len(),
            sync,
        })
    }

    /// Resync whatever the space's persisted state says is stale.
    /// Returns the reports of the passes run (none if in sync).
    pub fn resync_pending(&self, space: &SpaceId) -> SyncResult<Vec<ResyncReport>> {
        match self.coordinator.sync_state(space)? {
            SyncState::InSync => Ok(Vec::new()),
            SyncState::Degraded {
                pending: PendingResync::Space,
                ..
            } => Ok(vec![self.resync(space, None)?]),
            SyncState::Degraded {
                pending: PendingResync::Units(roots),
                ..
            } => {
                // Every pending unit gets its attempt; the first failure is
                // reported once all have run.
                let mut reports = Vec::with_capacity(roots.len());
                let mut first_error = None;
                for root in roots {
                    match self.resync(space, Some(&Term::iri(root))) {
                        Ok(report) => reports.push(report),
                        Err(e) => {
                            first_error.get_or_insert(e);
                        }
                    }
                }
                match first_error {
                    Some(e) => Err(e),
                    None => Ok(reports),
                }
            }
        }
    }

    /// Resync every degraded space. Failures are logged and skipped.
    pub fn sweep(&self) -> SyncResult<usize> {
        let mut repaired = 0;
        for record in self.coordinator.relational().list_spaces()? {
            if !record.sync.is_degraded() {
                continue;
            }
            match self.resync_pending(&record.name) {
                Ok(_) => repaired += 1,
                Err(e) => tracing::warn!(space = %record.name, error = %e, "sweep resync failed"),
            }
        }
        Ok(repaired)
    }
}
