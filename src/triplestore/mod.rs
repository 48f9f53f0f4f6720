//! Triple-store adapter: the derived, query-optimized copy of every space.
//!
//! Implementations provide the four protocol primitives (update, select,
//! ask, construct) plus dataset lifecycle. Everything else the engine
//! needs (diff mirroring, counts, bulk load, quad lookup) is built on
//! those primitives as provided methods.

pub mod auth;
pub mod embedded;
pub mod http;
pub mod results;
pub mod sparql;

pub use auth::Credentials;
pub use embedded::EmbeddedTripleStore;
pub use http::{HttpTripleStore, HttpTripleStoreConfig};

use std::collections::BTreeMap;

use crate::error::{SyncResult, TripleStoreError};
use crate::quad::{GraphName, Quad};
use crate::space::SpaceId;
use crate::term::Term;
use crate::unit::discovery::QuadSource;

/// One row of a SELECT result: variable name → bound term.
pub type Solution = BTreeMap<String, Term>;

/// Result type for triple-store operations.
pub type TripleStoreResult<T> = std::result::Result<T, TripleStoreError>;

/// Default number of quads per `INSERT DATA` request during bulk loads.
pub const DEFAULT_INSERT_CHUNK: usize = 5_000;

/// A SPARQL 1.1 triple store holding one dataset per space.
pub trait TripleStore: Send + Sync {
    /// Provision the dataset for a space. Idempotent.
    fn create_space(&self, space: &SpaceId) -> TripleStoreResult<()>;

    /// Remove the dataset for a space. Idempotent.
    fn drop_space(&self, space: &SpaceId) -> TripleStoreResult<()>;

    /// Run a SPARQL update.
    fn execute_update(&self, space: &SpaceId, update: &str) -> TripleStoreResult<()>;

    /// Run a SELECT query.
    fn execute_query(&self, space: &SpaceId, query: &str) -> TripleStoreResult<Vec<Solution>>;

    /// Run an ASK query.
    fn execute_ask(&self, space: &SpaceId, query: &str) -> TripleStoreResult<bool>;

    /// Run a CONSTRUCT query; results land in the default graph.
    fn execute_construct(&self, space: &SpaceId, query: &str) -> TripleStoreResult<Vec<Quad>>;

    /// Mirror a concrete diff as one `DELETE DATA ; INSERT DATA` request.
    fn apply_diff(&self, space: &SpaceId, delete: &[Quad], insert: &[Quad]) -> TripleStoreResult<()> {
        match sparql::diff_update(delete, insert) {
            Some(update) => self.execute_update(space, &update),
            None => Ok(()),
        }
    }

    /// Total quads across the default graph and all named graphs.
    fn count_quads(&self, space: &SpaceId) -> TripleStoreResult<u64> {
        let rows = self.execute_query(space, sparql::COUNT_QUADS)?;
        match rows.first() {
            Some(row) => results::count_of(row, "n"),
            None => Ok(0),
        }
    }

    /// Quad counts per graph.
    fn graph_breakdown(&self, space: &SpaceId) -> TripleStoreResult<BTreeMap<GraphName, u64>> {
        let mut breakdown = BTreeMap::new();
        for row in self.execute_query(space, sparql::GRAPH_BREAKDOWN)? {
            let count = results::count_of(&row, "n")?;
            let graph = match row.get("g") {
                None => GraphName::Default,
                Some(g) => GraphName::try_from(g.clone()).map_err(|e| TripleStoreError::Malformed {
                    message: e.to_string(),
                })?,
            };
            if count > 0 {
                *breakdown.entry(graph).or_default() += count;
            }
        }
        Ok(breakdown)
    }

    /// Quads matching a pattern in any graph. `None` positions are wildcards.
    fn quads_matching(
        &self,
        space: &SpaceId,
        subject: Option<&Term>,
        predicate: Option<&Term>,
        object: Option<&Term>,
    ) -> TripleStoreResult<Vec<Quad>> {
        let query = sparql::select_quads(subject, predicate, object);
        let rows = self.execute_query(space, &query)?;
        results::solutions_to_quads(rows, [subject, predicate, object])
    }

    /// Every quad in the dataset.
    fn all_quads(&self, space: &SpaceId) -> TripleStoreResult<Vec<Quad>> {
        self.quads_matching(space, None, None, None)
    }

    /// Remove every quad from the dataset, keeping the dataset itself.
    fn clear_space(&self, space: &SpaceId) -> TripleStoreResult<()> {
        self.execute_update(space, sparql::DROP_ALL)
    }

    /// Bulk load in `INSERT DATA` requests of at most `chunk` quads.
    fn insert_quads(&self, space: &SpaceId, quads: &[Quad], chunk: usize) -> TripleStoreResult<()> {
        for batch in quads.chunks(chunk.max(1)) {
            self.execute_update(space, &sparql::insert_data(batch))?;
        }
        Ok(())
    }
}

/// A triple store bound to one space, usable wherever a per-space source
/// of quads is needed.
#[derive(Clone, Copy)]
pub struct TripleStoreView<'a> {
    pub store: &'a dyn TripleStore,
    pub space: &'a SpaceId,
}

impl<'a> TripleStoreView<'a> {
    pub fn new(store: &'a dyn TripleStore, space: &'a SpaceId) -> Self {
        Self { store, space }
    }
}

impl QuadSource for TripleStoreView<'_> {
    fn quads_matching(
        &self,
        subject: Option<&Term>,
        predicate: Option<&Term>,
        object: Option<&Term>,
    ) -> SyncResult<Vec<Quad>> {
        Ok(self
            .store
            .quads_matching(self.space, subject, predicate, object)?)
    }
}
