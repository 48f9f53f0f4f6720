//! Embedded triple store backed by oxigraph.
//!
//! One oxigraph [`Store`] per space, either in memory or on disk under
//! `<dir>/<space>/`. Requests go through the same SPARQL text the HTTP
//! store sends, so both backends see identical update statements.

use std::path::PathBuf;

use dashmap::DashMap;
use oxigraph::sparql::QueryResults;
use oxigraph::store::Store;

use crate::error::TripleStoreError;
use crate::quad::{GraphName, Quad};
use crate::space::SpaceId;

use super::results::{from_ox_quad, from_ox_term};
use super::{Solution, TripleStore, TripleStoreResult};

/// Oxigraph-backed [`TripleStore`].
pub struct EmbeddedTripleStore {
    /// `None` keeps every dataset in memory.
    dir: Option<PathBuf>,
    spaces: DashMap<SpaceId, Store>,
}

fn embedded(context: &str) -> impl FnOnce(oxigraph::store::StorageError) -> TripleStoreError + '_ {
    move |e| TripleStoreError::Embedded {
        message: format!("{context}: {e}"),
    }
}

impl EmbeddedTripleStore {
    /// Datasets live only in memory.
    pub fn in_memory() -> Self {
        Self {
            dir: None,
            spaces: DashMap::new(),
        }
    }

    /// Datasets persist under `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> TripleStoreResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| TripleStoreError::Embedded {
            message: format!("failed to create oxigraph directory {}: {e}", dir.display()),
        })?;
        Ok(Self {
            dir: Some(dir),
            spaces: DashMap::new(),
        })
    }

    fn open_store(&self, space: &SpaceId) -> TripleStoreResult<Store> {
        match &self.dir {
            None => Store::new().map_err(embedded("failed to create oxigraph store")),
            Some(dir) => {
                let path = dir.join(space.as_str());
                Store::open(&path).map_err(|e| TripleStoreError::Embedded {
                    message: format!("failed to open oxigraph store at {}: {e}", path.display()),
                })
            }
        }
    }

    /// The store for a space. On-disk datasets from a previous run are
    /// reopened lazily.
    fn store(&self, space: &SpaceId) -> TripleStoreResult<Store> {
        if let Some(store) = self.spaces.get(space) {
            return Ok(store.clone());
        }
        let on_disk = self
            .dir
            .as_ref()
            .is_some_and(|dir| dir.join(space.as_str()).is_dir());
        if !on_disk {
            return Err(TripleStoreError::UnknownSpace {
                space: space.to_string(),
            });
        }
        let store = self.open_store(space)?;
        Ok(self.spaces.entry(space.clone()).or_insert(store).clone())
    }

    fn query(&self, space: &SpaceId, query: &str) -> TripleStoreResult<QueryResults> {
        self.store(space)?
            .query(query)
            .map_err(|e| TripleStoreError::Rejected {
                status: 400,
                body: format!("SPARQL query failed: {e}"),
            })
    }
}

impl TripleStore for EmbeddedTripleStore {
    fn create_space(&self, space: &SpaceId) -> TripleStoreResult<()> {
        if self.spaces.contains_key(space) {
            return Ok(());
        }
        let store = self.open_store(space)?;
        self.spaces.entry(space.clone()).or_insert(store);
        tracing::debug!(space = %space, "created embedded dataset");
        Ok(())
    }

    fn drop_space(&self, space: &SpaceId) -> TripleStoreResult<()> {
        let removed = self.spaces.remove(space);
        drop(removed);
        if let Some(dir) = &self.dir {
            let path = dir.join(space.as_str());
            match std::fs::remove_dir_all(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(TripleStoreError::Embedded {
                        message: format!("failed to remove {}: {e}", path.display()),
                    });
                }
            }
        }
        Ok(())
    }

    fn execute_update(&self, space: &SpaceId, update: &str) -> TripleStoreResult<()> {
        self.store(space)?
            .update(update)
            .map_err(|e| TripleStoreError::Rejected {
                status: 400,
                body: format!("SPARQL update failed: {e}"),
            })
    }

    fn execute_query(&self, space: &SpaceId, query: &str) -> TripleStoreResult<Vec<Solution>> {
        match self.query(space, query)? {
            QueryResults::Solutions(solutions) => {
                let mut rows = Vec::new();
                for solution in solutions {
                    let solution = solution.map_err(|e| TripleStoreError::Embedded {
                        message: format!("solution error: {e}"),
                    })?;
                    let mut row = Solution::new();
                    for (var, term) in solution.iter() {
                        row.insert(var.as_str().to_string(), from_ox_term(term.clone())?);
                    }
                    rows.push(row);
                }
                Ok(rows)
            }
            _ => Err(TripleStoreError::Malformed {
                message: "expected solutions from SELECT query".into(),
            }),
        }
    }

    fn execute_ask(&self, space: &SpaceId, query: &str) -> TripleStoreResult<bool> {
        match self.query(space, query)? {
            QueryResults::Boolean(b) => Ok(b),
            _ => Err(TripleStoreError::Malformed {
                message: "expected boolean result from ASK query".into(),
            }),
        }
    }

    fn execute_construct(&self, space: &SpaceId, query: &str) -> TripleStoreResult<Vec<Quad>> {
        match self.query(space, query)? {
            QueryResults::Graph(triples) => {
                let mut quads = Vec::new();
                for triple in triples {
                    let triple = triple.map_err(|e| TripleStoreError::Embedded {
                        message: format!("construct error: {e}"),
                    })?;
                    let quad = oxigraph::model::Quad::new(
                        triple.subject,
                        triple.predicate,
                        triple.object,
                        oxigraph::model::GraphName::DefaultGraph,
                    );
                    quads.push(from_ox_quad(quad)?.in_graph(GraphName::Default));
                }
                Ok(quads)
            }
            _ => Err(TripleStoreError::Malformed {
                message: "expected a graph from CONSTRUCT query".into(),
            }),
        }
    }

    fn count_quads(&self, space: &SpaceId) -> TripleStoreResult<u64> {
        let store = self.store(space)?;
        let len = store.len().map_err(embedded("count failed"))?;
        Ok(len as u64)
    }
}

impl std::fmt::Debug for EmbeddedTripleStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddedTripleStore")
            .field("dir", &self.dir)
            .field("spaces", &self.spaces.len())
            .finish()
    }
}
