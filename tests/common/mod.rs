//! Helpers shared by the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use kg_dualwrite::config::EngineConfig;
use kg_dualwrite::engine::SyncEngine;
use kg_dualwrite::error::TripleStoreError;
use kg_dualwrite::quad::Quad;
use kg_dualwrite::space::SpaceId;
use kg_dualwrite::store::RelationalStore;
use kg_dualwrite::term::Term;
use kg_dualwrite::triplestore::{EmbeddedTripleStore, Solution, TripleStore, TripleStoreResult};
use kg_dualwrite::unit::{FrameState, GraphObject, InnerState, UnitState};

/// An embedded triple store whose updates fail while it is switched off.
pub struct SwitchableStore {
    pub inner: EmbeddedTripleStore,
    pub down: AtomicBool,
}

impl SwitchableStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: EmbeddedTripleStore::in_memory(),
            down: AtomicBool::new(false),
        })
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    fn check(&self) -> TripleStoreResult<()> {
        if self.down.load(Ordering::SeqCst) {
            return Err(TripleStoreError::Transport {
                endpoint: "switchable".into(),
                message: "connection refused".into(),
            });
        }
        Ok(())
    }
}

impl TripleStore for SwitchableStore {
    fn create_space(&self, space: &SpaceId) -> TripleStoreResult<()> {
        self.check()?;
        self.inner.create_space(space)
    }

    fn drop_space(&self, space: &SpaceId) -> TripleStoreResult<()> {
        self.check()?;
        self.inner.drop_space(space)
    }

    fn execute_update(&self, space: &SpaceId, update: &str) -> TripleStoreResult<()> {
        self.check()?;
        self.inner.execute_update(space, update)
    }

    // Reads keep working so tests can inspect what the mirror missed.
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

pub fn engine_with(store: Arc<SwitchableStore>) -> SyncEngine {
    SyncEngine::with_stores(
        EngineConfig::default(),
        Arc::new(RelationalStore::in_memory().unwrap()),
        store,
    )
    .unwrap()
}

pub fn ns1() -> SpaceId {
    SpaceId::new("NS1").unwrap()
}

pub fn iri(s: &str) -> Term {
    Term::iri(format!("http://ex.org/{s}"))
}

/// An entity unit with one frame per entry in `frames`, each holding a
/// single slot whose `v` property is the given value.
pub fn entity(root: &str, frames: &[(&str, &str)]) -> UnitState {
    let mut state = UnitState::entity(
        GraphObject::new(iri(root)).with("http://ex.org/name", Term::literal(root)),
    );
    for (frame, value) in frames {
        state.frames.push(FrameState {
            inner: InnerState {
                frame: GraphObject::new(iri(frame))
                    .with("http://ex.org/label", Term::literal(*frame)),
                slots: vec![GraphObject::new(iri(&format!("{frame}/slot")))
                    .with("http://ex.org/v", Term::literal(*value))],
            },
            children: Vec::new(),
        });
    }
    state
}
