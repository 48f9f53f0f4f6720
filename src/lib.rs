// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # kg-dualwrite
//!
//! Keeps a relational quad store and an RDF triple store consistent for
//! structured knowledge graphs.
//!
//! The relational store (redb) is authoritative. Every write is committed
//! there first and then mirrored into the triple store (embedded oxigraph
//! or a remote SPARQL endpoint). A failed mirror never rolls the commit
//! back; the space is marked degraded and a resync brings the triple store
//! back in line.
//!
//! ## Architecture
//!
//! - **Terms and quads** (`term`, `quad`): RDF values and their validation
//! - **Relational store** (`store`): interned terms, per-space quad indexes
//! - **Triple store** (`triplestore`): SPARQL over embedded or HTTP backends
//! - **Units** (`unit`): discovering and rendering outer/inner units
//! - **Updates** (`update`): parsing and resolving SPARQL-style statements
//! - **Coordinator** (`coordinator`): the dual-write path and unit locks
//! - **Consistency** (`consistency`): validation, resync, background worker
//! - **Engine** (`engine`): the facade tying it all together
//!
//! ## Library usage
//!
//! ```no_run
//! use kg_dualwrite::config::EngineConfig;
//! use kg_dualwrite::engine::SyncEngine;
//! use kg_dualwrite::space::SpaceId;
//!
//! let engine = SyncEngine::new(EngineConfig::default()).unwrap();
//! let ns = SpaceId::new("NS1").unwrap();
//! engine.create_space(&ns).unwrap();
//! engine
//!     .execute_update(&ns, r#"INSERT DATA { <http://ex.org/R1> <http://ex.org/P1> "v1" }"#)
//!     .unwrap();
//! ```

pub mod config;
pub mod consistency;
pub mod coordinator;
pub mod diff;
pub mod engine;
pub mod error;
pub mod quad;
pub mod space;
pub mod store;
pub mod term;
pub mod triplestore;
pub mod unit;
pub mod update;

pub use config::EngineConfig;
pub use engine::{MutationRequest, Operation, SyncEngine};
pub use error::{SyncError, SyncResult};
pub use quad::{GraphName, Quad};
pub use space::SpaceId;
pub use term::Term;
