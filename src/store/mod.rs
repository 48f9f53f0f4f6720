//! Relational storage: the authoritative copy of every space.
//!
//! - [`RelationalStore`] owns the redb database and the space catalog
//! - [`RelationalTx`] is a write transaction scoped to one space
//! - [`RelationalSnapshot`] is a consistent read view of one space
//!
//! Terms are interned per space; quads are stored as id tuples under four
//! index orderings ([`index`]).

pub mod index;
pub mod pattern;
pub mod relational;
pub mod snapshot;

pub use relational::{RelationalStore, RelationalTx};
pub use snapshot::RelationalSnapshot;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::RelationalError;

/// Result type for relational store operations.
pub type RelationalResult<T> = std::result::Result<T, RelationalError>;

/// Graph restriction for term-level quad queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GraphScope<'a> {
    #[default]
    Any,
    Default,
    AnyNamed,
    Named(&'a str),
}

/// Map a redb error into [`RelationalError::Backend`] tagged with the operation.
pub(crate) fn backend<E: std::fmt::Display>(
    operation: &'static str,
) -> impl FnOnce(E) -> RelationalError {
    move |e| RelationalError::Backend {
        operation,
        message: e.to_string(),
    }
}

pub(crate) fn encode<T: Serialize>(value: &T) -> RelationalResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| RelationalError::Serialization {
        message: format!("encode failed: {e}"),
    })
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> RelationalResult<T> {
    bincode::deserialize(bytes).map_err(|e| RelationalError::Serialization {
        message: format!("decode failed: {e}"),
    })
}
