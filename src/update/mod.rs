//! Declarative update statements.
//!
//! [`parser`] reads the supported SPARQL update subset, [`resolve`] turns
//! the parsed operation into concrete delete/insert quad sets by evaluating
//! its where-pattern against a [`BindingSource`].

pub mod lexer;
pub mod parser;
pub mod resolve;

pub use parser::{GraphPattern, PatternTerm, QuadPattern, UpdateOperation, parse_update};
pub use resolve::{BindingSource, ResolvedUpdate, UpdateKind, resolve};
