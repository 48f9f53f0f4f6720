//! Rich diagnostic error types for the dual-write engine.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes and help text. [`SyncError`] wraps them all so the
//! full diagnostic chain reaches the caller.
//!
//! Mapping onto the operational taxonomy:
//!
//! | Condition | Type |
//! |-----------|------|
//! | malformed update statement | [`ParseError`] |
//! | unit not reachable from declared root | [`DiscoveryError::Ownership`] |
//! | relational failure inside `apply_diff` | [`WriteError::RelationalTransaction`] |
//! | triple-store mirror failure | not an error: `ApplyOutcome::Degraded` |
//! | validator finds divergence | [`ConsistencyError::Divergence`] |

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for the engine.
#[derive(Debug, Error, Diagnostic)]
pub enum SyncError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Term(#[from] TermError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Space(#[from] SpaceError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Relational(#[from] RelationalError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    TripleStore(#[from] TripleStoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Write(#[from] WriteError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Consistency(#[from] ConsistencyError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),
}

impl SyncError {
    /// Whether this is an ownership rejection.
    pub fn is_ownership(&self) -> bool {
        matches!(self, SyncError::Discovery(DiscoveryError::Ownership { .. }))
    }

    /// Whether this is a parse rejection.
    pub fn is_parse(&self) -> bool {
        matches!(self, SyncError::Parse(_))
    }

    /// Whether this is a rolled-back relational transaction.
    pub fn is_relational_transaction(&self) -> bool {
        matches!(self, SyncError::Write(WriteError::RelationalTransaction { .. }))
    }
}

// ---------------------------------------------------------------------------
// Term errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum TermError {
    #[error("invalid IRI <{iri}>: {reason}")]
    #[diagnostic(
        code(kgsync::term::invalid_iri),
        help(
            "IRIs must be absolute (have a scheme such as `http:` or `urn:`) and \
             may not contain whitespace or any of <>\"{{}}|^`\\."
        )
    )]
    InvalidIri { iri: String, reason: String },

    #[error("invalid blank node label: {label:?}")]
    #[diagnostic(
        code(kgsync::term::invalid_blank),
        help("Blank node labels use letters, digits, '_', '-' and '.', and may not end with '.'.")
    )]
    InvalidBlankLabel { label: String },

    #[error("invalid language tag: {tag:?}")]
    #[diagnostic(
        code(kgsync::term::invalid_language),
        help(
            "Language tags follow BCP47 (e.g. `en`, `de-CH`). A literal cannot carry \
             both a language tag and a datatype other than rdf:langString."
        )
    )]
    InvalidLanguageTag { tag: String },

    #[error("{term} cannot appear in {position} position")]
    #[diagnostic(
        code(kgsync::term::invalid_position),
        help(
            "Subjects must be IRIs or blank nodes, predicates must be IRIs, \
             and graph names must be IRIs."
        )
    )]
    InvalidPosition { position: &'static str, term: String },

    #[error("invalid term kind: {kind}")]
    #[diagnostic(
        code(kgsync::term::invalid_kind),
        help("Valid term kinds are: iri, literal, blank.")
    )]
    InvalidKind { kind: String },
}

// ---------------------------------------------------------------------------
// Space errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum SpaceError {
    #[error("invalid space name {name:?}: {reason}")]
    #[diagnostic(
        code(kgsync::space::invalid_name),
        help(
            "Space names are 1 to 64 characters of letters, digits, '-' and '_', \
             starting with a letter or digit."
        )
    )]
    InvalidName { name: String, reason: String },
}

// ---------------------------------------------------------------------------
// Relational store errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum RelationalError {
    #[error("I/O error: {source}")]
    #[diagnostic(
        code(kgsync::relational::io),
        help(
            "A filesystem operation failed. Check that the data directory exists, \
             has correct permissions, and that the disk is not full."
        )
    )]
    Io {
        #[source]
        source: std::io::Error,
    },

    #[error("redb error during {operation}: {message}")]
    #[diagnostic(
        code(kgsync::relational::backend),
        help(
            "The embedded database reported an error. If this persists across \
             restarts the database file may be corrupt; restore from backup or \
             rebuild the space."
        )
    )]
    Backend {
        operation: &'static str,
        message: String,
    },

    #[error("serialization error: {message}")]
    #[diagnostic(
        code(kgsync::relational::serde),
        help(
            "A stored term or space record could not be encoded or decoded. \
             The on-disk format may have changed between versions."
        )
    )]
    Serialization { message: String },

    #[error("space \"{space}\" does not exist")]
    #[diagnostic(
        code(kgsync::relational::space_not_found),
        help("Create it first with `kgsync space create {space}`.")
    )]
    SpaceNotFound { space: String },

    #[error("space \"{space}\" already exists")]
    #[diagnostic(
        code(kgsync::relational::space_exists),
        help("Pick a different name, or drop the existing space first.")
    )]
    SpaceExists { space: String },

    #[error("quad index in space \"{space}\" references unknown term id {id}")]
    #[diagnostic(
        code(kgsync::relational::dangling_term),
        help(
            "The quad tables and term tables disagree. This indicates storage \
             corruption; rebuild the space from a backup."
        )
    )]
    DanglingTerm { space: String, id: u64 },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Term(#[from] TermError),
}

// ---------------------------------------------------------------------------
// Triple-store errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum TripleStoreError {
    #[error("triple store unreachable at {endpoint}: {message}")]
    #[diagnostic(
        code(kgsync::triplestore::transport),
        help(
            "The request did not complete (connection failure or timeout). \
             Committed writes stay authoritative in the relational store; run \
             `kgsync resync` once the triple store is reachable again."
        )
    )]
    Transport { endpoint: String, message: String },

    #[error("triple store rejected the request with status {status}: {body}")]
    #[diagnostic(
        code(kgsync::triplestore::rejected),
        help(
            "The store answered with an error status. 400 usually means a SPARQL \
             syntax error; 401/403 means the credentials are wrong or expired."
        )
    )]
    Rejected { status: u16, body: String },

    #[error("malformed triple store response: {message}")]
    #[diagnostic(
        code(kgsync::triplestore::malformed),
        help("The response could not be decoded as SPARQL JSON results or N-Triples.")
    )]
    Malformed { message: String },

    #[error("authentication failed: {message}")]
    #[diagnostic(
        code(kgsync::triplestore::auth),
        help(
            "Fetching a bearer token failed. Check the token URL and client \
             credentials in the [triple_store.auth] config section."
        )
    )]
    Auth { message: String },

    #[error("embedded store error: {message}")]
    #[diagnostic(
        code(kgsync::triplestore::embedded),
        help("The embedded oxigraph store reported an error evaluating the request.")
    )]
    Embedded { message: String },

    #[error("triple store has no dataset for space \"{space}\"")]
    #[diagnostic(
        code(kgsync::triplestore::unknown_space),
        help("The space was never created in the triple store, or was dropped.")
    )]
    UnknownSpace { space: String },
}

// ---------------------------------------------------------------------------
// Discovery errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum DiscoveryError {
    #[error("cycle in connecting edges of unit <{root}> at <{node}>")]
    #[diagnostic(
        code(kgsync::discovery::cycle),
        help(
            "Connecting edges must form a tree under the unit root. Remove the \
             edge that links back to an already-reached node."
        )
    )]
    Cycle { root: String, node: String },

    #[error("unit <{root}> deeper than {max_depth} levels")]
    #[diagnostic(
        code(kgsync::discovery::depth_exceeded),
        help("Increase `discovery.max_depth` if such deep hierarchies are intended.")
    )]
    DepthExceeded { root: String, max_depth: usize },

    #[error(
        "edge-walk and marker-scan disagree for unit <{root}>: \
         {edge_only} quad(s) only reachable by edges, {marker_only} only by marker"
    )]
    #[diagnostic(
        code(kgsync::discovery::disagreement),
        help(
            "The unit is corrupt: a member carries the grouping marker without a \
             connecting edge (orphan), or an edge reaches a node without the marker. \
             Inspect it with `kgsync show-unit`; it is not repaired automatically."
        )
    )]
    Disagreement {
        root: String,
        edge_only: usize,
        marker_only: usize,
    },

    #[error("unit <{unit}> is not owned by outer unit <{root}>")]
    #[diagnostic(
        code(kgsync::discovery::ownership),
        help(
            "The referenced unit exists but is not reachable from the declared root. \
             Address it through the outer unit that owns it."
        )
    )]
    Ownership {
        root: String,
        unit: String,
        owner: Option<String>,
    },

    #[error("unit <{unit}> not found")]
    #[diagnostic(
        code(kgsync::discovery::not_found),
        help("No quads exist for this unit. Create it with a full outer-unit replace.")
    )]
    UnitNotFound { unit: String },

    #[error("unit <{unit}> has an invalid structure: {message}")]
    #[diagnostic(
        code(kgsync::discovery::invalid_structure),
        help("Each structural child may appear only once in a unit state.")
    )]
    InvalidStructure { unit: String, message: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Relational(#[from] RelationalError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    TripleStore(#[from] TripleStoreError),
}

// ---------------------------------------------------------------------------
// Update-statement parse errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ParseError {
    #[error("syntax error at byte {offset}: {message} (near `{fragment}`)")]
    #[diagnostic(
        code(kgsync::parse::syntax),
        help(
            "Supported statements: INSERT DATA, DELETE DATA, DELETE WHERE, \
             [WITH <g>] DELETE {{..}} INSERT {{..}} WHERE {{..}} and INSERT {{..}} WHERE {{..}}."
        )
    )]
    Syntax {
        message: String,
        fragment: String,
        offset: usize,
    },

    #[error("unsupported construct `{construct}` at byte {offset} (near `{fragment}`)")]
    #[diagnostic(
        code(kgsync::parse::unsupported),
        help(
            "Where-patterns are limited to basic graph patterns and GRAPH blocks. \
             Rewrite the statement without this construct, or resolve it client-side \
             into INSERT DATA / DELETE DATA."
        )
    )]
    Unsupported {
        construct: String,
        fragment: String,
        offset: usize,
    },

    #[error("undefined prefix `{prefix}:` at byte {offset}")]
    #[diagnostic(
        code(kgsync::parse::undefined_prefix),
        help("Declare it in the prologue: PREFIX {prefix}: <http://...>")
    )]
    UndefinedPrefix { prefix: String, offset: usize },

    #[error("invalid term at byte {offset}: {source}")]
    #[diagnostic(code(kgsync::parse::invalid_term))]
    InvalidTerm {
        offset: usize,
        #[source]
        source: TermError,
    },
}

// ---------------------------------------------------------------------------
// Coordinator (write path) errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum WriteError {
    #[error("relational transaction on space \"{space}\" rolled back: {source}")]
    #[diagnostic(
        code(kgsync::write::relational_transaction),
        help(
            "Nothing was changed in either store. Fix the cause (constraint \
             violation, storage failure) and retry the operation."
        )
    )]
    RelationalTransaction {
        space: String,
        #[source]
        source: RelationalError,
    },

    #[error("scope guard for space \"{guard_space}\" used for space \"{space}\"")]
    #[diagnostic(
        code(kgsync::write::scope_mismatch),
        help("Lock the scope of the space being written before applying a diff.")
    )]
    ScopeMismatch { guard_space: String, space: String },
}

// ---------------------------------------------------------------------------
// Consistency errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConsistencyError {
    #[error(
        "space \"{space}\" diverged: relational has {relational} quad(s), \
         triple store has {triplestore}"
    )]
    #[diagnostic(
        code(kgsync::consistency::divergence),
        help(
            "The relational store is authoritative. Run `kgsync resync {space}` to \
             rebuild the triple store dataset from it."
        )
    )]
    Divergence {
        space: String,
        relational: u64,
        triplestore: u64,
    },
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read config: {path}")]
    #[diagnostic(
        code(kgsync::config::read),
        help("Ensure the config file exists and is readable.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {message}")]
    #[diagnostic(
        code(kgsync::config::parse),
        help("Check the TOML syntax in the config file.")
    )]
    Parse { path: String, message: String },

    #[error("failed to write config: {path}")]
    #[diagnostic(
        code(kgsync::config::write),
        help("Ensure you have write permissions to the config directory.")
    )]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {message}")]
    #[diagnostic(code(kgsync::config::invalid), help("Check the EngineConfig fields. {message}"))]
    Invalid { message: String },
}

/// Convenience alias for functions returning engine results.
pub type SyncResult<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relational_error_converts_to_sync_error() {
        let err = RelationalError::SpaceNotFound {
            space: "ns1".into(),
        };
        let top: SyncError = err.into();
        assert!(matches!(
            top,
            SyncError::Relational(RelationalError::SpaceNotFound { .. })
        ));
    }

    #[test]
    fn ownership_is_classified() {
        let err: SyncError = DiscoveryError::Ownership {
            root: "urn:r".into(),
            unit: "urn:f".into(),
            owner: None,
        }
        .into();
        assert!(err.is_ownership());
        assert!(!err.is_parse());
    }

    #[test]
    fn discovery_wraps_relational() {
        let err: DiscoveryError = RelationalError::Serialization {
            message: "x".into(),
        }
        .into();
        assert!(matches!(err, DiscoveryError::Relational(_)));
    }

    #[test]
    fn display_messages_are_descriptive() {
        let err = ParseError::Syntax {
            message: "expected `}`".into(),
            fragment: "INSERT DATA {".into(),
            offset: 12,
        };
        let msg = err.to_string();
        assert!(msg.contains("12"));
        assert!(msg.contains("INSERT DATA {"));
    }
}
