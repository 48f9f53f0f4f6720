//! Quads: the unit of storage in both backends.
//!
//! A [`Quad`] is (subject, predicate, object, graph). Both the relational
//! tables and the triple store hold exactly this shape, so every mutation
//! is ultimately a set of quads to delete and a set to insert.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::TermError;
use crate::term::Term;

/// The graph context of a quad.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub enum GraphName {
    #[default]
    Default,
    /// A named graph IRI.
    Named(String),
}

impl GraphName {
    pub fn named(iri: impl Into<String>) -> Self {
        GraphName::Named(iri.into())
    }

    pub fn is_default(&self) -> bool {
        matches!(self, GraphName::Default)
    }

    /// The graph as a term, `None` for the default graph.
    pub fn as_term(&self) -> Option<Term> {
        match self {
            GraphName::Default => None,
            GraphName::Named(iri) => Some(Term::Iri(iri.clone())),
        }
    }

    /// Key used in per-graph reports.
    pub fn label(&self) -> String {
        match self {
            GraphName::Default => "default".to_string(),
            GraphName::Named(iri) => iri.clone(),
        }
    }
}

impl TryFrom<Term> for GraphName {
    type Error = TermError;

    fn try_from(term: Term) -> Result<Self, Self::Error> {
        match term {
            Term::Iri(iri) => Ok(GraphName::Named(iri)),
            other => Err(TermError::InvalidPosition {
                position: "graph",
                term: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for GraphName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GraphName::Default => write!(f, "DEFAULT"),
            GraphName::Named(iri) => write!(f, "<{iri}>"),
        }
    }
}

/// A (subject, predicate, object, graph) tuple of terms.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Quad {
    pub subject: Term,
    pub predicate: Term,
    pub object: Term,
    pub graph: GraphName,
}

impl Quad {
    /// Create a quad, enforcing positional rules: the subject is an IRI or
    /// blank node, the predicate an IRI, and every term lexically valid.
    pub fn new(
        subject: Term,
        predicate: Term,
        object: Term,
        graph: GraphName,
    ) -> Result<Self, TermError> {
        let quad = Self {
            subject,
            predicate,
            object,
            graph,
        };
        quad.validate()?;
        Ok(quad)
    }

    /// Create a quad in the default graph.
    pub fn triple(subject: Term, predicate: Term, object: Term) -> Result<Self, TermError> {
        Self::new(subject, predicate, object, GraphName::Default)
    }

    pub fn validate(&self) -> Result<(), TermError> {
        if self.subject.is_literal() {
            return Err(TermError::InvalidPosition {
                position: "subject",
                term: self.subject.to_string(),
            });
        }
        if !self.predicate.is_iri() {
            return Err(TermError::InvalidPosition {
                position: "predicate",
                term: self.predicate.to_string(),
            });
        }
        self.subject.validate()?;
        self.predicate.validate()?;
        self.object.validate()?;
        if let GraphName::Named(iri) = &self.graph {
            Term::Iri(iri.clone()).validate()?;
        }
        Ok(())
    }

    /// The same quad with every literal in canonical form.
    pub fn canonical(self) -> Self {
        Self {
            subject: self.subject,
            predicate: self.predicate,
            object: self.object.canonical(),
            graph: self.graph,
        }
    }

    /// The same quad moved to another graph.
    pub fn in_graph(mut self, graph: GraphName) -> Self {
        self.graph = graph;
        self
    }
}

impl std::fmt::Display for Quad {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.graph {
            GraphName::Default => write!(f, "{} {} {} .", self.subject, self.predicate, self.object),
            GraphName::Named(g) => write!(
                f,
                "{} {} {} <{g}> .",
                self.subject, self.predicate, self.object
            ),
        }
    }
}

/// An ordered, de-duplicated quad set.
pub type QuadSet = BTreeSet<Quad>;
