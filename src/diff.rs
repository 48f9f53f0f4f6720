//! Quad diffs: the only shape of mutation the coordinator accepts.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::quad::{Quad, QuadSet};
use crate::term::Term;
use crate::update::ResolvedUpdate;

/// Concrete quads to delete, then insert. Both sides are de-duplicated,
/// sorted and carry canonical literals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QuadDiff {
    pub delete: Vec<Quad>,
    pub insert: Vec<Quad>,
}

impl QuadDiff {
    pub fn new(delete: impl IntoIterator<Item = Quad>, insert: impl IntoIterator<Item = Quad>) -> Self {
        Self {
            delete: canonical_set(delete),
            insert: canonical_set(insert),
        }
    }

    pub fn delete_only(quads: impl IntoIterator<Item = Quad>) -> Self {
        Self::new(quads, [])
    }

    pub fn insert_only(quads: impl IntoIterator<Item = Quad>) -> Self {
        Self::new([], quads)
    }

    pub fn is_empty(&self) -> bool {
        self.delete.is_empty() && self.insert.is_empty()
    }

    /// Total number of quad operations.
    pub fn len(&self) -> usize {
        self.delete.len() + self.insert.len()
    }

    /// Subjects touched on either side.
    pub fn affected_subjects(&self) -> BTreeSet<&Term> {
        self.delete
            .iter()
            .chain(&self.insert)
            .map(|q| &q.subject)
            .collect()
    }
}

fn canonical_set(quads: impl IntoIterator<Item = Quad>) -> Vec<Quad> {
    quads
        .into_iter()
        .map(Quad::canonical)
        .collect::<QuadSet>()
        .into_iter()
        .collect()
}

/// Full replace of a unit: delete everything currently in it, insert
/// everything the new state implies. An empty `old` is an upsert.
pub fn build_replace_diff(old: impl IntoIterator<Item = Quad>, new: impl IntoIterator<Item = Quad>) -> QuadDiff {
    QuadDiff::new(old, new)
}

impl From<ResolvedUpdate> for QuadDiff {
    fn from(update: ResolvedUpdate) -> Self {
        Self::new(update.delete, update.insert)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(s: &str, o: &str) -> Quad {
        Quad::triple(
            Term::iri(format!("http://ex.org/{s}")),
            Term::iri("http://ex.org/p"),
            Term::literal(o),
        )
        .unwrap()
    }

    #[test]
    fn replace_deletes_old_and_inserts_new() {
        let diff = build_replace_diff([q("r1", "v1")], [q("r1", "v2")]);
        assert_eq!(diff.delete, vec![q("r1", "v1")]);
        assert_eq!(diff.insert, vec![q("r1", "v2")]);
        assert_eq!(diff.len(), 2);
    }

    #[test]
    fn upsert_has_empty_delete() {
        let diff = build_replace_diff(QuadSet::new(), [q("r1", "v1")]);
        assert!(diff.delete.is_empty());
        assert!(!diff.is_empty());
    }

    #[test]
    fn duplicates_collapse() {
        let diff = QuadDiff::insert_only([q("a", "1"), q("a", "1"), q("b", "1")]);
        assert_eq!(diff.insert.len(), 2);
        let subjects: Vec<_> = diff.affected_subjects().into_iter().cloned().collect();
        assert_eq!(
            subjects,
            vec![Term::iri("http://ex.org/a"), Term::iri("http://ex.org/b")]
        );
    }

    #[test]
    fn literals_are_canonicalized_on_both_sides() {
        let raw = |lexical: &str| {
            Quad::triple(
                Term::iri("http://ex.org/a"),
                Term::iri("http://ex.org/n"),
                Term::Literal {
                    lexical: lexical.into(),
                    datatype: crate::term::XSD_INTEGER.into(),
                    language: None,
                },
            )
            .unwrap()
        };
        let diff = QuadDiff::new([raw("007")], [raw("7"), raw("+7")]);
        assert_eq!(diff.delete[0].object.lexical(), "7");
        assert_eq!(diff.insert.len(), 1);
    }

    #[test]
    fn default_is_empty() {
        assert!(QuadDiff::default().is_empty());
        assert_eq!(QuadDiff::delete_only([]).len(), 0);
    }
}
