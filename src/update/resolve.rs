//! Turning a parsed operation into concrete quads.
//!
//! Data operations are already concrete. Conditional operations evaluate
//! their where-pattern once against a [`BindingSource`], then instantiate
//! the delete and insert templates per solution. The result never carries
//! variables, so the mirror path only ever sends data blocks.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::error::SyncResult;
use crate::quad::{GraphName, Quad, QuadSet};
use crate::term::Term;
use crate::triplestore::{Solution, TripleStoreView, sparql};

use super::parser::{GraphPattern, PatternTerm, QuadPattern, UpdateOperation};

/// Anything that can answer a basic graph pattern with variable bindings.
pub trait BindingSource {
    fn solutions(&self, pattern: &[QuadPattern]) -> SyncResult<Vec<Solution>>;
}

impl<T: BindingSource + ?Sized> BindingSource for &T {
    fn solutions(&self, pattern: &[QuadPattern]) -> SyncResult<Vec<Solution>> {
        (**self).solutions(pattern)
    }
}

/// What a resolved update does to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateKind {
    Insert,
    Delete,
    DeleteInsert,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedUpdate {
    pub kind: UpdateKind,
    pub delete: Vec<Quad>,
    pub insert: Vec<Quad>,
    /// Number of where-pattern solutions (1 for data operations).
    pub solutions: usize,
}

impl ResolvedUpdate {
    pub fn is_empty(&self) -> bool {
        self.delete.is_empty() && self.insert.is_empty()
    }
}

/// Resolve `operation` against `source`.
pub fn resolve(operation: &UpdateOperation, source: &dyn BindingSource) -> SyncResult<ResolvedUpdate> {
    let salt: u32 = rand::random();
    let resolved = match operation {
        UpdateOperation::InsertData(quads) => {
            let fresh = Solution::new();
            let insert = quads
                .iter()
                .filter_map(|q| instantiate(&concrete(q), &fresh, Some((salt, 0))))
                .collect::<QuadSet>();
            ResolvedUpdate {
                kind: UpdateKind::Insert,
                delete: Vec::new(),
                insert: insert.into_iter().collect(),
                solutions: 1,
            }
        }
        UpdateOperation::DeleteData(quads) => ResolvedUpdate {
            kind: UpdateKind::Delete,
            delete: quads.iter().cloned().collect::<QuadSet>().into_iter().collect(),
            insert: Vec::new(),
            solutions: 1,
        },
        UpdateOperation::DeleteWhere(pattern) => {
            let solutions = evaluate(pattern, source)?;
            ResolvedUpdate {
                kind: UpdateKind::Delete,
                delete: instantiate_all(pattern, &solutions, None),
                insert: Vec::new(),
                solutions: solutions.len(),
            }
        }
        UpdateOperation::Modify {
            delete,
            insert,
            pattern,
        } => {
            let solutions = evaluate(pattern, source)?;
            let kind = match (delete.is_empty(), insert.is_empty()) {
                (false, false) => UpdateKind::DeleteInsert,
                (true, _) => UpdateKind::Insert,
                (false, true) => UpdateKind::Delete,
            };
            ResolvedUpdate {
                kind,
                delete: instantiate_all(delete, &solutions, None),
                insert: instantiate_all(insert, &solutions, Some(salt)),
                solutions: solutions.len(),
            }
        }
    };
    tracing::debug!(
        kind = ?resolved.kind,
        solutions = resolved.solutions,
        deleted = resolved.delete.len(),
        inserted = resolved.insert.len(),
        "update resolved"
    );
    Ok(resolved)
}

/// An empty pattern has exactly one (empty) solution.
fn evaluate(pattern: &[QuadPattern], source: &dyn BindingSource) -> SyncResult<Vec<Solution>> {
    if pattern.is_empty() {
        return Ok(vec![Solution::new()]);
    }
    source.solutions(pattern)
}

fn concrete(quad: &Quad) -> QuadPattern {
    QuadPattern {
        subject: PatternTerm::Term(quad.subject.clone()),
        predicate: PatternTerm::Term(quad.predicate.clone()),
        object: PatternTerm::Term(quad.object.clone()),
        graph: match &quad.graph {
            GraphName::Default => GraphPattern::Default,
            GraphName::Named(iri) => GraphPattern::Named(iri.clone()),
        },
    }
}

fn instantiate_all(templates: &[QuadPattern], solutions: &[Solution], salt: Option<u32>) -> Vec<Quad> {
    let mut out = QuadSet::new();
    for (n, solution) in solutions.iter().enumerate() {
        for template in templates {
            if let Some(quad) = instantiate(template, solution, salt.map(|s| (s, n))) {
                out.insert(quad);
            }
        }
    }
    out.into_iter().collect()
}

/// One template instance. `None` when a variable is unbound or the bound
/// value is not allowed in its position; such instances are skipped.
fn instantiate(template: &QuadPattern, solution: &Solution, fresh: Option<(u32, usize)>) -> Option<Quad> {
    let bind = |term: &PatternTerm| -> Option<Term> {
        match term {
            PatternTerm::Var(name) => solution.get(name).cloned(),
            PatternTerm::Term(Term::Blank(label)) => match fresh {
                Some((salt, n)) => Some(Term::Blank(format!("{label}-{salt:08x}-{n}"))),
                None => Some(Term::Blank(label.clone())),
            },
            PatternTerm::Term(term) => Some(term.clone()),
        }
    };
    let graph = match &template.graph {
        GraphPattern::Default => GraphName::Default,
        GraphPattern::Named(iri) => GraphName::Named(iri.clone()),
        GraphPattern::Var(name) => GraphName::try_from(solution.get(name)?.clone()).ok()?,
    };
    Quad::new(
        bind(&template.subject)?,
        bind(&template.predicate)?,
        bind(&template.object)?,
        graph,
    )
    .ok()
}

/// `SELECT * WHERE { .. }` for a basic graph pattern.
pub fn select_where(pattern: &[QuadPattern]) -> String {
    let mut by_graph: BTreeMap<&GraphPattern, Vec<&QuadPattern>> = BTreeMap::new();
    for quad in pattern {
        by_graph.entry(&quad.graph).or_default().push(quad);
    }
    let mut out = String::from("SELECT * WHERE {\n");
    for (graph, patterns) in by_graph {
        let indent = match graph {
            GraphPattern::Default => "  ",
            GraphPattern::Named(iri) => {
                let _ = writeln!(out, "  GRAPH <{iri}> {{");
                "    "
            }
            GraphPattern::Var(name) => {
                let _ = writeln!(out, "  GRAPH ?{name} {{");
                "    "
            }
        };
        for p in patterns {
            out.push_str(indent);
            for term in [&p.subject, &p.predicate, &p.object] {
                match term {
                    PatternTerm::Var(name) => {
                        let _ = write!(out, "?{name}");
                    }
                    PatternTerm::Term(term) => sparql::write_term(term, &mut out),
                }
                out.push(' ');
            }
            out.push_str(".\n");
        }
        if *graph != GraphPattern::Default {
            out.push_str("  }\n");
        }
    }
    out.push('}');
    out
}

impl BindingSource for TripleStoreView<'_> {
    fn solutions(&self, pattern: &[QuadPattern]) -> SyncResult<Vec<Solution>> {
        Ok(self.store.execute_query(self.space, &select_where(pattern))?)
    }
}
