//! Basic graph pattern evaluation over a relational snapshot.
//!
//! Nested-loop join: patterns are taken one at a time, most-bound first,
//! and each partial solution is extended by an index lookup with its
//! bindings substituted in.

use crate::error::SyncResult;
use crate::quad::{GraphName, Quad};
use crate::term::Term;
use crate::triplestore::Solution;
use crate::update::{BindingSource, GraphPattern, PatternTerm, QuadPattern};

use super::{GraphScope, RelationalSnapshot};

impl BindingSource for RelationalSnapshot {
    fn solutions(&self, pattern: &[QuadPattern]) -> SyncResult<Vec<Solution>> {
        let mut remaining: Vec<&QuadPattern> = pattern.iter().collect();
        let mut solutions = vec![Solution::new()];
        while !remaining.is_empty() && !solutions.is_empty() {
            let next = pick_next(&remaining, &solutions[0]);
            let quad_pattern = remaining.swap_remove(next);
            let mut extended = Vec::new();
            for solution in &solutions {
                extend(self, quad_pattern, solution, &mut extended)?;
            }
            solutions = extended;
        }
        Ok(solutions)
    }
}

/// Index of the pattern with the most positions fixed under `bound`.
/// All partial solutions bind the same variables, so one is enough.
fn pick_next(remaining: &[&QuadPattern], bound: &Solution) -> usize {
    let fixed = |term: &PatternTerm| match term {
        PatternTerm::Term(_) => 1,
        PatternTerm::Var(name) => usize::from(bound.contains_key(name)),
    };
    remaining
        .iter()
        .enumerate()
        .max_by_key(|(i, p)| {
            // Prefer subject and object over predicate; ties keep source order.
            let score = 3 * fixed(&p.subject) + 3 * fixed(&p.object) + fixed(&p.predicate);
            (score, usize::MAX - i)
        })
        .map(|(i, _)| i)
        .unwrap_or(0)
}

fn substitute<'a>(term: &'a PatternTerm, solution: &'a Solution) -> Option<&'a Term> {
    match term {
        PatternTerm::Term(term) => Some(term),
        PatternTerm::Var(name) => solution.get(name),
    }
}

fn extend(
    snapshot: &RelationalSnapshot,
    pattern: &QuadPattern,
    solution: &Solution,
    out: &mut Vec<Solution>,
) -> SyncResult<()> {
    let subject = substitute(&pattern.subject, solution);
    let predicate = substitute(&pattern.predicate, solution);
    let object = substitute(&pattern.object, solution);

    // A literal bound into subject position, or a non-IRI predicate, matches nothing.
    if subject.is_some_and(Term::is_literal) || predicate.is_some_and(|p| !p.is_iri()) {
        return Ok(());
    }

    let scope = match &pattern.graph {
        GraphPattern::Default => GraphScope::Default,
        GraphPattern::Named(iri) => GraphScope::Named(iri),
        GraphPattern::Var(name) => match solution.get(name) {
            Some(Term::Iri(iri)) => GraphScope::Named(iri),
            Some(_) => return Ok(()),
            None => GraphScope::AnyNamed,
        },
    };

    for quad in snapshot.quads_in(subject, predicate, object, scope)? {
        if let Some(next) = bind_quad(pattern, solution, quad) {
            out.push(next);
        }
    }
    Ok(())
}

/// Extend `solution` with the variables of `pattern` matched against
/// `quad`. Fails when a variable repeated within the pattern would take
/// two different values.
fn bind_quad(pattern: &QuadPattern, solution: &Solution, quad: Quad) -> Option<Solution> {
    let mut next = solution.clone();
    let graph_term = match quad.graph {
        GraphName::Default => None,
        GraphName::Named(iri) => Some(Term::Iri(iri)),
    };
    let positions = [
        (&pattern.subject, Some(quad.subject)),
        (&pattern.predicate, Some(quad.predicate)),
        (&pattern.object, Some(quad.object)),
    ];
    let graph_var = match &pattern.graph {
        GraphPattern::Var(name) => Some((name, graph_term)),
        _ => None,
    };
    let bindings = positions
        .into_iter()
        .filter_map(|(term, value)| term.var().map(|name| (name, value)))
        .chain(graph_var.map(|(name, value)| (name.as_str(), value)));
    for (name, value) in bindings {
        let value = value?;
        match next.get(name) {
            Some(existing) if *existing != value => return None,
            Some(_) => {}
            None => {
                next.insert(name.to_string(), value);
            }
        }
    }
    Some(next)
}
