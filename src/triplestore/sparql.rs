//! SPARQL text for the mirror path.
//!
//! Only concrete data blocks are ever sent to the triple store: every
//! update is `DELETE DATA` / `INSERT DATA` over fully resolved quads.
//! Blank nodes go out as skolem IRIs.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::quad::{GraphName, Quad};
use crate::term::Term;

/// Write a term in wire form.
pub fn write_term(term: &Term, out: &mut String) {
    let _ = write!(out, "{}", term.skolemized());
}

/// Render quads as a data block body, grouping named graphs into
/// `GRAPH <g> { .. }` sections.
pub fn data_block(quads: &[Quad]) -> String {
    let mut by_graph: BTreeMap<&GraphName, Vec<&Quad>> = BTreeMap::new();
    for quad in quads {
        by_graph.entry(&quad.graph).or_default().push(quad);
    }
    let mut out = String::new();
    for (graph, quads) in by_graph {
        let indent = match graph {
            GraphName::Default => "  ",
            GraphName::Named(iri) => {
                let _ = writeln!(out, "  GRAPH <{iri}> {{");
                "    "
            }
        };
        for quad in quads {
            out.push_str(indent);
            write_term(&quad.subject, &mut out);
            out.push(' ');
            write_term(&quad.predicate, &mut out);
            out.push(' ');
            write_term(&quad.object, &mut out);
            out.push_str(" .\n");
        }
        if !graph.is_default() {
            out.push_str("  }\n");
        }
    }
    out
}

pub fn insert_data(quads: &[Quad]) -> String {
    format!("INSERT DATA {{\n{}}}", data_block(quads))
}

pub fn delete_data(quads: &[Quad]) -> String {
    format!("DELETE DATA {{\n{}}}", data_block(quads))
}

/// One request applying a diff: deletes first, then inserts.
/// Returns `None` for an empty diff.
pub fn diff_update(delete: &[Quad], insert: &[Quad]) -> Option<String> {
    match (delete.is_empty(), insert.is_empty()) {
        (true, true) => None,
        (false, true) => Some(delete_data(delete)),
        (true, false) => Some(insert_data(insert)),
        (false, false) => Some(format!("{} ;\n{}", delete_data(delete), insert_data(insert))),
    }
}

/// A triple pattern position: a bound term or a variable name.
fn position(term: Option<&Term>, var: &str) -> String {
    match term {
        Some(term) => {
            let mut out = String::new();
            write_term(term, &mut out);
            out
        }
        None => format!("?{var}"),
    }
}

/// `SELECT` over the default graph and every named graph. Default-graph
/// rows leave `?g` unbound.
pub fn select_quads(subject: Option<&Term>, predicate: Option<&Term>, object: Option<&Term>) -> String {
    let pattern = format!(
        "{} {} {}",
        position(subject, "s"),
        position(predicate, "p"),
        position(object, "o")
    );
    format!("SELECT * WHERE {{ {{ {pattern} }} UNION {{ GRAPH ?g {{ {pattern} }} }} }}")
}

pub const COUNT_QUADS: &str =
    "SELECT (COUNT(*) AS ?n) WHERE { { ?s ?p ?o } UNION { GRAPH ?g { ?s ?p ?o } } }";

pub const GRAPH_BREAKDOWN: &str =
    "SELECT ?g (COUNT(*) AS ?n) WHERE { { ?s ?p ?o } UNION { GRAPH ?g { ?s ?p ?o } } } GROUP BY ?g";

pub const DROP_ALL: &str = "DROP SILENT ALL";
