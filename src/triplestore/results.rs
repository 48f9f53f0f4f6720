//! Decoding triple-store responses into crate terms.
//!
//! Handles the SPARQL 1.1 JSON results format (HTTP store) and oxigraph's
//! own term model (embedded store, N-Triples parsing). Skolem IRIs are
//! mapped back to blank nodes here.

use std::collections::{BTreeMap, HashMap};

use oxigraph::model as ox;
use serde::Deserialize;

use crate::error::TripleStoreError;
use crate::quad::{GraphName, Quad};
use crate::term::{RDF_LANG_STRING, Term, XSD_STRING};

use super::{Solution, TripleStoreResult};

#[derive(Debug, Deserialize)]
struct JsonResults {
    #[serde(default)]
    results: Option<JsonBindings>,
    #[serde(default)]
    boolean: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct JsonBindings {
    bindings: Vec<HashMap<String, JsonTerm>>,
}

#[derive(Debug, Deserialize)]
struct JsonTerm {
    #[serde(rename = "type")]
    kind: String,
    value: String,
    #[serde(rename = "xml:lang", default)]
    lang: Option<String>,
    #[serde(default)]
    datatype: Option<String>,
}

impl JsonTerm {
    fn into_term(self) -> TripleStoreResult<Term> {
        let term = match self.kind.as_str() {
            "uri" => Term::Iri(self.value),
            "bnode" => Term::Blank(self.value),
            "literal" | "typed-literal" => match (self.lang, self.datatype) {
                (Some(lang), _) => Term::lang_literal(self.value, &lang),
                (None, Some(dt)) if dt == RDF_LANG_STRING => {
                    return Err(malformed("rdf:langString literal without a language tag"));
                }
                (None, Some(dt)) => Term::typed_literal(self.value, dt),
                (None, None) => Term::literal(self.value),
            },
            other => return Err(malformed(format!("unsupported term type {other:?}"))),
        };
        Ok(term.deskolemized())
    }
}

fn malformed(message: impl Into<String>) -> TripleStoreError {
    TripleStoreError::Malformed {
        message: message.into(),
    }
}

fn parse_json(body: impl std::io::Read) -> TripleStoreResult<JsonResults> {
    serde_json::from_reader(body).map_err(|e| malformed(format!("invalid SPARQL JSON: {e}")))
}

/// Decode `application/sparql-results+json` solutions.
pub fn decode_solutions(body: impl std::io::Read) -> TripleStoreResult<Vec<Solution>> {
    let results = parse_json(body)?
        .results
        .ok_or_else(|| malformed("response has no `results` member"))?;
    results
        .bindings
        .into_iter()
        .map(|row| {
            row.into_iter()
                .map(|(var, term)| Ok((var, term.into_term()?)))
                .collect::<TripleStoreResult<BTreeMap<_, _>>>()
        })
        .collect()
}

/// Decode an ASK response.
pub fn decode_boolean(body: impl std::io::Read) -> TripleStoreResult<bool> {
    parse_json(body)?
        .boolean
        .ok_or_else(|| malformed("response has no `boolean` member"))
}

/// Parse an N-Triples CONSTRUCT response.
pub fn decode_ntriples(body: impl std::io::Read) -> TripleStoreResult<Vec<Quad>> {
    let parser = oxigraph::io::RdfParser::from_format(oxigraph::io::RdfFormat::NTriples);
    parser
        .for_reader(body)
        .map(|quad| {
            let quad = quad.map_err(|e| malformed(format!("invalid N-Triples: {e}")))?;
            from_ox_quad(quad)
        })
        .collect()
}

/// Convert an oxigraph term.
#[allow(unreachable_patterns)]
pub fn from_ox_term(term: ox::Term) -> TripleStoreResult<Term> {
    let term = match term {
        ox::Term::NamedNode(node) => Term::Iri(node.into_string()),
        ox::Term::BlankNode(node) => Term::Blank(node.into_string()),
        ox::Term::Literal(literal) => {
            let lexical = literal.value().to_string();
            match literal.language() {
                Some(lang) => Term::lang_literal(lexical, lang),
                None if literal.datatype().as_str() == XSD_STRING => Term::literal(lexical),
                None => Term::typed_literal(lexical, literal.datatype().as_str()),
            }
        }
        other => return Err(malformed(format!("unsupported term {other}"))),
    };
    Ok(term.deskolemized())
}

/// Convert an oxigraph quad.
pub fn from_ox_quad(quad: ox::Quad) -> TripleStoreResult<Quad> {
    let graph = match quad.graph_name {
        ox::GraphName::DefaultGraph => GraphName::Default,
        ox::GraphName::NamedNode(node) => GraphName::Named(node.into_string()),
        ox::GraphName::BlankNode(node) => {
            return Err(malformed(format!("blank node graph name {node}")));
        }
    };
    Ok(Quad {
        subject: from_ox_term(ox::Term::from(quad.subject))?,
        predicate: from_ox_term(ox::Term::from(quad.predicate))?,
        object: from_ox_term(quad.object)?,
        graph,
    })
}

/// Build quads from `?s ?p ?o ?g` solutions. Positions bound in the query
/// pattern are filled from `fixed`.
pub fn solutions_to_quads(
    solutions: Vec<Solution>,
    fixed: [Option<&Term>; 3],
) -> TripleStoreResult<Vec<Quad>> {
    let mut quads = Vec::with_capacity(solutions.len());
    for mut row in solutions {
        let mut take = |var: &str, fixed: Option<&Term>| {
            fixed
                .cloned()
                .or_else(|| row.remove(var))
                .ok_or_else(|| malformed(format!("solution lacks ?{var}")))
        };
        let subject = take("s", fixed[0])?;
        let predicate = take("p", fixed[1])?;
        let object = take("o", fixed[2])?;
        let graph = match row.remove("g") {
            None => GraphName::Default,
            Some(g) => GraphName::try_from(g).map_err(|e| malformed(e.to_string()))?,
        };
        quads.push(Quad {
            subject,
            predicate,
            object,
            graph,
        });
    }
    Ok(quads)
}

/// Read an integer count out of a solution variable.
pub fn count_of(solution: &Solution, var: &str) -> TripleStoreResult<u64> {
    let term = solution
        .get(var)
        .ok_or_else(|| malformed(format!("solution lacks ?{var}")))?;
    term.lexical()
        .parse()
        .map_err(|_| malformed(format!("?{var} is not an integer: {term}")))
}
