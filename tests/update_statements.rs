//! Declarative update statements through the engine.

mod common;

use common::{SwitchableStore, engine_with, iri, ns1};
use kg_dualwrite::consistency::ValidationMode;
use kg_dualwrite::engine::SyncEngine;
use kg_dualwrite::error::{ParseError, SyncError};
use kg_dualwrite::quad::{GraphName, Quad};
use kg_dualwrite::space::SpaceId;
use kg_dualwrite::term::{Term, XSD_INTEGER};
use kg_dualwrite::update::UpdateKind;

fn setup() -> (SyncEngine, SpaceId) {
    let engine = engine_with(SwitchableStore::new());
    let ns = ns1();
    engine.create_space(&ns).unwrap();
    (engine, ns)
}

fn relational_quads(engine: &SyncEngine, ns: &SpaceId) -> Vec<Quad> {
    engine
        .coordinator()
        .relational()
        .snapshot(ns)
        .unwrap()
        .all_quads()
        .unwrap()
}

fn consistent(engine: &SyncEngine, ns: &SpaceId) -> bool {
    engine.validate(ns, ValidationMode::Full).unwrap().consistent
}

#[test]
fn named_graph_data_lands_in_its_graph() {
    let (engine, ns) = setup();
    engine
        .execute_update(
            &ns,
            r#"PREFIX ex: <http://ex.org/>
               INSERT DATA {
                 ex:a ex:p 1 .
                 GRAPH ex:g1 { ex:a ex:p "en"@en ; ex:q ex:b }
               }"#,
        )
        .unwrap();

    let quads = relational_quads(&engine, &ns);
    assert_eq!(quads.len(), 3);
    let in_g1 = quads
        .iter()
        .filter(|q| q.graph == GraphName::named("http://ex.org/g1"))
        .count();
    assert_eq!(in_g1, 2);

    let report = engine.validate(&ns, ValidationMode::Counts).unwrap();
    assert_eq!(report.per_graph["http://ex.org/g1"].triplestore, 2);
    assert!(consistent(&engine, &ns));
}

#[test]
fn delete_where_removes_every_match() {
    let (engine, ns) = setup();
    engine
        .execute_update(
            &ns,
            r#"INSERT DATA {
                 <http://ex.org/a> <http://ex.org/tag> "x" .
                 <http://ex.org/b> <http://ex.org/tag> "y" .
                 <http://ex.org/b> <http://ex.org/keep> "z" }"#,
        )
        .unwrap();
    let report = engine
        .execute_update(&ns, "DELETE WHERE { ?s <http://ex.org/tag> ?o }")
        .unwrap();
    assert_eq!(report.kind, UpdateKind::Delete);
    assert_eq!(report.solutions, 2);
    assert_eq!(report.apply.deleted, 2);
    assert_eq!(
        relational_quads(&engine, &ns),
        vec![Quad::triple(iri("b"), iri("keep"), Term::literal("z")).unwrap()]
    );
    assert!(consistent(&engine, &ns));
}

#[test]
fn with_clause_scopes_template_and_pattern() {
    let (engine, ns) = setup();
    engine
        .execute_update(
            &ns,
            r#"INSERT DATA { GRAPH <http://ex.org/g> { <http://ex.org/a> <http://ex.org/n> 1 } }"#,
        )
        .unwrap();
    engine
        .execute_update(
            &ns,
            r#"WITH <http://ex.org/g>
               DELETE { ?s <http://ex.org/n> ?n } INSERT { ?s <http://ex.org/n> 2 }
               WHERE { ?s <http://ex.org/n> ?n }"#,
        )
        .unwrap();
    let quads = relational_quads(&engine, &ns);
    assert_eq!(quads.len(), 1);
    assert_eq!(quads[0].graph, GraphName::named("http://ex.org/g"));
    assert_eq!(
        quads[0].object,
        Term::typed_literal("2", kg_dualwrite::term::XSD_INTEGER)
    );
    assert!(consistent(&engine, &ns));
}

#[test]
fn non_canonical_numbers_stay_consistent() {
    let (engine, ns) = setup();
    engine
        .execute_update(
            &ns,
            r#"PREFIX xsd: <http://www.w3.org/2001/XMLSchema#>
               INSERT DATA {
                 <http://ex.org/a> <http://ex.org/n> "007"^^xsd:integer .
                 <http://ex.org/a> <http://ex.org/d> 1.50 }"#,
        )
        .unwrap();
    let quads = relational_quads(&engine, &ns);
    assert!(quads.contains(
        &Quad::triple(iri("a"), iri("n"), Term::typed_literal("7", XSD_INTEGER)).unwrap()
    ));
    assert!(consistent(&engine, &ns));

    let report = engine
        .execute_update(
            &ns,
            r#"DELETE { ?s <http://ex.org/n> ?o . ?s <http://ex.org/d> ?d }
               INSERT { ?s <http://ex.org/n> 8 . ?s <http://ex.org/d> 2.0 }
               WHERE { ?s <http://ex.org/n> ?o . ?s <http://ex.org/d> ?d }"#,
        )
        .unwrap();
    assert_eq!(report.apply.deleted, 2);
    let quads = relational_quads(&engine, &ns);
    assert_eq!(quads.len(), 2);
    assert!(quads.iter().all(|q| q.object.lexical() != "7"));
    let counts = engine.validate(&ns, ValidationMode::Counts).unwrap();
    assert_eq!(counts.per_graph["default"].triplestore, 2);
    assert!(consistent(&engine, &ns));
}

#[test]
fn template_blank_nodes_are_fresh_per_solution() {
    let (engine, ns) = setup();
    engine
        .execute_update(
            &ns,
            r#"INSERT DATA { <http://ex.org/a> a <http://ex.org/T> . <http://ex.org/b> a <http://ex.org/T> }"#,
        )
        .unwrap();
    engine
        .execute_update(
            &ns,
            r#"INSERT { ?x <http://ex.org/note> _:n . _:n <http://ex.org/text> "hi" }
               WHERE { ?x a <http://ex.org/T> }"#,
        )
        .unwrap();
    let notes: Vec<Term> = relational_quads(&engine, &ns)
        .into_iter()
        .filter(|q| q.predicate == iri("note"))
        .map(|q| q.object)
        .collect();
    assert_eq!(notes.len(), 2);
    assert!(notes.iter().all(Term::is_blank));
    assert_ne!(notes[0], notes[1]);
    assert!(consistent(&engine, &ns));
}

#[test]
fn no_solutions_means_no_write() {
    let (engine, ns) = setup();
    let report = engine
        .execute_update(
            &ns,
            r#"DELETE { ?s ?p ?o } INSERT { ?s ?p "new" } WHERE { ?s <http://ex.org/missing> ?o . ?s ?p ?o }"#,
        )
        .unwrap();
    assert_eq!(report.solutions, 0);
    assert_eq!((report.apply.deleted, report.apply.inserted), (0, 0));
    assert!(relational_quads(&engine, &ns).is_empty());
}

#[test]
fn unsupported_constructs_write_nothing() {
    let (engine, ns) = setup();
    let statements = [
        "CLEAR ALL",
        "DROP GRAPH <http://ex.org/g>",
        r#"INSERT { ?s <http://ex.org/p> 1 } WHERE { ?s ?p ?o FILTER(?o > 1) }"#,
        r#"DELETE { ?s ?p ?o } WHERE { OPTIONAL { ?s ?p ?o } }"#,
        r#"INSERT DATA { <http://ex.org/a> <http://ex.org/p> 1 } ; INSERT DATA { <http://ex.org/a> <http://ex.org/p> 2 }"#,
    ];
    for statement in statements {
        let err = engine.execute_update(&ns, statement).unwrap_err();
        assert!(
            matches!(err, SyncError::Parse(ParseError::Unsupported { .. })),
            "{statement}: {err:?}"
        );
    }
    assert!(relational_quads(&engine, &ns).is_empty());
}

#[test]
fn syntax_errors_point_at_the_problem() {
    let (engine, ns) = setup();
    let err = engine
        .execute_update(&ns, r#"INSERT DATA { <http://ex.org/a> <http://ex.org/p> }"#)
        .unwrap_err();
    match err {
        SyncError::Parse(ParseError::Syntax { offset, .. }) => assert!(offset > 0),
        other => panic!("expected syntax error, got {other:?}"),
    }

    let err = engine
        .execute_update(&ns, "INSERT DATA { ex:a ex:p 1 }")
        .unwrap_err();
    assert!(matches!(
        err,
        SyncError::Parse(ParseError::UndefinedPrefix { .. })
    ));
}
