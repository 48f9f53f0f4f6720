//! End-to-end tests for the dual-write path: both stores stay in step,
//! mirror failures degrade instead of failing, and resync repairs them.

mod common;

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};

use common::{SwitchableStore, engine_with, entity, iri, ns1};
use kg_dualwrite::consistency::{ValidationMode, ensure_consistent};
use kg_dualwrite::coordinator::{ApplyOutcome, UnitScope};
use kg_dualwrite::diff::QuadDiff;
use kg_dualwrite::engine::{MutationRequest, Operation, SyncEngine};
use kg_dualwrite::error::{DiscoveryError, SyncError};
use kg_dualwrite::quad::Quad;
use kg_dualwrite::space::{PendingResync, SpaceId, SyncState};
use kg_dualwrite::term::Term;
use kg_dualwrite::triplestore::{TripleStore, TripleStoreView};
use kg_dualwrite::unit::{GraphObject, UnitState};
use kg_dualwrite::unit::discovery::UnitDiscovery;
use kg_dualwrite::unit::render::render_unit;

fn replace(space: &SpaceId, state: UnitState) -> MutationRequest {
    MutationRequest {
        space: space.clone(),
        root: state.root.id.clone(),
        kind: state.kind,
        operation: Operation::Replace(state),
    }
}

fn assert_consistent(engine: &SyncEngine, space: &SpaceId) {
    let report = engine.validate(space, ValidationMode::Full).unwrap();
    assert!(report.consistent, "stores diverge: {report:?}");
}

#[test]
fn property_update_reaches_both_stores() {
    let store = SwitchableStore::new();
    let engine = engine_with(store.clone());
    let ns = ns1();
    engine.create_space(&ns).unwrap();

    engine
        .execute_update(&ns, r#"INSERT DATA { <http://ex.org/R1> <http://ex.org/P1> "v1" }"#)
        .unwrap();
    let report = engine
        .execute_update(
            &ns,
            r#"PREFIX ex: <http://ex.org/>
               DELETE { ex:R1 ex:P1 ?old } INSERT { ex:R1 ex:P1 "v2" }
               WHERE { ex:R1 ex:P1 ?old }"#,
        )
        .unwrap();
    assert_eq!(report.apply.outcome, ApplyOutcome::Synced);
    assert_eq!((report.apply.deleted, report.apply.inserted), (1, 1));

    let expected = vec![Quad::triple(iri("R1"), iri("P1"), Term::literal("v2")).unwrap()];
    let relational = engine
        .coordinator()
        .relational()
        .snapshot(&ns)
        .unwrap()
        .all_quads()
        .unwrap();
    assert_eq!(relational, expected);
    assert_eq!(store.all_quads(&ns).unwrap(), expected);
    assert_consistent(&engine, &ns);
}

#[test]
fn root_only_unit_replace_v1_to_v2() {
    let store = SwitchableStore::new();
    let engine = engine_with(store.clone());
    let ns = ns1();
    engine.create_space(&ns).unwrap();

    for value in ["v1", "v2"] {
        let state = UnitState::entity(GraphObject::new(iri("R1")).with("http://ex.org/P1", Term::literal(value)));
        engine.submit(&replace(&ns, state)).unwrap();

        let expected = vec![Quad::triple(iri("R1"), iri("P1"), Term::literal(value)).unwrap()];
        let relational = engine
            .coordinator()
            .relational()
            .snapshot(&ns)
            .unwrap()
            .all_quads()
            .unwrap();
        assert_eq!(relational, expected);
        assert_eq!(store.all_quads(&ns).unwrap(), expected);

        let rows = store
            .execute_query(&ns, "SELECT ?s ?p ?o WHERE { ?s ?p ?o }")
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["o"], Term::literal(value));
    }
}

#[test]
fn unit_discovered_identically_in_both_stores() {
    let store = SwitchableStore::new();
    let engine = engine_with(store.clone());
    let ns = ns1();
    engine.create_space(&ns).unwrap();

    let state = entity("R1", &[("F1", "a"), ("F2", "b")]);
    engine.submit(&replace(&ns, state.clone())).unwrap();

    let relational = engine.discover_unit(&ns, &iri("R1")).unwrap();
    let discovery = UnitDiscovery::new(engine.schema(), 64);
    let mirrored = discovery
        .discover_outer(&TripleStoreView::new(&*store, &ns), &iri("R1"))
        .unwrap();
    assert!(relational.is_well_formed());
    assert!(mirrored.is_well_formed());
    assert_eq!(relational.quads, mirrored.quads);

    let rendered: BTreeSet<Quad> = render_unit(engine.schema(), &state).unwrap().into_iter().collect();
    assert_eq!(relational.quads, rendered);

    // Replaying the same state changes nothing.
    let again = engine.submit(&replace(&ns, state)).unwrap();
    assert_eq!((again.deleted, again.inserted), (0, 0));
}

#[test]
fn replace_swaps_only_changed_quads() {
    let engine = engine_with(SwitchableStore::new());
    let ns = ns1();
    engine.create_space(&ns).unwrap();

    engine.submit(&replace(&ns, entity("R1", &[("F1", "a"), ("F2", "b")]))).unwrap();
    let report = engine
        .submit(&replace(&ns, entity("R1", &[("F1", "a"), ("F2", "c")])))
        .unwrap();
    assert_eq!((report.deleted, report.inserted), (1, 1));

    // Dropping a frame removes its slot, both edges and all its quads.
    let report = engine.submit(&replace(&ns, entity("R1", &[("F1", "a")]))).unwrap();
    assert_eq!(report.inserted, 0);
    assert!(report.deleted > 4);
    let unit = engine.discover_unit(&ns, &iri("R1")).unwrap();
    assert_eq!(unit.units.len(), 1);
    assert_consistent(&engine, &ns);
}

#[test]
fn mirror_outage_degrades_and_resync_recovers() {
    let store = SwitchableStore::new();
    let engine = engine_with(store.clone());
    let ns = ns1();
    engine.create_space(&ns).unwrap();
    engine.submit(&replace(&ns, entity("R1", &[("F1", "a")]))).unwrap();

    store.set_down(true);
    let report = engine
        .submit(&replace(&ns, entity("R1", &[("F1", "changed")])))
        .unwrap();
    assert!(report.outcome.is_degraded());

    // The relational store holds the new state; the mirror does not.
    let unit = engine.discover_unit(&ns, &iri("R1")).unwrap();
    assert!(unit.quads.iter().any(|q| q.object == Term::literal("changed")));
    let validation = engine.validate(&ns, ValidationMode::Full).unwrap();
    assert!(!validation.consistent);
    assert!(validation.missing_total > 0);
    assert!(matches!(
        ensure_consistent(&validation),
        Err(SyncError::Consistency(_))
    ));
    match engine.sync_state(&ns).unwrap() {
        SyncState::Degraded {
            pending: PendingResync::Units(roots),
            ..
        } => assert_eq!(roots, BTreeSet::from(["http://ex.org/R1".to_string()])),
        other => panic!("expected degraded, got {other:?}"),
    }

    // Resync while the store is still down keeps the space degraded.
    assert!(engine.resync_pending(&ns).is_err());
    assert!(engine.sync_state(&ns).unwrap().is_degraded());

    store.set_down(false);
    let reports = engine.resync_pending(&ns).unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(engine.sync_state(&ns).unwrap(), SyncState::InSync);
    assert_consistent(&engine, &ns);
}

#[test]
fn updates_on_degraded_space_resolve_against_relational_store() {
    let store = SwitchableStore::new();
    let engine = engine_with(store.clone());
    let ns = ns1();
    engine.create_space(&ns).unwrap();

    store.set_down(true);
    engine
        .execute_update(&ns, r#"INSERT DATA { <http://ex.org/R1> <http://ex.org/P1> "v1" }"#)
        .unwrap();
    // Only the relational store knows about v1, so the pattern must be
    // matched there.
    let report = engine
        .execute_update(
            &ns,
            r#"DELETE WHERE { <http://ex.org/R1> <http://ex.org/P1> ?o }"#,
        )
        .unwrap();
    assert_eq!(report.solutions, 1);
    assert_eq!(report.apply.deleted, 1);

    store.set_down(false);
    engine.resync(&ns, None).unwrap();
    assert_consistent(&engine, &ns);
    assert_eq!(engine.space_status(&ns).unwrap().quads, 0);
}

#[test]
fn full_resync_is_idempotent() {
    let engine = engine_with(SwitchableStore::new());
    let ns = ns1();
    engine.create_space(&ns).unwrap();
    engine.submit(&replace(&ns, entity("R1", &[("F1", "a"), ("F2", "b")]))).unwrap();
    engine.submit(&replace(&ns, entity("R2", &[("F3", "c")]))).unwrap();

    let first = engine.resync(&ns, None).unwrap();
    let second = engine.resync(&ns, None).unwrap();
    assert_eq!(first.written, second.written);
    assert_eq!(first.written as u64, engine.space_status(&ns).unwrap().quads);
    assert_consistent(&engine, &ns);
}

#[test]
fn unit_resync_repairs_drifted_mirror() {
    let store = SwitchableStore::new();
    let engine = engine_with(store.clone());
    let ns = ns1();
    engine.create_space(&ns).unwrap();
    engine.submit(&replace(&ns, entity("R1", &[("F1", "a")]))).unwrap();

    // Drift the mirror behind the engine's back.
    store
        .execute_update(&ns, r#"DELETE WHERE { ?s <http://ex.org/v> ?o }"#)
        .unwrap();
    store
        .execute_update(&ns, r#"INSERT DATA { <http://ex.org/F1> <http://ex.org/junk> "x" }"#)
        .unwrap();
    assert!(!engine.validate_unit(&ns, &iri("R1")).unwrap().consistent);

    let report = engine.resync(&ns, Some(&iri("R1"))).unwrap();
    assert_eq!((report.removed, report.written), (1, 1));
    assert!(engine.validate_unit(&ns, &iri("R1")).unwrap().consistent);
    assert_consistent(&engine, &ns);
}

#[test]
fn relational_failure_leaves_both_stores_untouched() {
    let store = SwitchableStore::new();
    let engine = engine_with(store.clone());
    let ns = ns1();
    engine.create_space(&ns).unwrap();

    let missing = SpaceId::new("missing").unwrap();
    assert!(engine.submit(&replace(&missing, entity("R1", &[("F1", "a")]))).is_err());
    assert!(engine
        .execute_update(&missing, r#"INSERT DATA { <http://ex.org/R1> <http://ex.org/P1> "v" }"#)
        .is_err());
    assert_eq!(engine.space_status(&ns).unwrap().quads, 0);
    assert_eq!(store.count_quads(&ns).unwrap(), 0);
}

#[test]
fn failed_insert_rolls_back_the_delete_half() {
    let store = SwitchableStore::new();
    let engine = engine_with(store.clone());
    let ns = ns1();
    engine.create_space(&ns).unwrap();
    engine.submit(&replace(&ns, entity("R1", &[("F1", "a")]))).unwrap();
    let before = engine.discover_unit(&ns, &iri("R1")).unwrap().quads;
    assert!(!before.is_empty());

    // The delete half is valid; the insert half has a literal subject and
    // fails after the deletes already ran inside the transaction.
    let invalid = Quad {
        subject: Term::literal("not a node"),
        predicate: iri("P1"),
        object: Term::literal("v"),
        graph: Default::default(),
    };
    let diff = QuadDiff::new(before.iter().cloned(), [invalid]);
    let coordinator = engine.coordinator();
    let guard = coordinator.lock(UnitScope::unit(&ns, &iri("R1")));
    let err = coordinator.apply_diff(&guard, &ns, &diff).unwrap_err();
    drop(guard);
    assert!(err.is_relational_transaction(), "{err:?}");

    assert_eq!(engine.discover_unit(&ns, &iri("R1")).unwrap().quads, before);
    assert_eq!(store.count_quads(&ns).unwrap(), before.len() as u64);
    assert_eq!(engine.sync_state(&ns).unwrap(), SyncState::InSync);
    assert_consistent(&engine, &ns);
}

#[test]
fn disagreeing_unit_is_refused() {
    let engine = engine_with(SwitchableStore::new());
    let ns = ns1();
    engine.create_space(&ns).unwrap();
    engine.submit(&replace(&ns, entity("R1", &[("F1", "a")]))).unwrap();

    // A node that claims membership without any connecting edge.
    let marker = engine.schema().outer_marker();
    engine
        .execute_update(
            &ns,
            &format!(
                "INSERT DATA {{ <http://ex.org/stray> <{}> <http://ex.org/R1> . \
                 <http://ex.org/stray> <http://ex.org/v> \"s\" }}",
                marker.lexical()
            ),
        )
        .unwrap();

    let unit = engine.discover_unit(&ns, &iri("R1")).unwrap();
    assert!(!unit.is_well_formed());
    assert_eq!(unit.agreement.marker_only.len(), 2);

    let err = engine
        .submit(&replace(&ns, entity("R1", &[("F1", "b")])))
        .unwrap_err();
    assert!(matches!(
        err,
        SyncError::Discovery(DiscoveryError::Disagreement { .. })
    ));
}

#[test]
fn stealing_another_units_slot_is_refused() {
    let engine = engine_with(SwitchableStore::new());
    let ns = ns1();
    engine.create_space(&ns).unwrap();
    engine.submit(&replace(&ns, entity("R1", &[("F1", "a")]))).unwrap();
    engine.submit(&replace(&ns, entity("R2", &[("F2", "b")]))).unwrap();
    let before = engine.space_status(&ns).unwrap().quads;

    // R2 claims F1's slot id under a new frame.
    let mut thief = entity("R2", &[("F9", "x")]);
    thief.frames[0].inner.slots[0].id = iri("F1/slot");
    let err = engine.submit(&replace(&ns, thief)).unwrap_err();
    assert!(err.is_ownership());
    assert_eq!(engine.space_status(&ns).unwrap().quads, before);
    assert_consistent(&engine, &ns);
}

#[test]
fn concurrent_writers_keep_stores_consistent() {
    let engine = engine_with(SwitchableStore::new());
    let ns = ns1();
    engine.create_space(&ns).unwrap();

    let schema = engine.schema().clone();
    let unit_size = render_unit(&schema, &entity("x", &[("x-frame", "v")]))
        .unwrap()
        .len();
    let writing = AtomicBool::new(true);
    let roots: Vec<Term> = std::iter::once(iri("shared"))
        .chain((1..8).step_by(2).map(|w| iri(&format!("own{w}"))))
        .collect();

    std::thread::scope(|scope| {
        // A reader sees each unit either absent or whole, never mid-write.
        let reader = scope.spawn(|| {
            while writing.load(Ordering::Acquire) {
                for root in &roots {
                    let unit = engine.discover_unit(&ns, root).unwrap();
                    if unit.is_empty() {
                        continue;
                    }
                    assert!(unit.is_well_formed(), "{root} torn: {:?}", unit.agreement);
                    assert_eq!(unit.quads.len(), unit_size, "{root} partially written");
                    let values = unit.quads.iter().filter(|q| q.predicate == iri("v")).count();
                    assert_eq!(values, 1, "{root} mixes two writers");
                }
            }
        });

        let writers: Vec<_> = (0..8)
            .map(|worker| {
                let engine = &engine;
                let ns = &ns;
                scope.spawn(move || {
                    for round in 0..5 {
                        // Half the writers contend on one shared unit.
                        let root = if worker % 2 == 0 {
                            "shared".to_string()
                        } else {
                            format!("own{worker}")
                        };
                        let frame = format!("{root}-frame");
                        let value = format!("w{worker}r{round}");
                        let state = entity(&root, &[(frame.as_str(), value.as_str())]);
                        engine.submit(&replace(ns, state)).unwrap();
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }
        writing.store(false, Ordering::Release);
        reader.join().unwrap();
    });

    for root in &roots {
        let unit = engine.discover_unit(&ns, root).unwrap();
        assert!(unit.is_well_formed());
        assert_eq!(unit.quads.len(), unit_size);
    }
    assert_consistent(&engine, &ns);
    let shared = engine.discover_unit(&ns, &iri("shared")).unwrap();
    assert!(shared.is_well_formed());
    let values: Vec<_> = shared
        .quads
        .iter()
        .filter(|q| q.predicate == iri("v"))
        .collect();
    assert_eq!(values.len(), 1, "exactly one writer's state survives");
}

#[test]
fn drop_space_removes_both_sides() {
    let store = SwitchableStore::new();
    let engine = engine_with(store.clone());
    let ns = ns1();
    engine.create_space(&ns).unwrap();
    engine.submit(&replace(&ns, entity("R1", &[("F1", "a")]))).unwrap();

    assert!(engine.drop_space(&ns).unwrap());
    assert!(engine.space_status(&ns).is_err());
    engine.create_space(&ns).unwrap();
    assert_eq!(store.count_quads(&ns).unwrap(), 0);
}

#[test]
fn failed_triple_store_create_undoes_relational_space() {
    let store = SwitchableStore::new();
    let engine = engine_with(store.clone());
    let ns = ns1();

    store.set_down(true);
    assert!(engine.create_space(&ns).is_err());
    assert!(engine.list_spaces().unwrap().is_empty());
}
