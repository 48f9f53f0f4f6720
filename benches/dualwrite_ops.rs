//! Benchmarks for the write path building blocks.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use kg_dualwrite::diff::build_replace_diff;
use kg_dualwrite::space::SpaceId;
use kg_dualwrite::store::RelationalStore;
use kg_dualwrite::term::Term;
use kg_dualwrite::unit::discovery::UnitDiscovery;
use kg_dualwrite::unit::render::render_unit;
use kg_dualwrite::unit::{FrameState, GraphObject, InnerState, UnitSchema, UnitState};
use kg_dualwrite::update::parse_update;

fn unit(frames: usize, value: &str) -> UnitState {
    let mut state = UnitState::entity(
        GraphObject::new(Term::iri("http://ex.org/root")).with("http://ex.org/name", Term::literal("root")),
    );
    for i in 0..frames {
        state.frames.push(FrameState {
            inner: InnerState {
                frame: GraphObject::new(Term::iri(format!("http://ex.org/f{i}"))),
                slots: (0..4)
                    .map(|s| {
                        GraphObject::new(Term::iri(format!("http://ex.org/f{i}/s{s}")))
                            .with("http://ex.org/v", Term::literal(value))
                    })
                    .collect(),
            },
            children: Vec::new(),
        });
    }
    state
}

fn bench_intern(c: &mut Criterion) {
    let store = RelationalStore::in_memory().unwrap();
    let ns = SpaceId::new("bench").unwrap();
    store.create_space(&ns).unwrap();
    let terms: Vec<Term> = (0..1_000)
        .map(|i| Term::iri(format!("http://ex.org/term/{i}")))
        .collect();

    // Interning inside one transaction; every term after the first pass
    // is a lookup hit.
    c.bench_function("intern_1k", |bench| {
        bench.iter(|| {
            let mut tx = store.begin(&ns).unwrap();
            for term in &terms {
                black_box(tx.intern(term).unwrap());
            }
            tx.commit().unwrap();
        })
    });
}

fn bench_parse(c: &mut Criterion) {
    let statement = r#"PREFIX ex: <http://ex.org/>
        DELETE { ?s ex:p ?o } INSERT { ?s ex:p "v2" ; ex:seen true }
        WHERE { ?s a ex:T . ?s ex:p ?o . GRAPH ?g { ?s ex:q ?o } }"#;

    c.bench_function("parse_modify", |bench| {
        bench.iter(|| black_box(parse_update(statement).unwrap()))
    });
}

fn bench_render_diff(c: &mut Criterion) {
    let schema = UnitSchema::default();
    let old = render_unit(&schema, &unit(50, "a")).unwrap();
    let new = render_unit(&schema, &unit(50, "b")).unwrap();

    c.bench_function("render_diff_50_frames", |bench| {
        bench.iter(|| black_box(build_replace_diff(old.iter().cloned(), new.iter().cloned())))
    });
}

fn bench_discovery(c: &mut Criterion) {
    let schema = UnitSchema::default();
    let store = RelationalStore::in_memory().unwrap();
    let ns = SpaceId::new("bench").unwrap();
    store.create_space(&ns).unwrap();
    let mut tx = store.begin(&ns).unwrap();
    tx.insert_quads(&render_unit(&schema, &unit(50, "a")).unwrap()).unwrap();
    tx.commit().unwrap();

    let snapshot = store.snapshot(&ns).unwrap();
    let discovery = UnitDiscovery::new(&schema, 64);
    let root = Term::iri("http://ex.org/root");

    c.bench_function("discover_50_frames", |bench| {
        bench.iter(|| black_box(discovery.discover_outer(&snapshot, &root).unwrap()))
    });
}

criterion_group!(benches, bench_intern, bench_parse, bench_render_diff, bench_discovery);
criterion_main!(benches);
