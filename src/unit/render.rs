//! Rendering unit states into quads.
//!
//! The output is deterministic: edge node ids are derived from the source
//! node, the edge kind and a per-(source, kind) counter, so rendering the
//! same state twice yields the same quads.

use std::collections::BTreeMap;

use crate::error::SyncResult;
use crate::quad::{GraphName, Quad};
use crate::term::{RDF_TYPE, Term};

use super::{EdgeKind, FrameState, GraphObject, InnerState, UnitKind, UnitSchema, UnitState};

/// Render a full outer unit.
pub fn render_unit(schema: &UnitSchema, state: &UnitState) -> SyncResult<Vec<Quad>> {
    state.validate()?;
    let mut renderer = Renderer::new(schema, &state.root.id);
    renderer.object(&state.root)?;
    for slot in &state.slots {
        renderer.slot(&state.root, slot)?;
    }
    let frame_edge = match state.kind {
        UnitKind::Entity => EdgeKind::EntityFrame,
        UnitKind::Frame => EdgeKind::ChildFrame,
    };
    for frame in &state.frames {
        renderer.frame(&state.root, frame_edge, frame)?;
    }
    Ok(renderer.out)
}

/// Render one inner unit of the outer unit rooted at `root`: the frame,
/// its slots and the frame→slot edges. Edges into the frame and child
/// frames are not part of the inner unit.
pub fn render_inner(schema: &UnitSchema, root: &Term, inner: &InnerState) -> SyncResult<Vec<Quad>> {
    inner.validate(&inner.frame.id)?;
    let mut renderer = Renderer::new(schema, root);
    renderer.object(&inner.frame)?;
    for slot in &inner.slots {
        renderer.slot(&inner.frame, slot)?;
    }
    Ok(renderer.out)
}

/// Deterministic id of the `n`th edge of `kind` leaving `source`.
pub fn edge_id(source: &Term, kind: EdgeKind, n: usize) -> Term {
    match source {
        Term::Blank(label) => Term::Blank(format!("{label}-{}-{n}", kind.slug())),
        other => Term::Iri(format!("{}/edge/{}/{n}", other.lexical(), kind.slug())),
    }
}

struct Renderer<'a> {
    schema: &'a UnitSchema,
    root: &'a Term,
    counters: BTreeMap<(Term, EdgeKind), usize>,
    out: Vec<Quad>,
}

impl<'a> Renderer<'a> {
    fn new(schema: &'a UnitSchema, root: &'a Term) -> Self {
        Self {
            schema,
            root,
            counters: BTreeMap::new(),
            out: Vec::new(),
        }
    }

    fn push(&mut self, subject: &Term, predicate: Term, object: Term, graph: &GraphName) -> SyncResult<()> {
        self.out
            .push(Quad::new(subject.clone(), predicate, object, graph.clone())?);
        Ok(())
    }

    /// Properties plus the outer marker. The root never marks itself.
    fn object(&mut self, object: &GraphObject) -> SyncResult<()> {
        for (predicate, value) in &object.properties {
            self.push(&object.id, Term::iri(predicate.as_str()), value.clone(), &object.graph)?;
        }
        if object.id != *self.root {
            self.push(&object.id, self.schema.outer_marker(), self.root.clone(), &object.graph)?;
        }
        Ok(())
    }

    fn slot(&mut self, frame: &GraphObject, slot: &GraphObject) -> SyncResult<()> {
        self.object(slot)?;
        self.push(&slot.id, self.schema.inner_marker(), frame.id.clone(), &slot.graph)?;
        self.edge(frame, &slot.id, EdgeKind::FrameSlot)
    }

    fn frame(&mut self, parent: &GraphObject, kind: EdgeKind, frame: &FrameState) -> SyncResult<()> {
        let node = &frame.inner.frame;
        self.object(node)?;
        self.edge(parent, &node.id, kind)?;
        for slot in &frame.inner.slots {
            self.slot(node, slot)?;
        }
        for child in &frame.children {
            self.frame(node, EdgeKind::ChildFrame, child)?;
        }
        Ok(())
    }

    /// A reified edge node, stored in the source's graph.
    fn edge(&mut self, source: &GraphObject, destination: &Term, kind: EdgeKind) -> SyncResult<()> {
        let counter = self.counters.entry((source.id.clone(), kind)).or_default();
        let edge = edge_id(&source.id, kind, *counter);
        *counter += 1;
        let graph = &source.graph;
        self.push(&edge, Term::iri(RDF_TYPE), self.schema.edge_type(kind), graph)?;
        self.push(&edge, self.schema.edge_source(), source.id.clone(), graph)?;
        self.push(&edge, self.schema.edge_destination(), destination.clone(), graph)?;
        self.push(&edge, self.schema.outer_marker(), self.root.clone(), graph)
    }
}
