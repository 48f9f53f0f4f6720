//! Graph-unit discovery.
//!
//! Two independent strategies find the quads of an outer unit:
//!
//! - **edge-walk**: breadth-first from the root over reified edge nodes,
//!   in both directions, collecting every node and edge reached
//! - **marker-scan**: the root plus every subject whose outer grouping
//!   marker points at the root
//!
//! A unit is well-formed only when both agree. Disagreement is reported,
//! never repaired. Both strategies read through [`QuadSource`], so the same
//! code discovers units in the relational store and in the triple store.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::error::{DiscoveryError, SyncResult};
use crate::quad::{Quad, QuadSet};
use crate::term::{RDF_TYPE, Term};

use super::{EdgeKind, UnitSchema};

/// Default bound on traversal depth.
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Pattern access to the quads of one space, across all graphs.
pub trait QuadSource {
    fn quads_matching(
        &self,
        subject: Option<&Term>,
        predicate: Option<&Term>,
        object: Option<&Term>,
    ) -> SyncResult<Vec<Quad>>;
}

impl<T: QuadSource + ?Sized> QuadSource for &T {
    fn quads_matching(
        &self,
        subject: Option<&Term>,
        predicate: Option<&Term>,
        object: Option<&Term>,
    ) -> SyncResult<Vec<Quad>> {
        (**self).quads_matching(subject, predicate, object)
    }
}

/// A reified connecting edge.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct EdgeLink {
    pub edge: Term,
    pub kind: Option<EdgeKind>,
    pub source: Option<Term>,
    pub destination: Option<Term>,
}

/// An inner unit found inside an outer unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InnerUnit {
    pub frame: Term,
    /// The node whose edge reaches this frame; `None` for a frame root.
    pub parent: Option<Term>,
    pub slots: Vec<Term>,
}

/// Quads found by only one strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Agreement {
    pub edge_only: Vec<Quad>,
    pub marker_only: Vec<Quad>,
}

impl Agreement {
    pub fn is_agreed(&self) -> bool {
        self.edge_only.is_empty() && self.marker_only.is_empty()
    }
}

/// Result of discovering an outer unit.
#[derive(Debug, Clone)]
pub struct DiscoveryReport {
    pub root: Term,
    /// Inner units (frames with their slots).
    pub units: Vec<InnerUnit>,
    /// Structural nodes reached by the edge walk, root included.
    pub nodes: BTreeSet<Term>,
    pub edges: Vec<EdgeLink>,
    /// Union of both strategies.
    pub quads: QuadSet,
    pub agreement: Agreement,
}

impl DiscoveryReport {
    pub fn is_empty(&self) -> bool {
        self.quads.is_empty()
    }

    pub fn is_well_formed(&self) -> bool {
        self.agreement.is_agreed()
    }

    pub fn require_well_formed(self) -> Result<Self, DiscoveryError> {
        if self.is_well_formed() {
            Ok(self)
        } else {
            Err(DiscoveryError::Disagreement {
                root: self.root.lexical().to_string(),
                edge_only: self.agreement.edge_only.len(),
                marker_only: self.agreement.marker_only.len(),
            })
        }
    }

    pub fn unit(&self, frame: &Term) -> Option<&InnerUnit> {
        self.units.iter().find(|u| &u.frame == frame)
    }

    /// The frame, its descendant frames, and all their slots.
    pub fn frame_subtree(&self, frame: &Term) -> BTreeSet<Term> {
        let mut subtree = BTreeSet::new();
        let mut queue = VecDeque::from([frame.clone()]);
        while let Some(next) = queue.pop_front() {
            if !subtree.insert(next.clone()) {
                continue;
            }
            for link in &self.edges {
                if link.source.as_ref() == Some(&next) {
                    if let Some(dst) = &link.destination {
                        if link.kind != Some(EdgeKind::EntityFrame) {
                            queue.push_back(dst.clone());
                        }
                    }
                }
            }
        }
        subtree
    }

    /// Quads removed by deleting the inner unit `frame`: the frame subtree
    /// plus every edge node touching it.
    pub fn frame_subtree_quads(&self, frame: &Term) -> QuadSet {
        let subtree = self.frame_subtree(frame);
        let touches = |t: &Option<Term>| t.as_ref().is_some_and(|t| subtree.contains(t));
        let edges: BTreeSet<&Term> = self
            .edges
            .iter()
            .filter(|l| touches(&l.source) || touches(&l.destination))
            .map(|l| &l.edge)
            .collect();
        self.quads
            .iter()
            .filter(|q| subtree.contains(&q.subject) || edges.contains(&q.subject))
            .cloned()
            .collect()
    }
}

/// Result of discovering an inner unit.
#[derive(Debug, Clone)]
pub struct InnerDiscovery {
    pub frame: Term,
    pub slots: BTreeSet<Term>,
    /// Frame→slot edge nodes.
    pub edges: BTreeSet<Term>,
    pub quads: QuadSet,
    pub agreement: Agreement,
}

/// Finds units through a [`QuadSource`].
#[derive(Debug, Clone, Copy)]
pub struct UnitDiscovery<'a> {
    schema: &'a UnitSchema,
    max_depth: usize,
}

impl<'a> UnitDiscovery<'a> {
    pub fn new(schema: &'a UnitSchema, max_depth: usize) -> Self {
        Self { schema, max_depth }
    }

    /// Discover the outer unit rooted at `root`. An unknown root yields an
    /// empty report.
    pub fn discover_outer(&self, source: &dyn QuadSource, root: &Term) -> SyncResult<DiscoveryReport> {
        let walk = self.edge_walk(source, root)?;

        let by_edges = subject_quads(
            source,
            walk.nodes.iter().chain(walk.edges.iter().map(|l| &l.edge)),
        )?;
        let by_marker = self.marker_scan(source, root)?;

        let agreement = Agreement {
            edge_only: by_edges.difference(&by_marker).cloned().collect(),
            marker_only: by_marker.difference(&by_edges).cloned().collect(),
        };
        if !agreement.is_agreed() {
            tracing::warn!(
                root = %root,
                edge_only = agreement.edge_only.len(),
                marker_only = agreement.marker_only.len(),
                "unit discovery strategies disagree"
            );
        }

        let units = classify(root, &walk.edges);
        let mut quads = by_edges;
        quads.extend(by_marker);
        Ok(DiscoveryReport {
            root: root.clone(),
            units,
            nodes: walk.nodes,
            edges: walk.edges,
            quads,
            agreement,
        })
    }

    /// Discover an inner unit: the frame, its slots and frame→slot edges.
    pub fn discover_inner(&self, source: &dyn QuadSource, frame: &Term) -> SyncResult<InnerDiscovery> {
        let mut slots_by_edge = BTreeSet::new();
        let mut edges = BTreeSet::new();
        for link in self.links_touching(source, frame)? {
            if link.kind == Some(EdgeKind::FrameSlot) && link.source.as_ref() == Some(frame) {
                if let Some(slot) = link.destination {
                    slots_by_edge.insert(slot);
                }
                edges.insert(link.edge);
            }
        }
        let slots_by_marker: BTreeSet<Term> = source
            .quads_matching(None, Some(&self.schema.inner_marker()), Some(frame))?
            .into_iter()
            .map(|q| q.subject)
            .collect();

        let frame_quads = subject_quads(source, [frame])?;
        let edge_quads = subject_quads(source, &edges)?;
        let by_edges = subject_quads(source, &slots_by_edge)?;
        let by_marker = subject_quads(source, &slots_by_marker)?;

        let agreement = Agreement {
            edge_only: by_edges.difference(&by_marker).cloned().collect(),
            marker_only: by_marker.difference(&by_edges).cloned().collect(),
        };
        let mut quads = frame_quads;
        quads.extend(edge_quads);
        quads.extend(by_edges);
        quads.extend(by_marker);
        let mut slots = slots_by_edge;
        slots.extend(slots_by_marker);
        Ok(InnerDiscovery {
            frame: frame.clone(),
            slots,
            edges,
            quads,
            agreement,
        })
    }

    /// The outer root owning `subject`: the target of its outer marker, or
    /// the subject itself when it carries none.
    pub fn owning_root(&self, source: &dyn QuadSource, subject: &Term) -> SyncResult<Term> {
        let owners = self.marker_targets(source, subject)?;
        Ok(owners.into_iter().next().unwrap_or_else(|| subject.clone()))
    }

    /// Reject an inner unit that is not reachable from `root`.
    ///
    /// The root itself is always accepted and listed as a frame, even when
    /// it has no slots or child frames yet; callers reject entity roots.
    pub fn check_ownership(
        &self,
        source: &dyn QuadSource,
        root: &Term,
        inner: &Term,
    ) -> SyncResult<DiscoveryReport> {
        let mut report = self.discover_outer(source, root)?;
        if inner == root && report.unit(root).is_none() {
            report.units.insert(
                0,
                InnerUnit {
                    frame: root.clone(),
                    parent: None,
                    slots: Vec::new(),
                },
            );
        }
        if report.unit(inner).is_some() {
            return Ok(report);
        }
        let owner = self.marker_targets(source, inner)?.into_iter().next();
        Err(DiscoveryError::Ownership {
            root: root.lexical().to_string(),
            unit: inner.lexical().to_string(),
            owner: owner.map(|o| o.lexical().to_string()),
        }
        .into())
    }

    /// Reject node ids that already belong to a different outer unit.
    ///
    /// An id is foreign if its outer marker names another root, or if it
    /// has quads of its own without any marker (it is a root itself).
    pub fn check_foreign_ids<'t>(
        &self,
        source: &dyn QuadSource,
        root: &Term,
        ids: impl IntoIterator<Item = &'t Term>,
    ) -> SyncResult<()> {
        for id in ids {
            if id == root {
                continue;
            }
            let owners = self.marker_targets(source, id)?;
            let foreign = if owners.is_empty() {
                let own_quads = source.quads_matching(Some(id), None, None)?;
                let is_root = !source
                    .quads_matching(None, Some(&self.schema.outer_marker()), Some(id))?
                    .is_empty();
                (!own_quads.is_empty() || is_root).then(|| id.clone())
            } else {
                owners.into_iter().find(|owner| owner != root)
            };
            if let Some(owner) = foreign {
                return Err(DiscoveryError::Ownership {
                    root: root.lexical().to_string(),
                    unit: id.lexical().to_string(),
                    owner: Some(owner.lexical().to_string()),
                }
                .into());
            }
        }
        Ok(())
    }

    /// Reject slot ids for `inner` that already play another role in the
    /// outer unit of `report`: its root, one of its frames, or a slot of a
    /// different frame.
    pub fn check_slot_ids<'t>(
        &self,
        source: &dyn QuadSource,
        report: &DiscoveryReport,
        inner: &Term,
        ids: impl IntoIterator<Item = &'t Term>,
    ) -> SyncResult<()> {
        let inner_marker = self.schema.inner_marker();
        for id in ids {
            let holder = if *id == report.root || report.unit(id).is_some() {
                Some(id.clone())
            } else if let Some(unit) = report
                .units
                .iter()
                .find(|u| u.frame != *inner && u.slots.contains(id))
            {
                Some(unit.frame.clone())
            } else {
                source
                    .quads_matching(Some(id), Some(&inner_marker), None)?
                    .into_iter()
                    .map(|q| q.object)
                    .find(|frame| frame != inner)
            };
            if let Some(holder) = holder {
                tracing::debug!(slot = %id, frame = %inner, held_by = %holder, "slot id already in use");
                return Err(DiscoveryError::Ownership {
                    root: inner.lexical().to_string(),
                    unit: id.lexical().to_string(),
                    owner: Some(holder.lexical().to_string()),
                }
                .into());
            }
        }
        Ok(())
    }

    fn marker_targets(&self, source: &dyn QuadSource, subject: &Term) -> SyncResult<BTreeSet<Term>> {
        Ok(source
            .quads_matching(Some(subject), Some(&self.schema.outer_marker()), None)?
            .into_iter()
            .map(|q| q.object)
            .collect())
    }

    fn marker_scan(&self, source: &dyn QuadSource, root: &Term) -> SyncResult<QuadSet> {
        let mut quads: QuadSet = source.quads_matching(Some(root), None, None)?.into_iter().collect();
        let members: BTreeSet<Term> = source
            .quads_matching(None, Some(&self.schema.outer_marker()), Some(root))?
            .into_iter()
            .map(|q| q.subject)
            .collect();
        for member in &members {
            if member != root {
                quads.extend(source.quads_matching(Some(member), None, None)?);
            }
        }
        Ok(quads)
    }

    /// Edge nodes with `node` as source or destination.
    fn links_touching(&self, source: &dyn QuadSource, node: &Term) -> SyncResult<Vec<EdgeLink>> {
        let mut edge_ids = BTreeSet::new();
        for predicate in [self.schema.edge_source(), self.schema.edge_destination()] {
            for quad in source.quads_matching(None, Some(&predicate), Some(node))? {
                edge_ids.insert(quad.subject);
            }
        }
        edge_ids
            .into_iter()
            .map(|edge| self.describe_edge(source, edge))
            .collect()
    }

    fn describe_edge(&self, source: &dyn QuadSource, edge: Term) -> SyncResult<EdgeLink> {
        let mut link = EdgeLink {
            edge,
            kind: None,
            source: None,
            destination: None,
        };
        for quad in source.quads_matching(Some(&link.edge), None, None)? {
            let Term::Iri(predicate) = &quad.predicate else {
                continue;
            };
            if *predicate == self.schema.edge_source {
                link.source = Some(quad.object);
            } else if *predicate == self.schema.edge_destination {
                link.destination = Some(quad.object);
            } else if predicate == RDF_TYPE {
                if let Some(kind) = self.schema.edge_kind(&quad.object) {
                    link.kind = Some(kind);
                }
            }
        }
        Ok(link)
    }

    fn edge_walk(&self, source: &dyn QuadSource, root: &Term) -> SyncResult<Walk> {
        let mut nodes = BTreeSet::from([root.clone()]);
        let mut seen_edges = BTreeSet::new();
        let mut edges = Vec::new();
        let mut queue = VecDeque::from([(root.clone(), 0usize)]);

        while let Some((node, depth)) = queue.pop_front() {
            for link in self.links_touching(source, &node)? {
                if !seen_edges.insert(link.edge.clone()) {
                    continue;
                }
                let other = match (&link.source, &link.destination) {
                    (Some(s), Some(d)) if *s == node => Some(d.clone()),
                    (Some(s), Some(d)) if *d == node => Some(s.clone()),
                    _ => None,
                };
                edges.push(link);
                let Some(other) = other else { continue };
                if nodes.contains(&other) {
                    return Err(DiscoveryError::Cycle {
                        root: root.lexical().to_string(),
                        node: other.lexical().to_string(),
                    }
                    .into());
                }
                if depth + 1 > self.max_depth {
                    return Err(DiscoveryError::DepthExceeded {
                        root: root.lexical().to_string(),
                        max_depth: self.max_depth,
                    }
                    .into());
                }
                nodes.insert(other.clone());
                queue.push_back((other, depth + 1));
            }
        }
        Ok(Walk { nodes, edges })
    }
}

/// Every quad whose subject is one of `subjects`.
fn subject_quads<'t>(
    source: &dyn QuadSource,
    subjects: impl IntoIterator<Item = &'t Term>,
) -> SyncResult<QuadSet> {
    let mut out = QuadSet::new();
    for subject in subjects {
        out.extend(source.quads_matching(Some(subject), None, None)?);
    }
    Ok(out)
}

struct Walk {
    nodes: BTreeSet<Term>,
    edges: Vec<EdgeLink>,
}

/// Group frames and slots by the edges that reach them.
fn classify(root: &Term, edges: &[EdgeLink]) -> Vec<InnerUnit> {
    let mut frames: BTreeMap<Term, Option<Term>> = BTreeMap::new();
    let mut slots: BTreeMap<Term, Vec<Term>> = BTreeMap::new();
    for link in edges {
        let (Some(kind), Some(src), Some(dst)) = (link.kind, &link.source, &link.destination) else {
            continue;
        };
        if kind.targets_frame() {
            frames.insert(dst.clone(), Some(src.clone()));
        } else {
            slots.entry(src.clone()).or_default().push(dst.clone());
        }
    }
    // A root that owns slots or child frames directly is a frame root.
    let root_is_frame = slots.contains_key(root)
        || edges
            .iter()
            .any(|l| l.kind == Some(EdgeKind::ChildFrame) && l.source.as_ref() == Some(root));
    if root_is_frame {
        frames.entry(root.clone()).or_insert(None);
    }
    frames
        .into_iter()
        .map(|(frame, parent)| {
            let mut frame_slots = slots.remove(&frame).unwrap_or_default();
            frame_slots.sort();
            InnerUnit {
                frame,
                parent,
                slots: frame_slots,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quad::GraphName;
    use crate::unit::render::render_unit;
    use crate::unit::{FrameState, GraphObject, InnerState, UnitKind, UnitState};

    /// In-memory quad source for fixtures.
    struct Fixture(Vec<Quad>);

    impl QuadSource for Fixture {
        fn quads_matching(
            &self,
            subject: Option<&Term>,
            predicate: Option<&Term>,
            object: Option<&Term>,
        ) -> SyncResult<Vec<Quad>> {
            Ok(self
                .0
                .iter()
                .filter(|q| {
                    subject.is_none_or(|s| *s == q.subject)
                        && predicate.is_none_or(|p| *p == q.predicate)
                        && object.is_none_or(|o| *o == q.object)
                })
                .cloned()
                .collect())
        }
    }

    fn iri(s: &str) -> Term {
        Term::iri(format!("http://ex.org/{s}"))
    }

    fn state() -> UnitState {
        UnitState {
            kind: UnitKind::Entity,
            root: GraphObject::new(iri("r1")).with("http://ex.org/p1", Term::literal("v1")),
            slots: Vec::new(),
            frames: vec![FrameState {
                inner: InnerState {
                    frame: GraphObject::new(iri("f1")).with("http://ex.org/label", Term::literal("F")),
                    slots: vec![
                        GraphObject::new(iri("s1")).with("http://ex.org/val", Term::literal("1")),
                    ],
                },
                children: vec![FrameState {
                    inner: InnerState {
                        frame: GraphObject::new(iri("f2")).in_graph(GraphName::named("http://ex.org/g")),
                        slots: vec![GraphObject::new(iri("s2"))],
                    },
                    children: Vec::new(),
                }],
            }],
        }
    }

    fn fixture(schema: &UnitSchema) -> Vec<Quad> {
        render_unit(schema, &state()).unwrap()
    }

    #[test]
    fn strategies_agree_on_rendered_unit() {
        let schema = UnitSchema::default();
        let quads = fixture(&schema);
        let source = Fixture(quads.clone());
        let report = UnitDiscovery::new(&schema, DEFAULT_MAX_DEPTH)
            .discover_outer(&source, &iri("r1"))
            .unwrap();
        assert!(report.is_well_formed());
        assert_eq!(report.quads, quads.into_iter().collect::<QuadSet>());
        let frames: Vec<_> = report.units.iter().map(|u| u.frame.clone()).collect();
        assert_eq!(frames, vec![iri("f1"), iri("f2")]);
        assert_eq!(report.unit(&iri("f2")).unwrap().parent, Some(iri("f1")));
        assert_eq!(report.unit(&iri("f1")).unwrap().slots, vec![iri("s1")]);
    }

    #[test]
    fn single_quad_unit() {
        let schema = UnitSchema::default();
        let quads = vec![Quad::triple(iri("r1"), iri("p1"), Term::literal("v1")).unwrap()];
        let source = Fixture(quads.clone());
        let report = UnitDiscovery::new(&schema, DEFAULT_MAX_DEPTH)
            .discover_outer(&source, &iri("r1"))
            .unwrap();
        assert!(report.is_well_formed());
        assert_eq!(report.quads.len(), 1);
        assert!(report.units.is_empty());
    }

    #[test]
    fn unknown_root_is_empty() {
        let schema = UnitSchema::default();
        let report = UnitDiscovery::new(&schema, DEFAULT_MAX_DEPTH)
            .discover_outer(&Fixture(Vec::new()), &iri("nobody"))
            .unwrap();
        assert!(report.is_empty());
        assert!(report.is_well_formed());
    }

    #[test]
    fn orphan_marker_is_a_disagreement() {
        let schema = UnitSchema::default();
        let mut quads = fixture(&schema);
        // Carries the marker but no edge reaches it.
        quads.push(Quad::triple(iri("orphan"), schema.outer_marker(), iri("r1")).unwrap());
        let report = UnitDiscovery::new(&schema, DEFAULT_MAX_DEPTH)
            .discover_outer(&Fixture(quads), &iri("r1"))
            .unwrap();
        assert_eq!(report.agreement.marker_only.len(), 1);
        assert!(report.agreement.edge_only.is_empty());
        assert!(matches!(
            report.require_well_formed(),
            Err(DiscoveryError::Disagreement { marker_only: 1, .. })
        ));
    }

    #[test]
    fn unmarked_node_is_a_disagreement() {
        let schema = UnitSchema::default();
        let quads: Vec<Quad> = fixture(&schema)
            .into_iter()
            .filter(|q| !(q.subject == iri("s2") && q.predicate == schema.outer_marker()))
            .collect();
        let report = UnitDiscovery::new(&schema, DEFAULT_MAX_DEPTH)
            .discover_outer(&Fixture(quads), &iri("r1"))
            .unwrap();
        assert!(!report.agreement.edge_only.is_empty());
    }

    #[test]
    fn cycles_are_rejected() {
        let schema = UnitSchema::default();
        let mut quads = fixture(&schema);
        let back = iri("f2/edge/back");
        quads.extend([
            Quad::triple(back.clone(), schema.edge_source(), iri("f2")).unwrap(),
            Quad::triple(back.clone(), schema.edge_destination(), iri("r1")).unwrap(),
            Quad::triple(back.clone(), Term::iri(RDF_TYPE), schema.edge_type(EdgeKind::ChildFrame))
                .unwrap(),
            Quad::triple(back, schema.outer_marker(), iri("r1")).unwrap(),
        ]);
        let err = UnitDiscovery::new(&schema, DEFAULT_MAX_DEPTH)
            .discover_outer(&Fixture(quads), &iri("r1"))
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::SyncError::Discovery(DiscoveryError::Cycle { .. })
        ));
    }

    #[test]
    fn depth_is_bounded() {
        let schema = UnitSchema::default();
        let err = UnitDiscovery::new(&schema, 1)
            .discover_outer(&Fixture(fixture(&schema)), &iri("r1"))
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::SyncError::Discovery(DiscoveryError::DepthExceeded { max_depth: 1, .. })
        ));
    }

    #[test]
    fn inner_discovery_finds_slots() {
        let schema = UnitSchema::default();
        let source = Fixture(fixture(&schema));
        let inner = UnitDiscovery::new(&schema, DEFAULT_MAX_DEPTH)
            .discover_inner(&source, &iri("f1"))
            .unwrap();
        assert!(inner.agreement.is_agreed());
        assert_eq!(inner.slots, BTreeSet::from([iri("s1")]));
        assert_eq!(inner.edges.len(), 1);
        // The child frame's quads are not part of f1's inner unit.
        assert!(inner.quads.iter().all(|q| q.subject != iri("f2")));
    }

    #[test]
    fn ownership_checks() {
        let schema = UnitSchema::default();
        let mut quads = fixture(&schema);
        quads.push(Quad::triple(iri("r2"), iri("p"), Term::literal("x")).unwrap());
        quads.push(Quad::triple(iri("f9"), schema.outer_marker(), iri("r2")).unwrap());
        let source = Fixture(quads);
        let discovery = UnitDiscovery::new(&schema, DEFAULT_MAX_DEPTH);

        assert!(discovery.check_ownership(&source, &iri("r1"), &iri("f2")).is_ok());
        let err = discovery
            .check_ownership(&source, &iri("r1"), &iri("f9"))
            .unwrap_err();
        assert!(err.is_ownership());

        assert!(discovery
            .check_foreign_ids(&source, &iri("r1"), [&iri("f1"), &iri("new")])
            .is_ok());
        assert!(discovery
            .check_foreign_ids(&source, &iri("r1"), [&iri("f9")])
            .unwrap_err()
            .is_ownership());
        assert!(discovery
            .check_foreign_ids(&source, &iri("r1"), [&iri("r2")])
            .unwrap_err()
            .is_ownership());

        assert_eq!(discovery.owning_root(&source, &iri("s1")).unwrap(), iri("r1"));
        assert_eq!(discovery.owning_root(&source, &iri("zzz")).unwrap(), iri("zzz"));
    }

    #[test]
    fn slot_ids_may_not_change_role() {
        let schema = UnitSchema::default();
        let source = Fixture(fixture(&schema));
        let discovery = UnitDiscovery::new(&schema, DEFAULT_MAX_DEPTH);
        let report = discovery.discover_outer(&source, &iri("r1")).unwrap();

        assert!(discovery
            .check_slot_ids(&source, &report, &iri("f1"), [&iri("s1"), &iri("fresh")])
            .is_ok());
        // s2 is a slot of f2, f2 is a frame, r1 is the root.
        for taken in ["s2", "f2", "r1"] {
            let err = discovery
                .check_slot_ids(&source, &report, &iri("f1"), [&iri(taken)])
                .unwrap_err();
            assert!(err.is_ownership(), "{taken}");
        }
    }

    #[test]
    fn bare_frame_root_is_its_own_inner_unit() {
        let schema = UnitSchema::default();
        let quads = vec![Quad::triple(iri("fr"), iri("label"), Term::literal("x")).unwrap()];
        let source = Fixture(quads);
        let report = UnitDiscovery::new(&schema, DEFAULT_MAX_DEPTH)
            .check_ownership(&source, &iri("fr"), &iri("fr"))
            .unwrap();
        let unit = report.unit(&iri("fr")).unwrap();
        assert_eq!(unit.parent, None);
        assert!(unit.slots.is_empty());
    }

    #[test]
    fn frame_subtree_includes_descendants() {
        let schema = UnitSchema::default();
        let report = UnitDiscovery::new(&schema, DEFAULT_MAX_DEPTH)
            .discover_outer(&Fixture(fixture(&schema)), &iri("r1"))
            .unwrap();
        let subtree = report.frame_subtree(&iri("f1"));
        assert_eq!(
            subtree,
            BTreeSet::from([iri("f1"), iri("s1"), iri("f2"), iri("s2")])
        );

        // Everything except the root's own quad goes.
        let removed = report.frame_subtree_quads(&iri("f1"));
        assert_eq!(removed.len(), report.quads.len() - 1);
        assert!(removed.iter().all(|q| q.subject != iri("r1")));
    }
}
