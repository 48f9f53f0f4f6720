//! Atomic units: the closed subgraphs that replace and delete act on.
//!
//! An outer unit is a root object plus its structural children (frames and
//! slots) and the reified edge nodes connecting them. Every member except
//! the root carries the outer grouping marker pointing at the root. An
//! inner unit is one frame plus its slots; slots additionally carry the
//! inner marker pointing at their frame.
//!
//! ```text
//!  R1 ──EntityFrame──▶ F1 ──FrameSlot──▶ S1
//!                       └──ChildFrame──▶ F2 ──FrameSlot──▶ S2
//! ```

pub mod discovery;
pub mod render;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, DiscoveryError, TermError};
use crate::quad::GraphName;
use crate::term::Term;

/// Namespace of the default unit vocabulary.
pub const DEFAULT_NS: &str = "https://kg-dualwrite.dev/ns#";

/// What the root of an outer unit is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    /// A root entity whose children are frames.
    Entity,
    /// The root is itself a frame and may own slots directly.
    Frame,
}

impl std::fmt::Display for UnitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnitKind::Entity => write!(f, "entity"),
            UnitKind::Frame => write!(f, "frame"),
        }
    }
}

impl std::str::FromStr for UnitKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "entity" => Ok(UnitKind::Entity),
            "frame" => Ok(UnitKind::Frame),
            other => Err(format!("unknown unit kind {other:?} (expected entity or frame)")),
        }
    }
}

/// The kinds of connecting edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EdgeKind {
    EntityFrame,
    ChildFrame,
    FrameSlot,
}

impl EdgeKind {
    pub const ALL: [EdgeKind; 3] = [EdgeKind::EntityFrame, EdgeKind::ChildFrame, EdgeKind::FrameSlot];

    /// Path segment used in rendered edge node IRIs.
    pub fn slug(self) -> &'static str {
        match self {
            EdgeKind::EntityFrame => "entity-frame",
            EdgeKind::ChildFrame => "child-frame",
            EdgeKind::FrameSlot => "frame-slot",
        }
    }

    /// Whether the destination of this edge is a frame.
    pub fn targets_frame(self) -> bool {
        matches!(self, EdgeKind::EntityFrame | EdgeKind::ChildFrame)
    }
}

/// Vocabulary used to encode units as quads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnitSchema {
    /// Outer grouping marker predicate: `member -> root`.
    pub outer_marker: String,
    /// Inner grouping marker predicate: `slot -> frame`.
    pub inner_marker: String,
    pub edge_source: String,
    pub edge_destination: String,
    pub entity_frame_type: String,
    pub child_frame_type: String,
    pub frame_slot_type: String,
}

impl Default for UnitSchema {
    fn default() -> Self {
        Self {
            outer_marker: format!("{DEFAULT_NS}memberOfUnit"),
            inner_marker: format!("{DEFAULT_NS}slotOfFrame"),
            edge_source: format!("{DEFAULT_NS}hasEdgeSource"),
            edge_destination: format!("{DEFAULT_NS}hasEdgeDestination"),
            entity_frame_type: format!("{DEFAULT_NS}EntityFrameEdge"),
            child_frame_type: format!("{DEFAULT_NS}ChildFrameEdge"),
            frame_slot_type: format!("{DEFAULT_NS}FrameSlotEdge"),
        }
    }
}

impl UnitSchema {
    pub fn outer_marker(&self) -> Term {
        Term::iri(&self.outer_marker)
    }

    pub fn inner_marker(&self) -> Term {
        Term::iri(&self.inner_marker)
    }

    pub fn edge_source(&self) -> Term {
        Term::iri(&self.edge_source)
    }

    pub fn edge_destination(&self) -> Term {
        Term::iri(&self.edge_destination)
    }

    pub fn edge_type(&self, kind: EdgeKind) -> Term {
        Term::iri(match kind {
            EdgeKind::EntityFrame => &self.entity_frame_type,
            EdgeKind::ChildFrame => &self.child_frame_type,
            EdgeKind::FrameSlot => &self.frame_slot_type,
        })
    }

    /// The edge kind named by an `rdf:type` object, if any.
    pub fn edge_kind(&self, ty: &Term) -> Option<EdgeKind> {
        let Term::Iri(iri) = ty else { return None };
        EdgeKind::ALL
            .into_iter()
            .find(|kind| matches!(self.edge_type(*kind), Term::Iri(t) if t == *iri))
    }

    /// Every vocabulary IRI must be valid and distinct.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let iris = [
            &self.outer_marker,
            &self.inner_marker,
            &self.edge_source,
            &self.edge_destination,
            &self.entity_frame_type,
            &self.child_frame_type,
            &self.frame_slot_type,
        ];
        for iri in iris {
            Term::iri(iri.as_str())
                .validate()
                .map_err(|e| ConfigError::Invalid {
                    message: format!("unit schema: {e}"),
                })?;
        }
        let distinct: BTreeSet<_> = iris.iter().collect();
        if distinct.len() != iris.len() {
            return Err(ConfigError::Invalid {
                message: "unit schema IRIs must be distinct".into(),
            });
        }
        Ok(())
    }
}

/// One node of a unit with its leaf properties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphObject {
    pub id: Term,
    #[serde(default)]
    pub properties: Vec<(String, Term)>,
    /// Graph the object's quads live in.
    #[serde(default)]
    pub graph: GraphName,
}

impl GraphObject {
    pub fn new(id: Term) -> Self {
        Self {
            id,
            properties: Vec::new(),
            graph: GraphName::Default,
        }
    }

    pub fn with(mut self, predicate: impl Into<String>, value: Term) -> Self {
        self.properties.push((predicate.into(), value));
        self
    }

    pub fn in_graph(mut self, graph: GraphName) -> Self {
        self.graph = graph;
        self
    }
}

/// An inner unit: a frame and its slots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InnerState {
    pub frame: GraphObject,
    #[serde(default)]
    pub slots: Vec<GraphObject>,
}

/// A frame with nested child frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameState {
    #[serde(flatten)]
    pub inner: InnerState,
    #[serde(default)]
    pub children: Vec<FrameState>,
}

/// The complete desired state of an outer unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitState {
    pub kind: UnitKind,
    pub root: GraphObject,
    /// Slots owned directly by a frame root. Always empty for entity units.
    #[serde(default)]
    pub slots: Vec<GraphObject>,
    #[serde(default)]
    pub frames: Vec<FrameState>,
}

impl UnitState {
    pub fn entity(root: GraphObject) -> Self {
        Self {
            kind: UnitKind::Entity,
            root,
            slots: Vec::new(),
            frames: Vec::new(),
        }
    }

    /// Every node id in the state, root first, depth-first.
    pub fn ids(&self) -> Vec<&Term> {
        fn walk<'a>(frame: &'a FrameState, out: &mut Vec<&'a Term>) {
            out.push(&frame.inner.frame.id);
            out.extend(frame.inner.slots.iter().map(|s| &s.id));
            for child in &frame.children {
                walk(child, out);
            }
        }
        let mut out = vec![&self.root.id];
        out.extend(self.slots.iter().map(|s| &s.id));
        for frame in &self.frames {
            walk(frame, &mut out);
        }
        out
    }

    /// Structural checks: IRI root, node ids not literals, every id used
    /// once, and no root slots on entity units.
    pub fn validate(&self) -> Result<(), DiscoveryError> {
        let root = self.root.id.to_string();
        let invalid = |message: String| DiscoveryError::InvalidStructure {
            unit: root.clone(),
            message,
        };
        if !self.root.id.is_iri() {
            return Err(invalid("the unit root must be an IRI".into()));
        }
        if self.kind == UnitKind::Entity && !self.slots.is_empty() {
            return Err(invalid("entity units cannot own slots directly".into()));
        }
        let mut seen = BTreeSet::new();
        for id in self.ids() {
            if id.is_literal() {
                return Err(invalid(format!("literal {id} used as a node id")));
            }
            if !seen.insert(id) {
                return Err(invalid(format!("{id} appears more than once")));
            }
        }
        validate_properties(self.all_objects(), &root)
    }

    fn all_objects(&self) -> Vec<&GraphObject> {
        fn walk<'a>(frame: &'a FrameState, out: &mut Vec<&'a GraphObject>) {
            out.push(&frame.inner.frame);
            out.extend(frame.inner.slots.iter());
            for child in &frame.children {
                walk(child, out);
            }
        }
        let mut out = vec![&self.root];
        out.extend(self.slots.iter());
        for frame in &self.frames {
            walk(frame, &mut out);
        }
        out
    }
}

impl InnerState {
    /// Structural checks for an inner replacement of `frame`.
    pub fn validate(&self, frame: &Term) -> Result<(), DiscoveryError> {
        let unit = frame.to_string();
        if &self.frame.id != frame {
            return Err(DiscoveryError::InvalidStructure {
                unit,
                message: format!("state describes {} instead", self.frame.id),
            });
        }
        let mut seen = BTreeSet::from([&self.frame.id]);
        for slot in &self.slots {
            if slot.id.is_literal() || !seen.insert(&slot.id) {
                return Err(DiscoveryError::InvalidStructure {
                    unit,
                    message: format!("invalid or repeated slot id {}", slot.id),
                });
            }
        }
        let objects: Vec<_> = std::iter::once(&self.frame).chain(&self.slots).collect();
        validate_properties(objects, &unit)
    }
}

fn validate_properties(objects: Vec<&GraphObject>, unit: &str) -> Result<(), DiscoveryError> {
    for object in objects {
        for (predicate, value) in &object.properties {
            let check = || -> Result<(), TermError> {
                Term::iri(predicate.as_str()).validate()?;
                value.validate()
            };
            check().map_err(|e| DiscoveryError::InvalidStructure {
                unit: unit.to_string(),
                message: e.to_string(),
            })?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iri(s: &str) -> Term {
        Term::iri(format!("http://ex.org/{s}"))
    }

    fn sample() -> UnitState {
        UnitState {
            kind: UnitKind::Entity,
            root: GraphObject::new(iri("r1")).with("http://ex.org/p1", Term::literal("v1")),
            slots: Vec::new(),
            frames: vec![FrameState {
                inner: InnerState {
                    frame: GraphObject::new(iri("f1")),
                    slots: vec![GraphObject::new(iri("s1"))],
                },
                children: vec![FrameState {
                    inner: InnerState {
                        frame: GraphObject::new(iri("f2")),
                        slots: Vec::new(),
                    },
                    children: Vec::new(),
                }],
            }],
        }
    }

    #[test]
    fn ids_are_depth_first() {
        let state = sample();
        let ids: Vec<_> = state.ids().into_iter().cloned().collect();
        assert_eq!(ids, vec![iri("r1"), iri("f1"), iri("s1"), iri("f2")]);
        assert!(state.validate().is_ok());
    }

    #[test]
    fn duplicate_ids_are_invalid() {
        let mut state = sample();
        state.frames[0].inner.slots.push(GraphObject::new(iri("f2")));
        assert!(matches!(
            state.validate(),
            Err(DiscoveryError::InvalidStructure { .. })
        ));
    }

    #[test]
    fn entity_root_slots_are_invalid() {
        let mut state = sample();
        state.slots.push(GraphObject::new(iri("s9")));
        assert!(state.validate().is_err());
        state.kind = UnitKind::Frame;
        assert!(state.validate().is_ok());
    }

    #[test]
    fn schema_edge_kinds() {
        let schema = UnitSchema::default();
        for kind in EdgeKind::ALL {
            assert_eq!(schema.edge_kind(&schema.edge_type(kind)), Some(kind));
        }
        assert_eq!(schema.edge_kind(&iri("Other")), None);
        assert!(schema.validate().is_ok());

        let mut clash = schema.clone();
        clash.inner_marker = clash.outer_marker.clone();
        assert!(clash.validate().is_err());
    }

    #[test]
    fn state_from_json() {
        let json = r#"{
            "kind": "entity",
            "root": { "id": { "Iri": "http://ex.org/r1" },
                      "properties": [["http://ex.org/p1", { "Literal": {
                          "lexical": "v1",
                          "datatype": "http://www.w3.org/2001/XMLSchema#string",
                          "language": null } }]] },
            "frames": [ { "frame": { "id": { "Iri": "http://ex.org/f1" } },
                          "slots": [ { "id": { "Iri": "http://ex.org/s1" } } ] } ]
        }"#;
        let state: UnitState = serde_json::from_str(json).unwrap();
        assert_eq!(state.frames[0].inner.slots.len(), 1);
        assert_eq!(state.root.properties[0].1, Term::literal("v1"));
    }
}
