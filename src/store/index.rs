//! Quad index orderings and table naming.
//!
//! Every quad is stored four times, once per ordering, as a 4-tuple key with
//! a unit value. A prefix of bound components becomes a key range scan.

use redb::TableDefinition;

use crate::space::SpaceId;

/// Raw key of a quad index table.
pub type QuadKey = (u64, u64, u64, u64);

/// Graph component value used for the default graph.
pub const DEFAULT_GRAPH_ID: u64 = 0;

/// A quad of interned ids. `g == 0` is the default graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdQuad {
    pub s: u64,
    pub p: u64,
    pub o: u64,
    pub g: u64,
}

/// The four composite orderings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOrder {
    Spog,
    Posg,
    Ospg,
    Gspo,
}

impl IndexOrder {
    pub const ALL: [IndexOrder; 4] = [
        IndexOrder::Spog,
        IndexOrder::Posg,
        IndexOrder::Ospg,
        IndexOrder::Gspo,
    ];

    pub fn key(self, q: IdQuad) -> QuadKey {
        match self {
            IndexOrder::Spog => (q.s, q.p, q.o, q.g),
            IndexOrder::Posg => (q.p, q.o, q.s, q.g),
            IndexOrder::Ospg => (q.o, q.s, q.p, q.g),
            IndexOrder::Gspo => (q.g, q.s, q.p, q.o),
        }
    }

    pub fn unkey(self, k: QuadKey) -> IdQuad {
        match self {
            IndexOrder::Spog => IdQuad { s: k.0, p: k.1, o: k.2, g: k.3 },
            IndexOrder::Posg => IdQuad { p: k.0, o: k.1, s: k.2, g: k.3 },
            IndexOrder::Ospg => IdQuad { o: k.0, s: k.1, p: k.2, g: k.3 },
            IndexOrder::Gspo => IdQuad { g: k.0, s: k.1, p: k.2, o: k.3 },
        }
    }

    fn suffix(self) -> &'static str {
        match self {
            IndexOrder::Spog => "spog",
            IndexOrder::Posg => "posg",
            IndexOrder::Ospg => "ospg",
            IndexOrder::Gspo => "gspo",
        }
    }
}

/// Which graphs a pattern may match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphFilter {
    Any,
    /// Only the default graph.
    Default,
    /// Any named graph, never the default graph.
    AnyNamed,
    Exact(u64),
}

impl GraphFilter {
    fn accepts(self, g: u64) -> bool {
        match self {
            GraphFilter::Any => true,
            GraphFilter::Default => g == DEFAULT_GRAPH_ID,
            GraphFilter::AnyNamed => g != DEFAULT_GRAPH_ID,
            GraphFilter::Exact(id) => g == id,
        }
    }

    fn exact(self) -> Option<u64> {
        match self {
            GraphFilter::Default => Some(DEFAULT_GRAPH_ID),
            GraphFilter::Exact(id) => Some(id),
            GraphFilter::Any | GraphFilter::AnyNamed => None,
        }
    }
}

/// A pattern over interned ids.
#[derive(Debug, Clone, Copy)]
pub struct IdPattern {
    pub s: Option<u64>,
    pub p: Option<u64>,
    pub o: Option<u64>,
    pub g: GraphFilter,
}

impl IdPattern {
    pub fn matches(&self, q: &IdQuad) -> bool {
        self.s.is_none_or(|s| s == q.s)
            && self.p.is_none_or(|p| p == q.p)
            && self.o.is_none_or(|o| o == q.o)
            && self.g.accepts(q.g)
    }

    /// Pick the index whose key prefix covers the most bound components,
    /// and return that prefix.
    pub fn plan(&self) -> (IndexOrder, Vec<u64>) {
        let g = self.g.exact();
        match (self.s, self.p, self.o) {
            (Some(s), p, o) => {
                let mut prefix = vec![s];
                match (p, o) {
                    (Some(p), Some(o)) => {
                        prefix.extend([p, o]);
                        prefix.extend(g);
                        (IndexOrder::Spog, prefix)
                    }
                    (Some(p), None) => {
                        prefix.push(p);
                        (IndexOrder::Spog, prefix)
                    }
                    (None, Some(o)) => {
                        // OSP ordering has (o, s) as its prefix.
                        (IndexOrder::Ospg, vec![o, s])
                    }
                    (None, None) => (IndexOrder::Spog, prefix),
                }
            }
            (None, Some(p), Some(o)) => (IndexOrder::Posg, vec![p, o]),
            (None, Some(p), None) => (IndexOrder::Posg, vec![p]),
            (None, None, Some(o)) => (IndexOrder::Ospg, vec![o]),
            (None, None, None) => match g {
                Some(g) => (IndexOrder::Gspo, vec![g]),
                None => (IndexOrder::Spog, Vec::new()),
            },
        }
    }
}

/// Inclusive key range covering every key that starts with `prefix`.
pub fn prefix_range(prefix: &[u64]) -> (QuadKey, QuadKey) {
    let component = |i: usize, fill: u64| prefix.get(i).copied().unwrap_or(fill);
    (
        (component(0, 0), component(1, 0), component(2, 0), component(3, 0)),
        (
            component(0, u64::MAX),
            component(1, u64::MAX),
            component(2, u64::MAX),
            component(3, u64::MAX),
        ),
    )
}

/// Table names for one space.
#[derive(Debug, Clone)]
pub struct SpaceTables {
    terms: String,
    term_keys: String,
    indexes: [String; 4],
}

impl SpaceTables {
    pub fn new(space: &SpaceId) -> Self {
        Self {
            terms: format!("{space}.terms"),
            term_keys: format!("{space}.term_keys"),
            indexes: IndexOrder::ALL.map(|order| format!("{space}.{}", order.suffix())),
        }
    }

    /// `id -> bincode(Term)`.
    pub fn terms(&self) -> TableDefinition<'_, u64, &'static [u8]> {
        TableDefinition::new(&self.terms)
    }

    /// `bincode(Term) -> id`.
    pub fn term_keys(&self) -> TableDefinition<'_, &'static [u8], u64> {
        TableDefinition::new(&self.term_keys)
    }

    pub fn index(&self, order: IndexOrder) -> TableDefinition<'_, QuadKey, ()> {
        let slot = match order {
            IndexOrder::Spog => 0,
            IndexOrder::Posg => 1,
            IndexOrder::Ospg => 2,
            IndexOrder::Gspo => 3,
        };
        TableDefinition::new(&self.indexes[slot])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_unkey_agree_for_every_order() {
        let q = IdQuad { s: 1, p: 2, o: 3, g: 4 };
        for order in IndexOrder::ALL {
            assert_eq!(order.unkey(order.key(q)), q);
        }
    }

    #[test]
    fn plan_prefers_longest_prefix() {
        let pat = IdPattern { s: None, p: Some(5), o: Some(9), g: GraphFilter::Any };
        assert_eq!(pat.plan(), (IndexOrder::Posg, vec![5, 9]));

        let pat = IdPattern { s: Some(1), p: None, o: Some(9), g: GraphFilter::Any };
        assert_eq!(pat.plan(), (IndexOrder::Ospg, vec![9, 1]));

        let pat = IdPattern { s: None, p: None, o: None, g: GraphFilter::Exact(7) };
        assert_eq!(pat.plan(), (IndexOrder::Gspo, vec![7]));

        let pat = IdPattern { s: Some(1), p: Some(2), o: Some(3), g: GraphFilter::Default };
        assert_eq!(pat.plan(), (IndexOrder::Spog, vec![1, 2, 3, 0]));
    }

    #[test]
    fn prefix_range_pads() {
        let (lo, hi) = prefix_range(&[3, 4]);
        assert_eq!(lo, (3, 4, 0, 0));
        assert_eq!(hi, (3, 4, u64::MAX, u64::MAX));
    }

    #[test]
    fn graph_filter() {
        let pat = IdPattern { s: None, p: None, o: None, g: GraphFilter::AnyNamed };
        assert!(!pat.matches(&IdQuad { s: 1, p: 2, o: 3, g: 0 }));
        assert!(pat.matches(&IdQuad { s: 1, p: 2, o: 3, g: 8 }));
    }
}
