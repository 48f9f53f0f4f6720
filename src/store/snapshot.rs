//! Read snapshots of one relational space.

use std::collections::BTreeMap;

use redb::{ReadTransaction, ReadableTable, ReadableTableMetadata};

use crate::error::{RelationalError, SyncResult};
use crate::quad::{GraphName, Quad};
use crate::space::SpaceId;
use crate::term::{Term, TermId};
use crate::unit::discovery::QuadSource;

use super::index::{
    DEFAULT_GRAPH_ID, GraphFilter, IdPattern, IdQuad, IndexOrder, SpaceTables, prefix_range,
};
use super::relational::TermCache;
use super::{GraphScope, RelationalResult, backend, decode, encode};

/// A consistent, read-only view of one space.
///
/// Holds a redb read transaction: writes committed after the snapshot was
/// opened are not visible through it.
pub struct RelationalSnapshot {
    space: SpaceId,
    txn: ReadTransaction,
    tables: SpaceTables,
    cache: TermCache,
}

impl RelationalSnapshot {
    pub(crate) fn new(
        space: SpaceId,
        txn: ReadTransaction,
        tables: SpaceTables,
        cache: TermCache,
    ) -> Self {
        Self {
            space,
            txn,
            tables,
            cache,
        }
    }

    pub fn space(&self) -> &SpaceId {
        &self.space
    }

    /// The id of a term, if it has been interned in this space.
    pub fn lookup(&self, term: &Term) -> RelationalResult<Option<TermId>> {
        Ok(self.lookup_raw(term)?.and_then(TermId::new))
    }

    /// Decode a term id.
    pub fn term(&self, id: TermId) -> RelationalResult<Term> {
        self.term_raw(id.get())
    }

    /// Number of distinct terms interned in this space.
    pub fn term_count(&self) -> RelationalResult<u64> {
        let table = self
            .txn
            .open_table(self.tables.terms())
            .map_err(backend("open terms"))?;
        table.len().map_err(backend("count terms"))
    }

    /// Quads matching a term-level pattern. `None` positions are wildcards.
    pub fn quads_in(
        &self,
        subject: Option<&Term>,
        predicate: Option<&Term>,
        object: Option<&Term>,
        graph: GraphScope<'_>,
    ) -> RelationalResult<Vec<Quad>> {
        let Some(pattern) = self.resolve_pattern(subject, predicate, object, graph)? else {
            return Ok(Vec::new());
        };
        self.match_ids(pattern)?
            .into_iter()
            .map(|q| self.decode_quad(q))
            .collect()
    }

    /// Every quad in the space, in SPOG id order.
    pub fn all_quads(&self) -> RelationalResult<Vec<Quad>> {
        self.quads_in(None, None, None, GraphScope::Any)
    }

    /// Total number of quads in the space.
    pub fn count(&self) -> RelationalResult<u64> {
        let table = self
            .txn
            .open_table(self.tables.index(IndexOrder::Spog))
            .map_err(backend("open quad index"))?;
        table.len().map_err(backend("count quads"))
    }

    /// Quad counts per graph.
    pub fn graph_breakdown(&self) -> RelationalResult<BTreeMap<GraphName, u64>> {
        let table = self
            .txn
            .open_table(self.tables.index(IndexOrder::Gspo))
            .map_err(backend("open quad index"))?;
        let mut per_id: BTreeMap<u64, u64> = BTreeMap::new();
        for entry in table.iter().map_err(backend("scan gspo"))? {
            let (key, _) = entry.map_err(backend("scan gspo"))?;
            *per_id.entry(key.value().0).or_default() += 1;
        }
        let mut breakdown = BTreeMap::new();
        for (g, count) in per_id {
            breakdown.insert(self.graph_name(g)?, count);
        }
        Ok(breakdown)
    }

    /// Translate a term pattern into ids. `None` means some bound term was
    /// never interned, so nothing can match.
    fn resolve_pattern(
        &self,
        subject: Option<&Term>,
        predicate: Option<&Term>,
        object: Option<&Term>,
        graph: GraphScope<'_>,
    ) -> RelationalResult<Option<IdPattern>> {
        let mut ids = [None; 3];
        for (slot, term) in ids.iter_mut().zip([subject, predicate, object]) {
            if let Some(term) = term {
                match self.lookup_raw(term)? {
                    Some(id) => *slot = Some(id),
                    None => return Ok(None),
                }
            }
        }
        let g = match graph {
            GraphScope::Any => GraphFilter::Any,
            GraphScope::Default => GraphFilter::Default,
            GraphScope::AnyNamed => GraphFilter::AnyNamed,
            GraphScope::Named(iri) => match self.lookup_raw(&Term::iri(iri))? {
                Some(id) => GraphFilter::Exact(id),
                None => return Ok(None),
            },
        };
        Ok(Some(IdPattern {
            s: ids[0],
            p: ids[1],
            o: ids[2],
            g,
        }))
    }

    pub(crate) fn match_ids(&self, pattern: IdPattern) -> RelationalResult<Vec<IdQuad>> {
        let (order, prefix) = pattern.plan();
        let table = self
            .txn
            .open_table(self.tables.index(order))
            .map_err(backend("open quad index"))?;
        let (lo, hi) = prefix_range(&prefix);
        let mut out = Vec::new();
        for entry in table.range(lo..=hi).map_err(backend("scan quad index"))? {
            let (key, _) = entry.map_err(backend("scan quad index"))?;
            let quad = order.unkey(key.value());
            if pattern.matches(&quad) {
                out.push(quad);
            }
        }
        Ok(out)
    }

    pub(crate) fn lookup_raw(&self, term: &Term) -> RelationalResult<Option<u64>> {
        let table = self
            .txn
            .open_table(self.tables.term_keys())
            .map_err(backend("open term_keys"))?;
        let key = encode(term)?;
        Ok(table
            .get(key.as_slice())
            .map_err(backend("read term key"))?
            .map(|v| v.value()))
    }

    pub(crate) fn term_raw(&self, id: u64) -> RelationalResult<Term> {
        if let Some(term) = self.cache.get(&id) {
            return Ok(term.clone());
        }
        let table = self
            .txn
            .open_table(self.tables.terms())
            .map_err(backend("open terms"))?;
        let bytes = table
            .get(id)
            .map_err(backend("read term"))?
            .ok_or_else(|| RelationalError::DanglingTerm {
                space: self.space.to_string(),
                id,
            })?;
        let term: Term = decode(bytes.value())?;
        self.cache.insert(id, term.clone());
        Ok(term)
    }

    fn graph_name(&self, g: u64) -> RelationalResult<GraphName> {
        if g == DEFAULT_GRAPH_ID {
            return Ok(GraphName::Default);
        }
        Ok(GraphName::try_from(self.term_raw(g)?)?)
    }

    pub(crate) fn decode_quad(&self, q: IdQuad) -> RelationalResult<Quad> {
        Ok(Quad {
            subject: self.term_raw(q.s)?,
            predicate: self.term_raw(q.p)?,
            object: self.term_raw(q.o)?,
            graph: self.graph_name(q.g)?,
        })
    }
}

impl QuadSource for RelationalSnapshot {
    fn quads_matching(
        &self,
        subject: Option<&Term>,
        predicate: Option<&Term>,
        object: Option<&Term>,
    ) -> SyncResult<Vec<Quad>> {
        Ok(self.quads_in(subject, predicate, object, GraphScope::Any)?)
    }
}

impl std::fmt::Debug for RelationalSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelationalSnapshot")
            .field("space", &self.space)
            .finish()
    }
}
