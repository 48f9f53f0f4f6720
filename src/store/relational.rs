//! Authoritative relational quad store backed by redb.
//!
//! Each space gets a term table, a reverse term-key table and four quad
//! index tables (see [`super::index`]). All writes go through a
//! [`RelationalTx`]; reads use MVCC snapshots ([`super::RelationalSnapshot`]),
//! so a committed unit replace becomes visible to readers all at once.

use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use redb::{Database, ReadableTable, Table, TableDefinition, TableError, WriteTransaction};

use crate::error::RelationalError;
use crate::quad::{GraphName, Quad};
use crate::space::{PendingResync, SpaceId, SpaceRecord, SyncState, unix_now};
use crate::term::{Term, TermId, TermKind};

use super::index::{DEFAULT_GRAPH_ID, IdQuad, IndexOrder, QuadKey, SpaceTables};
use super::snapshot::RelationalSnapshot;
use super::{RelationalResult, backend, decode, encode};

/// Space records: space name → bincode(SpaceRecord).
const SPACES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("spaces");

/// Shared id → term decode cache for one space.
pub(crate) type TermCache = Arc<DashMap<u64, Term>>;

/// The relational store: one redb database holding every space.
pub struct RelationalStore {
    db: Arc<Database>,
    term_caches: DashMap<SpaceId, TermCache>,
}

impl RelationalStore {
    /// Open or create the store in the given directory.
    pub fn open(data_dir: &Path) -> RelationalResult<Self> {
        std::fs::create_dir_all(data_dir).map_err(|e| RelationalError::Io { source: e })?;
        let db_path = data_dir.join("kg-dualwrite.redb");
        let db = Database::create(&db_path).map_err(|e| RelationalError::Backend {
            operation: "open",
            message: format!("failed to open redb at {}: {e}", db_path.display()),
        })?;
        Self::init(db)
    }

    /// Create a store that lives only in memory.
    pub fn in_memory() -> RelationalResult<Self> {
        let db = Database::builder()
            .create_with_backend(redb::backends::InMemoryBackend::new())
            .map_err(backend("open in-memory"))?;
        Self::init(db)
    }

    fn init(db: Database) -> RelationalResult<Self> {
        let txn = db.begin_write().map_err(backend("begin_write"))?;
        {
            let mut spaces = txn
                .open_table(SPACES_TABLE)
                .map_err(backend("open spaces table"))?;
            let mut recovered = Vec::new();
            for entry in spaces.iter().map_err(backend("scan spaces"))? {
                let (_, value) = entry.map_err(backend("scan spaces"))?;
                let mut record = decode::<SpaceRecord>(value.value())?;
                let interrupted = record.recover_in_flight(unix_now());
                if interrupted > 0 {
                    tracing::warn!(
                        space = %record.name,
                        interrupted,
                        "writes interrupted before their mirror finished, space degraded"
                    );
                    recovered.push(record);
                }
            }
            for record in recovered {
                let encoded = encode(&record)?;
                spaces
                    .insert(record.name.as_str(), encoded.as_slice())
                    .map_err(backend("write space record"))?;
            }
        }
        txn.commit().map_err(backend("commit"))?;
        Ok(Self {
            db: Arc::new(db),
            term_caches: DashMap::new(),
        })
    }

    /// Create a space and its tables.
    pub fn create_space(&self, space: &SpaceId) -> RelationalResult<SpaceRecord> {
        let txn = self.db.begin_write().map_err(backend("begin_write"))?;
        let record = SpaceRecord::new(space.clone());
        {
            let mut spaces = txn
                .open_table(SPACES_TABLE)
                .map_err(backend("open spaces table"))?;
            if spaces
                .get(space.as_str())
                .map_err(backend("read space record"))?
                .is_some()
            {
                return Err(RelationalError::SpaceExists {
                    space: space.to_string(),
                });
            }
            let encoded = encode(&record)?;
            spaces
                .insert(space.as_str(), encoded.as_slice())
                .map_err(backend("write space record"))?;
        }
        let tables = SpaceTables::new(space);
        txn.open_table(tables.terms())
            .map_err(backend("create terms table"))?;
        txn.open_table(tables.term_keys())
            .map_err(backend("create term_keys table"))?;
        for order in IndexOrder::ALL {
            txn.open_table(tables.index(order))
                .map_err(backend("create quad index"))?;
        }
        txn.commit().map_err(backend("commit"))?;
        self.term_caches.remove(space);
        tracing::info!(space = %space, "created relational space");
        Ok(record)
    }

    /// Drop a space and all of its terms and quads. Returns whether it existed.
    pub fn drop_space(&self, space: &SpaceId) -> RelationalResult<bool> {
        let txn = self.db.begin_write().map_err(backend("begin_write"))?;
        let existed = {
            let mut spaces = txn
                .open_table(SPACES_TABLE)
                .map_err(backend("open spaces table"))?;
            let removed = spaces
                .remove(space.as_str())
                .map_err(backend("remove space record"))?;
            removed.is_some()
        };
        let tables = SpaceTables::new(space);
        txn.delete_table(tables.terms())
            .map_err(backend("delete terms table"))?;
        txn.delete_table(tables.term_keys())
            .map_err(backend("delete term_keys table"))?;
        for order in IndexOrder::ALL {
            txn.delete_table(tables.index(order))
                .map_err(backend("delete quad index"))?;
        }
        txn.commit().map_err(backend("commit"))?;
        self.term_caches.remove(space);
        if existed {
            tracing::info!(space = %space, "dropped relational space");
        }
        Ok(existed)
    }

    /// All space records, ordered by name.
    pub fn list_spaces(&self) -> RelationalResult<Vec<SpaceRecord>> {
        let txn = self.db.begin_read().map_err(backend("begin_read"))?;
        let spaces = txn
            .open_table(SPACES_TABLE)
            .map_err(backend("open spaces table"))?;
        let mut records = Vec::new();
        for entry in spaces.iter().map_err(backend("scan spaces"))? {
            let (_, value) = entry.map_err(backend("scan spaces"))?;
            records.push(decode::<SpaceRecord>(value.value())?);
        }
        Ok(records)
    }

    /// The record of one space.
    pub fn space(&self, space: &SpaceId) -> RelationalResult<SpaceRecord> {
        let txn = self.db.begin_read().map_err(backend("begin_read"))?;
        let spaces = txn
            .open_table(SPACES_TABLE)
            .map_err(backend("open spaces table"))?;
        let value = spaces
            .get(space.as_str())
            .map_err(backend("read space record"))?
            .ok_or_else(|| RelationalError::SpaceNotFound {
                space: space.to_string(),
            })?;
        decode(value.value())
    }

    /// Begin a write transaction scoped to one space.
    ///
    /// redb admits one writer at a time; this blocks until the previous
    /// writer commits or aborts.
    pub fn begin(&self, space: &SpaceId) -> RelationalResult<RelationalTx<'_>> {
        let txn = self.db.begin_write().map_err(backend("begin_write"))?;
        let record = {
            let spaces = txn
                .open_table(SPACES_TABLE)
                .map_err(backend("open spaces table"))?;
            let value = spaces
                .get(space.as_str())
                .map_err(backend("read space record"))?
                .ok_or_else(|| RelationalError::SpaceNotFound {
                    space: space.to_string(),
                })?;
            decode::<SpaceRecord>(value.value())?
        };
        Ok(RelationalTx {
            store: self,
            txn,
            tables: SpaceTables::new(space),
            record,
            record_dirty: false,
            minted: Vec::new(),
        })
    }

    /// Open a consistent read snapshot of one space.
    pub fn snapshot(&self, space: &SpaceId) -> RelationalResult<RelationalSnapshot> {
        let txn = self.db.begin_read().map_err(backend("begin_read"))?;
        {
            let spaces = txn
                .open_table(SPACES_TABLE)
                .map_err(backend("open spaces table"))?;
            if spaces
                .get(space.as_str())
                .map_err(backend("read space record"))?
                .is_none()
            {
                return Err(RelationalError::SpaceNotFound {
                    space: space.to_string(),
                });
            }
        }
        Ok(RelationalSnapshot::new(
            space.clone(),
            txn,
            SpaceTables::new(space),
            self.term_cache(space),
        ))
    }

    /// Update a space's sync state in its own small transaction.
    pub fn update_sync_state(
        &self,
        space: &SpaceId,
        update: impl FnOnce(&mut SyncState),
    ) -> RelationalResult<SyncState> {
        let mut tx = self.begin(space)?;
        update(tx.sync_state_mut());
        let state = tx.sync_state().clone();
        tx.commit()?;
        Ok(state)
    }

    /// Close out a write intent recorded with [`RelationalTx::record_intent`].
    /// A mirrored write just drops it; an unmirrored one folds its pending
    /// scope into the degraded state.
    pub fn settle_intent(
        &self,
        space: &SpaceId,
        intent: u64,
        mirrored: bool,
    ) -> RelationalResult<SyncState> {
        let mut tx = self.begin(space)?;
        if let Some(pending) = tx.record.in_flight.remove(&intent) {
            tx.record_dirty = true;
            if !mirrored {
                tx.record.sync.degrade(pending, unix_now());
            }
        }
        let state = tx.sync_state().clone();
        tx.commit()?;
        Ok(state)
    }

    pub(crate) fn term_cache(&self, space: &SpaceId) -> TermCache {
        self.term_caches
            .entry(space.clone())
            .or_insert_with(|| Arc::new(DashMap::new()))
            .clone()
    }
}

impl std::fmt::Debug for RelationalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelationalStore")
            .field("cached_spaces", &self.term_caches.len())
            .finish()
    }
}

/// A write transaction against one space.
///
/// Dropping the transaction without calling [`commit`](Self::commit) aborts it.
pub struct RelationalTx<'s> {
    store: &'s RelationalStore,
    txn: WriteTransaction,
    tables: SpaceTables,
    record: SpaceRecord,
    record_dirty: bool,
    /// Terms created in this transaction, published to the decode cache on commit.
    minted: Vec<(u64, Term)>,
}

impl RelationalTx<'_> {
    pub fn space(&self) -> &SpaceId {
        &self.record.name
    }

    pub fn sync_state(&self) -> &SyncState {
        &self.record.sync
    }

    /// Record that the triple store has not yet seen this transaction's
    /// changes to `pending`. The intent commits with the data; settle it
    /// with [`RelationalStore::settle_intent`] once the mirror is done.
    pub fn record_intent(&mut self, pending: PendingResync) -> u64 {
        self.record_dirty = true;
        let id = self.record.next_write_id;
        self.record.next_write_id += 1;
        self.record.in_flight.insert(id, pending);
        id
    }

    /// Mutable access to the space's sync state, persisted on commit.
    pub fn sync_state_mut(&mut self) -> &mut SyncState {
        self.record_dirty = true;
        &mut self.record.sync
    }

    /// Intern a term, returning its id. Idempotent.
    pub fn intern(&mut self, term: &Term) -> RelationalResult<TermId> {
        term.validate()?;
        let mut keys = self
            .txn
            .open_table(self.tables.term_keys())
            .map_err(backend("open term_keys"))?;
        let mut terms = self
            .txn
            .open_table(self.tables.terms())
            .map_err(backend("open terms"))?;
        let before = self.record.next_term_id;
        let id = intern_with(
            &mut keys,
            &mut terms,
            &mut self.record.next_term_id,
            &mut self.minted,
            term,
        )?;
        if self.record.next_term_id != before {
            self.record_dirty = true;
        }
        TermId::new(id).ok_or_else(|| RelationalError::Serialization {
            message: "term id 0 is reserved".into(),
        })
    }

    /// Intern a term given as its stored parts.
    pub fn intern_parts(
        &mut self,
        lexical: &str,
        kind: TermKind,
        datatype: Option<&str>,
        language: Option<&str>,
    ) -> RelationalResult<TermId> {
        let term = Term::from_parts(lexical, kind, datatype, language)?;
        self.intern(&term)
    }

    /// Look up a term's id without creating it.
    pub fn lookup(&self, term: &Term) -> RelationalResult<Option<TermId>> {
        let keys = self
            .txn
            .open_table(self.tables.term_keys())
            .map_err(backend("open term_keys"))?;
        let key = encode(term)?;
        let id = keys
            .get(key.as_slice())
            .map_err(backend("read term key"))?
            .map(|v| v.value());
        Ok(id.and_then(TermId::new))
    }

    /// Insert quads (exact, set semantics). Returns how many were new.
    pub fn insert_quads(&mut self, quads: &[Quad]) -> RelationalResult<usize> {
        for quad in quads {
            quad.validate()?;
        }
        let mut id_quads = Vec::with_capacity(quads.len());
        {
            let mut keys = self
                .txn
                .open_table(self.tables.term_keys())
                .map_err(backend("open term_keys"))?;
            let mut terms = self
                .txn
                .open_table(self.tables.terms())
                .map_err(backend("open terms"))?;
            let before = self.record.next_term_id;
            for quad in quads {
                let mut id_of = |term: &Term| {
                    intern_with(
                        &mut keys,
                        &mut terms,
                        &mut self.record.next_term_id,
                        &mut self.minted,
                        term,
                    )
                };
                let s = id_of(&quad.subject)?;
                let p = id_of(&quad.predicate)?;
                let o = id_of(&quad.object)?;
                let g = match &quad.graph {
                    GraphName::Default => DEFAULT_GRAPH_ID,
                    GraphName::Named(iri) => id_of(&Term::Iri(iri.clone()))?,
                };
                id_quads.push(IdQuad { s, p, o, g });
            }
            if self.record.next_term_id != before {
                self.record_dirty = true;
            }
        }

        let mut inserted = 0;
        let mut indexes = self.open_indexes()?;
        for q in &id_quads {
            let (primary_order, primary) = &mut indexes[0];
            let fresh = primary
                .insert(primary_order.key(*q), ())
                .map_err(backend("insert quad"))?
                .is_none();
            if !fresh {
                continue;
            }
            inserted += 1;
            for (order, table) in indexes.iter_mut().skip(1) {
                table
                    .insert(order.key(*q), ())
                    .map_err(backend("insert quad"))?;
            }
        }
        Ok(inserted)
    }

    /// Delete quads by exact match. Returns how many existed.
    pub fn delete_quads(&mut self, quads: &[Quad]) -> RelationalResult<usize> {
        let mut id_quads = Vec::with_capacity(quads.len());
        {
            let keys = self
                .txn
                .open_table(self.tables.term_keys())
                .map_err(backend("open term_keys"))?;
            let id_of = |term: &Term| -> RelationalResult<Option<u64>> {
                let key = encode(term)?;
                Ok(keys
                    .get(key.as_slice())
                    .map_err(backend("read term key"))?
                    .map(|v| v.value()))
            };
            for quad in quads {
                let g = match &quad.graph {
                    GraphName::Default => Some(DEFAULT_GRAPH_ID),
                    GraphName::Named(iri) => id_of(&Term::Iri(iri.clone()))?,
                };
                // A quad with an un-interned term cannot be stored.
                if let (Some(s), Some(p), Some(o), Some(g)) = (
                    id_of(&quad.subject)?,
                    id_of(&quad.predicate)?,
                    id_of(&quad.object)?,
                    g,
                ) {
                    id_quads.push(IdQuad { s, p, o, g });
                }
            }
        }

        let mut deleted = 0;
        let mut indexes = self.open_indexes()?;
        for q in &id_quads {
            let (primary_order, primary) = &mut indexes[0];
            let existed = primary
                .remove(primary_order.key(*q))
                .map_err(backend("delete quad"))?
                .is_some();
            if !existed {
                continue;
            }
            deleted += 1;
            for (order, table) in indexes.iter_mut().skip(1) {
                table
                    .remove(order.key(*q))
                    .map_err(backend("delete quad"))?;
            }
        }
        Ok(deleted)
    }

    /// Commit. After this returns, the changes are durable and visible.
    pub fn commit(self) -> RelationalResult<()> {
        let RelationalTx {
            store,
            txn,
            record,
            record_dirty,
            minted,
            ..
        } = self;
        if record_dirty {
            let mut spaces = txn
                .open_table(SPACES_TABLE)
                .map_err(backend("open spaces table"))?;
            let encoded = encode(&record)?;
            spaces
                .insert(record.name.as_str(), encoded.as_slice())
                .map_err(backend("write space record"))?;
            drop(spaces);
        }
        txn.commit().map_err(backend("commit"))?;
        if !minted.is_empty() {
            let cache = store.term_cache(&record.name);
            for (id, term) in minted {
                cache.insert(id, term);
            }
        }
        Ok(())
    }

    /// Abort, discarding every change made in this transaction.
    pub fn rollback(self) -> RelationalResult<()> {
        self.txn.abort().map_err(backend("abort"))
    }

    /// Open the four index tables; the SPOG table comes first.
    fn open_indexes(&self) -> RelationalResult<Vec<(IndexOrder, Table<'_, QuadKey, ()>)>> {
        IndexOrder::ALL
            .into_iter()
            .map(|order| {
                self.txn
                    .open_table(self.tables.index(order))
                    .map(|table| (order, table))
                    .map_err(|e| match e {
                        TableError::TableDoesNotExist(_) => RelationalError::SpaceNotFound {
                            space: self.record.name.to_string(),
                        },
                        other => RelationalError::Backend {
                            operation: "open quad index",
                            message: other.to_string(),
                        },
                    })
            })
            .collect()
    }
}

/// Optimistic insert-then-lookup interning against open tables.
///
/// The key is written with a freshly allocated id; if the key turns out to
/// be present already, the existing id is restored and returned instead.
fn intern_with(
    keys: &mut Table<'_, &'static [u8], u64>,
    terms: &mut Table<'_, u64, &'static [u8]>,
    next_id: &mut u64,
    minted: &mut Vec<(u64, Term)>,
    term: &Term,
) -> RelationalResult<u64> {
    let key = encode(term)?;
    let candidate = *next_id;
    let previous = keys
        .insert(key.as_slice(), candidate)
        .map_err(backend("insert term key"))?
        .map(|v| v.value());
    if let Some(existing) = previous {
        keys.insert(key.as_slice(), existing)
            .map_err(backend("restore term key"))?;
        return Ok(existing);
    }
    terms
        .insert(candidate, key.as_slice())
        .map_err(backend("insert term"))?;
    *next_id += 1;
    minted.push((candidate, term.clone()));
    Ok(candidate)
}
