//! Graph Store collaborator: persistence of a validated relational graph.
//!
//! Two backends share one merge routine. `InMemoryGraphStore` keeps state
//! behind a `RwLock`; `FileGraphStore` writes bitcode records into a
//! `simd-r-drive` data file. Inserts are all-or-nothing: the merged state
//! is computed and validated before anything is committed.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::{Datelike, NaiveDate, NaiveTime};
use serde::Serialize;
use simd_r_drive::storage_engine::DataStore;
use simd_r_drive::storage_engine::traits::{DataStoreReader, DataStoreWriter};
use tracing::info;

use crate::constants::store::{
    BITCODE_PREFIX, DEFAULT_STORE_DIR, DEFAULT_STORE_FILENAME, DIMENSION_PREFIX,
    DIMENSION_RECORD_VERSION, FACT_RECORD_VERSION, FACTS_KEY, META_KEY, RECORD_TOMBSTONE,
    STORE_VERSION,
};
use crate::data::{Column, FactRecord, ForeignKeys, NormalizedFact};
use crate::dimension::{Dimension, DimensionEntry, DimensionSpec, DimensionTable, NaturalKey};
use crate::errors::NormalizeError;
use crate::graph::{GraphBuilder, RelationalGraph, at_midnight};
use crate::types::{OrderId, SurrogateId};
use crate::verify::DenormalizedView;

/// How a graph is written into a store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub enum StoreMode {
    /// Wipe every table, then insert.
    #[default]
    Recreate,
    /// Keep existing rows; identical rows are skipped.
    Additive,
}

impl fmt::Display for StoreMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreMode::Recreate => f.write_str("recreate"),
            StoreMode::Additive => f.write_str("additive"),
        }
    }
}

/// Row counts of one insert.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct InsertSummary {
    /// Newly stored entries per dimension.
    pub new_entries: BTreeMap<Dimension, usize>,
    /// Entries already present with the same binding.
    pub skipped_entries: usize,
    /// Facts written for the first time.
    pub new_facts: usize,
    /// Facts whose order id was already stored with identical content.
    pub skipped_facts: usize,
}

/// Backend that persists dimension tables and the fact table.
///
/// Implementations enforce the same constraints as the graph itself:
/// unique natural keys and ids per dimension, and foreign keys on every
/// fact and association. Callers must ensure a single writer per store.
pub trait GraphStore: Send + Sync {
    /// Destructively remove all stored tables.
    fn reset(&self) -> Result<(), NormalizeError>;

    /// Stored dimension tables (every dimension present, possibly empty).
    fn load_dimensions(&self) -> Result<BTreeMap<Dimension, DimensionTable>, NormalizeError>;

    /// Merge `graph` into the stored state.
    ///
    /// An identical entry or fact is skipped; a conflicting binding or a
    /// dangling foreign key rejects the whole insert.
    fn insert_graph(&self, graph: &RelationalGraph) -> Result<InsertSummary, NormalizeError>;

    /// Read the stored state back as a validated graph.
    fn read_graph(&self) -> Result<RelationalGraph, NormalizeError>;
}

/// Write `graph` into `store` according to `mode`.
pub fn persist_graph(
    store: &dyn GraphStore,
    graph: &RelationalGraph,
    mode: StoreMode,
) -> Result<InsertSummary, NormalizeError> {
    if mode == StoreMode::Recreate {
        store.reset()?;
    }
    let summary = store.insert_graph(graph)?;
    info!(
        "[starschema:store] persisted mode={} new_entries={} skipped_entries={} new_facts={} skipped_facts={}",
        mode,
        summary.new_entries.values().sum::<usize>(),
        summary.skipped_entries,
        summary.new_facts,
        summary.skipped_facts
    );
    Ok(summary)
}

/// Denormalized view over whatever a store currently holds.
pub struct StoreView<'a> {
    store: &'a dyn GraphStore,
    specs: &'a [DimensionSpec],
}

impl<'a> StoreView<'a> {
    /// View over `store`, denormalized through `specs`.
    pub fn new(store: &'a dyn GraphStore, specs: &'a [DimensionSpec]) -> Self {
        Self { store, specs }
    }
}

impl DenormalizedView for StoreView<'_> {
    fn columns(&self) -> Vec<Column> {
        Column::ALL.to_vec()
    }

    fn rows(&self) -> Result<Vec<FactRecord>, NormalizeError> {
        self.store.read_graph()?.denormalize(self.specs)
    }
}

#[derive(Clone, Debug)]
struct StoredGraph {
    dimensions: BTreeMap<Dimension, DimensionTable>,
    facts: BTreeMap<OrderId, NormalizedFact>,
}

impl Default for StoredGraph {
    fn default() -> Self {
        Self {
            dimensions: Dimension::ALL
                .into_iter()
                .map(|dimension| (dimension, DimensionTable::new(dimension)))
                .collect(),
            facts: BTreeMap::new(),
        }
    }
}

impl StoredGraph {
    fn merged_with(&self, graph: &RelationalGraph) -> Result<(Self, InsertSummary), NormalizeError> {
        let mut merged = self.clone();
        let mut summary = InsertSummary::default();
        for table in graph.dimensions() {
            let target = merged
                .dimensions
                .entry(table.dimension())
                .or_insert_with(|| DimensionTable::new(table.dimension()));
            let mut inserted = 0usize;
            for entry in table.iter() {
                if target.insert(entry.clone()).map_err(constraint_violation)? {
                    inserted += 1;
                } else {
                    summary.skipped_entries += 1;
                }
            }
            summary.new_entries.insert(table.dimension(), inserted);
        }
        for fact in graph.facts().iter().map(date_only) {
            match merged.facts.get(&fact.order_id) {
                None => {
                    merged.facts.insert(fact.order_id, fact);
                    summary.new_facts += 1;
                }
                Some(stored) if *stored == fact => summary.skipped_facts += 1,
                Some(_) => {
                    return Err(NormalizeError::Store(format!(
                        "constraint violation: order {} is already stored with different content",
                        fact.order_id
                    )));
                }
            }
        }
        merged.to_graph().map_err(constraint_violation)?;
        Ok((merged, summary))
    }

    fn to_graph(&self) -> Result<RelationalGraph, NormalizeError> {
        let mut builder = GraphBuilder::new();
        for (dimension, table) in &self.dimensions {
            builder.add_entries(*dimension, table.iter().cloned());
        }
        builder.add_facts(self.facts.values().cloned());
        builder.build()
    }
}

// Stores keep calendar dates only.
fn date_only(fact: &NormalizedFact) -> NormalizedFact {
    NormalizedFact {
        order_date: at_midnight(fact.order_date),
        ship_date: at_midnight(fact.ship_date),
        ..fact.clone()
    }
}

fn constraint_violation(err: NormalizeError) -> NormalizeError {
    match err {
        NormalizeError::GraphInvariant { table, details } => {
            NormalizeError::Store(format!("constraint violation in '{table}': {details}"))
        }
        other => other,
    }
}

/// Volatile store, mainly for tests and dry runs.
#[derive(Debug, Default)]
pub struct InMemoryGraphStore {
    state: RwLock<StoredGraph>,
}

impl InMemoryGraphStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl GraphStore for InMemoryGraphStore {
    fn reset(&self) -> Result<(), NormalizeError> {
        *self
            .state
            .write()
            .map_err(|_| NormalizeError::Store("graph state lock poisoned".into()))? =
            StoredGraph::default();
        Ok(())
    }

    fn load_dimensions(&self) -> Result<BTreeMap<Dimension, DimensionTable>, NormalizeError> {
        self.state
            .read()
            .map_err(|_| NormalizeError::Store("graph state lock poisoned".into()))
            .map(|guard| guard.dimensions.clone())
    }

    fn insert_graph(&self, graph: &RelationalGraph) -> Result<InsertSummary, NormalizeError> {
        let mut guard = self
            .state
            .write()
            .map_err(|_| NormalizeError::Store("graph state lock poisoned".into()))?;
        let (merged, summary) = guard.merged_with(graph)?;
        *guard = merged;
        Ok(summary)
    }

    fn read_graph(&self) -> Result<RelationalGraph, NormalizeError> {
        self.state
            .read()
            .map_err(|_| NormalizeError::Store("graph state lock poisoned".into()))?
            .to_graph()
    }
}

#[derive(Clone, Copy, Debug, bitcode::Encode, bitcode::Decode)]
/// Versioned metadata header stored in graph-store files.
struct StoreMeta {
    version: u8,
}

#[derive(Clone, Debug, bitcode::Encode, bitcode::Decode)]
struct PersistedEntry {
    id: SurrogateId,
    key: Vec<String>,
    references: Vec<(u8, SurrogateId)>,
}

#[derive(Clone, Debug, bitcode::Encode, bitcode::Decode)]
struct PersistedFact {
    order_id: OrderId,
    /// Calendar dates as days from the common era.
    order_date: i32,
    ship_date: i32,
    order_priority: String,
    ship_mode: String,
    discount: f64,
    profit: f64,
    quantity: i64,
    sales: f64,
    shipping_cost: f64,
    keys: [SurrogateId; 5],
}

impl From<&DimensionEntry> for PersistedEntry {
    fn from(entry: &DimensionEntry) -> Self {
        Self {
            id: entry.id,
            key: entry.key.parts().to_vec(),
            references: entry
                .references
                .iter()
                .map(|(dimension, id)| (dimension.code(), *id))
                .collect(),
        }
    }
}

impl PersistedEntry {
    fn into_entry(self) -> Result<DimensionEntry, NormalizeError> {
        let mut entry = DimensionEntry::new(self.id, NaturalKey::from_parts(self.key));
        for (code, id) in self.references {
            let dimension = Dimension::from_code(code).ok_or_else(|| {
                NormalizeError::Store(format!("unknown dimension code {code} in stored entry"))
            })?;
            entry.references.insert(dimension, id);
        }
        Ok(entry)
    }
}

impl From<&NormalizedFact> for PersistedFact {
    fn from(fact: &NormalizedFact) -> Self {
        let keys = &fact.keys;
        Self {
            order_id: fact.order_id,
            order_date: fact.order_date.date().num_days_from_ce(),
            ship_date: fact.ship_date.date().num_days_from_ce(),
            order_priority: fact.order_priority.clone(),
            ship_mode: fact.ship_mode.clone(),
            discount: fact.discount,
            profit: fact.profit,
            quantity: fact.quantity,
            sales: fact.sales,
            shipping_cost: fact.shipping_cost,
            keys: [
                keys.category_id,
                keys.sub_category_id,
                keys.customer_id,
                keys.product_id,
                keys.location_id,
            ],
        }
    }
}

impl PersistedFact {
    fn into_fact(self) -> Result<NormalizedFact, NormalizeError> {
        let [category_id, sub_category_id, customer_id, product_id, location_id] = self.keys;
        Ok(NormalizedFact {
            order_id: self.order_id,
            order_date: day_to_datetime(self.order_date)?,
            ship_date: day_to_datetime(self.ship_date)?,
            order_priority: self.order_priority,
            ship_mode: self.ship_mode,
            discount: self.discount,
            profit: self.profit,
            quantity: self.quantity,
            sales: self.sales,
            shipping_cost: self.shipping_cost,
            keys: ForeignKeys {
                category_id,
                sub_category_id,
                customer_id,
                product_id,
                location_id,
            },
        })
    }
}

fn day_to_datetime(days: i32) -> Result<chrono::NaiveDateTime, NormalizeError> {
    NaiveDate::from_num_days_from_ce_opt(days)
        .map(|date| date.and_time(NaiveTime::MIN))
        .ok_or_else(|| NormalizeError::Store(format!("stored date {days} is out of range")))
}

/// File-backed graph store.
///
/// Holds one record per dimension table (`dim:<table>`), one fact-table
/// record, and a version header. Stored dates keep calendar-date
/// granularity only.
pub struct FileGraphStore {
    store: DataStore,
    path: PathBuf,
}

impl fmt::Debug for FileGraphStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileGraphStore")
            .field("path", &self.path)
            .finish()
    }
}

impl FileGraphStore {
    /// Open (or create) a file-backed graph store at `path`.
    ///
    /// A directory path resolves to the default filename inside it.
    pub fn open<P: Into<PathBuf>>(path: P) -> Result<Self, NormalizeError> {
        let path = coerce_store_path(path.into());
        ensure_parent_dir(&path)?;
        let store = DataStore::open(path.as_path()).map_err(map_store_err)?;
        let store = Self { store, path };
        store.verify_metadata()?;
        Ok(store)
    }

    /// Default graph-store file path under the crate's default store directory.
    pub fn default_path() -> PathBuf {
        Self::default_path_in_dir(DEFAULT_STORE_DIR)
    }

    /// Default graph-store file path inside a custom directory.
    pub fn default_path_in_dir<P: AsRef<Path>>(dir: P) -> PathBuf {
        dir.as_ref().join(DEFAULT_STORE_FILENAME)
    }

    /// Resolved path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn verify_metadata(&self) -> Result<(), NormalizeError> {
        match read_bytes(&self.store, META_KEY)? {
            Some(bytes) => {
                let raw = decode_bitcode_payload(&bytes)?;
                let meta: StoreMeta = bitcode::decode(&raw).map_err(|err| {
                    NormalizeError::Store(format!("failed to decode graph store metadata: {err}"))
                })?;
                if meta.version != STORE_VERSION {
                    return Err(NormalizeError::Store(format!(
                        "graph store version mismatch (expected {}, found {})",
                        STORE_VERSION, meta.version
                    )));
                }
            }
            None => {
                let meta = StoreMeta {
                    version: STORE_VERSION,
                };
                let payload = encode_bitcode_payload(&bitcode::encode(&meta));
                write_bytes(&self.store, META_KEY, &payload)?;
            }
        }
        Ok(())
    }

    fn load_state(&self) -> Result<StoredGraph, NormalizeError> {
        let mut state = StoredGraph::default();
        for dimension in Dimension::ALL {
            let entries = match read_bytes(&self.store, &dimension_key(dimension))? {
                Some(bytes) => decode_entries(&bytes)?,
                None => Vec::new(),
            };
            let table = DimensionTable::try_from_entries(dimension, entries)
                .map_err(|err| NormalizeError::Store(format!("corrupt dimension record: {err}")))?;
            state.dimensions.insert(dimension, table);
        }
        if let Some(bytes) = read_bytes(&self.store, FACTS_KEY)? {
            for fact in decode_facts(&bytes)? {
                state.facts.insert(fact.order_id, fact);
            }
        }
        Ok(state)
    }

    fn write_state(&self, state: &StoredGraph) -> Result<(), NormalizeError> {
        for (dimension, table) in &state.dimensions {
            let payload = encode_entries(table);
            write_bytes(&self.store, &dimension_key(*dimension), &payload)?;
        }
        let facts: Vec<PersistedFact> = state.facts.values().map(PersistedFact::from).collect();
        write_bytes(&self.store, FACTS_KEY, &encode_record(FACT_RECORD_VERSION, &facts))
    }
}

impl GraphStore for FileGraphStore {
    fn reset(&self) -> Result<(), NormalizeError> {
        for dimension in Dimension::ALL {
            write_bytes(&self.store, &dimension_key(dimension), &[RECORD_TOMBSTONE])?;
        }
        write_bytes(&self.store, FACTS_KEY, &[RECORD_TOMBSTONE])?;
        info!("[starschema:store] reset {}", self.path.display());
        Ok(())
    }

    fn load_dimensions(&self) -> Result<BTreeMap<Dimension, DimensionTable>, NormalizeError> {
        Ok(self.load_state()?.dimensions)
    }

    fn insert_graph(&self, graph: &RelationalGraph) -> Result<InsertSummary, NormalizeError> {
        let current = self.load_state()?;
        let (merged, summary) = current.merged_with(graph)?;
        self.write_state(&merged)?;
        Ok(summary)
    }

    fn read_graph(&self) -> Result<RelationalGraph, NormalizeError> {
        self.load_state()?.to_graph()
    }
}

fn dimension_key(dimension: Dimension) -> Vec<u8> {
    let name = dimension.table_name().as_bytes();
    let mut key = Vec::with_capacity(DIMENSION_PREFIX.len() + name.len());
    key.extend_from_slice(DIMENSION_PREFIX);
    key.extend_from_slice(name);
    key
}

fn encode_entries(table: &DimensionTable) -> Vec<u8> {
    let entries: Vec<PersistedEntry> = table.iter().map(PersistedEntry::from).collect();
    encode_record(DIMENSION_RECORD_VERSION, &entries)
}

fn decode_entries(bytes: &[u8]) -> Result<Vec<DimensionEntry>, NormalizeError> {
    let Some(raw) = decode_record(DIMENSION_RECORD_VERSION, bytes, "dimension")? else {
        return Ok(Vec::new());
    };
    let entries: Vec<PersistedEntry> = bitcode::decode(&raw)
        .map_err(|err| NormalizeError::Store(format!("corrupt dimension record: {err}")))?;
    entries.into_iter().map(PersistedEntry::into_entry).collect()
}

fn decode_facts(bytes: &[u8]) -> Result<Vec<NormalizedFact>, NormalizeError> {
    let Some(raw) = decode_record(FACT_RECORD_VERSION, bytes, "fact")? else {
        return Ok(Vec::new());
    };
    let facts: Vec<PersistedFact> = bitcode::decode(&raw)
        .map_err(|err| NormalizeError::Store(format!("corrupt fact record: {err}")))?;
    facts.into_iter().map(PersistedFact::into_fact).collect()
}

fn encode_record<T: bitcode::Encode + ?Sized>(version: u8, value: &T) -> Vec<u8> {
    let payload = encode_bitcode_payload(&bitcode::encode(value));
    let mut buf = Vec::with_capacity(1 + payload.len());
    buf.push(version);
    buf.extend_from_slice(&payload);
    buf
}

/// Strip the version byte and bitcode prefix; `None` for a tombstone.
fn decode_record(version: u8, bytes: &[u8], label: &str) -> Result<Option<Vec<u8>>, NormalizeError> {
    if bytes.is_empty() || bytes[0] == RECORD_TOMBSTONE {
        return Ok(None);
    }
    if bytes[0] != version {
        return Err(NormalizeError::Store(format!(
            "{label} record version mismatch (expected {version}, found {})",
            bytes[0]
        )));
    }
    decode_bitcode_payload(&bytes[1..]).map(Some)
}

fn encode_bitcode_payload(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + bytes.len());
    out.push(BITCODE_PREFIX);
    out.extend_from_slice(bytes);
    out
}

fn decode_bitcode_payload(bytes: &[u8]) -> Result<Vec<u8>, NormalizeError> {
    if bytes.first().copied() != Some(BITCODE_PREFIX) {
        return Err(NormalizeError::Store(
            "bitcode payload missing expected prefix".into(),
        ));
    }
    Ok(bytes[1..].to_vec())
}

fn read_bytes(store: &DataStore, key: &[u8]) -> Result<Option<Vec<u8>>, NormalizeError> {
    Ok(store
        .read(key)
        .map_err(map_store_err)?
        .map(|entry| entry.as_ref().to_vec()))
}

fn write_bytes(store: &DataStore, key: &[u8], payload: &[u8]) -> Result<(), NormalizeError> {
    store.write(key, payload).map_err(map_store_err)?;
    Ok(())
}

fn coerce_store_path(path: PathBuf) -> PathBuf {
    if path.is_dir() {
        return path.join(DEFAULT_STORE_FILENAME);
    }
    path
}

fn ensure_parent_dir(path: &Path) -> Result<(), NormalizeError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

fn map_store_err(err: io::Error) -> NormalizeError {
    NormalizeError::Store(err.to_string())
}
