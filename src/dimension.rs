//! Dimension declarations, natural keys, and dimension tables.
//!
//! A dimension is a reference entity derived from repeated categorical
//! attributes of the fact rows. Each entry binds one natural-key tuple to one
//! surrogate id; tables enforce that neither side repeats.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::data::{Column, FactRecord};
use crate::errors::NormalizeError;
use crate::types::{KeyPart, SurrogateId};

/// Reference entities derived from the order dataset.
///
/// Declaration order is dependency order: a dimension only references
/// dimensions declared before it.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Dimension {
    /// `Category` column.
    Category,
    /// `Sub_Category` column.
    SubCategory,
    /// `Market` column.
    Market,
    /// `Segment` column.
    Segment,
    /// Region, city, country and state.
    Location,
    /// Customer name; references market and segment.
    Customer,
    /// Product name; references category and sub-category.
    Product,
}

impl Dimension {
    /// Every dimension in dependency order.
    pub const ALL: [Dimension; 7] = [
        Dimension::Category,
        Dimension::SubCategory,
        Dimension::Market,
        Dimension::Segment,
        Dimension::Location,
        Dimension::Customer,
        Dimension::Product,
    ];

    /// Relational table name for this dimension.
    pub const fn table_name(self) -> &'static str {
        match self {
            Dimension::Category => "category",
            Dimension::SubCategory => "sub_category",
            Dimension::Market => "market",
            Dimension::Segment => "segment",
            Dimension::Location => "location",
            Dimension::Customer => "customer",
            Dimension::Product => "product",
        }
    }

    /// Stable single-byte code used by persisted records.
    pub const fn code(self) -> u8 {
        match self {
            Dimension::Category => 0,
            Dimension::SubCategory => 1,
            Dimension::Market => 2,
            Dimension::Segment => 3,
            Dimension::Location => 4,
            Dimension::Customer => 5,
            Dimension::Product => 6,
        }
    }

    /// Inverse of [`Dimension::code`].
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|dimension| dimension.code() == code)
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table_name())
    }
}

/// Human-meaningful attribute tuple identifying a dimension entry.
///
/// Ordering is lexicographic over the parts, which is the order new
/// surrogate ids are handed out in.
#[derive(
    Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct NaturalKey(Vec<KeyPart>);

impl NaturalKey {
    /// Build a key from its parts in declaration order.
    pub fn from_parts<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<KeyPart>,
    {
        Self(parts.into_iter().map(Into::into).collect())
    }

    /// Key parts in declaration order.
    pub fn parts(&self) -> &[KeyPart] {
        &self.0
    }

    /// Number of parts.
    pub fn arity(&self) -> usize {
        self.0.len()
    }

    /// Consume the key, returning its parts.
    pub fn into_parts(self) -> Vec<KeyPart> {
        self.0
    }
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({})", self.0.join(" | "))
    }
}

/// How the extractor treats rows with a null in a dimension's columns.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum NullPolicy {
    /// Leave the row out of this dimension's distinct set; the fact stream keeps it.
    #[default]
    Exclude,
    /// Fail extraction with a malformed-input error.
    Reject,
}

/// Association from a dimension entry to an entry of another dimension.
///
/// The first row observed for an entry decides the association.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DimensionReference {
    /// Referenced (parent) dimension.
    pub dimension: Dimension,
    /// Columns holding the parent's natural key on each fact row.
    pub columns: Vec<Column>,
}

/// Declaration of one dimension: where its natural key and associations live.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DimensionSpec {
    /// Dimension this spec declares.
    pub dimension: Dimension,
    /// Columns forming the natural key, in key order.
    pub key_columns: Vec<Column>,
    /// First-seen associations to parent dimensions.
    pub references: Vec<DimensionReference>,
    /// Treatment of rows with a null key part.
    pub null_policy: NullPolicy,
}

impl DimensionSpec {
    /// Declare a dimension keyed by `key_columns`.
    pub fn new(dimension: Dimension, key_columns: impl Into<Vec<Column>>) -> Self {
        Self {
            dimension,
            key_columns: key_columns.into(),
            references: Vec::new(),
            null_policy: NullPolicy::default(),
        }
    }

    /// Add a first-seen association to `dimension` read from `columns`.
    pub fn with_reference(mut self, dimension: Dimension, columns: impl Into<Vec<Column>>) -> Self {
        self.references.push(DimensionReference {
            dimension,
            columns: columns.into(),
        });
        self
    }

    /// Override the null policy.
    pub fn with_null_policy(mut self, null_policy: NullPolicy) -> Self {
        self.null_policy = null_policy;
        self
    }

    /// Natural key of `record` for this dimension, or the first null column.
    pub fn key_for(&self, record: &FactRecord) -> Result<NaturalKey, Column> {
        key_from_columns(record, &self.key_columns)
    }

    /// Parent natural keys of `record`, one per reference, or the first null column.
    pub fn reference_keys_for(&self, record: &FactRecord) -> Result<Vec<NaturalKey>, Column> {
        self.references
            .iter()
            .map(|reference| key_from_columns(record, &reference.columns))
            .collect()
    }

    /// Key columns followed by reference columns.
    pub fn columns(&self) -> impl Iterator<Item = Column> + '_ {
        self.key_columns.iter().copied().chain(
            self.references
                .iter()
                .flat_map(|reference| reference.columns.iter().copied()),
        )
    }
}

fn key_from_columns(record: &FactRecord, columns: &[Column]) -> Result<NaturalKey, Column> {
    let mut parts = Vec::with_capacity(columns.len());
    for column in columns {
        match record.key_part(*column) {
            Some(part) => parts.push(part.to_string()),
            None => return Err(*column),
        }
    }
    Ok(NaturalKey(parts))
}

/// One natural key → surrogate id binding, with its resolved associations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionEntry {
    /// Surrogate id, unique within the dimension.
    pub id: SurrogateId,
    /// Natural key, unique within the dimension.
    pub key: NaturalKey,
    /// Surrogate ids of associated parent entries.
    pub references: BTreeMap<Dimension, SurrogateId>,
}

impl DimensionEntry {
    /// Entry without associations.
    pub fn new(id: SurrogateId, key: NaturalKey) -> Self {
        Self {
            id,
            key,
            references: BTreeMap::new(),
        }
    }
}

/// All entries of one dimension, unique by id and by natural key.
#[derive(Clone, Debug, PartialEq)]
pub struct DimensionTable {
    dimension: Dimension,
    entries: BTreeMap<SurrogateId, DimensionEntry>,
    by_key: HashMap<NaturalKey, SurrogateId>,
}

impl DimensionTable {
    /// Create an empty table.
    pub fn new(dimension: Dimension) -> Self {
        Self {
            dimension,
            entries: BTreeMap::new(),
            by_key: HashMap::new(),
        }
    }

    /// Build a table, rejecting duplicate ids and duplicate natural keys.
    pub fn try_from_entries(
        dimension: Dimension,
        entries: impl IntoIterator<Item = DimensionEntry>,
    ) -> Result<Self, NormalizeError> {
        let mut table = Self::new(dimension);
        for entry in entries {
            if let Some(existing) = table.entries.get(&entry.id) {
                return Err(NormalizeError::GraphInvariant {
                    table: dimension.table_name().to_string(),
                    details: format!(
                        "duplicate surrogate id {} for keys {} and {}",
                        entry.id, existing.key, entry.key
                    ),
                });
            }
            table.insert_new(entry)?;
        }
        Ok(table)
    }

    /// Insert an entry unless the identical (id, key) binding already exists.
    ///
    /// Returns `Ok(true)` when inserted and `Ok(false)` when already present.
    /// A key bound to another id, or an id bound to another key, is an error.
    pub fn insert(&mut self, entry: DimensionEntry) -> Result<bool, NormalizeError> {
        if let Some(existing) = self.entries.get(&entry.id) {
            if existing.key == entry.key {
                return Ok(false);
            }
            return Err(NormalizeError::GraphInvariant {
                table: self.dimension.table_name().to_string(),
                details: format!(
                    "surrogate id {} already bound to key {}, cannot bind {}",
                    entry.id, existing.key, entry.key
                ),
            });
        }
        self.insert_new(entry)?;
        Ok(true)
    }

    fn insert_new(&mut self, entry: DimensionEntry) -> Result<(), NormalizeError> {
        if let Some(existing_id) = self.by_key.get(&entry.key) {
            return Err(NormalizeError::GraphInvariant {
                table: self.dimension.table_name().to_string(),
                details: format!(
                    "duplicate natural key {} for surrogate ids {} and {}",
                    entry.key, existing_id, entry.id
                ),
            });
        }
        self.by_key.insert(entry.key.clone(), entry.id);
        self.entries.insert(entry.id, entry);
        Ok(())
    }

    /// Dimension the table holds.
    pub fn dimension(&self) -> Dimension {
        self.dimension
    }

    /// Entry bound to `id`.
    pub fn get(&self, id: SurrogateId) -> Option<&DimensionEntry> {
        self.entries.get(&id)
    }

    /// Surrogate id bound to `key`.
    pub fn lookup(&self, key: &NaturalKey) -> Option<SurrogateId> {
        self.by_key.get(key).copied()
    }

    /// Largest assigned id, if any.
    pub fn max_id(&self) -> Option<SurrogateId> {
        self.entries.keys().next_back().copied()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the table holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &DimensionEntry> {
        self.entries.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(part: &str) -> NaturalKey {
        NaturalKey::from_parts([part])
    }

    #[test]
    fn dimension_codes_round_trip() {
        for dimension in Dimension::ALL {
            assert_eq!(Dimension::from_code(dimension.code()), Some(dimension));
        }
        assert_eq!(Dimension::from_code(42), None);
    }

    #[test]
    fn dependency_order_matches_ord() {
        let mut sorted = Dimension::ALL;
        sorted.sort();
        assert_eq!(sorted, Dimension::ALL);
    }

    #[test]
    fn natural_keys_order_lexicographically_by_part() {
        let a = NaturalKey::from_parts(["East", "Tokyo"]);
        let b = NaturalKey::from_parts(["East", "Yokohama"]);
        let c = NaturalKey::from_parts(["West", "Aachen"]);
        assert!(a < b);
        assert!(b < c);
        assert_eq!(a.to_string(), "(East | Tokyo)");
    }

    #[test]
    fn table_rejects_duplicate_keys_and_ids() {
        let err = DimensionTable::try_from_entries(
            Dimension::Market,
            [DimensionEntry::new(1, key("APAC")), DimensionEntry::new(2, key("APAC"))],
        )
        .unwrap_err();
        assert!(
            matches!(err, NormalizeError::GraphInvariant { ref table, ref details } if table == "market" && details.contains("duplicate natural key"))
        );

        let err = DimensionTable::try_from_entries(
            Dimension::Market,
            [DimensionEntry::new(1, key("APAC")), DimensionEntry::new(1, key("EU"))],
        )
        .unwrap_err();
        assert!(
            matches!(err, NormalizeError::GraphInvariant { ref details, .. } if details.contains("duplicate surrogate id 1"))
        );
    }

    #[test]
    fn insert_is_idempotent_for_identical_bindings() {
        let mut table = DimensionTable::new(Dimension::Segment);
        assert!(table.insert(DimensionEntry::new(3, key("Consumer"))).unwrap());
        assert!(!table.insert(DimensionEntry::new(3, key("Consumer"))).unwrap());
        assert!(table.insert(DimensionEntry::new(4, key("Consumer"))).is_err());
        assert!(table.insert(DimensionEntry::new(3, key("Corporate"))).is_err());
        assert_eq!(table.len(), 1);
        assert_eq!(table.max_id(), Some(3));
        assert_eq!(table.lookup(&key("Consumer")), Some(3));
    }
}
