//! Surrogate Key Assigner.
//!
//! Existing bindings keep their ids. New keys receive ids from a counter
//! seeded at `max existing id + 1`, in ascending natural-key order, so a
//! rebuild from empty always reproduces the same numbering.

use std::collections::{BTreeMap, BTreeSet};

use tracing::info;

use crate::constants::assign::FIRST_SURROGATE_ID;
use crate::dimension::{Dimension, DimensionTable, NaturalKey};
use crate::errors::NormalizeError;
use crate::types::SurrogateId;

/// Natural key → surrogate id mapping for one dimension.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyAssignment {
    dimension: Dimension,
    ids: BTreeMap<NaturalKey, SurrogateId>,
    new_keys: Vec<NaturalKey>,
    reused: usize,
}

impl KeyAssignment {
    /// Dimension these bindings belong to.
    pub fn dimension(&self) -> Dimension {
        self.dimension
    }

    /// Surrogate id bound to `key`, whether pre-existing or new.
    pub fn get(&self, key: &NaturalKey) -> Option<SurrogateId> {
        self.ids.get(key).copied()
    }

    /// Number of bindings (pre-existing plus new).
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// True when nothing is bound.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Keys that received a fresh id in this assignment, in id order.
    pub fn new_keys(&self) -> &[NaturalKey] {
        &self.new_keys
    }

    /// Batch keys that matched an existing binding.
    pub fn reused(&self) -> usize {
        self.reused
    }

    /// All bindings in natural-key order.
    pub fn iter(&self) -> impl Iterator<Item = (&NaturalKey, SurrogateId)> {
        self.ids.iter().map(|(key, id)| (key, *id))
    }
}

/// Hands out surrogate ids for one dimension.
#[derive(Clone, Debug)]
pub struct SurrogateKeyAssigner {
    dimension: Dimension,
    existing: BTreeMap<NaturalKey, SurrogateId>,
    /// `None` once the id space is used up.
    next_id: Option<SurrogateId>,
}

impl SurrogateKeyAssigner {
    /// Assigner for a dimension with no prior entries.
    pub fn new(dimension: Dimension) -> Self {
        Self {
            dimension,
            existing: BTreeMap::new(),
            next_id: Some(FIRST_SURROGATE_ID),
        }
    }

    /// Assigner seeded from entries already present in a backing store.
    pub fn with_existing(table: &DimensionTable) -> Self {
        let existing = table
            .iter()
            .map(|entry| (entry.key.clone(), entry.id))
            .collect();
        let next_id = match table.max_id() {
            Some(max) => max.checked_add(1),
            None => Some(FIRST_SURROGATE_ID),
        };
        Self {
            dimension: table.dimension(),
            existing,
            next_id,
        }
    }

    /// Dimension this assigner numbers.
    pub fn dimension(&self) -> Dimension {
        self.dimension
    }

    /// Map every key (duplicates collapse) to a surrogate id.
    pub fn assign<I>(&self, keys: I) -> Result<KeyAssignment, NormalizeError>
    where
        I: IntoIterator<Item = NaturalKey>,
    {
        let batch: BTreeSet<NaturalKey> = keys.into_iter().collect();
        let mut ids = self.existing.clone();
        let mut new_keys = Vec::new();
        let mut reused = 0usize;
        let mut next_id = self.next_id;
        for key in batch {
            if ids.contains_key(&key) {
                reused += 1;
                continue;
            }
            let id = next_id.ok_or_else(|| NormalizeError::GraphInvariant {
                table: self.dimension.table_name().to_string(),
                details: format!("surrogate id space exhausted before key {key}"),
            })?;
            ids.insert(key.clone(), id);
            new_keys.push(key);
            next_id = id.checked_add(1);
        }
        info!(
            "[starschema:assign] dimension '{}' new={} reused={} next_id={:?}",
            self.dimension,
            new_keys.len(),
            reused,
            next_id
        );
        Ok(KeyAssignment {
            dimension: self.dimension,
            ids,
            new_keys,
            reused,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dimension::DimensionEntry;

    fn key(part: &str) -> NaturalKey {
        NaturalKey::from_parts([part])
    }

    #[test]
    fn ids_follow_ascending_key_order_from_one() {
        let assigner = SurrogateKeyAssigner::new(Dimension::Category);
        let assignment = assigner
            .assign([key("Technology"), key("Furniture"), key("Office Supplies")])
            .unwrap();
        assert_eq!(assignment.get(&key("Furniture")), Some(1));
        assert_eq!(assignment.get(&key("Office Supplies")), Some(2));
        assert_eq!(assignment.get(&key("Technology")), Some(3));
        assert_eq!(assignment.new_keys().len(), 3);
    }

    #[test]
    fn duplicate_keys_in_one_batch_collapse() {
        let assigner = SurrogateKeyAssigner::new(Dimension::Market);
        let assignment = assigner
            .assign([key("EU"), key("APAC"), key("EU"), key("APAC")])
            .unwrap();
        assert_eq!(assignment.len(), 2);
        assert_eq!(assignment.get(&key("APAC")), Some(1));
        assert_eq!(assignment.get(&key("EU")), Some(2));
    }

    #[test]
    fn existing_entries_keep_ids_and_seed_the_counter() {
        let table = DimensionTable::try_from_entries(
            Dimension::Segment,
            [
                DimensionEntry::new(4, key("Home Office")),
                DimensionEntry::new(9, key("Consumer")),
            ],
        )
        .unwrap();
        let assigner = SurrogateKeyAssigner::with_existing(&table);
        let assignment = assigner
            .assign([key("Corporate"), key("Consumer"), key("Alpha")])
            .unwrap();
        assert_eq!(assignment.get(&key("Consumer")), Some(9));
        assert_eq!(assignment.get(&key("Home Office")), Some(4));
        assert_eq!(assignment.get(&key("Alpha")), Some(10));
        assert_eq!(assignment.get(&key("Corporate")), Some(11));
        assert_eq!(assignment.reused(), 1);
    }

    #[test]
    fn last_representable_id_is_handed_out() {
        let table = DimensionTable::try_from_entries(
            Dimension::Market,
            [DimensionEntry::new(SurrogateId::MAX - 1, key("APAC"))],
        )
        .unwrap();
        let assignment = SurrogateKeyAssigner::with_existing(&table)
            .assign([key("EU")])
            .unwrap();
        assert_eq!(assignment.get(&key("EU")), Some(SurrogateId::MAX));

        let err = SurrogateKeyAssigner::with_existing(&table)
            .assign([key("EU"), key("LATAM")])
            .unwrap_err();
        assert!(matches!(
            err,
            NormalizeError::GraphInvariant { ref details, .. } if details.contains("LATAM")
        ));
    }

    #[test]
    fn reassignment_against_same_state_is_identical() {
        let table = DimensionTable::try_from_entries(
            Dimension::Segment,
            [DimensionEntry::new(1, key("Consumer"))],
        )
        .unwrap();
        let batch = [key("Corporate"), key("Consumer")];
        let first = SurrogateKeyAssigner::with_existing(&table)
            .assign(batch.clone())
            .unwrap();
        let second = SurrogateKeyAssigner::with_existing(&table)
            .assign(batch)
            .unwrap();
        assert_eq!(first, second);
    }
}
