//! Foreign Key Resolver.
//!
//! Runs only after every dimension has been assigned. Dimension entries get
//! their associations resolved first, then every fact row is mapped to
//! surrogate ids. A customer (or product) keeps the association of the first
//! row that introduced it; later rows citing other parents resolve to the
//! same entry and are counted as association conflicts.

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, info};

use crate::assign::KeyAssignment;
use crate::data::{FACT_DIMENSIONS, FactRecord, ForeignKeys, NormalizedFact, RecordSet};
use crate::dimension::{Dimension, DimensionEntry, DimensionSpec, DimensionTable, NaturalKey};
use crate::errors::NormalizeError;
use crate::extract::Extraction;
use crate::types::{RowIndex, SurrogateId};

/// Output of the resolution phase.
#[derive(Clone, Debug, PartialEq)]
pub struct Resolution {
    /// Entries per dimension (pre-existing and new), in id order.
    pub entries: BTreeMap<Dimension, Vec<DimensionEntry>>,
    /// One normalized fact per source row, in source order.
    pub facts: Vec<NormalizedFact>,
    /// Rows whose parents differ from their entry's first-seen association.
    pub association_conflicts: BTreeMap<Dimension, usize>,
}

/// Substitutes natural keys with surrogate ids.
pub struct ForeignKeyResolver<'a> {
    specs: BTreeMap<Dimension, &'a DimensionSpec>,
    assignments: &'a BTreeMap<Dimension, KeyAssignment>,
}

impl<'a> ForeignKeyResolver<'a> {
    /// Build a resolver over fully assigned dimensions.
    pub fn new(
        specs: &'a [DimensionSpec],
        assignments: &'a BTreeMap<Dimension, KeyAssignment>,
    ) -> Result<Self, NormalizeError> {
        let specs: BTreeMap<Dimension, &DimensionSpec> =
            specs.iter().map(|spec| (spec.dimension, spec)).collect();
        for dimension in Dimension::ALL {
            if !specs.contains_key(&dimension) || !assignments.contains_key(&dimension) {
                return Err(NormalizeError::Configuration(format!(
                    "dimension '{dimension}' has no declaration or assignment to resolve against"
                )));
            }
        }
        Ok(Self { specs, assignments })
    }

    /// Resolve dimension associations and every fact row.
    pub fn resolve(
        &self,
        records: &RecordSet,
        extraction: &Extraction,
        existing: &BTreeMap<Dimension, DimensionTable>,
    ) -> Result<Resolution, NormalizeError> {
        let entries = self.resolve_entries(extraction, existing)?;
        let by_id: HashMap<(Dimension, SurrogateId), &DimensionEntry> = entries
            .iter()
            .flat_map(|(dimension, entries)| {
                entries.iter().map(move |entry| ((*dimension, entry.id), entry))
            })
            .collect();

        let mut facts = Vec::with_capacity(records.len());
        let mut association_conflicts = BTreeMap::new();
        for (row, record) in records.iter() {
            let fact = self.resolve_fact(row, record)?;
            for (dimension, id) in fact.keys.iter() {
                let Some(entry) = by_id.get(&(dimension, id)) else {
                    continue;
                };
                if self.conflicts_with(dimension, entry, record) {
                    debug!(
                        "[starschema:resolve] row {} (order {}) cites other parents for {} {}; keeping first-seen association",
                        row, record.order_id, dimension, entry.key
                    );
                    *association_conflicts.entry(dimension).or_insert(0usize) += 1;
                }
            }
            facts.push(fact);
        }

        for (dimension, count) in &association_conflicts {
            info!(
                "[starschema:resolve] dimension '{}' kept first-seen association over {} conflicting rows",
                dimension, count
            );
        }
        info!("[starschema:resolve] resolved {} facts", facts.len());
        Ok(Resolution {
            entries,
            facts,
            association_conflicts,
        })
    }

    /// Build the entry list of every dimension.
    ///
    /// Pre-existing entries are carried unchanged; new entries get their
    /// associations from the row that first introduced their key.
    pub fn resolve_entries(
        &self,
        extraction: &Extraction,
        existing: &BTreeMap<Dimension, DimensionTable>,
    ) -> Result<BTreeMap<Dimension, Vec<DimensionEntry>>, NormalizeError> {
        let mut resolved = BTreeMap::new();
        for (dimension, assignment) in self.assignments {
            let spec = self.spec(*dimension)?;
            let prior = existing.get(dimension);
            let mut entries = Vec::with_capacity(assignment.len());
            for (key, id) in assignment.iter() {
                if let Some(entry) = prior.and_then(|table| table.get(id))
                    && entry.key == *key
                {
                    entries.push(entry.clone());
                    continue;
                }
                let parents = extraction
                    .get(*dimension)
                    .and_then(|extracted| extracted.associations(key))
                    .ok_or_else(|| NormalizeError::GraphInvariant {
                        table: dimension.table_name().to_string(),
                        details: format!("new key {key} was not produced by extraction"),
                    })?;
                let mut references = BTreeMap::new();
                for (reference, parent_key) in spec.references.iter().zip(parents) {
                    let parent_id = self.lookup(reference.dimension, parent_key, None)?;
                    references.insert(reference.dimension, parent_id);
                }
                entries.push(DimensionEntry {
                    id,
                    key: key.clone(),
                    references,
                });
            }
            entries.sort_by_key(|entry| entry.id);
            resolved.insert(*dimension, entries);
        }
        Ok(resolved)
    }

    /// Map one fact row to a normalized fact.
    pub fn resolve_fact(
        &self,
        row: RowIndex,
        record: &FactRecord,
    ) -> Result<NormalizedFact, NormalizeError> {
        let mut ids: [SurrogateId; 5] = [0; 5];
        for (slot, dimension) in ids.iter_mut().zip(FACT_DIMENSIONS) {
            let spec = self.spec(dimension)?;
            let key = spec
                .key_for(record)
                .map_err(|column| NormalizeError::MalformedInput {
                    row: Some(row),
                    column: column.header().to_string(),
                    reason: format!("is null; cannot resolve dimension '{dimension}'"),
                })?;
            *slot = self.lookup(dimension, &key, Some(row))?;
        }
        let [category_id, sub_category_id, customer_id, product_id, location_id] = ids;
        Ok(NormalizedFact {
            order_id: record.order_id,
            order_date: record.order_date,
            ship_date: record.ship_date,
            order_priority: record.order_priority.clone(),
            ship_mode: record.ship_mode.clone(),
            discount: record.discount,
            profit: record.profit,
            quantity: record.quantity,
            sales: record.sales,
            shipping_cost: record.shipping_cost,
            keys: ForeignKeys {
                category_id,
                sub_category_id,
                customer_id,
                product_id,
                location_id,
            },
        })
    }

    fn conflicts_with(
        &self,
        dimension: Dimension,
        entry: &DimensionEntry,
        record: &FactRecord,
    ) -> bool {
        let Ok(spec) = self.spec(dimension) else {
            return false;
        };
        let Ok(parent_keys) = spec.reference_keys_for(record) else {
            return false;
        };
        spec.references
            .iter()
            .zip(parent_keys)
            .any(|(reference, parent_key)| {
                let cited = self
                    .assignments
                    .get(&reference.dimension)
                    .and_then(|assignment| assignment.get(&parent_key));
                cited.is_some() && cited != entry.references.get(&reference.dimension).copied()
            })
    }

    fn spec(&self, dimension: Dimension) -> Result<&'a DimensionSpec, NormalizeError> {
        self.specs.get(&dimension).copied().ok_or_else(|| {
            NormalizeError::Configuration(format!("dimension '{dimension}' is not declared"))
        })
    }

    fn lookup(
        &self,
        dimension: Dimension,
        key: &NaturalKey,
        row: Option<RowIndex>,
    ) -> Result<SurrogateId, NormalizeError> {
        self.assignments
            .get(&dimension)
            .and_then(|assignment| assignment.get(key))
            .ok_or_else(|| NormalizeError::UnresolvedReference {
                dimension,
                key: key.clone(),
                row,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assign::SurrogateKeyAssigner;
    use crate::config::retail_dimensions;
    use crate::data::Column;
    use crate::extract::DimensionExtractor;
    use chrono::NaiveDate;

    fn record(order_id: u64, customer: &str, market: &str, segment: &str) -> FactRecord {
        let date = NaiveDate::from_ymd_opt(2020, 1, 5)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        FactRecord {
            order_id,
            order_date: date,
            ship_date: date,
            order_priority: "High".into(),
            ship_mode: "First Class".into(),
            discount: 0.0,
            profit: 5.0,
            quantity: 1,
            sales: 100.0,
            shipping_cost: 3.0,
            customer_name: customer.into(),
            product_name: "Office Chair".into(),
            category: "Furniture".into(),
            sub_category: "Chairs".into(),
            region: "East".into(),
            city: "Tokyo".into(),
            country: "Japan".into(),
            state: "Tokyo".into(),
            market: market.into(),
            segment: segment.into(),
        }
    }

    fn assign_all(
        specs: &[DimensionSpec],
        extraction: &Extraction,
    ) -> BTreeMap<Dimension, KeyAssignment> {
        specs
            .iter()
            .map(|spec| {
                let keys = extraction.get(spec.dimension).unwrap().distinct_keys();
                let assignment = SurrogateKeyAssigner::new(spec.dimension)
                    .assign(keys)
                    .unwrap();
                (spec.dimension, assignment)
            })
            .collect()
    }

    #[test]
    fn conflicting_rows_resolve_to_first_seen_customer() {
        let specs = retail_dimensions();
        let records: RecordSet = vec![
            record(1, "Alice", "APAC", "Consumer"),
            record(2, "Alice", "EU", "Corporate"),
        ]
        .into();
        let extraction = DimensionExtractor::new(&specs).extract(&records).unwrap();
        let assignments = assign_all(&specs, &extraction);
        let resolver = ForeignKeyResolver::new(&specs, &assignments).unwrap();
        let resolution = resolver
            .resolve(&records, &extraction, &BTreeMap::new())
            .unwrap();

        let customers = &resolution.entries[&Dimension::Customer];
        assert_eq!(customers.len(), 1);
        let apac = assignments[&Dimension::Market]
            .get(&NaturalKey::from_parts(["APAC"]))
            .unwrap();
        assert_eq!(customers[0].references[&Dimension::Market], apac);
        assert_eq!(
            resolution.facts[0].keys.customer_id,
            resolution.facts[1].keys.customer_id
        );
        assert_eq!(resolution.association_conflicts[&Dimension::Customer], 1);
    }

    #[test]
    fn unknown_key_is_an_unresolved_reference() {
        let specs = retail_dimensions();
        let registered: RecordSet = vec![record(1, "Alice", "APAC", "Consumer")].into();
        let extraction = DimensionExtractor::new(&specs).extract(&registered).unwrap();
        let assignments = assign_all(&specs, &extraction);
        let resolver = ForeignKeyResolver::new(&specs, &assignments).unwrap();

        let err = resolver
            .resolve_fact(3, &record(9, "Bob", "APAC", "Consumer"))
            .unwrap_err();
        assert!(matches!(
            err,
            NormalizeError::UnresolvedReference { dimension: Dimension::Customer, ref key, row: Some(3) }
                if key == &NaturalKey::from_parts(["Bob"])
        ));
    }

    #[test]
    fn null_key_part_is_malformed_input() {
        let specs = retail_dimensions();
        let records: RecordSet = vec![record(1, "Alice", "APAC", "Consumer")].into();
        let extraction = DimensionExtractor::new(&specs).extract(&records).unwrap();
        let assignments = assign_all(&specs, &extraction);
        let resolver = ForeignKeyResolver::new(&specs, &assignments).unwrap();

        let mut broken = record(2, "Alice", "APAC", "Consumer");
        broken.city.clear();
        let err = resolver.resolve_fact(1, &broken).unwrap_err();
        assert!(matches!(
            err,
            NormalizeError::MalformedInput { row: Some(1), ref column, .. } if column == Column::City.header()
        ));
    }

    #[test]
    fn existing_entries_keep_their_associations() {
        let specs = retail_dimensions();
        let records: RecordSet = vec![record(1, "Alice", "EU", "Corporate")].into();
        let extraction = DimensionExtractor::new(&specs).extract(&records).unwrap();

        let mut existing = BTreeMap::new();
        let mut stored_alice = DimensionEntry::new(1, NaturalKey::from_parts(["Alice"]));
        stored_alice.references.insert(Dimension::Market, 1);
        stored_alice.references.insert(Dimension::Segment, 1);
        existing.insert(
            Dimension::Customer,
            DimensionTable::try_from_entries(Dimension::Customer, [stored_alice.clone()]).unwrap(),
        );
        existing.insert(
            Dimension::Market,
            DimensionTable::try_from_entries(
                Dimension::Market,
                [DimensionEntry::new(1, NaturalKey::from_parts(["APAC"]))],
            )
            .unwrap(),
        );
        existing.insert(
            Dimension::Segment,
            DimensionTable::try_from_entries(
                Dimension::Segment,
                [DimensionEntry::new(1, NaturalKey::from_parts(["Consumer"]))],
            )
            .unwrap(),
        );

        let assignments: BTreeMap<Dimension, KeyAssignment> = specs
            .iter()
            .map(|spec| {
                let assigner = match existing.get(&spec.dimension) {
                    Some(table) => SurrogateKeyAssigner::with_existing(table),
                    None => SurrogateKeyAssigner::new(spec.dimension),
                };
                let keys = extraction.get(spec.dimension).unwrap().distinct_keys();
                (spec.dimension, assigner.assign(keys).unwrap())
            })
            .collect();
        let resolver = ForeignKeyResolver::new(&specs, &assignments).unwrap();
        let resolution = resolver.resolve(&records, &extraction, &existing).unwrap();

        assert_eq!(resolution.entries[&Dimension::Customer], vec![stored_alice]);
        assert_eq!(resolution.entries[&Dimension::Market].len(), 2);
        assert_eq!(resolution.association_conflicts[&Dimension::Customer], 1);
    }
}
