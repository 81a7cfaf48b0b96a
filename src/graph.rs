//! Relational Graph and its builder.
//!
//! `GraphBuilder::build` is the last gate before a graph is handed to a
//! store: ids and natural keys must be unique per dimension, and every
//! association and fact foreign key must point at an existing entry.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDateTime;
use tracing::info;

use crate::constants::store::FACT_TABLE;
use crate::data::{Column, FactRecord, NormalizedFact};
use crate::dimension::{Dimension, DimensionEntry, DimensionSpec, DimensionTable, NaturalKey};
use crate::errors::NormalizeError;
use crate::resolve::Resolution;
use crate::types::SurrogateId;

/// Dimension tables plus the normalized fact table of one run.
#[derive(Clone, Debug, PartialEq)]
pub struct RelationalGraph {
    dimensions: BTreeMap<Dimension, DimensionTable>,
    facts: Vec<NormalizedFact>,
}

impl RelationalGraph {
    /// Table for `dimension`; every dimension is present, possibly empty.
    pub fn dimension(&self, dimension: Dimension) -> Option<&DimensionTable> {
        self.dimensions.get(&dimension)
    }

    /// All tables in dependency order.
    pub fn dimensions(&self) -> impl Iterator<Item = &DimensionTable> {
        self.dimensions.values()
    }

    /// Normalized facts in insertion order.
    pub fn facts(&self) -> &[NormalizedFact] {
        &self.facts
    }

    /// Entry bound to `id` in `dimension`.
    pub fn entry(
        &self,
        dimension: Dimension,
        id: SurrogateId,
    ) -> Result<&DimensionEntry, NormalizeError> {
        self.dimensions
            .get(&dimension)
            .and_then(|table| table.get(id))
            .ok_or_else(|| NormalizeError::GraphInvariant {
                table: dimension.table_name().to_string(),
                details: format!("no entry with surrogate id {id}"),
            })
    }

    /// Join every fact back onto its dimensions.
    ///
    /// Attributes reached through associations (a customer's market and
    /// segment) are written first; the fact's own foreign keys then take
    /// precedence for any column both paths cover.
    pub fn denormalize(&self, specs: &[DimensionSpec]) -> Result<Vec<FactRecord>, NormalizeError> {
        let mut rows = Vec::with_capacity(self.facts.len());
        for fact in &self.facts {
            let mut record = skeleton_record(fact);
            for (dimension, id) in fact.keys.iter() {
                let spec = spec_for(specs, dimension)?;
                let entry = self.entry(dimension, id)?;
                for reference in &spec.references {
                    let parent_id = entry.references.get(&reference.dimension).ok_or_else(|| {
                        NormalizeError::GraphInvariant {
                            table: dimension.table_name().to_string(),
                            details: format!(
                                "entry {} has no association to '{}'",
                                entry.key, reference.dimension
                            ),
                        }
                    })?;
                    let parent = self.entry(reference.dimension, *parent_id)?;
                    write_key(&mut record, &reference.columns, &parent.key)?;
                }
            }
            for (dimension, id) in fact.keys.iter() {
                let spec = spec_for(specs, dimension)?;
                let entry = self.entry(dimension, id)?;
                write_key(&mut record, &spec.key_columns, &entry.key)?;
            }
            rows.push(record);
        }
        Ok(rows)
    }
}

fn spec_for(specs: &[DimensionSpec], dimension: Dimension) -> Result<&DimensionSpec, NormalizeError> {
    specs
        .iter()
        .find(|spec| spec.dimension == dimension)
        .ok_or_else(|| NormalizeError::Configuration(format!("dimension '{dimension}' is not declared")))
}

fn skeleton_record(fact: &NormalizedFact) -> FactRecord {
    FactRecord {
        order_id: fact.order_id,
        order_date: fact.order_date,
        ship_date: fact.ship_date,
        order_priority: fact.order_priority.clone(),
        ship_mode: fact.ship_mode.clone(),
        discount: fact.discount,
        profit: fact.profit,
        quantity: fact.quantity,
        sales: fact.sales,
        shipping_cost: fact.shipping_cost,
        customer_name: String::new(),
        product_name: String::new(),
        category: String::new(),
        sub_category: String::new(),
        region: String::new(),
        city: String::new(),
        country: String::new(),
        state: String::new(),
        market: String::new(),
        segment: String::new(),
    }
}

fn write_key(
    record: &mut FactRecord,
    columns: &[Column],
    key: &NaturalKey,
) -> Result<(), NormalizeError> {
    if columns.len() != key.arity() {
        return Err(NormalizeError::GraphInvariant {
            table: FACT_TABLE.to_string(),
            details: format!(
                "key {key} has {} parts but {} columns are declared",
                key.arity(),
                columns.len()
            ),
        });
    }
    for (column, part) in columns.iter().zip(key.parts()) {
        if let Some(slot) = record.text_mut(*column) {
            slot.clone_from(part);
        }
    }
    Ok(())
}

/// Collects entries and facts, then validates them into a [`RelationalGraph`].
#[derive(Clone, Debug, Default)]
pub struct GraphBuilder {
    dimensions: BTreeMap<Dimension, Vec<DimensionEntry>>,
    facts: Vec<NormalizedFact>,
}

impl GraphBuilder {
    /// Empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder seeded with the output of the resolution phase.
    pub fn from_resolution(resolution: Resolution) -> Self {
        Self {
            dimensions: resolution.entries,
            facts: resolution.facts,
        }
    }

    /// Append entries to `dimension`.
    pub fn add_entries(
        &mut self,
        dimension: Dimension,
        entries: impl IntoIterator<Item = DimensionEntry>,
    ) -> &mut Self {
        self.dimensions.entry(dimension).or_default().extend(entries);
        self
    }

    /// Append normalized facts.
    pub fn add_facts(&mut self, facts: impl IntoIterator<Item = NormalizedFact>) -> &mut Self {
        self.facts.extend(facts);
        self
    }

    /// Validate and assemble the graph.
    pub fn build(self) -> Result<RelationalGraph, NormalizeError> {
        let mut entries = self.dimensions;
        let mut dimensions = BTreeMap::new();
        for dimension in Dimension::ALL {
            let table =
                DimensionTable::try_from_entries(dimension, entries.remove(&dimension).unwrap_or_default())?;
            dimensions.insert(dimension, table);
        }

        for table in dimensions.values() {
            for entry in table.iter() {
                for (parent, parent_id) in &entry.references {
                    let present = dimensions
                        .get(parent)
                        .is_some_and(|parent_table| parent_table.get(*parent_id).is_some());
                    if !present {
                        return Err(NormalizeError::GraphInvariant {
                            table: table.dimension().table_name().to_string(),
                            details: format!(
                                "entry {} references missing {} id {}",
                                entry.key, parent, parent_id
                            ),
                        });
                    }
                }
            }
        }

        let mut order_ids = BTreeSet::new();
        for fact in &self.facts {
            if !order_ids.insert(fact.order_id) {
                return Err(NormalizeError::GraphInvariant {
                    table: FACT_TABLE.to_string(),
                    details: format!("order {} appears more than once", fact.order_id),
                });
            }
            for (dimension, id) in fact.keys.iter() {
                let present = dimensions
                    .get(&dimension)
                    .is_some_and(|table| table.get(id).is_some());
                if !present {
                    return Err(NormalizeError::GraphInvariant {
                        table: FACT_TABLE.to_string(),
                        details: format!(
                            "order {} references missing {} id {}",
                            fact.order_id, dimension, id
                        ),
                    });
                }
            }
        }

        info!(
            "[starschema:graph] graph valid: facts={} entries={}",
            self.facts.len(),
            dimensions.values().map(DimensionTable::len).sum::<usize>()
        );
        Ok(RelationalGraph {
            dimensions,
            facts: self.facts,
        })
    }
}

/// Calendar-date granularity of a timestamp (time-of-day dropped).
pub fn at_midnight(value: NaiveDateTime) -> NaiveDateTime {
    value.date().and_time(chrono::NaiveTime::MIN)
}
