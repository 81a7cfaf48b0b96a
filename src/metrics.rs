use std::collections::HashMap;

use serde::Serialize;

use crate::dimension::Dimension;
use crate::graph::RelationalGraph;
use crate::types::SurrogateId;

/// Cardinality and fact fan-out of a relational graph.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GraphStats {
    /// Facts in the graph.
    pub facts: usize,
    /// One entry per dimension, in declaration order.
    pub dimensions: Vec<DimensionStats>,
}

/// Per-dimension entry count and fact fan-out.
///
/// Market and segment are counted through each fact's customer.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DimensionStats {
    /// Dimension described.
    pub dimension: Dimension,
    /// Entries in the dimension.
    pub entries: usize,
    /// Entries cited by at least one fact.
    pub referenced: usize,
    /// Fewest facts on any referenced entry.
    pub min_facts: usize,
    /// Most facts on any referenced entry.
    pub max_facts: usize,
    /// Mean facts per referenced entry.
    pub mean_facts: f64,
}

/// Compute cardinality and fan-out for every dimension of `graph`.
pub fn graph_stats(graph: &RelationalGraph) -> GraphStats {
    let mut fan_out: HashMap<Dimension, HashMap<SurrogateId, usize>> = HashMap::new();
    for fact in graph.facts() {
        for (dimension, id) in fact.keys.iter() {
            *fan_out.entry(dimension).or_default().entry(id).or_default() += 1;
        }
        let customer = graph
            .dimension(Dimension::Customer)
            .and_then(|table| table.get(fact.keys.customer_id));
        if let Some(customer) = customer {
            for (parent, parent_id) in &customer.references {
                *fan_out
                    .entry(*parent)
                    .or_default()
                    .entry(*parent_id)
                    .or_default() += 1;
            }
        }
    }

    let dimensions = graph
        .dimensions()
        .map(|table| {
            let counts = fan_out.get(&table.dimension());
            let values: Vec<usize> = counts
                .map(|counts| counts.values().copied().collect())
                .unwrap_or_default();
            let total: usize = values.iter().sum();
            DimensionStats {
                dimension: table.dimension(),
                entries: table.len(),
                referenced: values.len(),
                min_facts: values.iter().copied().min().unwrap_or(0),
                max_facts: values.iter().copied().max().unwrap_or(0),
                mean_facts: if values.is_empty() {
                    0.0
                } else {
                    total as f64 / values.len() as f64
                },
            }
        })
        .collect();

    GraphStats {
        facts: graph.facts().len(),
        dimensions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{ForeignKeys, NormalizedFact};
    use crate::dimension::{DimensionEntry, NaturalKey};
    use crate::graph::GraphBuilder;
    use chrono::NaiveDate;

    fn fact(order_id: u64, customer_id: SurrogateId) -> NormalizedFact {
        let date = NaiveDate::from_ymd_opt(2021, 6, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        NormalizedFact {
            order_id,
            order_date: date,
            ship_date: date,
            order_priority: "Medium".into(),
            ship_mode: "Standard Class".into(),
            discount: 0.0,
            profit: 1.0,
            quantity: 1,
            sales: 5.0,
            shipping_cost: 0.5,
            keys: ForeignKeys {
                category_id: 1,
                sub_category_id: 1,
                customer_id,
                product_id: 1,
                location_id: 1,
            },
        }
    }

    #[test]
    fn fan_out_counts_facts_per_entry() {
        let customer = |id, name: &str| {
            let mut entry = DimensionEntry::new(id, NaturalKey::from_parts([name]));
            entry.references.insert(Dimension::Market, 1);
            entry
        };
        let one = |name: &str| [DimensionEntry::new(1, NaturalKey::from_parts([name]))];
        let mut builder = GraphBuilder::new();
        builder
            .add_entries(Dimension::Category, one("Technology"))
            .add_entries(Dimension::SubCategory, one("Phones"))
            .add_entries(Dimension::Market, one("LATAM"))
            .add_entries(Dimension::Segment, one("Corporate"))
            .add_entries(Dimension::Location, one("Somewhere"))
            .add_entries(Dimension::Product, one("Phone"))
            .add_entries(Dimension::Customer, [customer(1, "Ana"), customer(2, "Ben")])
            .add_facts([fact(1, 1), fact(2, 1), fact(3, 2)]);
        let stats = graph_stats(&builder.build().unwrap());

        assert_eq!(stats.facts, 3);
        let customers = stats
            .dimensions
            .iter()
            .find(|d| d.dimension == Dimension::Customer)
            .unwrap();
        assert_eq!(customers.entries, 2);
        assert_eq!(customers.min_facts, 1);
        assert_eq!(customers.max_facts, 2);
        assert!((customers.mean_facts - 1.5).abs() < 1e-12);

        let markets = stats
            .dimensions
            .iter()
            .find(|d| d.dimension == Dimension::Market)
            .unwrap();
        assert_eq!(markets.max_facts, 3);
        let segments = stats
            .dimensions
            .iter()
            .find(|d| d.dimension == Dimension::Segment)
            .unwrap();
        assert_eq!(segments.referenced, 0);
    }
}
