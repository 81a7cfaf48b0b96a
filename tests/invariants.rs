use std::collections::{BTreeMap, BTreeSet};

use chrono::{NaiveDate, NaiveDateTime};

use starschema::{
    Column, Dimension, DimensionEntry, DimensionTable, FactRecord, NaturalKey,
    NormalizationPipeline, NormalizeError, PipelineConfig, RecordSet, RelationalGraph,
};

const CUSTOMERS: [(&str, &str, &str); 4] = [
    ("Alice", "APAC", "Consumer"),
    ("Bruno", "EU", "Corporate"),
    ("Chen", "APAC", "Home Office"),
    ("Dara", "LATAM", "Consumer"),
];

const PRODUCTS: [(&str, &str, &str); 3] = [
    ("Office Chair", "Furniture", "Chairs"),
    ("Stapler", "Office Supplies", "Fasteners"),
    ("Phone", "Technology", "Phones"),
];

const LOCATIONS: [(&str, &str, &str, &str); 3] = [
    ("East", "Tokyo", "Japan", "Tokyo"),
    ("Central", "Berlin", "Germany", "Berlin"),
    ("South", "Lima", "Peru", "Lima"),
];

fn day(month: u32, day: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2020, month, day)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

fn build_record(order_id: u64, seed: usize) -> FactRecord {
    let (customer, market, segment) = CUSTOMERS[seed % CUSTOMERS.len()];
    let (product, category, sub_category) = PRODUCTS[(seed / 2) % PRODUCTS.len()];
    let (region, city, country, state) = LOCATIONS[(seed * 7 + 1) % LOCATIONS.len()];
    FactRecord {
        order_id,
        order_date: day(1 + (seed % 12) as u32, 1 + (seed % 28) as u32),
        ship_date: day(1 + (seed % 12) as u32, 1 + (seed % 28) as u32),
        order_priority: "Medium".into(),
        ship_mode: "Standard Class".into(),
        discount: 0.05 * (seed % 4) as f64,
        profit: seed as f64 * 1.5 - 10.0,
        quantity: 1 + (seed % 5) as i64,
        sales: 10.0 + seed as f64 * 3.25,
        shipping_cost: 2.0 + (seed % 3) as f64,
        customer_name: customer.into(),
        product_name: product.into(),
        category: category.into(),
        sub_category: sub_category.into(),
        region: region.into(),
        city: city.into(),
        country: country.into(),
        state: state.into(),
        market: market.into(),
        segment: segment.into(),
    }
}

fn build_records(count: usize) -> RecordSet {
    (0..count).map(|idx| build_record(idx as u64 + 1, idx)).collect()
}

fn pipeline() -> NormalizationPipeline {
    NormalizationPipeline::new(PipelineConfig::default()).unwrap()
}

fn ids_by_key(graph: &RelationalGraph) -> BTreeMap<(Dimension, NaturalKey), u64> {
    graph
        .dimensions()
        .flat_map(|table| {
            table
                .iter()
                .map(move |entry| ((table.dimension(), entry.key.clone()), entry.id))
        })
        .collect()
}

#[test]
fn entry_counts_equal_distinct_keys() {
    let records = build_records(40);
    let graph = pipeline().normalize(&records).unwrap();
    let config = PipelineConfig::default();
    for spec in &config.dimensions {
        let distinct: BTreeSet<NaturalKey> = records
            .records()
            .iter()
            .map(|record| spec.key_for(record).unwrap())
            .collect();
        assert_eq!(
            graph.dimension(spec.dimension).unwrap().len(),
            distinct.len(),
            "dimension {}",
            spec.dimension
        );
    }
}

#[test]
fn every_fact_key_resolves() {
    let records = build_records(25);
    let graph = pipeline().normalize(&records).unwrap();
    assert_eq!(graph.facts().len(), records.len());
    for fact in graph.facts() {
        for (dimension, id) in fact.keys.iter() {
            assert!(
                graph.dimension(dimension).unwrap().get(id).is_some(),
                "order {} has dangling {} id {}",
                fact.order_id,
                dimension,
                id
            );
        }
    }
    for table in graph.dimensions() {
        for entry in table.iter() {
            for (parent, id) in &entry.references {
                assert!(graph.dimension(*parent).unwrap().get(*id).is_some());
            }
        }
    }
}

#[test]
fn ids_do_not_depend_on_row_order() {
    let records = build_records(30);
    let mut reversed: Vec<FactRecord> = records.records().to_vec();
    reversed.reverse();
    let forward = pipeline().normalize(&records).unwrap();
    let backward = pipeline().normalize(&RecordSet::from(reversed)).unwrap();

    let forward_ids = ids_by_key(&forward);
    let backward_ids = ids_by_key(&backward);
    assert_eq!(forward_ids, backward_ids);

    let customers = forward.dimension(Dimension::Customer).unwrap();
    let names: Vec<&str> = customers
        .iter()
        .map(|entry| entry.key.parts()[0].as_str())
        .collect();
    assert_eq!(names, vec!["Alice", "Bruno", "Chen", "Dara"]);
}

#[test]
fn reassignment_against_same_state_adds_nothing() {
    let records = build_records(12);
    let pipeline = pipeline();
    let first = pipeline.normalize(&records).unwrap();
    let existing: BTreeMap<Dimension, DimensionTable> = first
        .dimensions()
        .map(|table| (table.dimension(), table.clone()))
        .collect();

    let (second, report) = pipeline.normalize_against(&records, &existing).unwrap();
    assert_eq!(ids_by_key(&first), ids_by_key(&second));
    assert!(report.dimensions.iter().all(|d| d.new_keys == 0));
    let (third, _) = pipeline.normalize_against(&records, &existing).unwrap();
    assert_eq!(second, third);
}

#[test]
fn new_keys_continue_after_existing_max_id() {
    let records = build_records(4);
    let existing: BTreeMap<Dimension, DimensionTable> = [(
        Dimension::Market,
        DimensionTable::try_from_entries(
            Dimension::Market,
            [DimensionEntry::new(40, NaturalKey::from_parts(["EU"]))],
        )
        .unwrap(),
    )]
    .into_iter()
    .collect();
    let (graph, _) = pipeline().normalize_against(&records, &existing).unwrap();
    let markets = graph.dimension(Dimension::Market).unwrap();
    assert_eq!(markets.lookup(&NaturalKey::from_parts(["EU"])), Some(40));
    assert_eq!(markets.lookup(&NaturalKey::from_parts(["APAC"])), Some(41));
    assert_eq!(markets.lookup(&NaturalKey::from_parts(["LATAM"])), Some(42));
}

#[test]
fn example_scenario_keeps_first_seen_customer_association() {
    let mut first = build_record(1, 0);
    first.order_date = day(1, 5);
    first.ship_date = day(1, 8);
    first.sales = 120.0;
    first.product_name = "Office Chair".into();
    first.category = "Furniture".into();
    first.sub_category = "Chairs".into();
    first.region = "East".into();
    first.city = "Tokyo".into();
    first.country = "Japan".into();
    first.state = "Tokyo".into();
    let mut second = first.clone();
    second.order_id = 2;
    second.order_date = day(2, 1);
    second.ship_date = day(2, 3);
    second.sales = 80.0;
    second.market = "EU".into();
    second.segment = "Corporate".into();

    let graph = pipeline()
        .normalize(&RecordSet::from(vec![first, second]))
        .unwrap();
    for dimension in [
        Dimension::Category,
        Dimension::SubCategory,
        Dimension::Location,
        Dimension::Product,
        Dimension::Customer,
    ] {
        assert_eq!(graph.dimension(dimension).unwrap().len(), 1, "{dimension}");
    }
    let customer = graph.dimension(Dimension::Customer).unwrap().iter().next().unwrap();
    let market = graph
        .entry(Dimension::Market, customer.references[&Dimension::Market])
        .unwrap();
    let segment = graph
        .entry(Dimension::Segment, customer.references[&Dimension::Segment])
        .unwrap();
    assert_eq!(market.key, NaturalKey::from_parts(["APAC"]));
    assert_eq!(segment.key, NaturalKey::from_parts(["Consumer"]));
    assert_eq!(graph.facts().len(), 2);
    assert!(graph.facts().iter().all(|fact| fact.keys.customer_id == customer.id));
}

#[test]
fn null_key_part_surfaces_as_malformed_input() {
    let mut records: Vec<FactRecord> = build_records(3).into_records();
    records[2].state.clear();
    let err = pipeline().normalize(&RecordSet::from(records)).unwrap_err();
    assert!(matches!(
        err,
        NormalizeError::MalformedInput { row: Some(2), ref column, .. } if column == Column::State.header()
    ));
}

#[test]
fn conflicting_additive_batch_never_renumbers() {
    let records = build_records(6);
    let pipeline = pipeline();
    let first = pipeline.normalize(&records).unwrap();
    let existing: BTreeMap<Dimension, DimensionTable> = first
        .dimensions()
        .map(|table| (table.dimension(), table.clone()))
        .collect();

    let mut extra = build_record(100, 1);
    extra.customer_name = "Aaron".into();
    let (second, report) = pipeline
        .normalize_against(&RecordSet::from(vec![extra]), &existing)
        .unwrap();
    let before = ids_by_key(&first);
    let after = ids_by_key(&second);
    for (key, id) in &before {
        assert_eq!(after.get(key), Some(id));
    }
    let customers = report
        .dimensions
        .iter()
        .find(|d| d.dimension == Dimension::Customer)
        .unwrap();
    assert_eq!(customers.new_keys, 1);
    let max_before = first.dimension(Dimension::Customer).unwrap().max_id().unwrap();
    assert_eq!(
        second
            .dimension(Dimension::Customer)
            .unwrap()
            .lookup(&NaturalKey::from_parts(["Aaron"])),
        Some(max_before + 1)
    );
}
