use chrono::NaiveDate;

use starschema::{
    Column, Dimension, Discrepancy, FactRecord, FieldValue, IngestionConfig, NormalizationPipeline,
    PipelineConfig, RecordSet, load_csv_from_reader,
};

const CSV_FIXTURE: &str = "\
Global_Orders_ID,Order_Date,Ship_Date,Order_Priority,Ship_Mode,Discount,Profit,Quantity,Sales,Shipping_Cost,Customer_Name,Product_Name,Category,Sub_Category,Region,City,Country,State,Market,Segment
1,2021-03-04,2021-03-08,High,First Class,0.1,12.5,3,150.25,9.1,Ana Ruiz,Desk Lamp,Furniture,Furnishings,West,Portland,USA,Oregon,US,Consumer
2,2021-03-04 14:30:00,2021-03-09,Low,Standard Class,0,4.75,2.0,39.9,2.2,Ben Ode,Binder,Office Supplies,Binders,Central,Lagos,Nigeria,Lagos,Africa,Corporate
3,03/05/2021,03/10/2021,Medium,Same Day,0.2,-3,1,19.99,1.5,Ana Ruiz,Binder,Office Supplies,Binders,West,Portland,USA,Oregon,US,Consumer
4,2021-03-06,2021-03-07,NA,Standard Class,0,1,1,5,1,Cy Lin,Pen,Office Supplies,Art,East,Tokyo,Japan,Tokyo,APAC,Consumer
";

fn build_record(order_id: u64, customer: &str, market: &str, segment: &str, sales: f64) -> FactRecord {
    let date = NaiveDate::from_ymd_opt(2020, 1, order_id as u32)
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
        quantity: 2,
        sales,
        shipping_cost: 1.25,
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

fn pipeline() -> NormalizationPipeline {
    NormalizationPipeline::new(PipelineConfig::default()).unwrap()
}

#[test]
fn loaded_csv_round_trips_through_graph() {
    let loaded = load_csv_from_reader(CSV_FIXTURE.as_bytes(), &IngestionConfig::default()).unwrap();
    assert_eq!(loaded.report.rows_read, 4);
    assert_eq!(loaded.report.rows_kept, 3);
    assert_eq!(loaded.report.dropped_null_rows, 1);
    assert_eq!(loaded.report.expanded_country_aliases, 2);

    let records = loaded.records;
    assert_eq!(records.records()[0].country, "United States");
    assert_eq!(records.records()[1].quantity, 2);

    let pipeline = pipeline();
    let graph = pipeline.normalize(&records).unwrap();
    assert_eq!(graph.dimension(Dimension::Customer).unwrap().len(), 2);
    assert_eq!(graph.dimension(Dimension::Product).unwrap().len(), 2);
    assert_eq!(graph.dimension(Dimension::Location).unwrap().len(), 2);

    let report = pipeline.verify(&records, &pipeline.graph_view(&graph)).unwrap();
    assert!(report.passed(), "{report}");
    assert_eq!(report.source_rows, 3);
    assert_eq!(report.reconstructed_rows, 3);
}

#[test]
fn first_seen_customer_association_shows_up_as_field_discrepancies() {
    let records: RecordSet = vec![
        build_record(1, "Alice", "APAC", "Consumer", 120.0),
        build_record(2, "Alice", "EU", "Corporate", 80.0),
    ]
    .into();
    let pipeline = pipeline();
    let graph = pipeline.normalize(&records).unwrap();
    let report = pipeline.verify(&records, &pipeline.graph_view(&graph)).unwrap();

    assert!(!report.passed());
    assert_eq!(report.source_rows, report.reconstructed_rows);
    assert_eq!(
        report.discrepancies,
        vec![
            Discrepancy::Field {
                order_id: 2,
                column: Column::Market,
                dimension: Some(Dimension::Market),
                expected: FieldValue::Text("EU".into()),
                actual: FieldValue::Text("APAC".into()),
            },
            Discrepancy::Field {
                order_id: 2,
                column: Column::Segment,
                dimension: Some(Dimension::Segment),
                expected: FieldValue::Text("Corporate".into()),
                actual: FieldValue::Text("Consumer".into()),
            },
        ]
    );
    assert_eq!(report.discrepancies_for(Dimension::Customer).count(), 0);
    assert_eq!(report.discrepancies_for(Dimension::Market).count(), 1);
}

#[test]
fn shuffled_source_still_verifies() {
    let records: RecordSet = (1..=9)
        .map(|id| build_record(id, ["Ana", "Ben", "Cy"][(id % 3) as usize], "EU", "Consumer", id as f64 * 2.5))
        .collect();
    let pipeline = pipeline();
    let graph = pipeline.normalize(&records).unwrap();

    let mut shuffled = records.clone().into_records();
    shuffled.rotate_left(4);
    let report = pipeline
        .verify(&RecordSet::from(shuffled), &pipeline.graph_view(&graph))
        .unwrap();
    assert!(report.passed(), "{report}");
}

#[test]
fn dropped_fact_is_reported_as_missing_row() {
    let records: RecordSet = vec![
        build_record(1, "Ana", "EU", "Consumer", 10.0),
        build_record(2, "Ben", "EU", "Consumer", 20.0),
    ]
    .into();
    let pipeline = pipeline();
    let partial: RecordSet = vec![records.records()[0].clone()].into();
    let graph = pipeline.normalize(&partial).unwrap();

    let report = pipeline.verify(&records, &pipeline.graph_view(&graph)).unwrap();
    assert!(report.discrepancies.contains(&Discrepancy::RowCount {
        expected: 2,
        actual: 1
    }));
    assert!(report
        .discrepancies
        .iter()
        .any(|d| matches!(d, Discrepancy::MissingRow { order_id: 2, .. })));
}
