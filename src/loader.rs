//! Record Loader collaborator: CSV ingestion and preprocessing.
//!
//! Produces the fully typed, null-free Record Set the normalization core
//! expects. Rows with a null in any required cell are dropped, text is
//! whitespace-normalized, country aliases are expanded, and every text
//! field is cut to its column cap.

use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::IngestionConfig;
use crate::constants::ingestion::{DATE_OUTPUT_FORMAT, DATETIME_OUTPUT_FORMAT};
use crate::data::{Column, ColumnKind, FactRecord, RecordSet};
use crate::errors::NormalizeError;
use crate::hash::stable_hash_order;
use crate::types::{OrderId, RowIndex};
use crate::utils::{is_null_token, truncate_chars};

/// Counters describing one load.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    /// Data rows in the file.
    pub rows_read: usize,
    /// Rows that made it into the Record Set.
    pub rows_kept: usize,
    /// Rows dropped because a required cell was empty or a null token.
    pub dropped_null_rows: usize,
    /// Text cells cut to their column cap.
    pub truncated_fields: usize,
    /// Country cells rewritten through an alias.
    pub expanded_country_aliases: usize,
}

/// Records plus the counters of the load that produced them.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LoadedRecords {
    /// Cleaned rows.
    pub records: RecordSet,
    /// Counters gathered while loading.
    pub report: LoadReport,
}

/// Source of a typed Record Set.
pub trait RecordLoader {
    /// Read and clean the whole source.
    fn load(&self) -> Result<LoadedRecords, NormalizeError>;
}

/// Loads a CSV file from disk.
#[derive(Clone, Debug)]
pub struct CsvRecordLoader {
    path: PathBuf,
    config: IngestionConfig,
}

impl CsvRecordLoader {
    /// Loader for the CSV at `path`.
    pub fn new<P: Into<PathBuf>>(path: P, config: IngestionConfig) -> Self {
        Self {
            path: path.into(),
            config,
        }
    }

    /// Source file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecordLoader for CsvRecordLoader {
    fn load(&self) -> Result<LoadedRecords, NormalizeError> {
        let file = File::open(&self.path)?;
        let loaded = load_csv_from_reader(file, &self.config)?;
        info!(
            "[starschema:loader] loaded {} rows from {}",
            loaded.report.rows_kept,
            self.path.display()
        );
        Ok(loaded)
    }
}

/// Parse CSV text from any reader.
///
/// `Global_Orders_ID` is optional; without it each row's order id is its
/// 1-based data row number. Extra columns are ignored.
pub fn load_csv_from_reader<R: io::Read>(
    reader: R,
    config: &IngestionConfig,
) -> Result<LoadedRecords, NormalizeError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    let headers = reader.headers()?.clone();
    let mut positions = HashMap::new();
    for (idx, header) in headers.iter().enumerate() {
        if let Some(column) = Column::from_header(header) {
            positions.entry(column).or_insert(idx);
        }
    }
    if let Some(missing) = Column::ALL
        .into_iter()
        .find(|column| *column != Column::OrderId && !positions.contains_key(column))
    {
        return Err(NormalizeError::MalformedInput {
            row: None,
            column: missing.header().to_string(),
            reason: "header is missing".into(),
        });
    }

    let mut records = RecordSet::new();
    let mut report = LoadReport::default();
    let mut buffer = csv::StringRecord::new();
    let mut row: RowIndex = 0;
    while reader.read_record(&mut buffer)? {
        let current = row;
        row += 1;
        report.rows_read += 1;
        let cells = RowCells {
            row: current,
            record: &buffer,
            positions: &positions,
        };
        if let Some(column) = cells.first_null(&config.null_tokens) {
            debug!(
                "[starschema:loader] row {} dropped: null in '{}'",
                current, column
            );
            report.dropped_null_rows += 1;
            continue;
        }
        records.push(cells.parse(config, &mut report)?);
    }
    report.rows_kept = records.len();
    if report.dropped_null_rows > 0 {
        warn!(
            "[starschema:loader] dropped {} of {} rows with null cells",
            report.dropped_null_rows, report.rows_read
        );
    }
    if report.truncated_fields > 0 {
        info!(
            "[starschema:loader] truncated {} text cells to their column caps",
            report.truncated_fields
        );
    }
    Ok(LoadedRecords { records, report })
}

struct RowCells<'a> {
    row: RowIndex,
    record: &'a csv::StringRecord,
    positions: &'a HashMap<Column, usize>,
}

impl RowCells<'_> {
    fn cell(&self, column: Column) -> Option<&str> {
        self.positions
            .get(&column)
            .map(|idx| self.record.get(*idx).unwrap_or(""))
    }

    fn first_null(&self, tokens: &[String]) -> Option<Column> {
        Column::ALL.into_iter().find(|column| {
            self.cell(*column)
                .is_some_and(|value| is_null_token(value, tokens))
        })
    }

    fn malformed(&self, column: Column, reason: String) -> NormalizeError {
        NormalizeError::MalformedInput {
            row: Some(self.row),
            column: column.header().to_string(),
            reason,
        }
    }

    fn required(&self, column: Column) -> &str {
        self.cell(column).unwrap_or("")
    }

    fn order_id(&self) -> Result<OrderId, NormalizeError> {
        let Some(raw) = self.cell(Column::OrderId) else {
            return Ok(self.row as OrderId + 1);
        };
        if let Ok(id) = raw.parse::<OrderId>() {
            return Ok(id);
        }
        match raw.parse::<f64>() {
            Ok(value) if value >= 0.0 && value.fract() == 0.0 && value <= u64::MAX as f64 => {
                Ok(value as OrderId)
            }
            _ => Err(self.malformed(Column::OrderId, format!("'{raw}' is not an order id"))),
        }
    }

    fn date(&self, column: Column, config: &IngestionConfig) -> Result<NaiveDateTime, NormalizeError> {
        let raw = self.required(column);
        parse_datetime(raw, config)
            .ok_or_else(|| self.malformed(column, format!("'{raw}' is not a recognized date")))
    }

    fn number(&self, column: Column) -> Result<f64, NormalizeError> {
        let raw = self.required(column);
        raw.parse::<f64>()
            .ok()
            .filter(|value| value.is_finite())
            .ok_or_else(|| self.malformed(column, format!("'{raw}' is not a number")))
    }

    fn integer(&self, column: Column) -> Result<i64, NormalizeError> {
        let raw = self.required(column);
        if let Ok(value) = raw.parse::<i64>() {
            return Ok(value);
        }
        raw.parse::<f64>()
            .ok()
            .filter(|value| value.is_finite())
            .map(|value| value.trunc() as i64)
            .ok_or_else(|| self.malformed(column, format!("'{raw}' is not an integer")))
    }

    fn parse(
        &self,
        config: &IngestionConfig,
        report: &mut LoadReport,
    ) -> Result<FactRecord, NormalizeError> {
        let mut record = FactRecord {
            order_id: self.order_id()?,
            order_date: self.date(Column::OrderDate, config)?,
            ship_date: self.date(Column::ShipDate, config)?,
            order_priority: String::new(),
            ship_mode: String::new(),
            discount: self.number(Column::Discount)?,
            profit: self.number(Column::Profit)?,
            quantity: self.integer(Column::Quantity)?,
            sales: self.number(Column::Sales)?,
            shipping_cost: self.number(Column::ShippingCost)?,
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
        };
        for column in Column::ALL.into_iter().filter(|c| c.kind() == ColumnKind::Text) {
            let mut value = self.required(column).to_string();
            if column == Column::Country
                && let Some((_, expanded)) = config
                    .country_aliases
                    .iter()
                    .find(|(alias, _)| *alias == value)
            {
                value.clone_from(expanded);
                report.expanded_country_aliases += 1;
            }
            if let Some(cap) = config.text_caps.cap_for(column) {
                let capped = truncate_chars(&value, cap);
                if capped.len() < value.len() {
                    value = capped.to_string();
                    report.truncated_fields += 1;
                }
            }
            if let Some(slot) = record.text_mut(column) {
                *slot = value;
            }
        }
        Ok(record)
    }
}

/// Parse a date cell; date-only layouts land at midnight.
pub fn parse_datetime(raw: &str, config: &IngestionConfig) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    config
        .datetime_formats
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .or_else(|| {
            config
                .date_formats
                .iter()
                .find_map(|format| NaiveDate::parse_from_str(raw, format).ok())
                .map(|date| date.and_time(NaiveTime::MIN))
        })
}

/// Split `records` into `(primary, holdout)`.
///
/// Exactly `round(fraction * n)` rows are held out: those with the smallest
/// seeded hash of their order id (ties broken by row position). Both parts
/// keep source order.
pub fn split_holdout(
    records: RecordSet,
    fraction: f64,
    seed: u64,
) -> Result<(RecordSet, RecordSet), NormalizeError> {
    if !(0.0..=1.0).contains(&fraction) {
        return Err(NormalizeError::Configuration(format!(
            "holdout fraction must be within [0, 1], got {fraction}"
        )));
    }
    let total = records.len();
    let holdout_count = ((fraction * total as f64).round() as usize).min(total);
    let mut ranked: Vec<(u64, RowIndex)> = records
        .iter()
        .map(|(row, record)| (stable_hash_order(seed, record.order_id), row))
        .collect();
    ranked.sort_unstable();
    let held: BTreeSet<RowIndex> = ranked
        .into_iter()
        .take(holdout_count)
        .map(|(_, row)| row)
        .collect();

    let mut primary = RecordSet::new();
    let mut holdout = RecordSet::new();
    for (row, record) in records.into_records().into_iter().enumerate() {
        if held.contains(&row) {
            holdout.push(record);
        } else {
            primary.push(record);
        }
    }
    info!(
        "[starschema:loader] holdout split seed={} primary={} holdout={}",
        seed,
        primary.len(),
        holdout.len()
    );
    Ok((primary, holdout))
}

/// Write `records` as CSV with every column header, `Global_Orders_ID` included.
pub fn write_csv<W: io::Write>(records: &RecordSet, writer: W) -> Result<(), NormalizeError> {
    let mut writer = csv::Writer::from_writer(writer);
    writer.write_record(Column::ALL.iter().map(|column| column.header()))?;
    for record in records.records() {
        let fields: Vec<String> = Column::ALL
            .iter()
            .map(|column| format_cell(record, *column))
            .collect();
        writer.write_record(&fields)?;
    }
    writer.flush()?;
    Ok(())
}

/// Write `records` to a CSV file, creating parent directories as needed.
pub fn write_csv_path(records: &RecordSet, path: &Path) -> Result<(), NormalizeError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    write_csv(records, File::create(path)?)
}

fn format_cell(record: &FactRecord, column: Column) -> String {
    match column {
        Column::OrderId => record.order_id.to_string(),
        Column::OrderDate => format_datetime(record.order_date),
        Column::ShipDate => format_datetime(record.ship_date),
        Column::Discount => record.discount.to_string(),
        Column::Profit => record.profit.to_string(),
        Column::Quantity => record.quantity.to_string(),
        Column::Sales => record.sales.to_string(),
        Column::ShippingCost => record.shipping_cost.to_string(),
        text => record.text(text).unwrap_or_default().to_string(),
    }
}

fn format_datetime(value: NaiveDateTime) -> String {
    if value.time() == NaiveTime::MIN {
        value.format(DATE_OUTPUT_FORMAT).to_string()
    } else {
        value.format(DATETIME_OUTPUT_FORMAT).to_string()
    }
}
