//! Equivalence Verifier.
//!
//! Compares a source Record Set against any [`DenormalizedView`] as a
//! multiset of rows. Both sides are normalized (dates to calendar dates,
//! text under the configured caps), sorted by the sort key and then by the
//! full row, and merge-walked in groups of equal sort key. Floating-point
//! values match within `abs_tolerance + rel_tolerance * |expected|`;
//! integers must be equal.

use std::cmp::Ordering;
use std::fmt;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::{TextCaps, VerifyConfig};
use crate::data::{Column, FactRecord, FieldValue, RecordSet};
use crate::dimension::{Dimension, DimensionSpec};
use crate::errors::NormalizeError;
use crate::graph::RelationalGraph;
use crate::types::OrderId;
use crate::utils::truncate_chars;

/// Anything that can produce denormalized order rows.
pub trait DenormalizedView {
    /// Columns this view populates.
    fn columns(&self) -> Vec<Column>;

    /// All rows, in no particular order.
    fn rows(&self) -> Result<Vec<FactRecord>, NormalizeError>;
}

impl DenormalizedView for RecordSet {
    fn columns(&self) -> Vec<Column> {
        Column::ALL.to_vec()
    }

    fn rows(&self) -> Result<Vec<FactRecord>, NormalizeError> {
        Ok(self.records().to_vec())
    }
}

/// A relational graph joined back onto its dimensions.
pub struct GraphView<'a> {
    graph: &'a RelationalGraph,
    specs: &'a [DimensionSpec],
}

impl<'a> GraphView<'a> {
    /// View over `graph`, denormalized through `specs`.
    pub fn new(graph: &'a RelationalGraph, specs: &'a [DimensionSpec]) -> Self {
        Self { graph, specs }
    }
}

impl DenormalizedView for GraphView<'_> {
    fn columns(&self) -> Vec<Column> {
        Column::ALL.to_vec()
    }

    fn rows(&self) -> Result<Vec<FactRecord>, NormalizeError> {
        self.graph.denormalize(self.specs)
    }
}

/// One localized difference between source and reconstruction.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Discrepancy {
    /// The two sides populate different columns.
    ColumnSet {
        /// Columns only the source has.
        missing: Vec<Column>,
        /// Columns only the reconstruction has.
        unexpected: Vec<Column>,
    },
    /// The two sides hold different numbers of rows.
    RowCount {
        /// Rows in the source.
        expected: usize,
        /// Rows in the reconstruction.
        actual: usize,
    },
    /// A paired row differs in one column.
    Field {
        /// Order of the source row.
        order_id: OrderId,
        /// Column that differs.
        column: Column,
        /// Dimension owning `column`; `None` for fact columns.
        dimension: Option<Dimension>,
        /// Source value.
        expected: FieldValue,
        /// Reconstructed value.
        actual: FieldValue,
    },
    /// A source row has no counterpart in the reconstruction.
    MissingRow {
        /// Order of the source row.
        order_id: OrderId,
        /// Sort-key values of the row.
        sort_key: Vec<FieldValue>,
    },
    /// A reconstructed row has no counterpart in the source.
    UnexpectedRow {
        /// Order of the reconstructed row.
        order_id: OrderId,
        /// Sort-key values of the row.
        sort_key: Vec<FieldValue>,
    },
}

impl fmt::Display for Discrepancy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Discrepancy::ColumnSet {
                missing,
                unexpected,
            } => write!(
                f,
                "! columns differ: missing [{}], unexpected [{}]",
                join(missing),
                join(unexpected)
            ),
            Discrepancy::RowCount { expected, actual } => {
                write!(f, "! row count: expected {expected}, found {actual}")
            }
            Discrepancy::Field {
                order_id,
                column,
                dimension,
                expected,
                actual,
            } => {
                let owner = dimension.map_or_else(|| "fact".to_string(), |d| d.to_string());
                write!(
                    f,
                    "~ order {order_id} [{owner}] {column}: expected {expected}, found {actual}"
                )
            }
            Discrepancy::MissingRow { order_id, sort_key } => {
                write!(f, "- order {order_id} missing ({})", join(sort_key))
            }
            Discrepancy::UnexpectedRow { order_id, sort_key } => {
                write!(f, "+ order {order_id} unexpected ({})", join(sort_key))
            }
        }
    }
}

fn join<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Structured verification result.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct VerificationReport {
    /// Rows read from the source view.
    pub source_rows: usize,
    /// Rows read from the reconstructed view.
    pub reconstructed_rows: usize,
    /// Columns present on both sides.
    pub compared_columns: Vec<Column>,
    /// Up to `max_discrepancies` findings, in sort order.
    pub discrepancies: Vec<Discrepancy>,
    /// True when more discrepancies existed than `max_discrepancies`.
    pub truncated: bool,
}

impl VerificationReport {
    /// True when no discrepancy was found.
    pub fn passed(&self) -> bool {
        self.discrepancies.is_empty() && !self.truncated
    }

    /// Field discrepancies owned by `dimension`.
    pub fn discrepancies_for(&self, dimension: Dimension) -> impl Iterator<Item = &Discrepancy> {
        self.discrepancies.iter().filter(move |d| {
            matches!(d, Discrepancy::Field { dimension: Some(owner), .. } if *owner == dimension)
        })
    }
}

impl fmt::Display for VerificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.passed() { "PASSED" } else { "FAILED" };
        writeln!(
            f,
            "verification {status}: source_rows={} reconstructed_rows={} columns={} discrepancies={}",
            self.source_rows,
            self.reconstructed_rows,
            self.compared_columns.len(),
            self.discrepancies.len()
        )?;
        for discrepancy in &self.discrepancies {
            writeln!(f, "{discrepancy}")?;
        }
        if self.truncated {
            writeln!(f, "... further discrepancies omitted")?;
        }
        Ok(())
    }
}

struct ComparableRow {
    order_id: OrderId,
    values: Vec<FieldValue>,
}

struct Collector {
    limit: usize,
    discrepancies: Vec<Discrepancy>,
    truncated: bool,
}

impl Collector {
    fn push(&mut self, discrepancy: Discrepancy) {
        if self.discrepancies.len() < self.limit {
            self.discrepancies.push(discrepancy);
        } else {
            self.truncated = true;
        }
    }
}

/// Row comparison under one [`VerifyConfig`].
pub struct EquivalenceVerifier<'a> {
    config: &'a VerifyConfig,
}

impl<'a> EquivalenceVerifier<'a> {
    /// Verifier bound to `config`.
    pub fn new(config: &'a VerifyConfig) -> Self {
        Self { config }
    }

    /// Compare `source` against `reconstructed`.
    pub fn verify(
        &self,
        source: &dyn DenormalizedView,
        reconstructed: &dyn DenormalizedView,
    ) -> Result<VerificationReport, NormalizeError> {
        let mut collector = Collector {
            limit: self.config.max_discrepancies,
            discrepancies: Vec::new(),
            truncated: false,
        };

        let source_columns = source.columns();
        let view_columns = reconstructed.columns();
        let compared_columns: Vec<Column> = source_columns
            .iter()
            .copied()
            .filter(|column| view_columns.contains(column))
            .collect();
        let missing: Vec<Column> = source_columns
            .iter()
            .copied()
            .filter(|column| !view_columns.contains(column))
            .collect();
        let unexpected: Vec<Column> = view_columns
            .iter()
            .copied()
            .filter(|column| !source_columns.contains(column))
            .collect();
        if !missing.is_empty() || !unexpected.is_empty() {
            collector.push(Discrepancy::ColumnSet {
                missing,
                unexpected,
            });
        }
        if let Some(column) = self
            .config
            .sort_key
            .iter()
            .find(|column| !compared_columns.contains(column))
        {
            return Err(NormalizeError::Configuration(format!(
                "sort key column '{column}' is not populated by both views"
            )));
        }

        let source_rows = source.rows()?;
        let view_rows = reconstructed.rows()?;
        if source_rows.len() != view_rows.len() {
            collector.push(Discrepancy::RowCount {
                expected: source_rows.len(),
                actual: view_rows.len(),
            });
        }

        let key_positions: Vec<usize> = self
            .config
            .sort_key
            .iter()
            .filter_map(|column| compared_columns.iter().position(|c| c == column))
            .collect();
        let expected = self.prepare(&source_rows, &compared_columns, &key_positions);
        let actual = self.prepare(&view_rows, &compared_columns, &key_positions);
        self.merge_walk(&expected, &actual, &compared_columns, &key_positions, &mut collector);

        let report = VerificationReport {
            source_rows: source_rows.len(),
            reconstructed_rows: view_rows.len(),
            compared_columns,
            discrepancies: collector.discrepancies,
            truncated: collector.truncated,
        };
        if report.passed() {
            info!(
                "[starschema:verify] passed: rows={} columns={}",
                report.source_rows,
                report.compared_columns.len()
            );
        } else {
            warn!(
                "[starschema:verify] failed: discrepancies={} truncated={}",
                report.discrepancies.len(),
                report.truncated
            );
        }
        Ok(report)
    }

    fn prepare(
        &self,
        rows: &[FactRecord],
        columns: &[Column],
        key_positions: &[usize],
    ) -> Vec<ComparableRow> {
        let mut prepared: Vec<ComparableRow> = rows
            .iter()
            .map(|row| ComparableRow {
                order_id: row.order_id,
                values: columns
                    .iter()
                    .map(|column| comparable_value(row, *column, &self.config.text_caps))
                    .collect(),
            })
            .collect();
        prepared.sort_by(|a, b| {
            compare_positions(&a.values, &b.values, key_positions)
                .then_with(|| compare_rows(&a.values, &b.values))
        });
        prepared
    }

    fn merge_walk(
        &self,
        expected: &[ComparableRow],
        actual: &[ComparableRow],
        columns: &[Column],
        key_positions: &[usize],
        collector: &mut Collector,
    ) {
        let (mut i, mut j) = (0usize, 0usize);
        while i < expected.len() || j < actual.len() {
            let order = match (expected.get(i), actual.get(j)) {
                (Some(left), Some(right)) => {
                    if self.keys_match(&left.values, &right.values, key_positions) {
                        Ordering::Equal
                    } else {
                        compare_positions(&left.values, &right.values, key_positions)
                    }
                }
                (Some(_), None) => Ordering::Less,
                (None, _) => Ordering::Greater,
            };
            match order {
                Ordering::Less => {
                    collector.push(missing_row(&expected[i], key_positions));
                    i += 1;
                }
                Ordering::Greater => {
                    collector.push(unexpected_row(&actual[j], key_positions));
                    j += 1;
                }
                Ordering::Equal => {
                    let anchor = &expected[i].values;
                    let group_end_left = expected[i..]
                        .iter()
                        .position(|row| !self.keys_match(anchor, &row.values, key_positions))
                        .map_or(expected.len(), |offset| i + offset);
                    let group_end_right = actual[j..]
                        .iter()
                        .position(|row| !self.keys_match(anchor, &row.values, key_positions))
                        .map_or(actual.len(), |offset| j + offset);
                    self.compare_group(
                        &expected[i..group_end_left],
                        &actual[j..group_end_right],
                        columns,
                        key_positions,
                        collector,
                    );
                    i = group_end_left;
                    j = group_end_right;
                }
            }
        }
    }

    fn compare_group(
        &self,
        expected: &[ComparableRow],
        actual: &[ComparableRow],
        columns: &[Column],
        key_positions: &[usize],
        collector: &mut Collector,
    ) {
        let mut taken = vec![false; actual.len()];
        let mut unmatched = Vec::new();
        for row in expected {
            let hit = actual.iter().enumerate().position(|(idx, candidate)| {
                !taken[idx] && self.rows_match(&row.values, &candidate.values)
            });
            match hit {
                Some(idx) => taken[idx] = true,
                None => unmatched.push(row),
            }
        }

        // Pair leftovers by order id first, then positionally.
        let mut remaining = Vec::new();
        for row in unmatched {
            let partner = actual
                .iter()
                .enumerate()
                .position(|(idx, candidate)| !taken[idx] && candidate.order_id == row.order_id)
                .or_else(|| taken.iter().position(|used| !used));
            match partner {
                Some(idx) => {
                    taken[idx] = true;
                    self.diff_fields(row, &actual[idx], columns, collector);
                }
                None => remaining.push(row),
            }
        }
        for row in remaining {
            collector.push(missing_row(row, key_positions));
        }
        for (idx, used) in taken.iter().enumerate() {
            if !used {
                collector.push(unexpected_row(&actual[idx], key_positions));
            }
        }
    }

    fn diff_fields(
        &self,
        expected: &ComparableRow,
        actual: &ComparableRow,
        columns: &[Column],
        collector: &mut Collector,
    ) {
        for ((column, left), right) in columns.iter().zip(&expected.values).zip(&actual.values) {
            if !self.values_match(left, right) {
                collector.push(Discrepancy::Field {
                    order_id: expected.order_id,
                    column: *column,
                    dimension: column.dimension(),
                    expected: left.clone(),
                    actual: right.clone(),
                });
            }
        }
    }

    fn keys_match(&self, left: &[FieldValue], right: &[FieldValue], positions: &[usize]) -> bool {
        positions
            .iter()
            .all(|&idx| self.values_match(&left[idx], &right[idx]))
    }

    fn rows_match(&self, left: &[FieldValue], right: &[FieldValue]) -> bool {
        left.iter()
            .zip(right)
            .all(|(l, r)| self.values_match(l, r))
    }

    fn values_match(&self, expected: &FieldValue, actual: &FieldValue) -> bool {
        // Identifiers and counts compare exactly; only measures get tolerance.
        if let (FieldValue::Integer(e), FieldValue::Integer(a)) = (expected, actual) {
            return e == a;
        }
        match (numeric(expected), numeric(actual)) {
            (Some(e), Some(a)) => {
                if e.is_nan() || a.is_nan() {
                    return e.is_nan() && a.is_nan();
                }
                (e - a).abs() <= self.config.abs_tolerance + self.config.rel_tolerance * e.abs()
            }
            _ => expected == actual,
        }
    }
}

/// Compare `source` against `reconstructed` under `config`.
pub fn verify(
    source: &dyn DenormalizedView,
    reconstructed: &dyn DenormalizedView,
    config: &VerifyConfig,
) -> Result<VerificationReport, NormalizeError> {
    EquivalenceVerifier::new(config).verify(source, reconstructed)
}

fn comparable_value(row: &FactRecord, column: Column, caps: &TextCaps) -> FieldValue {
    match row.value(column) {
        FieldValue::DateTime(value) => FieldValue::Date(value.date()),
        FieldValue::Text(text) => match caps.cap_for(column) {
            Some(cap) => FieldValue::Text(truncate_chars(&text, cap).to_string()),
            None => FieldValue::Text(text),
        },
        other => other,
    }
}

fn missing_row(row: &ComparableRow, key_positions: &[usize]) -> Discrepancy {
    Discrepancy::MissingRow {
        order_id: row.order_id,
        sort_key: project(&row.values, key_positions),
    }
}

fn unexpected_row(row: &ComparableRow, key_positions: &[usize]) -> Discrepancy {
    Discrepancy::UnexpectedRow {
        order_id: row.order_id,
        sort_key: project(&row.values, key_positions),
    }
}

fn project(values: &[FieldValue], positions: &[usize]) -> Vec<FieldValue> {
    positions.iter().map(|&idx| values[idx].clone()).collect()
}

fn numeric(value: &FieldValue) -> Option<f64> {
    match value {
        FieldValue::Integer(v) => Some(*v as f64),
        FieldValue::Number(v) => Some(*v),
        _ => None,
    }
}

fn rank(value: &FieldValue) -> u8 {
    match value {
        FieldValue::Null => 0,
        FieldValue::Integer(_) | FieldValue::Number(_) => 1,
        FieldValue::Date(_) => 2,
        FieldValue::DateTime(_) => 3,
        FieldValue::Text(_) => 4,
    }
}

fn compare_values(left: &FieldValue, right: &FieldValue) -> Ordering {
    match (left, right) {
        (FieldValue::Date(l), FieldValue::Date(r)) => l.cmp(r),
        (FieldValue::DateTime(l), FieldValue::DateTime(r)) => l.cmp(r),
        (FieldValue::Text(l), FieldValue::Text(r)) => l.cmp(r),
        _ => match (numeric(left), numeric(right)) {
            (Some(l), Some(r)) => l.total_cmp(&r),
            _ => rank(left).cmp(&rank(right)),
        },
    }
}

fn compare_positions(left: &[FieldValue], right: &[FieldValue], positions: &[usize]) -> Ordering {
    positions
        .iter()
        .map(|&idx| compare_values(&left[idx], &right[idx]))
        .find(|ordering| ordering.is_ne())
        .unwrap_or(Ordering::Equal)
}

fn compare_rows(left: &[FieldValue], right: &[FieldValue]) -> Ordering {
    left.iter()
        .zip(right)
        .map(|(l, r)| compare_values(l, r))
        .find(|ordering| ordering.is_ne())
        .unwrap_or(Ordering::Equal)
}
