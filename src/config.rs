use std::collections::BTreeMap;

use crate::constants::ingestion::{COUNTRY_ALIASES, DATE_FORMATS, DATETIME_FORMATS, NULL_TOKENS};
use crate::constants::text_caps::{MARKET, NAME_45, NAME_60, ORDER_LABEL, PRODUCT};
use crate::constants::verify::{
    DEFAULT_ABS_TOLERANCE, DEFAULT_MAX_DISCREPANCIES, DEFAULT_REL_TOLERANCE,
};
use crate::data::Column;
use crate::dimension::{Dimension, DimensionSpec};
use crate::errors::NormalizeError;

/// Per-column character caps applied to text fields at ingestion and verification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextCaps {
    caps: BTreeMap<Column, usize>,
}

impl TextCaps {
    /// No caps at all.
    pub fn unbounded() -> Self {
        Self {
            caps: BTreeMap::new(),
        }
    }

    /// Set (or replace) the cap for `column`.
    pub fn with_cap(mut self, column: Column, cap: usize) -> Self {
        self.caps.insert(column, cap);
        self
    }

    /// Cap for `column`, if one is configured.
    pub fn cap_for(&self, column: Column) -> Option<usize> {
        self.caps.get(&column).copied()
    }
}

impl Default for TextCaps {
    fn default() -> Self {
        Self::unbounded()
            .with_cap(Column::Category, NAME_45)
            .with_cap(Column::SubCategory, NAME_45)
            .with_cap(Column::Segment, NAME_45)
            .with_cap(Column::Region, NAME_45)
            .with_cap(Column::Market, MARKET)
            .with_cap(Column::CustomerName, NAME_60)
            .with_cap(Column::City, NAME_60)
            .with_cap(Column::Country, NAME_60)
            .with_cap(Column::State, NAME_60)
            .with_cap(Column::ProductName, PRODUCT)
            .with_cap(Column::OrderPriority, ORDER_LABEL)
            .with_cap(Column::ShipMode, ORDER_LABEL)
    }
}

/// Controls how the Record Loader coerces and cleans CSV text.
#[derive(Clone, Debug)]
pub struct IngestionConfig {
    /// Caps applied (by character count) to every text field.
    pub text_caps: TextCaps,
    /// Exact-match replacements applied to the `Country` column.
    pub country_aliases: Vec<(String, String)>,
    /// Cell values treated as null; a null in any required field drops the row.
    pub null_tokens: Vec<String>,
    /// Date-time layouts tried before the date-only layouts.
    pub datetime_formats: Vec<String>,
    /// Date-only layouts; parsed values land at midnight.
    pub date_formats: Vec<String>,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            text_caps: TextCaps::default(),
            country_aliases: COUNTRY_ALIASES
                .iter()
                .map(|(from, to)| (from.to_string(), to.to_string()))
                .collect(),
            null_tokens: NULL_TOKENS.iter().map(|token| token.to_string()).collect(),
            datetime_formats: DATETIME_FORMATS.iter().map(|f| f.to_string()).collect(),
            date_formats: DATE_FORMATS.iter().map(|f| f.to_string()).collect(),
        }
    }
}

/// Controls how the Equivalence Verifier compares rows.
#[derive(Clone, Debug)]
pub struct VerifyConfig {
    /// Columns both sides are sorted and grouped by before comparison.
    pub sort_key: Vec<Column>,
    /// Absolute tolerance for numeric fields.
    pub abs_tolerance: f64,
    /// Relative tolerance for numeric fields (scaled by the expected value).
    pub rel_tolerance: f64,
    /// Caps applied to text on both sides before comparing.
    pub text_caps: TextCaps,
    /// Discrepancies kept in a report before it is marked truncated.
    pub max_discrepancies: usize,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            sort_key: vec![
                Column::OrderDate,
                Column::CustomerName,
                Column::ProductName,
                Column::Sales,
            ],
            abs_tolerance: DEFAULT_ABS_TOLERANCE,
            rel_tolerance: DEFAULT_REL_TOLERANCE,
            text_caps: TextCaps::default(),
            max_discrepancies: DEFAULT_MAX_DISCREPANCIES,
        }
    }
}

/// Top-level normalization configuration.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// One declaration per dimension.
    pub dimensions: Vec<DimensionSpec>,
    /// Verification behavior.
    pub verify: VerifyConfig,
    /// Ingestion behavior used by the CSV loader.
    pub ingestion: IngestionConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dimensions: retail_dimensions(),
            verify: VerifyConfig::default(),
            ingestion: IngestionConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Declaration for `dimension`, if present.
    pub fn spec(&self, dimension: Dimension) -> Option<&DimensionSpec> {
        self.dimensions
            .iter()
            .find(|spec| spec.dimension == dimension)
    }

    /// Check that the configuration describes a buildable graph.
    pub fn validate(&self) -> Result<(), NormalizeError> {
        for dimension in Dimension::ALL {
            let declared = self
                .dimensions
                .iter()
                .filter(|spec| spec.dimension == dimension)
                .count();
            if declared != 1 {
                return Err(NormalizeError::Configuration(format!(
                    "dimension '{dimension}' must be declared exactly once (found {declared})"
                )));
            }
        }
        for spec in &self.dimensions {
            if spec.key_columns.is_empty() {
                return Err(NormalizeError::Configuration(format!(
                    "dimension '{}' declares no key columns",
                    spec.dimension
                )));
            }
            if let Some(column) = spec.columns().find(|column| !column.is_text()) {
                return Err(NormalizeError::Configuration(format!(
                    "dimension '{}' uses non-text column '{column}'",
                    spec.dimension
                )));
            }
            for reference in &spec.references {
                if reference.dimension >= spec.dimension {
                    return Err(NormalizeError::Configuration(format!(
                        "dimension '{}' may only reference dimensions declared before it, not '{}'",
                        spec.dimension, reference.dimension
                    )));
                }
                let parent_arity = self
                    .spec(reference.dimension)
                    .map(|parent| parent.key_columns.len())
                    .unwrap_or_default();
                if parent_arity != reference.columns.len() {
                    return Err(NormalizeError::Configuration(format!(
                        "dimension '{}' references '{}' with {} columns, expected {}",
                        spec.dimension,
                        reference.dimension,
                        reference.columns.len(),
                        parent_arity
                    )));
                }
            }
        }
        if self.verify.sort_key.is_empty() {
            return Err(NormalizeError::Configuration(
                "verification sort key must name at least one column".into(),
            ));
        }
        let tolerances = [self.verify.abs_tolerance, self.verify.rel_tolerance];
        if tolerances.iter().any(|t| !t.is_finite() || *t < 0.0) {
            return Err(NormalizeError::Configuration(
                "verification tolerances must be finite and non-negative".into(),
            ));
        }
        if self.verify.max_discrepancies == 0 {
            return Err(NormalizeError::Configuration(
                "max_discrepancies must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Dimension declarations for the retail order dataset.
pub fn retail_dimensions() -> Vec<DimensionSpec> {
    vec![
        DimensionSpec::new(Dimension::Category, [Column::Category]),
        DimensionSpec::new(Dimension::SubCategory, [Column::SubCategory]),
        DimensionSpec::new(Dimension::Market, [Column::Market]),
        DimensionSpec::new(Dimension::Segment, [Column::Segment]),
        DimensionSpec::new(
            Dimension::Location,
            [Column::Region, Column::City, Column::Country, Column::State],
        ),
        DimensionSpec::new(Dimension::Customer, [Column::CustomerName])
            .with_reference(Dimension::Market, [Column::Market])
            .with_reference(Dimension::Segment, [Column::Segment]),
        DimensionSpec::new(Dimension::Product, [Column::ProductName])
            .with_reference(Dimension::Category, [Column::Category])
            .with_reference(Dimension::SubCategory, [Column::SubCategory]),
    ]
}
