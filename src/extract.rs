//! Dimension Extractor: distinct natural keys per declared dimension.

use std::collections::{BTreeMap, BTreeSet};

use indexmap::IndexMap;
use tracing::{info, warn};

use crate::data::RecordSet;
use crate::dimension::{Dimension, DimensionSpec, NaturalKey, NullPolicy};
use crate::errors::NormalizeError;

/// Distinct keys observed for one dimension.
#[derive(Clone, Debug, PartialEq)]
pub struct ExtractedDimension {
    dimension: Dimension,
    /// First-seen order; the value holds the parent keys of the introducing row.
    entries: IndexMap<NaturalKey, Vec<NaturalKey>>,
    excluded_rows: usize,
}

impl ExtractedDimension {
    fn new(dimension: Dimension) -> Self {
        Self {
            dimension,
            entries: IndexMap::new(),
            excluded_rows: 0,
        }
    }

    /// Dimension these keys were extracted for.
    pub fn dimension(&self) -> Dimension {
        self.dimension
    }

    /// Number of distinct natural keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no row produced a key.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rows left out of this dimension because of a null key or association part.
    pub fn excluded_rows(&self) -> usize {
        self.excluded_rows
    }

    /// Distinct keys as a set; iteration order is the key order, never row order.
    pub fn distinct_keys(&self) -> BTreeSet<NaturalKey> {
        self.entries.keys().cloned().collect()
    }

    /// True when `key` was observed.
    pub fn contains(&self, key: &NaturalKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Parent keys taken from the first row that introduced `key`.
    pub fn associations(&self, key: &NaturalKey) -> Option<&[NaturalKey]> {
        self.entries.get(key).map(Vec::as_slice)
    }
}

/// Extraction output for every declared dimension.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Extraction {
    dimensions: BTreeMap<Dimension, ExtractedDimension>,
}

impl Extraction {
    /// Extraction result for `dimension`, if it was declared.
    pub fn get(&self, dimension: Dimension) -> Option<&ExtractedDimension> {
        self.dimensions.get(&dimension)
    }

    /// Extracted dimensions in dependency order.
    pub fn iter(&self) -> impl Iterator<Item = &ExtractedDimension> {
        self.dimensions.values()
    }
}

/// Scans a Record Set once per declared dimension.
pub struct DimensionExtractor<'a> {
    specs: &'a [DimensionSpec],
}

impl<'a> DimensionExtractor<'a> {
    /// Extractor over the given dimension specs.
    pub fn new(specs: &'a [DimensionSpec]) -> Self {
        Self { specs }
    }

    /// Extract every declared dimension.
    pub fn extract(&self, records: &RecordSet) -> Result<Extraction, NormalizeError> {
        let mut dimensions = BTreeMap::new();
        for spec in self.specs {
            let extracted = extract_dimension(spec, records)?;
            dimensions.insert(spec.dimension, extracted);
        }
        Ok(Extraction { dimensions })
    }
}

/// Distinct natural keys (with first-seen associations) for one dimension.
pub fn extract_dimension(
    spec: &DimensionSpec,
    records: &RecordSet,
) -> Result<ExtractedDimension, NormalizeError> {
    let mut extracted = ExtractedDimension::new(spec.dimension);
    for (row, record) in records.iter() {
        let keys = spec
            .key_for(record)
            .and_then(|key| spec.reference_keys_for(record).map(|parents| (key, parents)));
        match keys {
            Ok((key, parents)) => {
                extracted.entries.entry(key).or_insert(parents);
            }
            Err(column) => match spec.null_policy {
                NullPolicy::Exclude => extracted.excluded_rows += 1,
                NullPolicy::Reject => {
                    return Err(NormalizeError::MalformedInput {
                        row: Some(row),
                        column: column.header().to_string(),
                        reason: format!("is null but required by dimension '{}'", spec.dimension),
                    });
                }
            },
        }
    }
    if extracted.excluded_rows > 0 {
        warn!(
            "[starschema:extract] dimension '{}' excluded {} rows with null key parts",
            spec.dimension, extracted.excluded_rows
        );
    }
    info!(
        "[starschema:extract] dimension '{}' distinct keys={}",
        spec.dimension,
        extracted.len()
    );
    Ok(extracted)
}
