//! Two-phase normalization pipeline.
//!
//! Extract-all, then Assign-all, then Resolve-all, then Build. No fact is
//! resolved before every dimension has been assigned, and nothing reaches a
//! store before the builder has validated the graph.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use tracing::info;

use crate::assign::{KeyAssignment, SurrogateKeyAssigner};
use crate::config::PipelineConfig;
use crate::data::RecordSet;
use crate::dimension::{Dimension, DimensionTable};
use crate::errors::NormalizeError;
use crate::extract::{DimensionExtractor, Extraction};
use crate::graph::{GraphBuilder, RelationalGraph};
use crate::resolve::ForeignKeyResolver;
use crate::store::{GraphStore, InsertSummary, StoreMode, StoreView, persist_graph};
use crate::verify::{DenormalizedView, GraphView, VerificationReport, verify};

/// Per-dimension counters of one normalization.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DimensionReport {
    /// Dimension described.
    pub dimension: Dimension,
    /// Distinct natural keys in the batch.
    pub distinct_keys: usize,
    /// Keys that received a fresh id.
    pub new_keys: usize,
    /// Batch keys that matched pre-existing entries.
    pub reused_keys: usize,
    /// Rows left out of this dimension for null key parts.
    pub excluded_rows: usize,
    /// Rows whose parents differ from the entry's first-seen association.
    pub association_conflicts: usize,
    /// Entries in the built table (pre-existing included).
    pub entries: usize,
}

/// Outcome of a pipeline run.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PipelineReport {
    /// Rows in the input Record Set.
    pub rows: usize,
    /// Normalized facts in the graph.
    pub facts: usize,
    /// One report per dimension.
    pub dimensions: Vec<DimensionReport>,
    /// Store mode, when the run persisted.
    pub mode: Option<StoreMode>,
    /// Insert counts, when the run persisted.
    pub persisted: Option<InsertSummary>,
}

impl fmt::Display for PipelineReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "rows={} facts={}", self.rows, self.facts)?;
        for dimension in &self.dimensions {
            writeln!(
                f,
                "  {:<12} entries={} distinct={} new={} reused={} excluded_rows={} conflicts={}",
                dimension.dimension.table_name(),
                dimension.entries,
                dimension.distinct_keys,
                dimension.new_keys,
                dimension.reused_keys,
                dimension.excluded_rows,
                dimension.association_conflicts
            )?;
        }
        if let (Some(mode), Some(persisted)) = (self.mode, &self.persisted) {
            writeln!(
                f,
                "persisted mode={} new_facts={} skipped_facts={} skipped_entries={}",
                mode, persisted.new_facts, persisted.skipped_facts, persisted.skipped_entries
            )?;
        }
        Ok(())
    }
}

/// Normalizes Record Sets under one validated configuration.
#[derive(Clone, Debug)]
pub struct NormalizationPipeline {
    config: PipelineConfig,
}

impl NormalizationPipeline {
    /// Validate `config` and build a pipeline around it.
    pub fn new(config: PipelineConfig) -> Result<Self, NormalizeError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Configuration the pipeline was built with.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Build a graph from empty dimensions; ids start at 1.
    pub fn normalize(&self, records: &RecordSet) -> Result<RelationalGraph, NormalizeError> {
        self.normalize_against(records, &BTreeMap::new())
            .map(|(graph, _)| graph)
    }

    /// Build a graph against pre-populated dimensions.
    ///
    /// Existing entries keep their ids and associations; new keys continue
    /// each dimension's id sequence.
    pub fn normalize_against(
        &self,
        records: &RecordSet,
        existing: &BTreeMap<Dimension, DimensionTable>,
    ) -> Result<(RelationalGraph, PipelineReport), NormalizeError> {
        let specs = &self.config.dimensions;
        let extraction = DimensionExtractor::new(specs).extract(records)?;
        let assignments = assign_all(&extraction, existing)?;
        let resolution = ForeignKeyResolver::new(specs, &assignments)?.resolve(
            records,
            &extraction,
            existing,
        )?;
        let conflicts = resolution.association_conflicts.clone();
        let graph = GraphBuilder::from_resolution(resolution).build()?;

        let dimensions = Dimension::ALL
            .into_iter()
            .filter_map(|dimension| {
                let extracted = extraction.get(dimension)?;
                let assignment = assignments.get(&dimension)?;
                Some(DimensionReport {
                    dimension,
                    distinct_keys: extracted.len(),
                    new_keys: assignment.new_keys().len(),
                    reused_keys: assignment.reused(),
                    excluded_rows: extracted.excluded_rows(),
                    association_conflicts: conflicts.get(&dimension).copied().unwrap_or(0),
                    entries: graph.dimension(dimension).map_or(0, DimensionTable::len),
                })
            })
            .collect();
        let report = PipelineReport {
            rows: records.len(),
            facts: graph.facts().len(),
            dimensions,
            mode: None,
            persisted: None,
        };
        Ok((graph, report))
    }

    /// Normalize `records` and persist the graph into `store`.
    ///
    /// In additive mode the stored dimensions seed the assignment, so
    /// re-running the same batch creates no duplicates.
    pub fn run(
        &self,
        records: &RecordSet,
        store: &dyn GraphStore,
        mode: StoreMode,
    ) -> Result<PipelineReport, NormalizeError> {
        let existing = match mode {
            StoreMode::Additive => store.load_dimensions()?,
            StoreMode::Recreate => BTreeMap::new(),
        };
        let (graph, mut report) = self.normalize_against(records, &existing)?;
        let persisted = persist_graph(store, &graph, mode)?;
        report.mode = Some(mode);
        report.persisted = Some(persisted);
        info!(
            "[starschema:pipeline] run complete: rows={} facts={} mode={}",
            report.rows, report.facts, mode
        );
        Ok(report)
    }

    /// Denormalized view of an in-memory graph under this configuration.
    pub fn graph_view<'a>(&'a self, graph: &'a RelationalGraph) -> GraphView<'a> {
        GraphView::new(graph, &self.config.dimensions)
    }

    /// Denormalized view of whatever `store` holds.
    pub fn store_view<'a>(&'a self, store: &'a dyn GraphStore) -> StoreView<'a> {
        StoreView::new(store, &self.config.dimensions)
    }

    /// Compare `records` against `view` with this pipeline's verify settings.
    pub fn verify(
        &self,
        records: &RecordSet,
        view: &dyn DenormalizedView,
    ) -> Result<VerificationReport, NormalizeError> {
        verify(records, view, &self.config.verify)
    }
}

fn assign_all(
    extraction: &Extraction,
    existing: &BTreeMap<Dimension, DimensionTable>,
) -> Result<BTreeMap<Dimension, KeyAssignment>, NormalizeError> {
    let mut assignments = BTreeMap::new();
    for extracted in extraction.iter() {
        let dimension = extracted.dimension();
        let assigner = match existing.get(&dimension) {
            Some(table) => SurrogateKeyAssigner::with_existing(table),
            None => SurrogateKeyAssigner::new(dimension),
        };
        assignments.insert(dimension, assigner.assign(extracted.distinct_keys())?);
    }
    Ok(assignments)
}
