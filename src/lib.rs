#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

/// Command-line drivers shared by the bundled binaries.
pub mod apps;
/// Surrogate key assignment.
pub mod assign;
/// Pipeline, ingestion, and verification configuration.
pub mod config;
/// Centralized constants used across ingestion, stores, and verification.
pub mod constants;
/// Fact records, columns, and normalized facts.
pub mod data;
/// Dimension declarations, natural keys, and dimension tables.
pub mod dimension;
/// Distinct natural-key extraction.
pub mod extract;
/// Relational graph and its validating builder.
pub mod graph;
mod hash;
/// CSV record loading and preprocessing.
pub mod loader;
/// Cardinality and fan-out statistics.
pub mod metrics;
/// Two-phase normalization pipeline.
pub mod pipeline;
/// Foreign key resolution.
pub mod resolve;
/// Graph stores and persistence helpers.
pub mod store;
/// Shared type aliases.
pub mod types;
/// Text helpers.
pub mod utils;
/// Round-trip equivalence verification.
pub mod verify;

mod errors;

pub use assign::{KeyAssignment, SurrogateKeyAssigner};
pub use config::{IngestionConfig, PipelineConfig, TextCaps, VerifyConfig, retail_dimensions};
pub use data::{Column, FactRecord, FieldValue, ForeignKeys, NormalizedFact, RecordSet};
pub use dimension::{
    Dimension, DimensionEntry, DimensionSpec, DimensionTable, NaturalKey, NullPolicy,
};
pub use errors::NormalizeError;
pub use extract::{DimensionExtractor, ExtractedDimension, Extraction};
pub use graph::{GraphBuilder, RelationalGraph};
pub use loader::{
    CsvRecordLoader, LoadReport, LoadedRecords, RecordLoader, load_csv_from_reader,
    split_holdout, write_csv,
};
pub use metrics::{DimensionStats, GraphStats, graph_stats};
pub use pipeline::{DimensionReport, NormalizationPipeline, PipelineReport};
pub use resolve::{ForeignKeyResolver, Resolution};
pub use store::{
    FileGraphStore, GraphStore, InMemoryGraphStore, InsertSummary, StoreMode, StoreView,
    persist_graph,
};
pub use types::{KeyPart, OrderId, RowIndex, SurrogateId, TableName};
pub use verify::{
    DenormalizedView, Discrepancy, EquivalenceVerifier, GraphView, VerificationReport, verify,
};
