/// Constants used by the Record Loader when coercing CSV text.
pub mod ingestion {
    /// Cell values treated as null (in addition to empty/whitespace-only cells).
    pub const NULL_TOKENS: [&str; 7] = ["NA", "N/A", "NaN", "nan", "null", "NULL", "None"];
    /// Date/time layouts accepted for `Order_Date` and `Ship_Date`, tried in order.
    pub const DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];
    /// Date-only layouts accepted for `Order_Date` and `Ship_Date`, tried in order.
    pub const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%m/%d/%Y", "%d-%m-%Y"];
    /// Country abbreviations expanded during ingestion.
    pub const COUNTRY_ALIASES: [(&str, &str); 2] =
        [("USA", "United States"), ("UK", "United Kingdom")];
    /// Layout used when writing dates that carry no time-of-day.
    pub const DATE_OUTPUT_FORMAT: &str = "%Y-%m-%d";
    /// Layout used when writing dates that carry a time-of-day.
    pub const DATETIME_OUTPUT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
}

/// Character caps for text columns, mirroring the relational column widths.
pub mod text_caps {
    /// Cap for category, sub-category, segment, and region names.
    pub const NAME_45: usize = 45;
    /// Cap for market names.
    pub const MARKET: usize = 30;
    /// Cap for customer names and location parts other than region.
    pub const NAME_60: usize = 60;
    /// Cap for product names.
    pub const PRODUCT: usize = 255;
    /// Cap for order priority and ship mode labels.
    pub const ORDER_LABEL: usize = 45;
}

/// Constants used by surrogate key assignment.
pub mod assign {
    use crate::types::SurrogateId;

    /// First id handed out for an empty dimension.
    pub const FIRST_SURROGATE_ID: SurrogateId = 1;
}

/// Constants used by the Equivalence Verifier.
pub mod verify {
    /// Absolute tolerance for numeric field comparison.
    pub const DEFAULT_ABS_TOLERANCE: f64 = 1e-8;
    /// Relative tolerance for numeric field comparison.
    pub const DEFAULT_REL_TOLERANCE: f64 = 1e-5;
    /// Maximum number of discrepancies kept in a report before truncating.
    pub const DEFAULT_MAX_DISCREPANCIES: usize = 100;
}

/// Constants used by graph-store persistence and wire encoding.
pub mod store {
    /// Key used for graph-store global metadata.
    pub const META_KEY: &[u8] = b"__meta__";
    /// Key prefix for per-dimension entry records.
    pub const DIMENSION_PREFIX: &[u8] = b"dim:";
    /// Key used for the fact-table record.
    pub const FACTS_KEY: &[u8] = b"facts";
    /// Tombstone marker byte written on destructive reset.
    pub const RECORD_TOMBSTONE: u8 = b'-';
    /// Version tag for persisted dimension records.
    pub const DIMENSION_RECORD_VERSION: u8 = 1;
    /// Version tag for persisted fact records.
    pub const FACT_RECORD_VERSION: u8 = 1;
    /// Prefix marker for bitcode-encoded payloads.
    pub const BITCODE_PREFIX: u8 = b'B';
    /// Version tag for graph-store metadata compatibility checks.
    pub const STORE_VERSION: u8 = 1;
    /// Default directory for persisted graph-store files.
    pub const DEFAULT_STORE_DIR: &str = ".starschema_store";
    /// Default filename for persisted graph-store files.
    pub const DEFAULT_STORE_FILENAME: &str = "graph_store.bin";
    /// Table name used for the fact table in constraint errors.
    pub const FACT_TABLE: &str = "orders";
}

/// Constants used by the preprocessing split.
pub mod holdout {
    /// Fraction of rows held out by the preprocessing driver.
    pub const DEFAULT_HOLDOUT_FRACTION: f64 = 0.2;
    /// Seed used by the preprocessing driver.
    pub const DEFAULT_HOLDOUT_SEED: u64 = 1;
}
