// Mortality Atlas - Core Library
// Reconciles mortality counts, population and boundaries into per-region and
// per-group rate tables, geometry layers and color scales.

pub mod error;
pub mod normalize;      // Name normalization for label matching
pub mod records;        // Input record types
pub mod crosswalk;      // Geometry label → statistics label resolution
pub mod aggregate;      // Per-group, per-year rates and deltas
pub mod geometry;       // Dissolve / relabel boundary layers
pub mod color;          // Sequential color scale + legend
pub mod config;
pub mod loader;         // CSV / GeoJSON → InputSnapshot
pub mod pipeline;       // Memoized stages over one snapshot
pub mod export;         // SQLite, CSV and GeoJSON outputs

#[cfg(feature = "tui")]
pub mod ui;

// Re-export commonly used types
pub use aggregate::{
    Aggregator, AggregatedStat, GroupMembership, GroupTable, RateSeries, YearWindow,
    delta_pct, rate, RATE_SCALE,
};
pub use color::{ColorScale, LegendBucket, Rgb, BLUES};
pub use config::AtlasConfig;
pub use crosswalk::{
    CrosswalkReport, OverrideRule, OverrideRules, RegionCrosswalk, Resolution, ResolutionMethod,
};
pub use error::AtlasError;
pub use export::{render_choropleth, write_outputs, write_table_csv, Choropleth, ValueField};
pub use geometry::{dissolve, AssembledGeometry, GeometryAssembler, GeometryLayer};
pub use loader::load_snapshot;
pub use normalize::normalize;
pub use pipeline::{
    ConsolidatedDataset, ConsolidatedRow, InputSnapshot, Pipeline, PipelineSettings, StageCache,
};
pub use records::{
    CrosswalkEntry, GeometryFeature, GroupLevel, MortalityRecord, PopulationRecord,
    UNASSIGNED_GROUP,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
