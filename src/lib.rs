// Impact Footprint - Core Library
// Industry establishment counts → expected environmental impact vectors.
// Exposes all modules for use in CLI, API server, and tests

pub mod error;
pub mod config;
pub mod model;
pub mod geography;
pub mod snapshot;   // Reference tables on disk / in memory
pub mod store;      // Lazily loaded impact model
pub mod similarity; // TF-IDF title matching
pub mod resolver;   // NAICS-2017 → model sectors
pub mod aggregator; // Monte Carlo expected impacts
pub mod census;     // County Business Patterns source
pub mod db;         // Rollup results
pub mod rollup;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Re-export commonly used types
pub use error::{FootprintError, Result};
pub use config::FootprintConfig;
pub use model::{
    CrosswalkEntry, EstimationMethod, ImpactVector, Indicator, IndustryRecord,
    ResolvedImpact, SectorCandidate,
};
pub use geography::{GeographyId, GeographyLevel};
pub use snapshot::{
    CrosswalkSnapshot, CsvSnapshot, ImpactMatrixSnapshot, InMemorySnapshot, SnapshotSource,
};
pub use store::{BeaConcordance, DirectImpactMatrix, ImpactModel, ImpactModelStore};
pub use resolver::{CrosswalkResolver, Resolution};
pub use aggregator::{
    AggregateOptions, AggregationReport, CandidateMode, ImpactAggregator, DEFAULT_TRIALS,
};
pub use census::{CbpDatabase, IndustrySource};
pub use db::{get_impacts_for_geography, get_runs, setup_database, RollupRun};
pub use rollup::{GeographyRollup, RollupFailure, RollupSummary};
