// 🗺️ Geography Rollup - aggregate every geography of a level
//
// For each geography: fetch establishment counts → aggregate → report.
// A geography that fails on its own (bad source row, bad parameter) is
// logged and recorded; a reference-data failure stops the whole run since
// every remaining geography would fail the same way.

use crate::aggregator::{AggregateOptions, AggregationReport, ImpactAggregator};
use crate::census::IndustrySource;
use crate::db::{insert_report, insert_run, RollupRun};
use crate::error::FootprintError;
use crate::geography::{GeographyId, GeographyLevel};
use crate::store::ImpactModelStore;
use anyhow::Result;
use rusqlite::Connection;
use serde::Serialize;
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RollupFailure {
    pub geography_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RollupSummary {
    pub reports: Vec<AggregationReport>,
    pub failures: Vec<RollupFailure>,
}

impl RollupSummary {
    pub fn geographies(&self) -> usize {
        self.reports.len() + self.failures.len()
    }

    pub fn unresolved_count(&self) -> usize {
        self.reports.iter().map(|r| r.unresolved.len()).sum()
    }
}

fn is_fatal(err: &anyhow::Error) -> bool {
    err.downcast_ref::<FootprintError>()
        .map(FootprintError::is_fatal)
        .unwrap_or(false)
}

// ============================================================================
// GEOGRAPHY ROLLUP
// ============================================================================

pub struct GeographyRollup<'a> {
    store: &'a ImpactModelStore,
    source: &'a dyn IndustrySource,
    aggregator: ImpactAggregator<'a>,
    options: AggregateOptions,
}

impl<'a> GeographyRollup<'a> {
    pub fn new(store: &'a ImpactModelStore, source: &'a dyn IndustrySource, options: AggregateOptions) -> Self {
        GeographyRollup {
            store,
            source,
            aggregator: ImpactAggregator::new(store),
            options,
        }
    }

    pub fn options(&self) -> &AggregateOptions {
        &self.options
    }

    pub fn run_one(&self, geography: &GeographyId) -> Result<AggregationReport> {
        let records = self.source.fetch_industry_records(geography)?;
        let report = self
            .aggregator
            .aggregate_report(&geography.to_string(), &records, &self.options)?;
        Ok(report)
    }

    pub fn run_geographies(&self, geographies: &[GeographyId]) -> Result<RollupSummary> {
        let mut summary = RollupSummary::default();

        for (i, geography) in geographies.iter().enumerate() {
            match self.run_one(geography) {
                Ok(report) => summary.reports.push(report),
                Err(err) if is_fatal(&err) => {
                    error!("Rollup aborted at {} ({}/{}): {}", geography, i + 1, geographies.len(), err);
                    return Err(err);
                }
                Err(err) => {
                    warn!("Failed for {}: {:#}", geography, err);
                    summary.failures.push(RollupFailure {
                        geography_id: geography.to_string(),
                        error: format!("{:#}", err),
                    });
                }
            }
        }

        info!(
            "Rollup finished: {} geographies, {} failed, {} unresolved industries",
            summary.geographies(),
            summary.failures.len(),
            summary.unresolved_count()
        );

        Ok(summary)
    }

    pub fn run_level(&self, level: GeographyLevel) -> Result<RollupSummary> {
        let geographies = self.source.list_geographies(level)?;
        info!("Rolling up {} {} geographies", geographies.len(), level);
        self.run_geographies(&geographies)
    }

    /// Write a summary as one run; returns the run record
    pub fn save(&self, conn: &Connection, summary: &RollupSummary) -> Result<RollupRun> {
        let run = RollupRun::new(self.store.snapshot_version()?, &self.options);

        let tx = conn.unchecked_transaction()?;
        insert_run(&tx, &run)?;
        let mut rows = 0;
        for report in &summary.reports {
            rows += insert_report(&tx, &run.run_id, report)?;
        }
        tx.commit()?;

        info!("Saved run {} ({} impact rows)", run.run_id, rows);
        Ok(run)
    }
}
