use crate::aggregator::{AggregateOptions, AggregationReport};
use crate::model::{EstimationMethod, ImpactVector, ResolvedImpact};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

/// One rollup execution: which snapshot, which sampling settings, when
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollupRun {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub snapshot_version: String,
    pub trials: u32,
    pub candidate_mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl RollupRun {
    pub fn new(snapshot_version: &str, options: &AggregateOptions) -> Self {
        RollupRun {
            run_id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            snapshot_version: snapshot_version.to_string(),
            trials: options.trials,
            candidate_mode: options.candidate_mode.to_string(),
            seed: options.seed,
        }
    }
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // ==========================================================================
    // Rollup runs (one row per rollup invocation)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS rollup_runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT UNIQUE NOT NULL,
            started_at TEXT NOT NULL,
            snapshot_version TEXT NOT NULL,
            trials INTEGER NOT NULL,
            candidate_mode TEXT NOT NULL,
            seed INTEGER
        )",
        [],
    )?;

    // ==========================================================================
    // Geography impacts (one row per industry per geography per run)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS geography_impacts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT NOT NULL REFERENCES rollup_runs(run_id),
            geography_id TEXT NOT NULL,
            naics TEXT NOT NULL,
            establishments INTEGER NOT NULL,
            method TEXT NOT NULL,
            sectors TEXT NOT NULL,
            impact_vector TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(run_id, geography_id, naics)
        )",
        [],
    )?;

    // ==========================================================================
    // Run coverage (every geography a run aggregated, even with no impacts)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS run_geographies (
            run_id TEXT NOT NULL REFERENCES rollup_runs(run_id),
            geography_id TEXT NOT NULL,
            unresolved TEXT NOT NULL,
            UNIQUE(run_id, geography_id)
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_impacts_geography ON geography_impacts(geography_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_runs_started ON rollup_runs(started_at)",
        [],
    )?;

    Ok(())
}

pub fn insert_run(conn: &Connection, run: &RollupRun) -> Result<()> {
    conn.execute(
        "INSERT INTO rollup_runs (run_id, started_at, snapshot_version, trials, candidate_mode, seed)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            run.run_id,
            run.started_at.to_rfc3339(),
            run.snapshot_version,
            run.trials,
            run.candidate_mode,
            run.seed.map(|s| s as i64),
        ],
    )?;

    Ok(())
}

/// Store every industry impact of a geography report under a run, and mark
/// the geography as covered by that run
pub fn insert_report(conn: &Connection, run_id: &str, report: &AggregationReport) -> Result<usize> {
    conn.execute(
        "INSERT OR REPLACE INTO run_geographies (run_id, geography_id, unresolved)
         VALUES (?1, ?2, ?3)",
        params![run_id, report.geography_id, serde_json::to_string(&report.unresolved)?],
    )?;

    let mut inserted = 0;

    for impact in &report.impacts {
        conn.execute(
            "INSERT OR REPLACE INTO geography_impacts (
                run_id, geography_id, naics, establishments, method, sectors, impact_vector
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                run_id,
                impact.geography_id,
                impact.industry_code,
                impact.establishment_count as i64,
                serde_json::to_string(&impact.method)?,
                serde_json::to_string(&impact.sectors)?,
                serde_json::to_string(&impact.impact_vector)?,
            ],
        )?;
        inserted += 1;
    }

    Ok(inserted)
}

pub fn get_runs(conn: &Connection) -> Result<Vec<RollupRun>> {
    let mut stmt = conn.prepare(
        "SELECT run_id, started_at, snapshot_version, trials, candidate_mode, seed
         FROM rollup_runs
         ORDER BY started_at DESC, id DESC",
    )?;

    let runs = stmt
        .query_map([], |row| {
            let started_at_str: String = row.get(1)?;
            let seed: Option<i64> = row.get(5)?;

            Ok(RollupRun {
                run_id: row.get(0)?,
                started_at: DateTime::parse_from_rfc3339(&started_at_str)
                    .map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
                    })?
                    .with_timezone(&Utc),
                snapshot_version: row.get(2)?,
                trials: row.get(3)?,
                candidate_mode: row.get(4)?,
                seed: seed.map(|s| s as u64),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(runs)
}

/// Impacts for a geography from the most recent run that covered it.
///
/// A run that aggregated the geography but resolved nothing there still
/// counts as its latest run, so the result is empty rather than stale.
pub fn get_impacts_for_geography(conn: &Connection, geography_id: &str) -> Result<Vec<ResolvedImpact>> {
    let mut stmt = conn.prepare(
        "SELECT geography_id, naics, establishments, method, sectors, impact_vector
         FROM geography_impacts
         WHERE geography_id = ?1
           AND run_id = (
               SELECT r.run_id FROM rollup_runs r
               JOIN run_geographies c ON c.run_id = r.run_id
               WHERE c.geography_id = ?1
               ORDER BY r.started_at DESC, r.id DESC
               LIMIT 1
           )
         ORDER BY naics",
    )?;

    let rows = stmt
        .query_map(params![geography_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut impacts = Vec::with_capacity(rows.len());
    for (geography_id, naics, establishments, method, sectors, impact_vector) in rows {
        let method: EstimationMethod = serde_json::from_str(&method)
            .with_context(|| format!("Corrupt method for {} / {}", geography_id, naics))?;
        let sectors: Vec<String> = serde_json::from_str(&sectors)
            .with_context(|| format!("Corrupt sectors for {} / {}", geography_id, naics))?;
        let impact_vector: ImpactVector = serde_json::from_str(&impact_vector)
            .with_context(|| format!("Corrupt impact vector for {} / {}", geography_id, naics))?;

        impacts.push(ResolvedImpact {
            industry_code: naics,
            geography_id,
            establishment_count: establishments.max(0) as u64,
            sectors,
            method,
            impact_vector,
        });
    }

    Ok(impacts)
}

pub fn count_impacts(conn: &Connection, run_id: &str) -> Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM geography_impacts WHERE run_id = ?1",
        params![run_id],
        |row| row.get(0),
    )?;

    Ok(count)
}
