// 🏭 Census Establishments - County Business Patterns by geography
//
// IndustrySource is the seam the aggregator's callers fetch establishment
// counts through. CbpDatabase serves them from a SQLite copy of the Census
// CBP/ZBP files:
//   zipcode(zip, naics, est)
//   county(fipstate, fipscty, naics, est, emp, ap)
//   state(fipstate, naics, est, emp, ap)
// Only six-digit NAICS codes leave this module.

use crate::geography::{GeographyId, GeographyLevel};
use crate::model::{is_six_digit_code, IndustryRecord};
use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use serde::Deserialize;
use std::path::Path;
use tracing::info;

// ============================================================================
// INDUSTRY SOURCE
// ============================================================================

pub trait IndustrySource {
    /// Establishment counts per detailed industry for one geography
    fn fetch_industry_records(&self, geography: &GeographyId) -> Result<Vec<IndustryRecord>>;

    /// Every geography of a level the source has data for
    fn list_geographies(&self, level: GeographyLevel) -> Result<Vec<GeographyId>>;
}

// ============================================================================
// CBP CSV ROWS (columns as published by the Census Bureau)
// ============================================================================

#[derive(Debug, Deserialize)]
struct ZipcodeRow {
    #[serde(alias = "ZIP")]
    zip: String,
    #[serde(alias = "NAICS")]
    naics: String,
    #[serde(alias = "EST")]
    est: i64,
}

#[derive(Debug, Deserialize)]
struct CountyRow {
    #[serde(alias = "FIPSTATE")]
    fipstate: u32,
    #[serde(alias = "FIPSCTY")]
    fipscty: u32,
    #[serde(alias = "NAICS")]
    naics: String,
    #[serde(alias = "EST")]
    est: i64,
    #[serde(alias = "EMP", default)]
    emp: Option<i64>,
    #[serde(alias = "AP", default)]
    ap: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct StateRow {
    #[serde(alias = "FIPSTATE")]
    fipstate: u32,
    #[serde(alias = "NAICS")]
    naics: String,
    #[serde(alias = "EST")]
    est: i64,
    #[serde(alias = "EMP", default)]
    emp: Option<i64>,
    #[serde(alias = "AP", default)]
    ap: Option<i64>,
}

// ============================================================================
// CBP DATABASE
// ============================================================================

pub struct CbpDatabase {
    conn: Connection,
}

impl CbpDatabase {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .with_context(|| format!("Failed to open CBP database: {:?}", path.as_ref()))?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        setup_cbp_tables(&conn)?;
        Ok(CbpDatabase { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Load a CBP/ZBP CSV export into the table for `level`.
    ///
    /// Rows are keyed by geography and NAICS code, so importing the same file
    /// again replaces rows rather than adding to them.
    pub fn import_cbp_csv<P: AsRef<Path>>(&mut self, level: GeographyLevel, csv_path: P) -> Result<usize> {
        let path = csv_path.as_ref();
        let mut rdr = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(path)
            .with_context(|| format!("Failed to open CBP file: {:?}", path))?;

        let tx = self.conn.transaction()?;
        let mut inserted = 0;

        match level {
            GeographyLevel::Zipcode => {
                for result in rdr.deserialize() {
                    let row: ZipcodeRow = result.context("Failed to deserialize zipcode row")?;
                    tx.execute(
                        "INSERT OR REPLACE INTO zipcode (zip, naics, est) VALUES (?1, ?2, ?3)",
                        params![format!("{:0>5}", row.zip.trim()), row.naics.trim(), row.est],
                    )?;
                    inserted += 1;
                }
            }
            GeographyLevel::County => {
                for result in rdr.deserialize() {
                    let row: CountyRow = result.context("Failed to deserialize county row")?;
                    tx.execute(
                        "INSERT OR REPLACE INTO county (fipstate, fipscty, naics, est, emp, ap)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                        params![row.fipstate, row.fipscty, row.naics.trim(), row.est, row.emp, row.ap],
                    )?;
                    inserted += 1;
                }
            }
            GeographyLevel::State => {
                for result in rdr.deserialize() {
                    let row: StateRow = result.context("Failed to deserialize state row")?;
                    tx.execute(
                        "INSERT OR REPLACE INTO state (fipstate, naics, est, emp, ap) VALUES (?1, ?2, ?3, ?4, ?5)",
                        params![row.fipstate, row.naics.trim(), row.est, row.emp, row.ap],
                    )?;
                    inserted += 1;
                }
            }
        }

        tx.commit()?;
        info!("✓ Imported {} {} rows from {:?}", inserted, level, path);
        Ok(inserted)
    }

    /// Insert records directly (fixtures, backfills)
    pub fn insert_records(&self, geography: &GeographyId, records: &[IndustryRecord]) -> Result<usize> {
        for record in records {
            let est = record.establishment_count as i64;
            match geography {
                GeographyId::Zipcode { zipcode } => self.conn.execute(
                    "INSERT OR REPLACE INTO zipcode (zip, naics, est) VALUES (?1, ?2, ?3)",
                    params![zipcode, record.industry_code, est],
                )?,
                GeographyId::County { statefp, countyfp } => self.conn.execute(
                    "INSERT OR REPLACE INTO county (fipstate, fipscty, naics, est, emp, ap)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![statefp, countyfp, record.industry_code, est, record.employee_count, record.annual_payroll],
                )?,
                GeographyId::State { statefp } => self.conn.execute(
                    "INSERT OR REPLACE INTO state (fipstate, naics, est, emp, ap) VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![statefp, record.industry_code, est, record.employee_count, record.annual_payroll],
                )?,
            };
        }
        Ok(records.len())
    }
}

pub fn setup_cbp_tables(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS zipcode (
            zip TEXT NOT NULL,
            naics TEXT NOT NULL,
            est INTEGER NOT NULL,
            UNIQUE(zip, naics)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS county (
            fipstate INTEGER NOT NULL,
            fipscty INTEGER NOT NULL,
            naics TEXT NOT NULL,
            est INTEGER NOT NULL,
            emp INTEGER,
            ap INTEGER,
            UNIQUE(fipstate, fipscty, naics)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS state (
            fipstate INTEGER NOT NULL,
            naics TEXT NOT NULL,
            est INTEGER NOT NULL,
            emp INTEGER,
            ap INTEGER,
            UNIQUE(fipstate, naics)
        )",
        [],
    )?;

    Ok(())
}

fn to_record(naics: String, est: i64, emp: Option<i64>, ap: Option<i64>) -> IndustryRecord {
    IndustryRecord {
        industry_code: naics,
        establishment_count: est.max(0) as u64,
        employee_count: emp,
        annual_payroll: ap,
    }
}

impl IndustrySource for CbpDatabase {
    fn fetch_industry_records(&self, geography: &GeographyId) -> Result<Vec<IndustryRecord>> {
        let records: Vec<IndustryRecord> = match geography {
            GeographyId::Zipcode { zipcode } => {
                let mut stmt = self.conn.prepare(
                    "SELECT naics, est FROM zipcode WHERE zip = ?1 ORDER BY naics",
                )?;
                let rows = stmt
                    .query_map(params![zipcode], |row| Ok(to_record(row.get(0)?, row.get(1)?, None, None)))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
            GeographyId::County { statefp, countyfp } => {
                let mut stmt = self.conn.prepare(
                    "SELECT naics, est, emp, ap FROM county
                     WHERE fipstate = ?1 AND fipscty = ?2 ORDER BY naics",
                )?;
                let rows = stmt
                    .query_map(params![statefp, countyfp], |row| {
                        Ok(to_record(row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
            GeographyId::State { statefp } => {
                let mut stmt = self.conn.prepare(
                    "SELECT naics, est, emp, ap FROM state WHERE fipstate = ?1 ORDER BY naics",
                )?;
                let rows = stmt
                    .query_map(params![statefp], |row| {
                        Ok(to_record(row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
        };

        Ok(records
            .into_iter()
            .filter(|r| is_six_digit_code(&r.industry_code))
            .collect())
    }

    fn list_geographies(&self, level: GeographyLevel) -> Result<Vec<GeographyId>> {
        let geographies = match level {
            GeographyLevel::Zipcode => {
                let mut stmt = self.conn.prepare("SELECT DISTINCT zip FROM zipcode ORDER BY zip")?;
                let rows = stmt
                    .query_map([], |row| {
                        let zipcode: String = row.get(0)?;
                        Ok(GeographyId::Zipcode { zipcode })
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
            GeographyLevel::County => {
                let mut stmt = self.conn.prepare(
                    "SELECT DISTINCT fipstate, fipscty FROM county ORDER BY fipstate, fipscty",
                )?;
                let rows = stmt
                    .query_map([], |row| Ok(GeographyId::county(row.get(0)?, row.get(1)?)))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
            GeographyLevel::State => {
                let mut stmt = self.conn.prepare("SELECT DISTINCT fipstate FROM state ORDER BY fipstate")?;
                let rows = stmt
                    .query_map([], |row| Ok(GeographyId::state(row.get(0)?)))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
        };

        Ok(geographies)
    }
}
