// 📦 Snapshot Sources - raw reference tables behind the impact model
//
// Two loads, both all-or-nothing:
//   load_crosswalk_snapshot()     → NAICS 2017/2012/2007 + BEA concordances
//   load_impact_matrix_snapshot() → direct impact matrix + indicator catalog
//
// Anything missing or unreadable is a DataLoad error. Normalisation (joins,
// range expansion, indexes) happens in the store, not here.

use crate::error::{FootprintError, Result};
use crate::model::Indicator;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

pub const NAICS2017_NAICS2012_FILE: &str = "NAICS2017_NAICS2012.csv";
pub const NAICS2007_NAICS2012_FILE: &str = "NAICS2007_NAICS2012.csv";
pub const BEA_NAICS2007_FILE: &str = "BEA_NAICS2007.csv";
pub const DIRECT_IMPACTS_FILE: &str = "D.csv";
pub const INDICATORS_FILE: &str = "indicators.csv";

/// Suffix the model workbook appends to sector codes ("1111A0/US")
const REGION_SUFFIX: &str = "/US";

// ============================================================================
// RAW ROWS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Naics2017Row {
    #[serde(rename = "NAICS2017_CODE")]
    pub naics2017_code: String,

    #[serde(rename = "NAICS2017_TITLE")]
    pub naics2017_title: String,

    #[serde(rename = "NAICS2012_CODE")]
    pub naics2012_code: String,

    #[serde(rename = "NAICS2012_TITLE")]
    pub naics2012_title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Naics2007Row {
    #[serde(rename = "NAICS2007_CODE")]
    pub naics2007_code: String,

    #[serde(rename = "NAICS2007_TITLE")]
    pub naics2007_title: String,

    #[serde(rename = "NAICS2012_CODE")]
    pub naics2012_code: String,

    #[serde(rename = "NAICS2012_TITLE")]
    pub naics2012_title: String,
}

/// One row of the BEA industry ↔ NAICS-2007 table.
///
/// `naics2007_code` is the raw cell: it may hold a comma list ("3361,3362")
/// or a range ("3121-2").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeaNaicsRow {
    #[serde(rename = "BEA_CODE")]
    pub bea_code: String,

    #[serde(rename = "BEA_TITLE")]
    pub bea_title: String,

    #[serde(rename = "NAICS2007_CODE")]
    pub naics2007_code: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CrosswalkSnapshot {
    pub naics2017_naics2012: Vec<Naics2017Row>,
    pub naics2007_naics2012: Vec<Naics2007Row>,
    pub bea_naics2007: Vec<BeaNaicsRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawImpactRow {
    pub category: String,
    pub values: Vec<f64>,
}

/// Direct impact matrix as stored: categories down, sectors across
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawImpactMatrix {
    pub sectors: Vec<String>,
    pub rows: Vec<RawImpactRow>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImpactMatrixSnapshot {
    pub direct_impacts: RawImpactMatrix,
    pub indicators: Vec<Indicator>,
}

// ============================================================================
// SNAPSHOT SOURCE
// ============================================================================

pub trait SnapshotSource: Send + Sync {
    fn load_crosswalk_snapshot(&self) -> Result<CrosswalkSnapshot>;

    fn load_impact_matrix_snapshot(&self) -> Result<ImpactMatrixSnapshot>;

    /// Identifies the snapshot contents, when the source can tell
    fn version(&self) -> Option<String> {
        None
    }
}

// ============================================================================
// CSV SNAPSHOT (directory of exported tables)
// ============================================================================

pub struct CsvSnapshot {
    dir: PathBuf,
}

impl CsvSnapshot {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        CsvSnapshot {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn files() -> [&'static str; 5] {
        [
            NAICS2017_NAICS2012_FILE,
            NAICS2007_NAICS2012_FILE,
            BEA_NAICS2007_FILE,
            DIRECT_IMPACTS_FILE,
            INDICATORS_FILE,
        ]
    }

    fn read_table<T>(&self, file: &str, delimiter: u8) -> Result<Vec<T>>
    where
        T: for<'de> Deserialize<'de>,
    {
        let path = self.dir.join(file);
        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .from_path(&path)
            .map_err(|e| load_error(&path, e))?;

        let mut rows = Vec::new();
        for (line, result) in rdr.deserialize().enumerate() {
            let row: T = result.map_err(|e| {
                FootprintError::data_load(format!("{} row {}: {}", path.display(), line + 1, e))
            })?;
            rows.push(row);
        }

        if rows.is_empty() {
            return Err(FootprintError::data_load(format!(
                "{} contains no rows",
                path.display()
            )));
        }

        Ok(rows)
    }

    fn read_direct_impacts(&self) -> Result<RawImpactMatrix> {
        let path = self.dir.join(DIRECT_IMPACTS_FILE);
        let mut rdr = csv::Reader::from_path(&path).map_err(|e| load_error(&path, e))?;

        let headers = rdr.headers().map_err(|e| load_error(&path, e))?.clone();
        if headers.len() < 2 {
            return Err(FootprintError::data_load(format!(
                "{} needs a category column and at least one sector column",
                path.display()
            )));
        }

        let sectors: Vec<String> = headers
            .iter()
            .skip(1)
            .map(|h| strip_region_suffix(h.trim()).to_string())
            .collect();

        let mut rows = Vec::new();
        for (line, result) in rdr.records().enumerate() {
            let record = result.map_err(|e| load_error(&path, e))?;
            let category = record.get(0).unwrap_or_default().trim().to_string();

            let mut values = Vec::with_capacity(sectors.len());
            for (i, cell) in record.iter().skip(1).enumerate() {
                let value: f64 = cell.trim().parse().map_err(|_| {
                    FootprintError::data_load(format!(
                        "{} row {} sector {}: '{}' is not a number",
                        path.display(),
                        line + 1,
                        sectors[i],
                        cell
                    ))
                })?;
                values.push(value);
            }

            rows.push(RawImpactRow { category, values });
        }

        Ok(RawImpactMatrix { sectors, rows })
    }
}

impl SnapshotSource for CsvSnapshot {
    fn load_crosswalk_snapshot(&self) -> Result<CrosswalkSnapshot> {
        Ok(CrosswalkSnapshot {
            naics2017_naics2012: self.read_table(NAICS2017_NAICS2012_FILE, b'|')?,
            naics2007_naics2012: self.read_table(NAICS2007_NAICS2012_FILE, b'|')?,
            bea_naics2007: self.read_table(BEA_NAICS2007_FILE, b'|')?,
        })
    }

    fn load_impact_matrix_snapshot(&self) -> Result<ImpactMatrixSnapshot> {
        Ok(ImpactMatrixSnapshot {
            direct_impacts: self.read_direct_impacts()?,
            indicators: self.read_table(INDICATORS_FILE, b',')?,
        })
    }

    /// SHA-256 over every snapshot file, in fixed order
    fn version(&self) -> Option<String> {
        let mut hasher = Sha256::new();
        for file in Self::files() {
            match fs::read(self.dir.join(file)) {
                Ok(bytes) => {
                    hasher.update(file.as_bytes());
                    hasher.update(&bytes);
                }
                Err(e) => {
                    warn!("Cannot fingerprint snapshot file {}: {}", file, e);
                    return None;
                }
            }
        }
        Some(format!("{:x}", hasher.finalize()))
    }
}

fn load_error(path: &Path, e: impl std::fmt::Display) -> FootprintError {
    FootprintError::data_load(format!("{}: {}", path.display(), e))
}

fn strip_region_suffix(code: &str) -> &str {
    code.strip_suffix(REGION_SUFFIX).unwrap_or(code)
}

// ============================================================================
// IN-MEMORY SNAPSHOT
// ============================================================================

/// Snapshot held in memory, for embedding callers and tests
#[derive(Debug, Clone, Default)]
pub struct InMemorySnapshot {
    pub crosswalk: CrosswalkSnapshot,
    pub impact_matrix: ImpactMatrixSnapshot,
    pub version: Option<String>,
}

impl InMemorySnapshot {
    pub fn new(crosswalk: CrosswalkSnapshot, impact_matrix: ImpactMatrixSnapshot) -> Self {
        InMemorySnapshot {
            crosswalk,
            impact_matrix,
            version: None,
        }
    }

    /// Builder pattern: tag the snapshot with a version
    pub fn with_version(mut self, version: &str) -> Self {
        self.version = Some(version.to_string());
        self
    }
}

impl SnapshotSource for InMemorySnapshot {
    fn load_crosswalk_snapshot(&self) -> Result<CrosswalkSnapshot> {
        Ok(self.crosswalk.clone())
    }

    fn load_impact_matrix_snapshot(&self) -> Result<ImpactMatrixSnapshot> {
        Ok(self.impact_matrix.clone())
    }

    fn version(&self) -> Option<String> {
        self.version.clone()
    }
}

// ============================================================================
// NAICS CELL EXPANSION
// ============================================================================

/// Expand a BEA-table NAICS cell into individual codes.
///
/// "3361,3362" → ["3361", "3362"]
/// "3121-2"    → ["3121", "3122"]   (range end replaces trailing digits)
/// "5311-"     → ["5311"]           (malformed range keeps the start)
pub fn expand_naics_cell(cell: &str) -> Vec<String> {
    let mut codes = Vec::new();

    for part in cell.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match part.split_once('-') {
            None => codes.push(part.to_string()),
            Some((start, end)) => codes.extend(expand_range(start.trim(), end.trim())),
        }
    }

    codes
}

/// Widest range a concordance cell may expand to
pub const MAX_RANGE_CODES: u64 = 100;

fn expand_range(start: &str, end: &str) -> Vec<String> {
    let numeric = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());

    if !numeric(start) || !numeric(end) || end.len() > start.len() {
        warn!("Malformed NAICS range '{}-{}', keeping '{}'", start, end, start);
        return if start.is_empty() { Vec::new() } else { vec![start.to_string()] };
    }

    let upper = format!("{}{}", &start[..start.len() - end.len()], end);
    match (start.parse::<u64>(), upper.parse::<u64>()) {
        (Ok(a), Ok(b)) if a <= b && b - a < MAX_RANGE_CODES => (a..=b)
            .map(|n| format!("{:0width$}", n, width = start.len()))
            .collect(),
        (Ok(a), Ok(b)) if a <= b => {
            warn!(
                "NAICS range '{}-{}' spans {} codes (limit {}), keeping '{}'",
                start,
                end,
                b - a + 1,
                MAX_RANGE_CODES,
                start
            );
            vec![start.to_string()]
        }
        _ => {
            warn!("Descending NAICS range '{}-{}', keeping '{}'", start, end, start);
            vec![start.to_string()]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_expand_plain_and_list() {
        assert_eq!(expand_naics_cell("311111"), vec!["311111"]);
        assert_eq!(expand_naics_cell(" 3361, 3362 ,"), vec!["3361", "3362"]);
        assert!(expand_naics_cell("  ").is_empty());
    }

    #[test]
    fn test_expand_ranges() {
        assert_eq!(expand_naics_cell("3121-2"), vec!["3121", "3122"]);
        assert_eq!(expand_naics_cell("4231-4"), vec!["4231", "4232", "4233", "4234"]);
        assert_eq!(expand_naics_cell("311-13"), vec!["311", "312", "313"]);
        assert_eq!(expand_naics_cell("44-45,4541"), vec!["44", "45", "4541"]);
    }

    #[test]
    fn test_expand_malformed_ranges_keep_start() {
        assert_eq!(expand_naics_cell("5311-"), vec!["5311"]);
        assert_eq!(expand_naics_cell("3129-1"), vec!["3129"]);
        assert_eq!(expand_naics_cell("31-999"), vec!["31"]);
    }

    #[test]
    fn test_expand_oversized_range_keeps_start() {
        assert_eq!(expand_naics_cell("100000-999999"), vec!["100000"]);
        assert_eq!(expand_naics_cell("311000-311099").len(), 100);
        assert_eq!(expand_naics_cell("311000-311100"), vec!["311000"]);
    }

    #[test]
    fn test_strip_region_suffix() {
        assert_eq!(strip_region_suffix("1111A0/US"), "1111A0");
        assert_eq!(strip_region_suffix("1111A0"), "1111A0");
    }

    fn write_file(dir: &Path, name: &str, content: &str) {
        let mut file = fs::File::create(dir.join(name)).unwrap();
        file.write_all(content.as_bytes()).unwrap();
    }

    fn write_snapshot(dir: &Path) {
        write_file(
            dir,
            NAICS2017_NAICS2012_FILE,
            "NAICS2017_CODE|NAICS2017_TITLE|NAICS2012_CODE|NAICS2012_TITLE\n\
             311111|Dog and Cat Food Manufacturing|311111|Dog and Cat Food Manufacturing\n",
        );
        write_file(
            dir,
            NAICS2007_NAICS2012_FILE,
            "NAICS2007_CODE|NAICS2007_TITLE|NAICS2012_CODE|NAICS2012_TITLE\n\
             311111|Dog and Cat Food Manufacturing|311111|Dog and Cat Food Manufacturing\n",
        );
        write_file(
            dir,
            BEA_NAICS2007_FILE,
            "BEA_CODE|BEA_TITLE|NAICS2007_CODE\n\
             311111|Dog and cat food manufacturing|311111\n\
             3121A0|Beverages|3121-2\n",
        );
        write_file(
            dir,
            DIRECT_IMPACTS_FILE,
            "Indicator,311111/US,3121A0/US\n\
             CO2,10.0,2.5\n\
             Water,5.0,7.0\n",
        );
        write_file(
            dir,
            INDICATORS_FILE,
            "ID,Name,Code,Unit,Group,SimpleUnit,SimpleName\n\
             1,CO2,GHG,kg CO2 eq,Impact Potential,Pounds,Greenhouse Gases\n\
             2,Water,WATR,m3,Resource Use,Gallons,Water\n",
        );
    }

    #[test]
    fn test_csv_snapshot_loads_all_tables() {
        let dir = tempfile::tempdir().unwrap();
        write_snapshot(dir.path());
        let source = CsvSnapshot::new(dir.path());

        let crosswalk = source.load_crosswalk_snapshot().unwrap();
        assert_eq!(crosswalk.naics2017_naics2012.len(), 1);
        assert_eq!(crosswalk.naics2007_naics2012[0].naics2007_code, "311111");
        assert_eq!(crosswalk.bea_naics2007[1].naics2007_code, "3121-2");

        let matrix = source.load_impact_matrix_snapshot().unwrap();
        assert_eq!(matrix.direct_impacts.sectors, vec!["311111", "3121A0"]);
        assert_eq!(matrix.direct_impacts.rows[1].category, "Water");
        assert_eq!(matrix.direct_impacts.rows[1].values, vec![5.0, 7.0]);
        assert_eq!(matrix.indicators[0].unit, "kg CO2 eq");
    }

    #[test]
    fn test_csv_snapshot_version_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        write_snapshot(dir.path());
        let source = CsvSnapshot::new(dir.path());

        let v1 = source.version().unwrap();
        let v2 = source.version().unwrap();
        assert_eq!(v1, v2);
        assert_eq!(v1.len(), 64);

        write_file(dir.path(), DIRECT_IMPACTS_FILE, "Indicator,311111\nCO2,11.0\n");
        assert_ne!(source.version().unwrap(), v1);
    }

    #[test]
    fn test_missing_file_is_data_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = CsvSnapshot::new(dir.path());

        let err = source.load_crosswalk_snapshot().unwrap_err();
        assert!(err.is_fatal());
        assert!(source.version().is_none());
    }

    #[test]
    fn test_missing_column_is_data_load_error() {
        let dir = tempfile::tempdir().unwrap();
        write_snapshot(dir.path());
        write_file(
            dir.path(),
            BEA_NAICS2007_FILE,
            "BEA_CODE|BEA_TITLE\n311111|Dog and cat food manufacturing\n",
        );

        let err = CsvSnapshot::new(dir.path()).load_crosswalk_snapshot().unwrap_err();
        assert!(matches!(err, FootprintError::DataLoad(_)));
    }

    #[test]
    fn test_non_numeric_matrix_cell_is_data_load_error() {
        let dir = tempfile::tempdir().unwrap();
        write_snapshot(dir.path());
        write_file(dir.path(), DIRECT_IMPACTS_FILE, "Indicator,311111\nCO2,lots\n");

        let err = CsvSnapshot::new(dir.path()).load_impact_matrix_snapshot().unwrap_err();
        assert!(err.to_string().contains("not a number"));
    }
}
