// 🗄️ Impact Model Store - reference tables loaded once per process
//
// Holds the NAICS crosswalk, the BEA sector concordance, the direct impact
// matrix and the indicator catalog. The snapshot is parsed on first use
// (concurrent first callers block on a single load) and is read-only after.
// A failed load is remembered: later calls get the same DataLoad error.

use crate::error::{FootprintError, Result};
use crate::model::{CrosswalkEntry, ImpactVector, Indicator, SectorCandidate};
use crate::snapshot::{expand_naics_cell, CrosswalkSnapshot, ImpactMatrixSnapshot, SnapshotSource};
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;
use tracing::{info, warn};

const UNVERSIONED: &str = "unversioned";

// ============================================================================
// BEA CONCORDANCE (NAICS-2007 code → model sectors)
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct BeaConcordance {
    rows: Vec<SectorCandidate>,
    by_naics2007: HashMap<String, Vec<usize>>,
}

impl BeaConcordance {
    fn build(rows: Vec<SectorCandidate>) -> Self {
        let mut by_naics2007: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, row) in rows.iter().enumerate() {
            by_naics2007
                .entry(row.source_naics2007_code.clone())
                .or_default()
                .push(i);
        }
        BeaConcordance { rows, by_naics2007 }
    }

    /// Rows whose NAICS-2007 code equals `code`, in snapshot order
    pub fn lookup(&self, code: &str) -> Vec<SectorCandidate> {
        self.by_naics2007
            .get(code)
            .map(|idx| idx.iter().map(|&i| self.rows[i].clone()).collect())
            .unwrap_or_default()
    }

    pub fn rows(&self) -> &[SectorCandidate] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

// ============================================================================
// DIRECT IMPACT MATRIX (model sector → impact vector)
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct DirectImpactMatrix {
    categories: Vec<String>,
    by_sector: HashMap<String, ImpactVector>,
}

impl DirectImpactMatrix {
    pub fn get(&self, sector_code: &str) -> Option<&ImpactVector> {
        self.by_sector.get(sector_code)
    }

    pub fn contains(&self, sector_code: &str) -> bool {
        self.by_sector.contains_key(sector_code)
    }

    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    pub fn sector_count(&self) -> usize {
        self.by_sector.len()
    }

    pub fn zero_vector(&self) -> ImpactVector {
        ImpactVector::zeros(&self.categories)
    }
}

// ============================================================================
// IMPACT MODEL (fully validated snapshot)
// ============================================================================

#[derive(Debug)]
pub struct ImpactModel {
    crosswalk: Vec<CrosswalkEntry>,
    crosswalk_index: HashMap<String, Vec<usize>>,
    bea: BeaConcordance,
    matrix: DirectImpactMatrix,
    indicators: Vec<Indicator>,
    version: String,
}

impl ImpactModel {
    pub fn build(
        crosswalk: CrosswalkSnapshot,
        impact_matrix: ImpactMatrixSnapshot,
        version: Option<String>,
    ) -> Result<Self> {
        let entries = join_crosswalk(&crosswalk)?;
        let mut crosswalk_index: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, entry) in entries.iter().enumerate() {
            crosswalk_index
                .entry(entry.naics2017_code.clone())
                .or_default()
                .push(i);
        }

        let bea = build_bea_concordance(&crosswalk)?;
        let matrix = build_matrix(impact_matrix.direct_impacts)?;

        if impact_matrix.indicators.is_empty() {
            return Err(FootprintError::data_load("indicator catalog is empty"));
        }

        // Both tables must speak the same sector vocabulary
        let bea_sectors: HashSet<&str> =
            bea.rows().iter().map(|r| r.model_sector_code.as_str()).collect();
        let known = bea_sectors.iter().filter(|s| matrix.contains(s)).count();
        if known == 0 {
            return Err(FootprintError::data_load(
                "no BEA concordance sector appears in the direct impact matrix",
            ));
        }
        if known < bea_sectors.len() {
            warn!(
                "{} of {} concordance sectors have no direct impact row",
                bea_sectors.len() - known,
                bea_sectors.len()
            );
        }

        Ok(ImpactModel {
            crosswalk: entries,
            crosswalk_index,
            bea,
            matrix,
            indicators: impact_matrix.indicators,
            version: version.unwrap_or_else(|| UNVERSIONED.to_string()),
        })
    }

    pub fn crosswalk(&self) -> &[CrosswalkEntry] {
        &self.crosswalk
    }

    /// Entries for a NAICS-2017 code, in snapshot order
    pub fn crosswalk_entries(&self, naics2017_code: &str) -> Vec<&CrosswalkEntry> {
        self.crosswalk_index
            .get(naics2017_code)
            .map(|idx| idx.iter().map(|&i| &self.crosswalk[i]).collect())
            .unwrap_or_default()
    }

    pub fn bea_concordance(&self) -> &BeaConcordance {
        &self.bea
    }

    pub fn direct_impact_matrix(&self) -> &DirectImpactMatrix {
        &self.matrix
    }

    pub fn indicators(&self) -> &[Indicator] {
        &self.indicators
    }

    pub fn version(&self) -> &str {
        &self.version
    }
}

/// NAICS2017 ⋈ NAICS2007 on the NAICS2012 code
fn join_crosswalk(snapshot: &CrosswalkSnapshot) -> Result<Vec<CrosswalkEntry>> {
    if snapshot.naics2017_naics2012.is_empty() || snapshot.naics2007_naics2012.is_empty() {
        return Err(FootprintError::data_load("NAICS concordance tables are empty"));
    }

    let mut by_2012: HashMap<&str, Vec<usize>> = HashMap::new();
    for (i, row) in snapshot.naics2007_naics2012.iter().enumerate() {
        by_2012.entry(row.naics2012_code.trim()).or_default().push(i);
    }

    let mut entries = Vec::new();
    let mut dropped = 0;

    for row in &snapshot.naics2017_naics2012 {
        let Some(matches) = by_2012.get(row.naics2012_code.trim()) else {
            continue;
        };
        for &i in matches {
            let older = &snapshot.naics2007_naics2012[i];
            if older.naics2007_code.trim().is_empty() {
                dropped += 1;
                continue;
            }
            entries.push(CrosswalkEntry {
                naics2017_code: row.naics2017_code.trim().to_string(),
                naics2017_title: row.naics2017_title.trim().to_string(),
                naics2012_code: row.naics2012_code.trim().to_string(),
                naics2012_title: row.naics2012_title.trim().to_string(),
                naics2007_code: older.naics2007_code.trim().to_string(),
                naics2007_title: older.naics2007_title.trim().to_string(),
            });
        }
    }

    if dropped > 0 {
        warn!("Dropped {} crosswalk rows with an empty NAICS-2007 code", dropped);
    }
    if entries.is_empty() {
        return Err(FootprintError::data_load(
            "NAICS 2017 and 2007 concordances share no NAICS-2012 code",
        ));
    }

    Ok(entries)
}

fn build_bea_concordance(snapshot: &CrosswalkSnapshot) -> Result<BeaConcordance> {
    let mut rows = Vec::new();

    for raw in &snapshot.bea_naics2007 {
        let code = raw.bea_code.trim();
        if code.is_empty() {
            continue;
        }
        for naics in expand_naics_cell(&raw.naics2007_code) {
            rows.push(SectorCandidate {
                model_sector_code: code.to_string(),
                model_sector_title: raw.bea_title.trim().to_string(),
                source_naics2007_code: naics,
            });
        }
    }

    if rows.is_empty() {
        return Err(FootprintError::data_load("BEA concordance has no usable rows"));
    }

    Ok(BeaConcordance::build(rows))
}

fn build_matrix(raw: crate::snapshot::RawImpactMatrix) -> Result<DirectImpactMatrix> {
    if raw.sectors.is_empty() || raw.rows.is_empty() {
        return Err(FootprintError::data_load("direct impact matrix is empty"));
    }

    let mut seen = HashSet::new();
    for sector in &raw.sectors {
        if sector.is_empty() || !seen.insert(sector.as_str()) {
            return Err(FootprintError::data_load(format!(
                "direct impact matrix has an empty or duplicate sector column '{}'",
                sector
            )));
        }
    }

    let mut categories = Vec::with_capacity(raw.rows.len());
    let mut by_sector: HashMap<String, ImpactVector> = raw
        .sectors
        .iter()
        .map(|s| (s.clone(), ImpactVector::new()))
        .collect();

    for row in &raw.rows {
        if row.category.is_empty() || categories.contains(&row.category) {
            return Err(FootprintError::data_load(format!(
                "direct impact matrix has an empty or duplicate category '{}'",
                row.category
            )));
        }
        if row.values.len() != raw.sectors.len() {
            return Err(FootprintError::data_load(format!(
                "category '{}' has {} values for {} sectors",
                row.category,
                row.values.len(),
                raw.sectors.len()
            )));
        }

        for (sector, value) in raw.sectors.iter().zip(&row.values) {
            if !value.is_finite() {
                return Err(FootprintError::data_load(format!(
                    "non-finite intensity for sector {} category {}",
                    sector, row.category
                )));
            }
            if let Some(vector) = by_sector.get_mut(sector) {
                vector.insert(&row.category, *value);
            }
        }
        categories.push(row.category.clone());
    }

    Ok(DirectImpactMatrix {
        categories,
        by_sector,
    })
}

// ============================================================================
// IMPACT MODEL STORE
// ============================================================================

pub struct ImpactModelStore {
    source: Box<dyn SnapshotSource>,
    state: OnceLock<std::result::Result<ImpactModel, String>>,
}

impl ImpactModelStore {
    pub fn new<S: SnapshotSource + 'static>(source: S) -> Self {
        ImpactModelStore {
            source: Box::new(source),
            state: OnceLock::new(),
        }
    }

    /// True once a snapshot has been parsed successfully
    pub fn is_loaded(&self) -> bool {
        matches!(self.state.get(), Some(Ok(_)))
    }

    /// The loaded model, parsing the snapshot on first call
    pub fn model(&self) -> Result<&ImpactModel> {
        match self.state.get_or_init(|| self.load()) {
            Ok(model) => Ok(model),
            Err(message) => Err(FootprintError::DataLoad(message.clone())),
        }
    }

    fn load(&self) -> std::result::Result<ImpactModel, String> {
        info!("Loading impact model snapshot");

        let result = self
            .source
            .load_crosswalk_snapshot()
            .and_then(|crosswalk| {
                let matrix = self.source.load_impact_matrix_snapshot()?;
                ImpactModel::build(crosswalk, matrix, self.source.version())
            });

        match result {
            Ok(model) => {
                info!(
                    "✓ Impact model {} loaded: {} crosswalk entries, {} BEA rows, {} sectors × {} categories, {} indicators",
                    model.version(),
                    model.crosswalk().len(),
                    model.bea_concordance().len(),
                    model.direct_impact_matrix().sector_count(),
                    model.direct_impact_matrix().categories().len(),
                    model.indicators().len()
                );
                Ok(model)
            }
            Err(FootprintError::DataLoad(message)) => {
                tracing::error!("Impact model snapshot unusable: {}", message);
                Err(message)
            }
            Err(other) => {
                tracing::error!("Impact model snapshot unusable: {}", other);
                Err(other.to_string())
            }
        }
    }

    pub fn get_crosswalk(&self) -> Result<&[CrosswalkEntry]> {
        Ok(self.model()?.crosswalk())
    }

    pub fn get_bea_concordance(&self) -> Result<&BeaConcordance> {
        Ok(self.model()?.bea_concordance())
    }

    pub fn get_direct_impact_matrix(&self) -> Result<&DirectImpactMatrix> {
        Ok(self.model()?.direct_impact_matrix())
    }

    pub fn get_indicators(&self) -> Result<&[Indicator]> {
        Ok(self.model()?.indicators())
    }

    pub fn snapshot_version(&self) -> Result<&str> {
        Ok(self.model()?.version())
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================
