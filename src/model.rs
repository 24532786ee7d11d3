// 🧾 Typed Records - industries, concordance rows, sector candidates, impacts
//
// Reference records (CrosswalkEntry, SectorCandidate, Indicator) are built once
// when the impact model snapshot loads and are never mutated afterwards.
// Request records (IndustryRecord, ResolvedImpact) live for one aggregation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// INDUSTRY RECORD (establishment counts for one geography)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndustryRecord {
    /// NAICS-2017 code, six digits for detailed industries
    pub industry_code: String,

    pub establishment_count: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub employee_count: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annual_payroll: Option<i64>,
}

impl IndustryRecord {
    pub fn new(industry_code: &str, establishment_count: u64) -> Self {
        IndustryRecord {
            industry_code: industry_code.to_string(),
            establishment_count,
            employee_count: None,
            annual_payroll: None,
        }
    }

    /// Builder pattern: add employee count
    pub fn with_employees(mut self, employees: i64) -> Self {
        self.employee_count = Some(employees);
        self
    }

    /// Builder pattern: add annual payroll
    pub fn with_payroll(mut self, payroll: i64) -> Self {
        self.annual_payroll = Some(payroll);
        self
    }

    /// Only six-digit codes identify a single industry; shorter or dashed
    /// codes ("31----", "3111//") are subtotals.
    pub fn is_detailed(&self) -> bool {
        is_six_digit_code(&self.industry_code)
    }
}

pub fn is_six_digit_code(code: &str) -> bool {
    code.len() == 6 && code.bytes().all(|b| b.is_ascii_digit())
}

// ============================================================================
// CROSSWALK ENTRY (NAICS 2017 ↔ 2012 ↔ 2007)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrosswalkEntry {
    pub naics2017_code: String,
    pub naics2017_title: String,
    pub naics2012_code: String,
    pub naics2012_title: String,
    pub naics2007_code: String,
    pub naics2007_title: String,
}

// ============================================================================
// SECTOR CANDIDATE (possible model sector for an industry)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectorCandidate {
    pub model_sector_code: String,
    pub model_sector_title: String,
    /// NAICS-2007 code (possibly truncated) the candidate was found under
    pub source_naics2007_code: String,
}

// ============================================================================
// INDICATOR (impact category metadata)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Indicator {
    #[serde(rename = "ID", default)]
    pub id: String,

    #[serde(rename = "Name")]
    pub name: String,

    #[serde(rename = "Code")]
    pub code: String,

    #[serde(rename = "Unit")]
    pub unit: String,

    #[serde(rename = "Group", default)]
    pub group: String,

    #[serde(rename = "SimpleUnit", default)]
    pub simple_unit: String,

    #[serde(rename = "SimpleName", default)]
    pub simple_name: String,
}

// ============================================================================
// IMPACT VECTOR (impact category → intensity)
// ============================================================================

/// Impact intensities keyed by impact category.
///
/// Ordered map so serialized output and iteration are stable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImpactVector(BTreeMap<String, f64>);

impl ImpactVector {
    pub fn new() -> Self {
        ImpactVector(BTreeMap::new())
    }

    /// Zero-valued vector over the given categories
    pub fn zeros<'a, I>(categories: I) -> Self
    where
        I: IntoIterator<Item = &'a String>,
    {
        ImpactVector(categories.into_iter().map(|c| (c.clone(), 0.0)).collect())
    }

    pub fn from_pairs<K: Into<String>>(pairs: impl IntoIterator<Item = (K, f64)>) -> Self {
        ImpactVector(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn insert(&mut self, category: &str, value: f64) {
        self.0.insert(category.to_string(), value);
    }

    pub fn get(&self, category: &str) -> Option<f64> {
        self.0.get(category).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn categories(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &f64)> {
        self.0.iter()
    }

    /// Component-wise `self += factor * other`
    pub fn add_scaled(&mut self, other: &ImpactVector, factor: f64) {
        for (category, value) in &other.0 {
            *self.0.entry(category.clone()).or_insert(0.0) += value * factor;
        }
    }

    pub fn scaled(&self, factor: f64) -> ImpactVector {
        ImpactVector(self.0.iter().map(|(k, v)| (k.clone(), v * factor)).collect())
    }

    pub fn is_zero(&self) -> bool {
        self.0.values().all(|v| *v == 0.0)
    }
}

// ============================================================================
// RESOLVED IMPACT (aggregator output)
// ============================================================================

/// How an industry's impact vector was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EstimationMethod {
    /// No establishments, zero vector
    NoEstablishments,

    /// Single sector, vector scaled by establishment count
    Deterministic,

    /// Several sectors, mean of simulated establishment assignments
    MonteCarlo { trials: u32 },
}

impl EstimationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            EstimationMethod::NoEstablishments => "no_establishments",
            EstimationMethod::Deterministic => "deterministic",
            EstimationMethod::MonteCarlo { .. } => "monte_carlo",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedImpact {
    pub industry_code: String,
    pub geography_id: String,
    pub establishment_count: u64,
    /// Model sectors the establishments were apportioned over
    pub sectors: Vec<String>,
    pub method: EstimationMethod,
    pub impact_vector: ImpactVector,
}
