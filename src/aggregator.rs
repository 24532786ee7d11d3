// 🎲 Impact Aggregator - expected impact per industry per geography
//
// For every industry in a geography:
//   no sectors        → unresolved, left out (logged)
//   no establishments → zero vector
//   one sector        → sector vector × establishment count
//   several sectors   → Monte Carlo: each establishment lands on a uniformly
//                       random sector, summed per trial, averaged over trials
//
// Everything here is a pure read of the loaded impact model; randomness comes
// from a per-call seed or from a process-wide generator.

use crate::error::{FootprintError, Result};
use crate::model::{EstimationMethod, ImpactVector, IndustryRecord, ResolvedImpact, SectorCandidate};
use crate::resolver::{disambiguate, CrosswalkResolver};
use crate::store::{DirectImpactMatrix, ImpactModelStore};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Binomial, Distribution};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, OnceLock};
use tracing::{debug, info, warn};

pub const DEFAULT_TRIALS: u32 = 100;

// ============================================================================
// CANDIDATE MODE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateMode {
    /// Single best-titled sector per industry
    Disambiguated,

    /// Every candidate sector, apportioned by simulation
    #[default]
    Ambiguous,
}

impl CandidateMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateMode::Disambiguated => "disambiguated",
            CandidateMode::Ambiguous => "ambiguous",
        }
    }
}

impl fmt::Display for CandidateMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CandidateMode {
    type Err = FootprintError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "disambiguated" => Ok(CandidateMode::Disambiguated),
            "ambiguous" => Ok(CandidateMode::Ambiguous),
            other => Err(FootprintError::invalid_parameter(format!(
                "candidate mode must be 'disambiguated' or 'ambiguous', got '{}'",
                other
            ))),
        }
    }
}

// ============================================================================
// OPTIONS & REPORT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateOptions {
    pub trials: u32,
    pub candidate_mode: CandidateMode,
    /// Fixed seed for reproducible sampling
    pub seed: Option<u64>,
}

impl AggregateOptions {
    pub fn new(trials: u32, candidate_mode: CandidateMode) -> Self {
        AggregateOptions {
            trials,
            candidate_mode,
            seed: None,
        }
    }

    /// Builder pattern: fix the random seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

impl Default for AggregateOptions {
    fn default() -> Self {
        Self::new(DEFAULT_TRIALS, CandidateMode::default())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationReport {
    pub geography_id: String,
    pub trials: u32,
    pub candidate_mode: CandidateMode,
    pub impacts: Vec<ResolvedImpact>,
    /// Industry codes that contributed nothing because no sector matched
    pub unresolved: Vec<String>,
    /// Component-wise sum over every industry
    pub totals: ImpactVector,
}

// ============================================================================
// RANDOMNESS
// ============================================================================

fn process_rng() -> &'static Mutex<ChaCha8Rng> {
    static RNG: OnceLock<Mutex<ChaCha8Rng>> = OnceLock::new();
    RNG.get_or_init(|| Mutex::new(ChaCha8Rng::from_entropy()))
}

/// Seeded generator for one aggregation call
fn call_rng(seed: Option<u64>) -> ChaCha8Rng {
    match seed {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed),
        None => {
            let child_seed: u64 = match process_rng().lock() {
                Ok(mut rng) => rng.gen(),
                Err(poisoned) => {
                    let mut rng = poisoned.into_inner();
                    rng.gen()
                }
            };
            ChaCha8Rng::seed_from_u64(child_seed)
        }
    }
}

/// Mean total impact of `establishments` establishments, each assigned to a
/// uniformly drawn sector, over `trials` repetitions.
///
/// Only the per-sector assignment counts are accumulated; the mean is
/// Σ (count_i / trials) · v_i, identical to averaging per-trial sums. Summed
/// over trials those counts are a single multinomial draw of
/// trials × establishments placements, sampled as sequential binomials.
pub fn simulate_expected_impact<R: Rng>(
    vectors: &[&ImpactVector],
    establishments: u64,
    trials: u32,
    rng: &mut R,
) -> ImpactVector {
    let mut total = ImpactVector::new();
    if vectors.is_empty() || trials == 0 {
        return total;
    }

    let counts = match establishments.checked_mul(u64::from(trials)) {
        Some(placements) => uniform_multinomial(placements, vectors.len(), rng),
        None => {
            let mut counts = vec![0u64; vectors.len()];
            for _ in 0..trials {
                let drawn = uniform_multinomial(establishments, vectors.len(), rng);
                for (count, n) in counts.iter_mut().zip(drawn) {
                    *count += n;
                }
            }
            counts
        }
    };

    for (vector, count) in vectors.iter().zip(&counts) {
        total.add_scaled(vector, *count as f64 / trials as f64);
    }
    total
}

/// How many of `n` uniform placements land in each of `bins` bins
fn uniform_multinomial<R: Rng>(n: u64, bins: usize, rng: &mut R) -> Vec<u64> {
    let mut counts = vec![0u64; bins];
    let mut remaining = n;

    for (i, count) in counts.iter_mut().enumerate() {
        if remaining == 0 {
            break;
        }
        let bins_left = bins - i;
        let drawn = if bins_left == 1 {
            remaining
        } else {
            match Binomial::new(remaining, 1.0 / bins_left as f64) {
                Ok(binomial) => binomial.sample(rng),
                // p is always in (0, 0.5]
                Err(_) => remaining / bins_left as u64,
            }
        };
        *count = drawn;
        remaining -= drawn;
    }

    counts
}

// ============================================================================
// IMPACT AGGREGATOR
// ============================================================================

pub struct ImpactAggregator<'a> {
    store: &'a ImpactModelStore,
    resolver: CrosswalkResolver<'a>,
}

impl<'a> ImpactAggregator<'a> {
    pub fn new(store: &'a ImpactModelStore) -> Self {
        ImpactAggregator {
            store,
            resolver: CrosswalkResolver::new(store),
        }
    }

    pub fn resolver(&self) -> &CrosswalkResolver<'a> {
        &self.resolver
    }

    /// One ResolvedImpact per resolvable industry
    pub fn aggregate(
        &self,
        geography_id: &str,
        records: &[IndustryRecord],
        options: &AggregateOptions,
    ) -> Result<Vec<ResolvedImpact>> {
        Ok(self.aggregate_report(geography_id, records, options)?.impacts)
    }

    /// Impacts plus unresolved industries and geography totals
    pub fn aggregate_report(
        &self,
        geography_id: &str,
        records: &[IndustryRecord],
        options: &AggregateOptions,
    ) -> Result<AggregationReport> {
        let geography_id = geography_id.trim();
        if geography_id.is_empty() {
            return Err(FootprintError::invalid_parameter("geography id is empty"));
        }
        if options.trials == 0 {
            return Err(FootprintError::invalid_parameter("trials must be a positive integer"));
        }

        let matrix = self.store.get_direct_impact_matrix()?;
        let mut rng = call_rng(options.seed);

        let mut impacts = Vec::with_capacity(records.len());
        let mut unresolved = Vec::new();
        let mut totals = matrix.zero_vector();

        for record in records {
            if !record.is_detailed() {
                warn!("{}: skipping non-detailed industry code '{}'", geography_id, record.industry_code);
                unresolved.push(record.industry_code.clone());
                continue;
            }

            let sectors = self.sectors_for(&record.industry_code, options.candidate_mode, matrix)?;
            if sectors.is_empty() {
                warn!("{}: industry {} unresolved, no model sector", geography_id, record.industry_code);
                unresolved.push(record.industry_code.clone());
                continue;
            }

            let vectors: Vec<&ImpactVector> = sectors.iter().filter_map(|s| matrix.get(s)).collect();
            let (method, impact_vector) = if record.establishment_count == 0 {
                (EstimationMethod::NoEstablishments, matrix.zero_vector())
            } else if vectors.len() == 1 {
                (
                    EstimationMethod::Deterministic,
                    vectors[0].scaled(record.establishment_count as f64),
                )
            } else {
                (
                    EstimationMethod::MonteCarlo { trials: options.trials },
                    simulate_expected_impact(&vectors, record.establishment_count, options.trials, &mut rng),
                )
            };

            totals.add_scaled(&impact_vector, 1.0);
            impacts.push(ResolvedImpact {
                industry_code: record.industry_code.clone(),
                geography_id: geography_id.to_string(),
                establishment_count: record.establishment_count,
                sectors,
                method,
                impact_vector,
            });
        }

        info!(
            "{}: {} industries resolved, {} unresolved ({} mode, {} trials)",
            geography_id,
            impacts.len(),
            unresolved.len(),
            options.candidate_mode,
            options.trials
        );

        Ok(AggregationReport {
            geography_id: geography_id.to_string(),
            trials: options.trials,
            candidate_mode: options.candidate_mode,
            impacts,
            unresolved,
            totals,
        })
    }

    /// Distinct candidate sector codes that have an impact row.
    ///
    /// Candidates are filtered before disambiguation so the chosen sector is
    /// always one that can be scored.
    fn sectors_for(
        &self,
        industry_code: &str,
        mode: CandidateMode,
        matrix: &DirectImpactMatrix,
    ) -> Result<Vec<String>> {
        let mut resolution = self.resolver.candidates(industry_code)?;

        let mut usable = Vec::with_capacity(resolution.candidates.len());
        for candidate in resolution.candidates.drain(..) {
            if usable
                .iter()
                .any(|c: &SectorCandidate| c.model_sector_code == candidate.model_sector_code)
            {
                continue;
            }
            if !matrix.contains(&candidate.model_sector_code) {
                debug!(
                    "{}: sector {} has no direct impact row, dropped",
                    industry_code, candidate.model_sector_code
                );
                continue;
            }
            usable.push(candidate);
        }
        resolution.candidates = usable;

        let candidates = match mode {
            CandidateMode::Ambiguous => resolution.candidates,
            CandidateMode::Disambiguated => disambiguate(resolution),
        };

        Ok(candidates.into_iter().map(|c| c.model_sector_code).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::fixtures::{sample_store, SnapshotBuilder};

    fn two_sector_store() -> ImpactModelStore {
        ImpactModelStore::new(
            SnapshotBuilder::new()
                .industry("339999", "All Other Miscellaneous Manufacturing", "339999", "All Other Miscellaneous Manufacturing")
                .bea("A00000", "Sector A", "339999")
                .bea("B00000", "Sector B", "339999")
                .sector("A00000", &[("CO2", 2.0)])
                .sector("B00000", &[("CO2", 4.0)])
                .build(),
        )
    }

    #[test]
    fn test_single_sector_is_exact_and_scaled() {
        let store = sample_store();
        let aggregator = ImpactAggregator::new(&store);
        let records = vec![IndustryRecord::new("311111", 3)];

        for trials in [1, 100, 10_000] {
            let impacts = aggregator
                .aggregate("zipcode/30301", &records, &AggregateOptions::new(trials, CandidateMode::Ambiguous))
                .unwrap();

            assert_eq!(impacts.len(), 1);
            assert_eq!(impacts[0].method, EstimationMethod::Deterministic);
            assert_eq!(
                impacts[0].impact_vector,
                ImpactVector::from_pairs([("CO2", 30.0), ("Water", 15.0)])
            );
        }
    }

    #[test]
    fn test_two_candidates_converge_to_mean() {
        let store = two_sector_store();
        let aggregator = ImpactAggregator::new(&store);
        let records = vec![IndustryRecord::new("339999", 1)];
        let options = AggregateOptions::new(100_000, CandidateMode::Ambiguous).with_seed(7);

        let impacts = aggregator.aggregate("state/13", &records, &options).unwrap();

        let co2 = impacts[0].impact_vector.get("CO2").unwrap();
        assert!((co2 - 3.0).abs() / 3.0 < 0.01, "CO2 expectation {} not within 1% of 3.0", co2);
        assert_eq!(impacts[0].method, EstimationMethod::MonteCarlo { trials: 100_000 });
        assert_eq!(impacts[0].sectors, vec!["A00000", "B00000"]);
    }

    #[test]
    fn test_many_establishments_converge_to_k_times_mean() {
        let store = two_sector_store();
        let aggregator = ImpactAggregator::new(&store);
        let records = vec![IndustryRecord::new("339999", 25)];

        let coarse = aggregator
            .aggregate("state/13", &records, &AggregateOptions::new(100, CandidateMode::Ambiguous).with_seed(1))
            .unwrap();
        let fine = aggregator
            .aggregate("state/13", &records, &AggregateOptions::new(100_000, CandidateMode::Ambiguous).with_seed(1))
            .unwrap();

        let expected = 25.0 * 3.0;
        let coarse_co2 = coarse[0].impact_vector.get("CO2").unwrap();
        let fine_co2 = fine[0].impact_vector.get("CO2").unwrap();

        // Every simulated total lies between all-A and all-B
        assert!(coarse_co2 >= 25.0 * 2.0 && coarse_co2 <= 25.0 * 4.0);
        assert!((fine_co2 - expected).abs() / expected < 0.01);
    }

    #[test]
    fn test_zero_establishments_is_zero_vector() {
        let store = sample_store();
        let aggregator = ImpactAggregator::new(&store);
        let records = vec![IndustryRecord::new("336111", 0)];

        let impacts = aggregator
            .aggregate("zipcode/30301", &records, &AggregateOptions::default())
            .unwrap();

        assert_eq!(impacts[0].method, EstimationMethod::NoEstablishments);
        assert!(impacts[0].impact_vector.is_zero());
        assert_eq!(impacts[0].impact_vector.len(), 2);
    }

    #[test]
    fn test_seed_makes_sampling_reproducible() {
        let store = sample_store();
        let aggregator = ImpactAggregator::new(&store);
        let records = vec![IndustryRecord::new("336111", 7), IndustryRecord::new("311211", 4)];
        let options = AggregateOptions::new(50, CandidateMode::Ambiguous).with_seed(42);

        let a = aggregator.aggregate("zipcode/30301", &records, &options).unwrap();
        let b = aggregator.aggregate("zipcode/30301", &records, &options).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_disambiguated_mode_is_deterministic() {
        let store = sample_store();
        let aggregator = ImpactAggregator::new(&store);
        let records = vec![IndustryRecord::new("336111", 2)];
        let options = AggregateOptions::new(10, CandidateMode::Disambiguated);

        let impacts = aggregator.aggregate("zipcode/30301", &records, &options).unwrap();

        assert_eq!(impacts[0].sectors, vec!["336111"]);
        assert_eq!(impacts[0].method, EstimationMethod::Deterministic);
        assert_eq!(impacts[0].impact_vector.get("CO2"), Some(40.0));
    }

    #[test]
    fn test_unresolved_industries_are_reported_not_emitted() {
        let store = sample_store();
        let aggregator = ImpactAggregator::new(&store);
        let records = vec![
            IndustryRecord::new("311111", 1),
            IndustryRecord::new("999990", 12),
            IndustryRecord::new("31----", 40),
        ];

        let report = aggregator
            .aggregate_report("state/13/county/121", &records, &AggregateOptions::default())
            .unwrap();

        assert_eq!(report.impacts.len(), 1);
        assert_eq!(report.unresolved, vec!["999990", "31----"]);
        assert_eq!(report.totals, ImpactVector::from_pairs([("CO2", 10.0), ("Water", 5.0)]));
    }

    #[test]
    fn test_totals_sum_every_industry() {
        let store = sample_store();
        let aggregator = ImpactAggregator::new(&store);
        let records = vec![IndustryRecord::new("311111", 3), IndustryRecord::new("312111", 2)];

        let report = aggregator
            .aggregate_report("state/13", &records, &AggregateOptions::default())
            .unwrap();

        assert_eq!(report.totals.get("CO2"), Some(30.0 + 2.0));
        assert_eq!(report.totals.get("Water"), Some(15.0 + 16.0));
    }

    #[test]
    fn test_candidates_without_matrix_row_are_dropped() {
        let store = ImpactModelStore::new(
            SnapshotBuilder::new()
                .industry("339999", "All Other Miscellaneous Manufacturing", "339999", "All Other Miscellaneous Manufacturing")
                .bea("A00000", "Sector A", "339999")
                .bea("Z99999", "Retired sector", "339999")
                .bea("A00000", "Sector A", "339999")
                .sector("A00000", &[("CO2", 2.0)])
                .build(),
        );
        let aggregator = ImpactAggregator::new(&store);

        let impacts = aggregator
            .aggregate("state/13", &[IndustryRecord::new("339999", 5)], &AggregateOptions::default())
            .unwrap();

        assert_eq!(impacts[0].sectors, vec!["A00000"]);
        assert_eq!(impacts[0].method, EstimationMethod::Deterministic);
        assert_eq!(impacts[0].impact_vector.get("CO2"), Some(10.0));
    }

    #[test]
    fn test_disambiguation_only_picks_scorable_sectors() {
        // Best title match has no impact row; the other candidate does
        let store = ImpactModelStore::new(
            SnapshotBuilder::new()
                .industry("339999", "Widget Manufacturing", "339999", "Widget Manufacturing")
                .bea("A00000", "Gadget assembly", "339999")
                .bea("B00000", "Widget manufacturing", "339999")
                .sector("A00000", &[("CO2", 2.0)])
                .build(),
        );
        let aggregator = ImpactAggregator::new(&store);
        let records = vec![IndustryRecord::new("339999", 3)];

        for mode in [CandidateMode::Disambiguated, CandidateMode::Ambiguous] {
            let report = aggregator
                .aggregate_report("state/13", &records, &AggregateOptions::new(100, mode))
                .unwrap();

            assert!(report.unresolved.is_empty(), "{} mode left 339999 unresolved", mode);
            assert_eq!(report.impacts[0].sectors, vec!["A00000"]);
            assert_eq!(report.impacts[0].impact_vector.get("CO2"), Some(6.0));
        }
    }

    #[test]
    fn test_zero_establishments_leave_sampling_untouched() {
        let store = sample_store();
        let aggregator = ImpactAggregator::new(&store);
        let options = AggregateOptions::new(50, CandidateMode::Ambiguous).with_seed(11);

        let with_empty = aggregator
            .aggregate(
                "state/13",
                &[IndustryRecord::new("336111", 0), IndustryRecord::new("311211", 4)],
                &options,
            )
            .unwrap();
        let without = aggregator
            .aggregate("state/13", &[IndustryRecord::new("311211", 4)], &options)
            .unwrap();

        assert_eq!(with_empty[0].method, EstimationMethod::NoEstablishments);
        assert!(with_empty[0].impact_vector.is_zero());
        assert_eq!(with_empty[1].method, EstimationMethod::MonteCarlo { trials: 50 });
        assert_eq!(with_empty[1].impact_vector, without[0].impact_vector);
    }

    #[test]
    fn test_invalid_parameters() {
        let store = sample_store();
        let aggregator = ImpactAggregator::new(&store);
        let records = vec![IndustryRecord::new("311111", 1)];

        let err = aggregator
            .aggregate("state/13", &records, &AggregateOptions::new(0, CandidateMode::Ambiguous))
            .unwrap_err();
        assert!(matches!(err, FootprintError::InvalidParameter(_)));

        let err = aggregator
            .aggregate("  ", &records, &AggregateOptions::default())
            .unwrap_err();
        assert!(matches!(err, FootprintError::InvalidParameter(_)));
    }

    #[test]
    fn test_multinomial_counts_cover_every_placement() {
        let mut rng = ChaCha8Rng::seed_from_u64(5);

        for (n, bins) in [(0, 3), (1, 2), (7, 1), (1_000_000, 4)] {
            let counts = uniform_multinomial(n, bins, &mut rng);
            assert_eq!(counts.len(), bins);
            assert_eq!(counts.iter().sum::<u64>(), n);
        }

        // 4 bins, a million placements: each bin near a quarter
        let counts = uniform_multinomial(1_000_000, 4, &mut rng);
        for count in counts {
            assert!((count as f64 - 250_000.0).abs() < 5_000.0, "bin count {} far from 250000", count);
        }
    }

    #[test]
    fn test_simulation_with_single_vector_has_no_variance() {
        let v = ImpactVector::from_pairs([("CO2", 2.5)]);
        let mut rng = ChaCha8Rng::seed_from_u64(3);

        let result = simulate_expected_impact(&[&v], 4, 10, &mut rng);
        assert_eq!(result.get("CO2"), Some(10.0));
    }

    #[test]
    fn test_candidate_mode_parse() {
        assert_eq!("Ambiguous".parse::<CandidateMode>().unwrap(), CandidateMode::Ambiguous);
        assert_eq!(
            "disambiguated".parse::<CandidateMode>().unwrap(),
            CandidateMode::Disambiguated
        );
        assert!("weighted".parse::<CandidateMode>().is_err());
    }
}
