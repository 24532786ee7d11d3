// 🧭 Crosswalk Resolver - NAICS-2017 code → model sector candidates
//
// 1. NAICS-2017 → concordance entry (first one if the code is duplicated)
// 2. entry's NAICS-2007 code → BEA rows, right-truncating until something
//    matches or fewer than two characters remain
// 3. several candidates → keep the one whose title is most similar to the
//    NAICS-2007 title (TF-IDF cosine)
//
// Missing data never errors: it comes back as an empty candidate list.

use crate::error::Result;
use crate::model::{CrosswalkEntry, SectorCandidate};
use crate::similarity::best_match;
use crate::store::ImpactModelStore;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Shortest NAICS prefix still worth looking up
const MIN_CODE_LEN: usize = 2;

// ============================================================================
// RESOLUTION (candidates + diagnostics)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub industry_code: String,

    /// Concordance entry used, if the code was in the crosswalk
    pub entry: Option<CrosswalkEntry>,

    /// How many concordance entries matched the code
    pub entry_matches: usize,

    /// NAICS-2007 code (possibly truncated) that produced the candidates
    pub matched_code: Option<String>,

    /// Number of BEA lookups performed
    pub attempts: usize,

    pub candidates: Vec<SectorCandidate>,
}

impl Resolution {
    pub fn is_resolved(&self) -> bool {
        !self.candidates.is_empty()
    }

    pub fn is_ambiguous(&self) -> bool {
        self.candidates.len() > 1
    }

    /// Title the candidates are compared against
    pub fn target_title(&self) -> &str {
        self.entry
            .as_ref()
            .map(|e| e.naics2007_title.as_str())
            .unwrap_or("")
    }
}

// ============================================================================
// CROSSWALK RESOLVER
// ============================================================================

pub struct CrosswalkResolver<'a> {
    store: &'a ImpactModelStore,
}

impl<'a> CrosswalkResolver<'a> {
    pub fn new(store: &'a ImpactModelStore) -> Self {
        CrosswalkResolver { store }
    }

    /// Concordance entry for a NAICS-2017 code.
    ///
    /// Returns the entry (first in snapshot order when duplicated) and how
    /// many entries matched.
    pub fn lookup_entry(&self, industry_code: &str) -> Result<(Option<CrosswalkEntry>, usize)> {
        let model = self.store.model()?;
        let entries = model.crosswalk_entries(industry_code.trim());

        match entries.len() {
            0 => warn!("No NAICS concordance entry for {}", industry_code),
            1 => {}
            n => warn!(
                "{} NAICS concordance entries for {}, using NAICS-2007 {}",
                n, industry_code, entries[0].naics2007_code
            ),
        }

        Ok((entries.first().map(|e| (*e).clone()), entries.len()))
    }

    /// Every candidate sector for a code, without disambiguation
    pub fn candidates(&self, industry_code: &str) -> Result<Resolution> {
        let industry_code = industry_code.trim();
        let (entry, entry_matches) = self.lookup_entry(industry_code)?;
        let bea = self.store.get_bea_concordance()?;

        // Unknown codes are tried as NAICS-2007 codes directly
        let mut code: String = entry
            .as_ref()
            .map(|e| e.naics2007_code.clone())
            .unwrap_or_else(|| industry_code.to_string());

        let mut attempts = 0;
        let mut candidates = Vec::new();
        let mut matched_code = None;

        while code.len() >= MIN_CODE_LEN {
            attempts += 1;
            candidates = bea.lookup(&code);
            if !candidates.is_empty() {
                matched_code = Some(code);
                break;
            }
            code.pop();
        }

        debug!(
            "{} → {} candidate(s) after {} lookup(s)",
            industry_code,
            candidates.len(),
            attempts
        );

        Ok(Resolution {
            industry_code: industry_code.to_string(),
            entry,
            entry_matches,
            matched_code,
            attempts,
            candidates,
        })
    }

    /// Best candidate for a code: empty, or exactly one sector
    pub fn resolve(&self, industry_code: &str) -> Result<Vec<SectorCandidate>> {
        Ok(disambiguate(self.candidates(industry_code)?))
    }
}

/// Collapse a resolution to its single most title-similar candidate
pub fn disambiguate(resolution: Resolution) -> Vec<SectorCandidate> {
    if !resolution.is_ambiguous() {
        return resolution.candidates;
    }

    let titles: Vec<&str> = resolution
        .candidates
        .iter()
        .map(|c| c.model_sector_title.as_str())
        .collect();

    let index = best_match(resolution.target_title(), &titles).unwrap_or(0);
    debug!(
        "{}: picked {} out of {} candidates",
        resolution.industry_code,
        resolution.candidates[index].model_sector_code,
        resolution.candidates.len()
    );

    vec![resolution.candidates[index].clone()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::fixtures::{sample_store, SnapshotBuilder};

    #[test]
    fn test_exact_single_match() {
        let store = sample_store();
        let resolver = CrosswalkResolver::new(&store);

        let resolution = resolver.candidates("311111").unwrap();
        assert_eq!(resolution.attempts, 1);
        assert_eq!(resolution.matched_code.as_deref(), Some("311111"));

        let resolved = resolver.resolve("311111").unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].model_sector_code, "311111");
        assert_eq!(resolved[0].source_naics2007_code, "311111");
    }

    #[test]
    fn test_truncation_finds_shared_prefix() {
        let store = sample_store();
        let resolver = CrosswalkResolver::new(&store);

        let resolution = resolver.candidates("311211").unwrap();
        assert_eq!(resolution.matched_code.as_deref(), Some("3112"));
        assert_eq!(resolution.attempts, 3);
        assert_eq!(resolution.candidates.len(), 2);
        assert!(resolution
            .candidates
            .iter()
            .all(|c| c.source_naics2007_code == "3112"));
    }

    #[test]
    fn test_truncation_reaches_expanded_range() {
        let store = sample_store();
        let resolver = CrosswalkResolver::new(&store);

        let resolved = resolver.resolve("312111").unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].model_sector_code, "312110");
        assert_eq!(resolved[0].source_naics2007_code, "3121");
    }

    #[test]
    fn test_disambiguation_picks_most_similar_title() {
        let store = sample_store();
        let resolver = CrosswalkResolver::new(&store);

        let flour = resolver.resolve("311211").unwrap();
        assert_eq!(flour.len(), 1);
        assert_eq!(flour[0].model_sector_code, "311210");

        let autos = resolver.resolve("336111").unwrap();
        assert_eq!(autos.len(), 1);
        assert_eq!(autos[0].model_sector_code, "336111");
    }

    #[test]
    fn test_disambiguation_is_repeatable() {
        let store = sample_store();
        let resolver = CrosswalkResolver::new(&store);

        let first = resolver.resolve("336111").unwrap();
        resolver.resolve("311211").unwrap();
        for _ in 0..10 {
            assert_eq!(resolver.resolve("336111").unwrap(), first);
        }
    }

    #[test]
    fn test_no_match_at_any_length_is_empty() {
        let store = sample_store();
        let resolver = CrosswalkResolver::new(&store);

        let resolution = resolver.candidates("999990").unwrap();
        assert!(!resolution.is_resolved());
        assert_eq!(resolution.matched_code, None);
        // 999990, 99999, 9999, 999, 99
        assert_eq!(resolution.attempts, 5);
        assert!(resolver.resolve("999990").unwrap().is_empty());
    }

    #[test]
    fn test_attempts_bounded_by_code_length() {
        let store = sample_store();
        let resolver = CrosswalkResolver::new(&store);

        for code in ["311111", "311211", "999990", "77", "7", "", "12345678"] {
            let resolution = resolver.candidates(code).unwrap();
            assert!(resolution.attempts <= code.len().saturating_sub(1));
        }
    }

    #[test]
    fn test_duplicate_entry_uses_first() {
        let store = sample_store();
        let resolver = CrosswalkResolver::new(&store);

        let resolution = resolver.candidates("111998").unwrap();
        assert_eq!(resolution.entry_matches, 2);
        assert_eq!(resolution.entry.as_ref().unwrap().naics2007_code, "111992");
        assert_eq!(resolution.candidates[0].model_sector_code, "111900");
    }

    #[test]
    fn test_unknown_code_is_tried_directly() {
        let store = sample_store();
        let resolver = CrosswalkResolver::new(&store);

        // Not in the crosswalk, but 3112 is a BEA prefix
        let resolution = resolver.candidates("311299").unwrap();
        assert!(resolution.entry.is_none());
        assert_eq!(resolution.entry_matches, 0);
        assert_eq!(resolution.matched_code.as_deref(), Some("3112"));

        // Empty target title: first candidate wins
        let resolved = resolver.resolve("311299").unwrap();
        assert_eq!(resolved[0].model_sector_code, "311210");
    }

    #[test]
    fn test_store_failure_propagates() {
        let store = ImpactModelStore::new(SnapshotBuilder::new().build());
        let resolver = CrosswalkResolver::new(&store);

        assert!(resolver.resolve("311111").unwrap_err().is_fatal());
    }
}
