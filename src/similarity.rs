// 🔤 Title Similarity - TF-IDF vectors + cosine similarity
//
// Used to pick the one sector whose title reads most like the industry title.
// Conventions match the usual text vectorizer defaults:
//   - lowercase, tokens are runs of 2+ word characters
//   - smoothed idf: ln((1 + n) / (1 + df)) + 1
//   - each document vector is L2-normalised

use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;

fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\b\w\w+\b").expect("token pattern is a valid regex"))
}

pub fn tokenize(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    token_pattern()
        .find_iter(&lower)
        .map(|m| m.as_str().to_string())
        .collect()
}

// ============================================================================
// TF-IDF VECTORIZER
// ============================================================================

/// Sparse, L2-normalised document vector
pub type TermVector = BTreeMap<usize, f64>;

#[derive(Debug, Clone, Default)]
pub struct TfidfVectorizer {
    vocabulary: HashMap<String, usize>,
    idf: Vec<f64>,
}

impl TfidfVectorizer {
    /// Learn vocabulary and idf weights from a corpus
    pub fn fit<S: AsRef<str>>(documents: &[S]) -> Self {
        let mut vocabulary: HashMap<String, usize> = HashMap::new();
        let mut document_frequency: Vec<usize> = Vec::new();

        for document in documents {
            let mut seen = Vec::new();
            for token in tokenize(document.as_ref()) {
                let next = vocabulary.len();
                let index = *vocabulary.entry(token).or_insert(next);
                if index == document_frequency.len() {
                    document_frequency.push(0);
                }
                if !seen.contains(&index) {
                    seen.push(index);
                    document_frequency[index] += 1;
                }
            }
        }

        let n = documents.len() as f64;
        let idf = document_frequency
            .iter()
            .map(|&df| ((1.0 + n) / (1.0 + df as f64)).ln() + 1.0)
            .collect();

        TfidfVectorizer { vocabulary, idf }
    }

    pub fn vocabulary_size(&self) -> usize {
        self.vocabulary.len()
    }

    /// Vectorize a document; terms outside the vocabulary are ignored
    pub fn transform(&self, document: &str) -> TermVector {
        let mut counts: TermVector = BTreeMap::new();
        for token in tokenize(document) {
            if let Some(&index) = self.vocabulary.get(&token) {
                *counts.entry(index).or_insert(0.0) += 1.0;
            }
        }

        for (index, weight) in counts.iter_mut() {
            *weight *= self.idf[*index];
        }

        let norm = counts.values().map(|w| w * w).sum::<f64>().sqrt();
        if norm > 0.0 {
            for weight in counts.values_mut() {
                *weight /= norm;
            }
        }

        counts
    }
}

/// Cosine similarity of two L2-normalised sparse vectors (0.0 if either is empty)
pub fn cosine_similarity(a: &TermVector, b: &TermVector) -> f64 {
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    small
        .iter()
        .filter_map(|(index, wa)| large.get(index).map(|wb| wa * wb))
        .sum()
}

// ============================================================================
// BEST MATCH
// ============================================================================

/// Similarity of `target` to every candidate title, in candidate order.
///
/// The vocabulary is fitted on the candidate titles together with the target.
pub fn similarity_scores<S: AsRef<str>>(target: &str, candidates: &[S]) -> Vec<f64> {
    let mut corpus: Vec<&str> = candidates.iter().map(|c| c.as_ref()).collect();
    corpus.push(target);

    let vectorizer = TfidfVectorizer::fit(&corpus);
    let target_vector = vectorizer.transform(target);

    candidates
        .iter()
        .map(|c| cosine_similarity(&target_vector, &vectorizer.transform(c.as_ref())))
        .collect()
}

/// Index of the candidate title most similar to `target`; ties keep the first.
pub fn best_match<S: AsRef<str>>(target: &str, candidates: &[S]) -> Option<usize> {
    let scores = similarity_scores(target, candidates);

    let mut best: Option<(usize, f64)> = None;
    for (i, score) in scores.into_iter().enumerate() {
        match best {
            Some((_, top)) if score <= top => {}
            _ => best = Some((i, score)),
        }
    }

    best.map(|(i, _)| i)
}
