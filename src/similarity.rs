use std::collections::HashSet;

use crate::category::Category;
use crate::model::ScoreBreakdown;

/// Generic complaint vocabulary excluded from the rare-word boost.
const COMMON_WORDS: &[&str] = &[
    "action", "area", "authority", "complain", "complaint", "condition", "day", "immediate",
    "immediately", "issue", "kindly", "people", "please", "problem", "request", "resident",
    "situation", "time", "urgent", "urgently",
];

/// Tokens that signal a shared locality when they co-occur.
const LOCATION_TOKENS: &[&str] = &[
    "block", "chowk", "colony", "hospital", "market", "nagar", "park", "road", "school",
    "sector", "station", "ward",
];

const RARE_WORD_BOOST_STEP: f64 = 0.02;
const RARE_WORD_BOOST_CAP: f64 = 0.08;
const LOCATION_BOOST_STEP: f64 = 0.03;
const LOCATION_BOOST_CAP: f64 = 0.06;
const CATEGORY_MATCH_BOOST: f64 = 0.10;
const CATEGORY_MISMATCH_PENALTY: f64 = -0.25;

/// Signal weights for the composite score, normalized over their sum.
#[derive(Debug, Clone, Copy)]
pub struct Weights {
    pub cosine: f64,
    pub jaccard: f64,
    pub ngram: f64,
    pub metadata: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            cosine: 0.55,
            jaccard: 0.25,
            ngram: 0.15,
            metadata: 0.05,
        }
    }
}

/// One side of a pairwise comparison: unit-norm embedding, processed
/// tokens, detected category.
#[derive(Debug, Clone, Copy)]
pub struct SimilaritySubject<'a> {
    pub embedding: &'a [f32],
    pub tokens: &'a [String],
    pub category: Category,
}

pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f64 {
    if left.len() != right.len() || left.is_empty() {
        return 0.0;
    }

    left.iter()
        .zip(right.iter())
        .map(|(left_value, right_value)| f64::from(*left_value) * f64::from(*right_value))
        .sum::<f64>()
}

pub fn l2_normalize(values: &mut [f32]) {
    let squared_norm = values
        .iter()
        .map(|value| f64::from(*value) * f64::from(*value))
        .sum::<f64>();

    if squared_norm <= 0.0 {
        return;
    }

    let norm = squared_norm.sqrt() as f32;
    if norm == 0.0 {
        return;
    }

    for value in values {
        *value /= norm;
    }
}

pub fn jaccard_similarity(left: &HashSet<&str>, right: &HashSet<&str>) -> f64 {
    if left.is_empty() && right.is_empty() {
        return 0.0;
    }

    let intersection = left.intersection(right).count();
    let union = left.len() + right.len() - intersection;
    if union == 0 {
        return 0.0;
    }

    intersection as f64 / union as f64
}

/// 0.6 * bigram Jaccard + 0.4 * trigram Jaccard over token n-grams.
pub fn ngram_similarity(left: &[String], right: &[String]) -> f64 {
    0.6 * ngram_jaccard(left, right, 2) + 0.4 * ngram_jaccard(left, right, 3)
}

fn ngram_jaccard(left: &[String], right: &[String], n: usize) -> f64 {
    let left_grams = token_ngrams(left, n);
    let right_grams = token_ngrams(right, n);
    jaccard_similarity(
        &left_grams.iter().map(String::as_str).collect(),
        &right_grams.iter().map(String::as_str).collect(),
    )
}

fn token_ngrams(tokens: &[String], n: usize) -> HashSet<String> {
    if tokens.len() < n {
        return HashSet::new();
    }
    tokens.windows(n).map(|window| window.join(" ")).collect()
}

/// Weighted multi-signal score with rare-word, location and category
/// modifiers, clamped to [0, 1].
pub fn composite_score(
    a: &SimilaritySubject<'_>,
    b: &SimilaritySubject<'_>,
    weights: &Weights,
) -> (f64, ScoreBreakdown) {
    let cosine = cosine_similarity(a.embedding, b.embedding);
    let a_set: HashSet<&str> = a.tokens.iter().map(String::as_str).collect();
    let b_set: HashSet<&str> = b.tokens.iter().map(String::as_str).collect();
    let jaccard = jaccard_similarity(&a_set, &b_set);
    let ngram = ngram_similarity(a.tokens, b.tokens);

    let weight_sum = weights.cosine + weights.jaccard + weights.ngram + weights.metadata;
    let base = if weight_sum > 0.0 {
        (cosine * weights.cosine + jaccard * weights.jaccard + ngram * weights.ngram) / weight_sum
    } else {
        0.0
    };

    let rare_words: Vec<&str> = a_set
        .intersection(&b_set)
        .copied()
        .filter(|token| token.chars().count() > 3 && !COMMON_WORDS.contains(token))
        .collect();
    let rare_boost = (RARE_WORD_BOOST_STEP * rare_words.len() as f64).min(RARE_WORD_BOOST_CAP);

    let location_hits = rare_words
        .iter()
        .filter(|token| LOCATION_TOKENS.contains(*token) || token.chars().all(|ch| ch.is_ascii_digit()))
        .count();
    let location_boost = (LOCATION_BOOST_STEP * location_hits as f64).min(LOCATION_BOOST_CAP);

    let category_modifier = match (a.category, b.category) {
        (Category::Other, _) | (_, Category::Other) => 0.0,
        (left, right) if left == right => CATEGORY_MATCH_BOOST,
        _ => CATEGORY_MISMATCH_PENALTY,
    };

    let contextual = rare_boost + location_boost + category_modifier;
    let score = (base + contextual).clamp(0.0, 1.0);

    let breakdown = ScoreBreakdown {
        cosine: cosine.clamp(0.0, 1.0),
        jaccard,
        ngram,
        contextual: contextual.clamp(0.0, 1.0),
    };

    (score, breakdown)
}
