//! Hybrid re-ranking and confidence scoring
//!
//! Combines the base cosine similarity with lexical overlap, domain match,
//! recency, and usage. The weights and bonuses are part of the service
//! contract and must stay reproducible bit for bit.

use crate::core::domain;
use crate::core::types::CacheEntry;
use chrono::{DateTime, Utc};
use std::collections::HashSet;

/// Weight of the embedding similarity
const W_EMBEDDING: f64 = 0.60;
/// Weight of the lexical (Jaccard) overlap
const W_TEXT: f64 = 0.20;
/// Weight of the domain boost
const W_DOMAIN: f64 = 0.10;
/// Weight of the recency score
const W_RECENCY: f64 = 0.05;
/// Weight of the usage score
const W_USAGE: f64 = 0.05;

/// Boost applied when query and entry share a domain
const DOMAIN_BOOST: f64 = 0.1;
/// Recency decays to zero over this many days
const RECENCY_DECAY_DAYS: f64 = 30.0;
/// Usage saturates at this many hits
const USAGE_CAP: f64 = 10.0;

/// Jaccard overlap between whitespace-split lowercased token sets
pub fn jaccard(a: &str, b: &str) -> f64 {
    let a_tokens: HashSet<String> = a.to_lowercase().split_whitespace().map(String::from).collect();
    let b_tokens: HashSet<String> = b.to_lowercase().split_whitespace().map(String::from).collect();

    let union = a_tokens.union(&b_tokens).count();
    if union == 0 {
        return 0.0;
    }
    a_tokens.intersection(&b_tokens).count() as f64 / union as f64
}

/// Hybrid similarity score for a candidate entry
pub fn hybrid_score(
    base_sim: f64,
    query_text: &str,
    entry: &CacheEntry,
    now: DateTime<Utc>,
) -> f64 {
    let text_score = jaccard(query_text, &entry.prompt_norm);

    let domain_boost = if domain::classify(query_text) == entry.domain {
        DOMAIN_BOOST
    } else {
        0.0
    };

    let recency_score = (1.0 - entry.age_days(now) / RECENCY_DECAY_DAYS).max(0.0);
    let usage_score = (entry.use_count as f64 / USAGE_CAP).min(1.0);

    let score = W_EMBEDDING * base_sim
        + W_TEXT * text_score
        + W_DOMAIN * domain_boost
        + W_RECENCY * recency_score
        + W_USAGE * usage_score;
    score.clamp(0.0, 1.0)
}

/// Confidence score for a candidate, derived from its hybrid score
pub fn confidence(
    hybrid_score: f64,
    base_sim: f64,
    entry: &CacheEntry,
    now: DateTime<Utc>,
) -> f64 {
    let mut confidence = hybrid_score;

    if base_sim > 0.85 {
        confidence += 0.10;
    } else if base_sim > 0.80 {
        confidence += 0.05;
    }

    if entry.use_count > 5 {
        confidence += 0.05;
    }

    if entry.age_days(now) < 7.0 {
        confidence += 0.05;
    }

    if base_sim < 0.75 {
        confidence -= 0.10;
    }

    confidence.clamp(0.0, 1.0)
}
