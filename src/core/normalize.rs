//! Prompt normalization and query expansion
//!
//! `normalize` produces the exact-match key: trimmed, whitespace-collapsed,
//! lowercased. Punctuation is kept since stripping it loses user intent.
//! `expand` produces deterministic variant strings used only as embedding
//! inputs, never as cache keys.

/// Contractions expanded during query expansion
const CONTRACTIONS: &[(&str, &str)] = &[
    ("what's", "what is"),
    ("who's", "who is"),
    ("where's", "where is"),
    ("it's", "it is"),
    ("that's", "that is"),
    ("how's", "how is"),
    ("when's", "when is"),
    ("why's", "why is"),
    ("there's", "there is"),
];

/// Interchangeable question starters
const QUESTION_STARTERS: &[&str] = &["what is", "tell me about", "explain", "describe", "define"];

/// Normalize text for exact matching
pub fn normalize(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Expand a query into variant strings for embedding
///
/// Output order is deterministic: the lowercased input first, then
/// contraction expansions, then question-starter swaps, duplicates removed
/// keeping the first occurrence.
pub fn expand(s: &str) -> Vec<String> {
    let base = s.trim().to_lowercase();
    let mut variations = vec![base.clone()];

    for (contraction, expanded) in CONTRACTIONS {
        if base.contains(contraction) {
            variations.push(base.replace(contraction, expanded));
        }
    }

    for starter in QUESTION_STARTERS {
        if base.starts_with(starter) {
            for alt in QUESTION_STARTERS {
                if alt != starter {
                    variations.push(base.replacen(starter, alt, 1));
                }
            }
        }
    }

    let mut seen = std::collections::HashSet::new();
    variations.retain(|v| seen.insert(v.clone()));
    variations
}
