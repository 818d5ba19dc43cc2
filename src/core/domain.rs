//! Keyword-based domain classification
//!
//! Used by the hybrid scorer for the domain boost and by the engine to tag
//! new entries. Matching is by substring on the lowercased text; ties and
//! zero hits fall back to `general`.

/// Fallback domain
pub const GENERAL: &str = "general";

/// Domain keyword table
const DOMAIN_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "finance",
        &["stock", "market", "inflation", "interest", "portfolio"],
    ),
    ("legal", &["contract", "clause", "law", "liability", "nda"]),
    ("tech", &["api", "python", "vector", "kubernetes", "embedding"]),
    ("geography", &["capital", "country", "city", "border"]),
];

/// Classify text into a domain tag
pub fn classify(text: &str) -> &'static str {
    let t = text.to_lowercase();
    let mut best = GENERAL;
    let mut best_hits = 0usize;
    let mut tied = false;

    for (domain, keywords) in DOMAIN_KEYWORDS {
        let hits = keywords.iter().filter(|k| t.contains(*k)).count();
        if hits > best_hits {
            best = domain;
            best_hits = hits;
            tied = false;
        } else if hits == best_hits && hits > 0 {
            tied = true;
        }
    }

    if best_hits == 0 || tied { GENERAL } else { best }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_domain_match() {
        assert_eq!(classify("What is the stock market doing"), "finance");
        assert_eq!(classify("Explain this NDA clause"), "legal");
        assert_eq!(classify("How do I deploy to Kubernetes"), "tech");
        assert_eq!(classify("What is the capital of France"), "geography");
    }

    #[test]
    fn test_highest_hit_count_wins() {
        // two finance keywords against one tech keyword
        assert_eq!(classify("stock market api"), "finance");
    }

    #[test]
    fn test_zero_hits_is_general() {
        assert_eq!(classify("tell me a joke"), GENERAL);
        assert_eq!(classify(""), GENERAL);
    }

    #[test]
    fn test_tie_is_general() {
        // one finance keyword, one legal keyword
        assert_eq!(classify("stock contract"), GENERAL);
    }

    #[test]
    fn test_matching_is_case_insensitive() {
        assert_eq!(classify("INFLATION and INTEREST rates"), "finance");
    }
}
