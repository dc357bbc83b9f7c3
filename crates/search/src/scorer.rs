use serde::{Deserialize, Serialize};

/// Tunable weights and penalty thresholds for hybrid ranking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScorerConfig {
    pub vector_weight: f32,
    pub lexical_weight: f32,
    /// Filename stems shorter than this (in chars) take the short-name
    /// penalty: one-letter names like `a.txt` produce noisy high cosine
    /// similarity.
    pub min_filename_len: usize,
    pub short_filename_penalty: f32,
    /// Files smaller than this take the small-file penalty; near-empty
    /// files embed into degenerate vectors.
    pub min_file_size_bytes: i64,
    pub small_file_penalty: f32,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            vector_weight: 0.7,
            lexical_weight: 0.3,
            min_filename_len: 5,
            short_filename_penalty: 0.6,
            min_file_size_bytes: 64,
            small_file_penalty: 0.7,
        }
    }
}

/// Combines vector similarity with filename signal into one rank.
///
/// Applied identically to exact-path, approximate-path and benchmark
/// candidates; rankings must agree across retrieval algorithms.
pub struct HybridScorer {
    config: ScorerConfig,
}

impl Default for HybridScorer {
    fn default() -> Self {
        Self::new(ScorerConfig::default())
    }
}

impl HybridScorer {
    #[must_use]
    pub const fn new(config: ScorerConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub const fn config(&self) -> &ScorerConfig {
        &self.config
    }

    /// Final score in [0, 1].
    #[must_use]
    pub fn score(
        &self,
        vector_similarity: f32,
        file_name: &str,
        query: &str,
        file_size: i64,
    ) -> f32 {
        let vector = vector_similarity.max(0.0);
        let lexical = filename_similarity(query, file_name);

        let mut score =
            vector * self.config.vector_weight + lexical * self.config.lexical_weight;

        if stem_len(file_name) < self.config.min_filename_len {
            score *= self.config.short_filename_penalty;
        }
        if file_size >= 0 && file_size < self.config.min_file_size_bytes {
            score *= self.config.small_file_penalty;
        }

        score.clamp(0.0, 1.0)
    }
}

fn stem_len(file_name: &str) -> usize {
    let stem = file_name.rsplit_once('.').map_or(file_name, |(stem, _)| stem);
    stem.chars().count()
}

/// Filename similarity in [0, 1], strict enough to avoid false positives.
///
/// Exact match beats substring match beats token overlap; query words
/// shorter than 3 chars are ignored, and substring token matches must
/// cover most of the filename token.
#[must_use]
pub fn filename_similarity(query: &str, file_name: &str) -> f32 {
    let query_lower = query.trim().to_lowercase();
    let filename_lower = file_name.to_lowercase();
    if query_lower.is_empty() {
        return 0.0;
    }

    if filename_lower == query_lower {
        return 1.0;
    }

    // Substring of the whole filename, but only for substantial queries:
    // "cal" must not match "close.txt".
    if query_lower.len() >= 4 && filename_lower.contains(&query_lower) {
        if filename_lower.starts_with(&query_lower) {
            return 0.95;
        }
        return 0.85;
    }

    let query_words: Vec<&str> = query_lower.split_whitespace().collect();
    if query_words.is_empty() {
        return 0.0;
    }

    let filename_words: Vec<&str> = filename_lower
        .split(|c: char| c.is_whitespace() || c == '-' || c == '_' || c == '.')
        .filter(|s| !s.is_empty())
        .collect();
    if filename_words.is_empty() {
        return 0.0;
    }

    let mut matched_words = 0usize;
    for query_word in &query_words {
        if query_word.len() < 3 {
            continue;
        }

        for filename_word in &filename_words {
            if filename_word == query_word {
                matched_words += 1;
                break;
            }
            // Substring token matches require a substantial query word and
            // a filename word of comparable length.
            if query_word.len() >= 4
                && filename_word.len() <= query_word.len() + 2
                && filename_word.contains(query_word)
            {
                let coverage = query_word.len() as f32 / filename_word.len() as f32;
                if filename_word.starts_with(query_word) || coverage > 0.6 {
                    matched_words += 1;
                    break;
                }
            }
        }
    }

    if matched_words == 0 {
        return 0.0;
    }

    let word_match_ratio = matched_words as f32 / query_words.len() as f32;
    let char_similarity = subsequence_similarity(&query_lower, &filename_lower);

    (word_match_ratio * 0.8) + (char_similarity * 0.2)
}

/// Greedy longest-common-subsequence approximation, normalized by the
/// longer string.
fn subsequence_similarity(query: &str, filename: &str) -> f32 {
    if query.is_empty() || filename.is_empty() {
        return 0.0;
    }

    let query_chars: Vec<char> = query.chars().collect();
    let filename_chars: Vec<char> = filename.chars().collect();

    let mut common = 0usize;
    let mut filename_pos = 0usize;
    for &qc in &query_chars {
        if let Some(offset) = filename_chars[filename_pos..].iter().position(|&fc| fc == qc) {
            common += 1;
            filename_pos += offset + 1;
            if filename_pos >= filename_chars.len() {
                break;
            }
        }
    }

    let max_len = query_chars.len().max(filename_chars.len()) as f32;
    (common as f32 / max_len).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_filename_match_scores_one() {
        assert_eq!(filename_similarity("report.pdf", "Report.pdf"), 1.0);
    }

    #[test]
    fn prefix_substring_beats_inner_substring() {
        let prefix = filename_similarity("budget", "budget_2024.xlsx");
        let inner = filename_similarity("budget", "q3_budget.xlsx");
        assert_eq!(prefix, 0.95);
        assert_eq!(inner, 0.85);
    }

    #[test]
    fn short_queries_do_not_substring_match() {
        // "cal" must not light up "close.txt" or similar.
        assert_eq!(filename_similarity("cal", "close.txt"), 0.0);
    }

    #[test]
    fn token_overlap_matches_word_boundaries() {
        let score = filename_similarity("NDA", "Carpaal_NDA.pdf");
        assert!(score >= 0.8, "token match should score high, got {score}");

        assert_eq!(filename_similarity("NDA", "randomfile.txt"), 0.0);
    }

    #[test]
    fn nda_file_outranks_random_file_at_equal_similarity() {
        let scorer = HybridScorer::default();
        let nda = scorer.score(0.5, "Carpaal_NDA.pdf", "NDA", 10_000);
        let random = scorer.score(0.5, "randomfile.txt", "NDA", 10_000);
        assert!(
            nda > random,
            "lexical boost must rank the NDA file higher ({nda} vs {random})"
        );
    }

    #[test]
    fn short_filename_penalty_reorders_noisy_hits() {
        let scorer = HybridScorer::default();
        // A one-letter name with suspiciously high similarity must rank
        // below a real name with honest similarity.
        let short = scorer.score(0.9, "a.txt", "quarterly overview", 10_000);
        let long = scorer.score(0.7, "quarterly_report_2024.txt", "quarterly overview", 10_000);
        assert!(
            short < long,
            "short-name penalty should demote a.txt ({short} vs {long})"
        );
    }

    #[test]
    fn small_file_penalty_applies_below_threshold() {
        let scorer = HybridScorer::default();
        let tiny = scorer.score(0.8, "notes_from_meeting.txt", "meeting", 10);
        let normal = scorer.score(0.8, "notes_from_meeting.txt", "meeting", 10_000);
        assert!(tiny < normal);
    }

    #[test]
    fn negative_similarity_clamps_to_zero_contribution() {
        let scorer = HybridScorer::default();
        let score = scorer.score(-0.4, "unrelated_document.txt", "query terms", 10_000);
        assert_eq!(score, 0.0);
    }

    #[test]
    fn score_stays_in_unit_interval() {
        let scorer = HybridScorer::default();
        let score = scorer.score(1.0, "budget.xlsx", "budget", 10_000);
        assert!((0.0..=1.0).contains(&score));
    }

    #[test]
    fn weights_are_tunable() {
        let scorer = HybridScorer::new(ScorerConfig {
            vector_weight: 1.0,
            lexical_weight: 0.0,
            ..ScorerConfig::default()
        });
        let with_lexical = scorer.score(0.5, "Carpaal_NDA.pdf", "NDA", 10_000);
        let without = scorer.score(0.5, "randomfile.txt", "NDA", 10_000);
        assert_eq!(with_lexical, without, "zero lexical weight mutes the boost");
    }
}
