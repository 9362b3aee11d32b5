//! Term-frequency relevance shared by the stores and text search.
//!
//! Text is split on anything that is not alphanumeric and lowercased;
//! only whole tokens count as matches.

use vidx_models::{Scene, Video};

/// Matches in the title or tags count this many times a caption match.
pub const METADATA_WEIGHT: u32 = 2;

pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Distinct tokens of `query` in first-seen order.
pub fn query_terms(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for t in tokenize(query) {
        if !terms.contains(&t) {
            terms.push(t);
        }
    }
    terms
}

/// Normalize caller-supplied terms the same way query text is tokenized.
pub fn normalize_terms(terms: &[String]) -> Vec<String> {
    query_terms(&terms.join(" "))
}

pub fn term_frequency(text: &str, terms: &[String]) -> u32 {
    tokenize(text)
        .iter()
        .filter(|tok| terms.contains(tok))
        .count() as u32
}

/// Whole-token occurrences of `terms` in the caption, plus weighted
/// occurrences in the video title and tags.
pub fn score(scene: &Scene, video: &Video, terms: &[String]) -> u32 {
    let caption = scene
        .caption
        .as_deref()
        .map_or(0, |c| term_frequency(c, terms));
    let title = video
        .title
        .as_deref()
        .map_or(0, |t| term_frequency(t, terms));
    let tags: u32 = video.tags.iter().map(|t| term_frequency(t, terms)).sum();
    caption + METADATA_WEIGHT * (title + tags)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_terms_dedupe() {
        assert_eq!(query_terms("Car car CHASE"), vec!["car", "chase"]);
        assert!(query_terms("!!!").is_empty());
    }

    #[test]
    fn test_normalize_terms_splits_and_lowercases() {
        let terms = vec!["Car-Chase".to_string(), "car".to_string(), "%_".to_string()];
        assert_eq!(normalize_terms(&terms), vec!["car", "chase"]);
    }

    #[test]
    fn test_term_frequency_counts_whole_tokens() {
        let terms = vec!["car".to_string()];
        assert_eq!(term_frequency("Car after car, then a scar", &terms), 2);
        assert_eq!(term_frequency("a scarf", &terms), 0);
    }
}
