use regex::Regex;
use tracing::warn;

/// Case-insensitive whole-word matcher over a fixed keyword list.
/// Multi-word keywords match across any run of whitespace.
#[derive(Debug, Clone)]
pub struct KeywordMatcher {
    regex: Option<Regex>,
}

impl KeywordMatcher {
    pub fn new<S: AsRef<str>>(keywords: &[S]) -> Self {
        let alternatives: Vec<String> = keywords
            .iter()
            .map(|k| k.as_ref().trim())
            .filter(|k| !k.is_empty())
            .map(|k| {
                k.split_whitespace()
                    .map(regex::escape)
                    .collect::<Vec<_>>()
                    .join(r"\s+")
            })
            .collect();

        if alternatives.is_empty() {
            return Self { regex: None };
        }

        let pattern = format!(r"(?i)\b(?:{})\b", alternatives.join("|"));
        let regex = Regex::new(&pattern)
            .map_err(|e| warn!("Ignoring keyword list, invalid pattern {}: {}", pattern, e))
            .ok();

        Self { regex }
    }

    /// Number of non-overlapping keyword hits in `text`.
    pub fn count(&self, text: &str) -> usize {
        self.regex
            .as_ref()
            .map(|r| r.find_iter(text).count())
            .unwrap_or(0)
    }

    pub fn matches(&self, text: &str) -> bool {
        self.regex.as_ref().is_some_and(|r| r.is_match(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_whole_words_case_insensitively() {
        let matcher = KeywordMatcher::new(&["sum", "how many", "over time"]);

        assert!(matcher.matches("What is the SUM of revenue?"));
        assert!(!matcher.matches("Summarise the summary"));
        assert_eq!(matcher.count("How  many orders, and how many returns?"), 2);
        assert!(matcher.matches("revenue over\ttime"));
    }

    #[test]
    fn empty_list_never_matches() {
        let matcher = KeywordMatcher::new::<&str>(&[]);
        assert!(!matcher.matches("anything"));
        assert_eq!(matcher.count("anything"), 0);
    }
}
