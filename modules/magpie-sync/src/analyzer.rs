//! Pure text analysis: hashtags, mentions, URLs, themes, proper-noun
//! entities, and truncation classification.
//!
//! No side effects, deterministic for identical input and configuration.

use std::collections::BTreeSet;

use regex::Regex;

use magpie_common::ExtractedFacts;

/// Controlled theme vocabulary: theme name → trigger substrings.
/// Matching is case-insensitive; triggers of three characters or fewer
/// match on word boundaries only, so "maintain" never triggers `ai`.
const THEME_TABLE: &[(&str, &[&str])] = &[
    ("ai", &["ai", "artificial intelligence", "machine learning", "ml", "deep learning"]),
    ("llm", &["llm", "gpt", "claude", "gemini", "language model", "transformer"]),
    ("agents", &["agent", "agentic", "autonomous", "multi-agent"]),
    ("infrastructure", &["kubernetes", "docker", "aws", "cloud", "devops", "terraform"]),
    ("business", &["startup", "founder", "revenue", "saas", "b2b", "growth"]),
    ("crypto", &["bitcoin", "ethereum", "crypto", "blockchain", "web3", "defi"]),
    ("dev", &["programming", "code", "software", "developer", "rust", "python", "typescript"]),
    ("security", &["security", "vulnerability", "exploit", "breach", "infosec"]),
];

/// Words never treated as proper-noun entities even when capitalized.
const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by", "i",
];

#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    /// A text ending with any of these (after trailing-whitespace trim)
    /// is classified truncated.
    pub truncation_indicators: Vec<String>,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            truncation_indicators: vec![
                "\u{2026}".to_string(),
                "...".to_string(),
                ">>>".to_string(),
                "[more]".to_string(),
            ],
        }
    }
}

pub struct Analyzer {
    config: AnalyzerConfig,
    hashtag_re: Regex,
    mention_re: Regex,
    url_re: Regex,
    multi_word_re: Regex,
}

impl Analyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        Self {
            config,
            hashtag_re: Regex::new(r"#(\w+)").expect("hashtag regex"),
            mention_re: Regex::new(r"@(\w+)").expect("mention regex"),
            url_re: Regex::new(r"https?://[^\s]+").expect("url regex"),
            multi_word_re: Regex::new(r"\b[A-Z][a-z]+(?:\s+[A-Z][a-z]+)+\b")
                .expect("multi-word regex"),
        }
    }

    /// Extract everything derivable from the text itself. The embedding is
    /// computed elsewhere and stays `None` here.
    pub fn analyze(&self, text: &str) -> ExtractedFacts {
        ExtractedFacts {
            hashtags: self.extract_case_folded(&self.hashtag_re, text),
            mentions: self.extract_case_folded(&self.mention_re, text),
            urls: self.extract_urls(text),
            themes: self.extract_themes(text),
            entities: self.extract_entities(text),
            embedding: None,
        }
    }

    /// Whether the text looks cut off. Empty text is never truncated.
    pub fn is_truncated(&self, text: &str) -> bool {
        let trimmed = text.trim_end();
        if trimmed.is_empty() {
            return false;
        }
        self.config
            .truncation_indicators
            .iter()
            .any(|ind| trimmed.ends_with(ind.as_str()))
    }

    fn extract_case_folded(&self, re: &Regex, text: &str) -> BTreeSet<String> {
        re.captures_iter(text)
            .map(|c| c[1].to_lowercase())
            .collect()
    }

    fn extract_urls(&self, text: &str) -> BTreeSet<String> {
        self.url_re
            .find_iter(text)
            .map(|m| m.as_str().trim_end_matches(['.', ',', ';', ':', '!', '?', ')']).to_string())
            .filter(|u| url::Url::parse(u).is_ok())
            .collect()
    }

    fn extract_themes(&self, text: &str) -> BTreeSet<String> {
        let lower = text.to_lowercase();
        THEME_TABLE
            .iter()
            .filter(|(_, triggers)| triggers.iter().any(|t| trigger_matches(&lower, t)))
            .map(|(theme, _)| theme.to_string())
            .collect()
    }

    /// Best-effort proper-noun extraction: multi-word capitalized runs plus
    /// single capitalized words that are not sentence-initial. False
    /// positives are expected and tolerated downstream.
    fn extract_entities(&self, text: &str) -> BTreeSet<String> {
        let mut entities: BTreeSet<String> = self
            .multi_word_re
            .find_iter(text)
            .map(|m| m.as_str().to_string())
            .collect();

        for sentence in text.split_terminator(['.', '!', '?']) {
            for (i, word) in sentence.split_whitespace().enumerate() {
                if i == 0 {
                    continue;
                }
                if STOP_WORDS.contains(&word.to_lowercase().as_str()) {
                    continue;
                }
                let clean = word.trim_end_matches(|c: char| !c.is_alphanumeric());
                if clean.len() > 2
                    && clean.chars().next().is_some_and(|c| c.is_uppercase())
                    && clean.chars().all(|c| c.is_alphanumeric())
                {
                    entities.insert(clean.to_string());
                }
            }
        }

        entities
    }
}

impl Default for Analyzer {
    fn default() -> Self {
        Self::new(AnalyzerConfig::default())
    }
}

/// Substring match with a word-boundary guard for short triggers.
fn trigger_matches(lower_text: &str, trigger: &str) -> bool {
    if trigger.len() > 3 {
        return lower_text.contains(trigger);
    }
    lower_text.match_indices(trigger).any(|(start, _)| {
        let before_ok = lower_text[..start]
            .chars()
            .next_back()
            .is_none_or(|c| !c.is_alphanumeric());
        let after_ok = lower_text[start + trigger.len()..]
            .chars()
            .next()
            .is_none_or(|c| !c.is_alphanumeric());
        before_ok && after_ok
    })
}
