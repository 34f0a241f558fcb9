//! Boilerplate removal and whitespace flattening for plain-text bodies.

use crate::config::ExtractionConfig;
use crate::error::ConfigError;
use regex::Regex;

pub struct Normalizer {
    /// Alternation of every footer marker; the leftmost hit wins
    cutoff: Option<Regex>,
    social_tags: Regex,
    whitespace: Regex,
}

impl Normalizer {
    pub fn new(config: &ExtractionConfig) -> Result<Self, ConfigError> {
        let mut alternatives: Vec<String> = config
            .boilerplate_markers
            .iter()
            .filter(|marker| !marker.is_empty())
            .map(|marker| regex::escape(marker))
            .collect();
        if config.separator_min_run > 0 {
            alternatives.push(format!("={{{},}}", config.separator_min_run));
        }

        let cutoff = if alternatives.is_empty() {
            None
        } else {
            Some(Regex::new(&alternatives.join("|"))?)
        };

        Ok(Self {
            cutoff,
            social_tags: Regex::new(r"(?i)\[image:\s*(?:facebook|website|email)\]\s*(?:<[^>]*>)?")?,
            whitespace: Regex::new(r"\s+")?,
        })
    }

    /// Drop everything from the earliest boilerplate marker on, remove
    /// social footer image tags and collapse whitespace to single spaces.
    pub fn normalize(&self, raw: &str) -> String {
        let content = match self.cutoff.as_ref().and_then(|re| re.find(raw)) {
            Some(found) => &raw[..found.start()],
            None => raw,
        };

        let content = self.social_tags.replace_all(content, " ");
        self.whitespace.replace_all(&content, " ").trim().to_string()
    }
}
