//! Splits normalized newsletter text into candidate event blocks.

use crate::config::ExtractionConfig;
use crate::error::ConfigError;
use regex::Regex;

pub struct Segmenter {
    anchor: String,
    min_chars: usize,
    date_shape: Regex,
}

impl Segmenter {
    pub fn new(config: &ExtractionConfig) -> Result<Self, ConfigError> {
        if config.block_anchor.is_empty() {
            return Err(ConfigError::Invalid("block anchor must not be empty".to_string()));
        }

        Ok(Self {
            anchor: config.block_anchor.clone(),
            min_chars: config.min_block_chars,
            date_shape: Regex::new(r"[0-9]{1,2}/[0-9]{1,2}")?,
        })
    }

    /// Blocks in source order. Each anchor occurrence starts a new block and
    /// stays with it; fragments that are too short or carry no day/month
    /// pair are skipped.
    pub fn segments<'a>(&'a self, text: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.segment_indices(text).map(|(_, block)| block)
    }

    /// Like [`Segmenter::segments`], paired with each block's byte offset in `text`
    pub fn segment_indices<'a>(&'a self, text: &'a str) -> Segments<'a> {
        Segments {
            segmenter: self,
            text,
            pos: 0,
        }
    }

    fn accepts(&self, block: &str) -> bool {
        block.chars().count() > self.min_chars && self.date_shape.is_match(block)
    }
}

pub struct Segments<'a> {
    segmenter: &'a Segmenter,
    text: &'a str,
    pos: usize,
}

impl<'a> Iterator for Segments<'a> {
    type Item = (usize, &'a str);

    fn next(&mut self) -> Option<(usize, &'a str)> {
        let anchor = self.segmenter.anchor.as_str();

        while self.pos < self.text.len() {
            let rest = &self.text[self.pos..];
            let skip = if rest.starts_with(anchor) { anchor.len() } else { 0 };
            let end = rest[skip..]
                .find(anchor)
                .map(|i| self.pos + skip + i)
                .unwrap_or(self.text.len());

            let raw = &self.text[self.pos..end];
            let start = self.pos + (raw.len() - raw.trim_start().len());
            let block = raw.trim();
            self.pos = end;

            if self.segmenter.accepts(block) {
                return Some((start, block));
            }
        }

        None
    }
}
