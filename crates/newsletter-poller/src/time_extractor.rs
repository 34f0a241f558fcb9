//! Recovering event times from free-form bilingual text and invitation content.
//!
//! Time expressions are matched against an ordered list of patterns; the
//! first pattern yielding a valid clock time wins:
//!
//! 1. numeric range, `19:00-21:00` / `19 : 00 - 21 : 00`
//! 2. worded range, `מ19:00 עד 21:00`
//! 3. a single `20:30`
//!
//! Hours never start inside a longer digit run, so `123:45` is not 23:45.
//! A candidate with an out-of-range hour or minute is skipped and matching
//! continues with the next occurrence, then the next pattern.

use crate::config::ExtractionConfig;
use crate::error::{ConfigError, PipelineError};
use crate::ocr::OcrEngine;
use chrono::NaiveTime;
use regex::{Captures, Regex};
use scraper::{Html, Selector};
use shared_types::{ContentType, LinkResolution, TimeInfo};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Range,
    Single,
}

#[derive(Debug, Clone)]
struct TimePattern {
    name: &'static str,
    regex: Regex,
    shape: Shape,
}

impl TimePattern {
    fn first_valid(&self, text: &str, default_duration_minutes: u32) -> Option<TimeInfo> {
        self.regex
            .captures_iter(text)
            .find_map(|caps| self.interpret(&caps, default_duration_minutes))
    }

    fn interpret(&self, caps: &Captures<'_>, default_duration_minutes: u32) -> Option<TimeInfo> {
        let start = clock(&caps[1], &caps[2])?;
        match self.shape {
            Shape::Range => {
                let end = clock(&caps[3], &caps[4])?;
                Some(TimeInfo::range(start, end))
            }
            Shape::Single => Some(TimeInfo::single(start, default_duration_minutes)),
        }
    }
}

fn clock(hour: &str, minute: &str) -> Option<NaiveTime> {
    let hour: u32 = hour.parse().ok()?;
    let minute: u32 = minute.parse().ok()?;
    if hour > 23 || minute > 59 {
        return None;
    }
    NaiveTime::from_hms_opt(hour, minute, 0)
}

#[derive(Debug, Clone)]
pub struct TimeParser {
    patterns: Vec<TimePattern>,
    default_duration_minutes: u32,
}

impl TimeParser {
    pub fn new(config: &ExtractionConfig, default_duration_minutes: u32) -> Result<Self, ConfigError> {
        let mut patterns = vec![TimePattern {
            name: "numeric_range",
            regex: Regex::new(
                r"(?:^|[^0-9])([0-9]{1,2})\s*:\s*([0-9]{2})\s*[-–—]\s*([0-9]{1,2})\s*:\s*([0-9]{2})",
            )?,
            shape: Shape::Range,
        }];

        if !config.range_from_particle.is_empty() && !config.range_to_particle.is_empty() {
            let worded = format!(
                r"{}-?\s*([0-9]{{1,2}}):([0-9]{{2}})\s*{}\s*-?\s*([0-9]{{1,2}}):([0-9]{{2}})",
                regex::escape(&config.range_from_particle),
                regex::escape(&config.range_to_particle),
            );
            patterns.push(TimePattern {
                name: "worded_range",
                regex: Regex::new(&worded)?,
                shape: Shape::Range,
            });
        }

        patterns.push(TimePattern {
            name: "single",
            regex: Regex::new(r"(?:^|[^0-9])([0-9]{1,2})\s*:\s*([0-9]{2})")?,
            shape: Shape::Single,
        });

        Ok(Self {
            patterns,
            default_duration_minutes,
        })
    }

    pub fn parse(&self, text: &str) -> Option<TimeInfo> {
        self.patterns.iter().find_map(|pattern| {
            let found = pattern.first_valid(text, self.default_duration_minutes);
            if found.is_some() {
                tracing::debug!("Time matched by {} pattern", pattern.name);
            }
            found
        })
    }
}

/// Reads a time out of resolved invitation content
pub struct TimeExtractor {
    ocr: Arc<dyn OcrEngine>,
    parser: TimeParser,
}

impl TimeExtractor {
    pub fn new(ocr: Arc<dyn OcrEngine>, parser: TimeParser) -> Self {
        Self { ocr, parser }
    }

    /// One OCR call for images, direct text scanning for HTML and PDF.
    pub async fn extract(&self, resolution: &LinkResolution) -> Result<TimeInfo, PipelineError> {
        let text = match resolution.content_type {
            ContentType::Image => self.ocr.recognize(&resolution.payload).await?,
            ContentType::Html => html_text(&String::from_utf8_lossy(&resolution.payload)),
            ContentType::Pdf => pdf_text(&resolution.final_url, resolution.payload.clone()).await?,
            ContentType::Unknown => {
                return Err(PipelineError::UnsupportedContent(ContentType::Unknown))
            }
        };

        self.parser.parse(&text).ok_or(PipelineError::TimeParse)
    }

    pub async fn extract_from_image(&self, image: &[u8]) -> Result<TimeInfo, PipelineError> {
        let text = self.ocr.recognize(image).await?;
        self.parser.parse(&text).ok_or(PipelineError::TimeParse)
    }
}

/// Visible text of an HTML page, whitespace-collapsed
pub fn html_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let body = Selector::parse("body")
        .ok()
        .and_then(|sel| document.select(&sel).next());

    let words: Vec<&str> = match body {
        Some(body) => body.text().flat_map(str::split_whitespace).collect(),
        None => document
            .root_element()
            .text()
            .flat_map(str::split_whitespace)
            .collect(),
    };
    words.join(" ")
}

async fn pdf_text(source: &str, bytes: Vec<u8>) -> Result<String, PipelineError> {
    let extracted = tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&bytes))
        .await
        .map_err(|e| PipelineError::link(source, e))?;
    extracted.map_err(|e| PipelineError::link(source, format!("unreadable PDF: {}", e)))
}
