//! Per-block field extraction.
//!
//! Every field is derived by pattern matching against the configured keyword
//! lists. Only the date is mandatory; the other fields fall back to empty
//! values or the generic title.

use crate::config::{CategoryKeyword, ExtractionConfig, Settings};
use crate::error::{ConfigError, PipelineError};
use crate::time_extractor::TimeParser;
use chrono::{Datelike, NaiveDate, NaiveTime};
use regex::{Regex, RegexBuilder};
use shared_types::{EventCategory, EventRecord};

/// Dates further in the past than this roll over to next year
pub const PAST_DATE_TOLERANCE_DAYS: i64 = 30;

/// Resolve a day/month pair against `today`.
///
/// The current year is assumed unless that date lies more than
/// [`PAST_DATE_TOLERANCE_DAYS`] days before `today`, in which case the
/// event belongs to next year. A day the current year lacks (29/2) is
/// tried in the next year. Returns `None` for impossible dates.
pub fn resolve_event_date(day: u32, month: u32, today: NaiveDate) -> Option<NaiveDate> {
    match NaiveDate::from_ymd_opt(today.year(), month, day) {
        Some(this_year)
            if today.signed_duration_since(this_year).num_days() <= PAST_DATE_TOLERANCE_DAYS =>
        {
            Some(this_year)
        }
        _ => NaiveDate::from_ymd_opt(today.year() + 1, month, day),
    }
}

#[derive(Debug, Clone)]
struct TitlePattern {
    name: &'static str,
    regex: Regex,
    group: usize,
}

impl TitlePattern {
    fn new(name: &'static str, pattern: &str, group: usize) -> Result<Self, ConfigError> {
        Ok(Self {
            name,
            regex: Regex::new(pattern)?,
            group,
        })
    }

    fn capture(&self, block: &str) -> Option<String> {
        let caps = self.regex.captures(block)?;
        let title = caps.get(self.group)?.as_str().trim();
        (!title.is_empty()).then(|| title.to_string())
    }
}

pub struct FieldExtractor {
    date: Regex,
    titles: Vec<TitlePattern>,
    generic_title: String,
    time_suffix: String,
    virtual_keywords: Option<Regex>,
    virtual_label: String,
    legislature_keywords: Vec<String>,
    capital_label: String,
    cities: Vec<String>,
    organizers: Vec<String>,
    categories: Vec<CategoryKeyword>,
    block_time: TimeParser,
    default_start: NaiveTime,
    default_duration_minutes: u32,
    timezone: String,
}

impl FieldExtractor {
    pub fn new(config: &ExtractionConfig, settings: &Settings) -> Result<Self, ConfigError> {
        let date = Regex::new(&format!(
            r"{}([0-9]{{1,2}})/([0-9]{{1,2}})",
            regex::escape(&config.date_lead_in)
        ))?;

        let virtual_keywords = alternation(&config.virtual_keywords)
            .map(|pattern| RegexBuilder::new(&pattern).case_insensitive(true).build())
            .transpose()?;

        Ok(Self {
            date,
            titles: title_patterns(config)?,
            generic_title: config.generic_title.clone(),
            time_suffix: config.time_in_invitation_suffix.clone(),
            virtual_keywords,
            virtual_label: config.virtual_label.clone(),
            legislature_keywords: non_empty(&config.legislature_keywords),
            capital_label: config.capital_label.clone(),
            cities: non_empty(&config.cities),
            organizers: non_empty(&config.organizers),
            categories: config
                .category_keywords
                .iter()
                .filter(|c| !c.keyword.is_empty())
                .cloned()
                .collect(),
            block_time: TimeParser::new(config, settings.default_duration_minutes)?,
            default_start: settings.default_start,
            default_duration_minutes: settings.default_duration_minutes,
            timezone: settings.timezone_name().to_string(),
        })
    }

    /// Build a record from one block. A block without a resolvable date is
    /// rejected; nothing else can fail.
    pub fn extract(&self, block: &str, today: NaiveDate) -> Result<EventRecord, PipelineError> {
        let date = self.date(block, today).ok_or(PipelineError::NoDateFound)?;
        let is_virtual = self.is_virtual(block);

        let mut title = self.title(block);
        let (start_time, duration_minutes) = match self.block_time.parse(block) {
            Some(time) => (time.start_time, time.duration_minutes),
            None => {
                title.push_str(&self.time_suffix);
                (self.default_start, self.default_duration_minutes)
            }
        };

        Ok(EventRecord {
            title,
            date,
            start_time,
            duration_minutes,
            location: self.location(block, is_virtual),
            organizer: self.organizer(block),
            event_category: self.category(block),
            is_virtual,
            time_verified: false,
            raw_text: block.to_string(),
            invitation_url: None,
            timezone: self.timezone.clone(),
        })
    }

    /// First day/month pair after the lead-in that makes a real date
    pub fn date(&self, block: &str, today: NaiveDate) -> Option<NaiveDate> {
        self.date.captures_iter(block).find_map(|caps| {
            let day = caps[1].parse().ok()?;
            let month = caps[2].parse().ok()?;
            resolve_event_date(day, month, today)
        })
    }

    pub fn title(&self, block: &str) -> String {
        self.titles
            .iter()
            .find_map(|pattern| {
                let title = pattern.capture(block)?;
                tracing::debug!("Title matched by {} pattern", pattern.name);
                Some(title)
            })
            .unwrap_or_else(|| self.generic_title.clone())
    }

    pub fn location(&self, block: &str, is_virtual: bool) -> String {
        if is_virtual {
            return self.virtual_label.clone();
        }
        if self.legislature_keywords.iter().any(|k| block.contains(k.as_str())) {
            return self.capital_label.clone();
        }
        self.cities
            .iter()
            .find(|city| block.contains(city.as_str()))
            .cloned()
            .unwrap_or_default()
    }

    pub fn organizer(&self, block: &str) -> String {
        self.organizers
            .iter()
            .find(|org| block.contains(org.as_str()))
            .cloned()
            .unwrap_or_default()
    }

    pub fn category(&self, block: &str) -> EventCategory {
        self.categories
            .iter()
            .find(|c| block.contains(c.keyword.as_str()))
            .map(|c| c.category)
            .unwrap_or_default()
    }

    pub fn is_virtual(&self, block: &str) -> bool {
        self.virtual_keywords
            .as_ref()
            .is_some_and(|re| re.is_match(block))
    }
}

/// Title patterns in priority order, first capture wins
fn title_patterns(config: &ExtractionConfig) -> Result<Vec<TitlePattern>, ConfigError> {
    let mut patterns = Vec::new();

    if !config.subject_lead_in.is_empty() {
        let subject = regex::escape(&config.subject_lead_in);
        patterns.push(TitlePattern::new(
            "subject_double_quoted",
            &format!(r#"{}\s*["“]([^"“”]+)["”]"#, subject),
            1,
        )?);
        patterns.push(TitlePattern::new(
            "subject_single_quoted",
            &format!(r"{}\s*'([^']+)'", subject),
            1,
        )?);
        patterns.push(TitlePattern::new(
            "subject_sentence",
            &format!(r"{}\s+([^.]+)\.", subject),
            1,
        )?);
    }

    patterns.push(TitlePattern::new("quoted", r#"["“]([^"“”]+)["”]"#, 1)?);

    let keywords: Vec<String> = config
        .category_keywords
        .iter()
        .map(|c| c.keyword.clone())
        .collect();
    if let Some(keywords) = alternation(&keywords) {
        patterns.push(TitlePattern::new(
            "category_phrase",
            &format!(r"(?:{})\s+([^.]+)", keywords),
            1,
        )?);
    }

    Ok(patterns)
}

fn alternation(keywords: &[String]) -> Option<String> {
    let escaped: Vec<String> = keywords
        .iter()
        .filter(|k| !k.is_empty())
        .map(|k| regex::escape(k))
        .collect();
    (!escaped.is_empty()).then(|| escaped.join("|"))
}

fn non_empty(items: &[String]) -> Vec<String> {
    items.iter().filter(|s| !s.is_empty()).cloned().collect()
}
