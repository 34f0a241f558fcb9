use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Raw newsletter email as handed over by a message source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailMessage {
    pub id: String,
    pub subject: String,
    pub from: String,
    pub received_at: Option<DateTime<Utc>>,
    pub body_text: String,
    pub body_html: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Discussion,
    Lecture,
    Meeting,
    #[default]
    Unspecified,
}

impl EventCategory {
    pub fn as_str(&self) -> &str {
        match self {
            EventCategory::Discussion => "discussion",
            EventCategory::Lecture => "lecture",
            EventCategory::Meeting => "meeting",
            EventCategory::Unspecified => "unspecified",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "discussion" => Some(EventCategory::Discussion),
            "lecture" => Some(EventCategory::Lecture),
            "meeting" => Some(EventCategory::Meeting),
            "unspecified" => Some(EventCategory::Unspecified),
            _ => None,
        }
    }
}

/// One event extracted from a newsletter block.
///
/// `start_time` and `duration_minutes` hold configured defaults unless a time
/// was found in the block or recovered from the invitation; `time_verified`
/// is only set for the latter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub title: String,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub duration_minutes: u32,
    pub location: String,
    pub organizer: String,
    pub event_category: EventCategory,
    pub is_virtual: bool,
    pub time_verified: bool,
    pub raw_text: String,
    pub invitation_url: Option<String>,
    /// IANA zone name the publisher applies to start/end
    pub timezone: String,
}

impl EventRecord {
    pub fn starts_at(&self) -> NaiveDateTime {
        self.date.and_time(self.start_time)
    }

    pub fn ends_at(&self) -> NaiveDateTime {
        self.starts_at() + Duration::minutes(i64::from(self.duration_minutes))
    }
}

/// How a time was recovered from invitation material
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeSource {
    Range,
    Single,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeInfo {
    pub start_time: NaiveTime,
    pub end_time: Option<NaiveTime>,
    pub duration_minutes: u32,
    pub source: TimeSource,
}

impl TimeInfo {
    /// Build a range; an end at or before the start wraps past midnight.
    pub fn range(start: NaiveTime, end: NaiveTime) -> Self {
        let mut minutes = end.signed_duration_since(start).num_minutes();
        if minutes <= 0 {
            minutes += 24 * 60;
        }

        TimeInfo {
            start_time: start,
            end_time: Some(end),
            duration_minutes: minutes as u32,
            source: TimeSource::Range,
        }
    }

    pub fn single(start: NaiveTime, default_duration_minutes: u32) -> Self {
        TimeInfo {
            start_time: start,
            end_time: None,
            duration_minutes: default_duration_minutes,
            source: TimeSource::Single,
        }
    }

    pub fn is_found(&self) -> bool {
        self.source != TimeSource::None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Image,
    Html,
    Pdf,
    Unknown,
}

impl ContentType {
    pub fn as_str(&self) -> &str {
        match self {
            ContentType::Image => "image",
            ContentType::Html => "html",
            ContentType::Pdf => "pdf",
            ContentType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of following an invitation link. Lives for one run only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkResolution {
    pub final_url: String,
    pub content_type: ContentType,
    pub payload: Vec<u8>,
}

/// Kinds of absorbed failures tallied in the run summary
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    BlockRejected,
    LinkResolutionFailed,
    OcrFailed,
    TimeParseFailed,
    BudgetExceeded,
    DuplicateCheckFailed,
    DuplicateSkipped,
    PublishFailed,
}

impl FailureKind {
    pub fn as_str(&self) -> &str {
        match self {
            FailureKind::BlockRejected => "block_rejected",
            FailureKind::LinkResolutionFailed => "link_resolution_failed",
            FailureKind::OcrFailed => "ocr_failed",
            FailureKind::TimeParseFailed => "time_parse_failed",
            FailureKind::BudgetExceeded => "budget_exceeded",
            FailureKind::DuplicateCheckFailed => "duplicate_check_failed",
            FailureKind::DuplicateSkipped => "duplicate_skipped",
            FailureKind::PublishFailed => "publish_failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishOutcome {
    Created,
    Skipped,
    Failed,
}

/// Per-run report, always produced even when every event failed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub messages_processed: usize,
    pub blocks_found: usize,
    pub events_created: usize,
    pub events_skipped: usize,
    pub events_failed: usize,
    pub failures: BTreeMap<FailureKind, usize>,
    pub elapsed_secs: f64,
}

impl RunSummary {
    pub fn record_failure(&mut self, kind: FailureKind) {
        *self.failures.entry(kind).or_default() += 1;
    }

    pub fn failure_count(&self, kind: FailureKind) -> usize {
        self.failures.get(&kind).copied().unwrap_or(0)
    }

    pub fn record_outcome(&mut self, outcome: PublishOutcome) {
        match outcome {
            PublishOutcome::Created => self.events_created += 1,
            PublishOutcome::Skipped => {
                self.events_skipped += 1;
                self.record_failure(FailureKind::DuplicateSkipped);
            }
            PublishOutcome::Failed => {
                self.events_failed += 1;
                self.record_failure(FailureKind::PublishFailed);
            }
        }
    }
}
