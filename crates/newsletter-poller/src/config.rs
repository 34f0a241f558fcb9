use crate::error::ConfigError;
use chrono::NaiveTime;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use shared_types::EventCategory;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory where downloaded newsletter messages are stored
    pub inbox_dir: PathBuf,

    /// Substrings of the From header accepted as newsletter senders (empty = all)
    #[serde(default)]
    pub sender_allow_list: Vec<String>,

    /// Maximum messages handled per run
    #[serde(default = "default_max_messages")]
    pub max_messages_per_run: usize,

    /// Start time used when no time is known, "HH:MM"
    #[serde(default = "default_start_time")]
    pub default_start_time: String,

    #[serde(default = "default_duration")]
    pub default_duration_minutes: u32,

    /// IANA timezone stamped on published events
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Invitation links resolved in parallel
    #[serde(default = "default_link_concurrency")]
    pub link_concurrency: usize,

    /// Wall-clock budget for a whole run (seconds)
    #[serde(default = "default_run_budget")]
    pub run_budget_secs: u64,

    #[serde(default = "default_resolve_timeout")]
    pub resolve_timeout_secs: u64,

    #[serde(default = "default_image_timeout")]
    pub image_timeout_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Google Calendar publishing; required unless running with --dry-run
    #[serde(default)]
    pub calendar: Option<CalendarConfig>,

    #[serde(default)]
    pub ocr: Option<OcrConfig>,

    #[serde(default)]
    pub extraction: ExtractionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarConfig {
    /// Path to Google OAuth client credentials JSON file
    pub credentials_path: String,

    /// Path to store the OAuth token cache
    #[serde(default = "default_token_cache")]
    pub token_cache_path: String,

    /// Calendar that receives the events
    pub calendar_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrConfig {
    /// Cloud Vision `images:annotate` endpoint
    #[serde(default = "default_ocr_endpoint")]
    pub endpoint: String,

    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            endpoint: default_ocr_endpoint(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryKeyword {
    pub category: EventCategory,
    pub keyword: String,
}

/// Keyword and pattern lists driving text extraction.
///
/// Defaults match the Hebrew weekly newsletter format; other locales swap
/// these lists without touching code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Text at and after the earliest of these is dropped
    pub boilerplate_markers: Vec<String>,
    /// A run of at least this many `=` also ends the content
    pub separator_min_run: usize,
    /// Lead-in phrase that starts every event block
    pub block_anchor: String,
    pub min_block_chars: usize,
    /// Glyph directly before the day/month pair
    pub date_lead_in: String,
    /// "on the subject of" lead-in preceding the title
    pub subject_lead_in: String,
    pub generic_title: String,
    /// Appended to titles when the block names no time
    pub time_in_invitation_suffix: String,
    pub virtual_keywords: Vec<String>,
    pub virtual_label: String,
    pub legislature_keywords: Vec<String>,
    pub capital_label: String,
    pub cities: Vec<String>,
    pub organizers: Vec<String>,
    /// Anchor labels marking invitation links
    pub invitation_labels: Vec<String>,
    pub range_from_particle: String,
    pub range_to_particle: String,
    /// Checked in order; the first keyword found sets the category
    pub category_keywords: Vec<CategoryKeyword>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            boilerplate_markers: strings(&[
                "This email was sent to",
                "Want to change how you receive",
                "Facebook (https://",
                "Facebook (http://",
                "** Website (https://",
                "Website (https://",
                "** Email (mailto:",
                "Email (mailto:",
                "Copyright ©",
                "Our mailing address is:",
                "unsubscribe from this list",
            ]),
            separator_min_run: 10,
            block_anchor: "ביום".to_string(),
            min_block_chars: 15,
            date_lead_in: "ה".to_string(),
            subject_lead_in: "בנושא".to_string(),
            generic_title: "אירוע זכויות נשים".to_string(),
            time_in_invitation_suffix: " (זמן מדויק של האירוע בזימון)".to_string(),
            virtual_keywords: strings(&["וירטואלי", "זום", "zoom", "online"]),
            virtual_label: "וירטואלי".to_string(),
            legislature_keywords: strings(&["בכנסת", "הכנסת"]),
            capital_label: "ירושלים".to_string(),
            cities: strings(&["תל אביב", "ירושלים", "חיפה", "באר שבע"]),
            organizers: strings(&["הוועדה לקידום מעמד האישה"]),
            invitation_labels: strings(&["בהזמנה", "בלינק"]),
            range_from_particle: "מ".to_string(),
            range_to_particle: "עד".to_string(),
            category_keywords: vec![
                CategoryKeyword {
                    category: EventCategory::Discussion,
                    keyword: "דיון".to_string(),
                },
                CategoryKeyword {
                    category: EventCategory::Lecture,
                    keyword: "הרצאה".to_string(),
                },
                CategoryKeyword {
                    category: EventCategory::Meeting,
                    keyword: "מפגש".to_string(),
                },
            ],
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn default_max_messages() -> usize {
    10
}

fn default_start_time() -> String {
    "19:00".to_string()
}

fn default_duration() -> u32 {
    120
}

fn default_timezone() -> String {
    "Asia/Jerusalem".to_string()
}

fn default_link_concurrency() -> usize {
    4
}

fn default_run_budget() -> u64 {
    540 // 9 minutes
}

fn default_resolve_timeout() -> u64 {
    10
}

fn default_image_timeout() -> u64 {
    15
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36".to_string()
}

fn default_token_cache() -> String {
    "calendar_token_cache.json".to_string()
}

fn default_ocr_endpoint() -> String {
    "https://vision.googleapis.com/v1/images:annotate".to_string()
}

/// Validated run parameters derived from [`Config`]
#[derive(Debug, Clone)]
pub struct Settings {
    pub timezone: Tz,
    pub default_start: NaiveTime,
    pub default_duration_minutes: u32,
    pub max_messages_per_run: usize,
    pub sender_allow_list: Vec<String>,
    pub link_concurrency: usize,
    pub run_budget: Duration,
    pub resolve_timeout: Duration,
    pub image_timeout: Duration,
    pub user_agent: String,
}

impl Settings {
    pub fn timezone_name(&self) -> &str {
        self.timezone.name()
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Apply overrides from the process environment
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|var| std::env::var(var).ok())
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(tz) = lookup("TIMEZONE") {
            self.timezone = tz;
        }
        if let Some(senders) = lookup("NEWSLETTER_SENDERS") {
            self.sender_allow_list = senders
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(value) = lookup("DEFAULT_EVENT_DURATION") {
            self.default_duration_minutes = parse_env("DEFAULT_EVENT_DURATION", &value)?;
        }
        if let Some(value) = lookup("DEFAULT_START_TIME") {
            self.default_start_time = value;
        }
        if let Some(value) = lookup("MAX_EMAILS_TO_PROCESS") {
            self.max_messages_per_run = parse_env("MAX_EMAILS_TO_PROCESS", &value)?;
        }
        if let Some(key) = lookup("VISION_API_KEY") {
            self.ocr.get_or_insert_with(OcrConfig::default).api_key = Some(key);
        }
        if let Some(calendar_id) = lookup("CALENDAR_ID") {
            if let Some(calendar) = self.calendar.as_mut() {
                calendar.calendar_id = calendar_id;
            }
        }
        Ok(())
    }

    pub fn settings(&self) -> Result<Settings, ConfigError> {
        let timezone: Tz = self
            .timezone
            .parse()
            .map_err(|_| ConfigError::Timezone(self.timezone.clone()))?;

        let default_start = NaiveTime::parse_from_str(self.default_start_time.trim(), "%H:%M")
            .map_err(|_| ConfigError::StartTime(self.default_start_time.clone()))?;

        if self.default_duration_minutes == 0 {
            return Err(ConfigError::Invalid(
                "default_duration_minutes must be positive".to_string(),
            ));
        }
        if self.extraction.block_anchor.is_empty() {
            return Err(ConfigError::Invalid(
                "extraction.block_anchor must not be empty".to_string(),
            ));
        }

        Ok(Settings {
            timezone,
            default_start,
            default_duration_minutes: self.default_duration_minutes,
            max_messages_per_run: self.max_messages_per_run,
            sender_allow_list: self.sender_allow_list.clone(),
            link_concurrency: self.link_concurrency.max(1),
            run_budget: Duration::from_secs(self.run_budget_secs),
            resolve_timeout: Duration::from_secs(self.resolve_timeout_secs),
            image_timeout: Duration::from_secs(self.image_timeout_secs),
            user_agent: self.user_agent.clone(),
        })
    }

    pub fn example() -> Self {
        Config {
            inbox_dir: PathBuf::from("./emails/inbox"),
            sender_allow_list: vec!["newsletter@example.mailchimpapp.com".to_string()],
            max_messages_per_run: default_max_messages(),
            default_start_time: default_start_time(),
            default_duration_minutes: default_duration(),
            timezone: default_timezone(),
            link_concurrency: default_link_concurrency(),
            run_budget_secs: default_run_budget(),
            resolve_timeout_secs: default_resolve_timeout(),
            image_timeout_secs: default_image_timeout(),
            user_agent: default_user_agent(),
            calendar: Some(CalendarConfig {
                credentials_path: "client_secret.json".to_string(),
                token_cache_path: default_token_cache(),
                calendar_id: "your-calendar-id@group.calendar.google.com".to_string(),
            }),
            ocr: Some(OcrConfig::default()),
            extraction: ExtractionConfig::default(),
        }
    }
}

fn parse_env<T: std::str::FromStr>(var: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Env {
        var: var.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = Config::from_toml(r#"inbox_dir = "/tmp/inbox""#).unwrap();
        assert_eq!(config.max_messages_per_run, 10);
        assert_eq!(config.default_duration_minutes, 120);
        assert_eq!(config.extraction.block_anchor, "ביום");
        assert!(config.calendar.is_none());

        let settings = config.settings().unwrap();
        assert_eq!(settings.default_start, NaiveTime::from_hms_opt(19, 0, 0).unwrap());
        assert_eq!(settings.timezone_name(), "Asia/Jerusalem");
        assert_eq!(settings.run_budget, Duration::from_secs(540));
    }

    #[test]
    fn test_extraction_lists_can_be_replaced() {
        let config = Config::from_toml(
            r#"
            inbox_dir = "/tmp/inbox"

            [extraction]
            cities = ["Haifa"]
            organizers = ["Local Council", "Women's Forum"]
            "#,
        )
        .unwrap();

        assert_eq!(config.extraction.cities, vec!["Haifa".to_string()]);
        assert_eq!(config.extraction.organizers.len(), 2);
        // untouched fields keep their defaults
        assert_eq!(config.extraction.date_lead_in, "ה");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("TIMEZONE", "Europe/London"),
            ("NEWSLETTER_SENDERS", "a@example.com, b@example.com"),
            ("DEFAULT_EVENT_DURATION", "90"),
            ("VISION_API_KEY", "secret"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::from_toml(r#"inbox_dir = "/tmp/inbox""#).unwrap();
        config
            .apply_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.timezone, "Europe/London");
        assert_eq!(config.sender_allow_list.len(), 2);
        assert_eq!(config.default_duration_minutes, 90);
        assert_eq!(config.ocr.unwrap().api_key.as_deref(), Some("secret"));
    }

    #[test]
    fn test_bad_env_number_is_rejected() {
        let mut config = Config::from_toml(r#"inbox_dir = "/tmp/inbox""#).unwrap();
        let err = config
            .apply_overrides(|k| (k == "MAX_EMAILS_TO_PROCESS").then(|| "ten".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Env { .. }));
    }

    #[test]
    fn test_invalid_timezone_and_start_time() {
        let mut config = Config::example();
        config.timezone = "Mars/Olympus".to_string();
        assert!(matches!(config.settings(), Err(ConfigError::Timezone(_))));

        let mut config = Config::example();
        config.default_start_time = "7pm".to_string();
        assert!(matches!(config.settings(), Err(ConfigError::StartTime(_))));
    }

    #[test]
    fn test_example_survives_toml() {
        let rendered = toml::to_string(&Config::example()).unwrap();
        let parsed = Config::from_toml(&rendered).unwrap();
        assert_eq!(parsed.extraction, ExtractionConfig::default());
        assert!(parsed.settings().is_ok());
    }
}
