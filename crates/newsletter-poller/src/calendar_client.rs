use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use google_calendar3::api::{Event, EventDateTime};
use google_calendar3::hyper_rustls::HttpsConnector;
use google_calendar3::CalendarHub;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use shared_types::EventRecord;
use std::path::Path;

use crate::config::CalendarConfig;
use crate::dedup::ExistingEvents;
use crate::publisher::Publisher;

pub const AUTO_GENERATED_FOOTER: &str = "נוצר אוטומטית מהניוזלטר הפמיניסטי השבועי";

/// Publishes events to one Google Calendar
pub struct CalendarPublisher {
    hub: CalendarHub<HttpsConnector<HttpConnector>>,
    calendar_id: String,
    timezone: Tz,
}

impl CalendarPublisher {
    pub async fn new(config: CalendarConfig, timezone: Tz) -> Result<Self> {
        let secret =
            google_calendar3::yup_oauth2::read_application_secret(&config.credentials_path)
                .await
                .context("Failed to read OAuth credentials")?;

        let auth = google_calendar3::yup_oauth2::InstalledFlowAuthenticator::builder(
            secret,
            google_calendar3::yup_oauth2::InstalledFlowReturnMethod::HTTPRedirect,
        )
        .persist_tokens_to_disk(Path::new(&config.token_cache_path))
        .build()
        .await
        .context("Failed to build authenticator")?;

        let connector = google_calendar3::hyper_rustls::HttpsConnectorBuilder::new()
            .with_native_roots()
            .context("Failed to load native TLS roots")?
            .https_or_http()
            .enable_http1()
            .build();

        let client = Client::builder(TokioExecutor::new()).build(connector);
        let hub = CalendarHub::new(client, auth);

        Ok(Self {
            hub,
            calendar_id: config.calendar_id,
            timezone,
        })
    }

    fn zone_for(&self, record: &EventRecord) -> Tz {
        record.timezone.parse().unwrap_or(self.timezone)
    }
}

#[async_trait]
impl ExistingEvents for CalendarPublisher {
    async fn existing_titles(&self, date: NaiveDate) -> Result<Vec<String>> {
        let (start, end) = day_window(self.timezone, date)?;
        let mut titles = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut call = self
                .hub
                .events()
                .list(&self.calendar_id)
                .time_min(start)
                .time_max(end)
                .single_events(true);
            if let Some(token) = &page_token {
                call = call.page_token(token);
            }

            let (_, events) = call
                .doit()
                .await
                .with_context(|| format!("Failed to list calendar events for {}", date))?;

            titles.extend(
                events
                    .items
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|event| event.summary),
            );

            page_token = events.next_page_token;
            if page_token.is_none() {
                break;
            }
        }

        Ok(titles)
    }
}

#[async_trait]
impl Publisher for CalendarPublisher {
    async fn publish(&self, record: &EventRecord) -> Result<()> {
        let zone = self.zone_for(record);
        let start = local_to_utc(zone, record.starts_at())?;
        let end = local_to_utc(zone, record.ends_at())?;

        let google_event = Event {
            summary: Some(record.title.clone()),
            description: Some(event_description(record)),
            location: (!record.location.is_empty()).then(|| record.location.clone()),
            start: Some(EventDateTime {
                date_time: Some(start),
                time_zone: Some(zone.name().to_string()),
                ..Default::default()
            }),
            end: Some(EventDateTime {
                date_time: Some(end),
                time_zone: Some(zone.name().to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let (_, created) = self
            .hub
            .events()
            .insert(google_event, &self.calendar_id)
            .doit()
            .await
            .context("Failed to create calendar event")?;

        tracing::info!(
            "Created calendar event: {} (id: {:?})",
            record.title,
            created.id
        );
        Ok(())
    }
}

/// Local midnight to the next local midnight, in UTC
pub fn day_window(zone: Tz, date: NaiveDate) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let start = local_to_utc(zone, date.and_time(chrono::NaiveTime::MIN))?;
    let next = date
        .succ_opt()
        .with_context(|| format!("No day after {}", date))?;
    let end = local_to_utc(zone, next.and_time(chrono::NaiveTime::MIN))?;
    Ok((start, end))
}

/// Interpret a wall-clock time in `zone`. Times skipped by a DST jump move
/// forward by an hour; ambiguous times take the earlier instant.
pub fn local_to_utc(zone: Tz, local: NaiveDateTime) -> Result<DateTime<Utc>> {
    zone.from_local_datetime(&local)
        .earliest()
        .or_else(|| zone.from_local_datetime(&(local + Duration::hours(1))).earliest())
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("{} does not exist in {}", local, zone.name()))
}

pub fn event_description(record: &EventRecord) -> String {
    let mut description = record.raw_text.clone();

    if !record.organizer.is_empty() {
        description.push_str(&format!("\n\nמארגן: {}", record.organizer));
    }
    if let Some(url) = &record.invitation_url {
        description.push_str(&format!("\n\nהזמנה: {}", url));
    }

    description.push_str("\n\n---\n");
    description.push_str(AUTO_GENERATED_FOOTER);
    description
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;
    use shared_types::EventCategory;

    fn record() -> EventRecord {
        EventRecord {
            title: "כותרת".to_string(),
            date: NaiveDate::from_ymd_opt(2025, 7, 7).unwrap(),
            start_time: NaiveTime::from_hms_opt(19, 0, 0).unwrap(),
            duration_minutes: 120,
            location: String::new(),
            organizer: "הוועדה לקידום מעמד האישה".to_string(),
            event_category: EventCategory::Discussion,
            is_virtual: false,
            time_verified: false,
            raw_text: "ביום שני, ה7/7, דיון".to_string(),
            invitation_url: Some("https://example.org/i.png".to_string()),
            timezone: "Asia/Jerusalem".to_string(),
        }
    }

    #[test]
    fn test_description_layout() {
        assert_eq!(
            event_description(&record()),
            "ביום שני, ה7/7, דיון\n\nמארגן: הוועדה לקידום מעמד האישה\n\nהזמנה: https://example.org/i.png\n\n---\nנוצר אוטומטית מהניוזלטר הפמיניסטי השבועי"
        );

        let bare = EventRecord {
            organizer: String::new(),
            invitation_url: None,
            ..record()
        };
        assert_eq!(
            event_description(&bare),
            format!("ביום שני, ה7/7, דיון\n\n---\n{}", AUTO_GENERATED_FOOTER)
        );
    }

    #[test]
    fn test_day_window_uses_local_midnights() {
        let (start, end) =
            day_window(chrono_tz::Asia::Jerusalem, NaiveDate::from_ymd_opt(2025, 7, 7).unwrap())
                .unwrap();
        // IDT is UTC+3
        assert_eq!(start.to_rfc3339(), "2025-07-06T21:00:00+00:00");
        assert_eq!(end.to_rfc3339(), "2025-07-07T21:00:00+00:00");
    }

    #[test]
    fn test_local_time_conversion() {
        let local = record().starts_at();
        let utc = local_to_utc(chrono_tz::Asia::Jerusalem, local).unwrap();
        assert_eq!(utc.to_rfc3339(), "2025-07-07T16:00:00+00:00");

        // 2025-03-28 02:30 does not exist in Jerusalem (clocks jump to 03:00)
        let gap = NaiveDate::from_ymd_opt(2025, 3, 28)
            .unwrap()
            .and_hms_opt(2, 30, 0)
            .unwrap();
        let shifted = local_to_utc(chrono_tz::Asia::Jerusalem, gap).unwrap();
        assert_eq!(shifted.to_rfc3339(), "2025-03-28T00:30:00+00:00");
    }
}
