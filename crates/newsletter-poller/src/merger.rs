use shared_types::{EventRecord, TimeInfo};

/// Fold a recovered time into an extracted record.
///
/// Total: without a found time the record comes back unchanged, keeping
/// whatever start/duration the field extractor settled on.
pub fn merge(mut record: EventRecord, time: Option<&TimeInfo>) -> EventRecord {
    match time {
        Some(time) if time.is_found() => {
            record.start_time = time.start_time;
            record.duration_minutes = time.duration_minutes;
            record.time_verified = true;
        }
        _ => record.time_verified = false,
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};
    use shared_types::{EventCategory, TimeSource};

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn record() -> EventRecord {
        EventRecord {
            title: "כותרת (זמן מדויק של האירוע בזימון)".to_string(),
            date: NaiveDate::from_ymd_opt(2025, 7, 7).unwrap(),
            start_time: hm(19, 0),
            duration_minutes: 120,
            location: "ירושלים".to_string(),
            organizer: String::new(),
            event_category: EventCategory::Discussion,
            is_virtual: false,
            time_verified: false,
            raw_text: "ביום שני, ה7/7, דיון בנושא \"כותרת\"".to_string(),
            invitation_url: Some("https://example.org/i".to_string()),
            timezone: "Asia/Jerusalem".to_string(),
        }
    }

    #[test]
    fn test_range_overwrites_and_verifies() {
        let merged = merge(record(), Some(&TimeInfo::range(hm(18, 0), hm(20, 30))));
        assert_eq!(merged.start_time, hm(18, 0));
        assert_eq!(merged.duration_minutes, 150);
        assert!(merged.time_verified);
        // everything else untouched
        assert_eq!(merged.title, record().title);
        assert_eq!(merged.location, "ירושלים");
    }

    #[test]
    fn test_single_time_keeps_default_duration() {
        let merged = merge(record(), Some(&TimeInfo::single(hm(20, 30), 120)));
        assert_eq!(merged.start_time, hm(20, 30));
        assert_eq!(merged.duration_minutes, 120);
        assert!(merged.time_verified);
    }

    #[test]
    fn test_missing_time_keeps_defaults() {
        let merged = merge(record(), None);
        assert_eq!(merged, record());
        assert!(!merged.time_verified);
    }

    #[test]
    fn test_sourceless_time_is_ignored() {
        let none = TimeInfo {
            start_time: hm(6, 0),
            end_time: None,
            duration_minutes: 5,
            source: TimeSource::None,
        };
        let merged = merge(record(), Some(&none));
        assert_eq!(merged.start_time, hm(19, 0));
        assert!(!merged.time_verified);
    }
}
