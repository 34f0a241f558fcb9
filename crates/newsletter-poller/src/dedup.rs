//! In-run duplicate detection.
//!
//! The guard holds the titles known per calendar day: those already
//! published (loaded once per day from the publisher) plus everything
//! committed earlier in the same run.

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;

/// Leading characters compared by the prefix rule
pub const TITLE_PREFIX_CHARS: usize = 20;

/// Titles of events already published on a local calendar day
#[async_trait]
pub trait ExistingEvents: Send + Sync {
    async fn existing_titles(&self, date: NaiveDate) -> Result<Vec<String>>;
}

/// Case-insensitive: identical titles, or either title's leading
/// [`TITLE_PREFIX_CHARS`] characters occurring inside the other.
/// Blank titles never match.
pub fn titles_overlap(a: &str, b: &str) -> bool {
    let a = a.trim().to_lowercase();
    let b = b.trim().to_lowercase();
    if a.is_empty() || b.is_empty() {
        return false;
    }

    a == b || b.contains(prefix(&a)) || a.contains(prefix(&b))
}

fn prefix(title: &str) -> &str {
    match title.char_indices().nth(TITLE_PREFIX_CHARS) {
        Some((end, _)) => &title[..end],
        None => title,
    }
}

#[derive(Debug, Default)]
pub struct DuplicateGuard {
    days: HashMap<NaiveDate, Vec<String>>,
}

impl DuplicateGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed<I>(&mut self, date: NaiveDate, titles: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.days.entry(date).or_default().extend(titles);
    }

    pub fn is_loaded(&self, date: NaiveDate) -> bool {
        self.days.contains_key(&date)
    }

    /// Load a day's published titles the first time it is needed. When the
    /// lookup fails the day is treated as empty and the error returned for
    /// the caller to record.
    pub async fn ensure_day<E>(&mut self, date: NaiveDate, source: &E) -> Result<()>
    where
        E: ExistingEvents + ?Sized,
    {
        if self.is_loaded(date) {
            return Ok(());
        }

        match source.existing_titles(date).await {
            Ok(titles) => {
                tracing::debug!("Loaded {} existing events for {}", titles.len(), date);
                self.seed(date, titles);
                Ok(())
            }
            Err(e) => {
                self.seed(date, Vec::new());
                Err(e)
            }
        }
    }

    pub fn is_duplicate(&self, title: &str, date: NaiveDate) -> bool {
        self.days
            .get(&date)
            .is_some_and(|titles| titles.iter().any(|known| titles_overlap(title, known)))
    }

    pub fn commit(&mut self, title: &str, date: NaiveDate) {
        self.seed(date, [title.to_string()]);
    }
}
