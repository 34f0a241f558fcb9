use crate::dedup::ExistingEvents;
use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use shared_types::EventRecord;
use std::sync::Mutex;

/// Destination for finished event records
#[async_trait]
pub trait Publisher: ExistingEvents {
    async fn publish(&self, record: &EventRecord) -> Result<()>;
}

/// Keeps published records in memory; used for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryPublisher {
    existing: Vec<(NaiveDate, String)>,
    published: Mutex<Vec<EventRecord>>,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretend these events were already on the calendar
    pub fn with_existing(mut self, date: NaiveDate, title: impl Into<String>) -> Self {
        self.existing.push((date, title.into()));
        self
    }

    pub fn published(&self) -> Vec<EventRecord> {
        match self.published.lock() {
            Ok(records) => records.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl ExistingEvents for MemoryPublisher {
    async fn existing_titles(&self, date: NaiveDate) -> Result<Vec<String>> {
        let mut titles: Vec<String> = self
            .existing
            .iter()
            .filter(|(d, _)| *d == date)
            .map(|(_, t)| t.clone())
            .collect();
        titles.extend(
            self.published()
                .into_iter()
                .filter(|r| r.date == date)
                .map(|r| r.title),
        );
        Ok(titles)
    }
}

#[async_trait]
impl Publisher for MemoryPublisher {
    async fn publish(&self, record: &EventRecord) -> Result<()> {
        let mut records = self
            .published
            .lock()
            .map_err(|_| anyhow::anyhow!("memory publisher lock poisoned"))?;
        records.push(record.clone());
        Ok(())
    }
}
