//! One processing run over a batch of newsletter messages.
//!
//! Per message: normalize, segment, extract fields, then recover invitation
//! times concurrently (bounded, under the run deadline), merge, and finally
//! check duplicates and publish one record at a time.

use crate::config::{Config, Settings};
use crate::dedup::DuplicateGuard;
use crate::error::PipelineError;
use crate::extractor::FieldExtractor;
use crate::links::InvitationLinkFinder;
use crate::merger::merge;
use crate::normalizer::Normalizer;
use crate::ocr::OcrEngine;
use crate::publisher::Publisher;
use crate::resolver::LinkResolver;
use crate::segmenter::Segmenter;
use crate::time_extractor::{TimeExtractor, TimeParser};
use anyhow::Result;
use chrono::{NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use shared_types::{EmailMessage, EventRecord, FailureKind, PublishOutcome, RunSummary, TimeInfo};
use std::sync::Arc;
use tokio::time::{timeout_at, Instant};

pub struct Pipeline<P> {
    settings: Settings,
    normalizer: Normalizer,
    segmenter: Segmenter,
    fields: FieldExtractor,
    links: InvitationLinkFinder,
    resolver: LinkResolver,
    times: TimeExtractor,
    publisher: P,
}

impl<P: Publisher> Pipeline<P> {
    pub fn new(
        config: &Config,
        settings: Settings,
        ocr: Arc<dyn OcrEngine>,
        publisher: P,
    ) -> Result<Self> {
        let extraction = &config.extraction;

        Ok(Self {
            normalizer: Normalizer::new(extraction)?,
            segmenter: Segmenter::new(extraction)?,
            fields: FieldExtractor::new(extraction, &settings)?,
            links: InvitationLinkFinder::new(extraction)?,
            resolver: LinkResolver::new(
                &settings.user_agent,
                settings.resolve_timeout,
                settings.image_timeout,
            )?,
            times: TimeExtractor::new(
                ocr,
                TimeParser::new(extraction, settings.default_duration_minutes)?,
            ),
            settings,
            publisher,
        })
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    /// Case-insensitive substring match on the From header; an empty
    /// allow-list accepts everyone.
    pub fn is_allowed_sender(&self, from: &str) -> bool {
        if self.settings.sender_allow_list.is_empty() {
            return true;
        }
        let from = from.to_lowercase();
        self.settings
            .sender_allow_list
            .iter()
            .any(|allowed| from.contains(&allowed.to_lowercase()))
    }

    /// Run against the current date in the configured timezone
    pub async fn run(&self, messages: Vec<EmailMessage>) -> RunSummary {
        let today = Utc::now().with_timezone(&self.settings.timezone).date_naive();
        self.run_at(messages, today).await
    }

    pub async fn run_at(&self, messages: Vec<EmailMessage>, today: NaiveDate) -> RunSummary {
        let started = std::time::Instant::now();
        let deadline = Instant::now() + self.settings.run_budget;
        let mut summary = RunSummary::default();
        let mut guard = DuplicateGuard::new();

        let batch: Vec<EmailMessage> = messages
            .into_iter()
            .filter(|m| {
                let allowed = self.is_allowed_sender(&m.from);
                if !allowed {
                    tracing::debug!("Ignoring message {} from {}", m.id, m.from);
                }
                allowed
            })
            .take(self.settings.max_messages_per_run)
            .collect();

        tracing::info!("Processing {} newsletter messages", batch.len());

        for message in &batch {
            tracing::info!("Processing message {}: {}", message.id, message.subject);
            summary.messages_processed += 1;

            let records = self.extract_events(message, today, &mut summary);
            let records = self.recover_times(records, deadline, &mut summary).await;

            for record in records {
                let outcome = self.commit(&record, &mut guard, &mut summary).await;
                summary.record_outcome(outcome);
            }
        }

        summary.elapsed_secs = started.elapsed().as_secs_f64();
        tracing::info!(
            "Run finished: {} created, {} skipped, {} failed in {:.1}s",
            summary.events_created,
            summary.events_skipped,
            summary.events_failed,
            summary.elapsed_secs
        );
        summary
    }

    /// Offline part of the pipeline: records with their invitation links
    /// attached, times not yet recovered.
    pub fn extract_events(
        &self,
        message: &EmailMessage,
        today: NaiveDate,
        summary: &mut RunSummary,
    ) -> Vec<EventRecord> {
        let text = self.normalizer.normalize(&message.body_text);
        let links = self.links.for_message(&text, message.body_html.as_deref());
        let mut records = Vec::new();

        for (start, block) in self.segmenter.segment_indices(&text) {
            summary.blocks_found += 1;
            let link = links.link_for(start, block);

            match self.fields.extract(block, today) {
                Ok(mut record) => {
                    tracing::debug!("Extracted '{}' on {}", record.title, record.date);
                    record.invitation_url = link;
                    records.push(record);
                }
                Err(e) => {
                    tracing::warn!("Rejected block: {}", e);
                    summary.record_failure(e.kind());
                }
            }
        }

        tracing::info!(
            "Message {}: {} events extracted",
            message.id,
            records.len()
        );
        records
    }

    /// Resolve invitation links in parallel. Results come back in the
    /// original order; every failure leaves that record on its defaults.
    pub async fn recover_times(
        &self,
        records: Vec<EventRecord>,
        deadline: Instant,
        summary: &mut RunSummary,
    ) -> Vec<EventRecord> {
        let jobs = records.into_iter().enumerate().map(|(index, record)| async move {
            let outcome = match record.invitation_url.as_deref() {
                Some(url) => Some(
                    timeout_at(deadline, self.recover_time(url))
                        .await
                        .unwrap_or(Err(PipelineError::BudgetExhausted)),
                ),
                None => None,
            };
            (index, record, outcome)
        });

        let mut finished: Vec<(usize, EventRecord, Option<Result<TimeInfo, PipelineError>>)> =
            stream::iter(jobs)
                .buffer_unordered(self.settings.link_concurrency)
                .collect()
                .await;
        finished.sort_by_key(|(index, _, _)| *index);

        finished
            .into_iter()
            .map(|(_, record, outcome)| match outcome {
                Some(Ok(time)) => {
                    tracing::info!(
                        "Recovered time {} ({} min) for '{}'",
                        time.start_time.format("%H:%M"),
                        time.duration_minutes,
                        record.title
                    );
                    merge(record, Some(&time))
                }
                Some(Err(e)) => {
                    tracing::warn!("Keeping default time for '{}': {}", record.title, e);
                    summary.record_failure(e.kind());
                    merge(record, None)
                }
                None => merge(record, None),
            })
            .collect()
    }

    async fn recover_time(&self, url: &str) -> Result<TimeInfo, PipelineError> {
        let resolution = self.resolver.resolve(url).await?;
        self.times.extract(&resolution).await
    }

    async fn commit(
        &self,
        record: &EventRecord,
        guard: &mut DuplicateGuard,
        summary: &mut RunSummary,
    ) -> PublishOutcome {
        if let Err(e) = guard.ensure_day(record.date, &self.publisher).await {
            tracing::warn!(
                "Duplicate check unavailable for {}, assuming no existing events: {:#}",
                record.date,
                e
            );
            summary.record_failure(FailureKind::DuplicateCheckFailed);
        }

        if guard.is_duplicate(&record.title, record.date) {
            tracing::info!("Skipping duplicate '{}' on {}", record.title, record.date);
            return PublishOutcome::Skipped;
        }

        match self.publisher.publish(record).await {
            Ok(()) => {
                guard.commit(&record.title, record.date);
                tracing::info!("Published '{}' on {}", record.title, record.date);
                PublishOutcome::Created
            }
            Err(e) => {
                let err = PipelineError::Publish(e);
                tracing::warn!("'{}': {}", record.title, err);
                PublishOutcome::Failed
            }
        }
    }
}
