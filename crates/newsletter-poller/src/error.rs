//! Error types for configuration loading and the extraction pipeline.
//!
//! Only `ConfigError` aborts a run. Every `PipelineError` is absorbed where it
//! happens and tallied in the run summary under its `FailureKind`.

use shared_types::{ContentType, FailureKind};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Unknown timezone: {0}")]
    Timezone(String),

    #[error("Invalid default start time '{0}', expected HH:MM")]
    StartTime(String),

    #[error("Invalid value '{value}' for {var}")]
    Env { var: String, value: String },

    #[error("Invalid keyword pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Configuration error: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Block carries no usable day/month date
    #[error("No date found in block")]
    NoDateFound,

    #[error("Failed to resolve {url}: {reason}")]
    LinkResolution { url: String, reason: String },

    #[error("Unsupported content type: {0}")]
    UnsupportedContent(ContentType),

    #[error("OCR failed: {0}")]
    Ocr(String),

    #[error("No time expression found")]
    TimeParse,

    #[error("Run time budget exhausted")]
    BudgetExhausted,

    #[error("Publish failed: {0:#}")]
    Publish(anyhow::Error),
}

impl PipelineError {
    pub fn link(url: impl Into<String>, reason: impl fmt::Display) -> Self {
        PipelineError::LinkResolution {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            PipelineError::NoDateFound => FailureKind::BlockRejected,
            PipelineError::LinkResolution { .. } | PipelineError::UnsupportedContent(_) => {
                FailureKind::LinkResolutionFailed
            }
            PipelineError::Ocr(_) => FailureKind::OcrFailed,
            PipelineError::TimeParse => FailureKind::TimeParseFailed,
            PipelineError::BudgetExhausted => FailureKind::BudgetExceeded,
            PipelineError::Publish(_) => FailureKind::PublishFailed,
        }
    }
}
