pub mod calendar_client;
pub mod config;
pub mod dedup;
pub mod error;
pub mod extractor;
pub mod inbox;
pub mod links;
pub mod merger;
pub mod normalizer;
pub mod ocr;
pub mod pipeline;
pub mod publisher;
pub mod resolver;
pub mod segmenter;
pub mod time_extractor;
