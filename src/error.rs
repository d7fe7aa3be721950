//! Defines the custom error types for the email-scout application.

use std::io;
use thiserror::Error;
use url::ParseError as UrlParseError;

/// The primary error type for the email discovery pipeline.
#[derive(Error, Debug)]
pub(crate) enum AppError {
    /// Error occurring during configuration loading or validation.
    #[error("Configuration Error: {0}")]
    Config(String),

    /// Error related to file input/output operations.
    #[error("IO Error: {0}")]
    Io(#[from] io::Error),

    /// Error during JSON serialization or deserialization.
    #[error("JSON Error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error reading or writing CSV records.
    #[error("CSV Error: {0}")]
    Csv(#[from] csv::Error),

    /// Error parsing a URL.
    #[error("URL Parsing Error: {0}")]
    UrlParse(#[from] UrlParseError),

    /// Error making HTTP requests via reqwest.
    #[error("HTTP Request Error: {0}")]
    Request(#[from] reqwest::Error),

    /// The search landing page did not contain a vqd token.
    #[error("Search token not found in landing page")]
    TokenNotFound,

    /// Every search attempt failed; carries the last HTTP status seen, if any.
    #[error("Search failed after retries (last status: {})", fmt_status(.last_status))]
    SearchExhausted { last_status: Option<u16> },

    /// A page could not be fetched or read.
    #[error("Fetch Error: {0}")]
    Fetch(String),

    /// The text-completion oracle failed or returned an unusable answer.
    #[error("Oracle Error: {0}")]
    Oracle(String),

    /// Error related to concurrency or task execution.
    #[error("Task Execution Error: {0}")]
    Task(String),

    /// An underlying error that doesn't fit other categories, using anyhow.
    #[error("Generic Error: {0}")]
    Generic(#[from] anyhow::Error),
}

fn fmt_status(status: &Option<u16>) -> String {
    status.map_or_else(|| "none".to_string(), |s| s.to_string())
}

pub(crate) type Result<T> = std::result::Result<T, AppError>;
