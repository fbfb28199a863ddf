//! Error types for the vipharvest crawler
//!
//! This module defines the domain error types used by the driver, crawler
//! and storage layers.

use thiserror::Error;

/// Errors raised by a headless browser session
#[derive(Error, Debug, Clone)]
pub enum DriverError {
    /// Browser process could not be started with the given profile
    #[error("Browser launch failed ({profile}): {reason}")]
    Launch { profile: String, reason: String },

    /// Both the full and the minimal launch profiles failed
    #[error("No browser available: {0}")]
    Init(String),

    /// Page load failed
    #[error("Navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    /// A bounded wait elapsed
    #[error("Timed out after {after_ms}ms waiting for {what}")]
    Timeout { what: String, after_ms: u64 },

    /// Script evaluation failed
    #[error("Script evaluation failed: {0}")]
    Script(String),

    /// Connection to the browser was lost or returned garbage
    #[error("Browser transport error: {0}")]
    Transport(String),

    /// Session already closed
    #[error("Session is closed")]
    Closed,

    /// Blocking worker was cancelled or panicked
    #[error("Browser worker failed: {0}")]
    Worker(String),
}

impl DriverError {
    /// Create a timeout error
    pub fn timeout(what: impl Into<String>, after_ms: u64) -> Self {
        Self::Timeout {
            what: what.into(),
            after_ms,
        }
    }

    /// Check whether this error is a bounded-wait timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Check if this error is worth another attempt on the same session
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Navigation { .. } | Self::Transport(_) | Self::Script(_)
        )
    }
}

/// Errors that can occur while reading the aggregator site
#[derive(Error, Debug)]
pub enum CrawlerError {
    /// Listing page never showed a candidate after every attempt
    #[error("No candidates found for game {game_id} after {attempts} attempts: {last_error}")]
    NoCandidates {
        game_id: String,
        attempts: u32,
        last_error: String,
    },

    /// Invalid game identifier or URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Underlying driver error
    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),
}

/// Errors raised by the link store
#[derive(Error, Debug)]
pub enum StorageError {
    /// Reading or writing the document failed
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Document could not be (de)serialized
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Document shape was not recognised
    #[error("Migration failed: {0}")]
    Migration(String),

    /// Referenced link does not exist in the user's bucket
    #[error("Link not found for user {user_id} in game {game_id}")]
    UnknownLink { user_id: String, game_id: String },
}
