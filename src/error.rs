//! Crate-level error type
//!
//! Each layer keeps its own error enum ([`DriverError`], [`CrawlerError`],
//! [`StorageError`], [`HarvestError`], [`BatchError`]). [`Error`] wraps them at
//! the crate boundary, and [`DomainError`] tells callers whether to retry
//! later and what to show a user.
//!
//! ```rust,ignore
//! use vipharvest::error::{DomainError, Error, ErrorCategory};
//!
//! fn report(err: &Error) -> String {
//!     match err.category() {
//!         ErrorCategory::Request => err.user_message(),
//!         other => format!("{}: {}", other.describe(), err.user_message()),
//!     }
//! }
//! ```

use std::io;
use thiserror::Error;

pub use crate::harvest::{HarvestError, HarvestFailure};
pub use crate::scheduler::BatchError;
pub use crate::utils::error::{CrawlerError, DriverError, StorageError};

/// Retry and presentation hints shared by every error type
pub trait DomainError: std::error::Error {
    /// Whether trying again later may succeed
    fn is_recoverable(&self) -> bool;

    /// Short description suitable for end users
    fn user_message(&self) -> String;

    fn category(&self) -> ErrorCategory;
}

/// Broad origin of an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Browser launch and session errors
    Browser,
    /// Aggregator site navigation and extraction errors
    Scraping,
    /// Link store I/O and document errors
    Storage,
    /// Invalid configuration
    Config,
    /// Invalid requests from callers
    Request,
    Other,
}

impl ErrorCategory {
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Browser => "browser error",
            Self::Scraping => "scraping error",
            Self::Storage => "storage error",
            Self::Config => "configuration error",
            Self::Request => "invalid request",
            Self::Other => "other error",
        }
    }
}

impl DomainError for DriverError {
    fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Closed)
    }

    fn user_message(&self) -> String {
        match self {
            Self::Launch { .. } | Self::Init(_) => "No browser could be started".to_string(),
            Self::Timeout { .. } => "The site took too long to respond".to_string(),
            _ => "The browser session failed".to_string(),
        }
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Browser
    }
}

impl DomainError for CrawlerError {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::NoCandidates { .. } => true,
            Self::InvalidUrl(_) => false,
            Self::Driver(e) => e.is_recoverable(),
        }
    }

    fn user_message(&self) -> String {
        match self {
            Self::NoCandidates { game_id, .. } => format!("No servers listed for game {game_id}"),
            Self::InvalidUrl(_) => "Invalid game identifier".to_string(),
            Self::Driver(e) => e.user_message(),
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidUrl(_) => ErrorCategory::Request,
            Self::Driver(_) => ErrorCategory::Browser,
            Self::NoCandidates { .. } => ErrorCategory::Scraping,
        }
    }
}

impl DomainError for StorageError {
    fn is_recoverable(&self) -> bool {
        matches!(self, Self::Io { .. })
    }

    fn user_message(&self) -> String {
        match self {
            Self::UnknownLink { .. } => "That link is not in your collection".to_string(),
            _ => "The link store could not be accessed".to_string(),
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::UnknownLink { .. } => ErrorCategory::Request,
            _ => ErrorCategory::Storage,
        }
    }
}

impl DomainError for HarvestError {
    fn is_recoverable(&self) -> bool {
        match &self.reason {
            HarvestFailure::DriverInit(e) => e.is_recoverable(),
            HarvestFailure::NoCandidates(e) | HarvestFailure::Aborted(e) => e.is_recoverable(),
        }
    }

    fn user_message(&self) -> String {
        match &self.reason {
            HarvestFailure::DriverInit(e) => e.user_message(),
            HarvestFailure::NoCandidates(e) | HarvestFailure::Aborted(e) => e.user_message(),
        }
    }

    fn category(&self) -> ErrorCategory {
        match &self.reason {
            HarvestFailure::DriverInit(_) => ErrorCategory::Browser,
            HarvestFailure::NoCandidates(e) | HarvestFailure::Aborted(e) => e.category(),
        }
    }
}

impl DomainError for BatchError {
    fn is_recoverable(&self) -> bool {
        false
    }

    fn user_message(&self) -> String {
        self.to_string()
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Request
    }
}

/// Unified error type for the vipharvest crate
#[derive(Error, Debug)]
pub enum Error {
    /// Browser session errors
    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    /// Site navigation errors
    #[error("Crawler error: {0}")]
    Crawler(#[from] CrawlerError),

    /// Link store errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Aborted harvest pass
    #[error("{0}")]
    Harvest(#[from] HarvestError),

    /// Rejected batch request
    #[error("Batch error: {0}")]
    Batch(#[from] BatchError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(String),

    /// Caller asked too soon
    #[error("On cooldown for another {remaining_secs}s")]
    Cooldown { remaining_secs: u64 },

    /// Anything else, with a description
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl DomainError for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Driver(e) => e.is_recoverable(),
            Self::Crawler(e) => e.is_recoverable(),
            Self::Storage(e) => e.is_recoverable(),
            Self::Harvest(e) => e.is_recoverable(),
            Self::Batch(e) => e.is_recoverable(),
            Self::Io(_) => true,
            Self::Json(_) => false,
            Self::Config(_) => false,
            Self::Cooldown { .. } => true,
            Self::Other { .. } => false,
        }
    }

    fn user_message(&self) -> String {
        match self {
            Self::Driver(e) => e.user_message(),
            Self::Crawler(e) => e.user_message(),
            Self::Storage(e) => e.user_message(),
            Self::Harvest(e) => e.user_message(),
            Self::Batch(e) => e.user_message(),
            Self::Cooldown { remaining_secs } => {
                format!("Please wait {}m {}s", remaining_secs / 60, remaining_secs % 60)
            }
            Self::Io(_) | Self::Json(_) | Self::Config(_) | Self::Other { .. } => {
                format!("{}: {self}", self.category().describe())
            }
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Driver(e) => e.category(),
            Self::Crawler(e) => e.category(),
            Self::Storage(e) => e.category(),
            Self::Harvest(e) => e.category(),
            Self::Batch(e) => e.category(),
            Self::Io(_) | Self::Json(_) => ErrorCategory::Storage,
            Self::Config(_) => ErrorCategory::Config,
            Self::Cooldown { .. } => ErrorCategory::Request,
            Self::Other { .. } => ErrorCategory::Other,
        }
    }
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other {
            context: err.to_string(),
            source: None,
        }
    }
}

/// Result with the crate [`Error`]
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harvest::PartialHarvest;

    #[test]
    fn test_error_category() {
        let err = Error::Driver(DriverError::Init("both failed".into()));
        assert_eq!(err.category(), ErrorCategory::Browser);

        let err = Error::Storage(StorageError::Migration("bad".into()));
        assert_eq!(err.category(), ErrorCategory::Storage);

        let err = Error::Crawler(CrawlerError::InvalidUrl("x".into()));
        assert_eq!(err.category(), ErrorCategory::Request);
    }

    #[test]
    fn test_is_recoverable() {
        let err = Error::Crawler(CrawlerError::NoCandidates {
            game_id: "1".into(),
            attempts: 3,
            last_error: "timeout".into(),
        });
        assert!(err.is_recoverable());

        let err = Error::Batch(BatchError::ZeroTarget);
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_harvest_error_delegates() {
        let err: Error = HarvestError {
            game_id: "1".into(),
            user_id: "U1".into(),
            reason: HarvestFailure::DriverInit(DriverError::Init("none".into())),
            partial: PartialHarvest::default(),
        }
        .into();
        assert_eq!(err.category(), ErrorCategory::Browser);
        assert_eq!(err.user_message(), "No browser could be started");
    }

    #[test]
    fn test_cooldown_message() {
        let err = Error::Cooldown { remaining_secs: 125 };
        assert_eq!(err.user_message(), "Please wait 2m 5s");
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_config_error() {
        let err = Error::config("bad value");
        assert_eq!(err.category(), ErrorCategory::Config);
        assert!(!err.is_recoverable());
        assert!(err.user_message().starts_with("configuration error"));
    }

    #[test]
    fn test_other_error() {
        let err = Error::other("unexpected page layout");
        assert_eq!(err.category(), ErrorCategory::Other);
    }
}
