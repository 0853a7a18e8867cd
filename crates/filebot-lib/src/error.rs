//! Error types for the transformation pipeline

use crate::data_structures::{FileKind, UserId};
use thiserror::Error;

/// Message shown whenever the access gate refuses an action.
pub const UPSELL_MESSAGE: &str = "Trial ended. Subscribe to continue. Send /plans to see the options.";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FileBotError {
    /// Not subscribed and no trial uses left
    #[error("access denied: subscription required")]
    AccessDenied,

    /// Event does not fit the current session state
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// Transformation left nothing to write
    #[error("input contains no usable lines")]
    EmptyInput,

    #[error("too many files: only {expected} were declared")]
    TooManyFiles { expected: usize },

    #[error("file count must be a positive number, got {0}")]
    InvalidCount(i64),

    #[error("split size must be at least 1, got {0}")]
    InvalidSplitPolicy(usize),

    #[error("expected a {expected} file, got a {actual} file")]
    WrongFileType { expected: FileKind, actual: FileKind },

    /// Entitlement store could not be read or written
    #[error("entitlement store '{path}' failed: {reason}")]
    Persistence { path: String, reason: String },

    #[error("user {0} is not subscribed")]
    NotSubscribed(UserId),

    /// Subscription length runs past the representable calendar
    #[error("{0} days is out of range")]
    InvalidDays(u32),

    /// Report could not be delivered; never shown to end users
    #[error("report sink failed: {0}")]
    ReportSink(String),
}

impl FileBotError {
    pub fn persistence(path: impl Into<String>, err: &anyhow::Error) -> Self {
        FileBotError::Persistence {
            path: path.into(),
            reason: format!("{:#}", err),
        }
    }

    /// Text the transport can show the user. Internal failures are not spelled out.
    pub fn user_message(&self) -> String {
        match self {
            FileBotError::AccessDenied => UPSELL_MESSAGE.to_string(),
            FileBotError::InvalidTransition(prompt) => prompt.clone(),
            FileBotError::EmptyInput => {
                "The file has no usable lines after cleanup, nothing to send back.".to_string()
            }
            FileBotError::TooManyFiles { expected } => {
                format!("Too many files: you declared {}. Send Back to start over.", expected)
            }
            FileBotError::InvalidCount(_) => {
                "Please send how many files you want to merge (a number of at least 1).".to_string()
            }
            FileBotError::InvalidSplitPolicy(_) => {
                "Split size must be at least 1.".to_string()
            }
            FileBotError::WrongFileType { expected, .. } => {
                format!("Please send a {} file for this option.", expected)
            }
            FileBotError::NotSubscribed(user) => format!("User {} is not subscribed.", user),
            FileBotError::InvalidDays(days) => format!("{} days is too long for a subscription.", days),
            FileBotError::Persistence { .. } | FileBotError::ReportSink(_) => {
                "Something went wrong on our side, please try again later.".to_string()
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, FileBotError>;
