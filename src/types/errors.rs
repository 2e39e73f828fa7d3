use thiserror::Error;

/// Failure reading or writing the rule store, the ledger or the user directory
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("conflicting write: {0}")]
    Conflict(String),

    #[error("snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Chat transport refused or failed a ban/unban/delete/send call
#[derive(Debug, Error)]
pub enum EnforcementError {
    #[error("{operation} rejected by chat platform: {reason}")]
    Rejected { operation: &'static str, reason: String },

    #[error("chat transport failure: {0}")]
    Transport(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("permanent ban threshold ({permanent}) must exceed warning threshold ({warning})")]
    ThresholdOrder { warning: u32, permanent: u32 },

    #[error("temporary ban duration must be at least one hour")]
    ZeroDuration,

    #[error("temporary ban duration ({hours}h) exceeds the {max}h limit")]
    DurationTooLong { hours: u32, max: u32 },
}

/// Errors that abort a message evaluation
#[derive(Debug, Error)]
pub enum ModerationError {
    #[error("failed to record violation: {0}")]
    Ledger(#[source] StorageError),

    #[error("failed to resolve sender: {0}")]
    UserProvisioning(#[source] StorageError),

    #[error("unusable moderation settings: {0}")]
    InvalidSettings(#[source] SettingsError),

    #[error("storage failure: {0}")]
    Storage(#[source] StorageError),

    #[error("chat transport failure: {0}")]
    Transport(#[source] EnforcementError),
}
