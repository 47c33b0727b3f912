use crate::store::Collection;
use crate::types::{TagKey, UserKey};

/// Problems with a tag's settings. Fatal to that tag's recalculation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("tag has no time periods")]
    EmptyPeriods,

    #[error("time period {index}: duration of {months} months outside 1..=999")]
    DurationOutOfRange { index: usize, months: u32 },

    #[error("time period {index}: multiplier {multiplier} outside 0.05..=5.0")]
    MultiplierOutOfRange { index: usize, multiplier: f64 },

    #[error("time period {index}: multiplier {multiplier} exceeds earlier band's {previous}")]
    IncreasingMultiplier { index: usize, multiplier: f64, previous: f64 },

    #[error("{field} must be a finite non-negative number, got {value}")]
    InvalidSetting { field: &'static str, value: f64 },

    #[error("malformed tag document: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("version conflict on {collection}/{key}: expected {expected}, found {found}")]
    VersionConflict {
        collection: Collection,
        key: String,
        expected: u64,
        found: u64,
    },

    #[error("failed to encode {key}: {reason}")]
    Encode { key: String, reason: String },

    #[error("store backend error: {0}")]
    Backend(String),
}

/// A stored document that does not decode into its collection's record type.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RecordError {
    #[error("digest mismatch on {0}")]
    DigestMismatch(String),

    #[error("malformed payload for {key}: {reason}")]
    Malformed { key: String, reason: String },

    #[error("payload belongs under {expected}, stored under {found}")]
    KeyMismatch { expected: String, found: String },

    #[error("invalid {key}: {reason}")]
    Invalid { key: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("malformed {kind} key {key:?}")]
pub struct KeyError {
    pub kind: &'static str,
    pub key: String,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("tag {tag} is misconfigured: {source}")]
    Configuration {
        tag: TagKey,
        #[source]
        source: ConfigError,
    },

    #[error("invalid tag settings: {0}")]
    InvalidSettings(#[from] ConfigError),

    #[error("tag {0} not found")]
    TagNotFound(TagKey),

    #[error("user {0} not found")]
    UserNotFound(UserKey),

    #[error("invalid handle: {0}")]
    InvalidHandle(String),

    #[error("handle {0:?} is already taken")]
    HandleTaken(String),

    #[error("user {user} may not edit tag {tag}")]
    NotTagCreator { user: UserKey, tag: TagKey },

    #[error("reputation of {user} in {tag} still conflicting after {attempts} attempts")]
    VersionConflict {
        user: UserKey,
        tag: TagKey,
        attempts: u32,
    },

    #[error("invalid vote: {0}")]
    InvalidVote(String),

    /// The vote change itself is saved; these cached reputations could not
    /// be marked stale and may serve old values until they expire.
    #[error("vote saved, but {} reputation(s) in tag {tag} could not be marked stale", users.len())]
    InvalidationIncomplete { tag: TagKey, users: Vec<UserKey> },

    #[error(transparent)]
    Record(#[from] RecordError),

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EngineError {
    /// Transient failures the caller may simply retry later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EngineError::VersionConflict { .. }
                | EngineError::InvalidationIncomplete { .. }
                | EngineError::Store(StoreError::VersionConflict { .. })
        )
    }
}
