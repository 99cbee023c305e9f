// Session error types and result aliases

use thiserror::Error;

use super::SlotId;

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Error kinds surfaced by the session engine and its collaborators
///
/// Every variant is recoverable: a rejected session operation leaves the
/// slot list exactly as it was before the call.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Channel is already present in the session (case-insensitive)
    #[error("Channel already in session: {0}")]
    DuplicateChannel(String),

    /// Session is at its capacity tier ceiling
    #[error("Capacity exceeded: session is limited to {capacity} streams")]
    CapacityExceeded { capacity: usize },

    /// Slot id does not refer to a slot in the session
    #[error("Slot not found: {0}")]
    SlotNotFound(SlotId),

    /// Channel name is empty after normalization
    #[error("Invalid channel name: {0:?}")]
    InvalidChannel(String),

    /// External player widget failed to initialize
    #[error("Embed creation failed for {channel}: {reason}")]
    EmbedCreationFailed { channel: String, reason: String },

    /// Player widget never signalled ready
    #[error("Embed timed out waiting for ready: {0}")]
    EmbedTimeout(String),

    /// Live player widget rejected a command
    #[error("Adapter error: {0}")]
    Adapter(String),

    /// Playback credential could not be acquired
    #[error("Credential error: {0}")]
    Credential(String),

    /// Saved collection could not be fetched
    #[error("Pack error: {0}")]
    Pack(String),

    /// Entitlement lookup failed
    #[error("Entitlement error: {0}")]
    Entitlement(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Session was closed; no further slot operations are accepted
    #[error("Session is closed")]
    Closed,

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// Create a duplicate channel error
    pub fn duplicate_channel(channel: impl Into<String>) -> Self {
        Self::DuplicateChannel(channel.into())
    }

    /// Create a capacity exceeded error
    pub fn capacity_exceeded(capacity: usize) -> Self {
        Self::CapacityExceeded { capacity }
    }

    /// Create a slot not found error
    pub fn slot_not_found(slot_id: SlotId) -> Self {
        Self::SlotNotFound(slot_id)
    }

    /// Create an invalid channel error
    pub fn invalid_channel(channel: impl Into<String>) -> Self {
        Self::InvalidChannel(channel.into())
    }

    /// Create an embed creation error
    pub fn embed_creation_failed(channel: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::EmbedCreationFailed {
            channel: channel.into(),
            reason: reason.into(),
        }
    }

    /// Create an embed timeout error
    pub fn embed_timeout(channel: impl Into<String>) -> Self {
        Self::EmbedTimeout(channel.into())
    }

    /// Create an adapter error
    pub fn adapter(msg: impl Into<String>) -> Self {
        Self::Adapter(msg.into())
    }

    /// Create a credential error
    pub fn credential(msg: impl Into<String>) -> Self {
        Self::Credential(msg.into())
    }

    /// Create a pack error
    pub fn pack(msg: impl Into<String>) -> Self {
        Self::Pack(msg.into())
    }

    /// Create an entitlement error
    pub fn entitlement(msg: impl Into<String>) -> Self {
        Self::Entitlement(msg.into())
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a closed session error
    pub fn closed() -> Self {
        Self::Closed
    }

    /// Whether the caller should surface this as a user-facing notice
    /// rather than silently ignoring it.
    ///
    /// A stale slot id usually means the UI already re-rendered, so it is
    /// treated as a no-op from the caller's perspective.
    pub fn is_user_facing(&self) -> bool {
        !matches!(self, Self::SlotNotFound(_))
    }
}
