// Core session data structures and types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;
use uuid::Uuid;

use super::SlotId;

/// Token identifying one rendering surface of a slot
///
/// Unlike the slot id, an embed identity does not survive promotion,
/// removal of a sibling or addition of a new slot. A changed identity
/// means the player widget bound to the old one must be torn down and a
/// fresh one created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmbedIdentity(Uuid);

impl EmbedIdentity {
    /// Generate a fresh identity
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for EmbedIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "embed-{}", self.0)
    }
}

/// One occupied position in the viewing session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub id: SlotId,
    pub channel: String,
    pub is_primary: bool,
    pub has_audio: bool,
    pub embed_identity: EmbedIdentity,
}

impl Slot {
    /// Create a slot for an already-normalized channel name
    pub(crate) fn new(channel: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            channel,
            is_primary: false,
            has_audio: false,
            embed_identity: EmbedIdentity::generate(),
        }
    }

    /// Whether the player bound to this slot should be muted
    pub fn is_muted(&self) -> bool {
        !self.has_audio
    }
}

/// Normalize a channel name: trimmed and lower-cased
pub fn normalize_channel(channel: &str) -> String {
    channel.trim().to_lowercase()
}

/// Immutable snapshot of the session's slots, in session order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlotList(Vec<Slot>);

impl SlotList {
    pub fn new(slots: Vec<Slot>) -> Self {
        Self(slots)
    }

    /// The primary slot, if the list is non-empty
    pub fn primary(&self) -> Option<&Slot> {
        self.0.iter().find(|s| s.is_primary)
    }

    /// Index of the primary slot in session order
    pub fn primary_index(&self) -> Option<usize> {
        self.0.iter().position(|s| s.is_primary)
    }

    /// The slot whose audio is unmuted
    pub fn audio_source(&self) -> Option<&Slot> {
        self.0.iter().find(|s| s.has_audio)
    }

    pub fn find(&self, slot_id: SlotId) -> Option<&Slot> {
        self.0.iter().find(|s| s.id == slot_id)
    }

    pub fn find_by_channel(&self, channel: &str) -> Option<&Slot> {
        let channel = normalize_channel(channel);
        self.0.iter().find(|s| s.channel == channel)
    }

    /// Channel names in session order
    pub fn channels(&self) -> Vec<String> {
        self.0.iter().map(|s| s.channel.clone()).collect()
    }

    pub fn into_vec(self) -> Vec<Slot> {
        self.0
    }
}

impl Deref for SlotList {
    type Target = [Slot];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<'a> IntoIterator for &'a SlotList {
    type Item = &'a Slot;
    type IntoIter = std::slice::Iter<'a, Slot>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Entitlement level selecting the session's slot ceiling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapacityTier {
    Free,
    Premium,
}

impl CapacityTier {
    /// Default slot ceiling for this tier
    pub fn default_limit(&self) -> usize {
        match self {
            CapacityTier::Free => 3,
            CapacityTier::Premium => 9,
        }
    }
}

impl fmt::Display for CapacityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapacityTier::Free => write!(f, "free"),
            CapacityTier::Premium => write!(f, "premium"),
        }
    }
}

/// Playback quality levels, ordered from cheapest to unconstrained
///
/// `Auto` hands the choice back to the player and sits at the top of the
/// ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityLevel {
    Low,
    Medium,
    High,
    Auto,
}

impl QualityLevel {
    /// One step cheaper, saturating at `Low`
    pub fn step_down(self) -> Self {
        match self {
            QualityLevel::Auto => QualityLevel::High,
            QualityLevel::High => QualityLevel::Medium,
            QualityLevel::Medium | QualityLevel::Low => QualityLevel::Low,
        }
    }

    /// One step richer, saturating at `Auto`
    pub fn step_up(self) -> Self {
        match self {
            QualityLevel::Low => QualityLevel::Medium,
            QualityLevel::Medium => QualityLevel::High,
            QualityLevel::High | QualityLevel::Auto => QualityLevel::Auto,
        }
    }

    /// Quality name understood by the embedded player
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityLevel::Low => "low",
            QualityLevel::Medium => "medium",
            QualityLevel::High => "high",
            QualityLevel::Auto => "auto",
        }
    }
}

impl fmt::Display for QualityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client performance observation fed to the quality controller
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSample {
    /// Fraction of frames dropped since the previous sample (0.0-1.0)
    pub dropped_frame_rate: f32,
    /// Average frame time, if the source measures it
    pub frame_time_ms: Option<f32>,
    /// Client memory use, if the source measures it
    pub memory_mb: Option<u64>,
}

impl PerformanceSample {
    pub fn new(dropped_frame_rate: f32) -> Self {
        Self {
            dropped_frame_rate,
            frame_time_ms: None,
            memory_mb: None,
        }
    }

    pub fn with_frame_time_ms(mut self, frame_time_ms: f32) -> Self {
        self.frame_time_ms = Some(frame_time_ms);
        self
    }

    pub fn with_memory_mb(mut self, memory_mb: u64) -> Self {
        self.memory_mb = Some(memory_mb);
        self
    }
}

/// Current quality level plus the pressure last observed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityState {
    pub level: QualityLevel,
    pub slot_count: usize,
    pub last_sample: Option<PerformanceSample>,
}

impl Default for QualityState {
    fn default() -> Self {
        Self {
            level: QualityLevel::Auto,
            slot_count: 0,
            last_sample: None,
        }
    }
}

/// Optional credential attached to authenticated viewers' embeds
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackCredential {
    pub token: String,
}

impl fmt::Debug for PlaybackCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaybackCredential")
            .field("token", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_channel() {
        assert_eq!(normalize_channel("  Alice "), "alice");
        assert_eq!(normalize_channel("BOB"), "bob");
        assert_eq!(normalize_channel("   "), "");
    }

    #[test]
    fn test_quality_ladder_saturates() {
        assert_eq!(QualityLevel::Low.step_down(), QualityLevel::Low);
        assert_eq!(QualityLevel::Auto.step_up(), QualityLevel::Auto);
        assert_eq!(QualityLevel::Auto.step_down(), QualityLevel::High);
        assert_eq!(QualityLevel::Low.step_up(), QualityLevel::Medium);
        assert!(QualityLevel::Low < QualityLevel::Medium);
        assert!(QualityLevel::High < QualityLevel::Auto);
    }

    #[test]
    fn test_capacity_tier_limits() {
        assert_eq!(CapacityTier::Free.default_limit(), 3);
        assert_eq!(CapacityTier::Premium.default_limit(), 9);
    }

    #[test]
    fn test_credential_debug_is_redacted() {
        let credential = PlaybackCredential { token: "secret-token".to_string() };
        let rendered = format!("{:?}", credential);
        assert!(!rendered.contains("secret-token"));
    }
}
