// Embedded player capabilities
//
// The session engine never implements a player. It drives externally-owned
// widgets through these traits and leaves their internals to the host.

pub mod lifecycle;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use super::{EmbedIdentity, PlaybackCredential, QualityLevel, SessionResult, Slot, SlotId};

pub use lifecycle::{
    EmbedLifecycleManager, EmbedStatus, LifecycleEvent, LifecycleOptions, ReconcileReport,
};

/// Events emitted by a live player widget
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmbedEvent {
    Ready,
    Play,
    Pause,
    Buffering,
    Error(String),
}

/// Everything a factory needs to bind a widget to one slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbedTarget {
    pub slot_id: SlotId,
    pub embed_identity: EmbedIdentity,
    pub channel: String,
    pub muted: bool,
    pub quality: QualityLevel,
}

impl EmbedTarget {
    pub fn for_slot(slot: &Slot, quality: QualityLevel) -> Self {
        Self {
            slot_id: slot.id,
            embed_identity: slot.embed_identity,
            channel: slot.channel.clone(),
            muted: slot.is_muted(),
            quality,
        }
    }

    /// DOM-style element id the widget is mounted into
    pub fn element_id(&self) -> String {
        format!("player-{}", self.embed_identity.as_uuid().simple())
    }
}

/// One live player widget
#[async_trait]
pub trait EmbedHandle: Send + Sync {
    /// Channel the widget is playing
    fn channel(&self) -> &str;

    /// Whether the widget has signalled ready
    fn is_ready(&self) -> bool;

    /// Subscribe to the widget's event feed
    fn subscribe(&self) -> broadcast::Receiver<EmbedEvent>;

    /// Mute or unmute playback
    async fn set_muted(&self, muted: bool) -> SessionResult<()>;

    /// Change playback quality
    async fn set_quality(&self, quality: QualityLevel) -> SessionResult<()>;

    /// Tear the widget down
    async fn destroy(&self) -> SessionResult<()>;
}

/// Creates player widgets bound to a rendering target
#[async_trait]
pub trait EmbedFactory: Send + Sync {
    /// Create a widget for `target`
    ///
    /// The returned handle may not be ready yet; the lifecycle manager waits
    /// for its ready signal.
    async fn create(
        &self,
        target: &EmbedTarget,
        credential: Option<PlaybackCredential>,
    ) -> SessionResult<Arc<dyn EmbedHandle>>;
}

/// Supplies the optional playback credential for authenticated viewers
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn playback_credential(&self) -> SessionResult<Option<PlaybackCredential>>;
}

/// Wait until `handle` reports ready, or fails
pub(crate) async fn wait_until_ready(handle: &dyn EmbedHandle) -> SessionResult<()> {
    // subscribe before checking so a ready signal in between is not lost
    let mut events = handle.subscribe();
    if handle.is_ready() {
        return Ok(());
    }

    loop {
        match events.recv().await {
            Ok(EmbedEvent::Ready) => return Ok(()),
            Ok(EmbedEvent::Error(reason)) => {
                return Err(super::SessionError::embed_creation_failed(handle.channel(), reason));
            }
            Ok(_) => continue,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                log::debug!("Embed event feed for {} lagged by {}", handle.channel(), skipped);
                if handle.is_ready() {
                    return Ok(());
                }
            }
            Err(broadcast::error::RecvError::Closed) => {
                return Err(super::SessionError::embed_creation_failed(
                    handle.channel(),
                    "event feed closed before ready",
                ));
            }
        }
    }
}
