// Multi-stream viewing session
//
// This module owns the ordered set of channel slots a viewer watches at once,
// the grid those slots are rendered into, the lifecycle of the player widget
// bound to each slot, and reactive quality adaptation across all of them.

pub mod error;
pub mod types;
pub mod layout;
pub mod engine;
pub mod embed;
pub mod quality;
pub mod config;
pub mod entitlement;
pub mod api;
pub mod testing;

pub use error::{SessionError, SessionResult};
pub use types::*;
pub use layout::{
    layout, place, area_for, assign_areas, AreaSpan, GridArea, GridPlacement, SlotPlacement,
    TrackSize, MAX_GRID_SLOTS,
};
pub use engine::{HydrationReport, SessionState};
pub use embed::{
    CredentialProvider, EmbedEvent, EmbedFactory, EmbedHandle, EmbedLifecycleManager,
    EmbedStatus, EmbedTarget, LifecycleEvent, LifecycleOptions, ReconcileReport,
};
pub use quality::{
    EvaluationTrigger, PerformanceSource, QualityChange, QualityChangeReason, QualityController,
    QualityMonitor, QualityObserver, QualityPolicy, SlotCeiling,
};
pub use config::SessionConfig;
pub use entitlement::{Clock, EntitlementCache, EntitlementSource, SystemClock};
pub use api::{HydratedSession, SessionDeps, SessionEvent, SessionHandle};

use async_trait::async_trait;
use uuid::Uuid;

/// Stable identifier of a slot for its whole lifetime in a session
pub type SlotId = Uuid;

/// Saved, named channel collections a session can be hydrated from
#[async_trait]
pub trait PackSource: Send + Sync {
    /// Fetch the channel list of a pack, in display order
    async fn fetch_channels(&self, pack_id: &str) -> SessionResult<Vec<String>>;
}
