// Session API
//
// `SessionHandle` is the single entry point hosts use. It serializes the four
// slot operations, keeps the player widgets reconciled after each one, and
// feeds the quality monitor the current slot count.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{broadcast, watch, Mutex, RwLock};
use tokio::task::JoinHandle;

use super::config::SessionConfig;
use super::embed::{
    CredentialProvider, EmbedFactory, EmbedLifecycleManager, EmbedStatus, LifecycleEvent,
    LifecycleOptions,
};
use super::layout::{layout, place, GridPlacement, SlotPlacement};
use super::quality::{PerformanceSource, QualityChange, QualityMonitor, QualityObserver};
use super::{
    CapacityTier, EmbedIdentity, HydrationReport, PackSource, QualityState, SessionError, SessionResult,
    SessionState, SlotId, SlotList,
};

const SESSION_EVENT_CAPACITY: usize = 128;

/// Notifications for UI and analytics collaborators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SessionEvent {
    /// The slot list changed; carries the new snapshot
    SlotsChanged { slots: SlotList },
    /// A player widget signalled ready
    EmbedReady {
        slot_id: SlotId,
        embed_identity: EmbedIdentity,
    },
    /// A player widget could not be created or reported an error
    EmbedFailed {
        slot_id: SlotId,
        channel: String,
        reason: String,
    },
    /// Quality level moved for every stream
    QualityChanged(QualityChange),
    /// The session was closed
    Closed,
}

/// Capabilities a session is built on
#[derive(Clone)]
pub struct SessionDeps {
    pub embeds: Arc<dyn EmbedFactory>,
    pub credentials: Option<Arc<dyn CredentialProvider>>,
    pub performance: Option<Arc<dyn PerformanceSource>>,
}

impl SessionDeps {
    pub fn new(embeds: Arc<dyn EmbedFactory>) -> Self {
        Self {
            embeds,
            credentials: None,
            performance: None,
        }
    }

    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_performance(mut self, performance: Arc<dyn PerformanceSource>) -> Self {
        self.performance = Some(performance);
        self
    }
}

/// Session hydrated from a saved pack
///
/// A failed pack fetch still yields a usable, empty session.
pub struct HydratedSession {
    pub session: SessionHandle,
    pub outcome: SessionResult<HydrationReport>,
}

/// One viewer's multi-stream session
pub struct SessionHandle {
    state: Mutex<SessionState>,
    tier: RwLock<CapacityTier>,
    config: SessionConfig,
    embeds: Arc<EmbedLifecycleManager>,
    quality: Arc<QualityMonitor>,
    slot_count: watch::Sender<usize>,
    events: broadcast::Sender<SessionEvent>,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl SessionHandle {
    /// Create an empty session sized for `tier`
    ///
    /// Must be called from within a tokio runtime; the quality monitor and
    /// the embed event forwarder run as background tasks.
    pub async fn create(
        tier: CapacityTier,
        deps: SessionDeps,
        config: SessionConfig,
    ) -> SessionResult<Self> {
        config
            .validate()
            .map_err(|errors| SessionError::configuration(errors.join("; ")))?;

        let capacity = config.capacity.limit_for(tier);
        let embeds = Arc::new(EmbedLifecycleManager::with_options(
            deps.embeds,
            LifecycleOptions {
                credentials: deps.credentials,
                ready_timeout: config.embed.ready_timeout(),
            },
        ));
        embeds.apply_quality(config.quality.initial_level).await;

        let quality = Arc::new(QualityMonitor::new(config.quality.clone(), Arc::clone(&embeds)));
        let (events, _) = broadcast::channel(SESSION_EVENT_CAPACITY);
        let (slot_count, slot_counts) = watch::channel(0usize);

        let forwarder = events.clone();
        quality
            .on_quality_change(Arc::new(move |change: &QualityChange| {
                let _ = forwarder.send(SessionEvent::QualityChanged(change.clone()));
            }))
            .await;

        let monitor = Arc::clone(&quality).spawn(
            slot_counts,
            deps.performance,
            config.quality.poll_interval(),
        );
        let relay = spawn_lifecycle_relay(embeds.subscribe(), events.clone());

        log::info!("Created {} session with capacity {}", tier, capacity);

        Ok(Self {
            state: Mutex::new(SessionState::new(capacity)),
            tier: RwLock::new(tier),
            config,
            embeds,
            quality,
            slot_count,
            events,
            tasks: std::sync::Mutex::new(vec![monitor, relay]),
            closed: AtomicBool::new(false),
        })
    }

    /// Create a session and seed it from a saved pack
    ///
    /// The pack is fetched before anything is added. Channels the session
    /// rejects (duplicates, over capacity) are skipped and reported.
    pub async fn from_pack(
        packs: &dyn PackSource,
        pack_id: &str,
        tier: CapacityTier,
        deps: SessionDeps,
        config: SessionConfig,
    ) -> SessionResult<HydratedSession> {
        let fetched = packs.fetch_channels(pack_id).await;
        let session = Self::create(tier, deps, config).await?;

        let outcome = match fetched {
            Ok(channels) => Ok(session.hydrate(&channels).await),
            Err(e) => {
                log::warn!("Failed to fetch pack {}: {}", pack_id, e);
                Err(e)
            }
        };

        Ok(HydratedSession { session, outcome })
    }

    /// Append a channel; the first slot becomes primary with audio
    pub async fn add(&self, channel: &str) -> SessionResult<SlotList> {
        let mut state = self.state.lock().await;
        self.ensure_open()?;
        let before = state.slots();
        let after = state.add(channel)?;
        log::info!("Added channel {} ({} streams)", channel.trim(), after.len());
        self.commit(&before, &after).await;
        Ok(after)
    }

    /// Remove a slot, handing primary and audio on if it held them
    pub async fn remove(&self, slot_id: SlotId) -> SessionResult<SlotList> {
        let mut state = self.state.lock().await;
        self.ensure_open()?;
        let before = state.slots();
        let after = state.remove(slot_id)?;
        log::info!("Removed slot {} ({} streams)", slot_id, after.len());
        self.commit(&before, &after).await;
        Ok(after)
    }

    /// Make a slot primary; audio follows
    pub async fn promote_to_primary(&self, slot_id: SlotId) -> SessionResult<SlotList> {
        let mut state = self.state.lock().await;
        self.ensure_open()?;
        let before = state.slots();
        let after = state.promote_to_primary(slot_id)?;
        self.commit(&before, &after).await;
        Ok(after)
    }

    /// Move audio to a slot without changing the layout
    pub async fn set_audio_source(&self, slot_id: SlotId) -> SessionResult<SlotList> {
        let mut state = self.state.lock().await;
        self.ensure_open()?;
        let before = state.slots();
        let after = state.set_audio_source(slot_id)?;
        self.commit(&before, &after).await;
        Ok(after)
    }

    /// Current slot snapshot
    pub async fn slots(&self) -> SlotList {
        self.state.lock().await.slots()
    }

    /// Grid for the current slot count
    pub async fn layout(&self) -> GridPlacement {
        layout(self.state.lock().await.len())
    }

    /// Grid plus the area each slot renders into
    pub async fn placement(&self) -> SlotPlacement {
        place(&self.state.lock().await.slots())
    }

    pub async fn capacity(&self) -> usize {
        self.state.lock().await.capacity()
    }

    pub async fn tier(&self) -> CapacityTier {
        *self.tier.read().await
    }

    /// Change the entitlement tier
    ///
    /// Lowering the tier never evicts streams; further adds are rejected
    /// until the session is back under the new ceiling.
    pub async fn set_capacity_tier(&self, tier: CapacityTier) {
        let mut state = self.state.lock().await;
        state.set_capacity(self.config.capacity.limit_for(tier));
        *self.tier.write().await = tier;
        log::info!("Session tier changed to {} (capacity {})", tier, state.capacity());
    }

    /// Register an observer for quality changes
    pub async fn on_quality_change(&self, observer: Arc<dyn QualityObserver>) {
        self.quality.on_quality_change(observer).await;
    }

    pub async fn quality_state(&self) -> QualityState {
        self.quality.state().await
    }

    pub async fn quality_history(&self) -> Vec<QualityChange> {
        self.quality.history().await
    }

    /// Subscribe to session notifications
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Player widget state per slot; slots without an entry have no widget
    pub async fn embed_statuses(&self) -> HashMap<SlotId, EmbedStatus> {
        self.embeds.statuses().await
    }

    /// Request a new widget for a slot whose widget failed
    pub async fn retry_embed(&self, slot_id: SlotId) -> SessionResult<bool> {
        let state = self.state.lock().await;
        self.ensure_open()?;
        let slots = state.slots();
        let slot = slots
            .find(slot_id)
            .ok_or_else(|| SessionError::slot_not_found(slot_id))?;
        Ok(self.embeds.retry(slot).await)
    }

    /// Wait for every in-flight widget creation to finish
    pub async fn settle(&self) {
        self.embeds.settle().await;
    }

    /// Whether [`close`](Self::close) has run
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Tear down every widget and stop background tasks
    ///
    /// Slot operations fail with [`SessionError::Closed`] afterwards. Reads
    /// keep returning the final snapshot.
    pub async fn close(&self) {
        {
            let _state = self.state.lock().await;
            if self.closed.swap(true, Ordering::SeqCst) {
                return;
            }
        }
        self.abort_tasks();
        self.embeds.shutdown().await;
        self.embeds.settle().await;
        let _ = self.events.send(SessionEvent::Closed);
        log::info!("Session closed");
    }

    fn ensure_open(&self) -> SessionResult<()> {
        if self.is_closed() {
            return Err(SessionError::closed());
        }
        Ok(())
    }

    async fn hydrate(&self, channels: &[String]) -> HydrationReport {
        let mut state = self.state.lock().await;
        let before = state.slots();
        let report = state.hydrate(channels);
        let after = state.slots();
        log::info!(
            "Hydrated session: {} added, {} skipped",
            report.added.len(),
            report.skipped.len()
        );
        if before != after {
            self.commit(&before, &after).await;
        }
        report
    }

    async fn commit(&self, before: &SlotList, after: &SlotList) {
        self.embeds.reconcile(before, after).await;
        self.slot_count.send_replace(after.len());
        let _ = self.events.send(SessionEvent::SlotsChanged {
            slots: after.clone(),
        });
    }

    fn abort_tasks(&self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.abort_tasks();
        if self.is_closed() {
            return;
        }

        let has_slots = self.state.try_lock().map(|s| !s.is_empty()).unwrap_or(true);
        if !has_slots {
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                log::warn!("Session dropped without close; tearing down its player widgets");
                let embeds = Arc::clone(&self.embeds);
                runtime.spawn(async move {
                    embeds.shutdown().await;
                });
            }
            Err(_) => {
                log::warn!("Session dropped without close outside a runtime; player widgets left alive");
            }
        }
    }
}

fn spawn_lifecycle_relay(
    mut lifecycle: broadcast::Receiver<LifecycleEvent>,
    events: broadcast::Sender<SessionEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = match lifecycle.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::debug!("Session event relay lagged by {}", skipped);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return,
            };

            let relayed = match event {
                LifecycleEvent::Created {
                    slot_id,
                    embed_identity,
                } => SessionEvent::EmbedReady {
                    slot_id,
                    embed_identity,
                },
                LifecycleEvent::Failed {
                    slot_id,
                    channel,
                    reason,
                } => SessionEvent::EmbedFailed {
                    slot_id,
                    channel,
                    reason,
                },
                _ => continue,
            };
            let _ = events.send(relayed);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testing::{InMemoryPacks, MockEmbedFactory, ScriptedPerformance};
    use crate::session::{GridArea, PerformanceSample, QualityChangeReason, QualityLevel};
    use std::time::Duration;

    fn deps(factory: &Arc<MockEmbedFactory>) -> SessionDeps {
        SessionDeps::new(Arc::clone(factory) as Arc<dyn EmbedFactory>)
    }

    async fn session(tier: CapacityTier) -> (SessionHandle, Arc<MockEmbedFactory>) {
        let factory = Arc::new(MockEmbedFactory::new());
        let session = SessionHandle::create(tier, deps(&factory), SessionConfig::default())
            .await
            .unwrap();
        (session, factory)
    }

    #[tokio::test]
    async fn test_operations_keep_embeds_reconciled() {
        let (session, factory) = session(CapacityTier::Free).await;

        session.add("alice").await.unwrap();
        let slots = session.add("bob").await.unwrap();
        session.settle().await;
        assert_eq!(session.embed_statuses().await.len(), 2);

        let bob = slots.find_by_channel("bob").unwrap().id;
        session.promote_to_primary(bob).await.unwrap();
        session.settle().await;

        // add, add (churn), promote (churn): 1 + 2 + 2
        assert_eq!(factory.created_count(), 5);
        assert_eq!(factory.handle_for("bob").unwrap().muted(), Some(false));
        assert_eq!(factory.handle_for("alice").unwrap().muted(), Some(true));
        session.close().await;
    }

    #[tokio::test]
    async fn test_rejected_operation_changes_nothing() {
        let (session, factory) = session(CapacityTier::Free).await;
        session.add("alice").await.unwrap();
        session.settle().await;
        let before = session.slots().await;

        let err = session.add("ALICE").await.unwrap_err();
        assert!(matches!(err, SessionError::DuplicateChannel(_)));
        assert_eq!(session.slots().await, before);
        assert_eq!(factory.created_count(), 1);
    }

    #[tokio::test]
    async fn test_layout_follows_slot_count() {
        let (session, _) = session(CapacityTier::Premium).await;
        for channel in ["a", "b", "c", "d"] {
            session.add(channel).await.unwrap();
        }
        let grid = session.layout().await;
        assert_eq!(grid.placeholder_count, 1);

        let placement = session.placement().await;
        let first = session.slots().await[0].id;
        assert_eq!(placement.area_of(first), Some(GridArea::Primary));
    }

    #[tokio::test]
    async fn test_events_are_broadcast() {
        let (session, _) = session(CapacityTier::Free).await;
        let mut events = session.subscribe();

        session.add("alice").await.unwrap();
        assert!(matches!(events.recv().await, Ok(SessionEvent::SlotsChanged { .. })));
        session.settle().await;
        assert!(matches!(events.recv().await, Ok(SessionEvent::EmbedReady { .. })));

        session.close().await;
        assert!(matches!(events.recv().await, Ok(SessionEvent::Closed)));
    }

    #[tokio::test]
    async fn test_lowering_tier_keeps_streams() {
        let (session, _) = session(CapacityTier::Premium).await;
        for channel in ["a", "b", "c", "d"] {
            session.add(channel).await.unwrap();
        }
        session.set_capacity_tier(CapacityTier::Free).await;
        assert_eq!(session.slots().await.len(), 4);
        assert!(matches!(
            session.add("e").await,
            Err(SessionError::CapacityExceeded { capacity: 3 })
        ));
    }

    #[tokio::test]
    async fn test_from_pack_hydrates_and_reports_skips() {
        let packs = InMemoryPacks::new().with_pack("weekend", &["alice", "Bob", "alice", "carol", "dave"]);
        let factory = Arc::new(MockEmbedFactory::new());
        let hydrated = SessionHandle::from_pack(
            &packs,
            "weekend",
            CapacityTier::Free,
            deps(&factory),
            SessionConfig::default(),
        )
        .await
        .unwrap();

        let report = hydrated.outcome.unwrap();
        assert_eq!(report.added, vec!["alice", "bob", "carol"]);
        assert_eq!(report.skipped.len(), 2);
        assert_eq!(hydrated.session.slots().await.channels(), vec!["alice", "bob", "carol"]);

        // one reconciliation for the whole pack
        hydrated.session.settle().await;
        assert_eq!(factory.created_count(), 3);
    }

    #[tokio::test]
    async fn test_from_missing_pack_yields_empty_session() {
        let packs = InMemoryPacks::new();
        let factory = Arc::new(MockEmbedFactory::new());
        let hydrated = SessionHandle::from_pack(
            &packs,
            "missing",
            CapacityTier::Free,
            deps(&factory),
            SessionConfig::default(),
        )
        .await
        .unwrap();

        assert!(matches!(hydrated.outcome, Err(SessionError::Pack(_))));
        assert!(hydrated.session.slots().await.is_empty());
        hydrated.session.add("alice").await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_session_rejects_operations() {
        let (session, factory) = session(CapacityTier::Free).await;
        let slots = session.add("alice").await.unwrap();
        session.close().await;
        session.close().await;

        assert!(session.is_closed());
        assert!(matches!(session.add("bob").await, Err(SessionError::Closed)));
        assert!(matches!(session.remove(slots[0].id).await, Err(SessionError::Closed)));
        assert!(matches!(
            session.promote_to_primary(slots[0].id).await,
            Err(SessionError::Closed)
        ));
        assert!(matches!(
            session.set_audio_source(slots[0].id).await,
            Err(SessionError::Closed)
        ));
        assert!(matches!(session.retry_embed(slots[0].id).await, Err(SessionError::Closed)));

        // the final snapshot stays readable and nothing new was created
        assert_eq!(session.slots().await, slots);
        session.settle().await;
        assert_eq!(factory.created_count(), 1);
        assert!(session.embed_statuses().await.is_empty());
    }

    #[tokio::test]
    async fn test_dropping_open_session_tears_down_widgets() {
        let (session, factory) = session(CapacityTier::Free).await;
        session.add("alice").await.unwrap();
        session.settle().await;
        let alice = factory.handle_for("alice").unwrap();
        assert!(!alice.is_destroyed());

        drop(session);

        tokio::time::timeout(Duration::from_secs(5), async {
            while !alice.is_destroyed() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_retry_embed_for_unknown_slot() {
        let (session, _) = session(CapacityTier::Free).await;
        let err = session.retry_embed(uuid::Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, SessionError::SlotNotFound(_)));
    }

    #[tokio::test]
    async fn test_monitor_reacts_to_slot_count() {
        let factory = Arc::new(MockEmbedFactory::new());
        let mut config = SessionConfig::default();
        config.quality.poll_interval_secs = 3600;
        let performance = Arc::new(ScriptedPerformance::new(vec![Some(PerformanceSample::new(0.0))]));
        let session = SessionHandle::create(
            CapacityTier::Premium,
            deps(&factory).with_performance(performance),
            config,
        )
        .await
        .unwrap();
        let mut events = session.subscribe();

        for channel in ["a", "b", "c", "d", "e"] {
            session.add(channel).await.unwrap();
        }

        let change = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Ok(SessionEvent::QualityChanged(change)) = events.recv().await {
                    return change;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(change.from, QualityLevel::Auto);
        assert_eq!(change.to, QualityLevel::High);
        session.close().await;
    }

    #[tokio::test]
    async fn test_slot_removals_do_not_recover_quality() {
        let factory = Arc::new(MockEmbedFactory::new());
        let mut config = SessionConfig::default();
        config.quality.poll_interval_secs = 3600;
        let session = SessionHandle::create(CapacityTier::Premium, deps(&factory), config)
            .await
            .unwrap();

        let channels = ["a", "b", "c", "d", "e", "f", "g"];
        for channel in channels {
            session.add(channel).await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        for channel in &channels[..4] {
            let slot = session.slots().await.find_by_channel(channel).unwrap().id;
            session.remove(slot).await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let history = session.quality_history().await;
        assert!(history.iter().any(|c| c.reason == QualityChangeReason::SlotPressure));
        assert!(history.iter().all(|c| c.reason != QualityChangeReason::Recovery));
        assert_eq!(session.quality_state().await.level, QualityLevel::Low);
        session.close().await;
    }
}
