// Embed lifecycle management
//
// Reconciles consecutive slot lists against live player widgets. Widgets
// are keyed by embed identity: an identity that appears gets a new widget,
// an identity that disappears has its widget torn down. Creation runs in
// the background so session operations never wait on a player.

use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;

use super::{
    wait_until_ready, CredentialProvider, EmbedEvent, EmbedFactory, EmbedHandle, EmbedTarget,
};
use crate::session::{EmbedIdentity, QualityLevel, SessionError, SessionResult, Slot, SlotId};

/// Default time a widget gets to signal ready
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(15);

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Observable state of one tracked widget
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmbedStatus {
    Pending,
    Live,
    Failed(String),
}

/// Lifecycle notifications for hosts and observers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    Created {
        slot_id: SlotId,
        embed_identity: EmbedIdentity,
    },
    Failed {
        slot_id: SlotId,
        channel: String,
        reason: String,
    },
    Destroyed {
        slot_id: SlotId,
        embed_identity: EmbedIdentity,
    },
    /// A creation finished after its identity was torn down
    Discarded {
        slot_id: SlotId,
        embed_identity: EmbedIdentity,
    },
    Player {
        slot_id: SlotId,
        event: EmbedEvent,
    },
}

/// Construction options for [`EmbedLifecycleManager`]
#[derive(Clone)]
pub struct LifecycleOptions {
    /// Fetched before every widget creation, for authenticated viewers
    pub credentials: Option<Arc<dyn CredentialProvider>>,
    /// Bound on the wait for a widget's ready signal
    pub ready_timeout: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            credentials: None,
            ready_timeout: DEFAULT_READY_TIMEOUT,
        }
    }
}

/// Summary of one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub requested: Vec<EmbedIdentity>,
    pub torn_down: Vec<EmbedIdentity>,
    pub retained: usize,
    pub mute_asserted: usize,
}

enum EntryState {
    Pending { ticket: u64 },
    Live {
        handle: Arc<dyn EmbedHandle>,
        watcher: JoinHandle<()>,
    },
    Failed(String),
}

struct Entry {
    slot_id: SlotId,
    channel: String,
    muted: bool,
    state: EntryState,
}

impl Entry {
    fn status(&self) -> EmbedStatus {
        match &self.state {
            EntryState::Pending { .. } => EmbedStatus::Pending,
            EntryState::Live { .. } => EmbedStatus::Live,
            EntryState::Failed(reason) => EmbedStatus::Failed(reason.clone()),
        }
    }

    fn live_handle(&self) -> Option<Arc<dyn EmbedHandle>> {
        match &self.state {
            EntryState::Live { handle, .. } => Some(Arc::clone(handle)),
            _ => None,
        }
    }
}

struct LifecycleInner {
    factory: Arc<dyn EmbedFactory>,
    credentials: Option<Arc<dyn CredentialProvider>>,
    ready_timeout: Duration,
    entries: RwLock<HashMap<EmbedIdentity, Entry>>,
    quality: RwLock<QualityLevel>,
    in_flight: Mutex<Vec<JoinHandle<()>>>,
    next_ticket: AtomicU64,
    events: broadcast::Sender<LifecycleEvent>,
}

/// Keeps live player widgets in step with the session's slot list
pub struct EmbedLifecycleManager {
    inner: Arc<LifecycleInner>,
}

impl EmbedLifecycleManager {
    /// Create a manager that builds widgets through `factory`
    pub fn new(factory: Arc<dyn EmbedFactory>) -> Self {
        Self::with_options(factory, LifecycleOptions::default())
    }

    pub fn with_options(factory: Arc<dyn EmbedFactory>, options: LifecycleOptions) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(LifecycleInner {
                factory,
                credentials: options.credentials,
                ready_timeout: options.ready_timeout,
                entries: RwLock::new(HashMap::new()),
                quality: RwLock::new(QualityLevel::Auto),
                in_flight: Mutex::new(Vec::new()),
                next_ticket: AtomicU64::new(1),
                events,
            }),
        }
    }

    /// Subscribe to lifecycle notifications
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.inner.events.subscribe()
    }

    /// Bring live widgets in line with `after`
    ///
    /// Identities no longer present are torn down; identities without a
    /// tracked widget get one requested. Calling this again with the same
    /// lists requests nothing new. Mute state is re-asserted on every live
    /// widget from the `has_audio` flags.
    pub async fn reconcile(&self, before: &[Slot], after: &[Slot]) -> ReconcileReport {
        let quality = *self.inner.quality.read().await;
        let wanted: HashSet<EmbedIdentity> = after.iter().map(|s| s.embed_identity).collect();
        let previous: HashSet<EmbedIdentity> = before.iter().map(|s| s.embed_identity).collect();

        let mut report = ReconcileReport {
            retained: wanted.intersection(&previous).count(),
            ..Default::default()
        };

        let (stale, creations) = {
            let mut entries = self.inner.entries.write().await;

            let stale_ids: Vec<EmbedIdentity> = entries
                .keys()
                .filter(|id| !wanted.contains(id))
                .copied()
                .collect();
            let mut stale = Vec::new();
            for id in stale_ids {
                if let Some(entry) = entries.remove(&id) {
                    report.torn_down.push(id);
                    stale.push((id, entry));
                }
            }

            let mut creations = Vec::new();
            for slot in after {
                match entries.get_mut(&slot.embed_identity) {
                    Some(entry) => entry.muted = slot.is_muted(),
                    None => {
                        let ticket = self.inner.next_ticket.fetch_add(1, Ordering::Relaxed);
                        entries.insert(
                            slot.embed_identity,
                            Entry {
                                slot_id: slot.id,
                                channel: slot.channel.clone(),
                                muted: slot.is_muted(),
                                state: EntryState::Pending { ticket },
                            },
                        );
                        report.requested.push(slot.embed_identity);
                        creations.push((EmbedTarget::for_slot(slot, quality), ticket));
                    }
                }
            }

            (stale, creations)
        };

        for (id, entry) in stale {
            self.inner.tear_down(id, entry).await;
        }

        for (target, ticket) in creations {
            self.spawn_creation(target, ticket).await;
        }

        report.mute_asserted = self.assert_mute_state().await;

        log::debug!(
            "Reconciled embeds: {} requested, {} torn down, {} retained",
            report.requested.len(),
            report.torn_down.len(),
            report.retained
        );
        report
    }

    /// Push the tracked mute state to every live widget
    pub async fn assert_mute_state(&self) -> usize {
        let targets: Vec<(Arc<dyn EmbedHandle>, bool)> = {
            let entries = self.inner.entries.read().await;
            entries
                .values()
                .filter_map(|e| e.live_handle().map(|h| (h, e.muted)))
                .collect()
        };

        for (handle, muted) in &targets {
            if let Err(e) = handle.set_muted(*muted).await {
                log::warn!("Failed to set mute state on {}: {}", handle.channel(), e);
            }
        }
        targets.len()
    }

    /// Apply a quality level to every live widget
    ///
    /// Widgets created afterwards start at this level. Pending and failed
    /// slots are skipped.
    pub async fn apply_quality(&self, quality: QualityLevel) -> usize {
        *self.inner.quality.write().await = quality;

        let handles = self.live_handles().await;
        for handle in &handles {
            if let Err(e) = handle.set_quality(quality).await {
                log::warn!("Failed to set quality {} on {}: {}", quality, handle.channel(), e);
            }
        }
        handles.len()
    }

    /// Quality level new widgets are created with
    pub async fn quality(&self) -> QualityLevel {
        *self.inner.quality.read().await
    }

    /// Request a new widget for a slot whose creation failed
    ///
    /// Returns false if the slot's current identity is not in a failed state.
    pub async fn retry(&self, slot: &Slot) -> bool {
        let quality = *self.inner.quality.read().await;
        let ticket = {
            let mut entries = self.inner.entries.write().await;
            match entries.get_mut(&slot.embed_identity) {
                Some(entry) if matches!(entry.state, EntryState::Failed(_)) => {
                    let ticket = self.inner.next_ticket.fetch_add(1, Ordering::Relaxed);
                    entry.state = EntryState::Pending { ticket };
                    entry.muted = slot.is_muted();
                    ticket
                }
                _ => return false,
            }
        };

        log::info!("Retrying embed for channel {}", slot.channel);
        self.spawn_creation(EmbedTarget::for_slot(slot, quality), ticket).await;
        true
    }

    /// State of the widget bound to an identity
    pub async fn status(&self, embed_identity: EmbedIdentity) -> Option<EmbedStatus> {
        let entries = self.inner.entries.read().await;
        entries.get(&embed_identity).map(|e| e.status())
    }

    /// State of every tracked widget, keyed by slot
    pub async fn statuses(&self) -> HashMap<SlotId, EmbedStatus> {
        let entries = self.inner.entries.read().await;
        entries.values().map(|e| (e.slot_id, e.status())).collect()
    }

    /// Number of widgets currently live
    pub async fn live_count(&self) -> usize {
        self.live_handles().await.len()
    }

    /// Wait for every in-flight creation to finish
    pub async fn settle(&self) {
        loop {
            let tasks: Vec<JoinHandle<()>> = {
                let mut in_flight = self.inner.in_flight.lock().await;
                in_flight.drain(..).collect()
            };
            if tasks.is_empty() {
                return;
            }
            for result in join_all(tasks).await {
                if let Err(e) = result {
                    log::warn!("Embed creation task ended abnormally: {}", e);
                }
            }
        }
    }

    /// Tear down every widget
    ///
    /// Creations still in flight are discarded when they complete.
    pub async fn shutdown(&self) {
        let entries: Vec<(EmbedIdentity, Entry)> = {
            let mut entries = self.inner.entries.write().await;
            entries.drain().collect()
        };

        log::info!("Shutting down {} embeds", entries.len());
        for (id, entry) in entries {
            self.inner.tear_down(id, entry).await;
        }
    }

    async fn live_handles(&self) -> Vec<Arc<dyn EmbedHandle>> {
        let entries = self.inner.entries.read().await;
        entries.values().filter_map(|e| e.live_handle()).collect()
    }

    async fn spawn_creation(&self, target: EmbedTarget, ticket: u64) {
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            inner.create_embed(target, ticket).await;
        });

        let mut in_flight = self.inner.in_flight.lock().await;
        in_flight.retain(|t| !t.is_finished());
        in_flight.push(task);
    }
}

impl LifecycleInner {
    fn emit(&self, event: LifecycleEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    async fn tear_down(&self, embed_identity: EmbedIdentity, entry: Entry) {
        match entry.state {
            EntryState::Live { handle, watcher } => {
                watcher.abort();
                if let Err(e) = handle.destroy().await {
                    log::warn!("Failed to destroy embed for {}: {}", entry.channel, e);
                }
                self.emit(LifecycleEvent::Destroyed {
                    slot_id: entry.slot_id,
                    embed_identity,
                });
            }
            EntryState::Pending { .. } => {
                log::debug!(
                    "Dropping pending embed for {}; completion will be discarded",
                    entry.channel
                );
            }
            EntryState::Failed(_) => {}
        }
    }

    async fn create_embed(self: Arc<Self>, target: EmbedTarget, ticket: u64) {
        let built = self.build_handle(&target).await;
        match built {
            Ok(handle) => self.accept_handle(target, ticket, handle).await,
            Err(e) => {
                log::warn!("Embed creation failed for {}: {}", target.channel, e);
                let reason = e.to_string();
                let still_wanted = {
                    let mut entries = self.entries.write().await;
                    match entries.get_mut(&target.embed_identity) {
                        Some(entry) if is_ticket(&entry.state, ticket) => {
                            entry.state = EntryState::Failed(reason.clone());
                            true
                        }
                        _ => false,
                    }
                };
                if still_wanted {
                    self.emit(LifecycleEvent::Failed {
                        slot_id: target.slot_id,
                        channel: target.channel,
                        reason,
                    });
                }
            }
        }
    }

    async fn build_handle(&self, target: &EmbedTarget) -> SessionResult<Arc<dyn EmbedHandle>> {
        let credential = match &self.credentials {
            Some(provider) => match provider.playback_credential().await {
                Ok(credential) => credential,
                Err(e) => {
                    log::warn!(
                        "No playback credential for {}, continuing anonymously: {}",
                        target.channel,
                        e
                    );
                    None
                }
            },
            None => None,
        };

        let handle = self.factory.create(target, credential).await?;

        let ready = tokio::time::timeout(self.ready_timeout, wait_until_ready(handle.as_ref())).await;
        let failure = match ready {
            Ok(Ok(())) => return Ok(handle),
            Ok(Err(e)) => e,
            Err(_) => SessionError::embed_timeout(target.channel.clone()),
        };

        if let Err(e) = handle.destroy().await {
            log::debug!("Destroying unready embed for {} failed: {}", target.channel, e);
        }
        Err(failure)
    }

    async fn accept_handle(self: Arc<Self>, target: EmbedTarget, ticket: u64, handle: Arc<dyn EmbedHandle>) {
        let watcher = tokio::spawn(Arc::clone(&self).watch_player(
            target.embed_identity,
            target.slot_id,
            handle.subscribe(),
        ));

        let accepted = {
            let mut entries = self.entries.write().await;
            match entries.get_mut(&target.embed_identity) {
                Some(entry) if is_ticket(&entry.state, ticket) => {
                    entry.state = EntryState::Live {
                        handle: Arc::clone(&handle),
                        watcher,
                    };
                    Some(entry.muted)
                }
                _ => {
                    watcher.abort();
                    None
                }
            }
        };

        let Some(muted) = accepted else {
            log::debug!(
                "Embed for {} finished after teardown; discarding",
                target.channel
            );
            if let Err(e) = handle.destroy().await {
                log::warn!("Failed to destroy discarded embed for {}: {}", target.channel, e);
            }
            self.emit(LifecycleEvent::Discarded {
                slot_id: target.slot_id,
                embed_identity: target.embed_identity,
            });
            return;
        };

        // state may have moved on while the widget was loading
        if muted != target.muted {
            if let Err(e) = handle.set_muted(muted).await {
                log::warn!("Failed to set mute state on {}: {}", target.channel, e);
            }
        }
        let quality = *self.quality.read().await;
        if quality != target.quality {
            if let Err(e) = handle.set_quality(quality).await {
                log::warn!("Failed to set quality on {}: {}", target.channel, e);
            }
        }

        log::info!("Embed ready for channel {}", target.channel);
        self.emit(LifecycleEvent::Created {
            slot_id: target.slot_id,
            embed_identity: target.embed_identity,
        });
    }

    async fn watch_player(
        self: Arc<Self>,
        embed_identity: EmbedIdentity,
        slot_id: SlotId,
        mut events: broadcast::Receiver<EmbedEvent>,
    ) {
        loop {
            match events.recv().await {
                Ok(EmbedEvent::Error(reason)) => {
                    self.fail_live(embed_identity, reason).await;
                    return;
                }
                Ok(event) => self.emit(LifecycleEvent::Player { slot_id, event }),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    }

    /// Demote a live widget that reported an error to the failed state
    async fn fail_live(&self, embed_identity: EmbedIdentity, reason: String) {
        let failed = {
            let mut entries = self.entries.write().await;
            match entries.get_mut(&embed_identity) {
                Some(entry) if matches!(entry.state, EntryState::Live { .. }) => {
                    let previous = std::mem::replace(&mut entry.state, EntryState::Failed(reason.clone()));
                    match previous {
                        // the watcher is this task; dropping its handle does not abort it
                        EntryState::Live { handle, .. } => Some((handle, entry.slot_id, entry.channel.clone())),
                        _ => None,
                    }
                }
                _ => None,
            }
        };

        if let Some((handle, slot_id, channel)) = failed {
            log::warn!("Embed for {} reported an error: {}", channel, reason);
            if let Err(e) = handle.destroy().await {
                log::debug!("Destroying failed embed for {} failed: {}", channel, e);
            }
            self.emit(LifecycleEvent::Failed {
                slot_id,
                channel,
                reason,
            });
        }
    }
}

fn is_ticket(state: &EntryState, ticket: u64) -> bool {
    matches!(state, EntryState::Pending { ticket: t } if *t == ticket)
}
