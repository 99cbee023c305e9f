// In-memory capability implementations
//
// Used by the demo binary and by tests. None of these talk to a real player
// or service; they record what the session asked of them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, Semaphore};

use super::embed::{CredentialProvider, EmbedEvent, EmbedFactory, EmbedHandle, EmbedTarget};
use super::entitlement::{Clock, EntitlementSource};
use super::quality::PerformanceSource;
use super::{
    CapacityTier, PackSource, PerformanceSample, PlaybackCredential, QualityLevel, SessionError,
    SessionResult,
};

const GATE_PERMITS: usize = 1024;

/// Player widget that only records the commands it receives
pub struct MockEmbed {
    target: EmbedTarget,
    ready: AtomicBool,
    destroyed: AtomicBool,
    muted: Mutex<Option<bool>>,
    quality: Mutex<Option<QualityLevel>>,
    events: Mutex<Option<broadcast::Sender<EmbedEvent>>>,
}

impl MockEmbed {
    fn new(target: EmbedTarget, ready: bool) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            muted: Mutex::new(Some(target.muted)),
            quality: Mutex::new(Some(target.quality)),
            target,
            ready: AtomicBool::new(ready),
            destroyed: AtomicBool::new(false),
            events: Mutex::new(Some(events)),
        }
    }

    pub fn target(&self) -> &EmbedTarget {
        &self.target
    }

    /// Last mute state pushed to the widget
    pub fn muted(&self) -> Option<bool> {
        self.muted.lock().ok().and_then(|m| *m)
    }

    /// Last quality pushed to the widget
    pub fn quality(&self) -> Option<QualityLevel> {
        self.quality.lock().ok().and_then(|q| *q)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Emit a player event as the widget would
    pub fn emit(&self, event: EmbedEvent) {
        if event == EmbedEvent::Ready {
            self.ready.store(true, Ordering::SeqCst);
        }
        if let Ok(guard) = self.events.lock() {
            if let Some(sender) = guard.as_ref() {
                let _ = sender.send(event);
            }
        }
    }

    fn check_alive(&self) -> SessionResult<()> {
        if self.is_destroyed() {
            return Err(SessionError::adapter(format!(
                "embed for {} already destroyed",
                self.target.channel
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl EmbedHandle for MockEmbed {
    fn channel(&self) -> &str {
        &self.target.channel
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn subscribe(&self) -> broadcast::Receiver<EmbedEvent> {
        match self.events.lock() {
            Ok(guard) => match guard.as_ref() {
                Some(sender) => sender.subscribe(),
                // destroyed: hand out a receiver whose feed is already closed
                None => broadcast::channel(1).1,
            },
            Err(_) => broadcast::channel(1).1,
        }
    }

    async fn set_muted(&self, muted: bool) -> SessionResult<()> {
        self.check_alive()?;
        if let Ok(mut guard) = self.muted.lock() {
            *guard = Some(muted);
        }
        Ok(())
    }

    async fn set_quality(&self, quality: QualityLevel) -> SessionResult<()> {
        self.check_alive()?;
        if let Ok(mut guard) = self.quality.lock() {
            *guard = Some(quality);
        }
        Ok(())
    }

    async fn destroy(&self) -> SessionResult<()> {
        self.destroyed.store(true, Ordering::SeqCst);
        if let Ok(mut guard) = self.events.lock() {
            guard.take();
        }
        log::debug!("Mock embed for {} destroyed", self.target.channel);
        Ok(())
    }
}

/// Factory producing [`MockEmbed`] widgets
pub struct MockEmbedFactory {
    gate: Option<Semaphore>,
    failing: Mutex<HashSet<String>>,
    never_ready: bool,
    created: AtomicUsize,
    handles: Mutex<Vec<Arc<MockEmbed>>>,
    last_credential: Mutex<Option<String>>,
}

impl MockEmbedFactory {
    pub fn new() -> Self {
        Self {
            gate: None,
            failing: Mutex::new(HashSet::new()),
            never_ready: false,
            created: AtomicUsize::new(0),
            handles: Mutex::new(Vec::new()),
            last_credential: Mutex::new(None),
        }
    }

    /// Hold every creation until [`open_gate`](Self::open_gate) is called
    pub fn gated(mut self) -> Self {
        self.gate = Some(Semaphore::new(0));
        self
    }

    /// Fail creation for one channel
    pub fn failing_on(self, channel: &str) -> Self {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(channel.to_string());
        }
        self
    }

    /// Produce widgets that never signal ready
    pub fn never_ready(mut self) -> Self {
        self.never_ready = true;
        self
    }

    pub fn open_gate(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(GATE_PERMITS);
        }
    }

    pub fn stop_failing(&self) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.clear();
        }
    }

    /// Number of widgets handed out
    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Most recent widget created for a channel
    pub fn handle_for(&self, channel: &str) -> Option<Arc<MockEmbed>> {
        let handles = self.handles.lock().ok()?;
        handles
            .iter()
            .rev()
            .find(|h| h.target.channel == channel)
            .cloned()
    }

    /// Every widget created so far, oldest first
    pub fn handles(&self) -> Vec<Arc<MockEmbed>> {
        self.handles.lock().map(|h| h.clone()).unwrap_or_default()
    }

    /// Token of the last credential passed to the factory
    pub fn last_credential(&self) -> Option<String> {
        self.last_credential.lock().ok().and_then(|c| c.clone())
    }
}

impl Default for MockEmbedFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbedFactory for MockEmbedFactory {
    async fn create(
        &self,
        target: &EmbedTarget,
        credential: Option<PlaybackCredential>,
    ) -> SessionResult<Arc<dyn EmbedHandle>> {
        let _permit = match &self.gate {
            Some(gate) => Some(
                gate.acquire()
                    .await
                    .map_err(|e| SessionError::adapter(e.to_string()))?,
            ),
            None => None,
        };

        let failing = self
            .failing
            .lock()
            .map(|f| f.contains(&target.channel))
            .unwrap_or(false);
        if failing {
            return Err(SessionError::adapter(format!(
                "player unavailable for {}",
                target.channel
            )));
        }

        if let Ok(mut last) = self.last_credential.lock() {
            *last = credential.map(|c| c.token);
        }

        let embed = Arc::new(MockEmbed::new(target.clone(), !self.never_ready));
        if let Ok(mut handles) = self.handles.lock() {
            handles.push(Arc::clone(&embed));
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        log::debug!("Mock embed created for {} at {}", target.channel, target.element_id());

        Ok(embed)
    }
}

/// Credential provider returning a fixed token, or failing
pub struct StaticCredentials {
    token: Option<String>,
}

impl StaticCredentials {
    pub fn token(token: &str) -> Self {
        Self {
            token: Some(token.to_string()),
        }
    }

    /// A provider whose fetch always fails
    pub fn unavailable() -> Self {
        Self { token: None }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn playback_credential(&self) -> SessionResult<Option<PlaybackCredential>> {
        match &self.token {
            Some(token) => Ok(Some(PlaybackCredential {
                token: token.clone(),
            })),
            None => Err(SessionError::credential("credential service unavailable")),
        }
    }
}

/// Performance source replaying a fixed list of samples
///
/// Once the script runs out every call returns `None`.
pub struct ScriptedPerformance {
    samples: Mutex<VecDeque<Option<PerformanceSample>>>,
}

impl ScriptedPerformance {
    pub fn new(samples: Vec<Option<PerformanceSample>>) -> Self {
        Self {
            samples: Mutex::new(samples.into()),
        }
    }
}

#[async_trait]
impl PerformanceSource for ScriptedPerformance {
    async fn sample(&self) -> Option<PerformanceSample> {
        self.samples.lock().ok()?.pop_front().flatten()
    }
}

/// Pack source backed by a map
#[derive(Default)]
pub struct InMemoryPacks {
    packs: HashMap<String, Vec<String>>,
}

impl InMemoryPacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pack(mut self, pack_id: &str, channels: &[&str]) -> Self {
        self.packs.insert(
            pack_id.to_string(),
            channels.iter().map(|c| c.to_string()).collect(),
        );
        self
    }
}

#[async_trait]
impl PackSource for InMemoryPacks {
    async fn fetch_channels(&self, pack_id: &str) -> SessionResult<Vec<String>> {
        self.packs
            .get(pack_id)
            .cloned()
            .ok_or_else(|| SessionError::pack(format!("pack {} not found", pack_id)))
    }
}

/// Entitlement source with fixed answers that counts lookups
#[derive(Default)]
pub struct StaticEntitlements {
    tiers: HashMap<String, CapacityTier>,
    lookups: AtomicUsize,
}

impl StaticEntitlements {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, user_id: &str, tier: CapacityTier) -> Self {
        self.tiers.insert(user_id.to_string(), tier);
        self
    }

    /// Number of lookups that reached this source
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EntitlementSource for StaticEntitlements {
    async fn capacity_tier(&self, user_id: &str) -> SessionResult<CapacityTier> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.tiers
            .get(user_id)
            .copied()
            .ok_or_else(|| SessionError::entitlement(format!("unknown user {}", user_id)))
    }
}

/// Clock that only moves when told to
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Utc::now()),
        }
    }

    pub fn advance(&self, by: Duration) {
        if let (Ok(mut now), Ok(by)) = (self.now.lock(), chrono::Duration::from_std(by)) {
            *now += by;
        }
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.lock().map(|now| *now).unwrap_or_else(|_| Utc::now())
    }
}
