// Reactive quality adaptation
//
// A small feedback loop over slot count and client performance samples.
// Pressure moves the level down and relief moves it back up, one step per
// evaluation in either direction. The controller never touches session
// membership, primary or audio; it only drives the shared player set.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::{EmbedLifecycleManager, PerformanceSample, QualityLevel, QualityState, SessionError, SessionResult};

const HISTORY_LIMIT: usize = 20;

/// Highest level allowed up to a given slot count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotCeiling {
    pub max_slots: usize,
    pub level: QualityLevel,
}

/// Thresholds driving the quality controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityPolicy {
    /// How often the monitor samples and evaluates (seconds)
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Dropped-frame rate above which a sample counts as degraded (0.0-1.0)
    #[serde(default = "default_degrade_dropped_frame_rate")]
    pub degrade_dropped_frame_rate: f32,
    /// Dropped-frame rate at or below which a sample counts as healthy (0.0-1.0)
    #[serde(default = "default_recover_dropped_frame_rate")]
    pub recover_dropped_frame_rate: f32,
    /// Consecutive healthy evaluations needed before stepping up
    #[serde(default = "default_recovery_evaluations")]
    pub recovery_evaluations: u32,
    /// Client memory above which a sample counts as degraded
    #[serde(default)]
    pub memory_ceiling_mb: Option<u64>,
    /// Level a fresh session starts at
    #[serde(default = "default_initial_level")]
    pub initial_level: QualityLevel,
    /// Level ceilings by slot count, ascending; counts past the last entry
    /// are capped at `low`
    #[serde(default = "default_slot_ceilings")]
    pub slot_ceilings: Vec<SlotCeiling>,
}

fn default_poll_interval_secs() -> u64 { 5 }
fn default_degrade_dropped_frame_rate() -> f32 { 0.10 }
fn default_recover_dropped_frame_rate() -> f32 { 0.02 }
fn default_recovery_evaluations() -> u32 { 3 }
fn default_initial_level() -> QualityLevel { QualityLevel::Auto }
fn default_slot_ceilings() -> Vec<SlotCeiling> {
    vec![
        SlotCeiling { max_slots: 2, level: QualityLevel::Auto },
        SlotCeiling { max_slots: 4, level: QualityLevel::High },
        SlotCeiling { max_slots: 6, level: QualityLevel::Medium },
    ]
}

impl Default for QualityPolicy {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            degrade_dropped_frame_rate: default_degrade_dropped_frame_rate(),
            recover_dropped_frame_rate: default_recover_dropped_frame_rate(),
            recovery_evaluations: default_recovery_evaluations(),
            memory_ceiling_mb: None,
            initial_level: default_initial_level(),
            slot_ceilings: default_slot_ceilings(),
        }
    }
}

impl QualityPolicy {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Highest level allowed for `slot_count` streams
    pub fn ceiling_for(&self, slot_count: usize) -> QualityLevel {
        self.slot_ceilings
            .iter()
            .find(|c| slot_count <= c.max_slots)
            .map(|c| c.level)
            .unwrap_or(QualityLevel::Low)
    }

    pub fn is_degraded(&self, sample: &PerformanceSample) -> bool {
        sample.dropped_frame_rate > self.degrade_dropped_frame_rate || self.over_memory(sample)
    }

    pub fn is_healthy(&self, sample: &PerformanceSample) -> bool {
        sample.dropped_frame_rate <= self.recover_dropped_frame_rate && !self.over_memory(sample)
    }

    fn over_memory(&self, sample: &PerformanceSample) -> bool {
        match (self.memory_ceiling_mb, sample.memory_mb) {
            (Some(ceiling), Some(used)) => used > ceiling,
            _ => false,
        }
    }

    /// Check the thresholds are coherent
    pub fn validate(&self) -> SessionResult<()> {
        if self.poll_interval_secs == 0 {
            return Err(SessionError::configuration("quality poll interval must be at least 1 second"));
        }
        for (name, rate) in [
            ("degrade_dropped_frame_rate", self.degrade_dropped_frame_rate),
            ("recover_dropped_frame_rate", self.recover_dropped_frame_rate),
        ] {
            if !(0.0..=1.0).contains(&rate) {
                return Err(SessionError::configuration(format!(
                    "{} must be between 0.0 and 1.0, got {}",
                    name, rate
                )));
            }
        }
        if self.recover_dropped_frame_rate > self.degrade_dropped_frame_rate {
            return Err(SessionError::configuration(
                "recover_dropped_frame_rate must not exceed degrade_dropped_frame_rate",
            ));
        }
        if self.recovery_evaluations == 0 {
            return Err(SessionError::configuration("recovery_evaluations must be at least 1"));
        }
        if self
            .slot_ceilings
            .windows(2)
            .any(|pair| pair[0].max_slots >= pair[1].max_slots)
        {
            return Err(SessionError::configuration(
                "slot_ceilings must be sorted by strictly increasing max_slots",
            ));
        }
        Ok(())
    }
}

/// Why the level moved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QualityChangeReason {
    /// More streams than the current level allows
    SlotPressure,
    /// Client reported dropped frames or memory pressure
    Performance,
    /// Pressure subsided for long enough to step back up
    Recovery,
}

/// What prompted an evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvaluationTrigger {
    /// Regular poll on the monitor's cadence
    Tick,
    /// The session's slot count just changed
    SlotChange,
}

/// One level transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityChange {
    pub from: QualityLevel,
    pub to: QualityLevel,
    pub reason: QualityChangeReason,
    pub slot_count: usize,
    pub at: SystemTime,
}

/// Closed-loop quality controller
pub struct QualityController {
    policy: QualityPolicy,
    state: QualityState,
    healthy_streak: u32,
    history: VecDeque<QualityChange>,
}

impl QualityController {
    pub fn new(policy: QualityPolicy) -> Self {
        let state = QualityState {
            level: policy.initial_level,
            ..Default::default()
        };
        Self {
            policy,
            state,
            healthy_streak: 0,
            history: VecDeque::new(),
        }
    }

    pub fn state(&self) -> &QualityState {
        &self.state
    }

    pub fn level(&self) -> QualityLevel {
        self.state.level
    }

    pub fn policy(&self) -> &QualityPolicy {
        &self.policy
    }

    /// Recent transitions, oldest first
    pub fn history(&self) -> &VecDeque<QualityChange> {
        &self.history
    }

    /// Evaluate one observation and move at most one step
    ///
    /// Only [`EvaluationTrigger::Tick`] evaluations count toward recovery. A
    /// slot change can step the level down but restarts the healthy streak.
    pub fn evaluate(
        &mut self,
        slot_count: usize,
        sample: Option<PerformanceSample>,
        trigger: EvaluationTrigger,
    ) -> Option<QualityChange> {
        self.state.slot_count = slot_count;
        self.state.last_sample = sample;

        let current = self.state.level;
        let ceiling = self.policy.ceiling_for(slot_count);

        if current > ceiling {
            self.healthy_streak = 0;
            return self.change_to(current.step_down(), QualityChangeReason::SlotPressure);
        }

        let degraded = sample.is_some_and(|s| self.policy.is_degraded(&s));
        if degraded {
            self.healthy_streak = 0;
            return self.change_to(current.step_down(), QualityChangeReason::Performance);
        }

        let healthy = sample.is_none_or(|s| self.policy.is_healthy(&s));
        if trigger == EvaluationTrigger::SlotChange || !healthy || current >= ceiling {
            self.healthy_streak = 0;
            return None;
        }

        self.healthy_streak += 1;
        if self.healthy_streak < self.policy.recovery_evaluations {
            return None;
        }

        self.healthy_streak = 0;
        self.change_to(current.step_up(), QualityChangeReason::Recovery)
    }

    fn change_to(&mut self, level: QualityLevel, reason: QualityChangeReason) -> Option<QualityChange> {
        let from = self.state.level;
        if level == from {
            return None;
        }

        let change = QualityChange {
            from,
            to: level,
            reason,
            slot_count: self.state.slot_count,
            at: SystemTime::now(),
        };

        self.history.push_back(change.clone());
        while self.history.len() > HISTORY_LIMIT {
            self.history.pop_front();
        }

        self.state.level = level;
        Some(change)
    }
}

/// Source of client performance samples
#[async_trait]
pub trait PerformanceSource: Send + Sync {
    /// Latest sample, or `None` when nothing was measured
    async fn sample(&self) -> Option<PerformanceSample>;
}

/// Receives quality level changes
pub trait QualityObserver: Send + Sync {
    fn on_quality_change(&self, change: &QualityChange);
}

impl<F> QualityObserver for F
where
    F: Fn(&QualityChange) + Send + Sync,
{
    fn on_quality_change(&self, change: &QualityChange) {
        self(change)
    }
}

/// Drives a [`QualityController`] against the live player set
pub struct QualityMonitor {
    controller: Mutex<QualityController>,
    embeds: Arc<EmbedLifecycleManager>,
    observers: RwLock<Vec<Arc<dyn QualityObserver>>>,
}

impl QualityMonitor {
    pub fn new(policy: QualityPolicy, embeds: Arc<EmbedLifecycleManager>) -> Self {
        Self {
            controller: Mutex::new(QualityController::new(policy)),
            embeds,
            observers: RwLock::new(Vec::new()),
        }
    }

    /// Register an observer for level changes
    pub async fn on_quality_change(&self, observer: Arc<dyn QualityObserver>) {
        self.observers.write().await.push(observer);
    }

    pub async fn state(&self) -> QualityState {
        self.controller.lock().await.state().clone()
    }

    pub async fn history(&self) -> Vec<QualityChange> {
        self.controller.lock().await.history().iter().cloned().collect()
    }

    /// Evaluate once and push any change to the players and observers
    pub async fn tick(
        &self,
        slot_count: usize,
        sample: Option<PerformanceSample>,
        trigger: EvaluationTrigger,
    ) -> Option<QualityChange> {
        let change = self
            .controller
            .lock()
            .await
            .evaluate(slot_count, sample, trigger)?;

        log::info!(
            "Quality {} -> {} ({:?}, {} streams)",
            change.from,
            change.to,
            change.reason,
            change.slot_count
        );
        let applied = self.embeds.apply_quality(change.to).await;
        log::debug!("Quality {} applied to {} players", change.to, applied);

        let observers = self.observers.read().await.clone();
        for observer in observers {
            observer.on_quality_change(&change);
        }
        Some(change)
    }

    /// Run the loop on its own task until the slot count channel closes
    pub fn spawn(
        self: Arc<Self>,
        mut slot_counts: watch::Receiver<usize>,
        source: Option<Arc<dyn PerformanceSource>>,
        interval: Duration,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                // slot count changes are evaluated without waiting for the next tick
                let trigger = tokio::select! {
                    _ = ticker.tick() => EvaluationTrigger::Tick,
                    changed = slot_counts.changed() => {
                        if changed.is_err() {
                            log::debug!("Session closed, stopping quality monitor");
                            return;
                        }
                        EvaluationTrigger::SlotChange
                    }
                };
                let slot_count = *slot_counts.borrow_and_update();
                let sample = match &source {
                    Some(source) => source.sample().await,
                    None => None,
                };
                self.tick(slot_count, sample, trigger).await;
            }
        })
    }
}
