//! Lifecycle runner.
//!
//! The runner is the only component that mutates the active-effect slot.
//! Two locks are involved and never held across an `.await`:
//!
//! - `slot` guards the bookkeeping (state, active effect, tick eligibility)
//!   and is never held while a callback runs;
//! - `gate` serializes callback invocations so `on_tick` can never overlap
//!   `activate()` or `deactivate()`.
//!
//! Callbacks must not call back into the runner's `tick`/`apply_*`
//! entry points; queries (`is_active`, `active_effect`) are fine.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::state::{LifecycleNotification, LifecycleState, LifecycleTiming, RunOutcome};
use crate::effect::EffectDescriptor;
use crate::error::{CallbackKind, ChaosError, EffectError};
use crate::observability::{Event, EventEmitter, metrics};
use crate::protocol::{Phase, PhaseBroadcaster};

/// Capacity of the notification channel; slow subscribers lag, they never
/// block the runner.
const NOTIFICATION_CAPACITY: usize = 64;

#[derive(Debug, Default)]
struct Slot {
    state: LifecycleState,
    /// Effect owning the authoritative run in progress.
    running: Option<Arc<EffectDescriptor>>,
    /// Effect whose `activate()` has been invoked and `deactivate()` not yet.
    active: Option<Arc<EffectDescriptor>>,
    /// `activate()` returned and `deactivate()` has not started.
    live: bool,
    /// Someone has committed to calling `deactivate()` on `active`.
    teardown_claimed: bool,
    activated_at: Option<Instant>,
}

impl Slot {
    fn reset(&mut self) {
        *self = Self::default();
    }

    fn owns_run(&self, effect: &Arc<EffectDescriptor>) -> bool {
        self.running.as_ref().is_some_and(|r| Arc::ptr_eq(r, effect))
    }

    fn owns_active(&self, effect: &Arc<EffectDescriptor>) -> bool {
        self.active.as_ref().is_some_and(|a| Arc::ptr_eq(a, effect))
    }
}

/// Drives effects through their lifecycle and tracks the active one.
pub struct LifecycleRunner {
    slot: Mutex<Slot>,
    gate: Mutex<()>,
    notifications: broadcast::Sender<LifecycleNotification>,
    broadcaster: Arc<PhaseBroadcaster>,
    events: Arc<EventEmitter>,
    timing: LifecycleTiming,
}

impl LifecycleRunner {
    /// Creates an idle runner.
    #[must_use]
    pub fn new(
        broadcaster: Arc<PhaseBroadcaster>,
        events: Arc<EventEmitter>,
        timing: LifecycleTiming,
    ) -> Self {
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self {
            slot: Mutex::new(Slot::default()),
            gate: Mutex::new(()),
            notifications,
            broadcaster,
            events,
            timing,
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Current state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.lock_slot().state
    }

    /// The effect currently applied, if any.
    #[must_use]
    pub fn active_effect(&self) -> Option<Arc<EffectDescriptor>> {
        self.lock_slot().active.clone()
    }

    /// `true` from the moment an effect is set active until its
    /// `deactivate()` has been invoked.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.lock_slot().active.is_some()
    }

    /// Subscribes to Started/Ended notifications.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleNotification> {
        self.notifications.subscribe()
    }

    /// Phase timings used by [`run`](Self::run).
    #[must_use]
    pub const fn timing(&self) -> &LifecycleTiming {
        &self.timing
    }

    // ------------------------------------------------------------------
    // Authoritative run
    // ------------------------------------------------------------------

    /// Runs `effect` through warn → activate → hold → deactivate.
    ///
    /// Cancelling `cancel` during the warning abandons the run; cancelling
    /// during the hold leaves the effect active for
    /// [`force_teardown`](Self::force_teardown).
    ///
    /// # Errors
    ///
    /// - [`ChaosError::Busy`] if another run is in progress.
    /// - [`ChaosError::EffectCallbackFailure`] if `activate()` or
    ///   `deactivate()` fails; the bookkeeping is already cleared by then.
    ///   A failed `deactivate()` is still announced so followers revert.
    pub async fn run(
        &self,
        effect: Arc<EffectDescriptor>,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, ChaosError> {
        self.begin(&effect)?;
        let id = effect.id();

        info!(effect = %id, "chaos incoming");
        self.events.emit(Event::EffectWarned {
            timestamp: Utc::now(),
            effect_id: id.to_string(),
        });
        self.broadcaster
            .broadcast(Phase::Warn, id, effect.warn_text())
            .await;

        if !wait(self.timing.warning_delay, cancel).await {
            self.abandon_warning(&effect);
            debug!(effect = %id, "run cancelled during warning");
            return Ok(RunOutcome::Cancelled);
        }

        match self.activate_owned(&effect) {
            Ok(true) => {}
            Ok(false) => {
                debug!(effect = %id, "torn down during activation; activate not broadcast");
                return Ok(RunOutcome::Cancelled);
            }
            Err(source) => {
                return Err(callback_failure(&effect, CallbackKind::Activate, source));
            }
        }
        self.broadcaster
            .broadcast(Phase::Activate, id, effect.activate_text())
            .await;

        if !wait(self.timing.hold_duration, cancel).await {
            debug!(effect = %id, "run cancelled while active");
            return Ok(RunOutcome::Cancelled);
        }

        let Some(activated_at) = self.claim_teardown(&effect) else {
            return Ok(RunOutcome::Cancelled);
        };
        let result = self.invoke_gated(&effect, CallbackKind::Deactivate);
        self.announce_ended(&effect);
        self.lock_slot().reset();

        self.events.emit(Event::EffectDeactivated {
            timestamp: Utc::now(),
            effect_id: id.to_string(),
            success: result.is_ok(),
        });
        metrics::record_effect_ended(activated_at.map(|t| t.elapsed()));
        info!(effect = %id, "chaos subsides");

        self.broadcaster
            .broadcast(Phase::Deactivate, id, &self.timing.subside_text)
            .await;

        result
            .map(|()| RunOutcome::Completed)
            .map_err(|source| callback_failure(&effect, CallbackKind::Deactivate, source))
    }

    fn begin(&self, effect: &Arc<EffectDescriptor>) -> Result<(), ChaosError> {
        let mut slot = self.lock_slot();
        if slot.state != LifecycleState::Idle {
            let running = slot
                .running
                .as_ref()
                .or(slot.active.as_ref())
                .map_or_else(|| effect.id().clone(), |e| e.id().clone());
            return Err(ChaosError::Busy {
                requested: effect.id().clone(),
                running,
            });
        }
        slot.state = LifecycleState::Warning;
        slot.running = Some(Arc::clone(effect));
        drop(slot);
        Ok(())
    }

    fn abandon_warning(&self, effect: &Arc<EffectDescriptor>) {
        let mut slot = self.lock_slot();
        if slot.state == LifecycleState::Warning && slot.owns_run(effect) {
            slot.reset();
        }
    }

    /// Moves a run from Warning to Active and invokes `activate()`.
    ///
    /// Returns `Ok(false)` if the run was torn down while warning or while
    /// `activate()` was running.
    fn activate_owned(&self, effect: &Arc<EffectDescriptor>) -> Result<bool, EffectError> {
        let _gate = self.lock_gate();
        {
            let mut slot = self.lock_slot();
            if !(slot.state == LifecycleState::Warning && slot.owns_run(effect)) {
                return Ok(false);
            }
            slot.state = LifecycleState::Active;
            slot.active = Some(Arc::clone(effect));
        }
        self.finish_activation(effect, true)
    }

    /// Invokes `activate()` on the effect already placed in the slot and
    /// emits `Started`. Caller holds the gate, so a concurrent teardown
    /// cannot announce `Ended` first.
    ///
    /// Returns `Ok(false)` if a teardown claimed the effect while
    /// `activate()` ran; the effect is then never marked live.
    fn finish_activation(
        &self,
        effect: &Arc<EffectDescriptor>,
        authoritative: bool,
    ) -> Result<bool, EffectError> {
        match invoke(effect, CallbackKind::Activate) {
            Ok(()) => {
                let claimed = {
                    let mut slot = self.lock_slot();
                    if !slot.teardown_claimed {
                        slot.live = true;
                        slot.activated_at = Some(Instant::now());
                    }
                    slot.teardown_claimed
                };
                self.announce_started(effect, authoritative);
                Ok(!claimed)
            }
            Err(source) => {
                self.lock_slot().reset();
                Err(source)
            }
        }
    }

    /// Commits the caller to deactivating `effect`.
    ///
    /// Returns `None` if `effect` is no longer active or someone else
    /// already committed, otherwise the activation instant.
    #[allow(clippy::option_option)]
    fn claim_teardown(&self, effect: &Arc<EffectDescriptor>) -> Option<Option<Instant>> {
        let mut slot = self.lock_slot();
        if slot.state != LifecycleState::Active
            || !slot.owns_active(effect)
            || slot.teardown_claimed
        {
            return None;
        }
        slot.teardown_claimed = true;
        slot.live = false;
        Some(slot.activated_at)
    }

    // ------------------------------------------------------------------
    // Follower replay
    // ------------------------------------------------------------------

    /// Applies a remote Activate locally: sets the active effect, invokes
    /// `activate()`, emits `Started`. No warning, no timing, no broadcast.
    ///
    /// Duplicate deliveries are not filtered.
    ///
    /// # Errors
    ///
    /// Returns [`ChaosError::EffectCallbackFailure`] if `activate()` fails;
    /// the slot is cleared first.
    pub fn apply_activate_locally(&self, effect: &Arc<EffectDescriptor>) -> Result<(), ChaosError> {
        let _gate = self.lock_gate();
        {
            let mut slot = self.lock_slot();
            if let Some(previous) = slot.active.as_ref().filter(|a| !Arc::ptr_eq(a, effect)) {
                warn!(
                    previous = %previous.id(),
                    effect = %effect.id(),
                    "activate received while another effect is active"
                );
            }
            slot.reset();
            slot.state = LifecycleState::Active;
            slot.active = Some(Arc::clone(effect));
        }
        self.finish_activation(effect, false)
            .map(|_| ())
            .map_err(|source| callback_failure(effect, CallbackKind::Activate, source))
    }

    /// Applies a remote Deactivate locally: invokes `deactivate()`, emits
    /// `Ended`, clears the active effect.
    ///
    /// Duplicate deliveries are not filtered.
    ///
    /// # Errors
    ///
    /// Returns [`ChaosError::EffectCallbackFailure`] if `deactivate()` fails;
    /// `Ended` is still emitted and the slot is still cleared.
    pub fn apply_deactivate_locally(
        &self,
        effect: &Arc<EffectDescriptor>,
    ) -> Result<(), ChaosError> {
        let activated_at = {
            let mut slot = self.lock_slot();
            slot.live = false;
            slot.teardown_claimed = true;
            slot.activated_at.take()
        };

        let result = self.invoke_gated(effect, CallbackKind::Deactivate);
        self.announce_ended(effect);
        self.lock_slot().reset();

        self.events.emit(Event::EffectDeactivated {
            timestamp: Utc::now(),
            effect_id: effect.id().to_string(),
            success: result.is_ok(),
        });
        metrics::record_effect_ended(activated_at.map(|t| t.elapsed()));

        result.map_err(|source| callback_failure(effect, CallbackKind::Deactivate, source))
    }

    // ------------------------------------------------------------------
    // Teardown and ticking
    // ------------------------------------------------------------------

    /// Reverts whatever is active, best-effort.
    ///
    /// A run still warning is abandoned. An active effect gets exactly one
    /// `deactivate()` call; its failure or panic is logged and swallowed.
    /// Returns `true` if an effect was reverted.
    pub fn force_teardown(&self) -> bool {
        let target = {
            let mut slot = self.lock_slot();
            match slot.state {
                LifecycleState::Idle => return false,
                LifecycleState::Warning => {
                    debug!("teardown abandoned a run during its warning");
                    slot.reset();
                    return false;
                }
                LifecycleState::Active | LifecycleState::Aborting => {}
            }
            if slot.teardown_claimed {
                return false;
            }
            slot.state = LifecycleState::Aborting;
            slot.teardown_claimed = true;
            slot.live = false;
            slot.active.clone()
        };

        let Some(effect) = target else {
            self.lock_slot().reset();
            return false;
        };

        let result = {
            let _gate = self.lock_gate();
            // A failed activate() may have cleared the slot while we waited.
            let still_claimed = {
                let slot = self.lock_slot();
                slot.teardown_claimed && slot.owns_active(&effect)
            };
            if !still_claimed {
                debug!(effect = %effect.id(), "activation failed before teardown; nothing to revert");
                return false;
            }
            invoke(&effect, CallbackKind::Deactivate)
        };
        if let Err(e) = &result {
            warn!(effect = %effect.id(), error = %e, "deactivate failed during teardown");
        }
        self.announce_ended(&effect);
        self.lock_slot().reset();

        self.events.emit(Event::EffectTornDown {
            timestamp: Utc::now(),
            effect_id: effect.id().to_string(),
            success: result.is_ok(),
        });
        metrics::record_effect_ended(None);
        info!(effect = %effect.id(), "active effect torn down");
        true
    }

    /// Invokes `on_tick()` on the active effect, if it is live.
    ///
    /// Returns `Ok(true)` if a tick was delivered.
    ///
    /// # Errors
    ///
    /// Returns [`ChaosError::EffectCallbackFailure`] if `on_tick()` fails.
    pub fn tick(&self) -> Result<bool, ChaosError> {
        let _gate = self.lock_gate();
        let effect = {
            let slot = self.lock_slot();
            if !slot.live {
                return Ok(false);
            }
            slot.active.clone()
        };
        let Some(effect) = effect else {
            return Ok(false);
        };
        invoke(&effect, CallbackKind::Tick)
            .map(|()| true)
            .map_err(|source| callback_failure(&effect, CallbackKind::Tick, source))
    }

    /// Spawns the per-session tick driver.
    ///
    /// Tick failures are logged; the driver keeps going until `cancel`.
    pub fn start_tick_task(
        self: &Arc<Self>,
        every: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let runner = Arc::clone(self);
        let every = every.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        debug!("tick task cancelled");
                        break;
                    }
                    _ = interval.tick() => {
                        if let Err(e) = runner.tick() {
                            warn!(error = %e, "effect tick failed");
                        }
                    }
                }
            }
        })
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn announce_started(&self, effect: &Arc<EffectDescriptor>, authoritative: bool) {
        let _ = self
            .notifications
            .send(LifecycleNotification::Started(Arc::clone(effect)));
        self.events.emit(Event::EffectActivated {
            timestamp: Utc::now(),
            effect_id: effect.id().to_string(),
            authoritative,
        });
        metrics::record_effect_started(effect.id().as_str());
        info!(effect = %effect.id(), authoritative, "effect active");
    }

    fn announce_ended(&self, effect: &Arc<EffectDescriptor>) {
        let _ = self
            .notifications
            .send(LifecycleNotification::Ended(Arc::clone(effect)));
    }

    fn invoke_gated(
        &self,
        effect: &EffectDescriptor,
        kind: CallbackKind,
    ) -> Result<(), EffectError> {
        let _gate = self.lock_gate();
        invoke(effect, kind)
    }

    fn lock_slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_gate(&self) -> MutexGuard<'_, ()> {
        self.gate.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for LifecycleRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slot = self.lock_slot();
        f.debug_struct("LifecycleRunner")
            .field("state", &slot.state)
            .field("active", &slot.active.as_ref().map(|e| e.id().clone()))
            .field("timing", &self.timing)
            .finish_non_exhaustive()
    }
}

/// Sleeps for `duration`; returns `false` if `cancel` fired first.
async fn wait(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(duration) => true,
    }
}

/// Invokes one callback, converting a panic into [`EffectError::Panicked`].
fn invoke(effect: &EffectDescriptor, kind: CallbackKind) -> Result<(), EffectError> {
    let result = catch_unwind(AssertUnwindSafe(|| match kind {
        CallbackKind::Activate => effect.activate(),
        CallbackKind::Deactivate => effect.deactivate(),
        CallbackKind::Tick => effect.tick(),
    }))
    .unwrap_or_else(|payload| Err(EffectError::Panicked(panic_message(&*payload))));

    if result.is_err() {
        metrics::record_callback_failure(kind.as_str());
    }
    result
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_owned())
}

fn callback_failure(
    effect: &EffectDescriptor,
    callback: CallbackKind,
    source: EffectError,
) -> ChaosError {
    error!(effect = %effect.id(), %callback, error = %source, "effect callback failed");
    ChaosError::EffectCallbackFailure {
        effect: effect.id().clone(),
        callback,
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::Role;
    use crate::protocol::frame::decode;
    use crate::transport::{LoopbackBus, PhaseTransport};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct Calls {
        activate: AtomicUsize,
        deactivate: AtomicUsize,
        tick: AtomicUsize,
    }

    fn counting_effect(id: &str, calls: &Arc<Calls>) -> Arc<EffectDescriptor> {
        let (a, d, t) = (Arc::clone(calls), Arc::clone(calls), Arc::clone(calls));
        Arc::new(
            EffectDescriptor::builder(id)
                .on_activate(move || {
                    a.activate.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .on_deactivate(move || {
                    d.deactivate.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .on_tick(move || {
                    t.tick.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .build()
                .unwrap(),
        )
    }

    fn runner_with(broadcaster: PhaseBroadcaster) -> Arc<LifecycleRunner> {
        Arc::new(LifecycleRunner::new(
            Arc::new(broadcaster),
            Arc::new(EventEmitter::noop()),
            LifecycleTiming::default(),
        ))
    }

    fn silent_runner() -> Arc<LifecycleRunner> {
        runner_with(PhaseBroadcaster::detached(Role::Host))
    }

    #[tokio::test(start_paused = true)]
    async fn run_completes_full_lifecycle() {
        let bus = LoopbackBus::new();
        let listener = bus.endpoint();
        let runner = runner_with(PhaseBroadcaster::new(Arc::new(bus.endpoint()), Role::Host));
        let calls = Arc::new(Calls::default());
        let effect = counting_effect("tornado", &calls);

        let outcome = runner
            .run(Arc::clone(&effect), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, RunOutcome::Completed);
        assert_eq!(calls.activate.load(Ordering::SeqCst), 1);
        assert_eq!(calls.deactivate.load(Ordering::SeqCst), 1);
        assert!(!runner.is_active());
        assert_eq!(runner.state(), LifecycleState::Idle);

        let mut phases = vec![];
        for _ in 0..3 {
            let frame = listener.recv_frame().await.unwrap().unwrap();
            phases.push(decode(&frame).unwrap().unwrap());
        }
        assert_eq!(phases[0].phase, Phase::Warn);
        assert_eq!(phases[1].phase, Phase::Activate);
        assert_eq!(phases[2].phase, Phase::Deactivate);
        assert_eq!(phases[2].text, "Chaos subsides... for now.");
    }

    #[tokio::test(start_paused = true)]
    async fn inactive_during_warning_active_during_hold() {
        let runner = silent_runner();
        let calls = Arc::new(Calls::default());
        let effect = counting_effect("fog", &calls);

        let task = {
            let runner = Arc::clone(&runner);
            let effect = Arc::clone(&effect);
            tokio::spawn(async move { runner.run(effect, &CancellationToken::new()).await })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(runner.state(), LifecycleState::Warning);
        assert!(!runner.is_active());

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(runner.state(), LifecycleState::Active);
        assert!(runner.is_active());
        assert_eq!(runner.active_effect().unwrap().id().as_str(), "fog");

        tokio::time::sleep(Duration::from_secs(8)).await;
        assert!(!runner.is_active());
        assert_eq!(calls.deactivate.load(Ordering::SeqCst), 1);
        assert_eq!(task.await.unwrap().unwrap(), RunOutcome::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn second_run_is_busy() {
        let runner = silent_runner();
        let calls = Arc::new(Calls::default());
        let first = counting_effect("first", &calls);
        let second = counting_effect("second", &calls);

        let task = {
            let runner = Arc::clone(&runner);
            tokio::spawn(async move { runner.run(first, &CancellationToken::new()).await })
        };
        tokio::task::yield_now().await;

        let err = runner
            .run(second, &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            ChaosError::Busy { requested, running } => {
                assert_eq!(requested.as_str(), "second");
                assert_eq!(running.as_str(), "first");
            }
            other => panic!("expected Busy, got {other:?}"),
        }
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_warning_never_activates() {
        let runner = silent_runner();
        let calls = Arc::new(Calls::default());
        let effect = counting_effect("fog", &calls);
        let cancel = CancellationToken::new();

        let task = {
            let runner = Arc::clone(&runner);
            let cancel = cancel.clone();
            tokio::spawn(async move { runner.run(effect, &cancel).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();

        assert_eq!(task.await.unwrap().unwrap(), RunOutcome::Cancelled);
        assert_eq!(calls.activate.load(Ordering::SeqCst), 0);
        assert_eq!(runner.state(), LifecycleState::Idle);
        assert!(!runner.force_teardown());
        assert_eq!(calls.deactivate.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_hold_leaves_effect_for_teardown() {
        let runner = silent_runner();
        let calls = Arc::new(Calls::default());
        let effect = counting_effect("fog", &calls);
        let cancel = CancellationToken::new();

        let task = {
            let runner = Arc::clone(&runner);
            let cancel = cancel.clone();
            tokio::spawn(async move { runner.run(effect, &cancel).await })
        };
        tokio::time::sleep(Duration::from_secs(5)).await;
        cancel.cancel();

        assert_eq!(task.await.unwrap().unwrap(), RunOutcome::Cancelled);
        assert!(runner.is_active());

        assert!(runner.force_teardown());
        assert!(!runner.is_active());
        assert_eq!(calls.deactivate.load(Ordering::SeqCst), 1);

        assert!(!runner.force_teardown(), "second teardown is a no-op");
        assert_eq!(calls.deactivate.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_during_hold_is_not_repeated_by_run() {
        let runner = silent_runner();
        let calls = Arc::new(Calls::default());
        let effect = counting_effect("fog", &calls);

        let task = {
            let runner = Arc::clone(&runner);
            tokio::spawn(async move { runner.run(effect, &CancellationToken::new()).await })
        };
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(runner.force_teardown());

        assert_eq!(task.await.unwrap().unwrap(), RunOutcome::Cancelled);
        assert_eq!(calls.deactivate.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_activate_clears_state_and_skips_broadcast() {
        let bus = LoopbackBus::new();
        let listener = bus.endpoint();
        let runner = runner_with(PhaseBroadcaster::new(Arc::new(bus.endpoint()), Role::Host));
        let effect = Arc::new(
            EffectDescriptor::builder("broken")
                .on_activate(|| Err(EffectError::failed("no physics")))
                .build()
                .unwrap(),
        );

        let err = runner
            .run(effect, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ChaosError::EffectCallbackFailure {
                callback: CallbackKind::Activate,
                ..
            }
        ));
        assert!(!runner.is_active());
        assert_eq!(runner.state(), LifecycleState::Idle);

        let warn = listener.recv_frame().await.unwrap().unwrap();
        assert_eq!(decode(&warn).unwrap().unwrap().phase, Phase::Warn);
        listener.close().await.unwrap();
        assert_eq!(listener.recv_frame().await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_deactivate_still_announces_and_clears() {
        let bus = LoopbackBus::new();
        let listener = bus.endpoint();
        let runner = runner_with(PhaseBroadcaster::new(Arc::new(bus.endpoint()), Role::Host));
        let mut notifications = runner.subscribe();
        let effect = Arc::new(
            EffectDescriptor::builder("sticky")
                .on_deactivate(|| Err(EffectError::failed("stuck")))
                .build()
                .unwrap(),
        );

        let err = runner
            .run(effect, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ChaosError::EffectCallbackFailure {
                callback: CallbackKind::Deactivate,
                ..
            }
        ));
        assert!(!runner.is_active());

        assert!(notifications.recv().await.unwrap().is_started());
        assert!(!notifications.recv().await.unwrap().is_started());

        let phases: Vec<Phase> = [
            listener.recv_frame().await.unwrap().unwrap(),
            listener.recv_frame().await.unwrap().unwrap(),
            listener.recv_frame().await.unwrap().unwrap(),
        ]
        .iter()
        .map(|f| decode(f).unwrap().unwrap().phase)
        .collect();
        assert_eq!(phases, vec![Phase::Warn, Phase::Activate, Phase::Deactivate]);
    }

    /// Builds an effect whose `activate()` blocks until `runner` reports a
    /// teardown in progress, then returns `outcome`.
    fn activate_until_aborting(
        runner: &Arc<LifecycleRunner>,
        entered: std::sync::mpsc::Sender<()>,
        deactivations: &Arc<AtomicUsize>,
        outcome: fn() -> Result<(), EffectError>,
    ) -> Arc<EffectDescriptor> {
        let watched = Arc::downgrade(runner);
        let d = Arc::clone(deactivations);
        Arc::new(
            EffectDescriptor::builder("tornado")
                .on_activate(move || {
                    let _ = entered.send(());
                    let runner = watched.upgrade().unwrap();
                    while runner.state() != LifecycleState::Aborting {
                        std::thread::sleep(Duration::from_millis(1));
                    }
                    outcome()
                })
                .on_deactivate(move || {
                    d.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .build()
                .unwrap(),
        )
    }

    fn quick_runner(broadcaster: PhaseBroadcaster) -> Arc<LifecycleRunner> {
        Arc::new(LifecycleRunner::new(
            Arc::new(broadcaster),
            Arc::new(EventEmitter::noop()),
            LifecycleTiming {
                warning_delay: Duration::from_millis(10),
                ..LifecycleTiming::default()
            },
        ))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn teardown_during_activate_orders_started_before_ended() {
        let bus = LoopbackBus::new();
        let listener = bus.endpoint();
        let runner = quick_runner(PhaseBroadcaster::new(Arc::new(bus.endpoint()), Role::Host));
        let deactivations = Arc::new(AtomicUsize::new(0));
        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let effect = activate_until_aborting(&runner, entered_tx, &deactivations, || Ok(()));
        let mut notifications = runner.subscribe();

        let run = {
            let runner = Arc::clone(&runner);
            tokio::spawn(async move { runner.run(effect, &CancellationToken::new()).await })
        };
        let teardown = {
            let runner = Arc::clone(&runner);
            tokio::task::spawn_blocking(move || {
                entered_rx.recv().unwrap();
                runner.force_teardown()
            })
        };

        assert!(teardown.await.unwrap());
        assert_eq!(run.await.unwrap().unwrap(), RunOutcome::Cancelled);
        assert_eq!(deactivations.load(Ordering::SeqCst), 1);
        assert!(!runner.is_active());
        assert_eq!(runner.state(), LifecycleState::Idle);

        assert!(notifications.try_recv().unwrap().is_started());
        assert!(!notifications.try_recv().unwrap().is_started());
        assert!(notifications.try_recv().is_err());

        let warn = listener.recv_frame().await.unwrap().unwrap();
        assert_eq!(decode(&warn).unwrap().unwrap().phase, Phase::Warn);
        let more = tokio::time::timeout(Duration::from_millis(100), listener.recv_frame()).await;
        assert!(more.is_err(), "no activate frame after a teardown claimed the effect");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn teardown_skips_deactivate_when_pending_activate_fails() {
        let runner = quick_runner(PhaseBroadcaster::detached(Role::Host));
        let deactivations = Arc::new(AtomicUsize::new(0));
        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let effect = activate_until_aborting(&runner, entered_tx, &deactivations, || {
            Err(EffectError::Failed("no wind today".into()))
        });
        let mut notifications = runner.subscribe();

        let run = {
            let runner = Arc::clone(&runner);
            tokio::spawn(async move { runner.run(effect, &CancellationToken::new()).await })
        };
        let teardown = {
            let runner = Arc::clone(&runner);
            tokio::task::spawn_blocking(move || {
                entered_rx.recv().unwrap();
                runner.force_teardown()
            })
        };

        assert!(!teardown.await.unwrap());
        assert!(matches!(
            run.await.unwrap(),
            Err(ChaosError::EffectCallbackFailure { .. })
        ));
        assert_eq!(deactivations.load(Ordering::SeqCst), 0);
        assert_eq!(runner.state(), LifecycleState::Idle);
        assert!(notifications.try_recv().is_err());
    }

    #[test]
    fn teardown_swallows_panicking_deactivate() {
        let runner = silent_runner();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let effect = Arc::new(
            EffectDescriptor::builder("panicky")
                .on_deactivate(move || {
                    c.fetch_add(1, Ordering::SeqCst);
                    panic!("boom");
                })
                .build()
                .unwrap(),
        );

        runner.apply_activate_locally(&effect).unwrap();
        assert!(runner.force_teardown());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!runner.is_active());
        assert_eq!(runner.state(), LifecycleState::Idle);
    }

    #[test]
    fn local_apply_round_trip() {
        let runner = silent_runner();
        let mut notifications = runner.subscribe();
        let calls = Arc::new(Calls::default());
        let effect = counting_effect("coffee", &calls);

        runner.apply_activate_locally(&effect).unwrap();
        assert!(runner.is_active());
        assert!(runner.tick().unwrap());

        runner.apply_deactivate_locally(&effect).unwrap();
        assert!(!runner.is_active());
        assert!(!runner.tick().unwrap());

        assert_eq!(calls.activate.load(Ordering::SeqCst), 1);
        assert_eq!(calls.tick.load(Ordering::SeqCst), 1);
        assert_eq!(calls.deactivate.load(Ordering::SeqCst), 1);
        assert!(notifications.try_recv().unwrap().is_started());
        assert!(!notifications.try_recv().unwrap().is_started());
    }

    #[test]
    fn duplicate_deactivate_is_not_filtered() {
        let runner = silent_runner();
        let calls = Arc::new(Calls::default());
        let effect = counting_effect("coffee", &calls);

        runner.apply_activate_locally(&effect).unwrap();
        runner.apply_deactivate_locally(&effect).unwrap();
        runner.apply_deactivate_locally(&effect).unwrap();
        assert_eq!(calls.deactivate.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failed_local_activate_leaves_nothing_active() {
        let runner = silent_runner();
        let effect = Arc::new(
            EffectDescriptor::builder("broken")
                .on_activate(|| Err(EffectError::failed("nope")))
                .build()
                .unwrap(),
        );
        assert!(runner.apply_activate_locally(&effect).is_err());
        assert!(!runner.is_active());
        assert!(!runner.force_teardown());
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_only_between_activate_and_deactivate() {
        let runner = silent_runner();
        let active = Arc::new(AtomicBool::new(false));
        let violations = Arc::new(AtomicUsize::new(0));
        let ticks = Arc::new(AtomicUsize::new(0));

        let (a, d, t, v, n) = (
            Arc::clone(&active),
            Arc::clone(&active),
            Arc::clone(&active),
            Arc::clone(&violations),
            Arc::clone(&ticks),
        );
        let effect = Arc::new(
            EffectDescriptor::builder("magnet")
                .on_activate(move || {
                    a.store(true, Ordering::SeqCst);
                    Ok(())
                })
                .on_deactivate(move || {
                    d.store(false, Ordering::SeqCst);
                    Ok(())
                })
                .on_tick(move || {
                    if !t.load(Ordering::SeqCst) {
                        v.fetch_add(1, Ordering::SeqCst);
                    }
                    n.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .build()
                .unwrap(),
        );

        let cancel = CancellationToken::new();
        let ticker = runner.start_tick_task(Duration::from_millis(50), cancel.clone());
        runner.run(effect, &CancellationToken::new()).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();
        ticker.await.unwrap();

        assert_eq!(violations.load(Ordering::SeqCst), 0);
        let n = ticks.load(Ordering::SeqCst);
        assert!((150..=161).contains(&n), "expected ~160 ticks over 8s, got {n}");
    }

    #[test]
    fn tick_failure_is_reported() {
        let runner = silent_runner();
        let effect = Arc::new(
            EffectDescriptor::builder("bad_tick")
                .on_tick(|| Err(EffectError::failed("tick")))
                .build()
                .unwrap(),
        );
        runner.apply_activate_locally(&effect).unwrap();
        assert!(matches!(
            runner.tick(),
            Err(ChaosError::EffectCallbackFailure {
                callback: CallbackKind::Tick,
                ..
            })
        ));
        assert!(runner.is_active(), "tick failure does not end the effect");
    }
}
