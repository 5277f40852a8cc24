//! Chaos scheduler loop.
//!
//! Authoritative side only. After a grace period the loop wakes at random
//! intervals and, if nothing is running, selects an effect and hands it to
//! the lifecycle runner as a tracked task. Cycles that land during a run
//! are skipped rather than queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::effect::{EffectDescriptor, EffectId};
use crate::error::ChaosError;
use crate::lifecycle::{LifecycleRunner, LifecycleState, RunOutcome};
use crate::observability::{Event, EventEmitter, metrics};
use crate::registry::EffectRegistry;
use crate::selector::WeightedSelector;

type RunHandle = JoinHandle<Result<RunOutcome, ChaosError>>;

/// Horizon used when a drawn interval overflows `Instant` (about 30 years).
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Timing of the scheduler loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerTiming {
    /// Quiet period after the loop starts.
    pub grace_period: Duration,
    /// Lower bound of the randomized wait between cycles.
    pub interval_min: Duration,
    /// Upper bound of the randomized wait between cycles.
    pub interval_max: Duration,
}

impl Default for SchedulerTiming {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(15),
            interval_min: Duration::from_secs(20),
            interval_max: Duration::from_secs(45),
        }
    }
}

/// Periodically selects and runs chaos effects.
pub struct ChaosScheduler {
    registry: Arc<EffectRegistry>,
    selector: Arc<WeightedSelector>,
    runner: Arc<LifecycleRunner>,
    events: Arc<EventEmitter>,
    timing: SchedulerTiming,
    anti_repeat: bool,
    last_effect: Mutex<Option<EffectId>>,
    running: AtomicBool,
    cancel: CancellationToken,
}

impl ChaosScheduler {
    /// Creates a scheduler. Nothing happens until [`start`](Self::start).
    #[must_use]
    pub fn new(
        registry: Arc<EffectRegistry>,
        selector: Arc<WeightedSelector>,
        runner: Arc<LifecycleRunner>,
        events: Arc<EventEmitter>,
        timing: SchedulerTiming,
        anti_repeat: bool,
    ) -> Self {
        Self {
            registry,
            selector,
            runner,
            events,
            timing,
            anti_repeat,
            last_effect: Mutex::new(None),
            running: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    /// Whether the loop task is alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// The most recently selected effect.
    #[must_use]
    pub fn last_effect(&self) -> Option<EffectId> {
        self.last_effect
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Scheduler timing.
    #[must_use]
    pub const fn timing(&self) -> &SchedulerTiming {
        &self.timing
    }

    /// Spawns the loop.
    ///
    /// The handle resolves to `Ok(())` after [`shutdown`](Self::shutdown),
    /// or to the error that stopped the loop (an effect callback failure).
    /// Either way the active effect, if any, has been torn down by then.
    pub fn start(self: &Arc<Self>) -> JoinHandle<Result<(), ChaosError>> {
        let scheduler = Arc::clone(self);
        scheduler.running.store(true, Ordering::SeqCst);
        tokio::spawn(async move {
            info!(
                grace = ?scheduler.timing.grace_period,
                min = ?scheduler.timing.interval_min,
                max = ?scheduler.timing.interval_max,
                "chaos scheduler started"
            );
            let result = scheduler.cycle_until_cancelled().await;
            scheduler.runner.force_teardown();
            scheduler.running.store(false, Ordering::SeqCst);
            match &result {
                Ok(()) => info!("chaos scheduler stopped"),
                Err(e) => error!(error = %e, "chaos scheduler stopped on error"),
            }
            result
        })
    }

    /// Stops the loop; an in-flight run is cancelled and its effect torn down.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Selects one effect and runs it to completion, bypassing the timer.
    ///
    /// # Errors
    ///
    /// - [`ChaosError::NoEligibleEffects`] if nothing can be selected.
    /// - Any error of [`LifecycleRunner::run`].
    pub async fn trigger_cycle(&self) -> Result<RunOutcome, ChaosError> {
        let effect = self.pick()?;
        self.runner.run(effect, &self.cancel).await
    }

    /// Picks the next effect, honouring anti-repeat, and records it.
    fn pick(&self) -> Result<Arc<EffectDescriptor>, ChaosError> {
        let mut last = self
            .last_effect
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let excluding = if self.anti_repeat { last.as_ref() } else { None };
        let pool = self.registry.eligible_pool(excluding);
        let effect = self.selector.select(&pool)?;
        *last = Some(effect.id().clone());
        drop(last);
        debug!(effect = %effect.id(), pool = pool.len(), "effect selected");
        Ok(effect)
    }

    async fn cycle_until_cancelled(&self) -> Result<(), ChaosError> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Ok(()),
            () = tokio::time::sleep(self.timing.grace_period) => {}
        }

        let mut in_flight: Option<RunHandle> = None;
        let mut next_cycle = self.next_deadline();

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                joined = join_run(&mut in_flight), if in_flight.is_some() => {
                    in_flight = None;
                    check_run(joined)?;
                }
                () = tokio::time::sleep_until(next_cycle) => {
                    next_cycle = self.next_deadline();
                    self.on_cycle(&mut in_flight);
                }
            }
        }

        if let Some(handle) = in_flight {
            if let Err(e) = check_run(handle.await) {
                warn!(error = %e, "in-flight run failed during shutdown");
            }
        }
        Ok(())
    }

    fn on_cycle(&self, in_flight: &mut Option<RunHandle>) {
        if in_flight.is_some() || self.runner.state() != LifecycleState::Idle {
            debug!("chaos already running; cycle skipped");
            self.skip("busy");
            return;
        }

        match self.pick() {
            Ok(effect) => {
                let runner = Arc::clone(&self.runner);
                let cancel = self.cancel.clone();
                *in_flight = Some(tokio::spawn(async move { runner.run(effect, &cancel).await }));
            }
            Err(e) => {
                warn!(error = %e, "cycle skipped");
                self.skip("no_eligible_effects");
            }
        }
    }

    fn skip(&self, reason: &'static str) {
        metrics::record_cycle_skipped(reason);
        self.events.emit(Event::CycleSkipped {
            timestamp: Utc::now(),
            reason: reason.to_owned(),
        });
    }

    /// Deadline of the next cycle. Intervals past what `Instant` can
    /// represent park the loop [`FAR_FUTURE`] out instead.
    fn next_deadline(&self) -> Instant {
        let now = Instant::now();
        now.checked_add(self.draw_interval())
            .unwrap_or_else(|| now + FAR_FUTURE)
    }

    fn draw_interval(&self) -> Duration {
        let interval = self
            .selector
            .draw_interval(self.timing.interval_min, self.timing.interval_max);
        debug!(?interval, "next chaos cycle scheduled");
        interval
    }
}

impl std::fmt::Debug for ChaosScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChaosScheduler")
            .field("timing", &self.timing)
            .field("anti_repeat", &self.anti_repeat)
            .field("running", &self.is_running())
            .field("last_effect", &self.last_effect())
            .finish_non_exhaustive()
    }
}

async fn join_run(
    in_flight: &mut Option<RunHandle>,
) -> Result<Result<RunOutcome, ChaosError>, JoinError> {
    match in_flight {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

/// Surfaces the failures that must stop the loop.
fn check_run(joined: Result<Result<RunOutcome, ChaosError>, JoinError>) -> Result<(), ChaosError> {
    match joined {
        Ok(Ok(outcome)) => {
            debug!(?outcome, "run finished");
            Ok(())
        }
        Ok(Err(e @ ChaosError::EffectCallbackFailure { .. })) => Err(e),
        Ok(Err(e)) => {
            warn!(error = %e, "run did not start");
            Ok(())
        }
        Err(e) => Err(ChaosError::TaskFailed(e.to_string())),
    }
}
