//! Session orchestration.
//!
//! A [`Session`] owns every moving part for the lifetime of one match: the
//! runner, the tick driver, the receiver pump and, on the host, the
//! scheduler loop. [`ChaosApi`] is the handle extensions hold across
//! sessions; it only works while a session is attached.

use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::schema::{MayhemConfig, Role};
use crate::effect::{EffectDescriptor, EffectId};
use crate::error::{ChaosError, RegistryError};
use crate::lifecycle::{LifecycleNotification, LifecycleRunner};
use crate::observability::{Event, EventEmitter, StopReason};
use crate::presentation::{Presenter, TracingPresenter};
use crate::protocol::{PhaseBroadcaster, PhaseReceiver};
use crate::registry::EffectRegistry;
use crate::scheduler::ChaosScheduler;
use crate::selector::WeightedSelector;
use crate::transport::PhaseTransport;

// ============================================================================
// ChaosApi
// ============================================================================

struct Attached {
    registry: Arc<EffectRegistry>,
    runner: Arc<LifecycleRunner>,
}

/// Registration and query handle for extensions.
///
/// Cheap to clone. Outlives sessions: it is attached when a session starts
/// and detached when it stops.
#[derive(Clone, Default)]
pub struct ChaosApi {
    inner: Arc<RwLock<Option<Attached>>>,
}

impl ChaosApi {
    /// Creates a detached handle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a session is currently attached.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.read().is_some()
    }

    /// Registers an effect with the running session.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::NotReady`] when no session is attached; retry when
    ///   the next session starts.
    /// - [`RegistryError::InvalidArgument`] for an unusable descriptor.
    pub fn register(
        &self,
        descriptor: impl Into<Arc<EffectDescriptor>>,
    ) -> Result<EffectId, RegistryError> {
        let registry = self
            .read()
            .as_ref()
            .map(|a| Arc::clone(&a.registry))
            .ok_or(RegistryError::NotReady)?;
        registry.register(descriptor)
    }

    /// The effect currently active, if any.
    #[must_use]
    pub fn active_effect(&self) -> Option<Arc<EffectDescriptor>> {
        self.read().as_ref().and_then(|a| a.runner.active_effect())
    }

    /// Whether an effect is currently active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.read().as_ref().is_some_and(|a| a.runner.is_active())
    }

    /// Subscribes to Started/Ended notifications of the attached session.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotReady`] when no session is attached.
    pub fn subscribe(&self) -> Result<broadcast::Receiver<LifecycleNotification>, RegistryError> {
        self.read()
            .as_ref()
            .map(|a| a.runner.subscribe())
            .ok_or(RegistryError::NotReady)
    }

    fn attach(&self, registry: Arc<EffectRegistry>, runner: Arc<LifecycleRunner>) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) =
            Some(Attached { registry, runner });
    }

    fn detach(&self) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Option<Attached>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ChaosApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChaosApi")
            .field("attached", &self.is_attached())
            .finish()
    }
}

// ============================================================================
// Session
// ============================================================================

/// Collaborators a session is wired to.
pub struct SessionContext {
    /// Phase transport; `None` runs a purely local session.
    pub transport: Option<Arc<dyn PhaseTransport>>,
    /// Where received announcements are shown.
    pub presenter: Arc<dyn Presenter>,
    /// Structured event sink.
    pub events: Arc<EventEmitter>,
    /// Receives ordinary (non-phase) messages read from the transport.
    pub passthrough: Option<mpsc::UnboundedSender<String>>,
    /// Extension handle to attach for the session's lifetime.
    pub api: Option<ChaosApi>,
}

impl Default for SessionContext {
    fn default() -> Self {
        Self {
            transport: None,
            presenter: Arc::new(TracingPresenter),
            events: Arc::new(EventEmitter::noop()),
            passthrough: None,
            api: None,
        }
    }
}

/// One running chaos session.
pub struct Session {
    id: Uuid,
    role: Role,
    registry: Arc<EffectRegistry>,
    runner: Arc<LifecycleRunner>,
    scheduler: Option<Arc<ChaosScheduler>>,
    scheduler_task: Option<JoinHandle<Result<(), ChaosError>>>,
    receiver_task: Option<JoinHandle<()>>,
    tick_task: Option<JoinHandle<()>>,
    transport: Option<Arc<dyn PhaseTransport>>,
    api: Option<ChaosApi>,
    events: Arc<EventEmitter>,
    cancel: CancellationToken,
    stopped: bool,
}

/// What ended [`Session::run_until`].
enum Ended {
    Requested(StopReason),
    SchedulerStopped(Result<Result<(), ChaosError>, JoinError>),
    TransportClosed,
}

impl Session {
    /// Wires and starts a session. Must be called inside a Tokio runtime.
    ///
    /// The scheduler is started only for the host with `chaos.enabled`;
    /// the tick driver and, given a transport, the receiver pump run for
    /// both roles.
    #[must_use]
    pub fn start(
        config: &MayhemConfig,
        registry: Arc<EffectRegistry>,
        context: SessionContext,
    ) -> Self {
        let id = Uuid::new_v4();
        let role = config.session.role;
        let cancel = CancellationToken::new();
        let SessionContext {
            transport,
            presenter,
            events,
            passthrough,
            api,
        } = context;

        let broadcaster = Arc::new(match &transport {
            Some(t) => PhaseBroadcaster::new(Arc::clone(t), role),
            None => PhaseBroadcaster::detached(role),
        });
        let runner = Arc::new(LifecycleRunner::new(
            broadcaster,
            Arc::clone(&events),
            config.chaos.lifecycle_timing(),
        ));

        let tick_task = runner.start_tick_task(config.chaos.tick_interval, cancel.child_token());

        let receiver_task = transport.as_ref().map(|t| {
            let receiver = Arc::new(PhaseReceiver::new(
                role,
                Arc::clone(&registry),
                Arc::clone(&runner),
                presenter,
                Arc::clone(&events),
            ));
            receiver.start(Arc::clone(t), cancel.child_token(), passthrough)
        });

        let scheduler = (role.is_authoritative() && config.chaos.enabled).then(|| {
            Arc::new(ChaosScheduler::new(
                Arc::clone(&registry),
                Arc::new(WeightedSelector::new(config.chaos.seed)),
                Arc::clone(&runner),
                Arc::clone(&events),
                config.chaos.scheduler_timing(),
                config.chaos.anti_repeat,
            ))
        });
        let scheduler_task = scheduler.as_ref().map(ChaosScheduler::start);

        if let Some(api) = &api {
            api.attach(Arc::clone(&registry), Arc::clone(&runner));
        }

        info!(
            session = %id,
            role = %role,
            effects = registry.len(),
            scheduler = scheduler.is_some(),
            "chaos session started"
        );
        events.emit(Event::SessionStarted {
            timestamp: Utc::now(),
            session_id: id,
            role,
            effects: registry.len(),
            scheduler: scheduler.is_some(),
        });

        Self {
            id,
            role,
            registry,
            runner,
            scheduler,
            scheduler_task,
            receiver_task,
            tick_task: Some(tick_task),
            transport,
            api,
            events,
            cancel,
            stopped: false,
        }
    }

    /// Unique id of this session.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Role of this participant.
    #[must_use]
    pub const fn role(&self) -> Role {
        self.role
    }

    /// The session's registry.
    #[must_use]
    pub const fn registry(&self) -> &Arc<EffectRegistry> {
        &self.registry
    }

    /// The session's lifecycle runner.
    #[must_use]
    pub const fn runner(&self) -> &Arc<LifecycleRunner> {
        &self.runner
    }

    /// The scheduler, on a host with chaos enabled.
    #[must_use]
    pub const fn scheduler(&self) -> Option<&Arc<ChaosScheduler>> {
        self.scheduler.as_ref()
    }

    /// Runs until `stop` resolves, the scheduler stops on an error, or (on
    /// a follower) the transport closes; then shuts down.
    ///
    /// Returns the reason the session stopped.
    ///
    /// # Errors
    ///
    /// Returns the scheduler's error when an effect callback failure ended
    /// the loop.
    pub async fn run_until<F>(&mut self, stop: F) -> Result<StopReason, ChaosError>
    where
        F: Future<Output = StopReason>,
    {
        let follows_transport = !self.role.is_authoritative();
        let scheduler_task = &mut self.scheduler_task;
        let receiver_task = &mut self.receiver_task;

        let ended = tokio::select! {
            reason = stop => Ended::Requested(reason),
            joined = join_some(scheduler_task) => Ended::SchedulerStopped(joined),
            _ = join_some(receiver_task), if follows_transport => Ended::TransportClosed,
        };

        match ended {
            Ended::Requested(reason) => {
                self.shutdown(reason).await?;
                Ok(reason)
            }
            Ended::TransportClosed => {
                self.receiver_task = None;
                self.shutdown(StopReason::Shutdown).await?;
                Ok(StopReason::Shutdown)
            }
            Ended::SchedulerStopped(joined) => {
                self.scheduler_task = None;
                let result = flatten(joined);
                let reason = if result.is_ok() {
                    StopReason::Shutdown
                } else {
                    StopReason::Error
                };
                let shutdown = self.shutdown(reason).await;
                result.and(shutdown).map(|()| reason)
            }
        }
    }

    /// Stops every task, tears down any active effect, closes the
    /// transport and detaches the API. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns the scheduler's error if it had stopped on one.
    pub async fn shutdown(&mut self, reason: StopReason) -> Result<(), ChaosError> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;
        debug!(session = %self.id, ?reason, "chaos session stopping");

        if let Some(scheduler) = &self.scheduler {
            scheduler.shutdown();
        }
        self.cancel.cancel();

        let mut result = Ok(());
        if let Some(task) = self.scheduler_task.take() {
            result = flatten(task.await);
        }
        for task in [self.receiver_task.take(), self.tick_task.take()]
            .into_iter()
            .flatten()
        {
            if let Err(e) = task.await {
                warn!(error = %e, "session task ended abnormally");
            }
        }

        if self.runner.force_teardown() {
            info!("active effect torn down at session end");
        }

        if let Some(transport) = &self.transport {
            if let Err(e) = transport.close().await {
                warn!(error = %e, "closing transport failed");
            }
        }

        if let Some(api) = &self.api {
            api.detach();
        }

        info!(session = %self.id, ?reason, "chaos session stopped");
        self.events.emit(Event::SessionStopped {
            timestamp: Utc::now(),
            session_id: self.id,
            reason,
        });
        result
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.stopped {
            self.cancel.cancel();
            if let Some(scheduler) = &self.scheduler {
                scheduler.shutdown();
            }
            self.runner.force_teardown();
            if let Some(api) = &self.api {
                api.detach();
            }
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("scheduler", &self.scheduler.is_some())
            .field("stopped", &self.stopped)
            .finish_non_exhaustive()
    }
}

/// Awaits the task if there is one; pending forever otherwise.
async fn join_some<T>(task: &mut Option<JoinHandle<T>>) -> Result<T, JoinError> {
    match task {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

fn flatten(joined: Result<Result<(), ChaosError>, JoinError>) -> Result<(), ChaosError> {
    joined.map_err(|e| ChaosError::TaskFailed(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EffectError;
    use crate::lifecycle::LifecycleState;
    use crate::transport::loopback::LoopbackBus;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct Counters {
        activated: AtomicUsize,
        deactivated: AtomicUsize,
    }

    fn counted(id: &str, counters: &Arc<Counters>) -> EffectDescriptor {
        let on = Arc::clone(counters);
        let off = Arc::clone(counters);
        EffectDescriptor::builder(id)
            .on_activate(move || {
                on.activated.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .on_deactivate(move || {
                off.deactivated.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .build()
            .unwrap()
    }

    fn fast_config(role: Role) -> MayhemConfig {
        let mut config = MayhemConfig::default();
        config.session.role = role;
        config.chaos.grace_period = Duration::from_secs(1);
        config.chaos.interval_min = Duration::from_secs(2);
        config.chaos.interval_max = Duration::from_secs(2);
        config.chaos.warning_delay = Duration::from_secs(1);
        config.chaos.duration = Duration::from_secs(5);
        config.chaos.seed = Some(1);
        config
    }

    #[tokio::test(start_paused = true)]
    async fn test_api_not_ready_without_session() {
        let api = ChaosApi::new();
        let effect = EffectDescriptor::builder("late").build().unwrap();
        assert_eq!(api.register(effect), Err(RegistryError::NotReady));
        assert!(api.subscribe().is_err());
        assert!(!api.is_active());
        assert!(api.active_effect().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_api_attached_for_session_lifetime() {
        let api = ChaosApi::new();
        let registry = Arc::new(EffectRegistry::new());
        let mut session = Session::start(
            &fast_config(Role::Host),
            Arc::clone(&registry),
            SessionContext {
                api: Some(api.clone()),
                ..SessionContext::default()
            },
        );

        assert!(api.is_attached());
        let id = api
            .register(EffectDescriptor::builder("late").build().unwrap())
            .unwrap();
        assert_eq!(id.as_str(), "late");
        assert_eq!(registry.len(), 1);

        session.shutdown(StopReason::Shutdown).await.unwrap();
        assert!(!api.is_attached());
        assert_eq!(
            api.register(EffectDescriptor::builder("later").build().unwrap()),
            Err(RegistryError::NotReady)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_host_runs_scheduler_follower_does_not() {
        let host = Session::start(
            &fast_config(Role::Host),
            Arc::new(EffectRegistry::new()),
            SessionContext::default(),
        );
        let follower = Session::start(
            &fast_config(Role::Follower),
            Arc::new(EffectRegistry::new()),
            SessionContext::default(),
        );
        assert!(host.scheduler().is_some());
        assert!(follower.scheduler().is_none());

        let mut disabled = fast_config(Role::Host);
        disabled.chaos.enabled = false;
        let quiet = Session::start(&disabled, Arc::new(EffectRegistry::new()), SessionContext::default());
        assert!(quiet.scheduler().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_follower_mirrors_host_over_loopback() {
        let bus = LoopbackBus::new();
        let host_counters = Arc::new(Counters::default());
        let follower_counters = Arc::new(Counters::default());

        let host_registry = Arc::new(EffectRegistry::new());
        host_registry.register(counted("tornado", &host_counters)).unwrap();
        let follower_registry = Arc::new(EffectRegistry::new());
        follower_registry
            .register(counted("tornado", &follower_counters))
            .unwrap();

        let mut host = Session::start(
            &fast_config(Role::Host),
            host_registry,
            SessionContext {
                transport: Some(Arc::new(bus.endpoint())),
                ..SessionContext::default()
            },
        );
        let mut follower = Session::start(
            &fast_config(Role::Follower),
            follower_registry,
            SessionContext {
                transport: Some(Arc::new(bus.endpoint())),
                ..SessionContext::default()
            },
        );

        // grace 1s + interval 2s + warning 1s = activation at 4s
        tokio::time::sleep(Duration::from_millis(4_500)).await;
        assert_eq!(host_counters.activated.load(Ordering::SeqCst), 1);
        assert_eq!(follower_counters.activated.load(Ordering::SeqCst), 1);
        assert_eq!(follower.runner().state(), LifecycleState::Active);

        // hold 5s
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(host_counters.deactivated.load(Ordering::SeqCst), 1);
        assert_eq!(follower_counters.deactivated.load(Ordering::SeqCst), 1);
        assert!(!follower.runner().is_active());

        host.shutdown(StopReason::Shutdown).await.unwrap();
        follower.shutdown(StopReason::Shutdown).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_tears_down_active_effect() {
        let counters = Arc::new(Counters::default());
        let registry = Arc::new(EffectRegistry::new());
        registry.register(counted("fog", &counters)).unwrap();

        let mut session = Session::start(&fast_config(Role::Host), registry, SessionContext::default());
        tokio::time::sleep(Duration::from_millis(4_500)).await;
        assert!(session.runner().is_active());

        session.shutdown(StopReason::Interrupted).await.unwrap();
        assert_eq!(counters.activated.load(Ordering::SeqCst), 1);
        assert_eq!(counters.deactivated.load(Ordering::SeqCst), 1);
        assert!(!session.runner().is_active());

        // second shutdown is a no-op
        session.shutdown(StopReason::Shutdown).await.unwrap();
        assert_eq!(counters.deactivated.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_until_returns_requested_reason() {
        let mut session = Session::start(
            &fast_config(Role::Host),
            Arc::new(EffectRegistry::new()),
            SessionContext::default(),
        );
        let reason = session
            .run_until(async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                StopReason::Terminated
            })
            .await
            .unwrap();
        assert_eq!(reason, StopReason::Terminated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_until_surfaces_callback_failure() {
        let registry = Arc::new(EffectRegistry::new());
        registry
            .register(
                EffectDescriptor::builder("broken")
                    .on_activate(|| Err(EffectError::failed("no physics")))
                    .build()
                    .unwrap(),
            )
            .unwrap();

        let mut session = Session::start(&fast_config(Role::Host), registry, SessionContext::default());
        let err = session
            .run_until(std::future::pending())
            .await
            .unwrap_err();
        assert!(matches!(err, ChaosError::EffectCallbackFailure { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_follower_stops_when_transport_closes() {
        let bus = LoopbackBus::new();
        let endpoint = Arc::new(bus.endpoint());
        let mut session = Session::start(
            &fast_config(Role::Follower),
            Arc::new(EffectRegistry::new()),
            SessionContext {
                transport: Some(Arc::clone(&endpoint) as Arc<dyn PhaseTransport>),
                ..SessionContext::default()
            },
        );

        let closer = Arc::clone(&endpoint);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            closer.close().await.unwrap();
        });

        let reason = session.run_until(std::future::pending()).await.unwrap();
        assert_eq!(reason, StopReason::Shutdown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_events() {
        let writer = crate::observability::events::tests::TestWriter::default();
        let events = Arc::new(EventEmitter::new(Box::new(writer.clone())));
        let mut session = Session::start(
            &fast_config(Role::Follower),
            Arc::new(EffectRegistry::new()),
            SessionContext {
                events,
                ..SessionContext::default()
            },
        );
        session.shutdown(StopReason::Shutdown).await.unwrap();

        let lines = writer.lines();
        assert_eq!(lines[0]["type"], "SessionStarted");
        assert_eq!(lines[0]["role"], "follower");
        assert_eq!(lines[0]["scheduler"], false);
        assert_eq!(lines.last().unwrap()["type"], "SessionStopped");
        assert_eq!(lines.last().unwrap()["reason"], "shutdown");
    }
}
