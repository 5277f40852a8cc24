//! `run` command
//!
//! Runs one chaos session over stdio: the host writes phase frames to
//! stdout, both roles read frames from stdin. Ordinary stdin lines are
//! logged as chat.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::cli::args::RunArgs;
use crate::config::schema::MayhemConfig;
use crate::effects::catalog;
use crate::error::MayhemError;
use crate::observability::{EventEmitter, StopReason};
use crate::presentation::{ConsolePresenter, Presenter, TracingPresenter};
use crate::registry::EffectRegistry;
use crate::session::{Session, SessionContext};
use crate::transport::{PhaseTransport, StdioTransport};

/// Run a chaos session until interrupted or, on a follower, until stdin
/// closes.
///
/// # Errors
///
/// Returns a configuration, I/O or chaos engine error.
pub async fn run(args: &RunArgs) -> Result<(), MayhemError> {
    if let Some(port) = args.metrics_port {
        crate::observability::init_metrics(Some(port))?;
        tracing::info!(port, "Prometheus metrics endpoint started");
    }

    let loaded = super::load_config(args.config.as_deref())?;
    let config = apply_overrides(&loaded, args);

    let registry = Arc::new(EffectRegistry::new());
    catalog::register_builtins(&registry, &config)?;

    let events = Arc::new(match &args.events_file {
        Some(path) => EventEmitter::from_file(path)?,
        None => EventEmitter::stderr(),
    });

    let presenter: Arc<dyn Presenter> = if config.announcer.enabled {
        Arc::new(ConsolePresenter::stderr(Some(config.announcer.name.clone())))
    } else {
        Arc::new(TracingPresenter)
    };

    let transport: Arc<dyn PhaseTransport> = Arc::new(StdioTransport::new());

    let (chat_tx, mut chat_rx) = mpsc::unbounded_channel::<String>();
    let chat = tokio::spawn(async move {
        while let Some(line) = chat_rx.recv().await {
            tracing::info!(target: "mayhem::chat", message = %line, "chat");
        }
    });

    let mut session = Session::start(
        &config,
        registry,
        SessionContext {
            transport: Some(transport),
            presenter,
            events,
            passthrough: Some(chat_tx),
            api: None,
        },
    );

    let reason = session.run_until(shutdown_signal()).await?;
    drop(session);
    let _ = chat.await;

    tracing::info!(?reason, "session finished");
    Ok(())
}

/// Applies command-line overrides on top of the loaded configuration.
fn apply_overrides(loaded: &MayhemConfig, args: &RunArgs) -> MayhemConfig {
    let mut config = loaded.clone();
    if let Some(role) = args.role {
        config.session.role = role;
    }
    if let Some(seed) = args.seed {
        config.chaos.seed = Some(seed);
    }
    config
}

/// Resolves on the first SIGINT or SIGTERM.
async fn shutdown_signal() -> StopReason {
    let mut sigterm =
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(signal) => signal,
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable; listening for Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
                return StopReason::Interrupted;
            }
        };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => StopReason::Interrupted,
        _ = sigterm.recv() => StopReason::Terminated,
    }
}
