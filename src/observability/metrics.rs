//! Metrics collection for `Mayhem`.
//!
//! Prometheus-compatible metrics with label cardinality protection and
//! typed convenience functions for recording measurements.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::MayhemError;

/// Guard to prevent double-initialization of the metrics recorder.
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Maximum length of an effect id used as a label.
const MAX_EFFECT_LABEL_LEN: usize = 64;

/// Frame kinds accepted as the `kind` label.
const KNOWN_FRAME_KINDS: [&str; 5] = ["warn", "activate", "deactivate", "malformed", "unknown_phase"];

/// Sanitizes an effect id for use as a metrics label.
///
/// Ids are supplied by extensions and by remote frames, so anything empty
/// or longer than [`MAX_EFFECT_LABEL_LEN`] is bucketed as `"__unknown__"`
/// and characters outside `[A-Za-z0-9_-]` become underscores.
#[must_use]
pub fn sanitize_effect_label(id: &str) -> String {
    if id.is_empty() || id.chars().count() > MAX_EFFECT_LABEL_LEN {
        return "__unknown__".to_string();
    }
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn sanitize_frame_kind(kind: &str) -> &str {
    if KNOWN_FRAME_KINDS.contains(&kind) {
        kind
    } else {
        "__unknown__"
    }
}

/// Initializes the global metrics recorder.
///
/// When `port` is `Some`, a Prometheus HTTP listener is started on
/// `127.0.0.1:<port>`. When `None`, the recorder is installed without an
/// HTTP endpoint.
///
/// # Errors
///
/// Returns `MayhemError::Io` if the recorder or HTTP listener cannot be
/// installed (e.g. port already in use).
pub fn init_metrics(port: Option<u16>) -> Result<(), MayhemError> {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        tracing::debug!("metrics already initialized, skipping");
        return Ok(());
    }
    port.map_or_else(
        || PrometheusBuilder::new().install_recorder().map(|_| ()),
        |p| {
            PrometheusBuilder::new()
                .with_http_listener(([127, 0, 0, 1], p))
                .install()
        },
    )
    .map_err(|e| MayhemError::Io(std::io::Error::other(e.to_string())))?;

    describe_metrics();
    Ok(())
}

fn describe_metrics() {
    describe_counter!(
        "mayhem_effects_started_total",
        "Effects that reached the active phase"
    );
    describe_counter!(
        "mayhem_cycles_skipped_total",
        "Scheduler cycles that did not start a run"
    );
    describe_counter!(
        "mayhem_frames_received_total",
        "Phase frames received by kind"
    );
    describe_counter!(
        "mayhem_broadcast_failures_total",
        "Phase frames the transport failed to send"
    );
    describe_counter!(
        "mayhem_callback_failures_total",
        "Effect callbacks that returned an error or panicked"
    );
    describe_gauge!("mayhem_effect_active", "1 while an effect is active");
    describe_histogram!(
        "mayhem_effect_hold_ms",
        "Time between activate and deactivate in milliseconds"
    );
}

/// Records an effect reaching the active phase.
pub fn record_effect_started(effect_id: &str) {
    counter!("mayhem_effects_started_total", "effect" => sanitize_effect_label(effect_id))
        .increment(1);
    gauge!("mayhem_effect_active").set(1.0);
}

/// Records an effect leaving the active phase after `held`.
pub fn record_effect_ended(held: Option<Duration>) {
    gauge!("mayhem_effect_active").set(0.0);
    if let Some(held) = held {
        histogram!("mayhem_effect_hold_ms").record(held.as_secs_f64() * 1000.0);
    }
}

/// Records a scheduler cycle that started nothing.
pub fn record_cycle_skipped(reason: &'static str) {
    counter!("mayhem_cycles_skipped_total", "reason" => reason).increment(1);
}

/// Records a received phase frame.
pub fn record_frame_received(kind: &str) {
    counter!("mayhem_frames_received_total", "kind" => sanitize_frame_kind(kind).to_owned())
        .increment(1);
}

/// Records a frame the transport could not send.
pub fn record_broadcast_failure() {
    counter!("mayhem_broadcast_failures_total").increment(1);
}

/// Records a failed effect callback.
pub fn record_callback_failure(callback: &'static str) {
    counter!("mayhem_callback_failures_total", "callback" => callback).increment(1);
}
