//! Effect descriptors.
//!
//! An effect is metadata plus three callbacks. The core never looks inside
//! the callbacks; it only guarantees when they are called:
//! `activate` once, `on_tick` zero or more times, then `deactivate` once.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::error::{EffectError, RegistryError};

/// Callback signature shared by `activate`, `deactivate` and `on_tick`.
pub type EffectCallback = Arc<dyn Fn() -> Result<(), EffectError> + Send + Sync>;

/// Field delimiter of the phase wire frame; forbidden in effect ids.
pub const ID_DELIMITER: char = '|';

/// Stable wire identifier of an effect.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct EffectId(String);

impl EffectId {
    /// Creates an `EffectId` from a string.
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EffectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EffectId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Live-tunable selection knobs of an effect.
///
/// Read at selection time, so a configuration reload can retune or disable
/// an effect without touching the registry. The weight is stored as `f64`
/// bits in an `AtomicU64`.
#[derive(Debug)]
pub struct EffectKnobs {
    enabled: AtomicBool,
    weight_bits: AtomicU64,
}

impl EffectKnobs {
    /// Creates knobs with the given initial values.
    ///
    /// A non-finite or negative weight is stored as `0.0`.
    #[must_use]
    pub fn new(enabled: bool, weight: f64) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            weight_bits: AtomicU64::new(sanitize_weight(weight).to_bits()),
        }
    }

    /// Returns whether the effect is currently enabled.
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Enables or disables the effect.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Returns the current relative weight.
    #[must_use]
    pub fn weight(&self) -> f64 {
        f64::from_bits(self.weight_bits.load(Ordering::SeqCst))
    }

    /// Sets the relative weight. Non-finite or negative values become `0.0`.
    pub fn set_weight(&self, weight: f64) {
        self.weight_bits
            .store(sanitize_weight(weight).to_bits(), Ordering::SeqCst);
    }

    /// Returns `true` when the effect may currently be selected.
    #[must_use]
    pub fn is_eligible(&self) -> bool {
        self.enabled() && self.weight() > 0.0
    }
}

impl Default for EffectKnobs {
    fn default() -> Self {
        Self::new(true, 1.0)
    }
}

fn sanitize_weight(weight: f64) -> f64 {
    if weight.is_finite() && weight > 0.0 {
        weight
    } else {
        0.0
    }
}

/// A registered chaos effect.
///
/// Cheap to share: the registry hands out `Arc<EffectDescriptor>`.
pub struct EffectDescriptor {
    id: EffectId,
    display_name: String,
    warn_text: String,
    activate_text: String,
    knobs: Arc<EffectKnobs>,
    on_activate: EffectCallback,
    on_deactivate: EffectCallback,
    on_tick: Option<EffectCallback>,
}

impl EffectDescriptor {
    /// Starts building a descriptor with the given display name.
    #[must_use]
    pub fn builder(display_name: impl Into<String>) -> EffectBuilder {
        EffectBuilder::new(display_name)
    }

    /// Wire identifier.
    #[must_use]
    pub const fn id(&self) -> &EffectId {
        &self.id
    }

    /// Human-readable name.
    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Teaser shown when the warning phase begins.
    #[must_use]
    pub fn warn_text(&self) -> &str {
        &self.warn_text
    }

    /// Announcement shown when the effect activates.
    #[must_use]
    pub fn activate_text(&self) -> &str {
        &self.activate_text
    }

    /// Shared handle to the live selection knobs.
    #[must_use]
    pub const fn knobs(&self) -> &Arc<EffectKnobs> {
        &self.knobs
    }

    /// Current relative weight.
    #[must_use]
    pub fn weight(&self) -> f64 {
        self.knobs.weight()
    }

    /// Whether the effect is currently enabled.
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.knobs.enabled()
    }

    /// Invokes the `activate` callback.
    ///
    /// # Errors
    ///
    /// Returns whatever the callback reports.
    pub fn activate(&self) -> Result<(), EffectError> {
        (self.on_activate)()
    }

    /// Invokes the `deactivate` callback.
    ///
    /// # Errors
    ///
    /// Returns whatever the callback reports.
    pub fn deactivate(&self) -> Result<(), EffectError> {
        (self.on_deactivate)()
    }

    /// Invokes the `on_tick` callback, if any.
    ///
    /// # Errors
    ///
    /// Returns whatever the callback reports.
    pub fn tick(&self) -> Result<(), EffectError> {
        self.on_tick.as_ref().map_or(Ok(()), |tick| tick())
    }

    /// Checks the invariants the registry and the wire format depend on.
    pub(crate) fn validate(&self) -> Result<(), RegistryError> {
        let id = self.id.as_str();
        if id.trim().is_empty() {
            return Err(RegistryError::InvalidArgument(
                "effect needs a non-empty id or display name".to_string(),
            ));
        }
        if id.contains(ID_DELIMITER) {
            return Err(RegistryError::InvalidArgument(format!(
                "effect id '{id}' must not contain '{ID_DELIMITER}'"
            )));
        }
        for (field, value) in [
            ("id", id),
            ("display_name", self.display_name.as_str()),
            ("warn_text", self.warn_text.as_str()),
            ("activate_text", self.activate_text.as_str()),
        ] {
            if value.contains(['\n', '\r']) {
                return Err(RegistryError::InvalidArgument(format!(
                    "{field} of effect '{id}' must be a single line"
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for EffectDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectDescriptor")
            .field("id", &self.id)
            .field("display_name", &self.display_name)
            .field("enabled", &self.enabled())
            .field("weight", &self.weight())
            .field("has_tick", &self.on_tick.is_some())
            .finish_non_exhaustive()
    }
}

/// Builder for [`EffectDescriptor`].
///
/// Callbacks default to no-ops, so metadata-only effects are valid.
pub struct EffectBuilder {
    id: Option<String>,
    display_name: String,
    warn_text: Option<String>,
    activate_text: Option<String>,
    weight: f64,
    enabled: bool,
    knobs: Option<Arc<EffectKnobs>>,
    on_activate: Option<EffectCallback>,
    on_deactivate: Option<EffectCallback>,
    on_tick: Option<EffectCallback>,
}

impl EffectBuilder {
    fn new(display_name: impl Into<String>) -> Self {
        Self {
            id: None,
            display_name: display_name.into(),
            warn_text: None,
            activate_text: None,
            weight: 1.0,
            enabled: true,
            knobs: None,
            on_activate: None,
            on_deactivate: None,
            on_tick: None,
        }
    }

    /// Sets the wire id. Defaults to the display name.
    #[must_use]
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Sets the warning text. Defaults to `"<name> incoming!"`.
    #[must_use]
    pub fn warn_text(mut self, text: impl Into<String>) -> Self {
        self.warn_text = Some(text.into());
        self
    }

    /// Sets the activation text. Defaults to `"<name>!"`.
    #[must_use]
    pub fn activate_text(mut self, text: impl Into<String>) -> Self {
        self.activate_text = Some(text.into());
        self
    }

    /// Sets the initial weight (ignored when [`knobs`](Self::knobs) is used).
    #[must_use]
    pub fn weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    /// Sets the initial enabled flag (ignored when [`knobs`](Self::knobs) is used).
    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Shares an existing knobs handle, typically owned by configuration.
    #[must_use]
    pub fn knobs(mut self, knobs: Arc<EffectKnobs>) -> Self {
        self.knobs = Some(knobs);
        self
    }

    /// Sets the `activate` callback.
    #[must_use]
    pub fn on_activate<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Result<(), EffectError> + Send + Sync + 'static,
    {
        self.on_activate = Some(Arc::new(f));
        self
    }

    /// Sets the `deactivate` callback.
    #[must_use]
    pub fn on_deactivate<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Result<(), EffectError> + Send + Sync + 'static,
    {
        self.on_deactivate = Some(Arc::new(f));
        self
    }

    /// Sets the optional per-tick callback.
    #[must_use]
    pub fn on_tick<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Result<(), EffectError> + Send + Sync + 'static,
    {
        self.on_tick = Some(Arc::new(f));
        self
    }

    /// Finishes the descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidArgument`] when the id is blank,
    /// contains the frame delimiter, any text spans multiple lines, or the
    /// initial weight is negative or not finite.
    pub fn build(self) -> Result<EffectDescriptor, RegistryError> {
        if self.knobs.is_none() && !(self.weight.is_finite() && self.weight >= 0.0) {
            return Err(RegistryError::InvalidArgument(format!(
                "weight of effect '{}' must be a finite non-negative number, got {}",
                self.display_name, self.weight
            )));
        }

        let id = self
            .id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| self.display_name.clone());
        let warn_text = self
            .warn_text
            .unwrap_or_else(|| format!("{} incoming!", self.display_name));
        let activate_text = self
            .activate_text
            .unwrap_or_else(|| format!("{}!", self.display_name));
        let knobs = self
            .knobs
            .unwrap_or_else(|| Arc::new(EffectKnobs::new(self.enabled, self.weight)));

        let descriptor = EffectDescriptor {
            id: EffectId::new(id),
            display_name: self.display_name,
            warn_text,
            activate_text,
            knobs,
            on_activate: self.on_activate.unwrap_or_else(noop),
            on_deactivate: self.on_deactivate.unwrap_or_else(noop),
            on_tick: self.on_tick,
        };
        descriptor.validate()?;
        Ok(descriptor)
    }
}

fn noop() -> EffectCallback {
    Arc::new(|| Ok(()))
}
