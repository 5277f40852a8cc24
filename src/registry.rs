//! Effect registry.
//!
//! Append-only collection of effect descriptors. Registration may come from
//! any thread (extensions register late), so the collection sits behind an
//! `RwLock`; selection and frame replay only take the read side.

use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, warn};

use crate::effect::{EffectDescriptor, EffectId};
use crate::error::RegistryError;

/// Registered effects in registration order.
#[derive(Default)]
pub struct EffectRegistry {
    effects: RwLock<Vec<Arc<EffectDescriptor>>>,
}

impl EffectRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a descriptor.
    ///
    /// Registering the same id twice yields two entries; lookups resolve to
    /// the first one. A warning is logged when that happens.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidArgument`] if the descriptor violates
    /// the identifier or single-line text rules.
    pub fn register(
        &self,
        descriptor: impl Into<Arc<EffectDescriptor>>,
    ) -> Result<EffectId, RegistryError> {
        let descriptor = descriptor.into();
        descriptor.validate()?;

        let id = descriptor.id().clone();
        let mut effects = self.effects.write().unwrap_or_else(PoisonError::into_inner);
        if effects.iter().any(|e| e.id() == &id) {
            warn!(effect = %id, "effect registered twice; lookups resolve to the first entry");
        }
        effects.push(descriptor);
        debug!(effect = %id, total = effects.len(), "effect registered");
        drop(effects);
        Ok(id)
    }

    /// Looks up an effect by its wire id.
    #[must_use]
    pub fn find_by_id(&self, id: &str) -> Option<Arc<EffectDescriptor>> {
        self.read()
            .iter()
            .find(|e| e.id().as_str() == id)
            .cloned()
    }

    /// Returns every enabled effect with a positive weight, minus `excluding`.
    ///
    /// If dropping `excluding` leaves nothing, the exclusion is ignored:
    /// a repeat is allowed only when there is no alternative.
    #[must_use]
    pub fn eligible_pool(&self, excluding: Option<&EffectId>) -> Vec<Arc<EffectDescriptor>> {
        let eligible: Vec<Arc<EffectDescriptor>> = self
            .read()
            .iter()
            .filter(|e| e.knobs().is_eligible())
            .cloned()
            .collect();

        let Some(excluded) = excluding else {
            return eligible;
        };

        let filtered: Vec<Arc<EffectDescriptor>> = eligible
            .iter()
            .filter(|e| e.id() != excluded)
            .cloned()
            .collect();

        if filtered.is_empty() {
            eligible
        } else {
            filtered
        }
    }

    /// Number of registered entries (duplicates included).
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Returns `true` when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Ids in registration order.
    #[must_use]
    pub fn ids(&self) -> Vec<EffectId> {
        self.read().iter().map(|e| e.id().clone()).collect()
    }

    /// Clones the current contents in registration order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<EffectDescriptor>> {
        self.read().clone()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<Arc<EffectDescriptor>>> {
        self.effects.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for EffectRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectRegistry")
            .field("effects", &self.ids())
            .finish()
    }
}
