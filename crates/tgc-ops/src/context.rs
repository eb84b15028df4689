//! Execution context shared by operator instances.
//!
//! Activation descriptors are handed out as `Arc`s and cached by weak
//! reference: every operator instance configured with the same activation
//! shares one descriptor, and the descriptor is dropped once the last
//! instance holding it goes away.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// The activation function a descriptor computes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationMode {
    /// Exponential linear unit.
    Elu,
}

/// A configured activation function.
#[derive(Clone, Debug, PartialEq)]
pub struct ActivationDescriptor {
    /// The function.
    pub mode: ActivationMode,
    /// Scale of the negative branch.
    pub alpha: f64,
}

impl ActivationDescriptor {
    /// Evaluates the activation at `x`.
    #[must_use]
    pub fn apply(&self, x: f64) -> f64 {
        match self.mode {
            ActivationMode::Elu => {
                if x > 0.0 {
                    x
                } else {
                    self.alpha * x.exp_m1()
                }
            }
        }
    }
}

type DescriptorKey = (ActivationMode, u64);

/// State shared across operator `finalize` and `compute` calls.
#[derive(Debug, Default)]
pub struct Context {
    descriptors: Mutex<FxHashMap<DescriptorKey, Weak<ActivationDescriptor>>>,
}

impl Context {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the shared descriptor for `mode` and `alpha`, creating it if
    /// no live instance holds one. Entries whose descriptor has been dropped
    /// are pruned on creation.
    pub fn activation_descriptor(
        &self,
        mode: ActivationMode,
        alpha: f64,
    ) -> Arc<ActivationDescriptor> {
        let key = (mode, alpha.to_bits());
        let mut descriptors = self.descriptors.lock();
        if let Some(existing) = descriptors.get(&key).and_then(Weak::upgrade) {
            return existing;
        }
        descriptors.retain(|_, weak| weak.strong_count() > 0);
        trace!(?mode, alpha, "creating activation descriptor");
        let descriptor = Arc::new(ActivationDescriptor { mode, alpha });
        descriptors.insert(key, Arc::downgrade(&descriptor));
        descriptor
    }

    /// Number of descriptors still held by some operator.
    #[must_use]
    pub fn live_descriptors(&self) -> usize {
        self.descriptors
            .lock()
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }
}
