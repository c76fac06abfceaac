//! Close-on-shutdown registry for peripherals such as PID files.
//!
//! The owning layer registers anything that must be torn down when the
//! service exits and drains the registry once, in reverse registration
//! order. There is no process-wide singleton; the registry is an explicit
//! object threaded through constructors.
use std::sync::Mutex;

use tracing::debug;

/// Something that must be closed during shutdown. Closing is best-effort
/// and must not panic; implementations log their own failures.
pub trait Peripheral: Send {
    /// Releases the peripheral's resources.
    fn close(&mut self);
}

/// Ordered collection of peripherals drained at shutdown.
#[derive(Default)]
pub struct CloserRegistry {
    items: Mutex<Vec<Box<dyn Peripheral>>>,
}

impl CloserRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a peripheral for close-at-shutdown.
    pub fn register(&self, peripheral: Box<dyn Peripheral>) {
        self.items()
            .push(peripheral);
    }

    /// Number of peripherals currently registered.
    pub fn len(&self) -> usize {
        self.items().len()
    }

    /// Whether the registry holds no peripherals.
    pub fn is_empty(&self) -> bool {
        self.items().is_empty()
    }

    /// Closes every registered peripheral, most recent first, and empties
    /// the registry. Safe to call more than once.
    pub fn close_all(&self) {
        let mut drained: Vec<Box<dyn Peripheral>> = {
            let mut items = self.items();
            items.drain(..).collect()
        };

        debug!("Closing {} registered peripheral(s)", drained.len());
        for peripheral in drained.iter_mut().rev() {
            peripheral.close();
        }
    }

    fn items(&self) -> std::sync::MutexGuard<'_, Vec<Box<dyn Peripheral>>> {
        self.items
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for CloserRegistry {
    fn drop(&mut self) {
        self.close_all();
    }
}
