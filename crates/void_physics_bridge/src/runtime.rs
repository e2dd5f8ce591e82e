//! Process-wide physics runtime
//!
//! An explicit lifecycle object standing in for engine-global state. Worlds
//! hold a lease on the runtime; teardown is refused while any lease is alive.

use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::material::MaterialRegistry;
use crate::world::PhysicsWorld;
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Default)]
struct RuntimeState {
    torn_down: bool,
    live_worlds: usize,
}

#[derive(Debug, Default)]
struct RuntimeInner {
    state: Mutex<RuntimeState>,
    materials: MaterialRegistry,
}

/// Handle to the shared physics runtime
#[derive(Debug, Clone)]
pub struct PhysicsRuntime {
    inner: Arc<RuntimeInner>,
}

impl PhysicsRuntime {
    /// Initialize a runtime
    pub fn init() -> Self {
        log::info!("Physics runtime initialized");
        Self {
            inner: Arc::new(RuntimeInner::default()),
        }
    }

    /// Create a world bound to this runtime
    pub fn create_world(&self, config: BridgeConfig) -> Result<PhysicsWorld> {
        let lease = self.lease()?;
        PhysicsWorld::new(lease, config)
    }

    /// Number of worlds still alive
    pub fn live_worlds(&self) -> usize {
        self.inner.state.lock().live_worlds
    }

    /// Whether the runtime has not been torn down
    pub fn is_active(&self) -> bool {
        !self.inner.state.lock().torn_down
    }

    /// Shared material registry
    pub fn materials(&self) -> &MaterialRegistry {
        &self.inner.materials
    }

    /// Release process-wide state. Fails while worlds are alive or if called twice.
    pub fn teardown(&self) -> Result<()> {
        let mut state = self.inner.state.lock();
        if state.torn_down {
            return Err(BridgeError::RuntimeTornDown);
        }
        if state.live_worlds > 0 {
            return Err(BridgeError::RuntimeInUse {
                live_worlds: state.live_worlds,
            });
        }
        state.torn_down = true;
        self.inner.materials.clear();
        log::info!("Physics runtime torn down");
        Ok(())
    }

    fn lease(&self) -> Result<RuntimeLease> {
        let mut state = self.inner.state.lock();
        if state.torn_down {
            return Err(BridgeError::RuntimeTornDown);
        }
        state.live_worlds += 1;
        Ok(RuntimeLease {
            inner: Arc::clone(&self.inner),
        })
    }
}

/// Keeps a runtime's world count up while a world is alive
#[derive(Debug)]
pub(crate) struct RuntimeLease {
    inner: Arc<RuntimeInner>,
}

impl RuntimeLease {
    pub(crate) fn materials(&self) -> &MaterialRegistry {
        &self.inner.materials
    }
}

impl Drop for RuntimeLease {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock();
        state.live_worlds = state.live_worlds.saturating_sub(1);
    }
}
