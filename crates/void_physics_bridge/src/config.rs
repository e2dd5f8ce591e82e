//! Bridge configuration consumed at world init

use crate::body::{BodyIdRange, BodyIdRanges};
use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};

/// Physics world configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Gravity vector (default: -9.81 in Y)
    pub gravity: [f32; 3],

    /// Maximum number of bodies. Split in three for custom, static and dynamic ids.
    pub max_bodies: u32,

    /// Number of body mutexes (0 = auto)
    pub num_body_mutexes: u32,

    /// Maximum body pairs processed per step
    pub max_body_pairs: u32,

    /// Maximum contact constraints processed per step
    pub max_contact_constraints: u32,

    /// Simulation tick rate in Hz
    pub tick_rate: u32,

    /// Seconds simulated by one fixed tick
    pub fixed_delta_time: f32,

    /// Engine sub-steps per fixed tick
    pub collision_steps: u32,

    /// Maximum fixed ticks `advance` may run to catch up
    pub max_substeps: u32,

    /// Temp allocator budget in MiB
    pub pre_allocated_memory_mb: u32,

    /// Run the step on a worker pool
    pub enable_multithreading: bool,

    /// Maximum physics jobs in flight
    pub max_physics_jobs: u32,

    /// Maximum physics barriers
    pub max_physics_barriers: u32,

    /// Worker thread count
    pub max_threads: u32,

    /// Requested snapshot ring size (rounded up to a power of two, minimum 8)
    pub snapshot_history_capacity: usize,

    /// Upper bound accepted when reading a length-prefixed snapshot
    pub max_snapshot_bytes: usize,

    /// Dimension tolerance used by the shape cache
    pub shape_tolerance: f32,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            gravity: [0.0, -9.81, 0.0],
            max_bodies: 65536,
            num_body_mutexes: 0,
            max_body_pairs: 65536,
            max_contact_constraints: 10240,
            tick_rate: 60,
            fixed_delta_time: 1.0 / 60.0,
            collision_steps: 1,
            max_substeps: 4,
            pre_allocated_memory_mb: 10,
            enable_multithreading: false,
            max_physics_jobs: 2048,
            max_physics_barriers: 8,
            max_threads: 2,
            snapshot_history_capacity: 256,
            max_snapshot_bytes: 1 << 20,
            shape_tolerance: 1.0e-5,
        }
    }
}

impl BridgeConfig {
    /// Set gravity
    pub fn with_gravity(mut self, x: f32, y: f32, z: f32) -> Self {
        self.gravity = [x, y, z];
        self
    }

    /// Set the body budget
    pub fn with_max_bodies(mut self, max_bodies: u32) -> Self {
        self.max_bodies = max_bodies;
        self
    }

    /// Set the tick rate; the fixed delta follows it
    pub fn with_tick_rate(mut self, tick_rate: u32) -> Self {
        self.tick_rate = tick_rate;
        self.fixed_delta_time = 1.0 / tick_rate.max(1) as f32;
        self
    }

    /// Set engine sub-steps per tick
    pub fn with_collision_steps(mut self, steps: u32) -> Self {
        self.collision_steps = steps;
        self
    }

    /// Set the snapshot ring size
    pub fn with_snapshot_capacity(mut self, capacity: usize) -> Self {
        self.snapshot_history_capacity = capacity;
        self
    }

    /// Enable or disable the threaded scheduler
    pub fn with_multithreading(mut self, enabled: bool) -> Self {
        self.enable_multithreading = enabled;
        self
    }

    /// Set the worker thread count for threaded stepping
    pub fn with_max_threads(mut self, threads: u32) -> Self {
        self.max_threads = threads;
        self
    }

    /// Set shape cache tolerance
    pub fn with_shape_tolerance(mut self, tolerance: f32) -> Self {
        self.shape_tolerance = tolerance;
        self
    }

    /// Body id ranges derived from `max_bodies`
    pub fn body_id_ranges(&self) -> BodyIdRanges {
        BodyIdRanges::from_max_bodies(self.max_bodies)
    }

    /// Check the configuration for values the bridge cannot run with
    pub fn validate(&self) -> Result<()> {
        // Ids are pre-incremented, so each range needs two slots for one usable id
        let ranges = self.body_id_ranges();
        if [BodyIdRange::Custom, BodyIdRange::Static, BodyIdRange::Dynamic]
            .into_iter()
            .any(|kind| ranges.range(kind).len() < 2)
        {
            return Err(BridgeError::InvalidConfig(format!(
                "max_bodies must be at least 6 so every id range has a usable id, got {}",
                self.max_bodies
            )));
        }
        if self.enable_multithreading && self.max_threads == 0 {
            return Err(BridgeError::InvalidConfig(
                "max_threads must be at least 1 when multithreading is enabled".to_string(),
            ));
        }
        if !self.fixed_delta_time.is_finite() || self.fixed_delta_time <= 0.0 {
            return Err(BridgeError::InvalidConfig(format!(
                "fixed_delta_time must be positive, got {}",
                self.fixed_delta_time
            )));
        }
        if self.collision_steps == 0 {
            return Err(BridgeError::InvalidConfig(
                "collision_steps must be at least 1".to_string(),
            ));
        }
        if !self.shape_tolerance.is_finite() || self.shape_tolerance < 0.0 {
            return Err(BridgeError::InvalidConfig(format!(
                "shape_tolerance must be a non-negative number, got {}",
                self.shape_tolerance
            )));
        }
        Ok(())
    }
}
