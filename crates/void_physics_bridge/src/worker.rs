//! Fixed-tick driver with pre/post step callbacks

/// Callback run around each tick with the fixed delta
pub type StepCallback = Box<dyn FnMut(f32) + Send>;

/// Runs `pre -> step -> post` for one fixed tick
pub struct PhysicsWorker {
    fixed_delta: f32,
    collision_steps: u32,
    pre_step: Vec<StepCallback>,
    post_step: Vec<StepCallback>,
    ticks: u64,
}

impl PhysicsWorker {
    /// Create a worker for a tick length and engine sub-step count
    pub fn new(fixed_delta: f32, collision_steps: u32) -> Self {
        Self {
            fixed_delta,
            collision_steps: collision_steps.max(1),
            pre_step: Vec::new(),
            post_step: Vec::new(),
            ticks: 0,
        }
    }

    /// Seconds per tick
    pub fn fixed_delta(&self) -> f32 {
        self.fixed_delta
    }

    /// Engine sub-steps per tick
    pub fn collision_steps(&self) -> u32 {
        self.collision_steps
    }

    /// Ticks run so far
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Register a callback run before every tick, in registration order
    pub fn on_pre_step(&mut self, callback: impl FnMut(f32) + Send + 'static) {
        self.pre_step.push(Box::new(callback));
    }

    /// Register a callback run after every tick, in registration order
    pub fn on_post_step(&mut self, callback: impl FnMut(f32) + Send + 'static) {
        self.post_step.push(Box::new(callback));
    }

    /// Run one tick; `step` receives the delta and the sub-step count
    pub fn run_tick<F>(&mut self, step: F)
    where
        F: FnOnce(f32, u32),
    {
        let delta = self.fixed_delta;
        for callback in &mut self.pre_step {
            callback(delta);
        }
        step(delta, self.collision_steps);
        for callback in &mut self.post_step {
            callback(delta);
        }
        self.ticks += 1;
    }
}
