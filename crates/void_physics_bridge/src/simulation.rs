//! Rapier state owned by one world

use crate::config::BridgeConfig;
use rapier3d::prelude as rapier;

/// The engine-side simulation: pipeline, sets and query acceleration
pub struct Simulation {
    /// Rapier physics pipeline
    pipeline: rapier::PhysicsPipeline,

    /// Gravity
    gravity: rapier::Vector<f32>,

    /// Integration parameters
    integration_params: rapier::IntegrationParameters,

    /// Island manager
    pub(crate) islands: rapier::IslandManager,

    /// Broad phase
    broad_phase: rapier::DefaultBroadPhase,

    /// Narrow phase
    narrow_phase: rapier::NarrowPhase,

    /// Impulse joint set
    pub(crate) impulse_joints: rapier::ImpulseJointSet,

    /// Multibody joint set
    pub(crate) multibody_joints: rapier::MultibodyJointSet,

    /// CCD solver
    ccd_solver: rapier::CCDSolver,

    /// Query pipeline
    pub(crate) query_pipeline: rapier::QueryPipeline,

    /// Rigid body set
    pub(crate) bodies: rapier::RigidBodySet,

    /// Collider set
    pub(crate) colliders: rapier::ColliderSet,

    /// Worker pool, present when multithreaded stepping is enabled
    workers: Option<rayon::ThreadPool>,
}

/// Build the worker pool for threaded stepping.
///
/// A pool that fails to start is logged and stepping stays on the calling thread.
fn build_workers(config: &BridgeConfig) -> Option<rayon::ThreadPool> {
    if !config.enable_multithreading {
        return None;
    }

    match rayon::ThreadPoolBuilder::new()
        .num_threads(config.max_threads as usize)
        .thread_name(|index| format!("physics-worker-{}", index))
        .build()
    {
        Ok(pool) => {
            log::info!(
                "Physics worker pool started with {} threads (jobs {}, barriers {})",
                pool.current_num_threads(),
                config.max_physics_jobs,
                config.max_physics_barriers
            );
            Some(pool)
        }
        Err(err) => {
            log::warn!("Physics worker pool failed to start, stepping on the calling thread: {}", err);
            None
        }
    }
}

impl Simulation {
    /// Create an empty simulation
    pub fn new(config: &BridgeConfig) -> Self {
        let gravity = rapier::Vector::new(config.gravity[0], config.gravity[1], config.gravity[2]);

        let mut integration_params = rapier::IntegrationParameters::default();
        integration_params.dt = config.fixed_delta_time / config.collision_steps.max(1) as f32;

        Self {
            pipeline: rapier::PhysicsPipeline::new(),
            gravity,
            integration_params,
            islands: rapier::IslandManager::new(),
            broad_phase: rapier::DefaultBroadPhase::new(),
            narrow_phase: rapier::NarrowPhase::new(),
            impulse_joints: rapier::ImpulseJointSet::new(),
            multibody_joints: rapier::MultibodyJointSet::new(),
            ccd_solver: rapier::CCDSolver::new(),
            query_pipeline: rapier::QueryPipeline::new(),
            bodies: rapier::RigidBodySet::new(),
            colliders: rapier::ColliderSet::new(),
            workers: build_workers(config),
        }
    }

    /// Number of worker threads, zero when stepping on the calling thread
    pub fn worker_threads(&self) -> usize {
        self.workers.as_ref().map_or(0, |pool| pool.current_num_threads())
    }

    /// World gravity
    pub fn gravity(&self) -> [f32; 3] {
        [self.gravity.x, self.gravity.y, self.gravity.z]
    }

    /// Insert a body with its collider
    pub(crate) fn insert(
        &mut self,
        body: rapier::RigidBody,
        collider: rapier::Collider,
    ) -> (rapier::RigidBodyHandle, rapier::ColliderHandle) {
        let body = self.bodies.insert(body);
        let collider = self.colliders.insert_with_parent(collider, body, &mut self.bodies);
        (body, collider)
    }

    /// Advance by `delta` split into `sub_steps` pipeline steps
    pub(crate) fn step(
        &mut self,
        delta: f32,
        sub_steps: u32,
        hooks: &dyn rapier::PhysicsHooks,
        events: &dyn rapier::EventHandler,
    ) {
        let sub_steps = sub_steps.max(1);
        self.integration_params.dt = delta / sub_steps as f32;

        match self.workers.take() {
            Some(pool) => {
                pool.install(|| self.run_steps(sub_steps, hooks, events));
                self.workers = Some(pool);
            }
            None => self.run_steps(sub_steps, hooks, events),
        }
    }

    fn run_steps(&mut self, sub_steps: u32, hooks: &dyn rapier::PhysicsHooks, events: &dyn rapier::EventHandler) {
        for _ in 0..sub_steps {
            self.pipeline.step(
                &self.gravity,
                &self.integration_params,
                &mut self.islands,
                &mut self.broad_phase,
                &mut self.narrow_phase,
                &mut self.bodies,
                &mut self.colliders,
                &mut self.impulse_joints,
                &mut self.multibody_joints,
                &mut self.ccd_solver,
                Some(&mut self.query_pipeline),
                hooks,
                events,
            );
        }
    }

    /// Bring the query pipeline in line with the collider set
    pub(crate) fn sync_query_pipeline(&mut self) {
        self.query_pipeline.update(&self.colliders);
    }

    /// Number of rigid bodies
    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    /// Number of colliders
    pub fn collider_count(&self) -> usize {
        self.colliders.len()
    }

    /// Number of awake dynamic bodies
    pub fn active_body_count(&self) -> usize {
        self.islands.active_dynamic_bodies().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gravity_fall() {
        let mut sim = Simulation::new(&BridgeConfig::default());
        let (body, _) = sim.insert(
            rapier::RigidBodyBuilder::dynamic().translation(rapier::vector![0.0, 10.0, 0.0]).build(),
            rapier::ColliderBuilder::ball(1.0).build(),
        );

        for _ in 0..60 {
            sim.step(1.0 / 60.0, 2, &(), &());
        }

        assert!(sim.bodies[body].translation().y < 10.0);
        assert_eq!(sim.body_count(), 1);
        assert_eq!(sim.collider_count(), 1);
        assert_eq!(sim.worker_threads(), 0);
    }

    fn drop_height(config: &BridgeConfig) -> f32 {
        let mut sim = Simulation::new(config);
        let (body, _) = sim.insert(
            rapier::RigidBodyBuilder::dynamic().translation(rapier::vector![0.0, 10.0, 0.0]).build(),
            rapier::ColliderBuilder::ball(1.0).build(),
        );
        sim.insert(
            rapier::RigidBodyBuilder::fixed().build(),
            rapier::ColliderBuilder::cuboid(5.0, 0.5, 5.0).build(),
        );

        for _ in 0..30 {
            sim.step(1.0 / 60.0, 1, &(), &());
        }
        sim.bodies[body].translation().y
    }

    #[test]
    fn test_threaded_and_single_threaded_step() {
        let single = BridgeConfig::default();
        let threaded = BridgeConfig::default().with_multithreading(true).with_max_threads(2);

        let sim = Simulation::new(&threaded);
        assert_eq!(sim.worker_threads(), 2);

        let single_y = drop_height(&single);
        let threaded_y = drop_height(&threaded);
        assert!(single_y < 10.0);
        assert!(threaded_y < 10.0);
        approx::assert_relative_eq!(single_y, threaded_y, epsilon = 1e-3);
    }
}
