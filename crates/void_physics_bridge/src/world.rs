//! Physics world - bridge between host entities and the simulation

use crate::body::{BodyId, BodyIdAllocator, BodyOptions, BodyRecord};
use crate::config::BridgeConfig;
use crate::descriptor::{DescriptorEntry, ShapeDescriptor};
use crate::error::{BridgeError, Result};
use crate::events::{events_for_added, events_for_removed, ContactEvent, ContactListener};
use crate::filter::{BridgeHooks, ChannelFilter, CollisionEnabled, CollisionResponse, ResponseContainer};
use crate::geometry::extract_shapes;
use crate::host::{ComponentId, EntityId, MeshKey, SceneEntity, SceneHost};
use crate::material::MaterialRef;
use crate::query::{QueryDebugDraw, SceneQuery};
use crate::runtime::RuntimeLease;
use crate::shape::ShapeCache;
use crate::simulation::Simulation;
use crate::snapshot::{BodyState, PhysicsSnapshot, SnapshotBytes, SnapshotFilter, SnapshotHistory};
use crate::user_data::{EntityUserData, ShapeDimensions, UserDataStore};
use crate::worker::PhysicsWorker;
use rapier3d::na::{Quaternion, UnitQuaternion};
use rapier3d::prelude as rapier;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Everything needed to create one body
#[derive(Clone)]
pub struct BodyRequest<'a> {
    /// Owning entity
    pub entity: EntityId,
    /// Owning sub-component
    pub component: ComponentId,
    /// Engine shape
    pub shape: &'a rapier::SharedShape,
    /// Cached dimensions for user data
    pub dimensions: ShapeDimensions,
    /// World placement
    pub position: rapier::Isometry<f32>,
    /// Creation options
    pub options: &'a BodyOptions,
    /// Response table
    pub responses: &'a ResponseContainer,
    /// Channel of the component's object type
    pub object_channel: u8,
    /// Material back-reference
    pub material: Option<&'a MaterialRef>,
    /// Mark as the entity root
    pub is_root: bool,
    /// Component may be activated and put to sleep
    pub movable: bool,
}

/// Kinematic state of a body
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhysicsState {
    /// Translation
    pub position: [f32; 3],
    /// Rotation (x, y, z, w)
    pub rotation: [f32; 4],
    /// Linear velocity
    pub linear_velocity: [f32; 3],
    /// Angular velocity in radians per second
    pub angular_velocity: [f32; 3],
}

fn vector(v: [f32; 3]) -> rapier::Vector<f32> {
    rapier::Vector::new(v[0], v[1], v[2])
}

fn array(v: &rapier::Vector<f32>) -> [f32; 3] {
    [v.x, v.y, v.z]
}

/// Rotation from stored components without renormalizing
fn exact_rotation(r: [f32; 4]) -> rapier::Rotation<f32> {
    UnitQuaternion::new_unchecked(Quaternion::new(r[3], r[0], r[1], r[2]))
}

fn rotation_array(r: &rapier::Rotation<f32>) -> [f32; 4] {
    [r.i, r.j, r.k, r.w]
}

/// The physics world bridging host entities to a rapier simulation
pub struct PhysicsWorld {
    /// Runtime lease, released on drop
    runtime: RuntimeLease,

    /// Configuration
    config: BridgeConfig,

    /// Engine simulation, absent until initialized
    simulation: Option<Simulation>,

    /// Fixed-tick driver
    worker: PhysicsWorker,

    /// Pooled shapes
    shapes: ShapeCache,

    /// Body id allocation
    body_ids: BodyIdAllocator,

    /// Body bookkeeping keyed by id
    bodies: HashMap<BodyId, BodyRecord>,

    /// Per-entity descriptors
    descriptors: HashMap<EntityId, ShapeDescriptor>,

    /// User data arena
    user_data: UserDataStore,

    /// Contact queues
    listener: ContactListener,

    /// Events waiting for the host
    pending_events: Vec<ContactEvent>,

    /// Rollback history
    history: SnapshotHistory,

    /// Accumulated time for fixed timestep
    accumulated_time: f32,

    /// Optional query visualization
    debug_draw: Option<Arc<dyn QueryDebugDraw>>,
}

impl PhysicsWorld {
    pub(crate) fn new(runtime: RuntimeLease, config: BridgeConfig) -> Result<Self> {
        config.validate()?;

        let history = SnapshotHistory::new(config.snapshot_history_capacity);
        log::info!("Snapshot history initialized with {} slots", history.capacity());

        Ok(Self {
            runtime,
            worker: PhysicsWorker::new(config.fixed_delta_time, config.collision_steps),
            shapes: ShapeCache::new(config.shape_tolerance),
            body_ids: BodyIdAllocator::new(config.body_id_ranges()),
            bodies: HashMap::new(),
            descriptors: HashMap::new(),
            user_data: UserDataStore::new(),
            listener: ContactListener::new(),
            pending_events: Vec::new(),
            history,
            accumulated_time: 0.0,
            debug_draw: None,
            simulation: None,
            config,
        })
    }

    /// Get the configuration
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// World gravity
    pub fn gravity(&self) -> [f32; 3] {
        self.config.gravity
    }

    /// Whether the simulation exists
    pub fn is_ready(&self) -> bool {
        self.simulation.is_some()
    }

    /// Threads stepping the simulation, zero when it steps on the calling thread
    pub fn worker_threads(&self) -> usize {
        self.simulation.as_ref().map_or(0, |s| s.worker_threads())
    }

    /// Create the engine simulation if it does not exist yet
    pub fn initialize_simulation(&mut self) {
        if self.simulation.is_some() {
            return;
        }
        self.simulation = Some(Simulation::new(&self.config));
        log::info!(
            "Physics simulation created (max bodies {}, body pairs {}, contact constraints {}, {} Hz, {} collision steps)",
            self.config.max_bodies,
            self.config.max_body_pairs,
            self.config.max_contact_constraints,
            self.config.tick_rate,
            self.config.collision_steps
        );
    }

    /// Release every body, shape, user data record and snapshot
    pub fn teardown(&mut self) {
        self.simulation = None;
        self.bodies.clear();
        self.descriptors.clear();
        self.shapes.clear();
        self.user_data.clear();
        self.listener.clear();
        self.pending_events.clear();
        self.history.clear();
        self.body_ids.reset();
        self.accumulated_time = 0.0;
        log::info!("Physics simulation destroyed");
    }

    // ==================== Registration ====================

    /// Create the simulation and register every host entity.
    ///
    /// Returns the number of bodies created.
    pub fn begin_play(&mut self, host: &dyn SceneHost) -> usize {
        self.initialize_simulation();
        let mut created = 0;
        for entity in host.entities() {
            match self.register_entity(entity) {
                Ok(count) => created += count,
                Err(err) => log::warn!("Skipping entity {:?}: {}", entity.entity_id(), err),
            }
        }
        created
    }

    /// Build shapes and bodies for every collidable component of an entity.
    ///
    /// Elements that fail are logged and skipped; the entity still gets a
    /// descriptor. Returns the number of bodies created.
    pub fn register_entity(&mut self, entity: &dyn SceneEntity) -> Result<usize> {
        if self.simulation.is_none() {
            return Err(BridgeError::NotReady);
        }

        let entity_id = entity.entity_id();
        if self.descriptors.contains_key(&entity_id) {
            log::debug!("Entity {:?} is already registered", entity_id);
            return Ok(0);
        }
        self.descriptors.insert(entity_id, ShapeDescriptor::new(entity_id));

        let root = entity.root_component();
        let mut created = 0;

        for component in entity.collidable_components() {
            let component_id = component.component_id();
            let options = component.body_options();
            let responses = component.default_response_container();
            let transform = component.world_transform();
            let material = component
                .physics_material()
                .map(|m| self.runtime.materials().get_or_register(m));

            let shapes = extract_shapes(
                component.collision_geometry(),
                MeshKey(component_id.0),
                transform.scale,
                material.as_ref(),
                &mut self.shapes,
            );

            for extracted in &shapes {
                let request = BodyRequest {
                    entity: entity_id,
                    component: component_id,
                    shape: &extracted.shape,
                    dimensions: extracted.dimensions,
                    position: transform.to_isometry() * extracted.local,
                    options,
                    responses,
                    object_channel: component.object_channel(),
                    material: material.as_ref(),
                    is_root: root == Some(component_id),
                    movable: component.is_movable(),
                };
                if self.create_body_inner(&request).is_ok() {
                    created += 1;
                }
            }
        }

        self.sync_query_pipeline();
        Ok(created)
    }

    /// Create one body and record it in the entity's descriptor
    pub fn create_body(&mut self, request: &BodyRequest<'_>) -> Result<BodyId> {
        let result = self.create_body_inner(request);
        self.sync_query_pipeline();
        result
    }

    fn create_body_inner(&mut self, request: &BodyRequest<'_>) -> Result<BodyId> {
        let simulation = self.simulation.as_mut().ok_or(BridgeError::NotReady)?;
        let options = request.options;
        let motion_type = options.effective_motion_type();

        let body_id = match self.body_ids.next(motion_type.id_range()) {
            Ok(id) => id,
            Err(err) => {
                log::error!("Failed to allocate a {} body id: {}", motion_type, err);
                return Err(err);
            }
        };

        let sensor = options.is_sensor();
        let demoted = options.is_demoted();
        let created = self.bodies.len() < self.config.max_bodies as usize;

        if created {
            let handle = self.user_data.alloc(EntityUserData {
                entity: request.entity,
                component: request.component,
                body_id,
                material: request.material.cloned(),
                dimensions: request.dimensions,
                filter: ChannelFilter::new(request.object_channel, request.responses),
                generate_overlap_events: options.generate_overlap_events && !demoted,
                generate_hit_events: options.generate_collision_events,
            });

            let body = options.to_rapier_body(request.position, body_id);
            let collider = options.to_rapier_collider(
                request.shape.clone(),
                request.material.map(|m| m.as_ref()),
                handle,
            );
            let (body_handle, collider_handle) = simulation.insert(body, collider);

            self.bodies.insert(
                body_id,
                BodyRecord {
                    entity: request.entity,
                    component: request.component,
                    body: body_handle,
                    collider: collider_handle,
                    motion_type,
                    sensor,
                    demoted,
                    user_data: handle,
                },
            );
        }

        self.descriptors
            .entry(request.entity)
            .or_insert_with(|| ShapeDescriptor::new(request.entity))
            .push(DescriptorEntry {
                component: request.component,
                body_id,
                created,
                responses: *request.responses,
                is_root: request.is_root,
                movable: request.movable,
                sensor,
                demoted,
                dimensions: request.dimensions,
            });

        if created {
            Ok(body_id)
        } else {
            let err = BridgeError::BodyCreationFailed { motion_type, body_id };
            log::error!("{}", err);
            Err(err)
        }
    }

    /// Manually sync the query pipeline with current colliders
    pub fn sync_query_pipeline(&mut self) {
        if let Some(simulation) = self.simulation.as_mut() {
            simulation.sync_query_pipeline();
        }
    }

    // ==================== Simulation ====================

    /// Register a callback run before every fixed tick
    pub fn on_pre_step(&mut self, callback: impl FnMut(f32) + Send + 'static) {
        self.worker.on_pre_step(callback);
    }

    /// Register a callback run after every fixed tick
    pub fn on_post_step(&mut self, callback: impl FnMut(f32) + Send + 'static) {
        self.worker.on_post_step(callback);
    }

    /// Run one fixed tick and queue the resulting contact events
    pub fn step_fixed(&mut self) -> Result<()> {
        let simulation = self.simulation.as_mut().ok_or(BridgeError::NotReady)?;
        let hooks = BridgeHooks::new(&self.user_data);
        let recorder = self.listener.recorder(&self.user_data);

        self.worker
            .run_tick(|delta, sub_steps| simulation.step(delta, sub_steps, &hooks, &recorder));

        self.broadcast_contacts();
        Ok(())
    }

    /// Accumulate `delta_time` and run as many fixed ticks as fit, up to
    /// `max_substeps`. Returns the number of ticks run.
    pub fn advance(&mut self, delta_time: f32) -> Result<u32> {
        if self.simulation.is_none() {
            return Err(BridgeError::NotReady);
        }
        self.accumulated_time += delta_time;

        let fixed = self.config.fixed_delta_time;
        let mut steps = 0;
        while self.accumulated_time >= fixed && steps < self.config.max_substeps {
            self.step_fixed()?;
            self.accumulated_time -= fixed;
            steps += 1;
        }
        Ok(steps)
    }

    fn broadcast_contacts(&mut self) {
        for added in self.listener.drain_added() {
            if let Some((a, b)) = self.user_data_pair(added.body1, added.body2) {
                let events = events_for_added(&added, a, b);
                self.pending_events.extend(events);
            }
        }
        for removed in self.listener.drain_removed() {
            if let Some((a, b)) = self.user_data_pair(removed.body1, removed.body2) {
                let events = events_for_removed(&removed, a, b);
                self.pending_events.extend(events);
            }
        }
    }

    fn user_data_pair(&self, body1: BodyId, body2: BodyId) -> Option<(&EntityUserData, &EntityUserData)> {
        let a = self.user_data.get(self.bodies.get(&body1)?.user_data)?;
        let b = self.user_data.get(self.bodies.get(&body2)?.user_data)?;
        Some((a, b))
    }

    /// Take the contact events produced since the last call
    pub fn drain_contact_events(&mut self) -> Vec<ContactEvent> {
        std::mem::take(&mut self.pending_events)
    }

    // ==================== Lookups ====================

    /// Descriptor of an entity
    pub fn descriptor(&self, entity: EntityId) -> Option<&ShapeDescriptor> {
        self.descriptors.get(&entity)
    }

    /// Root body of an entity (first body when no root was designated)
    pub fn root_body_id(&self, entity: EntityId) -> Option<BodyId> {
        self.descriptors.get(&entity)?.root_or_first().map(|e| e.body_id)
    }

    /// Body of a sub-component
    pub fn body_id(&self, entity: EntityId, component: ComponentId) -> Option<BodyId> {
        self.descriptors.get(&entity)?.body_id(component)
    }

    /// Owner of a body
    pub fn component_for_body(&self, body: BodyId) -> Option<(EntityId, ComponentId)> {
        self.bodies.get(&body).map(|r| (r.entity, r.component))
    }

    /// User data attached to a sub-component's body
    pub fn user_data(&self, entity: EntityId, component: ComponentId) -> Option<&EntityUserData> {
        let record = self.record(entity, component).ok()?;
        self.user_data.get(record.user_data)
    }

    /// Bookkeeping of a body
    pub fn body_record(&self, body: BodyId) -> Option<&BodyRecord> {
        self.bodies.get(&body)
    }

    fn entry_body_id(&self, entity: EntityId, component: ComponentId) -> Result<BodyId> {
        let descriptor = self
            .descriptors
            .get(&entity)
            .ok_or(BridgeError::EntityNotRegistered(entity))?;
        descriptor
            .body_id(component)
            .ok_or(BridgeError::ComponentNotRegistered { entity, component })
    }

    fn record(&self, entity: EntityId, component: ComponentId) -> Result<&BodyRecord> {
        let body_id = self.entry_body_id(entity, component)?;
        self.bodies.get(&body_id).ok_or(BridgeError::BodyNotFound(body_id))
    }

    fn rigid_body(&self, record: &BodyRecord) -> Option<&rapier::RigidBody> {
        self.simulation.as_ref()?.bodies.get(record.body)
    }

    fn with_body_mut<T>(
        &mut self,
        handle: rapier::RigidBodyHandle,
        body_id: BodyId,
        f: impl FnOnce(&mut rapier::RigidBody) -> T,
    ) -> Result<T> {
        let simulation = self.simulation.as_mut().ok_or(BridgeError::NotReady)?;
        simulation
            .bodies
            .get_mut(handle)
            .map(f)
            .ok_or(BridgeError::BodyNotFound(body_id))
    }

    fn with_component_body<T>(
        &mut self,
        entity: EntityId,
        component: ComponentId,
        f: impl FnOnce(&mut rapier::RigidBody) -> T,
    ) -> Result<T> {
        let body_id = self.entry_body_id(entity, component)?;
        let handle = self.record(entity, component)?.body;
        self.with_body_mut(handle, body_id, f)
    }

    fn with_root_body<T>(&mut self, entity: EntityId, f: impl FnOnce(&mut rapier::RigidBody) -> T) -> Result<T> {
        let body_id = self
            .root_body_id(entity)
            .ok_or(BridgeError::EntityNotRegistered(entity))?;
        let handle = self.bodies.get(&body_id).ok_or(BridgeError::BodyNotFound(body_id))?.body;
        self.with_body_mut(handle, body_id, f)
    }

    // ==================== Body Mutators ====================

    /// Apply an impulse to an entity's root body
    pub fn add_impulse(&mut self, entity: EntityId, impulse: [f32; 3]) -> Result<()> {
        self.with_root_body(entity, |b| b.apply_impulse(vector(impulse), true))
    }

    /// Add a force to an entity's root body for the next step
    pub fn add_force(&mut self, entity: EntityId, force: [f32; 3]) -> Result<()> {
        self.with_root_body(entity, |b| b.add_force(vector(force), true))
    }

    /// Zero both velocities of an entity's root body
    pub fn zero_actor_velocity(&mut self, entity: EntityId) -> Result<()> {
        self.with_root_body(entity, |b| {
            b.set_linvel(rapier::Vector::zeros(), false);
            b.set_angvel(rapier::Vector::zeros(), false);
        })
    }

    /// Set the gravity factor of a sub-component's body
    pub fn set_gravity_factor(&mut self, entity: EntityId, component: ComponentId, factor: f32) -> Result<()> {
        self.with_component_body(entity, component, |b| b.set_gravity_scale(factor, true))
    }

    /// Gravity factor of a sub-component's body
    pub fn gravity_factor(&self, entity: EntityId, component: ComponentId) -> Option<f32> {
        let record = self.record(entity, component).ok()?;
        self.rigid_body(record).map(|b| b.gravity_scale())
    }

    /// Set linear velocity
    pub fn set_linear_velocity(&mut self, entity: EntityId, component: ComponentId, velocity: [f32; 3]) -> Result<()> {
        self.with_component_body(entity, component, |b| b.set_linvel(vector(velocity), true))
    }

    /// Set angular velocity in radians per second
    pub fn set_angular_velocity(&mut self, entity: EntityId, component: ComponentId, velocity: [f32; 3]) -> Result<()> {
        self.with_component_body(entity, component, |b| b.set_angvel(vector(velocity), true))
    }

    /// Apply a movement velocity; only the linear part is touched
    pub fn apply_velocity(&mut self, entity: EntityId, component: ComponentId, velocity: [f32; 3]) -> Result<()> {
        self.set_linear_velocity(entity, component, velocity)
    }

    /// Wake a body
    pub fn wake_body(&mut self, entity: EntityId, component: ComponentId) -> Result<()> {
        self.with_component_body(entity, component, |b| b.wake_up(true))
    }

    /// Put a body to sleep
    pub fn sleep_body(&mut self, entity: EntityId, component: ComponentId) -> Result<()> {
        self.with_component_body(entity, component, |b| b.sleep())
    }

    /// Overwrite position, rotation and velocities
    pub fn set_physics_state(&mut self, entity: EntityId, component: ComponentId, state: &PhysicsState) -> Result<()> {
        let collider = self.record(entity, component)?.collider;
        self.with_component_body(entity, component, |b| {
            b.set_position(
                rapier::Isometry::from_parts(vector(state.position).into(), exact_rotation(state.rotation)),
                true,
            );
            b.set_linvel(vector(state.linear_velocity), true);
            b.set_angvel(vector(state.angular_velocity), true);
        })?;
        self.sync_collider(collider);
        self.sync_query_pipeline();
        Ok(())
    }

    /// Position, rotation and velocities of a body
    pub fn physics_state(&self, entity: EntityId, component: ComponentId) -> Option<PhysicsState> {
        let record = self.record(entity, component).ok()?;
        let body = self.rigid_body(record)?;
        Some(PhysicsState {
            position: array(body.translation()),
            rotation: rotation_array(body.rotation()),
            linear_velocity: array(body.linvel()),
            angular_velocity: array(body.angvel()),
        })
    }

    /// Move a collider to its parent's pose so queries see it before the next step
    fn sync_collider(&mut self, handle: rapier::ColliderHandle) {
        let Some(simulation) = self.simulation.as_mut() else {
            return;
        };
        let Some(parent) = simulation.colliders.get(handle).and_then(|c| c.parent()) else {
            return;
        };
        let Some(body_pose) = simulation.bodies.get(parent).map(|b| *b.position()) else {
            return;
        };
        if let Some(collider) = simulation.colliders.get_mut(handle) {
            let relative = collider
                .position_wrt_parent()
                .copied()
                .unwrap_or_else(rapier::Isometry::identity);
            collider.set_position(body_pose * relative);
        }
    }

    // ==================== State Queries ====================

    /// Whether the entity has a descriptor
    pub fn is_body_valid(&self, entity: EntityId) -> bool {
        self.descriptors.contains_key(&entity)
    }

    /// Whether the sub-component's body exists
    pub fn has_rigid_body_created(&self, entity: EntityId, component: ComponentId) -> bool {
        self.record(entity, component)
            .ok()
            .and_then(|r| self.rigid_body(r))
            .is_some()
    }

    /// Whether the sub-component's body exists and is a sensor
    pub fn has_sensor_body_created(&self, entity: EntityId, component: ComponentId) -> bool {
        self.record(entity, component)
            .map(|r| r.sensor && self.rigid_body(r).is_some())
            .unwrap_or(false)
    }

    /// Whether the sub-component's body is awake
    pub fn is_collision_body_active(&self, entity: EntityId, component: ComponentId) -> bool {
        self.record(entity, component)
            .ok()
            .and_then(|r| self.rigid_body(r))
            .map(|b| !b.is_sleeping())
            .unwrap_or(false)
    }

    /// Activate or deactivate a movable sub-component's body
    pub fn set_active_state(&mut self, entity: EntityId, component: ComponentId, active: bool) -> Result<()> {
        let movable = self
            .descriptors
            .get(&entity)
            .and_then(|d| d.entry(component))
            .map(|e| e.movable)
            .ok_or(BridgeError::ComponentNotRegistered { entity, component })?;
        if !movable {
            log::error!(
                "Cannot change activation of component {:?} on entity {:?}: it is not movable",
                component,
                entity
            );
            return Err(BridgeError::ComponentNotMovable(component));
        }

        self.with_component_body(entity, component, |b| {
            if active {
                b.wake_up(true);
            } else {
                b.sleep();
            }
        })
    }

    // ==================== Collision Responses ====================

    /// Response table of a sub-component, or an empty table when unknown
    pub fn get_collision_response_container(&self, entity: EntityId, component: ComponentId) -> ResponseContainer {
        self.descriptors
            .get(&entity)
            .map(|d| d.response_container(component))
            .unwrap_or_default()
    }

    /// How a sub-component takes part in collision
    pub fn collision_enabled(&self, entity: EntityId, component: ComponentId) -> CollisionEnabled {
        match self.descriptors.get(&entity).and_then(|d| d.entry(component)) {
            Some(entry) if entry.created && !entry.demoted => {
                if entry.sensor {
                    CollisionEnabled::QueryOnly
                } else {
                    CollisionEnabled::QueryAndPhysics
                }
            }
            _ => CollisionEnabled::NoCollision,
        }
    }

    /// Response of a sub-component to one channel
    pub fn response_to_channel(&self, entity: EntityId, component: ComponentId, channel: u8) -> CollisionResponse {
        if self.collision_enabled(entity, component) == CollisionEnabled::NoCollision {
            return CollisionResponse::Ignore;
        }
        self.get_collision_response_container(entity, component)
            .response(channel)
    }

    // ==================== Snapshots ====================

    /// Serialize the current state of every body passing `filter`
    pub fn capture_state(&self, filter: Option<&dyn SnapshotFilter>) -> Result<SnapshotBytes> {
        let simulation = self.simulation.as_ref().ok_or(BridgeError::NotReady)?;
        let states = self
            .bodies
            .iter()
            .filter(|(id, _)| filter.map_or(true, |f| f.should_save_body(**id)))
            .filter_map(|(id, record)| {
                let body = simulation.bodies.get(record.body)?;
                Some(BodyState {
                    body_id: *id,
                    position: array(body.translation()),
                    rotation: rotation_array(body.rotation()),
                    linear_velocity: array(body.linvel()),
                    angular_velocity: array(body.angvel()),
                    sleeping: body.is_sleeping(),
                    gravity_scale: body.gravity_scale(),
                })
            })
            .collect();
        PhysicsSnapshot::new(states).encode()
    }

    /// Save the current state into the history slot of `frame`
    pub fn save_state_for_frame(&mut self, frame: u32, filter: Option<&dyn SnapshotFilter>) -> Result<()> {
        let bytes = self.capture_state(filter)?;
        log::trace!("Saved {} snapshot bytes for frame {}", bytes.len(), frame);
        self.history.store(frame, bytes);
        Ok(())
    }

    /// Restore the state saved for `frame`; false when the slot is stale
    pub fn restore_state_for_frame(&mut self, frame: u32) -> bool {
        self.try_restore_state_for_frame(frame).is_ok()
    }

    /// Restore the state saved for `frame`, reporting why it failed
    pub fn try_restore_state_for_frame(&mut self, frame: u32) -> Result<()> {
        if self.simulation.is_none() {
            return Err(BridgeError::NotReady);
        }
        let snapshot = PhysicsSnapshot::decode(self.history.get(frame)?)?;
        self.apply_snapshot(&snapshot, None);
        Ok(())
    }

    /// Restore from externally supplied bytes; false on malformed input
    pub fn restore_state_from_bytes(&mut self, bytes: &SnapshotBytes, filter: Option<&dyn SnapshotFilter>) -> bool {
        if self.simulation.is_none() {
            return false;
        }
        match PhysicsSnapshot::decode(bytes) {
            Ok(snapshot) => {
                self.apply_snapshot(&snapshot, filter);
                true
            }
            Err(err) => {
                log::warn!("Rejected snapshot payload: {}", err);
                false
            }
        }
    }

    /// Whether a restorable snapshot exists for `frame`
    pub fn has_state_for_frame(&self, frame: u32) -> bool {
        self.history.has_state_for_frame(frame)
    }

    /// Most recently saved frame and its bytes
    pub fn last_saved_state(&self) -> Option<(u32, &SnapshotBytes)> {
        self.history.last_saved()
    }

    /// Rollback history
    pub fn history(&self) -> &SnapshotHistory {
        &self.history
    }

    fn apply_snapshot(&mut self, snapshot: &PhysicsSnapshot, filter: Option<&dyn SnapshotFilter>) {
        let Some(simulation) = self.simulation.as_mut() else {
            return;
        };

        for state in &snapshot.bodies {
            if filter.is_some_and(|f| !f.should_save_body(state.body_id)) {
                continue;
            }
            let Some(record) = self.bodies.get(&state.body_id) else {
                log::debug!("Snapshot references unknown body {}", state.body_id);
                continue;
            };
            let Some(body) = simulation.bodies.get_mut(record.body) else {
                log::debug!("Snapshot references removed body {}", state.body_id);
                continue;
            };

            let pose = rapier::Isometry::from_parts(vector(state.position).into(), exact_rotation(state.rotation));
            body.set_position(pose, false);
            body.set_linvel(vector(state.linear_velocity), false);
            body.set_angvel(vector(state.angular_velocity), false);
            body.set_gravity_scale(state.gravity_scale, false);
            if state.sleeping {
                body.sleep();
            } else if !body.is_fixed() {
                body.wake_up(true);
            }

            if let Some(collider) = simulation.colliders.get_mut(record.collider) {
                let relative = collider
                    .position_wrt_parent()
                    .copied()
                    .unwrap_or_else(rapier::Isometry::identity);
                collider.set_position(pose * relative);
            }
        }

        simulation.sync_query_pipeline();
    }

    // ==================== Queries ====================

    /// Get a query interface for traces and sweeps
    pub fn query(&self) -> SceneQuery<'_> {
        SceneQuery {
            simulation: self.simulation.as_ref(),
            user_data: &self.user_data,
            descriptors: &self.descriptors,
            records: &self.bodies,
            debug_draw: self.debug_draw.as_ref(),
        }
    }

    /// Install or remove query visualization
    pub fn set_debug_draw(&mut self, debug_draw: Option<Arc<dyn QueryDebugDraw>>) {
        self.debug_draw = debug_draw;
    }

    // ==================== Debug ====================

    /// Number of bodies created
    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    /// Number of awake dynamic bodies
    pub fn active_body_count(&self) -> usize {
        self.simulation.as_ref().map_or(0, |s| s.active_body_count())
    }

    /// Number of pooled shapes
    pub fn shape_count(&self) -> usize {
        self.shapes.len()
    }

    /// Fixed ticks run so far
    pub fn tick_count(&self) -> u64 {
        self.worker.ticks()
    }
}
