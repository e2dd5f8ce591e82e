//! Integration tests for void_physics_bridge

use approx::assert_relative_eq;
use void_physics_bridge::*;

// Mock host component
struct MockComponent {
    id: ComponentId,
    options: BodyOptions,
    responses: ResponseContainer,
    channel: u8,
    transform: WorldTransform,
    geometry: CollisionGeometry,
    material: Option<PhysicsMaterial>,
    movable: bool,
}

impl MockComponent {
    fn new(id: u64, options: BodyOptions, geometry: CollisionGeometry, transform: WorldTransform) -> Self {
        Self {
            id: ComponentId(id),
            movable: options.motion_type != MotionType::Static,
            options,
            responses: ResponseContainer::all(CollisionResponse::Block),
            channel: 0,
            transform,
            geometry,
            material: None,
        }
    }

    fn with_channel(mut self, channel: u8, responses: ResponseContainer) -> Self {
        self.channel = channel;
        self.responses = responses;
        self
    }

    fn with_material(mut self, material: PhysicsMaterial) -> Self {
        self.material = Some(material);
        self
    }
}

impl CollidableComponent for MockComponent {
    fn component_id(&self) -> ComponentId {
        self.id
    }

    fn body_options(&self) -> &BodyOptions {
        &self.options
    }

    fn default_response_container(&self) -> &ResponseContainer {
        &self.responses
    }

    fn object_channel(&self) -> u8 {
        self.channel
    }

    fn world_transform(&self) -> WorldTransform {
        self.transform
    }

    fn collision_geometry(&self) -> &CollisionGeometry {
        &self.geometry
    }

    fn physics_material(&self) -> Option<PhysicsMaterial> {
        self.material
    }

    fn is_movable(&self) -> bool {
        self.movable
    }
}

struct MockEntity {
    id: EntityId,
    root: Option<ComponentId>,
    components: Vec<MockComponent>,
}

impl MockEntity {
    fn new(id: u64, components: Vec<MockComponent>) -> Self {
        Self {
            id: EntityId(id),
            root: components.first().map(|c| c.id),
            components,
        }
    }
}

impl SceneEntity for MockEntity {
    fn entity_id(&self) -> EntityId {
        self.id
    }

    fn root_component(&self) -> Option<ComponentId> {
        self.root
    }

    fn collidable_components(&self) -> Vec<&dyn CollidableComponent> {
        self.components.iter().map(|c| c as &dyn CollidableComponent).collect()
    }
}

#[derive(Default)]
struct MockScene {
    entities: Vec<MockEntity>,
}

impl MockScene {
    fn with(mut self, entity: MockEntity) -> Self {
        self.entities.push(entity);
        self
    }
}

impl SceneHost for MockScene {
    fn entities(&self) -> Vec<&dyn SceneEntity> {
        self.entities.iter().map(|e| e as &dyn SceneEntity).collect()
    }
}

fn ground(entity: u64) -> MockEntity {
    MockEntity::new(
        entity,
        vec![MockComponent::new(
            entity * 10,
            BodyOptions::fixed(),
            CollisionGeometry::single(ShapeElement::cuboid(5.0, 0.5, 5.0)),
            WorldTransform::default(),
        )],
    )
}

fn ball(entity: u64, y: f32, options: BodyOptions) -> MockEntity {
    MockEntity::new(
        entity,
        vec![MockComponent::new(
            entity * 10,
            options,
            CollisionGeometry::single(ShapeElement::sphere(0.5)),
            WorldTransform::from_position(0.0, y, 0.0),
        )],
    )
}

fn trigger(entity: u64, y: f32) -> MockEntity {
    MockEntity::new(
        entity,
        vec![MockComponent::new(
            entity * 10,
            BodyOptions::sensor(),
            CollisionGeometry::single(ShapeElement::sphere(1.0)),
            WorldTransform::from_position(0.0, y, 0.0),
        )
        .with_channel(1, ResponseContainer::all(CollisionResponse::Overlap))],
    )
}

/// Ground at the origin, a sleeping ball at y=3 and a trigger at y=6
fn query_scene() -> MockScene {
    MockScene::default()
        .with(ground(1))
        .with(ball(2, 3.0, BodyOptions::dynamic()))
        .with(trigger(3, 6.0))
}

fn start(scene: &MockScene) -> (PhysicsRuntime, PhysicsWorld) {
    let _ = env_logger::builder().is_test(true).try_init();
    let runtime = PhysicsRuntime::init();
    let mut world = runtime.create_world(BridgeConfig::default()).unwrap();
    world.begin_play(scene);
    (runtime, world)
}

const DOWN_START: [f32; 3] = [0.0, 10.0, 0.0];
const DOWN_END: [f32; 3] = [0.0, -10.0, 0.0];

// ============================================================================
// Registration Tests
// ============================================================================

#[test]
fn test_begin_play_registers_every_entity() {
    let scene = query_scene();
    let (_runtime, world) = start(&scene);

    assert!(world.is_ready());
    assert_eq!(world.body_count(), 3);
    for id in 1..=3 {
        assert!(world.is_body_valid(EntityId(id)));
    }
    assert!(world.has_rigid_body_created(EntityId(2), ComponentId(20)));
    assert!(world.has_sensor_body_created(EntityId(3), ComponentId(30)));
    assert!(!world.has_sensor_body_created(EntityId(2), ComponentId(20)));
}

#[test]
fn test_body_ids_are_partitioned() {
    let scene = query_scene();
    let (_runtime, world) = start(&scene);
    let ranges = world.config().body_id_ranges();

    // Registration order: ground (static), ball (dynamic), trigger (static)
    assert_eq!(world.root_body_id(EntityId(1)), Some(BodyId(21846)));
    assert_eq!(world.root_body_id(EntityId(2)), Some(BodyId(43691)));
    assert_eq!(world.root_body_id(EntityId(3)), Some(BodyId(21847)));

    let trigger_id = world.root_body_id(EntityId(3)).unwrap();
    assert_eq!(ranges.classify(trigger_id), Some(BodyIdRange::Static));
    assert_eq!(
        world.component_for_body(BodyId(43691)),
        Some((EntityId(2), ComponentId(20)))
    );
}

#[test]
fn test_shapes_are_shared_between_entities() {
    let scene = MockScene::default()
        .with(ball(1, 0.0, BodyOptions::fixed()))
        .with(ball(2, 5.0, BodyOptions::fixed()))
        .with(ball(3, 10.0, BodyOptions::fixed()));
    let (_runtime, world) = start(&scene);

    assert_eq!(world.body_count(), 3);
    assert_eq!(world.shape_count(), 1);
}

#[test]
fn test_materials_reach_user_data() {
    let scene = MockScene::default().with(MockEntity::new(
        7,
        vec![MockComponent::new(
            70,
            BodyOptions::fixed().with_physics_material(true),
            CollisionGeometry::single(ShapeElement::cuboid(1.0, 1.0, 1.0)),
            WorldTransform::default(),
        )
        .with_material(PhysicsMaterial::new(0.3, 0.1, 4))],
    ));
    let (runtime, world) = start(&scene);

    let data = world.user_data(EntityId(7), ComponentId(70)).unwrap();
    let material = data.material.as_ref().unwrap();
    assert_eq!(material.surface_type, 4);
    assert!(std::sync::Arc::ptr_eq(material, &runtime.materials().get(4).unwrap()));
}

#[test]
fn test_failed_element_does_not_block_entity() {
    let geometry = CollisionGeometry::single(ShapeElement::sphere(-1.0));
    let good = MockComponent::new(
        51,
        BodyOptions::fixed(),
        CollisionGeometry::single(ShapeElement::sphere(1.0)),
        WorldTransform::default(),
    );
    let bad = MockComponent::new(50, BodyOptions::fixed(), geometry, WorldTransform::default());
    let scene = MockScene::default().with(MockEntity::new(5, vec![bad, good]));
    let (_runtime, world) = start(&scene);

    assert!(world.is_body_valid(EntityId(5)));
    assert_eq!(world.body_count(), 1);
    assert!(world.has_rigid_body_created(EntityId(5), ComponentId(51)));
    assert!(!world.has_rigid_body_created(EntityId(5), ComponentId(50)));
}

// ============================================================================
// Collision Response Tests
// ============================================================================

#[test]
fn test_response_lookups() {
    let scene = query_scene();
    let (_runtime, world) = start(&scene);

    assert_eq!(
        world.response_to_channel(EntityId(3), ComponentId(30), 0),
        CollisionResponse::Overlap
    );
    assert_eq!(
        world.collision_enabled(EntityId(3), ComponentId(30)),
        CollisionEnabled::QueryOnly
    );
    assert_eq!(
        world.collision_enabled(EntityId(1), ComponentId(10)),
        CollisionEnabled::QueryAndPhysics
    );
    assert_eq!(
        world.get_collision_response_container(EntityId(9), ComponentId(90)),
        ResponseContainer::default()
    );
}

#[test]
fn test_set_active_state_requires_movable() {
    let scene = query_scene();
    let (_runtime, mut world) = start(&scene);

    assert!(matches!(
        world.set_active_state(EntityId(1), ComponentId(10), true),
        Err(BridgeError::ComponentNotMovable(ComponentId(10)))
    ));

    assert!(!world.is_collision_body_active(EntityId(2), ComponentId(20)));
    world.set_active_state(EntityId(2), ComponentId(20), true).unwrap();
    assert!(world.is_collision_body_active(EntityId(2), ComponentId(20)));
}

// ============================================================================
// Query Tests
// ============================================================================

#[test]
fn test_line_trace_resolves_entity() {
    let scene = query_scene();
    let (_runtime, world) = start(&scene);

    let hit = world
        .query()
        .line_trace_single(DOWN_START, DOWN_END, &QueryParams::default())
        .unwrap();

    // The trigger above the ball never blocks
    assert!(hit.blocking_hit);
    assert_eq!(hit.entity, EntityId(2));
    assert_eq!(hit.component, ComponentId(20));
    assert_relative_eq!(hit.distance, 6.5, epsilon = 1e-3);
    assert_relative_eq!(hit.impact_point[1], 3.5, epsilon = 1e-3);
    assert_relative_eq!(hit.normal[1], 1.0, epsilon = 1e-3);
}

#[test]
fn test_line_trace_prefers_sphere_over_overlapping_box() {
    let channel_zero = || ResponseContainer::default().with_response(0, CollisionResponse::Block);
    let scene = MockScene::default()
        .with(MockEntity::new(
            1,
            vec![MockComponent::new(
                10,
                BodyOptions::fixed(),
                CollisionGeometry::single(ShapeElement::cuboid(1.0, 1.0, 1.0)),
                WorldTransform::default(),
            )
            .with_channel(0, channel_zero())],
        ))
        .with(MockEntity::new(
            2,
            vec![MockComponent::new(
                20,
                BodyOptions::dynamic(),
                CollisionGeometry::single(ShapeElement::sphere(0.5)),
                WorldTransform::from_position(0.0, 1.2, 0.0),
            )
            .with_channel(0, channel_zero())],
        ));
    let (_runtime, world) = start(&scene);

    let hit = world
        .query()
        .line_trace_single(DOWN_START, DOWN_END, &QueryParams::default())
        .unwrap();

    assert!(hit.blocking_hit);
    assert_eq!(hit.entity, EntityId(2));
    assert_relative_eq!(hit.impact_point[1], 1.7, epsilon = 1e-3);
}

#[test]
fn test_teleported_body_is_traced_at_new_position() {
    let scene = query_scene();
    let (_runtime, mut world) = start(&scene);
    let (entity, component) = (EntityId(2), ComponentId(20));

    let mut state = world.physics_state(entity, component).unwrap();
    state.position = [20.0, 3.0, 0.0];
    world.set_physics_state(entity, component, &state).unwrap();

    let hit = world
        .query()
        .line_trace_single([20.0, 10.0, 0.0], [20.0, -10.0, 0.0], &QueryParams::default())
        .unwrap();
    assert_eq!(hit.entity, entity);
    assert_relative_eq!(hit.impact_point[1], 3.5, epsilon = 1e-3);

    // Only the ground is left under the old position
    let hit = world
        .query()
        .line_trace_single(DOWN_START, DOWN_END, &QueryParams::default())
        .unwrap();
    assert_eq!(hit.entity, EntityId(1));
}

#[test]
fn test_line_trace_multi_sorted_without_sensors() {
    let scene = query_scene();
    let (_runtime, world) = start(&scene);

    let hits = world
        .query()
        .line_trace_multi(DOWN_START, DOWN_END, &QueryParams::default());
    let entities: Vec<_> = hits.iter().map(|h| h.entity).collect();

    assert_eq!(entities, vec![EntityId(2), EntityId(1)]);
    assert!(hits[0].fraction <= hits[1].fraction);
    assert_relative_eq!(hits[1].distance, 9.5, epsilon = 1e-3);
}

#[test]
fn test_ignored_entities_are_skipped() {
    let scene = query_scene();
    let (_runtime, world) = start(&scene);

    let params = QueryParams::default().ignoring(EntityId(2));
    let hit = world.query().line_trace_single(DOWN_START, DOWN_END, &params).unwrap();
    assert_eq!(hit.entity, EntityId(1));
}

#[test]
fn test_sweep_hits_ball() {
    let scene = query_scene();
    let (_runtime, world) = start(&scene);

    let shape = SweepShape::Sphere { radius: 0.25 };
    let identity = [0.0, 0.0, 0.0, 1.0];
    let hit = world
        .query()
        .sweep_single(&shape, identity, DOWN_START, DOWN_END, &QueryParams::default())
        .unwrap();

    assert_eq!(hit.entity, EntityId(2));
    assert_relative_eq!(hit.location[1], 3.75, epsilon = 1e-2);

    let all = world
        .query()
        .sweep_multi(&shape, identity, DOWN_START, DOWN_END, &QueryParams::default());
    assert_eq!(all.len(), 2);
    assert!(all.iter().all(|h| h.entity != EntityId(3)));
}

#[test]
fn test_hit_resolves_closest_component() {
    let base = MockComponent::new(
        40,
        BodyOptions::fixed(),
        CollisionGeometry::single(ShapeElement::cuboid(1.0, 0.5, 1.0)),
        WorldTransform::from_position(20.0, 0.0, 0.0),
    );
    let head = MockComponent::new(
        41,
        BodyOptions::fixed(),
        CollisionGeometry::single(ShapeElement::sphere(0.5)),
        WorldTransform::from_position(20.0, 3.0, 0.0),
    );
    let scene = MockScene::default().with(MockEntity::new(4, vec![base, head]));
    let (_runtime, world) = start(&scene);

    let hit = world
        .query()
        .line_trace_single([20.0, 10.0, 0.0], [20.0, -10.0, 0.0], &QueryParams::default())
        .unwrap();
    assert_eq!(hit.entity, EntityId(4));
    assert_eq!(hit.component, ComponentId(41));
    assert_eq!(world.root_body_id(EntityId(4)), world.body_id(EntityId(4), ComponentId(40)));
}

#[test]
fn test_zero_length_trace_does_not_panic() {
    let scene = query_scene();
    let (_runtime, world) = start(&scene);

    let point = [0.0, 20.0, 0.0];
    assert!(world
        .query()
        .line_trace_single(point, point, &QueryParams::default())
        .is_none());
}

#[test]
fn test_query_before_begin_play_is_empty() {
    let runtime = PhysicsRuntime::init();
    let world = runtime.create_world(BridgeConfig::default()).unwrap();

    assert!(world
        .query()
        .line_trace_single(DOWN_START, DOWN_END, &QueryParams::default())
        .is_none());
    assert!(world
        .query()
        .line_trace_multi(DOWN_START, DOWN_END, &QueryParams::default())
        .is_empty());
}

#[derive(Default)]
struct RecordingDraw {
    traces: parking_lot::Mutex<Vec<([f32; 3], [f32; 3], bool)>>,
    hits: parking_lot::Mutex<Vec<EntityId>>,
}

impl QueryDebugDraw for RecordingDraw {
    fn draw_trace(&self, start: [f32; 3], end: [f32; 3], shape: Option<&SweepShape>) {
        self.traces.lock().push((start, end, shape.is_some()));
    }

    fn draw_hit(&self, hit: &QueryHit) {
        self.hits.lock().push(hit.entity);
    }
}

#[test]
fn test_debug_draw_sees_every_query() {
    let scene = query_scene();
    let (_runtime, mut world) = start(&scene);
    let draw = std::sync::Arc::new(RecordingDraw::default());
    world.set_debug_draw(Some(draw.clone()));

    world
        .query()
        .line_trace_multi(DOWN_START, DOWN_END, &QueryParams::default());
    world.query().sweep_single(
        &SweepShape::Box { half_extents: [0.1; 3] },
        [0.0, 0.0, 0.0, 1.0],
        DOWN_START,
        DOWN_END,
        &QueryParams::default(),
    );

    assert_eq!(
        *draw.traces.lock(),
        vec![(DOWN_START, DOWN_END, false), (DOWN_START, DOWN_END, true)]
    );
    assert_eq!(*draw.hits.lock(), vec![EntityId(2), EntityId(1), EntityId(2)]);

    world.set_debug_draw(None);
    world
        .query()
        .line_trace_single(DOWN_START, DOWN_END, &QueryParams::default());
    assert_eq!(draw.traces.lock().len(), 2);
}

// ============================================================================
// Contact Tests
// ============================================================================

#[test]
fn test_falling_ball_reports_hits() {
    let scene = MockScene::default()
        .with(ground(1))
        .with(ball(2, 1.5, BodyOptions::dynamic().with_activation(true)));
    let (_runtime, mut world) = start(&scene);

    let mut events = Vec::new();
    for _ in 0..120 {
        world.step_fixed().unwrap();
        events.extend(world.drain_contact_events());
    }

    assert!(events.iter().any(|e| matches!(
        e,
        ContactEvent::Hit { entity: EntityId(2), other_entity: EntityId(1), .. }
    )));
    assert!(events.iter().any(|e| matches!(
        e,
        ContactEvent::Hit { entity: EntityId(1), other_entity: EntityId(2), .. }
    )));
    assert!(!events
        .iter()
        .any(|e| matches!(e, ContactEvent::BeginOverlap { .. })));

    let state = world.physics_state(EntityId(2), ComponentId(20)).unwrap();
    assert!(state.position[1] > 0.5);
}

#[test]
fn test_trigger_reports_begin_overlap() {
    let scene = MockScene::default()
        .with(ball(2, 6.0, BodyOptions::dynamic().with_activation(true)))
        .with(trigger(3, 6.0));
    let (_runtime, mut world) = start(&scene);

    world.step_fixed().unwrap();
    let events = world.drain_contact_events();

    assert!(events.iter().any(|e| matches!(
        e,
        ContactEvent::BeginOverlap { entity: EntityId(3), other_entity: EntityId(2), .. }
    )));
    assert!(!events.iter().any(|e| matches!(e, ContactEvent::Hit { .. })));
}

#[test]
fn test_step_callbacks_run_each_tick() {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    let scene = query_scene();
    let (_runtime, mut world) = start(&scene);

    let pre = Arc::new(AtomicU32::new(0));
    let post = Arc::new(AtomicU32::new(0));
    let pre_count = Arc::clone(&pre);
    let post_count = Arc::clone(&post);
    world.on_pre_step(move |_| {
        pre_count.fetch_add(1, Ordering::SeqCst);
    });
    world.on_post_step(move |_| {
        post_count.fetch_add(1, Ordering::SeqCst);
    });

    let dt = world.config().fixed_delta_time;
    assert_eq!(world.advance(dt * 2.5).unwrap(), 2);
    assert_eq!(pre.load(Ordering::SeqCst), 2);
    assert_eq!(post.load(Ordering::SeqCst), 2);
}

// ============================================================================
// Snapshot Tests
// ============================================================================

fn rolling_scene() -> MockScene {
    MockScene::default()
        .with(ground(1))
        .with(ball(2, 4.0, BodyOptions::dynamic().with_activation(true)))
}

#[test]
fn test_restore_reproduces_saved_bytes() {
    let scene = rolling_scene();
    let (_runtime, mut world) = start(&scene);

    for _ in 0..5 {
        world.step_fixed().unwrap();
    }
    world.save_state_for_frame(5, None).unwrap();
    let saved = world.capture_state(None).unwrap();

    for _ in 0..30 {
        world.step_fixed().unwrap();
    }
    assert!(!world.capture_state(None).unwrap().equals(&saved));

    assert!(world.restore_state_for_frame(5));
    let restored = world.capture_state(None).unwrap();
    assert!(restored.equals(&saved));
    assert_eq!(restored.find_first_mismatch(&saved), None);
    assert_eq!(restored.payload_hash(), saved.payload_hash());
}

#[test]
fn test_stale_and_missing_frames() {
    let scene = rolling_scene();
    let (_runtime, mut world) = start(&scene);
    let capacity = world.history().capacity() as u32;

    assert!(!world.restore_state_for_frame(3));

    world.save_state_for_frame(3, None).unwrap();
    assert!(world.has_state_for_frame(3));
    assert!(!world.has_state_for_frame(3 + capacity));

    // Same slot, newer frame
    world.save_state_for_frame(3 + capacity, None).unwrap();
    assert!(!world.restore_state_for_frame(3));
    assert!(matches!(
        world.try_restore_state_for_frame(3),
        Err(BridgeError::StaleSnapshot { frame: 3, .. })
    ));
    assert!(world.restore_state_for_frame(3 + capacity));
    assert_eq!(world.last_saved_state().map(|(frame, _)| frame), Some(3 + capacity));
}

#[test]
fn test_filtered_snapshot_only_touches_allowed_bodies() {
    let scene = rolling_scene();
    let (_runtime, mut world) = start(&scene);
    let ball_id = world.root_body_id(EntityId(2)).unwrap();

    let filter = BodyAllowList::new([ball_id]);
    let bytes = world.capture_state(Some(&filter)).unwrap();
    let before = world.physics_state(EntityId(2), ComponentId(20)).unwrap();

    for _ in 0..20 {
        world.step_fixed().unwrap();
    }
    assert!(world.restore_state_from_bytes(&bytes, None));
    let after = world.physics_state(EntityId(2), ComponentId(20)).unwrap();
    assert_eq!(before.position, after.position);
    assert_eq!(before.linear_velocity, after.linear_velocity);
}

#[test]
fn test_malformed_bytes_rejected() {
    let scene = rolling_scene();
    let (_runtime, mut world) = start(&scene);
    let before = world.capture_state(None).unwrap();

    assert!(!world.restore_state_from_bytes(&SnapshotBytes::new(vec![1, 2, 3]), None));
    assert!(!world.restore_state_from_bytes(&SnapshotBytes::new(Vec::new()), None));
    assert!(world.capture_state(None).unwrap().equals(&before));
}

#[test]
fn test_length_prefixed_round_trip() {
    let scene = rolling_scene();
    let (_runtime, world) = start(&scene);
    let bytes = world.capture_state(None).unwrap();

    let wire = bytes.write_length_prefixed();
    let (read, consumed) = SnapshotBytes::read_length_prefixed(&wire, world.config().max_snapshot_bytes).unwrap();
    assert_eq!(consumed, wire.len());
    assert!(read.equals(&bytes));

    assert!(SnapshotBytes::read_length_prefixed(&wire[..wire.len() - 1], 1 << 20).is_err());
}

// ============================================================================
// Lifecycle Tests
// ============================================================================

#[test]
fn test_teardown_and_restart() {
    let scene = query_scene();
    let (runtime, mut world) = start(&scene);

    world.teardown();
    assert!(!world.is_ready());
    assert!(matches!(world.step_fixed(), Err(BridgeError::NotReady)));
    assert!(world
        .query()
        .line_trace_single(DOWN_START, DOWN_END, &QueryParams::default())
        .is_none());

    // Ids restart from the bottom of each range
    world.begin_play(&scene);
    assert_eq!(world.root_body_id(EntityId(1)), Some(BodyId(21846)));

    assert!(runtime.teardown().is_err());
    drop(world);
    runtime.teardown().unwrap();
}

#[test]
fn test_runtime_cycles() {
    for _ in 0..3 {
        let scene = query_scene();
        let (runtime, world) = start(&scene);
        assert_eq!(runtime.live_worlds(), 1);
        drop(world);
        runtime.teardown().unwrap();
        assert!(!runtime.is_active());
    }
}
