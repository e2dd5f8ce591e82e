//! Body identifiers, creation options and engine builders

use crate::error::{BridgeError, Result};
use crate::filter::ObjectLayer;
use crate::host::{ComponentId, EntityId};
use crate::material::PhysicsMaterial;
use crate::user_data::UserDataHandle;
use rapier3d::prelude as rapier;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable body identifier assigned by the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BodyId(pub u32);

impl BodyId {
    /// Raw value
    pub fn raw(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for BodyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One of the three disjoint id ranges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BodyIdRange {
    Custom,
    Static,
    Dynamic,
}

/// Half-open id ranges derived from the body budget
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodyIdRanges {
    /// Custom ids, `[0, max/3)`
    pub custom: std::ops::Range<u32>,
    /// Static and sensor ids, `[max/3, 2*max/3)`
    pub fixed: std::ops::Range<u32>,
    /// Dynamic and kinematic ids, `[2*max/3, max)`
    pub dynamic: std::ops::Range<u32>,
}

impl BodyIdRanges {
    /// Split a body budget in three
    pub fn from_max_bodies(max_bodies: u32) -> Self {
        let third = max_bodies / 3;
        let two_thirds = ((max_bodies as u64 * 2) / 3) as u32;
        Self {
            custom: 0..third,
            fixed: third..two_thirds,
            dynamic: two_thirds..max_bodies,
        }
    }

    /// Range of one kind
    pub fn range(&self, range: BodyIdRange) -> std::ops::Range<u32> {
        match range {
            BodyIdRange::Custom => self.custom.clone(),
            BodyIdRange::Static => self.fixed.clone(),
            BodyIdRange::Dynamic => self.dynamic.clone(),
        }
    }

    /// Which range an id belongs to
    pub fn classify(&self, id: BodyId) -> Option<BodyIdRange> {
        [BodyIdRange::Custom, BodyIdRange::Static, BodyIdRange::Dynamic]
            .into_iter()
            .find(|kind| self.range(*kind).contains(&id.0))
    }
}

/// Monotonic id allocation per range
///
/// Counters start at each range's lower bound and are incremented before use,
/// so the first id handed out is `start + 1`. Ids are never reused until
/// [`BodyIdAllocator::reset`].
#[derive(Debug, Clone)]
pub struct BodyIdAllocator {
    ranges: BodyIdRanges,
    custom: u32,
    fixed: u32,
    dynamic: u32,
}

impl BodyIdAllocator {
    /// Create an allocator over the given ranges
    pub fn new(ranges: BodyIdRanges) -> Self {
        Self {
            custom: ranges.custom.start,
            fixed: ranges.fixed.start,
            dynamic: ranges.dynamic.start,
            ranges,
        }
    }

    /// Next id in a range
    pub fn next(&mut self, range: BodyIdRange) -> Result<BodyId> {
        let (counter, end) = match range {
            BodyIdRange::Custom => (&mut self.custom, self.ranges.custom.end),
            BodyIdRange::Static => (&mut self.fixed, self.ranges.fixed.end),
            BodyIdRange::Dynamic => (&mut self.dynamic, self.ranges.dynamic.end),
        };
        let candidate = counter.saturating_add(1);
        if candidate >= end {
            return Err(BridgeError::BodyIdRangeExhausted(range));
        }
        *counter = candidate;
        Ok(BodyId(candidate))
    }

    /// Ranges this allocator hands ids from
    pub fn ranges(&self) -> &BodyIdRanges {
        &self.ranges
    }

    /// Rewind every counter
    pub fn reset(&mut self) {
        *self = Self::new(self.ranges.clone());
    }
}

/// Motion type of a body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MotionType {
    /// Never moves
    #[default]
    Static,
    /// Fully simulated
    Dynamic,
    /// Moved by the host
    Kinematic,
}

impl MotionType {
    /// Id range bodies of this motion type draw from
    pub fn id_range(self) -> BodyIdRange {
        match self {
            MotionType::Static => BodyIdRange::Static,
            MotionType::Dynamic | MotionType::Kinematic => BodyIdRange::Dynamic,
        }
    }

    /// Object layer bodies of this motion type live in
    pub fn object_layer(self) -> ObjectLayer {
        match self {
            MotionType::Static => ObjectLayer::NonMoving,
            MotionType::Dynamic | MotionType::Kinematic => ObjectLayer::Moving,
        }
    }
}

impl fmt::Display for MotionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MotionType::Static => "static",
            MotionType::Dynamic => "dynamic",
            MotionType::Kinematic => "kinematic",
        };
        f.write_str(name)
    }
}

impl From<MotionType> for rapier::RigidBodyType {
    fn from(t: MotionType) -> Self {
        match t {
            MotionType::Static => rapier::RigidBodyType::Fixed,
            MotionType::Dynamic => rapier::RigidBodyType::Dynamic,
            MotionType::Kinematic => rapier::RigidBodyType::KinematicPositionBased,
        }
    }
}

/// Gravity handling of a body
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum GravityOverride {
    /// World gravity at factor 1
    #[default]
    None,
    /// World gravity scaled by a fixed factor
    StaticFactor(f32),
    /// Gravity and damping are applied by the owning mover
    FromMover,
}

/// Per-component body creation options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BodyOptions {
    /// Motion type
    pub motion_type: MotionType,
    /// Insert the body awake
    pub automatically_activate: bool,
    /// Allow the body to fall asleep
    pub can_ever_sleep: bool,
    /// Take friction/restitution from the component's material
    pub use_physics_material: bool,
    /// Emit overlap events
    pub generate_overlap_events: bool,
    /// Emit collision (hit) events
    pub generate_collision_events: bool,
    /// Lock rotation to the vertical axis
    pub keep_shape_vertical: bool,
    /// Restitution when no material is used
    pub restitution: f32,
    /// Friction when no material is used
    pub friction: f32,
    /// Mass override for dynamic bodies, inertia follows from the shape
    pub mass: f32,
    /// Linear damping
    pub linear_damping: f32,
    /// Angular damping
    pub angular_damping: f32,
    /// Gravity handling
    pub gravity_override: GravityOverride,
}

impl Default for BodyOptions {
    fn default() -> Self {
        Self {
            motion_type: MotionType::Static,
            automatically_activate: false,
            can_ever_sleep: false,
            use_physics_material: false,
            generate_overlap_events: true,
            generate_collision_events: true,
            keep_shape_vertical: false,
            restitution: 1.0,
            friction: 1.0,
            mass: 10.0,
            linear_damping: 0.05,
            angular_damping: 0.05,
            gravity_override: GravityOverride::None,
        }
    }
}

impl BodyOptions {
    /// Static body options
    pub fn fixed() -> Self {
        Self::default()
    }

    /// Dynamic body options
    pub fn dynamic() -> Self {
        Self {
            motion_type: MotionType::Dynamic,
            ..Default::default()
        }
    }

    /// Kinematic body options
    pub fn kinematic() -> Self {
        Self {
            motion_type: MotionType::Kinematic,
            ..Default::default()
        }
    }

    /// Overlap-only body
    pub fn sensor() -> Self {
        Self {
            generate_collision_events: false,
            ..Default::default()
        }
    }

    /// Set mass
    pub fn with_mass(mut self, mass: f32) -> Self {
        self.mass = mass;
        self
    }

    /// Set activation on insert
    pub fn with_activation(mut self, activate: bool) -> Self {
        self.automatically_activate = activate;
        self
    }

    /// Allow sleeping
    pub fn with_sleep(mut self, can_sleep: bool) -> Self {
        self.can_ever_sleep = can_sleep;
        self
    }

    /// Set event generation flags
    pub fn with_events(mut self, overlap: bool, collision: bool) -> Self {
        self.generate_overlap_events = overlap;
        self.generate_collision_events = collision;
        self
    }

    /// Set gravity handling
    pub fn with_gravity_override(mut self, gravity: GravityOverride) -> Self {
        self.gravity_override = gravity;
        self
    }

    /// Set friction and restitution
    pub fn with_surface(mut self, friction: f32, restitution: f32) -> Self {
        self.friction = friction;
        self.restitution = restitution;
        self
    }

    /// Lock rotation to the vertical axis
    pub fn with_vertical_lock(mut self, enabled: bool) -> Self {
        self.keep_shape_vertical = enabled;
        self
    }

    /// Take friction/restitution from the material
    pub fn with_physics_material(mut self, enabled: bool) -> Self {
        self.use_physics_material = enabled;
        self
    }

    /// Overlaps but never blocks
    pub fn is_sensor(&self) -> bool {
        self.generate_overlap_events && !self.generate_collision_events
    }

    /// Nobody listens to this body; it is registered with collision disabled
    pub fn is_demoted(&self) -> bool {
        !self.generate_overlap_events && !self.generate_collision_events
    }

    /// Motion type actually used for the body. Sensors are always static.
    pub fn effective_motion_type(&self) -> MotionType {
        if self.is_sensor() {
            MotionType::Static
        } else {
            self.motion_type
        }
    }

    fn gravity_scale(&self) -> f32 {
        match self.gravity_override {
            GravityOverride::None => 1.0,
            GravityOverride::StaticFactor(factor) => factor,
            GravityOverride::FromMover => 0.0,
        }
    }

    /// Build the rapier rigid body
    pub(crate) fn to_rapier_body(&self, position: rapier::Isometry<f32>, body_id: BodyId) -> rapier::RigidBody {
        let motion_type = self.effective_motion_type();
        let (linear_damping, angular_damping) = match self.gravity_override {
            GravityOverride::FromMover => (0.0, 0.0),
            _ => (self.linear_damping, self.angular_damping),
        };

        let mut builder = rapier::RigidBodyBuilder::new(motion_type.into())
            .position(position)
            .gravity_scale(self.gravity_scale())
            .linear_damping(linear_damping)
            .angular_damping(angular_damping)
            .can_sleep(self.can_ever_sleep)
            .user_data(body_id.0 as u128);

        if motion_type != MotionType::Static && !self.automatically_activate {
            builder = builder.sleeping(true);
        }

        if self.keep_shape_vertical {
            builder = builder.locked_axes(
                rapier::LockedAxes::ROTATION_LOCKED_X | rapier::LockedAxes::ROTATION_LOCKED_Z,
            );
        }

        builder.build()
    }

    /// Build the rapier collider for a body
    pub(crate) fn to_rapier_collider(
        &self,
        shape: rapier::SharedShape,
        material: Option<&PhysicsMaterial>,
        user_data: UserDataHandle,
    ) -> rapier::Collider {
        let motion_type = self.effective_motion_type();
        let (friction, restitution) = match material {
            Some(material) if self.use_physics_material => (material.friction, material.restitution),
            _ => (self.friction, self.restitution),
        };

        let groups = if self.is_demoted() {
            rapier::InteractionGroups::none()
        } else {
            motion_type.object_layer().interaction_groups()
        };

        let mut builder = rapier::ColliderBuilder::new(shape)
            .friction(friction)
            .restitution(restitution)
            .collision_groups(groups)
            .active_hooks(
                rapier::ActiveHooks::FILTER_CONTACT_PAIRS | rapier::ActiveHooks::FILTER_INTERSECTION_PAIR,
            )
            .user_data(user_data.to_bits());

        if !self.is_demoted() {
            builder = builder.active_events(rapier::ActiveEvents::COLLISION_EVENTS);
        }

        if self.is_sensor() {
            builder = builder.sensor(true).active_collision_types(
                rapier::ActiveCollisionTypes::default() | rapier::ActiveCollisionTypes::KINEMATIC_FIXED,
            );
        }

        if motion_type == MotionType::Dynamic {
            builder = builder.mass(self.mass);
        }

        builder.build()
    }
}

/// Bookkeeping for one created body
#[derive(Debug, Clone)]
pub struct BodyRecord {
    /// Owning entity
    pub entity: EntityId,
    /// Owning sub-component
    pub component: ComponentId,
    /// Rapier body
    pub body: rapier::RigidBodyHandle,
    /// Rapier collider
    pub collider: rapier::ColliderHandle,
    /// Motion type the body was created with
    pub motion_type: MotionType,
    /// Overlap-only body
    pub sensor: bool,
    /// Registered with collision disabled
    pub demoted: bool,
    /// Attached user data
    pub user_data: UserDataHandle,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_ranges_do_not_overlap() {
        for max in [3u32, 4, 5, 100, 65536, u32::MAX] {
            let ranges = BodyIdRanges::from_max_bodies(max);
            assert_eq!(ranges.custom.end, ranges.fixed.start);
            assert_eq!(ranges.fixed.end, ranges.dynamic.start);
            assert_eq!(ranges.dynamic.end, max);
        }
    }

    #[test]
    fn test_allocator_pre_increments() {
        let mut ids = BodyIdAllocator::new(BodyIdRanges::from_max_bodies(65536));

        assert_eq!(ids.next(BodyIdRange::Static).unwrap(), BodyId(21846));
        assert_eq!(ids.next(BodyIdRange::Static).unwrap(), BodyId(21847));
        assert_eq!(ids.next(BodyIdRange::Dynamic).unwrap(), BodyId(43691));
        assert_eq!(ids.next(BodyIdRange::Custom).unwrap(), BodyId(1));

        ids.reset();
        assert_eq!(ids.next(BodyIdRange::Static).unwrap(), BodyId(21846));
    }

    #[test]
    fn test_allocator_exhaustion() {
        let mut ids = BodyIdAllocator::new(BodyIdRanges::from_max_bodies(12));
        // static range is [4, 8): ids 5, 6, 7
        assert!(ids.next(BodyIdRange::Static).is_ok());
        assert!(ids.next(BodyIdRange::Static).is_ok());
        assert_eq!(ids.next(BodyIdRange::Static).unwrap(), BodyId(7));
        assert!(matches!(
            ids.next(BodyIdRange::Static),
            Err(BridgeError::BodyIdRangeExhausted(BodyIdRange::Static))
        ));
    }

    #[test]
    fn test_classify() {
        let ranges = BodyIdRanges::from_max_bodies(300);
        assert_eq!(ranges.classify(BodyId(5)), Some(BodyIdRange::Custom));
        assert_eq!(ranges.classify(BodyId(150)), Some(BodyIdRange::Static));
        assert_eq!(ranges.classify(BodyId(250)), Some(BodyIdRange::Dynamic));
        assert_eq!(ranges.classify(BodyId(300)), None);
    }

    #[test]
    fn test_sensor_and_demotion_flags() {
        let sensor = BodyOptions::dynamic().with_events(true, false);
        assert!(sensor.is_sensor());
        assert!(!sensor.is_demoted());
        assert_eq!(sensor.effective_motion_type(), MotionType::Static);

        let quiet = BodyOptions::dynamic().with_events(false, false);
        assert!(quiet.is_demoted());
        assert!(!quiet.is_sensor());
        assert_eq!(quiet.effective_motion_type(), MotionType::Dynamic);
    }

    #[test]
    fn test_motion_type_routing() {
        assert_eq!(MotionType::Static.id_range(), BodyIdRange::Static);
        assert_eq!(MotionType::Kinematic.id_range(), BodyIdRange::Dynamic);
        assert_eq!(MotionType::Dynamic.object_layer(), ObjectLayer::Moving);
        assert_eq!(MotionType::Kinematic.to_string(), "kinematic");
    }

    #[test]
    fn test_rapier_body_from_options() {
        let options = BodyOptions::dynamic()
            .with_activation(true)
            .with_gravity_override(GravityOverride::FromMover);
        let body = options.to_rapier_body(rapier::Isometry::translation(1.0, 2.0, 3.0), BodyId(43691));

        assert!(body.is_dynamic());
        assert!(!body.is_sleeping());
        assert_relative_eq!(body.gravity_scale(), 0.0);
        assert_relative_eq!(body.linear_damping(), 0.0);
        assert_relative_eq!(body.translation().y, 2.0);
        assert_eq!(body.user_data, 43691);
    }
}
