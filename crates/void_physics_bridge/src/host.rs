//! Host scene-graph collaborator interfaces
//!
//! The bridge never owns entities. It reads them through these traits once at
//! registration time and afterwards refers to them only by id.

use crate::body::BodyOptions;
use crate::filter::ResponseContainer;
use crate::material::PhysicsMaterial;
use rapier3d::na::{Quaternion, UnitQuaternion};
use rapier3d::prelude as rapier;
use serde::{Deserialize, Serialize};

/// Host entity handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub u64);

/// Host sub-component handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComponentId(pub u64);

/// Identifies the source mesh a convex hull was derived from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MeshKey(pub u64);

/// World-space placement of a component
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorldTransform {
    /// Translation
    pub position: [f32; 3],
    /// Rotation quaternion (x, y, z, w)
    pub rotation: [f32; 4],
    /// Non-uniform scale
    pub scale: [f32; 3],
}

impl Default for WorldTransform {
    fn default() -> Self {
        Self {
            position: [0.0, 0.0, 0.0],
            rotation: [0.0, 0.0, 0.0, 1.0],
            scale: [1.0, 1.0, 1.0],
        }
    }
}

impl WorldTransform {
    /// Identity rotation and unit scale at a position
    pub fn from_position(x: f32, y: f32, z: f32) -> Self {
        Self {
            position: [x, y, z],
            ..Default::default()
        }
    }

    /// Set rotation
    pub fn with_rotation(mut self, rotation: [f32; 4]) -> Self {
        self.rotation = rotation;
        self
    }

    /// Set scale
    pub fn with_scale(mut self, x: f32, y: f32, z: f32) -> Self {
        self.scale = [x, y, z];
        self
    }

    /// Rigid part of the transform (scale dropped)
    pub fn to_isometry(&self) -> rapier::Isometry<f32> {
        make_isometry(self.position, self.rotation)
    }
}

/// Build an isometry from a position and an (x, y, z, w) quaternion
pub(crate) fn make_isometry(position: [f32; 3], rotation: [f32; 4]) -> rapier::Isometry<f32> {
    rapier::Isometry::from_parts(
        rapier::Translation::new(position[0], position[1], position[2]),
        UnitQuaternion::from_quaternion(Quaternion::new(
            rotation[3],
            rotation[0],
            rotation[1],
            rotation[2],
        )),
    )
}

/// One primitive of a component's collision geometry, in component space
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ShapeElement {
    /// Oriented box
    Box {
        center: [f32; 3],
        rotation: [f32; 4],
        half_extents: [f32; 3],
    },
    /// Sphere
    Sphere { center: [f32; 3], radius: f32 },
    /// Capsule aligned along its local Y axis
    Capsule {
        center: [f32; 3],
        rotation: [f32; 4],
        radius: f32,
        half_height: f32,
    },
    /// Convex hull from unscaled source points
    ConvexHull { points: Vec<[f32; 3]> },
}

impl ShapeElement {
    /// Axis-aligned box at the component origin
    pub fn cuboid(hx: f32, hy: f32, hz: f32) -> Self {
        Self::Box {
            center: [0.0; 3],
            rotation: [0.0, 0.0, 0.0, 1.0],
            half_extents: [hx, hy, hz],
        }
    }

    /// Sphere at the component origin
    pub fn sphere(radius: f32) -> Self {
        Self::Sphere {
            center: [0.0; 3],
            radius,
        }
    }

    /// Upright capsule at the component origin
    pub fn capsule(radius: f32, half_height: f32) -> Self {
        Self::Capsule {
            center: [0.0; 3],
            rotation: [0.0, 0.0, 0.0, 1.0],
            radius,
            half_height,
        }
    }

    /// Whether this element takes part in compound assembly
    pub fn is_primitive(&self) -> bool {
        !matches!(self, Self::ConvexHull { .. })
    }
}

/// Aggregate collision geometry of a component
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollisionGeometry {
    /// Source mesh for hull elements
    pub mesh: Option<MeshKey>,
    /// Elements in declaration order
    pub elements: Vec<ShapeElement>,
}

impl CollisionGeometry {
    /// Geometry made of a single element
    pub fn single(element: ShapeElement) -> Self {
        Self {
            mesh: None,
            elements: vec![element],
        }
    }

    /// Attach a source mesh
    pub fn with_mesh(mut self, mesh: MeshKey) -> Self {
        self.mesh = Some(mesh);
        self
    }

    /// Append an element
    pub fn with_element(mut self, element: ShapeElement) -> Self {
        self.elements.push(element);
        self
    }
}

/// Capability every collidable sub-component implements
pub trait CollidableComponent {
    /// Component handle
    fn component_id(&self) -> ComponentId;

    /// Body creation options
    fn body_options(&self) -> &BodyOptions;

    /// Per-channel responses declared by the component
    fn default_response_container(&self) -> &ResponseContainer;

    /// Channel this component's object type occupies (0..31)
    fn object_channel(&self) -> u8;

    /// Current world transform
    fn world_transform(&self) -> WorldTransform;

    /// Collision geometry
    fn collision_geometry(&self) -> &CollisionGeometry;

    /// Surface material, if the component has one
    fn physics_material(&self) -> Option<PhysicsMaterial> {
        None
    }

    /// Movable components may be activated and put to sleep
    fn is_movable(&self) -> bool;
}

/// A host entity owning collidable components
pub trait SceneEntity {
    /// Entity handle
    fn entity_id(&self) -> EntityId;

    /// The component marked as the entity root, if any
    fn root_component(&self) -> Option<ComponentId>;

    /// Collidable components in a stable order
    fn collidable_components(&self) -> Vec<&dyn CollidableComponent>;
}

/// Entity enumeration offered by the host
pub trait SceneHost {
    /// Entities to register at world start
    fn entities(&self) -> Vec<&dyn SceneEntity>;
}
