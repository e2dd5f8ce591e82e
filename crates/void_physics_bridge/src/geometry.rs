//! Converts a component's collision geometry into engine shapes

use crate::host::{make_isometry, CollisionGeometry, MeshKey, ShapeElement};
use crate::material::MaterialRef;
use crate::shape::{ShapeCache, ShapeKey, ShapeRecord};
use crate::user_data::ShapeDimensions;
use rapier3d::prelude as rapier;
use std::sync::Arc;

/// A shape ready to become one body, placed relative to its component
#[derive(Clone)]
pub struct ExtractedShape {
    /// Engine shape (a compound when several primitives were merged)
    pub shape: rapier::SharedShape,
    /// Cached record backing a single-element shape
    pub record: Option<Arc<ShapeRecord>>,
    /// Placement relative to the component transform
    pub local: rapier::Isometry<f32>,
    /// Dimensions for user data
    pub dimensions: ShapeDimensions,
}

fn abs3(v: [f32; 3]) -> [f32; 3] {
    [v[0].abs(), v[1].abs(), v[2].abs()]
}

fn scaled_center(center: [f32; 3], scale: [f32; 3]) -> [f32; 3] {
    [center[0] * scale[0], center[1] * scale[1], center[2] * scale[2]]
}

/// Cache key and local placement of a primitive after scaling.
///
/// Boxes scale on every axis, spheres by X, capsules radius by X and half
/// height by Y.
fn primitive_key(element: &ShapeElement, scale: [f32; 3]) -> Option<(ShapeKey, rapier::Isometry<f32>)> {
    let s = abs3(scale);
    match element {
        ShapeElement::Box {
            center,
            rotation,
            half_extents,
        } => Some((
            ShapeKey::Box {
                half_extents: [half_extents[0] * s[0], half_extents[1] * s[1], half_extents[2] * s[2]],
            },
            make_isometry(scaled_center(*center, scale), *rotation),
        )),
        ShapeElement::Sphere { center, radius } => Some((
            ShapeKey::Sphere { radius: radius * s[0] },
            make_isometry(scaled_center(*center, scale), [0.0, 0.0, 0.0, 1.0]),
        )),
        ShapeElement::Capsule {
            center,
            rotation,
            radius,
            half_height,
        } => Some((
            ShapeKey::Capsule {
                radius: radius * s[0],
                half_height: half_height * s[1],
            },
            make_isometry(scaled_center(*center, scale), *rotation),
        )),
        ShapeElement::ConvexHull { .. } => None,
    }
}

fn aabb_dimensions(shape: &rapier::SharedShape) -> ShapeDimensions {
    let half = shape.compute_local_aabb().half_extents();
    ShapeDimensions {
        radius: half.x.max(half.y).max(half.z),
        width: half.x.max(half.z) * 2.0,
        height: half.y * 2.0,
    }
}

/// Build the shapes of one component.
///
/// Two or more primitives merge into a single compound. Every convex hull
/// becomes its own shape. Elements that fail to build are logged by the cache
/// and skipped; the rest of the component still registers.
pub fn extract_shapes(
    geometry: &CollisionGeometry,
    fallback_mesh: MeshKey,
    scale: [f32; 3],
    material: Option<&MaterialRef>,
    cache: &mut ShapeCache,
) -> Vec<ExtractedShape> {
    let mut out = Vec::new();

    let mut primitives = Vec::new();
    for element in geometry.elements.iter().filter(|e| e.is_primitive()) {
        let Some((key, local)) = primitive_key(element, scale) else {
            continue;
        };
        if let Ok(record) = cache.get_or_create(key, material) {
            primitives.push((record, local));
        }
    }

    match primitives.len() {
        0 => {}
        1 => {
            let (record, local) = primitives.remove(0);
            out.push(ExtractedShape {
                shape: record.shape().clone(),
                dimensions: record.dimensions(),
                record: Some(record),
                local,
            });
        }
        _ => {
            let parts = primitives
                .iter()
                .map(|(record, local)| (*local, record.shape().clone()))
                .collect();
            let shape = rapier::SharedShape::compound(parts);
            out.push(ExtractedShape {
                dimensions: aabb_dimensions(&shape),
                shape,
                record: None,
                local: rapier::Isometry::identity(),
            });
        }
    }

    let mesh = geometry.mesh.unwrap_or(fallback_mesh);
    let hulls = geometry.elements.iter().filter_map(|e| match e {
        ShapeElement::ConvexHull { points } => Some(points),
        _ => None,
    });
    for (hull_index, points) in hulls.enumerate() {
        let Ok(record) = cache.get_or_create_hull(mesh, hull_index as u16, scale, points, material) else {
            continue;
        };
        out.push(ExtractedShape {
            shape: record.shape().clone(),
            dimensions: record.dimensions(),
            record: Some(record),
            local: rapier::Isometry::identity(),
        });
    }

    out
}
