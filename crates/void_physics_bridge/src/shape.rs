//! Shape cache
//!
//! Collision shapes are immutable and shared. Lookups scan the pool linearly
//! and compare dimensions within a tolerance, so near-identical requests
//! resolve to the same `Arc`.

use crate::error::{BridgeError, Result};
use crate::host::MeshKey;
use crate::material::MaterialRef;
use crate::user_data::ShapeDimensions;
use rapier3d::prelude as rapier;
use std::sync::Arc;

/// Parameters identifying a cached shape
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ShapeKey {
    /// Box with half extents
    Box { half_extents: [f32; 3] },
    /// Sphere
    Sphere { radius: f32 },
    /// Capsule along Y
    Capsule { radius: f32, half_height: f32 },
    /// Convex hull derived from a mesh
    ConvexHull {
        mesh: MeshKey,
        hull_index: u16,
        scale: [f32; 3],
    },
}

fn nearly_equal(a: f32, b: f32, tolerance: f32) -> bool {
    (a - b).abs() <= tolerance
}

fn nearly_equal3(a: &[f32; 3], b: &[f32; 3], tolerance: f32) -> bool {
    a.iter().zip(b).all(|(a, b)| nearly_equal(*a, *b, tolerance))
}

/// Whether the points contain four that are not coplanar
fn spans_volume(points: &[rapier::Point<f32>]) -> bool {
    const EPS: f32 = 1.0e-6;
    let Some(origin) = points.first() else {
        return false;
    };
    let Some(u) = points.iter().map(|p| p - origin).find(|v| v.norm() > EPS) else {
        return false;
    };
    let Some(normal) = points
        .iter()
        .map(|p| u.cross(&(p - origin)))
        .find(|n| n.norm() > EPS)
    else {
        return false;
    };
    points.iter().any(|p| normal.dot(&(p - origin)).abs() > EPS)
}

impl ShapeKey {
    /// Whether two keys describe the same shape within `tolerance`
    pub fn matches(&self, other: &ShapeKey, tolerance: f32) -> bool {
        match (self, other) {
            (Self::Box { half_extents: a }, Self::Box { half_extents: b }) => nearly_equal3(a, b, tolerance),
            (Self::Sphere { radius: a }, Self::Sphere { radius: b }) => nearly_equal(*a, *b, tolerance),
            (
                Self::Capsule { radius: ra, half_height: ha },
                Self::Capsule { radius: rb, half_height: hb },
            ) => nearly_equal(*ra, *rb, tolerance) && nearly_equal(*ha, *hb, tolerance),
            (
                Self::ConvexHull { mesh: ma, hull_index: ia, scale: sa },
                Self::ConvexHull { mesh: mb, hull_index: ib, scale: sb },
            ) => ma == mb && ia == ib && nearly_equal3(sa, sb, tolerance),
            _ => false,
        }
    }

    /// Short kind name for logs
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Box { .. } => "box",
            Self::Sphere { .. } => "sphere",
            Self::Capsule { .. } => "capsule",
            Self::ConvexHull { .. } => "convex hull",
        }
    }

    fn build_primitive(&self) -> Option<rapier::SharedShape> {
        let positive = |v: f32| v.is_finite() && v > 0.0;
        match *self {
            Self::Box { half_extents: [x, y, z] } if positive(x) && positive(y) && positive(z) => {
                Some(rapier::SharedShape::cuboid(x, y, z))
            }
            Self::Sphere { radius } if positive(radius) => Some(rapier::SharedShape::ball(radius)),
            Self::Capsule { radius, half_height } if positive(radius) && half_height.is_finite() && half_height >= 0.0 => {
                Some(rapier::SharedShape::capsule_y(half_height, radius))
            }
            _ => None,
        }
    }
}

/// A pooled, immutable collision shape
#[derive(Clone)]
pub struct ShapeRecord {
    key: ShapeKey,
    material: Option<MaterialRef>,
    shape: rapier::SharedShape,
}

impl std::fmt::Debug for ShapeRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShapeRecord")
            .field("key", &self.key)
            .field("material", &self.material)
            .finish_non_exhaustive()
    }
}

impl ShapeRecord {
    /// Parameters the shape was built from
    pub fn key(&self) -> &ShapeKey {
        &self.key
    }

    /// Material the shape was requested with
    pub fn material(&self) -> Option<&MaterialRef> {
        self.material.as_ref()
    }

    /// Engine shape
    pub fn shape(&self) -> &rapier::SharedShape {
        &self.shape
    }

    /// Cached dimensions for user data
    pub fn dimensions(&self) -> ShapeDimensions {
        match self.key {
            ShapeKey::Sphere { radius } => ShapeDimensions {
                radius,
                width: radius * 2.0,
                height: radius * 2.0,
            },
            ShapeKey::Capsule { radius, half_height } => ShapeDimensions {
                radius,
                width: radius * 2.0,
                height: (half_height + radius) * 2.0,
            },
            ShapeKey::Box { .. } | ShapeKey::ConvexHull { .. } => {
                let half = self.shape.compute_local_aabb().half_extents();
                ShapeDimensions {
                    radius: half.x.max(half.y).max(half.z),
                    width: half.x.max(half.z) * 2.0,
                    height: half.y * 2.0,
                }
            }
        }
    }
}

/// Deduplicating pool of shapes, released together at teardown
#[derive(Debug)]
pub struct ShapeCache {
    records: Vec<Arc<ShapeRecord>>,
    tolerance: f32,
}

impl Default for ShapeCache {
    fn default() -> Self {
        Self::new(1.0e-5)
    }
}

impl ShapeCache {
    /// Create an empty cache comparing dimensions within `tolerance`
    pub fn new(tolerance: f32) -> Self {
        Self {
            records: Vec::new(),
            tolerance,
        }
    }

    /// Fetch or build a box, sphere or capsule
    pub fn get_or_create(&mut self, key: ShapeKey, material: Option<&MaterialRef>) -> Result<Arc<ShapeRecord>> {
        if let Some(found) = self.find(&key, material) {
            return Ok(found);
        }
        let shape = key.build_primitive();
        self.insert(key, material, shape)
    }

    /// Fetch or build a convex hull from unscaled source points
    pub fn get_or_create_hull(
        &mut self,
        mesh: MeshKey,
        hull_index: u16,
        scale: [f32; 3],
        points: &[[f32; 3]],
        material: Option<&MaterialRef>,
    ) -> Result<Arc<ShapeRecord>> {
        let key = ShapeKey::ConvexHull {
            mesh,
            hull_index,
            scale,
        };
        if let Some(found) = self.find(&key, material) {
            return Ok(found);
        }

        let scaled: Vec<rapier::Point<f32>> = points
            .iter()
            .map(|p| rapier::Point::new(p[0] * scale[0], p[1] * scale[1], p[2] * scale[2]))
            .collect();
        let shape = if spans_volume(&scaled) {
            rapier::SharedShape::convex_hull(&scaled)
        } else {
            None
        };
        self.insert(key, material, shape)
    }

    /// Linear scan for a matching record.
    ///
    /// A requested material must be the same instance; no requested material
    /// matches any cached one.
    pub fn find(&self, key: &ShapeKey, material: Option<&MaterialRef>) -> Option<Arc<ShapeRecord>> {
        self.records
            .iter()
            .find(|record| {
                record.key.matches(key, self.tolerance)
                    && match (material, &record.material) {
                        (None, _) => true,
                        (Some(wanted), Some(cached)) => Arc::ptr_eq(wanted, cached),
                        (Some(_), None) => false,
                    }
            })
            .cloned()
    }

    fn insert(
        &mut self,
        key: ShapeKey,
        material: Option<&MaterialRef>,
        shape: Option<rapier::SharedShape>,
    ) -> Result<Arc<ShapeRecord>> {
        let Some(shape) = shape else {
            log::error!("Failed to create {} shape from {:?}", key.kind_name(), key);
            return Err(BridgeError::ShapeCreationFailed(format!("{} {:?}", key.kind_name(), key)));
        };

        let record = Arc::new(ShapeRecord {
            key,
            material: material.cloned(),
            shape,
        });
        self.records.push(Arc::clone(&record));
        Ok(record)
    }

    /// Number of pooled shapes
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the pool is empty
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Release every pooled shape
    pub fn clear(&mut self) {
        self.records.clear();
    }
}
