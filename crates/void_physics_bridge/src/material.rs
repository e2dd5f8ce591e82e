//! Physics materials and the shared material registry

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Tolerance used when comparing material coefficients
const MATERIAL_EPSILON: f32 = 1e-6;

/// Surface material defining friction and restitution
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PhysicsMaterial {
    /// Friction coefficient
    pub friction: f32,
    /// Restitution/bounciness
    pub restitution: f32,
    /// Host surface type this material stands for
    pub surface_type: u8,
}

impl Default for PhysicsMaterial {
    fn default() -> Self {
        Self {
            friction: 0.5,
            restitution: 0.0,
            surface_type: 0,
        }
    }
}

impl PhysicsMaterial {
    /// Create a new physics material
    pub fn new(friction: f32, restitution: f32, surface_type: u8) -> Self {
        Self {
            friction,
            restitution,
            surface_type,
        }
    }
}

impl PartialEq for PhysicsMaterial {
    fn eq(&self, other: &Self) -> bool {
        (self.friction - other.friction).abs() < MATERIAL_EPSILON
            && (self.restitution - other.restitution).abs() < MATERIAL_EPSILON
            && self.surface_type == other.surface_type
    }
}

/// Shared material instance; identity is pointer identity
pub type MaterialRef = Arc<PhysicsMaterial>;

/// Deduplicates materials by surface type
///
/// Owned by the runtime and shared by every world created from it.
#[derive(Debug, Default)]
pub struct MaterialRegistry {
    by_surface: RwLock<HashMap<u8, MaterialRef>>,
}

impl MaterialRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the registered material for this surface type, registering it on first use
    pub fn get_or_register(&self, material: PhysicsMaterial) -> MaterialRef {
        if let Some(found) = self.by_surface.read().get(&material.surface_type) {
            return Arc::clone(found);
        }

        let mut map = self.by_surface.write();
        Arc::clone(
            map.entry(material.surface_type)
                .or_insert_with(|| Arc::new(material)),
        )
    }

    /// Look up a material by surface type
    pub fn get(&self, surface_type: u8) -> Option<MaterialRef> {
        self.by_surface.read().get(&surface_type).cloned()
    }

    /// Number of registered materials
    pub fn len(&self) -> usize {
        self.by_surface.read().len()
    }

    /// Whether nothing has been registered
    pub fn is_empty(&self) -> bool {
        self.by_surface.read().is_empty()
    }

    /// Drop every registered material
    pub fn clear(&self) {
        self.by_surface.write().clear();
    }
}
