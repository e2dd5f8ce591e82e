//! Per-entity record of the bodies created for it

use crate::body::BodyId;
use crate::filter::ResponseContainer;
use crate::host::{ComponentId, EntityId};
use crate::user_data::ShapeDimensions;

/// One body created for a sub-component
#[derive(Debug, Clone)]
pub struct DescriptorEntry {
    /// Sub-component the body belongs to
    pub component: ComponentId,
    /// Requested body id. Unresolved when creation failed.
    pub body_id: BodyId,
    /// Whether the engine body exists
    pub created: bool,
    /// Response table the body was filtered with
    pub responses: ResponseContainer,
    /// Root entry of the entity
    pub is_root: bool,
    /// Component may be activated and put to sleep
    pub movable: bool,
    /// Overlap-only body
    pub sensor: bool,
    /// Registered with collision disabled
    pub demoted: bool,
    /// Cached dimensions
    pub dimensions: ShapeDimensions,
}

/// Ordered list of an entity's bodies
#[derive(Debug, Clone)]
pub struct ShapeDescriptor {
    entity: EntityId,
    entries: Vec<DescriptorEntry>,
}

impl ShapeDescriptor {
    /// Create an empty descriptor
    pub fn new(entity: EntityId) -> Self {
        Self {
            entity,
            entries: Vec::new(),
        }
    }

    /// Owning entity
    pub fn entity(&self) -> EntityId {
        self.entity
    }

    /// Append an entry. Only the first entry flagged root keeps the flag.
    pub fn push(&mut self, mut entry: DescriptorEntry) {
        if entry.is_root && self.root().is_some() {
            entry.is_root = false;
        }
        self.entries.push(entry);
    }

    /// Entries in creation order
    pub fn entries(&self) -> &[DescriptorEntry] {
        &self.entries
    }

    /// Entries whose body exists
    pub fn created_entries(&self) -> impl Iterator<Item = &DescriptorEntry> {
        self.entries.iter().filter(|e| e.created)
    }

    /// Root entry, if any
    pub fn root(&self) -> Option<&DescriptorEntry> {
        self.entries.iter().find(|e| e.is_root)
    }

    /// Root entry, or the first entry when no root was designated
    pub fn root_or_first(&self) -> Option<&DescriptorEntry> {
        self.root().or_else(|| self.entries.first())
    }

    /// First entry of a component
    pub fn entry(&self, component: ComponentId) -> Option<&DescriptorEntry> {
        self.entries.iter().find(|e| e.component == component)
    }

    /// Body of a component
    pub fn body_id(&self, component: ComponentId) -> Option<BodyId> {
        self.entry(component).map(|e| e.body_id)
    }

    /// Response table of a component, falling back to an empty table
    pub fn response_container(&self, component: ComponentId) -> ResponseContainer {
        self.entry(component).map(|e| e.responses).unwrap_or_default()
    }

    /// Entry whose body position is nearest to `point`.
    ///
    /// A single-entry descriptor returns that entry without consulting
    /// `position_of`. Entries whose position cannot be resolved are skipped.
    pub fn closest_entry<F>(&self, point: [f32; 3], mut position_of: F) -> Option<&DescriptorEntry>
    where
        F: FnMut(BodyId) -> Option<[f32; 3]>,
    {
        if self.entries.len() == 1 {
            return self.entries.first();
        }

        let distance_sq = |p: [f32; 3]| {
            let d = [p[0] - point[0], p[1] - point[1], p[2] - point[2]];
            d[0] * d[0] + d[1] * d[1] + d[2] * d[2]
        };

        self.created_entries()
            .filter_map(|entry| position_of(entry.body_id).map(|p| (entry, distance_sq(p))))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(entry, _)| entry)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
