//! Per-body user data and the arena that owns it
//!
//! Colliders carry a tagged `u128` handle instead of a pointer. The handle
//! packs a magic tag, the store generation and an arena index; anything that
//! does not match the live store resolves to `None`.

use crate::body::BodyId;
use crate::filter::ChannelFilter;
use crate::host::{ComponentId, EntityId};
use crate::material::MaterialRef;

const USER_DATA_MAGIC: u32 = 0xB011_E7DA;

/// Cached shape dimensions for downstream geometric queries
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ShapeDimensions {
    /// Sphere/capsule radius, or the largest box half extent
    pub radius: f32,
    /// Horizontal extent
    pub width: f32,
    /// Vertical extent
    pub height: f32,
}

/// Data attached to every body the bridge creates
#[derive(Debug, Clone)]
pub struct EntityUserData {
    /// Owning entity
    pub entity: EntityId,
    /// Owning sub-component
    pub component: ComponentId,
    /// Body the data is attached to
    pub body_id: BodyId,
    /// Material back-reference
    pub material: Option<MaterialRef>,
    /// Cached dimensions
    pub dimensions: ShapeDimensions,
    /// Channel and masks used by the pair filters
    pub filter: ChannelFilter,
    /// Emit begin/end overlap events for this side
    pub generate_overlap_events: bool,
    /// Emit hit events for this side
    pub generate_hit_events: bool,
}

/// Opaque reference to an [`EntityUserData`] record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UserDataHandle {
    index: u32,
    generation: u32,
}

impl UserDataHandle {
    /// Pack into a collider user-data word
    pub fn to_bits(self) -> u128 {
        ((USER_DATA_MAGIC as u128) << 96) | ((self.generation as u128) << 64) | self.index as u128
    }

    /// Unpack from a collider user-data word; foreign words give `None`
    pub fn from_bits(bits: u128) -> Option<Self> {
        if (bits >> 96) as u32 != USER_DATA_MAGIC {
            return None;
        }
        let index = u32::try_from(bits & u64::MAX as u128).ok()?;
        Some(Self {
            index,
            generation: (bits >> 64) as u32,
        })
    }

    /// Arena index
    pub fn index(&self) -> u32 {
        self.index
    }
}

/// Append-only arena of user data, released together at teardown
#[derive(Debug, Default)]
pub struct UserDataStore {
    records: Vec<EntityUserData>,
    generation: u32,
}

impl UserDataStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a record and return its handle
    pub fn alloc(&mut self, data: EntityUserData) -> UserDataHandle {
        let index = self.records.len() as u32;
        self.records.push(data);
        UserDataHandle {
            index,
            generation: self.generation,
        }
    }

    /// Look up a record; handles from an earlier generation give `None`
    pub fn get(&self, handle: UserDataHandle) -> Option<&EntityUserData> {
        if handle.generation != self.generation {
            return None;
        }
        self.records.get(handle.index as usize)
    }

    /// Mutable lookup
    pub fn get_mut(&mut self, handle: UserDataHandle) -> Option<&mut EntityUserData> {
        if handle.generation != self.generation {
            return None;
        }
        self.records.get_mut(handle.index as usize)
    }

    /// Resolve a collider user-data word
    pub fn resolve(&self, bits: u128) -> Option<&EntityUserData> {
        UserDataHandle::from_bits(bits).and_then(|handle| self.get(handle))
    }

    /// Release every record; outstanding handles stop resolving
    pub fn clear(&mut self) {
        self.records.clear();
        self.generation = self.generation.wrapping_add(1);
    }

    /// Number of live records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
