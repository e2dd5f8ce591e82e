//! Error types for the physics bridge

use crate::body::{BodyId, BodyIdRange, MotionType};
use crate::host::{ComponentId, EntityId};
use thiserror::Error;

/// Physics bridge errors
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The simulation has not been created yet (or was torn down)
    #[error("Physics simulation is not ready")]
    NotReady,

    /// Invalid configuration
    #[error("Invalid physics configuration: {0}")]
    InvalidConfig(String),

    /// Shape creation failed
    #[error("Failed to create collision shape: {0}")]
    ShapeCreationFailed(String),

    /// Native body creation failed
    #[error("Failed to create {motion_type} body with ID: {body_id}")]
    BodyCreationFailed {
        motion_type: MotionType,
        body_id: BodyId,
    },

    /// No identifiers left in a body id range
    #[error("Body id range exhausted: {0:?}")]
    BodyIdRangeExhausted(BodyIdRange),

    /// Body not found
    #[error("Body not found: {0}")]
    BodyNotFound(BodyId),

    /// Entity was never registered with the bridge
    #[error("Entity {0:?} has no physics descriptor")]
    EntityNotRegistered(EntityId),

    /// Entity is registered but the component is not part of it
    #[error("Component {component:?} is not registered on entity {entity:?}")]
    ComponentNotRegistered {
        entity: EntityId,
        component: ComponentId,
    },

    /// Activation requested on a component that is not movable
    #[error("Component {0:?} is not movable")]
    ComponentNotMovable(ComponentId),

    /// The snapshot slot holds a different frame
    #[error("No snapshot for frame {frame} (slot holds {stored:?})")]
    StaleSnapshot { frame: u32, stored: Option<u32> },

    /// The snapshot slot matched but carries no bytes
    #[error("Snapshot for frame {0} is empty")]
    EmptySnapshot(u32),

    /// A length-prefixed snapshot exceeds the configured maximum
    #[error("Snapshot of {len} bytes exceeds maximum of {max}")]
    SnapshotTooLarge { len: usize, max: usize },

    /// A length-prefixed snapshot ended before its declared length
    #[error("Snapshot payload is truncated")]
    SnapshotTruncated,

    /// Snapshot payload could not be decoded
    #[error("Failed to decode snapshot: {0}")]
    SnapshotDecode(#[from] bincode::Error),

    /// Runtime teardown requested while worlds are alive
    #[error("Physics runtime still has {live_worlds} live world(s)")]
    RuntimeInUse { live_worlds: usize },

    /// Runtime was already torn down
    #[error("Physics runtime has been torn down")]
    RuntimeTornDown,
}

/// Result type for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;
