//! Void Physics Bridge - host entities on a Rapier 3D simulation
//!
//! This crate connects a host scene graph to a Rapier 3D simulation. The host
//! owns entities and their collidable components; the bridge builds pooled
//! shapes and bodies for them, filters pairs by collision channel, answers
//! traces and sweeps in host terms, and keeps a rollback history of
//! simulation state.
//!
//! # Features
//!
//! - Shape cache deduplicating boxes, spheres, capsules and convex hulls
//! - 32-channel block/overlap filtering through pair hooks
//! - Partitioned body ids (custom, static, dynamic)
//! - Line traces and shape sweeps resolved to entity and component
//! - Overlap and hit events
//! - Per-frame snapshot ring for rollback
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                    PhysicsWorld                       │
//! │  ┌────────────┐  ┌──────────────┐  ┌───────────────┐ │
//! │  │ ShapeCache │  │ Descriptors  │  │ UserDataStore │ │
//! │  └────────────┘  └──────────────┘  └───────────────┘ │
//! │  ┌──────────────────────────────────────────────────┐│
//! │  │ Simulation (rapier pipeline + BridgeHooks)       ││
//! │  └──────────────────────────────────────────────────┘│
//! │  ┌──────────────┐  ┌─────────────┐  ┌──────────────┐ │
//! │  │ SceneQuery   │  │ Contacts    │  │ Snapshots    │ │
//! │  └──────────────┘  └─────────────┘  └──────────────┘ │
//! └──────────────────────────────────────────────────────┘
//!                          ▲
//!                          │ SceneHost / SceneEntity
//!                   ┌──────┴──────┐
//!                   │ Host scene  │
//!                   └─────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use void_physics_bridge::prelude::*;
//!
//! let runtime = PhysicsRuntime::init();
//! let mut world = runtime.create_world(BridgeConfig::default())?;
//!
//! // Register everything the host knows about
//! world.begin_play(&scene);
//!
//! // Step and roll back
//! world.save_state_for_frame(10, None)?;
//! world.advance(1.0 / 60.0)?;
//! world.restore_state_for_frame(10);
//!
//! // Trace straight down
//! let hit = world.query().line_trace_single([0.0, 10.0, 0.0], [0.0, -10.0, 0.0], &QueryParams::default());
//! ```

pub mod body;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod events;
pub mod filter;
pub mod geometry;
pub mod host;
pub mod material;
pub mod query;
pub mod runtime;
pub mod shape;
pub mod simulation;
pub mod snapshot;
pub mod user_data;
pub mod worker;
pub mod world;

pub mod prelude {
    //! Common imports for the physics bridge
    pub use crate::body::{BodyId, BodyIdRange, BodyIdRanges, BodyOptions, GravityOverride, MotionType};
    pub use crate::config::BridgeConfig;
    pub use crate::descriptor::{DescriptorEntry, ShapeDescriptor};
    pub use crate::error::{BridgeError, Result};
    pub use crate::events::ContactEvent;
    pub use crate::filter::{ChannelFilter, CollisionEnabled, CollisionResponse, ObjectLayer, ResponseContainer};
    pub use crate::host::{
        CollidableComponent, CollisionGeometry, ComponentId, EntityId, MeshKey, SceneEntity, SceneHost,
        ShapeElement, WorldTransform,
    };
    pub use crate::material::{MaterialRef, PhysicsMaterial};
    pub use crate::query::{QueryDebugDraw, QueryHit, QueryParams, SceneQuery, SweepShape};
    pub use crate::runtime::PhysicsRuntime;
    pub use crate::shape::{ShapeCache, ShapeKey};
    pub use crate::snapshot::{BodyAllowList, SnapshotBytes, SnapshotFilter};
    pub use crate::world::{BodyRequest, PhysicsState, PhysicsWorld};
}

pub use prelude::*;
