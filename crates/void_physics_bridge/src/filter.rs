//! Collision filtering: channel responses, bitmasks, object layers and pair hooks

use crate::user_data::UserDataStore;
use rapier3d::prelude as rapier;
use serde::{Deserialize, Serialize};

/// Number of collision channels
pub const CHANNEL_COUNT: usize = 32;

/// Response a component declares towards one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CollisionResponse {
    #[default]
    Ignore,
    Overlap,
    Block,
}

/// Per-channel response table of a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseContainer {
    responses: [CollisionResponse; CHANNEL_COUNT],
}

impl Default for ResponseContainer {
    fn default() -> Self {
        Self::all(CollisionResponse::Ignore)
    }
}

impl ResponseContainer {
    /// Same response on every channel
    pub fn all(response: CollisionResponse) -> Self {
        Self {
            responses: [response; CHANNEL_COUNT],
        }
    }

    /// Set the response to one channel; channels past 31 are ignored
    pub fn with_response(mut self, channel: u8, response: CollisionResponse) -> Self {
        self.set_response(channel, response);
        self
    }

    /// Set the response to one channel; channels past 31 are ignored
    pub fn set_response(&mut self, channel: u8, response: CollisionResponse) {
        if let Some(slot) = self.responses.get_mut(channel as usize) {
            *slot = response;
        }
    }

    /// Response to a channel; channels past 31 read as `Ignore`
    pub fn response(&self, channel: u8) -> CollisionResponse {
        self.responses
            .get(channel as usize)
            .copied()
            .unwrap_or(CollisionResponse::Ignore)
    }
}

/// How a component takes part in collision, as reported to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollisionEnabled {
    /// Neither queried nor simulated
    NoCollision,
    /// Visible to queries and overlaps only
    QueryOnly,
    /// Queried and simulated
    QueryAndPhysics,
}

/// Precomputed block/overlap bitmasks of a response table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChannelMasks {
    /// Channels this blocks
    pub block: u32,
    /// Channels this overlaps
    pub overlap: u32,
    /// Every channel that is not ignored
    pub combined: u32,
}

impl ChannelMasks {
    /// Derive masks from a response table in one pass over the 32 channels
    pub fn build(responses: &ResponseContainer) -> Self {
        let mut masks = Self::default();
        for (i, response) in responses.responses.iter().enumerate() {
            let bit = 1u32 << i;
            if *response != CollisionResponse::Ignore {
                masks.combined |= bit;
            }
            match response {
                CollisionResponse::Block => masks.block |= bit,
                CollisionResponse::Overlap => masks.overlap |= bit,
                CollisionResponse::Ignore => {}
            }
        }
        masks
    }
}

/// Channel plus masks: everything the pair predicates look at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChannelFilter {
    /// Object channel, 0..31
    pub channel: u8,
    /// Masks derived from the response table
    pub masks: ChannelMasks,
}

impl ChannelFilter {
    /// Build from an object channel and a response table
    pub fn new(channel: u8, responses: &ResponseContainer) -> Self {
        Self {
            channel,
            masks: ChannelMasks::build(responses),
        }
    }

    /// Bit of this filter's channel
    pub fn channel_bit(&self) -> u32 {
        1u32 << (self.channel as u32 & 31)
    }
}

/// Both sides block the other's channel
pub fn blocking_allowed(a: &ChannelFilter, b: &ChannelFilter) -> bool {
    (a.masks.block & b.channel_bit()) != 0 && (b.masks.block & a.channel_bit()) != 0
}

/// Either side overlaps the other's channel.
///
/// Deliberately an OR while blocking is an AND; the host's response tables
/// are defined that way.
pub fn overlap_allowed(a: &ChannelFilter, b: &ChannelFilter) -> bool {
    (a.masks.overlap & b.channel_bit()) != 0 || (b.masks.overlap & a.channel_bit()) != 0
}

/// Both sides respond (block or overlap) to the other's channel
pub fn any_collision_allowed(a: &ChannelFilter, b: &ChannelFilter) -> bool {
    (a.masks.combined & b.channel_bit()) != 0 && (b.masks.combined & a.channel_bit()) != 0
}

/// What the narrow phase does with a pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairDecision {
    /// Solve contacts normally
    Collide,
    /// Keep the contact but produce no response
    Sensor,
    /// Drop the pair
    Reject,
}

/// Narrow-phase decision for a pair. Missing filter data lets the pair through.
pub fn pair_decision(a: Option<&ChannelFilter>, b: Option<&ChannelFilter>) -> PairDecision {
    let (Some(a), Some(b)) = (a, b) else {
        return PairDecision::Collide;
    };
    if !any_collision_allowed(a, b) {
        PairDecision::Reject
    } else if overlap_allowed(a, b) {
        PairDecision::Sensor
    } else {
        PairDecision::Collide
    }
}

/// Object layer a body lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectLayer {
    NonMoving,
    Moving,
}

/// Broad-phase tree a layer is routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BroadPhaseLayer {
    NonMoving,
    Moving,
}

impl ObjectLayer {
    const NON_MOVING_GROUP: rapier::Group = rapier::Group::GROUP_1;
    const MOVING_GROUP: rapier::Group = rapier::Group::GROUP_2;

    /// Object-vs-object rule: non-moving only meets moving, moving meets everything
    pub fn should_collide(self, other: ObjectLayer) -> bool {
        match self {
            Self::NonMoving => other == Self::Moving,
            Self::Moving => true,
        }
    }

    /// Object-vs-broadphase rule
    pub fn should_collide_with_broad_phase(self, layer: BroadPhaseLayer) -> bool {
        match self {
            Self::NonMoving => layer == BroadPhaseLayer::Moving,
            Self::Moving => true,
        }
    }

    /// One broad-phase tree per object layer
    pub fn broad_phase_layer(self) -> BroadPhaseLayer {
        match self {
            Self::NonMoving => BroadPhaseLayer::NonMoving,
            Self::Moving => BroadPhaseLayer::Moving,
        }
    }

    /// Interaction groups encoding the layer rules for rapier
    pub(crate) fn interaction_groups(self) -> rapier::InteractionGroups {
        match self {
            Self::NonMoving => {
                rapier::InteractionGroups::new(Self::NON_MOVING_GROUP, Self::MOVING_GROUP)
            }
            Self::Moving => rapier::InteractionGroups::new(
                Self::MOVING_GROUP,
                Self::NON_MOVING_GROUP | Self::MOVING_GROUP,
            ),
        }
    }
}

/// Pair hooks consulting the per-body channel filters
pub(crate) struct BridgeHooks<'a> {
    store: &'a UserDataStore,
}

impl<'a> BridgeHooks<'a> {
    pub(crate) fn new(store: &'a UserDataStore) -> Self {
        Self { store }
    }

    fn filters(
        &self,
        context: &rapier::PairFilterContext,
    ) -> (Option<&'a ChannelFilter>, Option<&'a ChannelFilter>) {
        let lookup = |handle: rapier::ColliderHandle| {
            context
                .colliders
                .get(handle)
                .and_then(|c| self.store.resolve(c.user_data))
                .map(|data| &data.filter)
        };
        (lookup(context.collider1), lookup(context.collider2))
    }
}

impl rapier::PhysicsHooks for BridgeHooks<'_> {
    fn filter_contact_pair(&self, context: &rapier::PairFilterContext) -> Option<rapier::SolverFlags> {
        let (a, b) = self.filters(context);
        match pair_decision(a, b) {
            PairDecision::Collide => Some(rapier::SolverFlags::COMPUTE_IMPULSES),
            PairDecision::Sensor => Some(rapier::SolverFlags::empty()),
            PairDecision::Reject => None,
        }
    }

    fn filter_intersection_pair(&self, context: &rapier::PairFilterContext) -> bool {
        let (a, b) = self.filters(context);
        match (a, b) {
            (Some(a), Some(b)) => any_collision_allowed(a, b),
            _ => true,
        }
    }
}
