//! Contact listener and the events derived from it
//!
//! Rapier reports collision start/stop from inside the step. The recorder
//! turns those into [`ContactAdded`]/[`ContactRemoved`] records and pushes
//! them through crossbeam channels; the world drains them after the step and
//! broadcasts [`ContactEvent`]s honouring each side's event flags.

use crate::body::BodyId;
use crate::filter::overlap_allowed;
use crate::host::{ComponentId, EntityId};
use crate::user_data::{EntityUserData, UserDataStore};
use crossbeam_channel::{Receiver, Sender};
use rapier3d::prelude as rapier;

/// A contact that started during the step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContactAdded {
    /// First body
    pub body1: BodyId,
    /// Second body
    pub body2: BodyId,
    /// Contact point on the first body, world space
    pub point_on_1: [f32; 3],
    /// Contact point on the second body, world space
    pub point_on_2: [f32; 3],
    /// Contact normal, pointing from body1 to body2
    pub normal: [f32; 3],
    /// Impulse along the normal
    pub normal_impulse: f32,
    /// The pair only overlaps
    pub is_overlap: bool,
}

/// A contact that ended during the step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContactRemoved {
    /// First body
    pub body1: BodyId,
    /// Second body
    pub body2: BodyId,
    /// The pair only overlapped
    pub is_overlap: bool,
}

/// Event delivered to the host after a step
#[derive(Debug, Clone, PartialEq)]
pub enum ContactEvent {
    /// `component` started overlapping `other_component`
    BeginOverlap {
        entity: EntityId,
        component: ComponentId,
        other_entity: EntityId,
        other_component: ComponentId,
        other_body: BodyId,
    },
    /// `component` stopped overlapping `other_component`
    EndOverlap {
        entity: EntityId,
        component: ComponentId,
        other_entity: EntityId,
        other_component: ComponentId,
        other_body: BodyId,
    },
    /// `component` was hit by `other_component`
    Hit {
        entity: EntityId,
        component: ComponentId,
        other_entity: EntityId,
        other_component: ComponentId,
        impact_point: [f32; 3],
        normal: [f32; 3],
        impulse: [f32; 3],
        distance: f32,
    },
}

impl ContactEvent {
    /// Component that receives the event
    pub fn component(&self) -> ComponentId {
        match self {
            Self::BeginOverlap { component, .. }
            | Self::EndOverlap { component, .. }
            | Self::Hit { component, .. } => *component,
        }
    }
}

/// Queues between the event handler and the world
pub struct ContactListener {
    added_tx: Sender<ContactAdded>,
    added_rx: Receiver<ContactAdded>,
    removed_tx: Sender<ContactRemoved>,
    removed_rx: Receiver<ContactRemoved>,
}

impl Default for ContactListener {
    fn default() -> Self {
        Self::new()
    }
}

impl ContactListener {
    /// Create empty queues
    pub fn new() -> Self {
        let (added_tx, added_rx) = crossbeam_channel::unbounded();
        let (removed_tx, removed_rx) = crossbeam_channel::unbounded();
        Self {
            added_tx,
            added_rx,
            removed_tx,
            removed_rx,
        }
    }

    /// Event handler for one step
    pub(crate) fn recorder<'a>(&self, store: &'a UserDataStore) -> ContactRecorder<'a> {
        ContactRecorder {
            store,
            added: self.added_tx.clone(),
            removed: self.removed_tx.clone(),
        }
    }

    /// Take every queued added contact
    pub fn drain_added(&self) -> Vec<ContactAdded> {
        self.added_rx.try_iter().collect()
    }

    /// Take every queued removed contact
    pub fn drain_removed(&self) -> Vec<ContactRemoved> {
        self.removed_rx.try_iter().collect()
    }

    /// Drop everything queued
    pub fn clear(&self) {
        while self.added_rx.try_recv().is_ok() {}
        while self.removed_rx.try_recv().is_ok() {}
    }
}

fn to_array(v: &rapier::Vector<f32>) -> [f32; 3] {
    [v.x, v.y, v.z]
}

fn point_to_array(p: &rapier::Point<f32>) -> [f32; 3] {
    [p.x, p.y, p.z]
}

/// Rapier event handler feeding the listener queues
pub(crate) struct ContactRecorder<'a> {
    store: &'a UserDataStore,
    added: Sender<ContactAdded>,
    removed: Sender<ContactRemoved>,
}

impl ContactRecorder<'_> {
    fn resolve(&self, colliders: &rapier::ColliderSet, handle: rapier::ColliderHandle) -> Option<&EntityUserData> {
        colliders.get(handle).and_then(|c| self.store.resolve(c.user_data))
    }
}

impl rapier::EventHandler for ContactRecorder<'_> {
    fn handle_collision_event(
        &self,
        _bodies: &rapier::RigidBodySet,
        colliders: &rapier::ColliderSet,
        event: rapier::CollisionEvent,
        contact_pair: Option<&rapier::ContactPair>,
    ) {
        let (h1, h2) = (event.collider1(), event.collider2());
        let (Some(a), Some(b)) = (self.resolve(colliders, h1), self.resolve(colliders, h2)) else {
            return;
        };
        let is_overlap = overlap_allowed(&a.filter, &b.filter) || event.sensor();

        if event.stopped() {
            let _ = self.removed.send(ContactRemoved {
                body1: a.body_id,
                body2: b.body_id,
                is_overlap,
            });
            return;
        }

        let mut added = ContactAdded {
            body1: a.body_id,
            body2: b.body_id,
            point_on_1: [0.0; 3],
            point_on_2: [0.0; 3],
            normal: [0.0; 3],
            normal_impulse: 0.0,
            is_overlap,
        };

        if let (Some(pair), Some(c1), Some(c2)) = (contact_pair, colliders.get(h1), colliders.get(h2)) {
            if let Some((manifold, contact)) = pair.find_deepest_contact() {
                added.point_on_1 = point_to_array(&(c1.position() * contact.local_p1));
                added.point_on_2 = point_to_array(&(c2.position() * contact.local_p2));
                added.normal = to_array(&manifold.data.normal);
                added.normal_impulse = manifold.points.iter().map(|p| p.data.impulse).sum();
            }
        } else if let (Some(c1), Some(c2)) = (colliders.get(h1), colliders.get(h2)) {
            added.point_on_1 = to_array(c1.translation());
            added.point_on_2 = to_array(c2.translation());
        }

        let _ = self.added.send(added);
    }

    fn handle_contact_force_event(
        &self,
        _dt: f32,
        _bodies: &rapier::RigidBodySet,
        _colliders: &rapier::ColliderSet,
        _contact_pair: &rapier::ContactPair,
        _total_force_magnitude: f32,
    ) {
    }
}

/// Events for a started contact, per side and per side flag
pub fn events_for_added(added: &ContactAdded, a: &EntityUserData, b: &EntityUserData) -> Vec<ContactEvent> {
    let mut out = Vec::new();

    if added.is_overlap {
        if a.generate_overlap_events {
            out.push(ContactEvent::BeginOverlap {
                entity: a.entity,
                component: a.component,
                other_entity: b.entity,
                other_component: b.component,
                other_body: added.body2,
            });
        }
        if b.generate_overlap_events {
            out.push(ContactEvent::BeginOverlap {
                entity: b.entity,
                component: b.component,
                other_entity: a.entity,
                other_component: a.component,
                other_body: added.body1,
            });
        }
        return out;
    }

    let impulse = added.normal.map(|n| n * added.normal_impulse);
    let d = [
        added.point_on_1[0] - added.point_on_2[0],
        added.point_on_1[1] - added.point_on_2[1],
        added.point_on_1[2] - added.point_on_2[2],
    ];
    let distance = (d[0] * d[0] + d[1] * d[1] + d[2] * d[2]).sqrt();

    if a.generate_hit_events {
        out.push(ContactEvent::Hit {
            entity: a.entity,
            component: a.component,
            other_entity: b.entity,
            other_component: b.component,
            impact_point: added.point_on_1,
            normal: added.normal,
            impulse,
            distance,
        });
    }
    if b.generate_hit_events {
        out.push(ContactEvent::Hit {
            entity: b.entity,
            component: b.component,
            other_entity: a.entity,
            other_component: a.component,
            impact_point: added.point_on_2,
            normal: added.normal,
            impulse,
            distance,
        });
    }
    out
}

/// End-overlap events for a finished overlap contact
pub fn events_for_removed(removed: &ContactRemoved, a: &EntityUserData, b: &EntityUserData) -> Vec<ContactEvent> {
    if !removed.is_overlap {
        return Vec::new();
    }

    let mut out = Vec::new();
    if a.generate_overlap_events {
        out.push(ContactEvent::EndOverlap {
            entity: a.entity,
            component: a.component,
            other_entity: b.entity,
            other_component: b.component,
            other_body: removed.body2,
        });
    }
    if b.generate_overlap_events {
        out.push(ContactEvent::EndOverlap {
            entity: b.entity,
            component: b.component,
            other_entity: a.entity,
            other_component: a.component,
            other_body: removed.body1,
        });
    }
    out
}
