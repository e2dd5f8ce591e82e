//! Scene queries (line traces, shape sweeps)
//!
//! Every query runs the same way: raw hits stream into a collector in arrival
//! order, sensors are dropped, and the surviving hits are turned into
//! [`QueryHit`]s resolved back to the host entity and sub-component.

use crate::body::{BodyId, BodyRecord};
use crate::descriptor::ShapeDescriptor;
use crate::host::{make_isometry, ComponentId, EntityId};
use crate::material::MaterialRef;
use crate::simulation::Simulation;
use crate::user_data::UserDataStore;
use rapier3d::parry::bounding_volume::BoundingVolume;
use rapier3d::parry::query::ShapeCastOptions;
use rapier3d::prelude as rapier;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Offset applied to the end of a zero-length trace
const DEGENERATE_TRACE_NUDGE: f32 = 1.0e-4;

/// Shape swept by a sweep query
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SweepShape {
    /// Sphere
    Sphere { radius: f32 },
    /// Capsule along the local Y axis
    Capsule { radius: f32, half_height: f32 },
    /// Box with half extents
    Box { half_extents: [f32; 3] },
}

impl SweepShape {
    fn to_rapier(&self) -> rapier::SharedShape {
        match *self {
            Self::Sphere { radius } => rapier::SharedShape::ball(radius),
            Self::Capsule { radius, half_height } => rapier::SharedShape::capsule_y(half_height, radius),
            Self::Box { half_extents } => {
                rapier::SharedShape::cuboid(half_extents[0], half_extents[1], half_extents[2])
            }
        }
    }
}

/// Options shared by every query
#[derive(Debug, Clone, Default)]
pub struct QueryParams {
    /// Entities whose bodies are skipped
    pub ignore_entities: Vec<EntityId>,
}

impl QueryParams {
    /// Skip every body of an entity
    pub fn ignoring(mut self, entity: EntityId) -> Self {
        self.ignore_entities.push(entity);
        self
    }
}

/// A hit translated back into host terms
#[derive(Debug, Clone)]
pub struct QueryHit {
    /// Always true; non-blocking geometry never reaches the results
    pub blocking_hit: bool,
    /// Trace position at impact (shape center for sweeps)
    pub location: [f32; 3],
    /// Contact point on the hit surface
    pub impact_point: [f32; 3],
    /// Normal of the trace at impact
    pub normal: [f32; 3],
    /// Surface normal of the hit body
    pub impact_normal: [f32; 3],
    /// Distance travelled from the start
    pub distance: f32,
    /// Fraction of the trace, 0..=1
    pub fraction: f32,
    /// Trace start
    pub trace_start: [f32; 3],
    /// Trace end
    pub trace_end: [f32; 3],
    /// Owning entity
    pub entity: EntityId,
    /// Sub-component nearest to the impact point
    pub component: ComponentId,
    /// Body that was hit
    pub body_id: BodyId,
    /// Material of the hit body
    pub material: Option<MaterialRef>,
}

/// Receives the segment and results of every query
pub trait QueryDebugDraw: Send + Sync {
    /// Called once per query with the cast segment
    fn draw_trace(&self, start: [f32; 3], end: [f32; 3], shape: Option<&SweepShape>);

    /// Called for each resulting hit
    fn draw_hit(&self, hit: &QueryHit);
}

/// A hit before host resolution
#[derive(Debug, Clone, Copy)]
struct RawHit {
    collider: rapier::ColliderHandle,
    fraction: f32,
    location: rapier::Point<f32>,
    impact_point: rapier::Point<f32>,
    normal: rapier::Vector<f32>,
}

trait HitCollector {
    fn add_hit(&mut self, hit: RawHit, colliders: &rapier::ColliderSet);
}

fn is_sensor(colliders: &rapier::ColliderSet, handle: rapier::ColliderHandle) -> bool {
    colliders.get(handle).map_or(true, |c| c.is_sensor())
}

/// Keeps the nearest non-sensor hit
struct FirstHitCollector {
    early_out_fraction: f32,
    best: Option<RawHit>,
}

impl FirstHitCollector {
    fn new() -> Self {
        Self {
            early_out_fraction: f32::MAX,
            best: None,
        }
    }
}

impl HitCollector for FirstHitCollector {
    fn add_hit(&mut self, hit: RawHit, colliders: &rapier::ColliderSet) {
        if hit.fraction >= self.early_out_fraction || is_sensor(colliders, hit.collider) {
            return;
        }
        self.early_out_fraction = hit.fraction;
        self.best = Some(hit);
    }
}

/// Keeps every non-sensor hit
#[derive(Default)]
struct AllHitsCollector {
    hits: Vec<RawHit>,
}

impl AllHitsCollector {
    fn sorted(mut self) -> Vec<RawHit> {
        self.hits.sort_by(|a, b| a.fraction.total_cmp(&b.fraction));
        self.hits
    }
}

impl HitCollector for AllHitsCollector {
    fn add_hit(&mut self, hit: RawHit, colliders: &rapier::ColliderSet) {
        if !is_sensor(colliders, hit.collider) {
            self.hits.push(hit);
        }
    }
}

fn to_array(p: &rapier::Point<f32>) -> [f32; 3] {
    [p.x, p.y, p.z]
}

fn vec_to_array(v: &rapier::Vector<f32>) -> [f32; 3] {
    [v.x, v.y, v.z]
}

/// Start/end of a trace with zero-length traces nudged apart
fn trace_segment(start: [f32; 3], end: [f32; 3]) -> (rapier::Point<f32>, rapier::Vector<f32>) {
    let origin = rapier::Point::new(start[0], start[1], start[2]);
    let mut dir = rapier::Vector::new(end[0] - start[0], end[1] - start[1], end[2] - start[2]);
    if dir.norm_squared() <= f32::EPSILON * f32::EPSILON {
        dir = rapier::Vector::repeat(DEGENERATE_TRACE_NUDGE);
    }
    (origin, dir)
}

/// Query interface over a world's simulation and registration maps
pub struct SceneQuery<'a> {
    pub(crate) simulation: Option<&'a Simulation>,
    pub(crate) user_data: &'a UserDataStore,
    pub(crate) descriptors: &'a HashMap<EntityId, ShapeDescriptor>,
    pub(crate) records: &'a HashMap<BodyId, BodyRecord>,
    pub(crate) debug_draw: Option<&'a Arc<dyn QueryDebugDraw>>,
}

impl<'a> SceneQuery<'a> {
    fn ready(&self) -> Option<&'a Simulation> {
        if self.simulation.is_none() {
            log::warn!("Scene query issued before the physics simulation exists");
        }
        self.simulation
    }

    /// Colliders of every body owned by the ignored entities
    fn ignored_colliders(&self, params: &QueryParams) -> HashSet<rapier::ColliderHandle> {
        params
            .ignore_entities
            .iter()
            .filter_map(|entity| self.descriptors.get(entity))
            .flat_map(|descriptor| descriptor.entries())
            .filter_map(|entry| self.records.get(&entry.body_id))
            .map(|record| record.collider)
            .collect()
    }

    /// Colliders a query may report: not ignored, not demoted, and owned by a registered body
    fn accepts(&self, ignored: &HashSet<rapier::ColliderHandle>, handle: rapier::ColliderHandle, collider: &rapier::Collider) -> bool {
        !ignored.contains(&handle)
            && !collider.collision_groups().memberships.is_empty()
            && self.user_data.resolve(collider.user_data).is_some()
    }

    /// Trace a line and return the nearest blocking hit
    pub fn line_trace_single(&self, start: [f32; 3], end: [f32; 3], params: &QueryParams) -> Option<QueryHit> {
        let simulation = self.ready()?;
        let mut collector = FirstHitCollector::new();
        self.collect_ray(simulation, start, end, params, &mut collector);
        let hit = collector.best.and_then(|raw| self.resolve(simulation, raw, start, end));
        self.debug(start, end, None, hit.as_slice());
        hit
    }

    /// Trace a line and return every blocking hit, nearest first
    pub fn line_trace_multi(&self, start: [f32; 3], end: [f32; 3], params: &QueryParams) -> Vec<QueryHit> {
        let Some(simulation) = self.ready() else {
            return Vec::new();
        };
        let mut collector = AllHitsCollector::default();
        self.collect_ray(simulation, start, end, params, &mut collector);
        let hits: Vec<_> = collector
            .sorted()
            .into_iter()
            .filter_map(|raw| self.resolve(simulation, raw, start, end))
            .collect();
        self.debug(start, end, None, &hits);
        hits
    }

    /// Sweep a shape and return the nearest blocking hit
    pub fn sweep_single(
        &self,
        shape: &SweepShape,
        rotation: [f32; 4],
        start: [f32; 3],
        end: [f32; 3],
        params: &QueryParams,
    ) -> Option<QueryHit> {
        let simulation = self.ready()?;
        let mut collector = FirstHitCollector::new();
        self.collect_sweep(simulation, shape, rotation, start, end, params, &mut collector);
        let hit = collector.best.and_then(|raw| self.resolve(simulation, raw, start, end));
        self.debug(start, end, Some(shape), hit.as_slice());
        hit
    }

    /// Sweep a shape and return every blocking hit, nearest first
    pub fn sweep_multi(
        &self,
        shape: &SweepShape,
        rotation: [f32; 4],
        start: [f32; 3],
        end: [f32; 3],
        params: &QueryParams,
    ) -> Vec<QueryHit> {
        let Some(simulation) = self.ready() else {
            return Vec::new();
        };
        let mut collector = AllHitsCollector::default();
        self.collect_sweep(simulation, shape, rotation, start, end, params, &mut collector);
        let hits: Vec<_> = collector
            .sorted()
            .into_iter()
            .filter_map(|raw| self.resolve(simulation, raw, start, end))
            .collect();
        self.debug(start, end, Some(shape), &hits);
        hits
    }

    fn collect_ray(
        &self,
        simulation: &Simulation,
        start: [f32; 3],
        end: [f32; 3],
        params: &QueryParams,
        collector: &mut dyn HitCollector,
    ) {
        let (origin, dir) = trace_segment(start, end);
        let ray = rapier::Ray::new(origin, dir);
        let ignored = self.ignored_colliders(params);
        let predicate = |handle: rapier::ColliderHandle, collider: &rapier::Collider| self.accepts(&ignored, handle, collider);
        let filter = rapier::QueryFilter::new().predicate(&predicate);

        simulation.query_pipeline.intersections_with_ray(
            &simulation.bodies,
            &simulation.colliders,
            &ray,
            1.0,
            true,
            filter,
            |handle, intersection| {
                let point = ray.point_at(intersection.time_of_impact);
                collector.add_hit(
                    RawHit {
                        collider: handle,
                        fraction: intersection.time_of_impact,
                        location: point,
                        impact_point: point,
                        normal: intersection.normal,
                    },
                    &simulation.colliders,
                );
                true
            },
        );
    }

    #[allow(clippy::too_many_arguments)]
    fn collect_sweep(
        &self,
        simulation: &Simulation,
        shape: &SweepShape,
        rotation: [f32; 4],
        start: [f32; 3],
        end: [f32; 3],
        params: &QueryParams,
        collector: &mut dyn HitCollector,
    ) {
        let (origin, dir) = trace_segment(start, end);
        let cast_shape = shape.to_rapier();
        let from = make_isometry(start, rotation);
        let mut to = from;
        to.translation.vector += dir;

        let swept = cast_shape.compute_aabb(&from).merged(&cast_shape.compute_aabb(&to));
        let ignored = self.ignored_colliders(params);
        let options = ShapeCastOptions {
            max_time_of_impact: 1.0,
            stop_at_penetration: true,
            ..Default::default()
        };

        let mut candidates = Vec::new();
        simulation
            .query_pipeline
            .colliders_with_aabb_intersecting_aabb(&swept, |handle| {
                candidates.push(*handle);
                true
            });

        for handle in candidates {
            let Some(collider) = simulation.colliders.get(handle) else {
                continue;
            };
            if !self.accepts(&ignored, handle, collider) {
                continue;
            }

            let hit = rapier3d::parry::query::cast_shapes(
                &from,
                &dir,
                cast_shape.as_ref(),
                collider.position(),
                &rapier::Vector::zeros(),
                collider.shape(),
                options,
            );
            let Ok(Some(hit)) = hit else {
                continue;
            };

            collector.add_hit(
                RawHit {
                    collider: handle,
                    fraction: hit.time_of_impact,
                    location: origin + dir * hit.time_of_impact,
                    impact_point: collider.position() * hit.witness2,
                    normal: collider.position() * hit.normal2.into_inner(),
                },
                &simulation.colliders,
            );
        }
    }

    /// Host-space hit for a raw hit; hits on foreign bodies are dropped
    fn resolve(&self, simulation: &Simulation, raw: RawHit, start: [f32; 3], end: [f32; 3]) -> Option<QueryHit> {
        let collider = simulation.colliders.get(raw.collider)?;
        let data = self.user_data.resolve(collider.user_data)?;

        let impact_point = to_array(&raw.impact_point);
        let component = self
            .descriptors
            .get(&data.entity)
            .and_then(|descriptor| {
                descriptor.closest_entry(impact_point, |body_id| {
                    let record = self.records.get(&body_id)?;
                    let body = simulation.bodies.get(record.body)?;
                    Some(vec_to_array(body.translation()))
                })
            })
            .map(|entry| entry.component)
            .unwrap_or(data.component);

        let trace_length = {
            let d = [end[0] - start[0], end[1] - start[1], end[2] - start[2]];
            (d[0] * d[0] + d[1] * d[1] + d[2] * d[2]).sqrt()
        };
        let normal = raw.normal.try_normalize(f32::EPSILON).unwrap_or(raw.normal);

        Some(QueryHit {
            blocking_hit: true,
            location: to_array(&raw.location),
            impact_point,
            normal: vec_to_array(&normal),
            impact_normal: vec_to_array(&normal),
            distance: trace_length * raw.fraction,
            fraction: raw.fraction,
            trace_start: start,
            trace_end: end,
            entity: data.entity,
            component,
            body_id: data.body_id,
            material: data.material.clone(),
        })
    }

    fn debug(&self, start: [f32; 3], end: [f32; 3], shape: Option<&SweepShape>, hits: &[QueryHit]) {
        let Some(draw) = self.debug_draw else {
            return;
        };
        draw.draw_trace(start, end, shape);
        for hit in hits {
            draw.draw_hit(hit);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn raw(collider: rapier::ColliderHandle, fraction: f32) -> RawHit {
        let p = rapier::Point::origin();
        RawHit {
            collider,
            fraction,
            location: p,
            impact_point: p,
            normal: rapier::Vector::y(),
        }
    }

    fn colliders() -> (rapier::ColliderSet, rapier::ColliderHandle, rapier::ColliderHandle) {
        let mut set = rapier::ColliderSet::new();
        let solid = set.insert(rapier::ColliderBuilder::ball(1.0).build());
        let sensor = set.insert(rapier::ColliderBuilder::ball(1.0).sensor(true).build());
        (set, solid, sensor)
    }

    #[test]
    fn test_first_hit_keeps_nearest_non_sensor() {
        let (set, solid, sensor) = colliders();
        let mut collector = FirstHitCollector::new();

        collector.add_hit(raw(solid, 0.6), &set);
        collector.add_hit(raw(sensor, 0.1), &set);
        collector.add_hit(raw(solid, 0.4), &set);
        collector.add_hit(raw(solid, 0.5), &set);

        let best = collector.best.unwrap();
        assert_relative_eq!(best.fraction, 0.4);
        assert_relative_eq!(collector.early_out_fraction, 0.4);
    }

    #[test]
    fn test_all_hits_sorted_without_sensors() {
        let (set, solid, sensor) = colliders();
        let mut collector = AllHitsCollector::default();

        collector.add_hit(raw(solid, 0.9), &set);
        collector.add_hit(raw(sensor, 0.2), &set);
        collector.add_hit(raw(solid, 0.3), &set);

        let fractions: Vec<f32> = collector.sorted().iter().map(|h| h.fraction).collect();
        assert_eq!(fractions, vec![0.3, 0.9]);
    }

    #[test]
    fn test_degenerate_trace_nudged() {
        let (_, dir) = trace_segment([1.0, 2.0, 3.0], [1.0, 2.0, 3.0]);
        assert!(dir.norm() > 0.0);

        let (_, dir) = trace_segment([0.0; 3], [0.0, -5.0, 0.0]);
        assert_relative_eq!(dir.y, -5.0);
    }
}
