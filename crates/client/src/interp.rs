//! Dead-reckoning between server updates. Positions and orientations are
//! advanced on a periodic tick, with elapsed time scaled by the owning
//! simulator's time dilation.
//!
//! The linear step reproduces the historical integrator exactly: motion is
//! only extrapolated when the entity has acceleration and *zero* velocity,
//! and the first half-step is shortened by one Havok frame. Behavioral
//! compatibility with the original client stack depends on both quirks.

use std::time::Duration;

use glam::{Quat, Vec3};

use crate::world::entity::JointType;
use crate::world::SimWorld;

pub(crate) const HAVOK_STEP: f32 = 1.0 / 45.0;
const MIN_ANGULAR_SQUARED: f32 = 1e-5;

/// Advance one entity's kinematics by `dt` seconds (already dilated).
fn integrate(
    position: &mut Vec3,
    velocity: &mut Vec3,
    rotation: &mut Quat,
    acceleration: Vec3,
    angular_velocity: Vec3,
    dt: f32,
) {
    if acceleration != Vec3::ZERO && *velocity == Vec3::ZERO {
        *position += (*velocity + acceleration * (0.5 * (dt - HAVOK_STEP))) * dt;
        *velocity += acceleration * dt;
    }

    if angular_velocity.length_squared() > MIN_ANGULAR_SQUARED {
        let magnitude = angular_velocity.length();
        let axis = angular_velocity / magnitude;
        let delta = Quat::from_axis_angle(axis, magnitude * dt);
        *rotation = (*rotation * delta).normalize();
    }
}

/// One interpolation step over a simulator's world maps.
pub(crate) fn step_world(world: &SimWorld, dilation: f32, elapsed: Duration) {
    let dt = elapsed.as_secs_f32() * dilation;
    if dt <= 0.0 {
        return;
    }

    world.for_each_prim_mut(|prim| {
        if prim.joint != JointType::Invalid {
            log::warn!("joint object {} skipped by interpolation", prim.local_id);
            return;
        }
        integrate(
            &mut prim.position,
            &mut prim.velocity,
            &mut prim.rotation,
            prim.acceleration,
            prim.angular_velocity,
            dt,
        );
    });

    world.for_each_avatar_mut(|avatar| {
        integrate(
            &mut avatar.position,
            &mut avatar.velocity,
            &mut avatar.rotation,
            avatar.acceleration,
            avatar.angular_velocity,
            dt,
        );
    });
}

/// Floor applied to the timer regardless of how long a step took.
pub(crate) const MIN_TICK: Duration = Duration::from_millis(50);

/// Next tick delay: `max(50 ms, interval - work_time)`.
pub(crate) fn next_tick(interval: Duration, work: Duration) -> Duration {
    interval.saturating_sub(work).max(MIN_TICK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accelerating_from_rest_uses_the_havok_half_step() {
        let world = SimWorld::new();
        world.update_prim(1, |p| {
            p.acceleration = Vec3::new(0.0, 0.0, 1.0);
        });

        let dt = 0.1f32;
        step_world(&world, 1.0, Duration::from_secs_f32(dt));

        let prim = world.prim(1).unwrap();
        let expected_z = (0.5 * (dt - HAVOK_STEP)) * dt;
        assert!((prim.position.z - expected_z).abs() < 1e-6);
        assert!((prim.velocity.z - dt).abs() < 1e-6);
    }

    #[test]
    fn nonzero_velocity_is_not_advanced() {
        let world = SimWorld::new();
        world.update_prim(1, |p| {
            p.velocity = Vec3::new(1.0, 0.0, 0.0);
            p.acceleration = Vec3::new(0.0, 0.0, 1.0);
        });

        step_world(&world, 1.0, Duration::from_millis(100));

        let prim = world.prim(1).unwrap();
        assert_eq!(prim.position, Vec3::ZERO);
        assert_eq!(prim.velocity, Vec3::new(1.0, 0.0, 0.0));
    }

    #[test]
    fn angular_velocity_rotates() {
        let world = SimWorld::new();
        world.update_prim(1, |p| {
            p.angular_velocity = Vec3::new(0.0, 0.0, 1.0);
        });

        step_world(&world, 1.0, Duration::from_millis(500));

        let prim = world.prim(1).unwrap();
        let expected = Quat::from_axis_angle(Vec3::Z, 0.5);
        assert!(prim.rotation.dot(expected).abs() > 0.9999);
    }

    #[test]
    fn tiny_angular_velocity_is_ignored() {
        let world = SimWorld::new();
        world.update_prim(1, |p| {
            p.angular_velocity = Vec3::new(0.001, 0.0, 0.0);
        });

        step_world(&world, 1.0, Duration::from_millis(500));
        assert_eq!(world.prim(1).unwrap().rotation, Quat::IDENTITY);
    }

    #[test]
    fn dilation_scales_elapsed_time() {
        let world = SimWorld::new();
        world.update_prim(1, |p| {
            p.acceleration = Vec3::new(0.0, 0.0, 1.0);
        });

        let dt = 0.1f32;
        step_world(&world, 0.5, Duration::from_secs_f32(dt));

        let half = 0.05f32;
        let prim = world.prim(1).unwrap();
        let expected_z = (0.5 * (half - HAVOK_STEP)) * half;
        assert!((prim.position.z - expected_z).abs() < 1e-6);
    }

    #[test]
    fn joint_prims_are_skipped() {
        let world = SimWorld::new();
        world.update_prim(1, |p| {
            p.joint = JointType::Hinge;
            p.acceleration = Vec3::Z;
        });

        step_world(&world, 1.0, Duration::from_millis(100));
        assert_eq!(world.prim(1).unwrap().position, Vec3::ZERO);
    }

    #[test]
    fn tick_scheduling_floors_at_fifty_ms() {
        let interval = Duration::from_millis(50);
        assert_eq!(
            next_tick(interval, Duration::from_millis(10)),
            Duration::from_millis(50)
        );
        assert_eq!(
            next_tick(Duration::from_millis(200), Duration::from_millis(30)),
            Duration::from_millis(170)
        );
        assert_eq!(
            next_tick(Duration::from_millis(200), Duration::from_millis(500)),
            MIN_TICK
        );
    }
}
