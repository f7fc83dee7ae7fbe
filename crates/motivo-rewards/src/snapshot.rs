//! Physics snapshot: the read-only tuple every reward primitive is evaluated over.

use std::collections::BTreeMap;

/// A single step of simulator state: generalized coordinates, velocities,
/// named body world positions, and the control input that produced it.
///
/// Produced by the simulation loop each tick; read-only to everything else.
#[derive(Debug, Clone, PartialEq)]
pub struct PhysicsSnapshot {
    /// Generalized positions (length depends on the rig, e.g. 76).
    pub qpos: Vec<f64>,
    /// Generalized velocities, same length convention as `qpos`'s velocity space.
    pub qvel: Vec<f64>,
    /// World-frame positions of named bodies (pelvis, head, hands, feet, ...).
    pub body_positions: BTreeMap<String, [f64; 3]>,
    /// 3x3 pelvis rotation matrix, row-major, used for local-frame position rewards.
    pub pelvis_rotation: [[f64; 3]; 3],
    /// Control input applied to reach this snapshot.
    pub ctrl: Vec<f64>,
}

impl PhysicsSnapshot {
    /// Looks up a named body's world position.
    pub fn body(&self, name: &str) -> Option<[f64; 3]> {
        self.body_positions.get(name).copied()
    }

    /// Root (pelvis) height above ground, the Z component of `qpos[2]` by convention.
    pub fn root_height(&self) -> f64 {
        self.qpos.get(2).copied().unwrap_or(0.0)
    }

    /// Forward speed magnitude in the XY plane, derived from the root linear velocity.
    pub fn forward_speed(&self) -> f64 {
        let vx = self.qvel.first().copied().unwrap_or(0.0);
        let vy = self.qvel.get(1).copied().unwrap_or(0.0);
        (vx * vx + vy * vy).sqrt()
    }

    /// Projects a world-frame point into the pelvis local frame.
    pub fn to_local_frame(&self, world: [f64; 3]) -> [f64; 3] {
        let r = &self.pelvis_rotation;
        [
            r[0][0] * world[0] + r[1][0] * world[1] + r[2][0] * world[2],
            r[0][1] * world[0] + r[1][1] * world[1] + r[2][1] * world[2],
            r[0][2] * world[0] + r[1][2] * world[1] + r[2][2] * world[2],
        ]
    }
}
