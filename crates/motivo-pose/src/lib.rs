//! Pose Conversion (C4): generalized positions -> canonical pose representation.
//!
//! Input is the simulator's generalized positions `q` plus a rig description
//! (joint layout and the list of named bodies to report); output is a
//! rig-neutral (translation, per-joint axis-angle, named world positions)
//! tuple. Joint order and position-name order are declared once by the rig
//! and must stay stable across versions (§4.4 invariant).

use std::collections::BTreeMap;
use std::ops::Range;

/// How a joint's slice of `qpos` should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JointKind {
    /// Single-DOF hinge: one scalar angle about a fixed local axis.
    Hinge,
    /// Three-DOF ball joint stored as a unit quaternion `(w, x, y, z)`.
    Ball,
}

/// One joint's position in the canonical output order and its `qpos` slice.
#[derive(Debug, Clone)]
pub struct JointSpec {
    /// Stable joint name, used only for diagnostics (order is positional).
    pub name: String,
    /// Byte-free index range into `qpos` backing this joint.
    pub slice: Range<usize>,
    /// Hinge or ball joint.
    pub kind: JointKind,
    /// Local rotation axis for hinge joints (ignored for ball joints).
    pub hinge_axis: [f64; 3],
}

/// Declares the canonical joint order and the named bodies to report
/// world positions for. Stable across process versions.
#[derive(Debug, Clone)]
pub struct RigDescriptor {
    /// `qpos` slice holding the root translation (length 3).
    pub root_translation: Range<usize>,
    /// Joints in canonical output order.
    pub joints: Vec<JointSpec>,
    /// Body names to emit world positions for, in output order.
    pub position_names: Vec<String>,
}

/// A rig-neutral pose derived from one physics snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct PoseUpdate {
    /// Root translation in world frame.
    pub translation: [f64; 3],
    /// Per-joint axis-angle vectors, in the rig's canonical joint order.
    pub pose: Vec<[f64; 3]>,
    /// World-frame positions for [`RigDescriptor::position_names`], same order.
    pub positions: Vec<[f64; 3]>,
    /// Names parallel to `positions`.
    pub position_names: Vec<String>,
    /// Raw generalized positions, echoed through for clients that want them.
    pub qpos: Vec<f64>,
}

fn quat_to_axis_angle(w: f64, x: f64, y: f64, z: f64) -> [f64; 3] {
    let norm = (w * w + x * x + y * y + z * z).sqrt();
    if norm < 1e-12 {
        return [0.0, 0.0, 0.0];
    }
    let (w, x, y, z) = (w / norm, x / norm, y / norm, z / norm);
    let angle = 2.0 * w.clamp(-1.0, 1.0).acos();
    let s = (1.0 - w * w).sqrt();
    if s < 1e-8 {
        [0.0, 0.0, 0.0]
    } else {
        [x / s * angle, y / s * angle, z / s * angle]
    }
}

fn axis_angle_to_quat(aa: [f64; 3]) -> (f64, f64, f64, f64) {
    let angle = (aa[0] * aa[0] + aa[1] * aa[1] + aa[2] * aa[2]).sqrt();
    if angle < 1e-12 {
        return (1.0, 0.0, 0.0, 0.0);
    }
    let (x, y, z) = (aa[0] / angle, aa[1] / angle, aa[2] / angle);
    let half = angle / 2.0;
    let s = half.sin();
    (half.cos(), x * s, y * s, z * s)
}

/// Converts a canonical (translation, per-joint axis-angle) pose back into
/// generalized positions, the inverse of [`convert`]'s pose half (`load_pose_smpl`).
/// Slices of `qpos` the rig doesn't cover (e.g. joint velocities folded into
/// the same vector by some rigs) are left at zero.
pub fn to_qpos(pose: &[[f64; 3]], trans: [f64; 3], rig: &RigDescriptor) -> Vec<f64> {
    let len = rig
        .joints
        .iter()
        .map(|j| j.slice.end)
        .chain(std::iter::once(rig.root_translation.end))
        .max()
        .unwrap_or(0);
    let mut qpos = vec![0.0; len];

    qpos[rig.root_translation.start] = trans[0];
    qpos[rig.root_translation.start + 1] = trans[1];
    qpos[rig.root_translation.start + 2] = trans[2];

    for (joint, aa) in rig.joints.iter().zip(pose.iter().copied()) {
        match joint.kind {
            JointKind::Hinge => {
                let axis_sq = joint.hinge_axis.iter().map(|c| c * c).sum::<f64>();
                let angle = if axis_sq > 1e-12 {
                    (aa[0] * joint.hinge_axis[0] + aa[1] * joint.hinge_axis[1] + aa[2] * joint.hinge_axis[2])
                        / axis_sq
                } else {
                    0.0
                };
                qpos[joint.slice.start] = angle;
            }
            JointKind::Ball => {
                let (w, x, y, z) = axis_angle_to_quat(aa);
                qpos[joint.slice.start] = w;
                qpos[joint.slice.start + 1] = x;
                qpos[joint.slice.start + 2] = y;
                qpos[joint.slice.start + 3] = z;
            }
        }
    }

    qpos
}

/// Converts generalized positions `qpos` plus the world positions already
/// computed by the simulator's forward kinematics into a [`PoseUpdate`].
///
/// `body_positions_world` is whatever the simulator reports; entries for
/// names absent from it default to the origin rather than failing the whole
/// conversion, since a transiently-missing body should degrade gracefully
/// (§4.7 "degraded operation").
pub fn convert(
    qpos: &[f64],
    rig: &RigDescriptor,
    body_positions_world: &BTreeMap<String, [f64; 3]>,
) -> PoseUpdate {
    let translation = [
        qpos.get(rig.root_translation.start).copied().unwrap_or(0.0),
        qpos.get(rig.root_translation.start + 1)
            .copied()
            .unwrap_or(0.0),
        qpos.get(rig.root_translation.start + 2)
            .copied()
            .unwrap_or(0.0),
    ];

    let pose = rig
        .joints
        .iter()
        .map(|joint| match joint.kind {
            JointKind::Hinge => {
                let angle = qpos.get(joint.slice.start).copied().unwrap_or(0.0);
                [
                    joint.hinge_axis[0] * angle,
                    joint.hinge_axis[1] * angle,
                    joint.hinge_axis[2] * angle,
                ]
            }
            JointKind::Ball => {
                let w = qpos.get(joint.slice.start).copied().unwrap_or(1.0);
                let x = qpos.get(joint.slice.start + 1).copied().unwrap_or(0.0);
                let y = qpos.get(joint.slice.start + 2).copied().unwrap_or(0.0);
                let z = qpos.get(joint.slice.start + 3).copied().unwrap_or(0.0);
                quat_to_axis_angle(w, x, y, z)
            }
        })
        .collect();

    let positions = rig
        .position_names
        .iter()
        .map(|name| body_positions_world.get(name).copied().unwrap_or_default())
        .collect();

    PoseUpdate {
        translation,
        pose,
        positions,
        position_names: rig.position_names.clone(),
        qpos: qpos.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rig() -> RigDescriptor {
        RigDescriptor {
            root_translation: 0..3,
            joints: vec![
                JointSpec {
                    name: "neck".into(),
                    slice: 7..8,
                    kind: JointKind::Hinge,
                    hinge_axis: [0.0, 0.0, 1.0],
                },
                JointSpec {
                    name: "shoulder_l".into(),
                    slice: 8..12,
                    kind: JointKind::Ball,
                    hinge_axis: [0.0, 0.0, 0.0],
                },
            ],
            position_names: vec!["pelvis".into(), "head".into()],
        }
    }

    #[test]
    fn position_order_matches_declared_names() {
        let mut bodies = BTreeMap::new();
        bodies.insert("head".to_string(), [0.0, 0.0, 1.7]);
        bodies.insert("pelvis".to_string(), [0.0, 0.0, 1.0]);
        let qpos = vec![0.0; 12];
        let update = convert(&qpos, &rig(), &bodies);
        assert_eq!(update.position_names, vec!["pelvis", "head"]);
        assert_eq!(update.positions[0], [0.0, 0.0, 1.0]);
        assert_eq!(update.positions[1], [0.0, 0.0, 1.7]);
    }

    #[test]
    fn missing_body_defaults_to_origin() {
        let bodies = BTreeMap::new();
        let qpos = vec![0.0; 12];
        let update = convert(&qpos, &rig(), &bodies);
        assert_eq!(update.positions[0], [0.0, 0.0, 0.0]);
    }

    #[test]
    fn identity_quaternion_yields_zero_axis_angle() {
        let bodies = BTreeMap::new();
        let mut qpos = vec![0.0; 12];
        qpos[8] = 1.0; // w = 1, x=y=z=0 -> identity rotation
        let update = convert(&qpos, &rig(), &bodies);
        let ball_joint = update.pose[1];
        assert!(ball_joint.iter().all(|c| c.abs() < 1e-9));
    }

    #[test]
    fn hinge_angle_scales_axis() {
        let bodies = BTreeMap::new();
        let mut qpos = vec![0.0; 12];
        qpos[7] = 1.0;
        let update = convert(&qpos, &rig(), &bodies);
        assert_eq!(update.pose[0], [0.0, 0.0, 1.0]);
    }

    #[test]
    fn to_qpos_round_trips_through_convert() {
        let bodies = BTreeMap::new();
        let mut original = vec![0.0; 12];
        original[0] = 0.3;
        original[1] = -0.1;
        original[2] = 1.2;
        original[7] = 0.6;
        // an arbitrary non-identity unit quaternion for the ball joint
        original[8] = 0.92388;
        original[9] = 0.38268;
        original[10] = 0.0;
        original[11] = 0.0;

        let update = convert(&original, &rig(), &bodies);
        let rebuilt = to_qpos(&update.pose, update.translation, &rig());

        for (a, b) in original.iter().zip(rebuilt.iter()) {
            assert!((a - b).abs() < 1e-4, "expected {a}, got {b}");
        }
    }
}
