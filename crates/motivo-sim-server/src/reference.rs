//! Reference `Env`/`Policy`/`ContextBackend`/`SnapshotSource` (§1, §6):
//! the physics simulator, the pretrained policy, and the reward buffer are
//! named external collaborators this workspace treats as black boxes. A
//! real deployment swaps these for bindings to its own simulator and model;
//! this module exists so the host process has something concrete to run
//! standalone, in the same spirit as this codebase's null/no-op defaults
//! for other pluggable collaborators.

use std::collections::BTreeMap;
use std::path::Path;

use motivo_cache::ContextVector;
use motivo_context::{ContextBackend, SnapshotSource};
use motivo_net::RawFrame;
use motivo_pose::{JointKind, JointSpec, RigDescriptor};
use motivo_rewards::PhysicsSnapshot;
use motivo_sim::{Env, Policy};
use rand::Rng;
use tracing::debug;

/// The canonical joint layout this reference implementation drives. A real
/// deployment's rig comes from its own simulator's model description.
pub fn reference_rig() -> RigDescriptor {
    RigDescriptor {
        root_translation: 0..3,
        joints: vec![
            JointSpec {
                name: "neck".into(),
                slice: 3..4,
                kind: JointKind::Hinge,
                hinge_axis: [0.0, 0.0, 1.0],
            },
            JointSpec {
                name: "spine".into(),
                slice: 4..5,
                kind: JointKind::Hinge,
                hinge_axis: [1.0, 0.0, 0.0],
            },
            JointSpec {
                name: "shoulder_l".into(),
                slice: 5..9,
                kind: JointKind::Ball,
                hinge_axis: [0.0, 0.0, 0.0],
            },
            JointSpec {
                name: "shoulder_r".into(),
                slice: 9..13,
                kind: JointKind::Ball,
                hinge_axis: [0.0, 0.0, 0.0],
            },
            JointSpec {
                name: "hip_l".into(),
                slice: 13..17,
                kind: JointKind::Ball,
                hinge_axis: [0.0, 0.0, 0.0],
            },
            JointSpec {
                name: "hip_r".into(),
                slice: 17..21,
                kind: JointKind::Ball,
                hinge_axis: [0.0, 0.0, 0.0],
            },
            JointSpec {
                name: "knee_l".into(),
                slice: 21..22,
                kind: JointKind::Hinge,
                hinge_axis: [1.0, 0.0, 0.0],
            },
            JointSpec {
                name: "knee_r".into(),
                slice: 22..23,
                kind: JointKind::Hinge,
                hinge_axis: [1.0, 0.0, 0.0],
            },
        ],
        position_names: vec![
            "pelvis".into(),
            "head".into(),
            "left_hand".into(),
            "right_hand".into(),
            "left_foot".into(),
            "right_foot".into(),
        ],
    }
}

/// `qpos` length implied by [`reference_rig`].
pub const QPOS_LEN: usize = 23;

/// A standing-pose `qpos`: upright pelvis, identity quaternions on every ball joint.
pub fn standing_qpos() -> Vec<f64> {
    let mut qpos = vec![0.0; QPOS_LEN];
    qpos[2] = 1.0; // pelvis height
    for joint in reference_rig().joints {
        if joint.kind == JointKind::Ball {
            qpos[joint.slice.start] = 1.0; // quaternion w component
        }
    }
    qpos
}

fn body_positions_from_pelvis(pelvis: [f64; 3]) -> BTreeMap<String, [f64; 3]> {
    let mut positions = BTreeMap::new();
    positions.insert("pelvis".to_string(), pelvis);
    positions.insert("head".to_string(), [pelvis[0], pelvis[1], pelvis[2] + 0.5]);
    positions.insert(
        "left_hand".to_string(),
        [pelvis[0] + 0.3, pelvis[1], pelvis[2] + 0.2],
    );
    positions.insert(
        "right_hand".to_string(),
        [pelvis[0] - 0.3, pelvis[1], pelvis[2] + 0.2],
    );
    positions.insert(
        "left_foot".to_string(),
        [pelvis[0] + 0.15, pelvis[1], pelvis[2] - 0.9],
    );
    positions.insert(
        "right_foot".to_string(),
        [pelvis[0] - 0.15, pelvis[1], pelvis[2] - 0.9],
    );
    positions
}

/// A minimal physics stand-in: integrates an action directly into `qpos`
/// and derives named body positions from the pelvis by fixed local offsets
/// rather than a real kinematic chain.
pub struct ReferenceEnv {
    qpos: Vec<f64>,
    qvel: Vec<f64>,
}

impl ReferenceEnv {
    /// Builds an environment starting from the standing pose.
    pub fn new() -> Self {
        Self {
            qpos: standing_qpos(),
            qvel: vec![0.0; QPOS_LEN],
        }
    }
}

impl Default for ReferenceEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl Env for ReferenceEnv {
    fn step(&mut self, action: &[f64]) -> anyhow::Result<()> {
        const DT: f64 = 1.0 / 30.0;
        for (q, a) in self.qpos.iter_mut().zip(action) {
            *q += a.clamp(-1.0, 1.0) * DT;
        }
        self.qpos[2] = self.qpos[2].clamp(0.2, 2.2);
        Ok(())
    }

    fn snapshot(&self) -> PhysicsSnapshot {
        let pelvis = [self.qpos[0], self.qpos[1], self.qpos[2]];
        PhysicsSnapshot {
            qpos: self.qpos.clone(),
            qvel: self.qvel.clone(),
            body_positions: body_positions_from_pelvis(pelvis),
            pelvis_rotation: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            ctrl: vec![0.0; QPOS_LEN],
        }
    }

    fn set_qpos(&mut self, qpos: &[f64]) -> anyhow::Result<()> {
        for (slot, value) in self.qpos.iter_mut().zip(qpos.iter().chain(std::iter::repeat(&0.0))) {
            *slot = *value;
        }
        Ok(())
    }

    fn action_dim(&self) -> usize {
        QPOS_LEN
    }

    fn update_parameters(&mut self, params: &serde_json::Map<String, serde_json::Value>) -> anyhow::Result<()> {
        debug!(count = params.len(), "reference environment received parameter update (no-op)");
        Ok(())
    }

    fn render_frame(&self) -> RawFrame {
        const WIDTH: u32 = 160;
        const HEIGHT: u32 = 120;
        let height_byte = ((self.qpos[2].clamp(0.0, 2.55)) * 100.0) as u8;
        let mut rgb = Vec::with_capacity((WIDTH * HEIGHT * 3) as usize);
        for _ in 0..(WIDTH * HEIGHT) {
            rgb.push(height_byte);
            rgb.push(40);
            rgb.push(80);
        }
        RawFrame {
            width: WIDTH,
            height: HEIGHT,
            rgb,
        }
    }
}

/// A deterministic policy stand-in: pulls `qpos` toward a context-perturbed
/// target by a fixed gain. No learning, no weights; a real deployment wires
/// in its pretrained model here.
pub struct ReferencePolicy {
    target_base: Vec<f64>,
}

impl ReferencePolicy {
    /// Builds a policy pulling toward the standing pose by default.
    pub fn new() -> Self {
        Self {
            target_base: standing_qpos(),
        }
    }
}

impl Default for ReferencePolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl Policy for ReferencePolicy {
    fn act(&mut self, snapshot: &PhysicsSnapshot, context: &ContextVector) -> anyhow::Result<Vec<f64>> {
        const GAIN: f64 = 2.0;
        let action = self
            .target_base
            .iter()
            .enumerate()
            .map(|(i, base)| {
                let perturbation = context
                    .0
                    .get(i % context.0.len().max(1))
                    .copied()
                    .unwrap_or(0.0) as f64
                    * 0.1;
                let target = base + perturbation;
                let current = snapshot.qpos.get(i).copied().unwrap_or(0.0);
                (target - current) * GAIN
            })
            .collect();
        Ok(action)
    }
}

/// A deterministic, closed-form stand-in for the pretrained policy's
/// inference entry points. Projects (padding/truncating/tiling) physics
/// state into a fixed-dimension context vector; real inference happens in
/// the collaborator this trait abstracts over.
pub struct ReferenceContextBackend {
    context_dim: usize,
}

impl ReferenceContextBackend {
    /// Builds a backend producing `context_dim`-dimensional vectors.
    pub fn new(context_dim: usize) -> Self {
        Self {
            context_dim: context_dim.max(1),
        }
    }

    fn project(&self, values: &[f64], offset: f32) -> ContextVector {
        if values.is_empty() {
            return ContextVector(vec![offset; self.context_dim]);
        }
        let out = (0..self.context_dim)
            .map(|i| values[i % values.len()] as f32 + offset)
            .collect();
        ContextVector(out)
    }
}

impl ContextBackend for ReferenceContextBackend {
    fn reward_weighted_inference(
        &self,
        snapshots: &[PhysicsSnapshot],
        rewards: &[f64],
    ) -> anyhow::Result<ContextVector> {
        if snapshots.is_empty() {
            anyhow::bail!("reward-weighted inference called with an empty snapshot batch");
        }
        let weight_sum: f64 = rewards.iter().map(|r| r.max(0.0)).sum::<f64>().max(1e-9);
        let mut acc = vec![0.0_f64; self.context_dim];
        for (snapshot, reward) in snapshots.iter().zip(rewards) {
            let weight = reward.max(0.0) / weight_sum;
            for (i, component) in acc.iter_mut().enumerate() {
                let value = snapshot.qpos.get(i % snapshot.qpos.len().max(1)).copied().unwrap_or(0.0);
                *component += weight * value;
            }
        }
        Ok(ContextVector(acc.into_iter().map(|v| v as f32).collect()))
    }

    fn goal_inference(&self, qpos: &[f64]) -> anyhow::Result<ContextVector> {
        Ok(self.project(qpos, 0.0))
    }

    fn tracking_inference(&self, qpos: &[f64]) -> anyhow::Result<ContextVector> {
        Ok(self.project(qpos, 0.1))
    }

    fn embedding_inference(&self, qpos: &[f64]) -> anyhow::Result<ContextVector> {
        Ok(self.project(qpos, 0.2))
    }
}

/// Builds the policy's output dimensionality from an optional config file
/// (`{"context_dim": N}`). Absent path falls back to `default_dim`; a
/// present-but-unreadable-or-malformed path is a fatal startup error.
pub fn load_context_dim(path: Option<&Path>, default_dim: usize) -> anyhow::Result<usize> {
    let Some(path) = path else {
        return Ok(default_dim);
    };
    let contents = std::fs::read_to_string(path)
        .map_err(|err| anyhow::anyhow!("failed to read policy config at {}: {err}", path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&contents)
        .map_err(|err| anyhow::anyhow!("malformed policy config at {}: {err}", path.display()))?;
    let dim = value
        .get("context_dim")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| anyhow::anyhow!("policy config at {} is missing a numeric context_dim", path.display()))?;
    Ok(dim as usize)
}

/// A reward buffer backed by a fixed, immutable set of snapshots sampled
/// once at startup (§1 "Reward Buffer"): either loaded from a file of
/// `qpos` rows, or synthesized by perturbing the standing pose.
#[derive(Debug)]
pub struct ReferenceSnapshotBuffer {
    snapshots: Vec<PhysicsSnapshot>,
}

impl ReferenceSnapshotBuffer {
    /// Loads the buffer from `path` (a JSON array of `qpos` arrays). A
    /// missing file or malformed JSON is returned as an error (fatal at
    /// startup).
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|err| anyhow::anyhow!("failed to read reward buffer at {}: {err}", path.display()))?;
        let rows: Vec<Vec<f64>> = serde_json::from_str(&contents)
            .map_err(|err| anyhow::anyhow!("malformed reward buffer at {}: {err}", path.display()))?;
        if rows.is_empty() {
            anyhow::bail!("reward buffer at {} contains no snapshots", path.display());
        }
        let snapshots = rows.into_iter().map(qpos_to_snapshot).collect();
        Ok(Self { snapshots })
    }

    /// Synthesizes `size` snapshots by perturbing the standing pose with
    /// small random offsets drawn from a reference distribution.
    pub fn synthesize(size: usize) -> Self {
        let standing = standing_qpos();
        let mut rng = rand::thread_rng();
        let snapshots = (0..size.max(1))
            .map(|_| {
                let qpos: Vec<f64> = standing
                    .iter()
                    .map(|q| q + rng.gen_range(-0.05..0.05))
                    .collect();
                qpos_to_snapshot(qpos)
            })
            .collect();
        Self { snapshots }
    }
}

fn qpos_to_snapshot(mut qpos: Vec<f64>) -> PhysicsSnapshot {
    qpos.resize(QPOS_LEN, 0.0);
    let pelvis = [qpos[0], qpos[1], qpos[2]];
    PhysicsSnapshot {
        qvel: vec![0.0; qpos.len()],
        body_positions: body_positions_from_pelvis(pelvis),
        pelvis_rotation: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
        ctrl: vec![0.0; qpos.len()],
        qpos,
    }
}

impl SnapshotSource for ReferenceSnapshotBuffer {
    fn snapshots(&self) -> Vec<PhysicsSnapshot> {
        self.snapshots.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_env_step_moves_qpos_toward_action() {
        let mut env = ReferenceEnv::new();
        let before = env.snapshot().qpos;
        env.step(&vec![1.0; QPOS_LEN]).unwrap();
        let after = env.snapshot().qpos;
        assert!(after[0] > before[0]);
    }

    #[test]
    fn reference_env_clamps_pelvis_height() {
        let mut env = ReferenceEnv::new();
        for _ in 0..1000 {
            env.step(&vec![1.0; QPOS_LEN]).unwrap();
        }
        assert!(env.snapshot().qpos[2] <= 2.2);
    }

    #[test]
    fn reference_policy_pulls_toward_standing_when_context_is_idle() {
        let mut policy = ReferencePolicy::new();
        let mut env = ReferenceEnv::new();
        env.set_qpos(&vec![0.0; QPOS_LEN]).unwrap();
        let action = policy.act(&env.snapshot(), &ContextVector(vec![0.0; 8])).unwrap();
        assert!(action[2] > 0.0, "should push pelvis height back up toward standing");
    }

    #[test]
    fn backend_projection_is_deterministic() {
        let backend = ReferenceContextBackend::new(4);
        let a = backend.goal_inference(&[1.0, 2.0]).unwrap();
        let b = backend.goal_inference(&[1.0, 2.0]).unwrap();
        assert_eq!(a.0, b.0);
        assert_eq!(a.dim(), 4);
    }

    #[test]
    fn backend_inference_kinds_are_distinguishable() {
        let backend = ReferenceContextBackend::new(4);
        let goal = backend.goal_inference(&[1.0, 2.0]).unwrap();
        let tracking = backend.tracking_inference(&[1.0, 2.0]).unwrap();
        assert_ne!(goal.0, tracking.0);
    }

    #[test]
    fn reward_weighted_inference_rejects_empty_batch() {
        let backend = ReferenceContextBackend::new(4);
        assert!(backend.reward_weighted_inference(&[], &[]).is_err());
    }

    #[test]
    fn synthesized_buffer_has_requested_size() {
        let buffer = ReferenceSnapshotBuffer::synthesize(50);
        assert_eq!(buffer.snapshots().len(), 50);
    }

    #[test]
    fn load_missing_buffer_file_is_an_error() {
        let err = ReferenceSnapshotBuffer::load(Path::new("/nonexistent/reward-buffer.json")).unwrap_err();
        assert!(err.to_string().contains("failed to read reward buffer"));
    }

    #[test]
    fn load_context_dim_defaults_when_path_is_absent() {
        assert_eq!(load_context_dim(None, 32).unwrap(), 32);
    }

    #[test]
    fn load_context_dim_errors_on_missing_file() {
        assert!(load_context_dim(Some(Path::new("/nonexistent/policy.json")), 32).is_err());
    }
}
