//! `Env` and `Policy` are the two external collaborators the simulation loop
//! drives every tick (§1, §6). Both are named interfaces over a pretrained
//! humanoid-control stack that this crate treats as a black box: a real
//! deployment wires in bindings to the physics simulator and the policy
//! network, but the loop itself only ever calls through these traits.

use motivo_cache::ContextVector;
use motivo_rewards::PhysicsSnapshot;

/// A physics environment: steps generalized coordinates forward under an
/// action and reports the resulting snapshot.
pub trait Env: Send {
    /// Advances the simulation by one physics step under `action`.
    fn step(&mut self, action: &[f64]) -> anyhow::Result<()>;

    /// Current physics state.
    fn snapshot(&self) -> PhysicsSnapshot;

    /// Forcibly sets the environment's generalized positions (`load_pose`, resets).
    fn set_qpos(&mut self, qpos: &[f64]) -> anyhow::Result<()>;

    /// Dimensionality of the action vector this environment expects.
    fn action_dim(&self) -> usize;

    /// Forwards arbitrary name/value parameter updates (`update_parameters`).
    fn update_parameters(&mut self, params: &serde_json::Map<String, serde_json::Value>) -> anyhow::Result<()>;

    /// Renders the current frame as packed RGB8 (`capture_frame`, `make_snapshot`,
    /// and the media session frame source).
    fn render_frame(&self) -> motivo_net::RawFrame;
}

/// A pretrained control policy: maps a physics snapshot and an active
/// context vector to an action.
pub trait Policy: Send {
    /// Produces an action for the current snapshot under the given context.
    fn act(&mut self, snapshot: &PhysicsSnapshot, context: &ContextVector) -> anyhow::Result<Vec<f64>>;
}

#[cfg(test)]
pub(crate) mod fakes {
    use super::{Env, Policy};
    use motivo_cache::ContextVector;
    use motivo_rewards::PhysicsSnapshot;
    use std::collections::BTreeMap;

    pub struct FakeEnv {
        pub qpos: Vec<f64>,
        pub qvel: Vec<f64>,
        pub action_dim: usize,
        pub fail_next_step: bool,
    }

    impl FakeEnv {
        pub fn new(dims: usize) -> Self {
            Self {
                qpos: vec![0.0; dims],
                qvel: vec![0.0; dims],
                action_dim: dims,
                fail_next_step: false,
            }
        }
    }

    impl Env for FakeEnv {
        fn step(&mut self, action: &[f64]) -> anyhow::Result<()> {
            if self.fail_next_step {
                self.fail_next_step = false;
                anyhow::bail!("simulated step failure");
            }
            for (q, a) in self.qpos.iter_mut().zip(action) {
                *q += a * 0.01;
            }
            Ok(())
        }

        fn snapshot(&self) -> PhysicsSnapshot {
            PhysicsSnapshot {
                qpos: self.qpos.clone(),
                qvel: self.qvel.clone(),
                body_positions: BTreeMap::new(),
                pelvis_rotation: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
                ctrl: vec![0.0; self.action_dim],
            }
        }

        fn set_qpos(&mut self, qpos: &[f64]) -> anyhow::Result<()> {
            self.qpos = qpos.to_vec();
            Ok(())
        }

        fn action_dim(&self) -> usize {
            self.action_dim
        }

        fn update_parameters(
            &mut self,
            _params: &serde_json::Map<String, serde_json::Value>,
        ) -> anyhow::Result<()> {
            Ok(())
        }

        fn render_frame(&self) -> motivo_net::RawFrame {
            motivo_net::RawFrame {
                width: 4,
                height: 4,
                rgb: vec![0u8; 4 * 4 * 3],
            }
        }
    }

    pub struct FakePolicy {
        pub fail_next_act: bool,
    }

    impl Policy for FakePolicy {
        fn act(&mut self, snapshot: &PhysicsSnapshot, _context: &ContextVector) -> anyhow::Result<Vec<f64>> {
            if self.fail_next_act {
                self.fail_next_act = false;
                anyhow::bail!("simulated policy failure");
            }
            Ok(vec![0.1; snapshot.qpos.len()])
        }
    }
}
