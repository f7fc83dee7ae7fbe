//! Inbound commands (§4.9), exhaustive per the spec's command table.

use std::collections::BTreeMap;

use motivo_rewards::RewardSpec;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Context-mixing strategy (§4.3 "Mixing").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MixStrategy {
    /// `(1-w)*zA + w*zB`
    Linear,
    /// L2-normalized linear combination.
    Normalized,
    /// Spherical linear interpolation, falling back to linear near-parallel.
    Slerp,
}

/// Parameters for `update_reward`: replace primitive `index`'s parameters in place.
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateRewardPayload {
    /// Index into the active specification's primitive list.
    pub index: usize,
    /// New parameter object for that primitive (name is unchanged).
    pub params: serde_json::Map<String, Value>,
}

/// Parameters for `mix_pose_reward`.
#[derive(Debug, Clone, Deserialize)]
pub struct MixPoseRewardPayload {
    /// Whether to hold the environment's current pose (vs. an explicit `qpos`).
    #[serde(default)]
    pub use_current_pose: bool,
    /// Explicit target pose, when `use_current_pose` is false.
    #[serde(default)]
    pub qpos: Option<Vec<f64>>,
    /// Reward specification forming the second mixing component.
    pub reward: RewardSpec,
    /// Mixing weight in `[0, 1]`; 0 favors the hold-pose context, 1 favors reward.
    pub mix_weight: f64,
    /// Mixing strategy.
    #[serde(default = "default_mix_strategy")]
    pub mix_strategy: MixStrategy,
}

fn default_mix_strategy() -> MixStrategy {
    MixStrategy::Linear
}

/// Which inference entry point `load_pose` should call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoseInferenceKind {
    /// Goal-conditioned inference.
    Goal,
    /// Tracking inference.
    Tracking,
    /// Embedding inference.
    Embedding,
}

/// Parameters for `load_pose`.
#[derive(Debug, Clone, Deserialize)]
pub struct LoadPosePayload {
    /// Target generalized positions.
    pub qpos: Vec<f64>,
    /// Which inference entry point to call.
    #[serde(default = "default_pose_inference_kind")]
    pub inference_kind: PoseInferenceKind,
}

fn default_pose_inference_kind() -> PoseInferenceKind {
    PoseInferenceKind::Goal
}

/// Parameters for `load_pose_smpl`: canonical pose + translation, converted to `qpos` first.
#[derive(Debug, Clone, Deserialize)]
pub struct LoadPoseSmplPayload {
    /// Per-joint axis-angle vectors in canonical joint order.
    pub pose: Vec<[f64; 3]>,
    /// Root translation.
    pub trans: [f64; 3],
    /// Which inference entry point to call.
    #[serde(default = "default_pose_inference_kind")]
    pub inference_kind: PoseInferenceKind,
}

/// Every inbound command, exhaustively matching §4.9's table.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Replace or extend the active reward specification.
    RequestReward {
        /// New reward specification.
        #[serde(flatten)]
        spec: RewardSpec,
    },
    /// Update parameters of one primitive in the active specification by index.
    UpdateReward(UpdateRewardPayload),
    /// Clear the active specification.
    ClearActiveRewards {
        /// If true, the active context slot is left untouched.
        #[serde(default)]
        preserve_z: bool,
    },
    /// Full reset: specification, context, and environment.
    CleanRewards {},
    /// Compute a hold-pose context and a reward context, then mix them.
    MixPoseReward(MixPoseRewardPayload),
    /// Set the active context from a target joint-position vector.
    LoadPose(LoadPosePayload),
    /// As `load_pose`, but input is a canonical pose+translation representation.
    LoadPoseSmpl(LoadPoseSmplPayload),
    /// Load a context vector directly from a serialized blob and set it active.
    LoadNpzContext {
        /// Raw context vector components.
        context: Vec<f32>,
    },
    /// Reply with the active specification, pose reference, and computing flag.
    GetCurrentContext {},
    /// Forward name -> value parameter updates to the environment collaborator.
    UpdateParameters {
        /// Parameter updates.
        params: BTreeMap<String, Value>,
    },
    /// Reconfigure the context engine (e.g. batch size).
    UpdateRewardComputation {
        /// Requested batch size; clamped to `[10, 5000]`.
        batch_size: usize,
    },
    /// Reply with current world positions of every named body.
    GetTargetPositions {},
    /// Emit the current overlaid frame to the shared frames directory.
    CaptureFrame {},
    /// As `capture_frame`, but also write a timestamped copy.
    MakeSnapshot {},
    /// Start trajectory-ZIP recording.
    StartRecording {},
    /// Stop trajectory-ZIP recording.
    StopRecording {},
    /// Start combined-package (video + trajectory) recording.
    StartVideoRecording {},
    /// Stop combined-package recording.
    StopVideoRecording {},
    /// Reply with subscriber stats, `is_computing`, and last computation status.
    DebugModelInfo {},
}

impl Command {
    /// The wire `type` string for this command, used to build `{type}_error` replies.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::RequestReward { .. } => "request_reward",
            Self::UpdateReward(_) => "update_reward",
            Self::ClearActiveRewards { .. } => "clear_active_rewards",
            Self::CleanRewards {} => "clean_rewards",
            Self::MixPoseReward(_) => "mix_pose_reward",
            Self::LoadPose(_) => "load_pose",
            Self::LoadPoseSmpl(_) => "load_pose_smpl",
            Self::LoadNpzContext { .. } => "load_npz_context",
            Self::GetCurrentContext {} => "get_current_context",
            Self::UpdateParameters { .. } => "update_parameters",
            Self::UpdateRewardComputation { .. } => "update_reward_computation",
            Self::GetTargetPositions {} => "get_target_positions",
            Self::CaptureFrame {} => "capture_frame",
            Self::MakeSnapshot {} => "make_snapshot",
            Self::StartRecording {} => "start_recording",
            Self::StopRecording {} => "stop_recording",
            Self::StartVideoRecording {} => "start_video_recording",
            Self::StopVideoRecording {} => "stop_video_recording",
            Self::DebugModelInfo {} => "debug_model_info",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_reward_parses_with_combination_type() {
        let json = serde_json::json!({
            "type": "request_reward",
            "rewards": [{"name": "stay-upright"}],
            "weights": [1.0],
            "combinationType": "multiplicative"
        });
        let cmd: Command = serde_json::from_value(json).expect("parses");
        assert_eq!(cmd.type_name(), "request_reward");
    }

    #[test]
    fn clean_rewards_parses_with_empty_body() {
        let json = serde_json::json!({"type": "clean_rewards"});
        let cmd: Command = serde_json::from_value(json).expect("parses");
        assert!(matches!(cmd, Command::CleanRewards {}));
    }

    #[test]
    fn unknown_type_fails_to_parse() {
        let json = serde_json::json!({"type": "not_a_real_command"});
        assert!(serde_json::from_value::<Command>(json).is_err());
    }
}
