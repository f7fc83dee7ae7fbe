//! Outbound broadcasts and command replies (§6).

use std::collections::BTreeMap;

use motivo_rewards::RewardSpec;
use serde::{Deserialize, Serialize};

/// Status of a background context computation (§4.9, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComputationStatus {
    /// A computation has started.
    Started,
    /// The computation completed successfully.
    Completed,
    /// The computation failed; the active context fell back to default-idle.
    Error,
    /// A computation was already in flight; this request was not queued.
    ComputingInProgress,
}

/// Every outbound message type.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    /// Immediate acknowledgement of `request_reward` / `update_reward` / `mix_pose_reward`.
    Reward {
        /// Whether a computation is now in flight.
        is_computing: bool,
        /// Unique id correlating this computation's progress messages.
        message_id: String,
    },
    /// Terminal or progress status for a background computation (sent to originator only).
    RewardComputationStatus {
        /// Computation status.
        status: ComputationStatus,
        /// Id shared with the originating `Reward` acknowledgement.
        message_id: String,
        /// ISO-8601 timestamp.
        timestamp: String,
    },
    /// Acknowledgement of `update_parameters`.
    ParametersUpdated {
        /// Parameters forwarded to the environment collaborator.
        params: BTreeMap<String, serde_json::Value>,
    },
    /// Acknowledgement of `load_pose` / `load_pose_smpl` / `load_npz_context`.
    PoseLoaded {},
    /// Acknowledgement of `mix_pose_reward`.
    MixRewardOnlyUpdated {},
    /// Acknowledgement of `clear_active_rewards`.
    RewardsCleared {},
    /// Acknowledgement of `update_reward`.
    RewardUpdated {},
    /// Acknowledgement of `clean_rewards`.
    CleanRewards {},
    /// Per-frame pose broadcast, emitted at the simulation loop rate.
    SmplUpdate {
        /// Per-joint axis-angle vectors.
        pose: Vec<[f64; 3]>,
        /// Root translation.
        trans: [f64; 3],
        /// Named body world positions.
        positions: Vec<[f64; 3]>,
        /// Raw generalized positions.
        qpos: Vec<f64>,
        /// Names parallel to `positions`.
        position_names: Vec<String>,
        /// Disk-cache-file reference, present when the active context came from a cache hit.
        #[serde(skip_serializing_if = "Option::is_none")]
        cache_file: Option<String>,
        /// ISO-8601 timestamp.
        timestamp: String,
    },
    /// Reply to `get_current_context`.
    CurrentContext {
        /// Active reward specification, if any.
        rewards: Option<RewardSpec>,
        /// Active pose reference, if any.
        pose_reference: Option<Vec<f64>>,
        /// Whether a computation is in flight.
        is_computing: bool,
        /// Disk-cache-file reference for the active context, if cached.
        cache_file: Option<String>,
    },
    /// Reply to `get_target_positions`.
    TargetPositions {
        /// World position of every named body.
        positions: BTreeMap<String, [f64; 3]>,
    },
    /// Reply to `capture_frame`.
    FrameCaptured {
        /// Path the frame was written to.
        path: String,
    },
    /// Reply to `make_snapshot`.
    SnapshotCaptured {
        /// Path the frame was written to.
        path: String,
        /// Timestamped copy path.
        timestamped_path: String,
    },
    /// Reply to `start_recording` / `stop_recording`.
    RecordingStatus {
        /// Human-readable status (`"started"`, `"stopped"`, `"error"`).
        status: String,
        /// Archive download reference, present on a successful stop.
        #[serde(skip_serializing_if = "Option::is_none")]
        download_url: Option<String>,
        /// Error message, present when the recording could not be finalized.
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Reply to `start_video_recording` / `stop_video_recording`.
    VideoRecordingStatus {
        /// Human-readable status.
        status: String,
        /// Archive download reference, present on a successful stop.
        #[serde(skip_serializing_if = "Option::is_none")]
        download_url: Option<String>,
        /// Error message, present when the recording could not be finalized.
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Reply to `debug_model_info`.
    DebugModelInfo {
        /// Number of currently admitted subscribers.
        subscriber_count: usize,
        /// Whether a computation is in flight.
        is_computing: bool,
        /// Last computation's terminal status, cleared after delivery.
        last_computation_status: Option<ComputationStatus>,
    },
}

#[derive(Debug, Clone, Deserialize)]
struct TaggedProbe {
    #[serde(rename = "type")]
    #[allow(dead_code)]
    kind: String,
}

/// Returns `true` if `raw` parses as a well-formed, tagged JSON object
/// (used by the gateway to decide whether to forward or reject a frame
/// before full command parsing).
pub fn looks_like_tagged_message(raw: &str) -> bool {
    serde_json::from_str::<TaggedProbe>(raw).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reward_serializes_with_snake_case_tag() {
        let msg = Outbound::Reward {
            is_computing: true,
            message_id: "abc".into(),
        };
        let json = serde_json::to_string(&msg).expect("serializes");
        assert!(json.contains("\"type\":\"reward\""));
        assert!(json.contains("\"is_computing\":true"));
    }

    #[test]
    fn smpl_update_omits_cache_file_when_absent() {
        let msg = Outbound::SmplUpdate {
            pose: vec![],
            trans: [0.0; 3],
            positions: vec![],
            qpos: vec![],
            position_names: vec![],
            cache_file: None,
            timestamp: "2026-01-01T00:00:00Z".into(),
        };
        let json = serde_json::to_string(&msg).expect("serializes");
        assert!(!json.contains("cache_file"));
    }
}
