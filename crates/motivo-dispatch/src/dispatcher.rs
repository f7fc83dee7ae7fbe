//! The message dispatcher (§4.9 / C9): routes every inbound [`Command`],
//! owns the active reward specification, pose reference, and `is_computing`
//! flag, and fans progress updates back to the originating peer.
//!
//! Dispatch follows a uniform shape for anything that triggers a background
//! context computation: an immediate [`Outbound::Reward`] acknowledgement
//! (kicked off, or `ComputingInProgress` if one was already in flight), a
//! `RewardComputationStatus::Started` progress message, then either
//! `Completed` plus the command's own terminal acknowledgement, or `Error`
//! with the active context falling back to default-idle.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use image::{ImageBuffer, Rgb};
use motivo_cache::{ContextCache, ContextVector};
use motivo_context::{ContextBackend, ContextEngine, SnapshotSource};
use motivo_net::{RawFrame, SubscriberRegistry};
use motivo_pose::RigDescriptor;
use motivo_proto::{
    error_reply, now_iso8601, to_json, Command, ComputationStatus, MixStrategy, Outbound,
    PoseInferenceKind, RewardSpec,
};
use motivo_record::Recorder;
use motivo_rewards::{Combinator, RewardPrimitiveSpec};
use motivo_sim::{ActiveContextSlot, SimHandle};
use tracing::{instrument, warn};

/// Hold-pose margin/weight used for every axis of every synthesized
/// "position" target (`examples/original_source`'s `reward_config_hold`
/// uses the same fixed 0.01 margin and uniform weight for each axis).
const HOLD_POSE_MARGIN: f64 = 0.01;
const HOLD_POSE_WEIGHT: f64 = 1.0;

/// Synthesizes a "position" reward spec that rewards the agent for matching
/// the given body-part world positions — the hold-pose half of
/// `mix_pose_reward`'s dynamically generated reward.
fn hold_pose_spec(body_positions: &BTreeMap<String, [f64; 3]>) -> RewardSpec {
    let mut targets = serde_json::Map::new();
    for (body, pos) in body_positions {
        targets.insert(
            body.clone(),
            serde_json::json!({
                "x": {"target": pos[0], "margin": HOLD_POSE_MARGIN, "weight": HOLD_POSE_WEIGHT},
                "y": {"target": pos[1], "margin": HOLD_POSE_MARGIN, "weight": HOLD_POSE_WEIGHT},
                "z": {"target": pos[2], "margin": HOLD_POSE_MARGIN, "weight": HOLD_POSE_WEIGHT},
            }),
        );
    }
    let mut params = serde_json::Map::new();
    params.insert("targets".into(), serde_json::Value::Object(targets));
    RewardSpec {
        rewards: vec![RewardPrimitiveSpec {
            name: "position".into(),
            id: None,
            params,
        }],
        weights: vec![1.0],
        combinator: Combinator::Geometric,
    }
}

struct SessionState {
    active_spec: Option<RewardSpec>,
    pose_reference: Option<Vec<f64>>,
    last_status: Option<ComputationStatus>,
}

/// Routes inbound commands against the shared context/sim/recording subsystems.
pub struct Dispatcher<B: ContextBackend + 'static, S: SnapshotSource + 'static> {
    engine: Arc<ContextEngine<B, S>>,
    cache: Arc<ContextCache>,
    slot: Arc<ActiveContextSlot>,
    registry: Arc<SubscriberRegistry>,
    sim: SimHandle,
    recorder: Arc<Recorder>,
    rig: RigDescriptor,
    frames_dir: PathBuf,
    state: Mutex<SessionState>,
    is_computing: AtomicBool,
    message_seq: AtomicU64,
}

impl<B: ContextBackend + 'static, S: SnapshotSource + 'static> Dispatcher<B, S> {
    /// Builds a dispatcher over the shared subsystem handles.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        engine: Arc<ContextEngine<B, S>>,
        cache: Arc<ContextCache>,
        slot: Arc<ActiveContextSlot>,
        registry: Arc<SubscriberRegistry>,
        sim: SimHandle,
        recorder: Arc<Recorder>,
        rig: RigDescriptor,
        frames_dir: PathBuf,
    ) -> Self {
        Self {
            engine,
            cache,
            slot,
            registry,
            sim,
            recorder,
            rig,
            frames_dir,
            state: Mutex::new(SessionState {
                active_spec: None,
                pose_reference: None,
                last_status: None,
            }),
            is_computing: AtomicBool::new(false),
            message_seq: AtomicU64::new(0),
        }
    }

    fn next_message_id(&self) -> String {
        format!("msg-{}", self.message_seq.fetch_add(1, Ordering::Relaxed))
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn send(&self, peer: &str, outbound: &Outbound) {
        match to_json(outbound) {
            Ok(payload) => {
                self.registry.send_to(peer, payload.as_bytes());
            }
            Err(err) => warn!(error = %err, "failed to serialize outbound message"),
        }
    }

    /// Claims the single in-flight computation slot. On success, returns the
    /// message id future progress messages will be correlated under (the
    /// caller builds the `Reward` kickoff ack from it). On failure, a
    /// computation was already in flight and the returned status is the
    /// reply to send as-is.
    fn try_claim_computation(&self) -> Result<String, Outbound> {
        if self.is_computing.swap(true, Ordering::AcqRel) {
            return Err(Outbound::RewardComputationStatus {
                status: ComputationStatus::ComputingInProgress,
                message_id: self.next_message_id(),
                timestamp: now_iso8601(),
            });
        }
        Ok(self.next_message_id())
    }

    fn release_computation(&self, status: ComputationStatus) {
        self.state().last_status = Some(status);
        self.is_computing.store(false, Ordering::Release);
    }

    /// Falls back to the default-idle context after a failed computation.
    /// Only takes effect if nobody else has written to the slot since
    /// `expected_generation` was captured — a newer command (another
    /// computation, or a `clear_active_rewards`/`clean_rewards`) already
    /// superseded this one, so this stale result is dropped instead.
    async fn fall_back_to_idle(&self, expected_generation: u64) {
        match self.engine.default_idle_context() {
            Ok((vector, _fingerprint)) => {
                if !self.slot.compare_and_set(expected_generation, vector) {
                    warn!("default-idle fallback superseded by a newer write, discarding");
                }
            }
            Err(err) => warn!(error = %err, "default-idle fallback itself failed"),
        }
    }

    /// Clears the active reward spec, pose reference, and active context
    /// slot (`clean_rewards`, and an empty-spec `request_reward`).
    fn clean_rewards(&self) -> serde_json::Value {
        let mut state = self.state();
        state.active_spec = None;
        state.pose_reference = None;
        drop(state);
        self.slot.clear();
        serde_json::to_value(Outbound::CleanRewards {}).unwrap_or_default()
    }

    /// Routes one inbound command, returning the immediate reply. Any
    /// background progress this command triggers is delivered separately
    /// to `originator` via the subscriber registry.
    #[instrument(skip(self, cmd))]
    pub async fn dispatch(self: &Arc<Self>, cmd: Command, originator: String) -> serde_json::Value {
        let type_name = cmd.type_name();
        match cmd {
            Command::RequestReward { spec } => {
                if spec.is_empty() {
                    self.clean_rewards()
                } else {
                    self.dispatch_reward_computation(spec, None, originator)
                }
            }
            Command::UpdateReward(payload) => {
                let updated = {
                    let state = self.state();
                    match &state.active_spec {
                        Some(spec) if payload.index < spec.rewards.len() => {
                            let mut spec = spec.clone();
                            spec.rewards[payload.index].params = payload.params;
                            Some(spec)
                        }
                        _ => None,
                    }
                };
                match updated {
                    Some(spec) => self.dispatch_reward_computation(spec, None, originator),
                    None => error_reply(type_name, "index out of range for the active reward specification"),
                }
            }
            Command::ClearActiveRewards { preserve_z } => {
                let mut state = self.state();
                state.active_spec = None;
                state.pose_reference = None;
                drop(state);
                if !preserve_z {
                    self.slot.clear();
                }
                serde_json::to_value(Outbound::RewardsCleared {}).unwrap_or_default()
            }
            Command::CleanRewards {} => self.clean_rewards(),
            Command::MixPoseReward(payload) => {
                let message_id = match self.try_claim_computation() {
                    Ok(id) => id,
                    Err(in_progress) => return serde_json::to_value(in_progress).unwrap_or_default(),
                };
                let ack = Outbound::Reward {
                    is_computing: true,
                    message_id: message_id.clone(),
                };

                let this = Arc::clone(self);
                let expected_generation = self.slot.generation();
                tokio::spawn(async move {
                    this.send(
                        &originator,
                        &Outbound::RewardComputationStatus {
                            status: ComputationStatus::Started,
                            message_id: message_id.clone(),
                            timestamp: now_iso8601(),
                        },
                    );

                    let observed = if payload.use_current_pose {
                        this.sim.snapshot().await
                    } else {
                        match payload.qpos.clone() {
                            Some(qpos) => this.sim.observe_at_qpos(qpos).await,
                            None => Err(anyhow::anyhow!("qpos is required when use_current_pose is false")),
                        }
                    };

                    let status = match observed {
                        Ok(observed) => {
                            let qpos = observed.qpos.clone();
                            let hold_spec = hold_pose_spec(&observed.body_positions);
                            let hold_fut = this
                                .engine
                                .compute_async_with_batch_size(hold_spec, motivo_context::DEFAULT_BATCH_SIZE);
                            let reward_fut = this.engine.compute_async(payload.reward.clone());
                            match tokio::try_join!(hold_fut, reward_fut) {
                                Ok(((pose_vector, _hold_fingerprint), (reward_vector, _fingerprint))) => {
                                    let mixed = match payload.mix_strategy {
                                        MixStrategy::Linear => {
                                            motivo_context::linear(&pose_vector, &reward_vector, payload.mix_weight)
                                        }
                                        MixStrategy::Normalized => {
                                            motivo_context::normalized(&pose_vector, &reward_vector, payload.mix_weight)
                                        }
                                        MixStrategy::Slerp => {
                                            motivo_context::slerp(&pose_vector, &reward_vector, payload.mix_weight)
                                        }
                                    };
                                    if this.slot.compare_and_set(expected_generation, mixed) {
                                        let mut state = this.state();
                                        state.active_spec = Some(payload.reward.clone());
                                        state.pose_reference = Some(qpos);
                                        drop(state);
                                        this.send(&originator, &Outbound::MixRewardOnlyUpdated {});
                                        ComputationStatus::Completed
                                    } else {
                                        warn!("mix_pose_reward computation superseded by a newer write, discarding");
                                        ComputationStatus::Completed
                                    }
                                }
                                Err(err) => {
                                    warn!(error = %err, "mix_pose_reward computation failed");
                                    this.fall_back_to_idle(expected_generation).await;
                                    ComputationStatus::Error
                                }
                            }
                        }
                        Err(err) => {
                            warn!(error = %err, "mix_pose_reward could not resolve a target pose");
                            this.fall_back_to_idle(expected_generation).await;
                            ComputationStatus::Error
                        }
                    };

                    this.release_computation(status);
                    this.send(
                        &originator,
                        &Outbound::RewardComputationStatus {
                            status,
                            message_id,
                            timestamp: now_iso8601(),
                        },
                    );
                });

                serde_json::to_value(ack).unwrap_or_default()
            }
            Command::LoadPose(payload) => {
                let qpos = payload.qpos;
                self.dispatch_pose_computation(qpos.clone(), payload.inference_kind, Some(qpos), originator)
            }
            Command::LoadPoseSmpl(payload) => {
                let qpos = motivo_pose::to_qpos(&payload.pose, payload.trans, &self.rig);
                self.dispatch_pose_computation(qpos.clone(), payload.inference_kind, Some(qpos), originator)
            }
            Command::LoadNpzContext { context } => {
                self.slot.set(ContextVector(context));
                serde_json::to_value(Outbound::PoseLoaded {}).unwrap_or_default()
            }
            Command::GetCurrentContext {} => {
                let state = self.state();
                let cache_file = state
                    .active_spec
                    .as_ref()
                    .map(|spec| self.cache.cache_file_path(&spec.fingerprint()).display().to_string());
                serde_json::to_value(Outbound::CurrentContext {
                    rewards: state.active_spec.clone(),
                    pose_reference: state.pose_reference.clone(),
                    is_computing: self.is_computing.load(Ordering::Acquire),
                    cache_file,
                })
                .unwrap_or_default()
            }
            Command::UpdateParameters { params } => {
                let map: serde_json::Map<String, serde_json::Value> = params.clone().into_iter().collect();
                match self.sim.update_parameters(map).await {
                    Ok(()) => serde_json::to_value(Outbound::ParametersUpdated { params }).unwrap_or_default(),
                    Err(err) => error_reply(type_name, err.to_string()),
                }
            }
            Command::UpdateRewardComputation { batch_size } => {
                let clamped = self.engine.set_batch_size(batch_size);
                serde_json::json!({
                    "type": "update_reward_computation_ack",
                    "batch_size": clamped,
                    "timestamp": now_iso8601(),
                })
            }
            Command::GetTargetPositions {} => match self.sim.snapshot().await {
                Ok(snapshot) => serde_json::to_value(Outbound::TargetPositions {
                    positions: snapshot.body_positions,
                })
                .unwrap_or_default(),
                Err(err) => error_reply(type_name, err.to_string()),
            },
            Command::CaptureFrame {} => self.capture_and_write(type_name, false).await,
            Command::MakeSnapshot {} => self.capture_and_write(type_name, true).await,
            Command::StartRecording {} => recording_reply(self.recorder.start_trajectory(), "started").value,
            Command::StopRecording {} => match self.recorder.stop_trajectory() {
                Ok(path) => recording_reply(Ok(()), "stopped").with_download(path),
                Err(err) => recording_error_reply(err),
            },
            Command::StartVideoRecording {} => video_reply(self.recorder.start_video(), "started").value,
            Command::StopVideoRecording {} => match self.recorder.stop_video() {
                Ok(path) => video_reply(Ok(()), "stopped").with_download(path),
                Err(err) => video_error_reply(err),
            },
            Command::DebugModelInfo {} => {
                let last = self.state().last_status.take();
                serde_json::to_value(Outbound::DebugModelInfo {
                    subscriber_count: self.registry.len(),
                    is_computing: self.is_computing.load(Ordering::Acquire),
                    last_computation_status: last,
                })
                .unwrap_or_default()
            }
        }
    }

    fn dispatch_reward_computation(
        self: &Arc<Self>,
        spec: RewardSpec,
        pose_reference: Option<Vec<f64>>,
        originator: String,
    ) -> serde_json::Value {
        let message_id = match self.try_claim_computation() {
            Ok(id) => id,
            Err(in_progress) => return serde_json::to_value(in_progress).unwrap_or_default(),
        };
        let ack = Outbound::Reward {
            is_computing: true,
            message_id: message_id.clone(),
        };

        let this = Arc::clone(self);
        let expected_generation = self.slot.generation();
        tokio::spawn(async move {
            this.send(
                &originator,
                &Outbound::RewardComputationStatus {
                    status: ComputationStatus::Started,
                    message_id: message_id.clone(),
                    timestamp: now_iso8601(),
                },
            );

            let status = match this.engine.compute_async(spec.clone()).await {
                Ok((vector, _fingerprint)) => {
                    if this.slot.compare_and_set(expected_generation, vector) {
                        let mut state = this.state();
                        state.active_spec = Some(spec);
                        state.pose_reference = pose_reference;
                        drop(state);
                        this.send(&originator, &Outbound::RewardUpdated {});
                        ComputationStatus::Completed
                    } else {
                        warn!("reward computation superseded by a newer write, discarding");
                        ComputationStatus::Completed
                    }
                }
                Err(err) => {
                    warn!(error = %err, "context computation failed, falling back to default-idle");
                    this.fall_back_to_idle(expected_generation).await;
                    ComputationStatus::Error
                }
            };

            this.release_computation(status);
            this.send(
                &originator,
                &Outbound::RewardComputationStatus {
                    status,
                    message_id,
                    timestamp: now_iso8601(),
                },
            );
        });

        serde_json::to_value(ack).unwrap_or_default()
    }

    fn dispatch_pose_computation(
        self: &Arc<Self>,
        qpos: Vec<f64>,
        kind: PoseInferenceKind,
        pose_reference: Option<Vec<f64>>,
        originator: String,
    ) -> serde_json::Value {
        let message_id = match self.try_claim_computation() {
            Ok(id) => id,
            Err(in_progress) => return serde_json::to_value(in_progress).unwrap_or_default(),
        };
        let ack = Outbound::Reward {
            is_computing: true,
            message_id: message_id.clone(),
        };

        let this = Arc::clone(self);
        let expected_generation = self.slot.generation();
        tokio::spawn(async move {
            this.send(
                &originator,
                &Outbound::RewardComputationStatus {
                    status: ComputationStatus::Started,
                    message_id: message_id.clone(),
                    timestamp: now_iso8601(),
                },
            );

            let observed = match this.sim.observe_at_qpos(qpos).await {
                Ok(observed) => Ok(observed.qpos),
                Err(err) => Err(err),
            };

            let status = match observed {
                Ok(settled_qpos) => match this.engine.pose_context(settled_qpos, kind).await {
                    Ok(vector) => {
                        if this.slot.compare_and_set(expected_generation, vector) {
                            let mut state = this.state();
                            state.active_spec = None;
                            state.pose_reference = pose_reference;
                            drop(state);
                            this.send(&originator, &Outbound::PoseLoaded {});
                            ComputationStatus::Completed
                        } else {
                            warn!("pose computation superseded by a newer write, discarding");
                            ComputationStatus::Completed
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, "pose inference failed, falling back to default-idle");
                        this.fall_back_to_idle(expected_generation).await;
                        ComputationStatus::Error
                    }
                },
                Err(err) => {
                    warn!(error = %err, "pose observation failed, falling back to default-idle");
                    this.fall_back_to_idle(expected_generation).await;
                    ComputationStatus::Error
                }
            };

            this.release_computation(status);
            this.send(
                &originator,
                &Outbound::RewardComputationStatus {
                    status,
                    message_id,
                    timestamp: now_iso8601(),
                },
            );
        });

        serde_json::to_value(ack).unwrap_or_default()
    }

    async fn capture_and_write(&self, type_name: &str, with_timestamp: bool) -> serde_json::Value {
        let frame = match self.sim.capture_frame().await {
            Ok(frame) => frame,
            Err(err) => return error_reply(type_name, err.to_string()),
        };

        let path = self.frames_dir.join("latest.jpg");
        if let Err(err) = write_jpeg(&frame, &path) {
            return error_reply(type_name, err.to_string());
        }

        if !with_timestamp {
            return serde_json::to_value(Outbound::FrameCaptured {
                path: path.display().to_string(),
            })
            .unwrap_or_default();
        }

        let stamped = self.frames_dir.join(format!("{}.jpg", now_iso8601().replace(':', "-")));
        if let Err(err) = write_jpeg(&frame, &stamped) {
            return error_reply(type_name, err.to_string());
        }
        serde_json::to_value(Outbound::SnapshotCaptured {
            path: path.display().to_string(),
            timestamped_path: stamped.display().to_string(),
        })
        .unwrap_or_default()
    }
}

fn write_jpeg(frame: &RawFrame, path: &std::path::Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let image: ImageBuffer<Rgb<u8>, _> =
        ImageBuffer::from_raw(frame.width, frame.height, frame.rgb.clone())
            .ok_or_else(|| anyhow::anyhow!("frame buffer size does not match its declared dimensions"))?;
    image.save(path)?;
    Ok(())
}

/// A reply value that can be enriched with a download reference once an
/// archive has actually been written to disk.
struct RecordingReply {
    value: serde_json::Value,
}

impl RecordingReply {
    fn with_download(mut self, path: PathBuf) -> serde_json::Value {
        if let Some(obj) = self.value.as_object_mut() {
            obj.insert("download_url".into(), serde_json::json!(path.display().to_string()));
        }
        self.value
    }
}

fn recording_reply(result: Result<(), motivo_record::RecordingError>, label: &str) -> RecordingReply {
    match result {
        Ok(()) => RecordingReply {
            value: serde_json::to_value(Outbound::RecordingStatus {
                status: label.to_string(),
                download_url: None,
                error: None,
            })
            .unwrap_or_default(),
        },
        Err(err) => RecordingReply {
            value: recording_error_reply(err),
        },
    }
}

fn recording_error_reply(err: motivo_record::RecordingError) -> serde_json::Value {
    serde_json::to_value(Outbound::RecordingStatus {
        status: "error".into(),
        download_url: None,
        error: Some(err.to_string()),
    })
    .unwrap_or_default()
}

fn video_reply(result: Result<(), motivo_record::RecordingError>, label: &str) -> RecordingReply {
    match result {
        Ok(()) => RecordingReply {
            value: serde_json::to_value(Outbound::VideoRecordingStatus {
                status: label.to_string(),
                download_url: None,
                error: None,
            })
            .unwrap_or_default(),
        },
        Err(err) => RecordingReply {
            value: video_error_reply(err),
        },
    }
}

fn video_error_reply(err: motivo_record::RecordingError) -> serde_json::Value {
    serde_json::to_value(Outbound::VideoRecordingStatus {
        status: "error".into(),
        download_url: None,
        error: Some(err.to_string()),
    })
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use motivo_pose::{JointKind, JointSpec};
    use motivo_rewards::{PhysicsSnapshot, RewardPrimitiveSpec, RewardSpec};
    use motivo_sim::SimRequest;
    use std::collections::BTreeMap;
    use std::sync::Mutex as StdMutex;

    struct StubBackend {
        calls: StdMutex<usize>,
    }

    impl ContextBackend for StubBackend {
        fn reward_weighted_inference(
            &self,
            _snapshots: &[PhysicsSnapshot],
            rewards: &[f64],
        ) -> anyhow::Result<ContextVector> {
            *self.calls.lock().unwrap() += 1;
            Ok(ContextVector(vec![rewards.iter().sum::<f64>() as f32]))
        }
        fn goal_inference(&self, _qpos: &[f64]) -> anyhow::Result<ContextVector> {
            Ok(ContextVector(vec![1.0]))
        }
        fn tracking_inference(&self, _qpos: &[f64]) -> anyhow::Result<ContextVector> {
            Ok(ContextVector(vec![2.0]))
        }
        fn embedding_inference(&self, _qpos: &[f64]) -> anyhow::Result<ContextVector> {
            Ok(ContextVector(vec![3.0]))
        }
    }

    struct StubBuffer {
        n: usize,
    }

    impl SnapshotSource for StubBuffer {
        fn snapshots(&self) -> Vec<PhysicsSnapshot> {
            (0..self.n)
                .map(|i| PhysicsSnapshot {
                    qpos: vec![0.0, 0.0, 1.0 + i as f64 * 0.01],
                    qvel: vec![0.0; 3],
                    body_positions: BTreeMap::new(),
                    pelvis_rotation: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
                    ctrl: vec![],
                })
                .collect()
        }
    }

    fn rig() -> RigDescriptor {
        RigDescriptor {
            root_translation: 0..3,
            joints: vec![JointSpec {
                name: "neck".into(),
                slice: 3..4,
                kind: JointKind::Hinge,
                hinge_axis: [0.0, 0.0, 1.0],
            }],
            position_names: vec!["pelvis".into()],
        }
    }

    fn spawn_fake_sim() -> SimHandle {
        let (handle, mut rx) = motivo_sim::channel();
        tokio::spawn(async move {
            while let Some(req) = rx.recv().await {
                match req {
                    SimRequest::SetQpos(_, reply) => {
                        let _ = reply.send(Ok(()));
                    }
                    SimRequest::UpdateParameters(_, reply) => {
                        let _ = reply.send(Ok(()));
                    }
                    SimRequest::Snapshot(reply) => {
                        let _ = reply.send(PhysicsSnapshot {
                            qpos: vec![0.0, 0.0, 1.0],
                            qvel: vec![0.0; 3],
                            body_positions: BTreeMap::new(),
                            pelvis_rotation: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
                            ctrl: vec![],
                        });
                    }
                    SimRequest::CaptureFrame(reply) => {
                        let _ = reply.send(RawFrame {
                            width: 2,
                            height: 2,
                            rgb: vec![0u8; 2 * 2 * 3],
                        });
                    }
                    SimRequest::ObserveAtQpos(qpos, reply) => {
                        let mut body_positions = BTreeMap::new();
                        body_positions.insert("pelvis".to_string(), [qpos[0], 0.0, 1.0]);
                        let _ = reply.send(Ok(PhysicsSnapshot {
                            qpos,
                            qvel: vec![0.0; 3],
                            body_positions,
                            pelvis_rotation: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
                            ctrl: vec![],
                        }));
                    }
                }
            }
        });
        handle
    }

    fn harness() -> Arc<Dispatcher<StubBackend, StubBuffer>> {
        let cache_dir = tempfile::tempdir().unwrap().into_path();
        let cache = Arc::new(ContextCache::open(cache_dir, 100).unwrap());
        let engine = Arc::new(ContextEngine::new(
            StubBackend { calls: StdMutex::new(0) },
            StubBuffer { n: 10 },
            Arc::clone(&cache),
        ));
        let slot = Arc::new(ActiveContextSlot::new());
        let registry = Arc::new(SubscriberRegistry::default());
        let recorder = Arc::new(Recorder::new(tempfile::tempdir().unwrap().into_path(), 7.5));
        let frames_dir = tempfile::tempdir().unwrap().into_path();
        Arc::new(Dispatcher::new(
            engine,
            cache,
            slot,
            registry,
            spawn_fake_sim(),
            recorder,
            rig(),
            frames_dir,
        ))
    }

    fn reward_spec() -> RewardSpec {
        RewardSpec {
            rewards: vec![RewardPrimitiveSpec {
                name: "move-ego".into(),
                id: None,
                params: serde_json::Map::new(),
            }],
            weights: vec![1.0],
            combinator: motivo_rewards::Combinator::Additive,
        }
    }

    #[tokio::test]
    async fn request_reward_acks_then_completes() {
        let dispatcher = harness();
        let queue = dispatcher.registry.add("peer-1");
        let ack = dispatcher
            .dispatch(Command::RequestReward { spec: reward_spec() }, "peer-1".into())
            .await;
        assert_eq!(ack["type"], "reward");
        assert_eq!(ack["is_computing"], true);

        let started: serde_json::Value = serde_json::from_slice(&queue.recv().await).unwrap();
        assert_eq!(started["status"], "started");
        let completed: serde_json::Value = serde_json::from_slice(&queue.recv().await).unwrap();
        assert_eq!(completed["status"], "completed");

        let current = dispatcher
            .dispatch(Command::GetCurrentContext {}, "peer-1".into())
            .await;
        assert_eq!(current["rewards"]["rewards"][0]["name"], "move-ego");
        assert_eq!(current["is_computing"], false);
    }

    #[tokio::test]
    async fn request_reward_with_an_empty_spec_is_treated_as_clean_rewards() {
        let dispatcher = harness();
        dispatcher.slot.set(ContextVector(vec![7.0]));
        {
            let mut state = dispatcher.state();
            state.active_spec = Some(reward_spec());
        }
        let empty_spec = RewardSpec {
            rewards: vec![],
            weights: vec![],
            combinator: motivo_rewards::Combinator::Additive,
        };
        let reply = dispatcher
            .dispatch(Command::RequestReward { spec: empty_spec }, "peer-1".into())
            .await;
        assert_eq!(reply["type"], "clean_rewards");
        assert!(dispatcher.slot.get().is_none());
        assert!(dispatcher.state().active_spec.is_none());
    }

    #[tokio::test]
    async fn a_second_request_while_computing_reports_in_progress() {
        let dispatcher = harness();
        dispatcher.registry.add("peer-1");
        dispatcher.is_computing.store(true, Ordering::Release);
        let reply = dispatcher
            .dispatch(Command::RequestReward { spec: reward_spec() }, "peer-1".into())
            .await;
        assert_eq!(reply["status"], "computing_in_progress");
    }

    #[tokio::test]
    async fn update_reward_out_of_range_index_is_an_error_reply() {
        let dispatcher = harness();
        {
            let mut state = dispatcher.state();
            state.active_spec = Some(reward_spec());
        }
        let cmd: Command = serde_json::from_value(serde_json::json!({
            "type": "update_reward",
            "index": 5,
            "params": {}
        }))
        .unwrap();
        let reply = dispatcher.dispatch(cmd, "peer-1".into()).await;
        assert_eq!(reply["type"], "update_reward_error");
    }

    #[tokio::test]
    async fn clear_active_rewards_preserves_slot_when_asked() {
        let dispatcher = harness();
        dispatcher.slot.set(ContextVector(vec![7.0]));
        {
            let mut state = dispatcher.state();
            state.active_spec = Some(reward_spec());
        }
        let reply = dispatcher
            .dispatch(Command::ClearActiveRewards { preserve_z: true }, "peer-1".into())
            .await;
        assert_eq!(reply["type"], "rewards_cleared");
        assert!(dispatcher.slot.get().is_some());
        assert!(dispatcher.state().active_spec.is_none());
    }

    #[tokio::test]
    async fn clear_active_rewards_drops_slot_by_default() {
        let dispatcher = harness();
        dispatcher.slot.set(ContextVector(vec![7.0]));
        let reply = dispatcher
            .dispatch(Command::ClearActiveRewards { preserve_z: false }, "peer-1".into())
            .await;
        assert_eq!(reply["type"], "rewards_cleared");
        assert!(dispatcher.slot.get().is_none());
    }

    #[tokio::test]
    async fn clean_rewards_always_drops_the_slot() {
        let dispatcher = harness();
        dispatcher.slot.set(ContextVector(vec![7.0]));
        let reply = dispatcher.dispatch(Command::CleanRewards {}, "peer-1".into()).await;
        assert_eq!(reply["type"], "clean_rewards");
        assert!(dispatcher.slot.get().is_none());
    }

    #[tokio::test]
    async fn debug_model_info_reports_subscriber_count_and_clears_last_status() {
        let dispatcher = harness();
        dispatcher.registry.add("a");
        dispatcher.registry.add("b");
        dispatcher.release_computation(ComputationStatus::Completed);
        let first = dispatcher.dispatch(Command::DebugModelInfo {}, "a".into()).await;
        assert_eq!(first["subscriber_count"], 2);
        assert_eq!(first["last_computation_status"], "completed");
        let second = dispatcher.dispatch(Command::DebugModelInfo {}, "a".into()).await;
        assert_eq!(second["last_computation_status"], serde_json::Value::Null);
    }

    #[tokio::test]
    async fn load_pose_sets_the_slot_from_goal_inference() {
        let dispatcher = harness();
        dispatcher.registry.add("peer-1");
        let cmd: Command = serde_json::from_value(serde_json::json!({
            "type": "load_pose",
            "qpos": [0.0, 0.0, 1.0, 0.2],
            "inference_kind": "goal"
        }))
        .unwrap();
        dispatcher.dispatch(cmd, "peer-1".into()).await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(dispatcher.slot.get().unwrap().0, vec![1.0]);
    }

    #[tokio::test]
    async fn get_target_positions_reads_through_the_sim_handle() {
        let dispatcher = harness();
        let reply = dispatcher.dispatch(Command::GetTargetPositions {}, "peer-1".into()).await;
        assert_eq!(reply["type"], "target_positions");
    }
}
