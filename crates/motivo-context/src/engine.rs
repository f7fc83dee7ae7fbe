//! Context engine (§4.3 / C3): compiles a reward specification into a
//! context vector by sampling a buffer of physics snapshots, scoring them
//! against the compiled reward, and handing the (snapshot, reward) batch to
//! a pretrained policy's reward-weighted-inference entry point.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use motivo_cache::{ContextCache, ContextVector};
use motivo_proto::PoseInferenceKind;
use motivo_rewards::{CompiledReward, PhysicsSnapshot, RewardError, RewardSpec};
use rand::seq::SliceRandom;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{info, instrument, warn};

/// Default reward-buffer batch size (§9).
pub const DEFAULT_BATCH_SIZE: usize = 750;
/// Minimum accepted batch size (`update_reward_computation`, §4.9).
pub const MIN_BATCH_SIZE: usize = 10;
/// Maximum accepted batch size (`update_reward_computation`, §4.9).
pub const MAX_BATCH_SIZE: usize = 5000;

/// Upper bound on concurrent blocking inference calls, mirroring the
/// original `ThreadPoolExecutor(max_workers=min(os.cpu_count(), 8))`.
fn worker_cap() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
        .min(8)
}

/// Errors raised while compiling or computing a context.
#[derive(Debug, Error)]
pub enum ContextError {
    /// The reward specification failed to compile.
    #[error(transparent)]
    Reward(#[from] RewardError),
    /// The policy collaborator's inference call failed.
    #[error("inference failed: {0}")]
    Backend(#[source] anyhow::Error),
    /// The snapshot buffer had nothing to sample from.
    #[error("snapshot buffer is empty")]
    EmptyBuffer,
    /// Persisting the result to the cache failed.
    #[error(transparent)]
    Cache(#[from] motivo_cache::CacheError),
}

/// A pretrained control policy's context-producing entry points (§6). An
/// external collaborator: this crate only ever calls through the trait.
/// Implementations are expected to be blocking (model inference), and are
/// always invoked from inside [`ContextEngine`]'s `spawn_blocking` pool.
pub trait ContextBackend: Send + Sync {
    /// Reward-weighted regression inference over a scored batch of snapshots.
    fn reward_weighted_inference(
        &self,
        snapshots: &[PhysicsSnapshot],
        rewards: &[f64],
    ) -> anyhow::Result<ContextVector>;

    /// Goal-conditioned inference from a target `qpos`.
    fn goal_inference(&self, qpos: &[f64]) -> anyhow::Result<ContextVector>;

    /// Tracking inference from a target `qpos`.
    fn tracking_inference(&self, qpos: &[f64]) -> anyhow::Result<ContextVector>;

    /// Embedding inference from a target `qpos`.
    fn embedding_inference(&self, qpos: &[f64]) -> anyhow::Result<ContextVector>;
}

/// A source of recent physics snapshots to score against a candidate reward
/// (the environment's replay/rollout buffer). An external collaborator.
pub trait SnapshotSource: Send + Sync {
    /// All snapshots currently available for sampling.
    fn snapshots(&self) -> Vec<PhysicsSnapshot>;
}

/// Compiles reward specifications into context vectors, with a two-tier
/// cache in front of the (expensive) policy inference call.
pub struct ContextEngine<B: ContextBackend, S: SnapshotSource> {
    backend: Arc<B>,
    buffer: Arc<S>,
    cache: Arc<ContextCache>,
    batch_size: AtomicUsize,
    is_busy: AtomicBool,
    limiter: Arc<Semaphore>,
}

impl<B: ContextBackend + 'static, S: SnapshotSource + 'static> ContextEngine<B, S> {
    /// Builds an engine over the given policy backend, snapshot source, and cache.
    pub fn new(backend: B, buffer: S, cache: Arc<ContextCache>) -> Self {
        Self {
            backend: Arc::new(backend),
            buffer: Arc::new(buffer),
            cache,
            batch_size: AtomicUsize::new(DEFAULT_BATCH_SIZE),
            is_busy: AtomicBool::new(false),
            limiter: Arc::new(Semaphore::new(worker_cap())),
        }
    }

    /// Current reward-buffer batch size.
    pub fn batch_size(&self) -> usize {
        self.batch_size.load(Ordering::Acquire)
    }

    /// Sets the batch size, clamped to `[MIN_BATCH_SIZE, MAX_BATCH_SIZE]`
    /// (`update_reward_computation`, §4.9).
    pub fn set_batch_size(&self, requested: usize) -> usize {
        let clamped = requested.clamp(MIN_BATCH_SIZE, MAX_BATCH_SIZE);
        self.batch_size.store(clamped, Ordering::Release);
        clamped
    }

    /// `true` while a computation is in flight.
    pub fn is_busy(&self) -> bool {
        self.is_busy.load(Ordering::Acquire)
    }

    /// Computes (or retrieves from cache) the context vector for `spec`,
    /// running the blocking inference call on the shared worker pool.
    #[instrument(skip(self, spec))]
    pub async fn compute_async(&self, spec: RewardSpec) -> Result<(ContextVector, String), ContextError>
    where
        B: 'static,
        S: 'static,
    {
        self.compute_async_with_batch_size(spec, self.batch_size()).await
    }

    /// Like [`Self::compute_async`], but against an explicit batch size
    /// rather than the engine's shared, globally-configured one (the
    /// hold-pose half of `mix_pose_reward`, which always forces
    /// [`DEFAULT_BATCH_SIZE`] regardless of what `update_reward_computation`
    /// has configured).
    #[instrument(skip(self, spec))]
    pub async fn compute_async_with_batch_size(
        &self,
        spec: RewardSpec,
        batch_size: usize,
    ) -> Result<(ContextVector, String), ContextError>
    where
        B: 'static,
        S: 'static,
    {
        let fingerprint = spec.fingerprint();
        if let Some(cached) = self.cache.get(&fingerprint)? {
            return Ok((cached, fingerprint));
        }

        let _permit = self
            .limiter
            .acquire()
            .await
            .map_err(|e| ContextError::Backend(anyhow::anyhow!(e)))?;

        self.is_busy.store(true, Ordering::Release);
        let backend = Arc::clone(&self.backend);
        let buffer = Arc::clone(&self.buffer);

        let result = tokio::task::spawn_blocking(move || {
            compute_blocking(backend.as_ref(), buffer.as_ref(), &spec, batch_size)
        })
        .await
        .map_err(|e| ContextError::Backend(anyhow::anyhow!(e)))?;

        self.is_busy.store(false, Ordering::Release);

        let vector = result?;
        self.cache.put(&fingerprint, vector.clone())?;
        info!(fingerprint = %fingerprint, "context computed");
        Ok((vector, fingerprint))
    }

    /// Synchronous variant of [`Self::compute_async`], for call sites already
    /// running on a blocking thread.
    pub fn compute_sync(&self, spec: &RewardSpec) -> Result<(ContextVector, String), ContextError> {
        let fingerprint = spec.fingerprint();
        if let Some(cached) = self.cache.get(&fingerprint)? {
            return Ok((cached, fingerprint));
        }
        let batch_size = self.batch_size();
        let vector = compute_blocking(self.backend.as_ref(), self.buffer.as_ref(), spec, batch_size)?;
        self.cache.put(&fingerprint, vector.clone())?;
        Ok((vector, fingerprint))
    }

    /// The fixed default-idle context, computed once and reusable as a
    /// fallback whenever a computation fails (§4.3, §7).
    pub fn default_idle_context(&self) -> Result<(ContextVector, String), ContextError> {
        self.compute_sync(&RewardSpec::idle_stand())
    }

    /// Direct pose-conditioned inference (`load_pose`, `load_pose_smpl`,
    /// and the hold-pose half of `mix_pose_reward`), bypassing the reward
    /// buffer entirely and calling straight through to the policy backend.
    pub async fn pose_context(
        &self,
        qpos: Vec<f64>,
        kind: PoseInferenceKind,
    ) -> Result<ContextVector, ContextError> {
        let _permit = self
            .limiter
            .acquire()
            .await
            .map_err(|e| ContextError::Backend(anyhow::anyhow!(e)))?;
        let backend = Arc::clone(&self.backend);
        tokio::task::spawn_blocking(move || {
            let result = match kind {
                PoseInferenceKind::Goal => backend.goal_inference(&qpos),
                PoseInferenceKind::Tracking => backend.tracking_inference(&qpos),
                PoseInferenceKind::Embedding => backend.embedding_inference(&qpos),
            };
            result.map_err(ContextError::Backend)
        })
        .await
        .map_err(|e| ContextError::Backend(anyhow::anyhow!(e)))?
    }
}

fn compute_blocking<B: ContextBackend, S: SnapshotSource>(
    backend: &B,
    buffer: &S,
    spec: &RewardSpec,
    batch_size: usize,
) -> Result<ContextVector, ContextError> {
    let compiled = CompiledReward::compile(spec)?;
    let all_snapshots = buffer.snapshots();
    if all_snapshots.is_empty() {
        return Err(ContextError::EmptyBuffer);
    }

    let mut rng = rand::thread_rng();
    let sample: Vec<&PhysicsSnapshot> = if all_snapshots.len() <= batch_size {
        all_snapshots.iter().collect()
    } else {
        all_snapshots
            .choose_multiple(&mut rng, batch_size)
            .collect()
    };

    let rewards: Vec<f64> = sample.iter().map(|s| compiled.evaluate(s)).collect();
    let snapshots: Vec<PhysicsSnapshot> = sample.into_iter().cloned().collect();

    backend
        .reward_weighted_inference(&snapshots, &rewards)
        .map_err(|e| {
            warn!(error = %e, "reward-weighted inference failed");
            ContextError::Backend(e)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use motivo_cache::ContextCache;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    struct StubBackend {
        calls: Mutex<usize>,
    }

    impl ContextBackend for StubBackend {
        fn reward_weighted_inference(
            &self,
            snapshots: &[PhysicsSnapshot],
            rewards: &[f64],
        ) -> anyhow::Result<ContextVector> {
            *self.calls.lock().unwrap() += 1;
            Ok(ContextVector(vec![rewards.iter().sum::<f64>() as f32, snapshots.len() as f32]))
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

    fn cache() -> Arc<ContextCache> {
        let dir = tempfile::tempdir().unwrap().into_path();
        Arc::new(ContextCache::open(dir, 100).unwrap())
    }

    #[tokio::test]
    async fn compute_async_caches_result() {
        let engine = ContextEngine::new(StubBackend { calls: Mutex::new(0) }, StubBuffer { n: 20 }, cache());
        let spec = RewardSpec::idle_stand();
        let (first, fp1) = engine.compute_async(spec.clone()).await.unwrap();
        let (second, fp2) = engine.compute_async(spec).await.unwrap();
        assert_eq!(fp1, fp2);
        assert_eq!(first.0, second.0);
        assert_eq!(*engine.backend.calls.lock().unwrap(), 1);
    }

    #[test]
    fn set_batch_size_clamps_to_bounds() {
        let engine = ContextEngine::new(StubBackend { calls: Mutex::new(0) }, StubBuffer { n: 5 }, cache());
        assert_eq!(engine.set_batch_size(1), MIN_BATCH_SIZE);
        assert_eq!(engine.set_batch_size(999_999), MAX_BATCH_SIZE);
        assert_eq!(engine.set_batch_size(100), 100);
    }

    #[tokio::test]
    async fn pose_context_dispatches_to_the_requested_inference_kind() {
        let engine = ContextEngine::new(StubBackend { calls: Mutex::new(0) }, StubBuffer { n: 1 }, cache());
        let goal = engine.pose_context(vec![0.0], motivo_proto::PoseInferenceKind::Goal).await.unwrap();
        let tracking = engine
            .pose_context(vec![0.0], motivo_proto::PoseInferenceKind::Tracking)
            .await
            .unwrap();
        assert_eq!(goal.0, vec![1.0]);
        assert_eq!(tracking.0, vec![2.0]);
    }

    #[test]
    fn empty_buffer_is_reported_as_an_error() {
        let engine = ContextEngine::new(StubBackend { calls: Mutex::new(0) }, StubBuffer { n: 0 }, cache());
        let err = engine.compute_sync(&RewardSpec::idle_stand()).unwrap_err();
        assert!(matches!(err, ContextError::EmptyBuffer));
    }
}
