//! The fixed-rate simulation tick loop (§4.7 / C7).
//!
//! Each tick: read the active context, ask the policy for an action, step
//! the environment, convert the resulting pose, and broadcast it. A failure
//! at any policy/pose/broadcast stage degrades that stage only — the loop
//! itself never stops short of an explicit shutdown signal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use motivo_cache::ContextVector;
use motivo_net::SubscriberRegistry;
use motivo_pose::RigDescriptor;
use motivo_rewards::PhysicsSnapshot;
use motivo_proto::{now_iso8601, to_json, Outbound};
use tokio::sync::mpsc;
use tokio::time;
use tracing::{debug, instrument, warn};

use crate::collaborators::{Env, Policy};
use crate::handle::SimRequest;
use crate::slot::ActiveContextSlot;

/// Default simulation tick rate (30 Hz), matching the pose broadcast rate named in §4.7.
pub const DEFAULT_TICK_HZ: u32 = 30;

fn default_idle_context(dim: usize) -> ContextVector {
    ContextVector(vec![0.0; dim])
}

/// Drives the environment/policy pair at a fixed rate and broadcasts every
/// resulting pose to admitted subscribers.
pub struct SimLoop<E: Env, P: Policy> {
    env: E,
    policy: P,
    slot: Arc<ActiveContextSlot>,
    registry: Arc<SubscriberRegistry>,
    rig: RigDescriptor,
    shutdown: Arc<AtomicBool>,
    tick_interval: Duration,
    idle_context_dim: usize,
    tick_count: u64,
    requests: Option<mpsc::Receiver<SimRequest>>,
}

impl<E: Env, P: Policy> SimLoop<E, P> {
    /// Builds a loop over the given collaborators and shared state.
    pub fn new(
        env: E,
        policy: P,
        slot: Arc<ActiveContextSlot>,
        registry: Arc<SubscriberRegistry>,
        rig: RigDescriptor,
        idle_context_dim: usize,
    ) -> Self {
        Self {
            env,
            policy,
            slot,
            registry,
            rig,
            shutdown: Arc::new(AtomicBool::new(false)),
            tick_interval: Duration::from_secs_f64(1.0 / f64::from(DEFAULT_TICK_HZ)),
            idle_context_dim,
            tick_count: 0,
            requests: None,
        }
    }

    /// Overrides the fixed tick rate.
    pub fn with_tick_rate(mut self, hz: u32) -> Self {
        self.tick_interval = Duration::from_secs_f64(1.0 / f64::from(hz.max(1)));
        self
    }

    /// Attaches the receiving half of a [`crate::handle::channel`], so other
    /// components can reach the environment/policy handles this loop
    /// exclusively owns.
    pub fn with_requests(mut self, requests: mpsc::Receiver<SimRequest>) -> Self {
        self.requests = Some(requests);
        self
    }

    fn drain_requests(&mut self) {
        let Some(mut requests) = self.requests.take() else {
            return;
        };
        while let Ok(request) = requests.try_recv() {
            match request {
                SimRequest::SetQpos(qpos, reply) => {
                    let result = self.env.set_qpos(&qpos);
                    let _ = reply.send(result);
                }
                SimRequest::UpdateParameters(params, reply) => {
                    let result = self.env.update_parameters(&params);
                    let _ = reply.send(result);
                }
                SimRequest::Snapshot(reply) => {
                    let _ = reply.send(self.env.snapshot());
                }
                SimRequest::CaptureFrame(reply) => {
                    let _ = reply.send(self.env.render_frame());
                }
                SimRequest::ObserveAtQpos(qpos, reply) => {
                    let result = self.observe_at_qpos(&qpos);
                    let _ = reply.send(result);
                }
            }
        }
        self.requests = Some(requests);
    }

    fn observe_at_qpos(&mut self, qpos: &[f64]) -> anyhow::Result<PhysicsSnapshot> {
        let saved = self.env.snapshot().qpos;
        self.env.set_qpos(qpos)?;
        let observed = self.env.snapshot();
        if let Err(err) = self.env.set_qpos(&saved) {
            warn!(error = %err, "failed to restore the environment after an observation");
        }
        Ok(observed)
    }

    /// A clone-able handle callers can use to request a graceful stop.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Runs the loop until `shutdown_handle()` is set.
    #[instrument(skip(self))]
    pub async fn run(&mut self) {
        let mut interval = time::interval(self.tick_interval);
        loop {
            interval.tick().await;
            if self.shutdown.load(Ordering::Acquire) {
                debug!(ticks = self.tick_count, "simulation loop shutting down");
                return;
            }
            self.tick();
        }
    }

    /// Runs exactly one tick; exposed directly for deterministic tests.
    pub fn tick(&mut self) {
        self.tick_count += 1;
        self.drain_requests();

        let context = self
            .slot
            .get()
            .unwrap_or_else(|| default_idle_context(self.idle_context_dim));

        let snapshot = self.env.snapshot();

        let action = match self.policy.act(&snapshot, &context) {
            Ok(action) => action,
            Err(err) => {
                warn!(error = %err, "policy inference failed, substituting zero action");
                vec![0.0; self.env.action_dim()]
            }
        };

        if let Err(err) = self.env.step(&action) {
            warn!(error = %err, "environment step failed, skipping tick effects");
            return;
        }

        let snapshot = self.env.snapshot();
        let update = motivo_pose::convert(&snapshot.qpos, &self.rig, &snapshot.body_positions);

        let outbound = Outbound::SmplUpdate {
            pose: update.pose,
            trans: update.translation,
            positions: update.positions,
            qpos: update.qpos,
            position_names: update.position_names,
            cache_file: None,
            timestamp: now_iso8601(),
        };

        match to_json(&outbound) {
            Ok(payload) => {
                self.registry.broadcast(None, payload.as_bytes());
            }
            Err(err) => warn!(error = %err, "failed to serialize pose broadcast"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::fakes::{FakeEnv, FakePolicy};
    use motivo_pose::{JointKind, JointSpec};

    fn rig() -> RigDescriptor {
        RigDescriptor {
            root_translation: 0..3,
            joints: vec![JointSpec {
                name: "neck".into(),
                slice: 3..4,
                kind: JointKind::Hinge,
                hinge_axis: [0.0, 0.0, 1.0],
            }],
            position_names: vec!["head".into()],
        }
    }

    #[test]
    fn tick_advances_env_and_broadcasts_pose() {
        let env = FakeEnv::new(4);
        let policy = FakePolicy { fail_next_act: false };
        let slot = Arc::new(ActiveContextSlot::new());
        slot.set(ContextVector(vec![0.0; 8]));
        let registry = Arc::new(SubscriberRegistry::default());
        registry.add("peer");

        let mut sim = SimLoop::new(env, policy, slot, Arc::clone(&registry), rig(), 8);
        sim.tick();
        assert_eq!(sim.tick_count, 1);
    }

    #[test]
    fn policy_failure_substitutes_zero_action_and_continues() {
        let env = FakeEnv::new(4);
        let policy = FakePolicy { fail_next_act: true };
        let slot = Arc::new(ActiveContextSlot::new());
        let registry = Arc::new(SubscriberRegistry::default());

        let mut sim = SimLoop::new(env, policy, slot, registry, rig(), 8);
        sim.tick();
        assert_eq!(sim.env.qpos, vec![0.0; 4]);
    }

    #[test]
    fn env_step_failure_skips_broadcast_but_loop_continues() {
        let mut env = FakeEnv::new(4);
        env.fail_next_step = true;
        let policy = FakePolicy { fail_next_act: false };
        let slot = Arc::new(ActiveContextSlot::new());
        let registry = Arc::new(SubscriberRegistry::default());

        let mut sim = SimLoop::new(env, policy, slot, registry, rig(), 8);
        sim.tick();
        sim.tick();
        assert_eq!(sim.tick_count, 2);
    }

    #[tokio::test]
    async fn set_qpos_request_is_applied_on_next_tick() {
        let env = FakeEnv::new(3);
        let policy = FakePolicy { fail_next_act: false };
        let slot = Arc::new(ActiveContextSlot::new());
        let registry = Arc::new(SubscriberRegistry::default());
        let (handle, requests) = crate::handle::channel();

        let mut sim = SimLoop::new(env, policy, slot, registry, rig(), 8).with_requests(requests);
        let send = tokio::spawn(async move { handle.set_qpos(vec![1.0, 2.0, 3.0]).await });
        tokio::task::yield_now().await;
        sim.tick();
        send.await.unwrap().unwrap();
        assert_eq!(sim.env.qpos, vec![1.0, 2.0, 3.0]);
    }

    #[tokio::test]
    async fn shutdown_flag_stops_the_loop() {
        let env = FakeEnv::new(4);
        let policy = FakePolicy { fail_next_act: false };
        let slot = Arc::new(ActiveContextSlot::new());
        let registry = Arc::new(SubscriberRegistry::default());

        let mut sim = SimLoop::new(env, policy, slot, registry, rig(), 8).with_tick_rate(1000);
        let handle = sim.shutdown_handle();
        handle.store(true, Ordering::Release);
        time::timeout(Duration::from_millis(200), sim.run())
            .await
            .expect("loop exits promptly after shutdown is requested");
    }
}
