//! A channel into the simulation loop's single-writer environment/policy
//! handles (§5 Concurrency & Resource Model). The loop is the only task that
//! ever touches `Env`/`Policy` directly; every other component (the
//! dispatcher, media session manager) reaches them by sending a
//! [`SimRequest`] and awaiting the reply, processed between ticks.

use motivo_net::RawFrame;
use motivo_rewards::PhysicsSnapshot;
use tokio::sync::{mpsc, oneshot};

/// A request for the simulation loop to perform on its next tick boundary.
pub enum SimRequest {
    /// Forcibly sets the environment's generalized positions.
    SetQpos(Vec<f64>, oneshot::Sender<anyhow::Result<()>>),
    /// Forwards parameter updates to the environment.
    UpdateParameters(
        serde_json::Map<String, serde_json::Value>,
        oneshot::Sender<anyhow::Result<()>>,
    ),
    /// Reads the current physics snapshot.
    Snapshot(oneshot::Sender<PhysicsSnapshot>),
    /// Renders the current frame.
    CaptureFrame(oneshot::Sender<RawFrame>),
    /// Saves the current generalized positions, sets them to `qpos`, reads
    /// back the resulting snapshot, then restores the saved positions — all
    /// within one tick's exclusive ownership of the environment (`load_pose`,
    /// the hold-pose half of `mix_pose_reward`).
    ObserveAtQpos(Vec<f64>, oneshot::Sender<anyhow::Result<PhysicsSnapshot>>),
}

/// Default depth of the request channel.
pub const REQUEST_CHANNEL_DEPTH: usize = 32;

/// A cloneable handle for sending requests into the simulation loop.
#[derive(Clone)]
pub struct SimHandle {
    tx: mpsc::Sender<SimRequest>,
}

impl SimHandle {
    pub(crate) fn new(tx: mpsc::Sender<SimRequest>) -> Self {
        Self { tx }
    }

    /// Sets the environment's generalized positions and awaits confirmation.
    pub async fn set_qpos(&self, qpos: Vec<f64>) -> anyhow::Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(SimRequest::SetQpos(qpos, reply_tx))
            .await
            .map_err(|_| anyhow::anyhow!("simulation loop is no longer running"))?;
        reply_rx.await.map_err(|_| anyhow::anyhow!("simulation loop dropped the reply"))?
    }

    /// Forwards parameter updates to the environment and awaits confirmation.
    pub async fn update_parameters(
        &self,
        params: serde_json::Map<String, serde_json::Value>,
    ) -> anyhow::Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(SimRequest::UpdateParameters(params, reply_tx))
            .await
            .map_err(|_| anyhow::anyhow!("simulation loop is no longer running"))?;
        reply_rx.await.map_err(|_| anyhow::anyhow!("simulation loop dropped the reply"))?
    }

    /// Reads the current physics snapshot.
    pub async fn snapshot(&self) -> anyhow::Result<PhysicsSnapshot> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(SimRequest::Snapshot(reply_tx))
            .await
            .map_err(|_| anyhow::anyhow!("simulation loop is no longer running"))?;
        reply_rx.await.map_err(|e| anyhow::anyhow!(e))
    }

    /// Captures the current frame.
    pub async fn capture_frame(&self) -> anyhow::Result<RawFrame> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(SimRequest::CaptureFrame(reply_tx))
            .await
            .map_err(|_| anyhow::anyhow!("simulation loop is no longer running"))?;
        reply_rx.await.map_err(|e| anyhow::anyhow!(e))
    }

    /// Observes the environment at `qpos` without leaving it there: the
    /// simulation loop saves its current positions, sets `qpos`, reads the
    /// resulting snapshot, then restores what it saved.
    pub async fn observe_at_qpos(&self, qpos: Vec<f64>) -> anyhow::Result<PhysicsSnapshot> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(SimRequest::ObserveAtQpos(qpos, reply_tx))
            .await
            .map_err(|_| anyhow::anyhow!("simulation loop is no longer running"))?;
        reply_rx.await.map_err(|_| anyhow::anyhow!("simulation loop dropped the reply"))?
    }
}

/// Builds a connected `(SimHandle, Receiver)` pair; the receiver half is
/// handed to [`crate::SimLoop::with_requests`].
pub fn channel() -> (SimHandle, mpsc::Receiver<SimRequest>) {
    let (tx, rx) = mpsc::channel(REQUEST_CHANNEL_DEPTH);
    (SimHandle::new(tx), rx)
}
