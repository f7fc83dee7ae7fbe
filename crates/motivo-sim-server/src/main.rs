//! Host process for the session hub: wires the context engine, simulation
//! loop, dispatcher, and the two WebSocket surfaces (command channel and
//! media signaling) together and drives them to completion.

mod frame;
mod gateway;
mod media;
mod reference;

use std::sync::Arc;

use motivo_cache::ContextCache;
use motivo_config::Config;
use motivo_context::ContextEngine;
use motivo_dispatch::Dispatcher;
use motivo_net::{MediaSessionManager, SubscriberRegistry, DEDUP_WINDOW};
use motivo_proto::Outbound;
use motivo_record::{Recorder, TrajectorySample};
use motivo_sim::{ActiveContextSlot, SimLoop};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::reference::{
    load_context_dim, reference_rig, ReferenceContextBackend, ReferenceEnv, ReferencePolicy,
    ReferenceSnapshotBuffer,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let config = Config::load();

    let buffer = match &config.reward_buffer_path {
        Some(path) => ReferenceSnapshotBuffer::load(path)?,
        None => ReferenceSnapshotBuffer::synthesize(config.reward_buffer_size),
    };

    let context_dim = load_context_dim(config.policy_config_path.as_deref(), config.context_dim)?;
    let backend = ReferenceContextBackend::new(context_dim);

    let cache = Arc::new(ContextCache::open(&config.cache_dir, config.cache_capacity)?);
    let engine = Arc::new(ContextEngine::new(backend, buffer, Arc::clone(&cache)));
    engine.set_batch_size(config.batch_size);

    // Cold start (§8): compute and persist the default idle-stand context
    // before serving any connections, so the simulation loop always has
    // something to broadcast and a later run with the same buffer hits cache.
    let (idle_context, idle_fingerprint) = engine.default_idle_context()?;
    info!(fingerprint = %idle_fingerprint, "default idle context ready");
    let slot = Arc::new(ActiveContextSlot::new());
    slot.set(idle_context);

    let registry = Arc::new(SubscriberRegistry::new(config.queue_depth, DEDUP_WINDOW));
    let video_fps = f64::from(config.tick_hz) / 4.0;
    let recorder = Arc::new(Recorder::new(&config.downloads_dir, video_fps));
    let rig = reference_rig();

    let (sim_handle, sim_requests) = motivo_sim::channel();
    let mut sim_loop = SimLoop::new(
        ReferenceEnv::new(),
        ReferencePolicy::new(),
        Arc::clone(&slot),
        Arc::clone(&registry),
        rig.clone(),
        context_dim,
    )
    .with_tick_rate(config.tick_hz)
    .with_requests(sim_requests);
    tokio::spawn(async move { sim_loop.run().await });

    tokio::spawn(recording_sampler(
        Arc::clone(&recorder),
        sim_handle.clone(),
        Arc::clone(&registry),
        config.tick_hz,
    ));

    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&engine),
        Arc::clone(&cache),
        Arc::clone(&slot),
        Arc::clone(&registry),
        sim_handle.clone(),
        Arc::clone(&recorder),
        rig,
        config.shared_frames_dir.clone(),
    ));

    let gateway_state = Arc::new(gateway::GatewayState {
        dispatcher,
        registry,
    });
    let media_state = Arc::new(media::MediaState {
        sessions: Mutex::new(MediaSessionManager::new()),
        sim: sim_handle,
    });

    let command_app = gateway::router(gateway_state).into_make_service_with_connect_info::<std::net::SocketAddr>();
    let media_app = media::router(media_state).into_make_service_with_connect_info::<std::net::SocketAddr>();

    let command_listener = TcpListener::bind(config.listen).await?;
    let media_listener = TcpListener::bind(config.media_listen_or_default()).await?;
    info!(command = %config.listen, media = %config.media_listen_or_default(), "session hub listening");

    let command_server = axum::serve(command_listener, command_app).with_graceful_shutdown(shutdown_signal());
    let media_server = axum::serve(media_listener, media_app).with_graceful_shutdown(shutdown_signal());

    tokio::try_join!(
        async { command_server.await.map_err(anyhow::Error::from) },
        async { media_server.await.map_err(anyhow::Error::from) },
    )?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to install ctrl-c handler");
    }
    info!("shutdown signal received");
}

/// Video frame capture cadence relative to the tick rate: one frame every
/// `VIDEO_FRAME_STRIDE` ticks, matching the recorder's `video_fps` of
/// `tick_hz / VIDEO_FRAME_STRIDE`.
const VIDEO_FRAME_STRIDE: u64 = 4;

/// Mirrors every tick's physics state into the recorder, and — only while a
/// video recording is active — captures and encodes a frame every
/// [`VIDEO_FRAME_STRIDE`] ticks, so idle ticks and the trajectory-only path
/// cost nothing beyond the snapshot already taken for recording.
async fn recording_sampler(
    recorder: Arc<Recorder>,
    sim: motivo_sim::SimHandle,
    registry: Arc<SubscriberRegistry>,
    tick_hz: u32,
) {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs_f64(1.0 / f64::from(tick_hz.max(1))));
    let mut tick: u64 = 0;
    loop {
        interval.tick().await;
        tick = tick.wrapping_add(1);

        let snapshot = match sim.snapshot().await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(error = %err, "recording sampler could not read a snapshot");
                continue;
            }
        };
        recorder.push_sample(TrajectorySample {
            qpos: snapshot.qpos.clone(),
            timestamp: motivo_proto::now_iso8601(),
        });

        if recorder.is_video_active() && tick % VIDEO_FRAME_STRIDE == 0 {
            match sim.capture_frame().await {
                Ok(raw) => match frame::encode_jpeg(&raw) {
                    Ok(jpeg) => recorder.push_frame(jpeg),
                    Err(err) => warn!(error = %err, "failed to encode a recording frame"),
                },
                Err(err) => warn!(error = %err, "recording sampler could not capture a frame"),
            }
        }

        if recorder.auto_stop_due() {
            let outbound = match recorder.stop_video() {
                Ok(path) => Outbound::VideoRecordingStatus {
                    status: "stopped".into(),
                    download_url: Some(path.display().to_string()),
                    error: None,
                },
                Err(err) => {
                    error!(error = %err, "auto-stop could not finalize the video recording");
                    Outbound::VideoRecordingStatus {
                        status: "error".into(),
                        download_url: None,
                        error: Some(err.to_string()),
                    }
                }
            };
            if let Ok(payload) = serde_json::to_vec(&outbound) {
                registry.broadcast(None, &payload);
            }
        }
    }
}
