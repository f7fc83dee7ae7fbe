//! Runtime configuration (§6): every setting is overridable by environment
//! variable, with CLI flags taking precedence, mirroring how the gateway
//! binaries in the corpus expose their knobs.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

/// Session hub runtime configuration.
#[derive(Debug, Clone, Parser)]
#[command(name = "motivo-sim-server", about = "Realtime humanoid-control session hub")]
pub struct Config {
    /// Address the command/broadcast WebSocket endpoint binds to.
    #[arg(long, env = "MOTIVO_LISTEN", default_value = "0.0.0.0:8765")]
    pub listen: SocketAddr,

    /// Address the media (offer/answer/ICE) signaling endpoint binds to.
    /// Defaults to the same host as `listen`, one port up, when unset.
    #[arg(long, env = "MOTIVO_MEDIA_LISTEN")]
    pub media_listen: Option<SocketAddr>,

    /// Directory frame captures (`capture_frame`, `make_snapshot`) are written to.
    #[arg(long, env = "MOTIVO_FRAMES_DIR", default_value = "./frames")]
    pub shared_frames_dir: PathBuf,

    /// Directory recording archives are written to and served from.
    #[arg(long, env = "MOTIVO_DOWNLOADS_DIR", default_value = "./downloads")]
    pub downloads_dir: PathBuf,

    /// Directory the on-disk context cache tier is rooted at.
    #[arg(long, env = "MOTIVO_CACHE_DIR", default_value = "./cache")]
    pub cache_dir: PathBuf,

    /// In-memory context cache capacity (entries), minimum 100 (§3).
    #[arg(long, env = "MOTIVO_CACHE_CAPACITY", default_value_t = 512)]
    pub cache_capacity: usize,

    /// Simulation tick rate in Hz.
    #[arg(long, env = "MOTIVO_TICK_HZ", default_value_t = 30)]
    pub tick_hz: u32,

    /// Default reward-buffer batch size for context computation.
    #[arg(long, env = "MOTIVO_BATCH_SIZE", default_value_t = 750)]
    pub batch_size: usize,

    /// Per-peer outbound queue depth before the oldest pending message is dropped.
    #[arg(long, env = "MOTIVO_QUEUE_DEPTH", default_value_t = 16)]
    pub queue_depth: usize,

    /// Optional path to a JSON file of precomputed reward-buffer snapshots
    /// (a `qpos` array per line). When unset, a synthetic buffer is
    /// generated at startup. When set, a missing or malformed file is a
    /// fatal startup error (§6 "buffer-load failure").
    #[arg(long, env = "MOTIVO_REWARD_BUFFER_PATH")]
    pub reward_buffer_path: Option<PathBuf>,

    /// Size of the synthetic reward buffer generated when `reward_buffer_path` is unset.
    #[arg(long, env = "MOTIVO_REWARD_BUFFER_SIZE", default_value_t = 2000)]
    pub reward_buffer_size: usize,

    /// Optional path to a policy configuration file (e.g. inference output
    /// dimensionality). When unset, `context_dim` below is used directly. A
    /// set-but-unreadable path is a fatal startup error (§6 "policy-load failure").
    #[arg(long, env = "MOTIVO_POLICY_CONFIG_PATH")]
    pub policy_config_path: Option<PathBuf>,

    /// Context vector dimensionality the policy backend's inference calls produce.
    #[arg(long, env = "MOTIVO_CONTEXT_DIM", default_value_t = 32)]
    pub context_dim: usize,
}

impl Config {
    /// Parses configuration from CLI args and environment variables.
    pub fn load() -> Self {
        Self::parse()
    }

    /// The media signaling bind address, defaulting to `listen`'s port + 1.
    pub fn media_listen_or_default(&self) -> SocketAddr {
        self.media_listen.unwrap_or_else(|| {
            let mut addr = self.listen;
            addr.set_port(addr.port().saturating_add(1));
            addr
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse_from_empty_args() {
        let cfg = Config::parse_from(["motivo-sim-server"]);
        assert_eq!(cfg.listen.port(), 8765);
        assert_eq!(cfg.cache_capacity, 512);
        assert_eq!(cfg.tick_hz, 30);
    }

    #[test]
    fn media_listen_defaults_to_listen_port_plus_one() {
        let cfg = Config::parse_from(["motivo-sim-server", "--listen", "127.0.0.1:9000"]);
        assert_eq!(cfg.media_listen_or_default().port(), 9001);
    }

    #[test]
    fn explicit_media_listen_overrides_default() {
        let cfg = Config::parse_from([
            "motivo-sim-server",
            "--listen",
            "127.0.0.1:9000",
            "--media-listen",
            "127.0.0.1:7000",
        ]);
        assert_eq!(cfg.media_listen_or_default().port(), 7000);
    }

    #[test]
    fn reward_buffer_defaults_to_synthetic_generation() {
        let cfg = Config::parse_from(["motivo-sim-server"]);
        assert!(cfg.reward_buffer_path.is_none());
        assert_eq!(cfg.reward_buffer_size, 2000);
        assert_eq!(cfg.context_dim, 32);
    }
}
