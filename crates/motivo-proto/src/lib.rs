//! Wire schema for the Motivo session hub (§6): a JSON message on a duplex
//! channel, tagged by a `type` field. Every inbound command has a specific
//! reply type; an unknown `type` produces a `{type}_error` reply.

mod command;
mod media;
mod outbound;

pub use command::{Command, MixStrategy, PoseInferenceKind};
pub use media::{IceCandidate, MediaSignal, QualityPreset};
pub use motivo_rewards::RewardSpec;
pub use outbound::{ComputationStatus, Outbound};

use serde::Serialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Formats the current instant as an ISO-8601 / RFC-3339 string, the
/// timestamp convention used throughout the wire protocol (§6).
pub fn now_iso8601() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

/// Builds the `{type}_error` reply for an unknown or malformed inbound message.
pub fn error_reply(source_type: &str, error: impl Into<String>) -> serde_json::Value {
    serde_json::json!({
        "type": format!("{source_type}_error"),
        "error": error.into(),
        "timestamp": now_iso8601(),
    })
}

/// Serializes any outbound payload to a JSON string, the unit the duplex
/// transport sends as one message.
pub fn to_json(value: &impl Serialize) -> serde_json::Result<String> {
    serde_json::to_string(value)
}
