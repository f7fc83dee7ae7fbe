//! Realtime media offer/answer/ICE signaling types (§6).

use serde::{Deserialize, Serialize};

/// Quality preset for an encoded video track (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityPreset {
    /// 320x240 @ 15 fps.
    Low,
    /// 854x480 @ 24 fps.
    Standard,
    /// 1280x720 @ 24 fps.
    High,
    /// 1920x1080 @ 20 fps.
    Ultra,
}

impl QualityPreset {
    /// `(width, height, fps)` for this preset.
    pub fn dimensions(self) -> (u32, u32, u32) {
        match self {
            Self::Low => (320, 240, 15),
            Self::Standard => (854, 480, 24),
            Self::High => (1280, 720, 24),
            Self::Ultra => (1920, 1080, 20),
        }
    }
}

/// A parsed ICE candidate (§6): foundation/component/protocol/priority/ip/port/type
/// plus optional related-address/port and TCP type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IceCandidate {
    /// Candidate foundation identifier.
    pub foundation: String,
    /// Component id (1 = RTP, 2 = RTCP).
    pub component: u32,
    /// Transport protocol ("udp" or "tcp").
    pub protocol: String,
    /// Candidate priority.
    pub priority: u32,
    /// Connection address.
    pub ip: String,
    /// Connection port.
    pub port: u16,
    /// Candidate type ("host", "srflx", "prflx", "relay").
    pub candidate_type: String,
    /// Related address, for reflexive/relay candidates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_address: Option<String>,
    /// Related port, for reflexive/relay candidates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_port: Option<u16>,
    /// TCP candidate type ("active", "passive", "so"), TCP candidates only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp_type: Option<String>,
}

/// Realtime media session negotiation messages, carried on the same duplex
/// channel as [`crate::Command`] / [`crate::Outbound`] but addressed to the
/// media session manager (C6) rather than the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MediaSignal {
    /// Client offer (SDP-like payload).
    Offer {
        /// Offer body, opaque to the session manager beyond parsing.
        sdp: String,
        /// Requested quality preset.
        #[serde(default = "default_preset")]
        quality: QualityPreset,
    },
    /// Server answer to a client offer.
    Answer {
        /// Answer body.
        sdp: String,
    },
    /// A single ICE candidate, in either direction.
    IceCandidate {
        /// The candidate, already parsed.
        candidate: IceCandidate,
    },
}

fn default_preset() -> QualityPreset {
    QualityPreset::High
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offer_defaults_to_high_quality() {
        let json = serde_json::json!({"type": "offer", "sdp": "v=0"});
        let msg: MediaSignal = serde_json::from_value(json).expect("parses");
        assert!(matches!(
            msg,
            MediaSignal::Offer {
                quality: QualityPreset::High,
                ..
            }
        ));
    }
}
