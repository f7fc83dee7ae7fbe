//! Subscriber fan-out (§4.5 / C5) and realtime media session management
//! (§4.6 / C6) for the Motivo session hub.

mod ice;
mod registry;
mod session;

pub use ice::{parse_candidate, IceParseError};
pub use registry::{BroadcastReport, PeerQueue, SubscriberRegistry, DEDUP_WINDOW, DEFAULT_QUEUE_DEPTH};
pub use session::{EncodedFrame, MediaSession, MediaSessionManager, RawFrame, MAX_THROTTLE, RING_DEPTH};
