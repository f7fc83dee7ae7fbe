//! Recording subsystem (§4.8 / C8): trajectory-only and combined
//! video+trajectory capture, mutually exclusive by construction.

mod error;
mod recorder;

pub use error::{RecordingError, RecordingKind};
pub use recorder::{Recorder, TrajectorySample, VIDEO_AUTO_STOP};
