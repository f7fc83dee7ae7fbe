//! Realtime media session manager (§4.6 / C6): per-peer frame transform,
//! letterbox caching, small ring buffer, and adaptive throttling when a
//! consumer can't keep up with the simulation loop's frame rate.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};

use image::imageops::FilterType;
use image::{ImageBuffer, Rgb, RgbImage};
use motivo_proto::QualityPreset;

/// Ring buffer depth per session (§4.6): bounds memory while tolerating a
/// momentarily slow consumer without unbounded buffering.
pub const RING_DEPTH: usize = 3;

/// Maximum throttle factor: at most 1 in 5 frames is forwarded to a
/// persistently slow consumer.
pub const MAX_THROTTLE: u32 = 5;

/// A captured, unencoded simulation frame.
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Packed RGB8 pixel data, row-major, `width * height * 3` bytes.
    pub rgb: Vec<u8>,
}

/// A frame ready for encoding/transmission: letterboxed to the session's
/// target resolution and stamped with a presentation timestamp.
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    /// Letterboxed pixel data at the session's target resolution.
    pub rgb: Vec<u8>,
    /// Target width.
    pub width: u32,
    /// Target height.
    pub height: u32,
    /// Monotonically increasing presentation timestamp, one tick per pushed frame.
    pub pts: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct LetterboxParams {
    src_w: u32,
    src_h: u32,
    dst_w: u32,
    dst_h: u32,
    scale: f64,
    pad_x: u32,
    pad_y: u32,
}

fn compute_letterbox(src_w: u32, src_h: u32, dst_w: u32, dst_h: u32) -> LetterboxParams {
    let scale = (f64::from(dst_w) / f64::from(src_w)).min(f64::from(dst_h) / f64::from(src_h));
    let scaled_w = ((f64::from(src_w) * scale).round() as u32).min(dst_w);
    let scaled_h = ((f64::from(src_h) * scale).round() as u32).min(dst_h);
    LetterboxParams {
        src_w,
        src_h,
        dst_w,
        dst_h,
        scale,
        pad_x: (dst_w.saturating_sub(scaled_w)) / 2,
        pad_y: (dst_h.saturating_sub(scaled_h)) / 2,
    }
}

fn apply_letterbox(frame: &RawFrame, params: LetterboxParams) -> Vec<u8> {
    let Some(src): Option<RgbImage> =
        ImageBuffer::from_raw(frame.width, frame.height, frame.rgb.clone())
    else {
        return vec![0u8; (params.dst_w * params.dst_h * 3) as usize];
    };
    let scaled_w = ((f64::from(params.src_w) * params.scale).round() as u32)
        .min(params.dst_w)
        .max(1);
    let scaled_h = ((f64::from(params.src_h) * params.scale).round() as u32)
        .min(params.dst_h)
        .max(1);
    let resized = image::imageops::resize(&src, scaled_w, scaled_h, FilterType::Triangle);

    let mut canvas: RgbImage = ImageBuffer::from_pixel(params.dst_w, params.dst_h, Rgb([0, 0, 0]));
    image::imageops::overlay(&mut canvas, &resized, i64::from(params.pad_x), i64::from(params.pad_y));
    canvas.into_raw()
}

fn content_hash(frame: &RawFrame) -> u64 {
    let mut hasher = DefaultHasher::new();
    frame.width.hash(&mut hasher);
    frame.height.hash(&mut hasher);
    frame.rgb.hash(&mut hasher);
    hasher.finish()
}

/// State for one negotiated media session.
pub struct MediaSession {
    quality: QualityPreset,
    ring: VecDeque<EncodedFrame>,
    last_good: Option<EncodedFrame>,
    pts_counter: u64,
    last_hash: Option<u64>,
    letterbox: Option<LetterboxParams>,
    throttle_factor: u32,
    push_count: u64,
}

impl MediaSession {
    /// Creates a session negotiated at the given quality preset.
    pub fn new(quality: QualityPreset) -> Self {
        Self {
            quality,
            ring: VecDeque::with_capacity(RING_DEPTH),
            last_good: None,
            pts_counter: 0,
            last_hash: None,
            letterbox: None,
            throttle_factor: 1,
            push_count: 0,
        }
    }

    /// Current negotiated quality preset.
    pub fn quality(&self) -> QualityPreset {
        self.quality
    }

    /// Renegotiates quality mid-session (e.g. on bandwidth change signal).
    pub fn set_quality(&mut self, quality: QualityPreset) {
        self.quality = quality;
        self.letterbox = None;
    }

    /// Raises or lowers the throttle factor, clamped to `[1, MAX_THROTTLE]`.
    /// Called by the manager when it observes the consumer falling behind
    /// (ring buffer persistently full) or catching up.
    pub fn adjust_throttle(&mut self, delta: i32) {
        let current = i32::try_from(self.throttle_factor).unwrap_or(i32::MAX);
        let next = (current + delta).clamp(1, i32::try_from(MAX_THROTTLE).unwrap_or(i32::MAX));
        self.throttle_factor = u32::try_from(next).unwrap_or(1);
    }

    /// Transforms and enqueues a frame. Returns `false` if the frame was
    /// suppressed: identical to the previous frame's content, or skipped by
    /// the current throttle factor.
    pub fn push_frame(&mut self, frame: &RawFrame) -> bool {
        self.push_count += 1;
        if self.push_count % u64::from(self.throttle_factor) != 0 {
            return false;
        }

        let hash = content_hash(frame);
        if self.last_hash == Some(hash) {
            return false;
        }
        self.last_hash = Some(hash);

        let (dst_w, dst_h, _fps) = self.quality.dimensions();
        let params = match self.letterbox {
            Some(p) if p.src_w == frame.width && p.src_h == frame.height && p.dst_w == dst_w && p.dst_h == dst_h => p,
            _ => {
                let p = compute_letterbox(frame.width, frame.height, dst_w, dst_h);
                self.letterbox = Some(p);
                p
            }
        };

        let rgb = apply_letterbox(frame, params);
        self.pts_counter += 1;
        let encoded = EncodedFrame {
            rgb,
            width: dst_w,
            height: dst_h,
            pts: self.pts_counter,
        };

        if self.ring.len() >= RING_DEPTH {
            self.ring.pop_front();
        }
        self.ring.push_back(encoded.clone());
        self.last_good = Some(encoded);
        true
    }

    /// Pops the oldest queued frame, falling back to the last delivered
    /// frame (freeze-frame) if the ring is currently empty.
    pub fn pull_frame(&mut self) -> Option<EncodedFrame> {
        self.ring.pop_front().or_else(|| self.last_good.clone())
    }

    /// `true` when the consumer appears to be falling behind (ring is full).
    pub fn is_backlogged(&self) -> bool {
        self.ring.len() >= RING_DEPTH
    }
}

/// Owns every active media session, keyed by peer id.
#[derive(Default)]
pub struct MediaSessionManager {
    sessions: HashMap<String, MediaSession>,
}

impl MediaSessionManager {
    /// Creates an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Negotiates a new session for `peer_id` at the requested quality.
    pub fn open(&mut self, peer_id: impl Into<String>, quality: QualityPreset) {
        self.sessions.insert(peer_id.into(), MediaSession::new(quality));
    }

    /// Tears down a session, e.g. on disconnect.
    pub fn close(&mut self, peer_id: &str) {
        self.sessions.remove(peer_id);
    }

    /// Mutable access to a session, for pushing/pulling frames.
    pub fn session_mut(&mut self, peer_id: &str) -> Option<&mut MediaSession> {
        self.sessions.get_mut(peer_id)
    }

    /// Fans a freshly rendered frame out to every open session, adapting
    /// each session's throttle based on whether it's keeping up.
    pub fn broadcast_frame(&mut self, frame: &RawFrame) {
        for session in self.sessions.values_mut() {
            let was_backlogged = session.is_backlogged();
            session.push_frame(frame);
            if was_backlogged {
                session.adjust_throttle(1);
            } else if session.throttle_factor > 1 {
                session.adjust_throttle(-1);
            }
        }
    }

    /// Number of open sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// `true` if no sessions are open.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
