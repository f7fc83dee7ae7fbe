//! JPEG encoding for captured frames, shared by the trajectory/video
//! recorder feed and the media relay.

use std::io::Cursor;

use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
use motivo_net::RawFrame;

/// Encodes a raw RGB8 frame as a JPEG byte buffer.
pub fn encode_jpeg(frame: &RawFrame) -> anyhow::Result<Vec<u8>> {
    let image: ImageBuffer<Rgb<u8>, _> =
        ImageBuffer::from_raw(frame.width, frame.height, frame.rgb.clone())
            .ok_or_else(|| anyhow::anyhow!("frame buffer size does not match its declared dimensions"))?;
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(image).write_to(&mut Cursor::new(&mut buf), ImageFormat::Jpeg)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_a_small_solid_frame() {
        let frame = RawFrame {
            width: 4,
            height: 4,
            rgb: vec![128u8; 4 * 4 * 3],
        };
        let jpeg = encode_jpeg(&frame).unwrap();
        assert!(!jpeg.is_empty());
        assert_eq!(&jpeg[0..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn mismatched_buffer_size_is_an_error() {
        let frame = RawFrame {
            width: 4,
            height: 4,
            rgb: vec![0u8; 3],
        };
        assert!(encode_jpeg(&frame).is_err());
    }
}
