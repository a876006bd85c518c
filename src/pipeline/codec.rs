use std::time::Instant;

use anyhow::{Result, anyhow};
use image::{DynamicImage, ExtendedColorType, RgbaImage, codecs::jpeg::JpegEncoder};
use zune_jpeg::{
    JpegDecoder,
    zune_core::{bytestream::ZCursor, colorspace::ColorSpace, options::DecoderOptions},
};

use crate::{error::DecodeError, types::Frame};

pub const BOUNDARY: &str = "frame";
pub const STREAM_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// Decodes an uploaded JPEG into an RGBA frame stamped with `timestamp`.
pub fn decode_jpeg(data: &[u8], timestamp: Instant) -> Result<Frame, DecodeError> {
    if data.is_empty() {
        return Err(DecodeError::Empty);
    }

    let options = DecoderOptions::default().jpeg_set_out_colorspace(ColorSpace::RGBA);
    let mut decoder = JpegDecoder::new_with_options(ZCursor::new(data), options);
    let rgba = decoder
        .decode()
        .map_err(|err| DecodeError::Jpeg(format!("{err:?}")))?;

    let (width, height) = decoder
        .dimensions()
        .ok_or_else(|| DecodeError::Jpeg("missing image dimensions".to_string()))?;
    let (width, height) = (width as usize, height as usize);
    let expected = width * height * 4;
    if rgba.len() < expected || expected == 0 {
        return Err(DecodeError::Size {
            got: rgba.len(),
            expected,
        });
    }

    let width = u32::try_from(width).map_err(|_| DecodeError::Jpeg("width overflow".into()))?;
    let height = u32::try_from(height).map_err(|_| DecodeError::Jpeg("height overflow".into()))?;

    let mut rgba = rgba;
    rgba.truncate(expected);
    Ok(Frame {
        rgba,
        width,
        height,
        timestamp,
    })
}

pub fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>> {
    encode_rgba(&frame.rgba, frame.width, frame.height, quality)
}

pub fn encode_rgba(rgba: &[u8], width: u32, height: u32, quality: u8) -> Result<Vec<u8>> {
    let image = RgbaImage::from_raw(width, height, rgba.to_vec())
        .ok_or_else(|| anyhow!("RGBA buffer does not match {width}x{height}"))?;
    let rgb = DynamicImage::ImageRgba8(image).to_rgb8();
    encode_rgb(rgb.as_raw(), width, height, quality)
}

/// Encodes a packed RGB buffer, as produced by camera format conversion.
pub fn encode_rgb(rgb: &[u8], width: u32, height: u32, quality: u8) -> Result<Vec<u8>> {
    let expected = width as usize * height as usize * 3;
    if rgb.len() != expected || expected == 0 {
        return Err(anyhow!(
            "RGB buffer size mismatch: got {}, expected {expected}",
            rgb.len()
        ));
    }

    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100))
        .encode(rgb, width, height, ExtendedColorType::Rgb8)
        .map_err(|err| anyhow!("JPEG encode failed: {err}"))?;
    Ok(buffer)
}

/// Wraps one JPEG as a part of the `multipart/x-mixed-replace` stream.
pub fn mjpeg_part(jpeg: &[u8]) -> Vec<u8> {
    let header = format!("--{BOUNDARY}\r\nContent-Type: image/jpeg\r\n\r\n");
    let mut payload = Vec::with_capacity(jpeg.len() + header.len() + 2);
    payload.extend_from_slice(header.as_bytes());
    payload.extend_from_slice(jpeg);
    payload.extend_from_slice(b"\r\n");
    payload
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> Frame {
        let rgba = (0..width * height)
            .flat_map(|i| {
                let x = (i % width) as u8;
                [x.wrapping_mul(8), 128, 255 - x.wrapping_mul(8), 255]
            })
            .collect();
        Frame {
            rgba,
            width,
            height,
            timestamp: Instant::now(),
        }
    }

    #[test]
    fn test_empty_payload_is_rejected() {
        assert!(matches!(
            decode_jpeg(&[], Instant::now()),
            Err(DecodeError::Empty)
        ));
    }

    #[test]
    fn test_garbage_payload_is_rejected() {
        let result = decode_jpeg(b"definitely not a jpeg", Instant::now());
        assert!(matches!(result, Err(DecodeError::Jpeg(_))));
    }

    #[test]
    fn test_encoded_frame_decodes_to_same_geometry() {
        let frame = gradient(32, 16);
        let jpeg = encode_jpeg(&frame, 90).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);

        let decoded = decode_jpeg(&jpeg, frame.timestamp).unwrap();
        assert_eq!((decoded.width, decoded.height), (32, 16));
        assert_eq!(decoded.rgba.len(), 32 * 16 * 4);
        assert_eq!(decoded.timestamp, frame.timestamp);
        // Opaque output even though JPEG has no alpha.
        assert!(decoded.rgba.chunks_exact(4).all(|px| px[3] == 255));
    }

    #[test]
    fn test_encode_rejects_short_buffer() {
        assert!(encode_rgba(&[0; 12], 4, 4, 80).is_err());
    }

    #[test]
    fn test_rgb_encode_matches_dimensions() {
        let rgb = vec![200u8; 16 * 8 * 3];
        let jpeg = encode_rgb(&rgb, 16, 8, 85).unwrap();
        let decoded = decode_jpeg(&jpeg, Instant::now()).unwrap();
        assert_eq!((decoded.width, decoded.height), (16, 8));
        assert!(encode_rgb(&rgb[1..], 16, 8, 85).is_err());
    }

    #[test]
    fn test_mjpeg_part_framing() {
        let part = mjpeg_part(&[1, 2, 3]);
        let header = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";
        assert!(part.starts_with(header));
        assert_eq!(&part[header.len()..], &[1, 2, 3, b'\r', b'\n']);
    }
}
