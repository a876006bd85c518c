use anyhow::{Context, Result, anyhow};
use fast_image_resize as fir;
use ndarray::Array4;
use rayon::prelude::*;

use crate::types::{Frame, NUM_LANDMARKS};

pub const HANDPOSE_INPUT_SIZE: u32 = 224;
pub const PALM_INPUT_SIZE: u32 = 192;
pub const FACE_INPUT_SIZE: u32 = 128;

#[derive(Clone, Debug)]
pub struct LetterboxInfo {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub orig_w: u32,
    pub orig_h: u32,
}

#[derive(Clone, Debug)]
pub struct CropTransform {
    pub center: (f32, f32),
    pub side: f32,
    pub angle: f32,
    pub output_size: u32,
    pub orig_w: u32,
    pub orig_h: u32,
}

fn check_frame(frame: &Frame) -> Result<()> {
    let expected_len = (frame.width as usize)
        .saturating_mul(frame.height as usize)
        .saturating_mul(4);
    if frame.rgba.len() != expected_len || expected_len == 0 {
        return Err(anyhow!(
            "frame buffer size mismatch: got {}, expected {}",
            frame.rgba.len(),
            expected_len
        ));
    }
    Ok(())
}

/// Letterboxes the frame into a `target_size` square NHWC tensor in `[0, 1]`.
pub fn prepare_frame_with_size(
    frame: &Frame,
    target_size: u32,
) -> Result<(Array4<f32>, LetterboxInfo)> {
    check_frame(frame)?;

    let scale = target_size as f32 / (frame.width.max(frame.height) as f32);
    let new_w = ((frame.width as f32 * scale).round().max(1.0) as u32).min(target_size);
    let new_h = ((frame.height as f32 * scale).round().max(1.0) as u32).min(target_size);

    let src_image = fir::images::ImageRef::new(
        frame.width,
        frame.height,
        &frame.rgba,
        fir::PixelType::U8x4,
    )?;
    let mut dst_image = fir::images::Image::new(new_w, new_h, fir::PixelType::U8x4);
    let mut resizer = fir::Resizer::new();
    let resize_options = fir::ResizeOptions::new()
        .resize_alg(fir::ResizeAlg::Interpolation(fir::FilterType::Bilinear));
    resizer
        .resize(&src_image, &mut dst_image, Some(&resize_options))
        .context("fast resize failed")?;
    let resized = dst_image.into_vec();

    let pad_x = ((target_size - new_w) / 2) as usize;
    let pad_y = ((target_size - new_h) / 2) as usize;
    let side = target_size as usize;
    let mut canvas = vec![0.0f32; side * side * 3];
    let src_stride = new_w as usize * 4;
    canvas
        .par_chunks_mut(side * 3)
        .enumerate()
        .skip(pad_y)
        .take(new_h as usize)
        .for_each(|(row, dst)| {
            let src = &resized[(row - pad_y) * src_stride..(row - pad_y + 1) * src_stride];
            for (px, rgba) in src.chunks_exact(4).enumerate() {
                let o = (pad_x + px) * 3;
                dst[o] = rgba[0] as f32 / 255.0;
                dst[o + 1] = rgba[1] as f32 / 255.0;
                dst[o + 2] = rgba[2] as f32 / 255.0;
            }
        });

    let input = Array4::<f32>::from_shape_vec((1, side, side, 3), canvas)
        .map_err(|err| anyhow!("failed to build input tensor: {err}"))?;

    let letterbox = LetterboxInfo {
        scale,
        pad_x: pad_x as f32,
        pad_y: pad_y as f32,
        orig_w: frame.width,
        orig_h: frame.height,
    };

    Ok((input, letterbox))
}

pub fn decode_landmarks(flat: &[f32]) -> Result<Vec<[f32; 3]>> {
    if flat.len() < NUM_LANDMARKS * 3 {
        return Err(anyhow!(
            "unexpected landmarks length: got {}, need {}",
            flat.len(),
            NUM_LANDMARKS * 3
        ));
    }

    Ok(flat
        .chunks_exact(3)
        .take(NUM_LANDMARKS)
        .map(|c| [c[0], c[1], c[2]])
        .collect())
}

/// Samples a `side`-wide square around `center`, rotated by `angle`, into an
/// `output_size` square NHWC tensor.
pub fn prepare_rotated_crop(
    frame: &Frame,
    center: (f32, f32),
    side: f32,
    angle: f32,
    output_size: u32,
) -> Result<(Array4<f32>, CropTransform)> {
    check_frame(frame)?;

    let transform = CropTransform {
        center,
        side,
        angle,
        output_size,
        orig_w: frame.width,
        orig_h: frame.height,
    };

    let out = output_size as usize;
    let mut data = vec![0.0f32; out * out * 3];
    data.par_chunks_mut(out * 3).enumerate().for_each(|(y, row)| {
        for x in 0..out {
            let (src_x, src_y) = transform.to_source(x as f32 + 0.5, y as f32 + 0.5);
            row[x * 3..x * 3 + 3].copy_from_slice(&sample_rgb(frame, src_x, src_y));
        }
    });

    let array = Array4::<f32>::from_shape_vec((1, out, out, 3), data)
        .map_err(|err| anyhow!("failed to build rotated crop tensor: {err}"))?;

    Ok((array, transform))
}

impl CropTransform {
    fn scale(&self) -> f32 {
        self.side / self.output_size as f32
    }

    fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
        let half = self.output_size as f32 / 2.0;
        let dx = (x - half) * self.scale();
        let dy = (y - half) * self.scale();
        let (sin, cos) = self.angle.sin_cos();
        (
            self.center.0 + dx * cos - dy * sin,
            self.center.1 + dx * sin + dy * cos,
        )
    }

    /// Maps a crop-space landmark into frame pixels. Depth is rescaled by the
    /// same factor as x and y so angles survive the projection.
    pub fn project(&self, point: [f32; 3]) -> [f32; 3] {
        let (ox, oy) = self.to_source(point[0], point[1]);
        [ox, oy, point[2] * self.scale()]
    }
}

fn sample_rgb(frame: &Frame, x: f32, y: f32) -> [f32; 3] {
    if x.is_nan() || y.is_nan() {
        return [0.0, 0.0, 0.0];
    }
    let x0 = x.floor();
    let y0 = y.floor();

    let (w, h) = (frame.width as i32, frame.height as i32);
    let fetch = |cx: f32, cy: f32| -> [f32; 3] {
        let ix = cx as i32;
        let iy = cy as i32;
        if ix < 0 || iy < 0 || ix >= w || iy >= h {
            return [0.0, 0.0, 0.0];
        }
        let idx = ((iy as u32 * frame.width + ix as u32) as usize) * 4;
        [
            frame.rgba[idx] as f32 / 255.0,
            frame.rgba[idx + 1] as f32 / 255.0,
            frame.rgba[idx + 2] as f32 / 255.0,
        ]
    };

    let fx = x - x0;
    let fy = y - y0;
    let c00 = fetch(x0, y0);
    let c10 = fetch(x0 + 1.0, y0);
    let c01 = fetch(x0, y0 + 1.0);
    let c11 = fetch(x0 + 1.0, y0 + 1.0);

    let lerp = |a: f32, b: f32, t: f32| a + (b - a) * t;
    std::array::from_fn(|c| lerp(lerp(c00[c], c10[c], fx), lerp(c01[c], c11[c], fx), fy))
}
