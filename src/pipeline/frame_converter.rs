use anyhow::{Result, anyhow};
use nokhwa::{Buffer, utils::FrameFormat};
use rayon::prelude::*;
use yuv::{
    YuvBiPlanarImage, YuvConversionMode, YuvPackedImage, YuvRange, YuvStandardMatrix,
    yuv_nv12_to_rgb, yuyv422_to_rgb,
};

use super::codec;

#[derive(Debug)]
pub struct JpegFrame {
    pub jpeg: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Turns a camera buffer into JPEG bytes. MJPEG frames are forwarded as-is,
/// everything else is converted to RGB and encoded at `quality`.
pub fn camera_frame_to_jpeg(frame: &Buffer, quality: u8) -> Result<JpegFrame> {
    let resolution = frame.resolution();
    let width = resolution.width_x;
    let height = resolution.height_y;
    let jpeg = raw_to_jpeg(frame.source_frame_format(), frame.buffer(), width, height, quality)?;

    Ok(JpegFrame {
        jpeg,
        width,
        height,
    })
}

fn raw_to_jpeg(
    format: FrameFormat,
    data: &[u8],
    width: u32,
    height: u32,
    quality: u8,
) -> Result<Vec<u8>> {
    let rgb = match format {
        FrameFormat::MJPEG => return mjpeg_passthrough(data),
        FrameFormat::NV12 => nv12_to_rgb(data, width, height)?,
        FrameFormat::YUYV => yuyv_to_rgb(data, width, height)?,
        FrameFormat::RAWRGB => packed_rgb(data, width, height, false)?,
        FrameFormat::RAWBGR => packed_rgb(data, width, height, true)?,
        FrameFormat::GRAY => gray_to_rgb(data, width, height)?,
    };
    codec::encode_rgb(&rgb, width, height, quality)
}

fn mjpeg_passthrough(data: &[u8]) -> Result<Vec<u8>> {
    if !data.starts_with(&[0xFF, 0xD8]) {
        return Err(anyhow!("MJPEG frame is missing the JPEG start marker"));
    }
    Ok(data.to_vec())
}

fn nv12_to_rgb(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let y_plane_len = width as usize * height as usize;
    let uv_plane_len = y_plane_len / 2;

    if data.len() < y_plane_len + uv_plane_len {
        return Err(anyhow!(
            "NV12 buffer too small: got {}, expected {}",
            data.len(),
            y_plane_len + uv_plane_len
        ));
    }

    let image = YuvBiPlanarImage {
        y_plane: &data[..y_plane_len],
        y_stride: width,
        uv_plane: &data[y_plane_len..y_plane_len + uv_plane_len],
        uv_stride: width,
        width,
        height,
    };

    let mut rgb = vec![0u8; y_plane_len * 3];
    yuv_nv12_to_rgb(
        &image,
        &mut rgb,
        width * 3,
        YuvRange::Full,
        YuvStandardMatrix::Bt709,
        YuvConversionMode::Balanced,
    )
    .map_err(|err| anyhow!("NV12→RGB failed: {err:?}"))?;

    Ok(rgb)
}

fn yuyv_to_rgb(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let expected_len = width as usize * height as usize * 2;
    if data.len() < expected_len {
        return Err(anyhow!(
            "YUYV buffer too small: got {}, expected {}",
            data.len(),
            expected_len
        ));
    }

    let packed = YuvPackedImage {
        yuy: data,
        yuy_stride: width * 2,
        width,
        height,
    };

    let mut rgb = vec![0u8; width as usize * height as usize * 3];
    yuyv422_to_rgb(
        &packed,
        &mut rgb,
        width * 3,
        YuvRange::Full,
        YuvStandardMatrix::Bt709,
    )
    .map_err(|err| anyhow!("YUYV422→RGB failed: {err:?}"))?;

    Ok(rgb)
}

fn packed_rgb(data: &[u8], width: u32, height: u32, swap_rb: bool) -> Result<Vec<u8>> {
    let expected_len = width as usize * height as usize * 3;
    if data.len() < expected_len {
        return Err(anyhow!(
            "RGB buffer too small: got {}, expected {}",
            data.len(),
            expected_len
        ));
    }

    let mut rgb = data[..expected_len].to_vec();
    if swap_rb {
        rgb.par_chunks_mut(3).for_each(|px| px.swap(0, 2));
    }
    Ok(rgb)
}

fn gray_to_rgb(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let expected_len = width as usize * height as usize;
    if data.len() < expected_len {
        return Err(anyhow!(
            "GRAY buffer too small: got {}, expected {}",
            data.len(),
            expected_len
        ));
    }

    let mut rgb = vec![0u8; expected_len * 3];
    rgb.par_chunks_mut(3)
        .zip(data[..expected_len].par_iter().copied())
        .for_each(|(dst, value)| dst.fill(value));

    Ok(rgb)
}
