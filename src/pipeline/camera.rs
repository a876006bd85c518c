use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Instant,
};

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::Sender;
use nokhwa::{
    Camera,
    pixel_format::RgbFormat,
    query,
    utils::{
        ApiBackend, CameraIndex, CameraInfo, FrameFormat, RequestedFormat, RequestedFormatType,
    },
};

use super::frame_converter::{self, JpegFrame};

// MJPEG first so frames can be uploaded without re-encoding.
const PREFERRED_PIXEL_FORMATS: &[FrameFormat] = &[
    FrameFormat::MJPEG,
    FrameFormat::YUYV,
    FrameFormat::NV12,
    FrameFormat::RAWRGB,
    FrameFormat::RAWBGR,
    FrameFormat::GRAY,
];

fn requested_formats() -> [RequestedFormat<'static>; 3] {
    [
        RequestedFormat::with_formats(
            RequestedFormatType::AbsoluteHighestFrameRate,
            PREFERRED_PIXEL_FORMATS,
        ),
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate),
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::None),
    ]
}

#[derive(Clone, Debug)]
pub struct CameraDevice {
    pub index: CameraIndex,
    pub label: String,
}

#[derive(Debug)]
pub struct CapturedFrame {
    pub frame: JpegFrame,
    pub captured: Instant,
}

/// A running capture thread. Dropping it stops capture and releases the
/// camera.
#[derive(Debug)]
pub struct CameraStream {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl CameraStream {
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CameraStream {
    fn drop(&mut self) {
        self.shutdown();
    }
}

pub fn available_cameras() -> Result<Vec<CameraDevice>> {
    let cameras = query(ApiBackend::Auto)?;
    Ok(cameras
        .into_iter()
        .map(|info| CameraDevice {
            index: info.index().clone(),
            label: format_camera_label(&info),
        })
        .collect())
}

fn format_camera_label(info: &CameraInfo) -> String {
    format!("{} ({})", info.human_name(), info.index())
}

fn build_camera(index: CameraIndex) -> Result<Camera> {
    let mut last_err = None;

    for requested in requested_formats() {
        match Camera::new(index.clone(), requested) {
            Ok(mut camera) => match camera.open_stream() {
                Ok(()) => return Ok(camera),
                Err(err) => last_err = Some(err.into()),
            },
            Err(err) => last_err = Some(err.into()),
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow!("failed to open camera with any supported format")))
}

/// Opens the camera and starts pushing JPEG frames into `frame_tx`. Frames are
/// dropped while the receiver is busy.
pub fn start_camera_stream(
    index: CameraIndex,
    jpeg_quality: u8,
    frame_tx: Sender<CapturedFrame>,
) -> Result<CameraStream> {
    // Fail fast before spawning the capture thread.
    drop(build_camera(index.clone())?);

    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = stop.clone();

    let handle = thread::Builder::new()
        .name("camera-capture".into())
        .spawn(move || {
            let mut camera = match build_camera(index) {
                Ok(camera) => camera,
                Err(err) => {
                    log::error!("failed to open camera: {err:?}");
                    return;
                }
            };
            log::info!(
                "camera opened at {} using {:?}",
                camera.resolution(),
                camera.frame_format()
            );

            while !stop_flag.load(Ordering::Relaxed) {
                let frame_start = Instant::now();
                let buffer = match camera.frame() {
                    Ok(buffer) => buffer,
                    Err(err) => {
                        log::warn!(
                            "camera frame read failed (after {:?}): {err:?}",
                            frame_start.elapsed()
                        );
                        continue;
                    }
                };

                let frame = match frame_converter::camera_frame_to_jpeg(&buffer, jpeg_quality) {
                    Ok(frame) => frame,
                    Err(err) => {
                        log::warn!("failed to encode camera frame {err:?}");
                        continue;
                    }
                };

                let _ = frame_tx.try_send(CapturedFrame {
                    frame,
                    captured: frame_start,
                });
            }

            if let Err(err) = camera.stop_stream() {
                log::warn!("failed to stop camera stream: {err:?}");
            }
        })
        .context("failed to spawn camera capture thread")?;

    Ok(CameraStream {
        stop,
        handle: Some(handle),
    })
}
