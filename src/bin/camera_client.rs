use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::Result;
use crossbeam_channel::bounded;
use nokhwa::utils::CameraIndex;

use gesture_relay::{
    client::{FpsCounter, FrameUploader, parse_wakeup},
    config::ClientConfig,
    pipeline::camera::{CameraStream, available_cameras, start_camera_stream},
    publish::MqttLink,
    retry::{Backoff, sleep_while},
};

const IDLE_POLL: Duration = Duration::from_millis(100);

fn main() -> Result<()> {
    env_logger::init();

    let config = ClientConfig::from_env();
    match available_cameras() {
        Ok(cameras) => {
            for camera in cameras {
                log::info!("found camera {}", camera.label);
            }
        }
        Err(err) => log::warn!("failed to list cameras: {err:?}"),
    }

    let uploader = FrameUploader::new(&config.server_url)?;
    log::info!("uploading frames to {}", uploader.upload_url());

    let active = Arc::new(AtomicBool::new(config.start_active));
    let wakeup = match config.mqtt.as_ref() {
        Some(mqtt) => {
            let flag = active.clone();
            let wakeup_topic = config.wakeup_topic.clone();
            let link = MqttLink::connect(mqtt, vec![wakeup_topic.clone()], move |topic, payload| {
                if topic != wakeup_topic {
                    return;
                }
                match parse_wakeup(payload) {
                    Some(true) => {
                        log::info!("starting frame capture");
                        flag.store(true, Ordering::SeqCst);
                    }
                    Some(false) => {
                        log::info!("stopping frame capture");
                        flag.store(false, Ordering::SeqCst);
                    }
                    None => log::warn!(
                        "ignoring wake-up payload {:?}",
                        String::from_utf8_lossy(payload)
                    ),
                }
            })?;
            log::info!("listening for wake-up messages on {}", config.wakeup_topic);
            Some(link)
        }
        None => {
            log::info!("MQTT_HOST not set, capture is controlled by CAMERA_CLIENT_START_ACTIVE only");
            None
        }
    };

    let (frame_tx, frame_rx) = bounded(1);
    let mut stream: Option<CameraStream> = None;
    let mut camera_backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(30), 2, Some(10));
    let mut fps = FpsCounter::new(Instant::now());

    loop {
        if !active.load(Ordering::Relaxed) {
            if let Some(running) = stream.take() {
                running.stop();
                while frame_rx.try_recv().is_ok() {}
                log::info!("camera released");
            }
            thread::sleep(IDLE_POLL);
            continue;
        }

        if stream.is_none() {
            match start_camera_stream(
                CameraIndex::Index(config.camera_index),
                config.jpeg_quality,
                frame_tx.clone(),
            ) {
                Ok(started) => {
                    camera_backoff.reset();
                    fps = FpsCounter::new(Instant::now());
                    stream = Some(started);
                }
                Err(err) => {
                    let Some(delay) = camera_backoff.next_delay() else {
                        camera_backoff.reset();
                        if wakeup.is_some() {
                            log::error!(
                                "camera {} could not be opened, idling until the next wake-up: {err:?}",
                                config.camera_index
                            );
                            active.store(false, Ordering::SeqCst);
                        } else {
                            log::error!(
                                "camera {} could not be opened, starting over: {err:?}",
                                config.camera_index
                            );
                        }
                        continue;
                    };
                    log::error!("failed to start camera, retrying in {delay:?}: {err:?}");
                    // A stop message cuts the wait short.
                    sleep_while(delay, &active);
                    continue;
                }
            }
        }

        let Ok(captured) = frame_rx.recv_timeout(IDLE_POLL) else {
            continue;
        };
        log::trace!(
            "sending {}x{} frame captured {:?} ago",
            captured.frame.width,
            captured.frame.height,
            captured.captured.elapsed()
        );
        if let Err(err) = uploader.send_frame(captured.frame.jpeg) {
            log::warn!("error sending frame: {err:?}");
        }

        if let Some(count) = fps.tick(Instant::now()) {
            let message = format!("FPS: {count}");
            log::info!("{message}");
            if let Err(err) = uploader.send_log(&message) {
                log::debug!("failed to forward log line: {err:?}");
            }
        }

        thread::sleep(config.frame_delay);
    }
}
