use std::thread;

use anyhow::{Context, Result};
use crossbeam_channel::Receiver;

use crate::publish::{GesturePublisher, GestureSink};

use super::{
    codec,
    recognizer::VisionEngine,
    skeleton,
    stream::{SharedPacket, Upload, recv_latest},
};

/// Decodes, analyzes, annotates and re-encodes uploads until the upload
/// channel closes.
pub fn start_worker<E, S>(
    engine: E,
    uploads: Receiver<Upload>,
    output: SharedPacket,
    publisher: Option<GesturePublisher<S>>,
    jpeg_quality: u8,
) -> Result<thread::JoinHandle<()>>
where
    E: VisionEngine,
    S: GestureSink,
{
    log::info!("starting frame worker with {} engine", engine.label());
    thread::Builder::new()
        .name("frame-worker".into())
        .spawn(move || run_worker_loop(engine, uploads, output, publisher, jpeg_quality))
        .context("failed to spawn frame worker")
}

fn run_worker_loop<E: VisionEngine, S: GestureSink>(
    mut engine: E,
    uploads: Receiver<Upload>,
    output: SharedPacket,
    mut publisher: Option<GesturePublisher<S>>,
    jpeg_quality: u8,
) {
    while let Some(upload) = recv_latest(&uploads) {
        let mut frame = match codec::decode_jpeg(&upload.jpeg, upload.received) {
            Ok(frame) => frame,
            Err(err) => {
                log::warn!("dropping undecodable upload: {err}");
                continue;
            }
        };

        let analysis = match engine.analyze(&frame) {
            Ok(analysis) => analysis,
            Err(err) => {
                log::warn!("vision inference failed: {err:?}");
                continue;
            }
        };

        skeleton::annotate(&mut frame.rgba, frame.width, frame.height, &analysis);

        match codec::encode_jpeg(&frame, jpeg_quality) {
            Ok(jpeg) => {
                let sequence = output.publish(jpeg);
                log::trace!(
                    "frame {sequence}: {} hands, {} faces in {:?}",
                    analysis.hands.len(),
                    analysis.faces.len(),
                    upload.received.elapsed()
                );
            }
            Err(err) => log::warn!("failed to encode annotated frame: {err:?}"),
        }

        if let Some(publisher) = publisher.as_mut() {
            publisher.observe(analysis.top_gesture());
        }
    }
    log::info!("upload channel closed, frame worker exiting");
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{Arc, Mutex},
        time::Instant,
    };

    use super::*;
    use crate::{
        error::PublishError,
        pipeline::stream::LatestFrame,
        types::{
            DetectedHand, Frame, FrameAnalysis, GestureCategory, GestureKind, HandLandmarks,
            Handedness, NUM_LANDMARKS,
        },
    };

    struct ScriptedEngine {
        calls: usize,
    }

    impl VisionEngine for ScriptedEngine {
        fn analyze(&mut self, frame: &Frame) -> Result<FrameAnalysis> {
            self.calls += 1;
            if self.calls == 1 {
                return Err(anyhow::anyhow!("first frame fails"));
            }
            let points: Vec<[f32; 3]> = (0..NUM_LANDMARKS)
                .map(|i| [(i % frame.width as usize) as f32, 2.0, 0.0])
                .collect();
            Ok(FrameAnalysis {
                hands: vec![DetectedHand {
                    landmarks: HandLandmarks::new(&points)?,
                    handedness: Handedness::Left,
                    score: 0.8,
                    thumbs_up: true,
                    gesture: GestureCategory {
                        kind: GestureKind::ThumbUp,
                        score: 0.8,
                    },
                }],
                faces: Vec::new(),
            })
        }

        fn label(&self) -> &'static str {
            "scripted"
        }
    }

    #[derive(Clone, Default)]
    struct SharedSink(Arc<Mutex<Vec<String>>>);

    impl GestureSink for SharedSink {
        fn send(&mut self, name: &str) -> Result<(), PublishError> {
            self.0.lock().unwrap().push(name.to_string());
            Ok(())
        }
    }

    fn jpeg(width: u32, height: u32) -> Vec<u8> {
        codec::encode_rgba(&vec![90u8; (width * height * 4) as usize], width, height, 90).unwrap()
    }

    fn upload(jpeg: Vec<u8>) -> Upload {
        Upload {
            jpeg,
            received: Instant::now(),
        }
    }

    #[test]
    fn test_worker_survives_bad_frames_and_publishes() {
        let (slot, rx) = LatestFrame::new();
        let output = SharedPacket::new();
        let sink = SharedSink::default();
        let handle = start_worker(
            ScriptedEngine { calls: 0 },
            rx,
            output.clone(),
            Some(GesturePublisher::new(sink.clone())),
            80,
        )
        .unwrap();

        // The garbage upload never reaches the engine and the engine fails its
        // first frame; the worker has to keep going through both.
        slot.offer(upload(b"garbage".to_vec()));
        let frame = jpeg(32, 24);
        let start = Instant::now();
        while output.latest().map_or(0, |p| p.sequence) < 2 {
            assert!(start.elapsed().as_secs() < 5, "worker stalled");
            slot.offer(upload(frame.clone()));
            std::thread::sleep(std::time::Duration::from_millis(10));
        }

        drop(slot);
        handle.join().unwrap();

        let packet = output.latest().unwrap();
        let annotated = codec::decode_jpeg(&packet.jpeg, Instant::now()).unwrap();
        assert_eq!((annotated.width, annotated.height), (32, 24));
        assert_eq!(*sink.0.lock().unwrap(), vec!["Thumb_Up"]);
    }
}
