#[cfg(feature = "camera-nokhwa")]
pub mod camera;
pub mod codec;
#[cfg(feature = "camera-nokhwa")]
pub mod frame_converter;
pub mod recognizer;
pub mod skeleton;
pub mod stream;
pub mod worker;

// Re-exports for convenience
pub use recognizer::{OrtVisionEngine, PassthroughEngine, VisionEngine, build_engine};
pub use stream::{LatestFrame, SharedPacket};
pub use worker::start_worker;
