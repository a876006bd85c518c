use anyhow::{Context, Result};

use gesture_relay::{
    config::Config,
    pipeline::{LatestFrame, SharedPacket, build_engine, start_worker},
    publish::{GesturePublisher, MqttSink},
    server::{AppState, run_server},
};

fn main() -> Result<()> {
    env_logger::init();

    let config = Config::from_env()?;
    log::debug!("configuration: {config:?}");

    let engine = build_engine(&config.vision);

    let publisher = match config.mqtt.as_ref() {
        Some(mqtt) => {
            log::info!(
                "publishing gestures to {} on {}:{}",
                mqtt.gesture_topic,
                mqtt.host,
                mqtt.port
            );
            Some(GesturePublisher::new(MqttSink::connect(mqtt)?))
        }
        None => {
            log::warn!("MQTT_HOST not set, gestures will not be published");
            None
        }
    };

    let (uploads, upload_rx) = LatestFrame::new();
    let packets = SharedPacket::new();
    let _worker = start_worker(
        engine,
        upload_rx,
        packets.clone(),
        publisher,
        config.jpeg_quality,
    )?;

    let state = AppState {
        uploads,
        packets,
        stream_interval: config.stream_interval,
    };
    actix_web::rt::System::new()
        .block_on(run_server(config.bind, state))
        .context("HTTP server failed")?;

    log::info!("server stopped");
    Ok(())
}
