use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use anyhow::{Context, Result};
use rumqttc::{Client, Event, MqttOptions, Packet, QoS};

use crate::{
    config::MqttConfig,
    error::PublishError,
    retry::{Backoff, sleep_cancellable},
    types::{GestureCategory, GestureKind},
};

const KEEP_ALIVE: Duration = Duration::from_secs(30);
const REQUEST_CAPACITY: usize = 16;

/// Somewhere gesture names can be sent.
pub trait GestureSink: Send + 'static {
    fn send(&mut self, name: &str) -> Result<(), PublishError>;
}

/// Forwards gesture changes to a sink, suppressing repeats of the last
/// published name.
pub struct GesturePublisher<S> {
    sink: S,
    last_published: Option<GestureKind>,
}

impl<S: GestureSink> GesturePublisher<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            last_published: None,
        }
    }

    pub fn last_published(&self) -> Option<GestureKind> {
        self.last_published
    }

    /// Feeds the top gesture of one frame. Returns the name that was sent, if
    /// any.
    pub fn observe(&mut self, gesture: Option<GestureCategory>) -> Option<&'static str> {
        let kind = match gesture.map(|g| g.kind) {
            Some(GestureKind::None) | None => {
                if self.last_published.take().is_some() {
                    log::debug!("gesture cleared");
                }
                return None;
            }
            Some(kind) => kind,
        };

        if self.last_published == Some(kind) {
            return None;
        }

        let name = kind.name();
        match self.sink.send(name) {
            Ok(()) => {
                log::info!("published gesture {name}");
                self.last_published = Some(kind);
                Some(name)
            }
            Err(err) => {
                log::warn!("failed to publish gesture {name}: {err}");
                None
            }
        }
    }
}

/// Broker connection driven by a background event loop thread. Dropping it
/// disconnects and joins the thread.
pub struct MqttLink {
    client: Client,
    connected: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl MqttLink {
    /// Connects in the background. `subscriptions` are (re)subscribed on every
    /// connect and incoming publishes are handed to `on_message`.
    pub fn connect<F>(cfg: &MqttConfig, subscriptions: Vec<String>, mut on_message: F) -> Result<Self>
    where
        F: FnMut(&str, &[u8]) + Send + 'static,
    {
        let mut options = MqttOptions::new(cfg.client_id.clone(), cfg.host.clone(), cfg.port);
        options.set_keep_alive(KEEP_ALIVE);
        if let Some((user, password)) = &cfg.credentials {
            options.set_credentials(user.clone(), password.clone());
        }

        let (client, mut connection) = Client::new(options, REQUEST_CAPACITY);
        let connected = Arc::new(AtomicBool::new(false));
        let stop = Arc::new(AtomicBool::new(false));

        let loop_client = client.clone();
        let loop_connected = connected.clone();
        let loop_stop = stop.clone();
        let endpoint = format!("{}:{}", cfg.host, cfg.port);

        let handle = thread::Builder::new()
            .name("mqtt-event-loop".into())
            .spawn(move || {
                let mut backoff = Backoff::default();
                for notification in connection.iter() {
                    if loop_stop.load(Ordering::Relaxed) {
                        break;
                    }
                    match notification {
                        Ok(Event::Incoming(Packet::ConnAck(_))) => {
                            log::info!("connected to MQTT broker at {endpoint}");
                            loop_connected.store(true, Ordering::SeqCst);
                            backoff.reset();
                            for topic in &subscriptions {
                                if let Err(err) = loop_client.try_subscribe(topic.as_str(), QoS::AtLeastOnce) {
                                    log::warn!("failed to subscribe to {topic}: {err}");
                                }
                            }
                        }
                        Ok(Event::Incoming(Packet::Publish(publish))) => {
                            on_message(&publish.topic, &publish.payload);
                        }
                        Ok(event) => log::trace!("mqtt event {event:?}"),
                        Err(err) => {
                            loop_connected.store(false, Ordering::SeqCst);
                            let Some(delay) = backoff.next_delay() else {
                                log::error!("giving up on MQTT broker at {endpoint}: {err}");
                                break;
                            };
                            log::warn!(
                                "MQTT connection error ({err}), retry {} in {delay:?}",
                                backoff.attempts()
                            );
                            if !sleep_cancellable(delay, &loop_stop) {
                                break;
                            }
                        }
                    }
                }
                loop_connected.store(false, Ordering::SeqCst);
                log::debug!("mqtt event loop stopped");
            })
            .context("failed to spawn MQTT event loop thread")?;

        Ok(Self {
            client,
            connected,
            stop,
            handle: Some(handle),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), PublishError> {
        if !self.is_connected() {
            return Err(PublishError::Disconnected);
        }
        self.client
            .try_publish(topic, QoS::AtLeastOnce, false, payload.to_vec())
            .map_err(|err| PublishError::Rejected(err.to_string()))
    }
}

impl Drop for MqttLink {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        let _ = self.client.try_disconnect();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Publishes gesture names to a fixed topic.
pub struct MqttSink {
    link: MqttLink,
    topic: String,
}

impl MqttSink {
    pub fn connect(cfg: &MqttConfig) -> Result<Self> {
        let link = MqttLink::connect(cfg, Vec::new(), |topic, _| {
            log::debug!("ignoring message on {topic}");
        })?;
        Ok(Self {
            link,
            topic: cfg.gesture_topic.clone(),
        })
    }
}

impl GestureSink for MqttSink {
    fn send(&mut self, name: &str) -> Result<(), PublishError> {
        self.link.publish(&self.topic, name.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingSink {
        sent: Vec<String>,
        fail: bool,
    }

    impl GestureSink for RecordingSink {
        fn send(&mut self, name: &str) -> Result<(), PublishError> {
            if self.fail {
                return Err(PublishError::Disconnected);
            }
            self.sent.push(name.to_string());
            Ok(())
        }
    }

    fn category(kind: GestureKind) -> Option<GestureCategory> {
        Some(GestureCategory { kind, score: 0.9 })
    }

    #[test]
    fn test_repeats_are_suppressed() {
        let mut publisher = GesturePublisher::new(RecordingSink::default());
        assert_eq!(publisher.observe(category(GestureKind::ThumbUp)), Some("Thumb_Up"));
        assert_eq!(publisher.observe(category(GestureKind::ThumbUp)), None);
        assert_eq!(publisher.observe(category(GestureKind::Victory)), Some("Victory"));
        assert_eq!(publisher.observe(category(GestureKind::ThumbUp)), Some("Thumb_Up"));
        assert_eq!(publisher.sink.sent, vec!["Thumb_Up", "Victory", "Thumb_Up"]);
    }

    #[test]
    fn test_empty_frame_resets_without_publishing() {
        let mut publisher = GesturePublisher::new(RecordingSink::default());
        publisher.observe(category(GestureKind::ThumbUp));

        assert_eq!(publisher.observe(None), None);
        assert_eq!(publisher.last_published(), None);
        assert_eq!(publisher.observe(category(GestureKind::None)), None);

        // Same gesture after a gap is published again.
        assert_eq!(publisher.observe(category(GestureKind::ThumbUp)), Some("Thumb_Up"));
        assert_eq!(publisher.sink.sent, vec!["Thumb_Up", "Thumb_Up"]);
    }

    #[test]
    fn test_failed_send_is_retried_next_frame() {
        let mut publisher = GesturePublisher::new(RecordingSink {
            fail: true,
            ..Default::default()
        });
        assert_eq!(publisher.observe(category(GestureKind::OpenPalm)), None);
        assert_eq!(publisher.last_published(), None);

        publisher.sink.fail = false;
        assert_eq!(publisher.observe(category(GestureKind::OpenPalm)), Some("Open_Palm"));
        assert_eq!(publisher.last_published(), Some(GestureKind::OpenPalm));
    }
}
