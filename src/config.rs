use std::{fmt, net::SocketAddr, path::PathBuf, time::Duration};

use anyhow::{Context, Result};

use crate::model_download::{HANDPOSE_ESTIMATOR_MODEL_FILENAME, PALM_DETECTOR_MODEL_FILENAME};

/// Server configuration, loaded from environment variables.
#[derive(Clone, Debug)]
pub struct Config {
    /// HTTP listen address (default: 0.0.0.0:8080).
    pub bind: SocketAddr,
    pub vision: VisionConfig,
    /// JPEG quality of the annotated stream, 1-100.
    pub jpeg_quality: u8,
    /// How often `/stream` checks for a new annotated frame.
    pub stream_interval: Duration,
    /// Broker settings; `None` when `MQTT_HOST` is unset.
    pub mqtt: Option<MqttConfig>,
}

#[derive(Clone, Debug)]
pub struct VisionConfig {
    /// Directory holding the handpose and palm detector models.
    pub model_dir: PathBuf,
    /// Optional BlazeFace model; face boxes are skipped without it.
    pub face_model: Option<PathBuf>,
    /// Optional gesture classifier; the thumbs-up heuristic is used without it.
    pub gesture_model: Option<PathBuf>,
    pub max_hands: usize,
    pub min_hand_confidence: f32,
    pub min_face_confidence: f32,
}

impl VisionConfig {
    pub fn handpose_model_path(&self) -> PathBuf {
        self.model_dir.join(HANDPOSE_ESTIMATOR_MODEL_FILENAME)
    }

    pub fn palm_model_path(&self) -> PathBuf {
        self.model_dir.join(PALM_DETECTOR_MODEL_FILENAME)
    }
}

#[derive(Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub credentials: Option<(String, String)>,
    pub gesture_topic: String,
}

impl fmt::Debug for MqttConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MqttConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("client_id", &self.client_id)
            .field(
                "credentials",
                &self.credentials.as_ref().map(|(user, _)| (user, "***")),
            )
            .field("gesture_topic", &self.gesture_topic)
            .finish()
    }
}

impl MqttConfig {
    /// Reads `MQTT_*` keys; `client_id` is used when `MQTT_CLIENT_ID` is unset.
    pub fn from_lookup<F>(lookup: &F, client_id: &str) -> Option<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = lookup("MQTT_HOST").filter(|h| !h.trim().is_empty())?;
        let credentials = match (lookup("MQTT_USER"), lookup("MQTT_PASSWORD")) {
            (Some(user), Some(password)) => Some((user, password)),
            (Some(user), None) => Some((user, String::new())),
            _ => None,
        };
        Some(Self {
            host,
            port: parsed(lookup, "MQTT_PORT", 1883),
            client_id: lookup("MQTT_CLIENT_ID").unwrap_or_else(|| client_id.to_string()),
            credentials,
            gesture_topic: lookup("MQTT_GESTURE_TOPIC")
                .unwrap_or_else(|| "gestures/detected".to_string()),
        })
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bind = lookup("GESTURE_RELAY_BIND")
            .unwrap_or_else(|| "0.0.0.0:8080".to_string());
        let bind = bind
            .parse()
            .with_context(|| format!("GESTURE_RELAY_BIND is not a socket address: {bind}"))?;

        let vision = VisionConfig {
            model_dir: lookup("GESTURE_RELAY_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("models")),
            face_model: lookup("GESTURE_RELAY_FACE_MODEL").map(PathBuf::from),
            gesture_model: lookup("GESTURE_RELAY_GESTURE_MODEL").map(PathBuf::from),
            max_hands: parsed(&lookup, "GESTURE_RELAY_MAX_HANDS", 2usize).max(1),
            min_hand_confidence: parsed(&lookup, "GESTURE_RELAY_MIN_HAND_CONFIDENCE", 0.5),
            min_face_confidence: parsed(&lookup, "GESTURE_RELAY_MIN_FACE_CONFIDENCE", 0.5),
        };

        Ok(Self {
            bind,
            vision,
            jpeg_quality: parsed(&lookup, "GESTURE_RELAY_JPEG_QUALITY", 80u8).clamp(1, 100),
            stream_interval: Duration::from_millis(
                parsed(&lookup, "GESTURE_RELAY_STREAM_INTERVAL_MS", 33u64).max(1),
            ),
            mqtt: MqttConfig::from_lookup(&lookup, "gesture-relay"),
        })
    }
}

/// Camera client configuration, loaded from environment variables.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Base URL of the relay server.
    pub server_url: String,
    pub camera_index: u32,
    /// JPEG quality used when the camera does not deliver MJPEG.
    pub jpeg_quality: u8,
    /// Pause after each upload.
    pub frame_delay: Duration,
    /// Capture before any wake-up message arrives.
    pub start_active: bool,
    pub wakeup_topic: String,
    pub mqtt: Option<MqttConfig>,
}

impl ClientConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let server_url = lookup("CAMERA_CLIENT_SERVER_URL")
            .unwrap_or_else(|| "http://127.0.0.1:8080".to_string());
        Self {
            server_url: server_url.trim_end_matches('/').to_string(),
            camera_index: parsed(&lookup, "CAMERA_CLIENT_CAMERA_INDEX", 0u32),
            jpeg_quality: parsed(&lookup, "CAMERA_CLIENT_JPEG_QUALITY", 85u8).clamp(1, 100),
            frame_delay: Duration::from_millis(parsed(&lookup, "CAMERA_CLIENT_FRAME_DELAY_MS", 15u64)),
            start_active: parsed(&lookup, "CAMERA_CLIENT_START_ACTIVE", 1u8) != 0,
            wakeup_topic: lookup("MQTT_WAKEUP_TOPIC")
                .unwrap_or_else(|| "wakeup/espCamera".to_string()),
            mqtt: MqttConfig::from_lookup(&lookup, "camera-client"),
        }
    }
}

/// Parses `key`, falling back to `default` when unset or malformed.
pub fn parsed<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            log::warn!("ignoring malformed {key}={raw}");
            default
        }),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let cfg = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg.bind, "0.0.0.0:8080".parse().unwrap());
        assert_eq!(cfg.jpeg_quality, 80);
        assert_eq!(cfg.stream_interval, Duration::from_millis(33));
        assert_eq!(cfg.vision.max_hands, 2);
        assert_eq!(
            cfg.vision.palm_model_path(),
            PathBuf::from("models").join(PALM_DETECTOR_MODEL_FILENAME)
        );
        assert!(cfg.vision.face_model.is_none());
        assert!(cfg.mqtt.is_none());
    }

    #[test]
    fn test_overrides_and_clamps() {
        let cfg = Config::from_lookup(lookup(&[
            ("GESTURE_RELAY_BIND", "127.0.0.1:9000"),
            ("GESTURE_RELAY_JPEG_QUALITY", "0"),
            ("GESTURE_RELAY_MAX_HANDS", "0"),
            ("GESTURE_RELAY_MIN_HAND_CONFIDENCE", "0.7"),
            ("GESTURE_RELAY_FACE_MODEL", "/opt/face.onnx"),
        ]))
        .unwrap();
        assert_eq!(cfg.bind.port(), 9000);
        assert_eq!(cfg.jpeg_quality, 1);
        assert_eq!(cfg.vision.max_hands, 1);
        assert_eq!(cfg.vision.min_hand_confidence, 0.7);
        assert_eq!(cfg.vision.face_model, Some(PathBuf::from("/opt/face.onnx")));
    }

    #[test]
    fn test_malformed_number_falls_back() {
        let cfg = Config::from_lookup(lookup(&[("GESTURE_RELAY_MAX_HANDS", "many")])).unwrap();
        assert_eq!(cfg.vision.max_hands, 2);
    }

    #[test]
    fn test_bad_bind_address_is_an_error() {
        assert!(Config::from_lookup(lookup(&[("GESTURE_RELAY_BIND", "nowhere")])).is_err());
    }

    #[test]
    fn test_mqtt_enabled_by_host() {
        let cfg = Config::from_lookup(lookup(&[
            ("MQTT_HOST", "broker.local"),
            ("MQTT_USER", "relay"),
            ("MQTT_PASSWORD", "secret"),
        ]))
        .unwrap();
        let mqtt = cfg.mqtt.unwrap();
        assert_eq!(mqtt.host, "broker.local");
        assert_eq!(mqtt.port, 1883);
        assert_eq!(mqtt.client_id, "gesture-relay");
        assert_eq!(mqtt.gesture_topic, "gestures/detected");
        assert_eq!(
            mqtt.credentials,
            Some(("relay".to_string(), "secret".to_string()))
        );

        let blank = Config::from_lookup(lookup(&[("MQTT_HOST", "  ")])).unwrap();
        assert!(blank.mqtt.is_none());
    }

    #[test]
    fn test_debug_output_hides_password() {
        let cfg = Config::from_lookup(lookup(&[
            ("MQTT_HOST", "broker.local"),
            ("MQTT_USER", "relay"),
            ("MQTT_PASSWORD", "hunter2"),
        ]))
        .unwrap();
        let printed = format!("{cfg:?}");
        assert!(!printed.contains("hunter2"), "password in {printed}");
        assert!(printed.contains(r#"credentials: Some(("relay", "***"))"#));

        let client = ClientConfig::from_lookup(lookup(&[
            ("MQTT_HOST", "broker.local"),
            ("MQTT_USER", "cam"),
            ("MQTT_PASSWORD", "hunter2"),
        ]));
        assert!(!format!("{client:?}").contains("hunter2"));
    }

    #[test]
    fn test_client_defaults() {
        let cfg = ClientConfig::from_lookup(lookup(&[]));
        assert_eq!(cfg.server_url, "http://127.0.0.1:8080");
        assert_eq!(cfg.camera_index, 0);
        assert_eq!(cfg.jpeg_quality, 85);
        assert_eq!(cfg.frame_delay, Duration::from_millis(15));
        assert!(cfg.start_active);
        assert_eq!(cfg.wakeup_topic, "wakeup/espCamera");
        assert!(cfg.mqtt.is_none());
    }

    #[test]
    fn test_client_overrides() {
        let cfg = ClientConfig::from_lookup(lookup(&[
            ("CAMERA_CLIENT_SERVER_URL", "http://relay.local:8080/"),
            ("CAMERA_CLIENT_START_ACTIVE", "0"),
            ("MQTT_HOST", "broker.local"),
        ]));
        assert_eq!(cfg.server_url, "http://relay.local:8080");
        assert!(!cfg.start_active);
        assert_eq!(cfg.mqtt.unwrap().client_id, "camera-client");
    }
}
