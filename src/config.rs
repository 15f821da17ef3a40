//! Daemon configuration.
//!
//! Sources, lowest precedence first: built-in defaults, the file named by
//! `PERIMETER_CONFIG` (JSON, or TOML when the path ends in `.toml`), then
//! individual environment variables. The result is validated before use.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::actuator::DEFAULT_PULSE;
use crate::api::DEFAULT_API_ADDR;
use crate::detect::DEFAULT_CONFIDENCE_FLOOR;
use crate::processor::{ProcessorConfig, DEFAULT_VISION_PERSISTENCE};
use crate::seismic::{BandPass, DEFAULT_SEISMIC_PERSISTENCE};
use crate::status::{Location, DEFAULT_SENSITIVITY};
use crate::transport::{parse_mqtt_endpoint, MqttSettings, TlsMaterials, DEFAULT_TOPIC};

const DEFAULT_CAMERA_SOURCE: &str = "0";
const DEFAULT_CAMERA_WIDTH: u32 = 640;
const DEFAULT_CAMERA_HEIGHT: u32 = 480;
const DEFAULT_MQTT_BROKER: &str = "localhost";
const DEFAULT_MQTT_PORT: u16 = 1883;
const DEFAULT_SAMPLING_RATE: f64 = 100.0;
const DEFAULT_LOWCUT: f64 = 2.0;
const DEFAULT_HIGHCUT: f64 = 15.0;
const DEFAULT_FILTER_ORDER: u32 = 5;
const DEFAULT_BUZZER_PIN: u32 = 18;

#[derive(Debug, Deserialize, Default)]
struct GuardConfigFile {
    api_addr: Option<String>,
    sensitivity: Option<f64>,
    camera: Option<CameraConfigFile>,
    mqtt: Option<MqttConfigFile>,
    seismic: Option<SeismicConfigFile>,
    vision: Option<VisionConfigFile>,
    alarm: Option<AlarmConfigFile>,
    location: Option<LocationConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    source: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct MqttConfigFile {
    broker: Option<String>,
    port: Option<u16>,
    topic: Option<String>,
    client_id: Option<String>,
    username: Option<String>,
    password: Option<String>,
    use_tls: Option<bool>,
    ca_path: Option<PathBuf>,
    client_cert_path: Option<PathBuf>,
    client_key_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct SeismicConfigFile {
    sampling_rate: Option<f64>,
    lowcut: Option<f64>,
    highcut: Option<f64>,
    order: Option<u32>,
    persistence_threshold: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct VisionConfigFile {
    persistence_threshold: Option<u32>,
    confidence_floor: Option<f32>,
    model_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct AlarmConfigFile {
    buzzer_pin: Option<u32>,
    pulse_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct LocationConfigFile {
    name: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct GuardConfig {
    pub api_addr: String,
    pub sensitivity: f64,
    pub camera: CameraSettings,
    pub mqtt: MqttConfig,
    pub seismic: SeismicSettings,
    pub vision: VisionSettings,
    pub alarm: AlarmSettings,
    pub location: Location,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub source: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub broker: String,
    pub port: u16,
    pub topic: String,
    pub client_id: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub use_tls: bool,
    pub ca_path: Option<PathBuf>,
    pub client_cert_path: Option<PathBuf>,
    pub client_key_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct SeismicSettings {
    pub sampling_rate: f64,
    pub lowcut: f64,
    pub highcut: f64,
    pub order: u32,
    pub persistence_threshold: u32,
}

#[derive(Debug, Clone)]
pub struct VisionSettings {
    pub persistence_threshold: u32,
    pub confidence_floor: f32,
    /// ONNX model for the tract backend. Without one the simulated detector runs.
    pub model_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct AlarmSettings {
    pub buzzer_pin: u32,
    pub pulse: Duration,
}

impl GuardConfig {
    pub fn load() -> Result<Self> {
        let config_path = env_value("PERIMETER_CONFIG").map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Like [`GuardConfig::load`] with an explicit config file.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self> {
        let file_cfg = match config_path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: GuardConfigFile) -> Self {
        let camera = file.camera.unwrap_or_default();
        let mqtt = file.mqtt.unwrap_or_default();
        let seismic = file.seismic.unwrap_or_default();
        let vision = file.vision.unwrap_or_default();
        let alarm = file.alarm.unwrap_or_default();
        let location = file.location.unwrap_or_default();
        let default_location = Location::default();

        Self {
            api_addr: file
                .api_addr
                .unwrap_or_else(|| DEFAULT_API_ADDR.to_string()),
            sensitivity: file.sensitivity.unwrap_or(DEFAULT_SENSITIVITY),
            camera: CameraSettings {
                source: camera
                    .source
                    .unwrap_or_else(|| DEFAULT_CAMERA_SOURCE.to_string()),
                width: camera.width.unwrap_or(DEFAULT_CAMERA_WIDTH),
                height: camera.height.unwrap_or(DEFAULT_CAMERA_HEIGHT),
            },
            mqtt: MqttConfig {
                broker: mqtt
                    .broker
                    .unwrap_or_else(|| DEFAULT_MQTT_BROKER.to_string()),
                port: mqtt.port.unwrap_or(DEFAULT_MQTT_PORT),
                topic: mqtt.topic.unwrap_or_else(|| DEFAULT_TOPIC.to_string()),
                client_id: mqtt.client_id,
                username: mqtt.username,
                password: mqtt.password,
                use_tls: mqtt.use_tls.unwrap_or(false),
                ca_path: mqtt.ca_path,
                client_cert_path: mqtt.client_cert_path,
                client_key_path: mqtt.client_key_path,
            },
            seismic: SeismicSettings {
                sampling_rate: seismic.sampling_rate.unwrap_or(DEFAULT_SAMPLING_RATE),
                lowcut: seismic.lowcut.unwrap_or(DEFAULT_LOWCUT),
                highcut: seismic.highcut.unwrap_or(DEFAULT_HIGHCUT),
                order: seismic.order.unwrap_or(DEFAULT_FILTER_ORDER),
                persistence_threshold: seismic
                    .persistence_threshold
                    .unwrap_or(DEFAULT_SEISMIC_PERSISTENCE),
            },
            vision: VisionSettings {
                persistence_threshold: vision
                    .persistence_threshold
                    .unwrap_or(DEFAULT_VISION_PERSISTENCE),
                confidence_floor: vision.confidence_floor.unwrap_or(DEFAULT_CONFIDENCE_FLOOR),
                model_path: vision.model_path,
            },
            alarm: AlarmSettings {
                buzzer_pin: alarm.buzzer_pin.unwrap_or(DEFAULT_BUZZER_PIN),
                pulse: alarm
                    .pulse_ms
                    .map(Duration::from_millis)
                    .unwrap_or(DEFAULT_PULSE),
            },
            location: Location {
                name: location.name.unwrap_or(default_location.name),
                latitude: location.latitude.unwrap_or(default_location.latitude),
                longitude: location.longitude.unwrap_or(default_location.longitude),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(addr) = env_value("PERIMETER_API_ADDR") {
            self.api_addr = addr;
        }
        if let Some(source) = env_value("CAMERA_SOURCE") {
            self.camera.source = source;
        }
        if let Some(broker) = env_value("MQTT_BROKER") {
            self.mqtt.broker = broker;
        }
        if let Some(port) = env_value("MQTT_PORT") {
            self.mqtt.port = port
                .parse()
                .map_err(|_| anyhow!("MQTT_PORT must be a port number"))?;
        }
        if let Some(topic) = env_value("MQTT_TOPIC") {
            self.mqtt.topic = topic;
        }
        if let Some(username) = env_value("MQTT_USERNAME") {
            self.mqtt.username = Some(username);
        }
        if let Some(password) = env_value("MQTT_PASSWORD") {
            self.mqtt.password = Some(password);
        }
        if let Some(sensitivity) = env_value("PERIMETER_SENSITIVITY") {
            self.sensitivity = sensitivity
                .parse()
                .map_err(|_| anyhow!("PERIMETER_SENSITIVITY must be a number"))?;
        }
        if let Some(threshold) = env_value("PERIMETER_PERSISTENCE_THRESHOLD") {
            self.vision.persistence_threshold = threshold
                .parse()
                .map_err(|_| anyhow!("PERIMETER_PERSISTENCE_THRESHOLD must be an integer"))?;
        }
        if let Some(pin) = env_value("PERIMETER_BUZZER_PIN") {
            self.alarm.buzzer_pin = pin
                .parse()
                .map_err(|_| anyhow!("PERIMETER_BUZZER_PIN must be a GPIO number"))?;
        }
        if let Some(path) = env_value("PERIMETER_MODEL_PATH") {
            self.vision.model_path = Some(PathBuf::from(path));
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=100.0).contains(&self.sensitivity) {
            return Err(anyhow!(
                "sensitivity must be within 0..=100, got {}",
                self.sensitivity
            ));
        }
        if self.vision.persistence_threshold == 0 {
            return Err(anyhow!("vision persistence threshold must be greater than zero"));
        }
        if self.seismic.persistence_threshold == 0 {
            return Err(anyhow!("seismic persistence threshold must be greater than zero"));
        }
        if !(0.0..=1.0).contains(&self.vision.confidence_floor) {
            return Err(anyhow!("confidence floor must be within 0..=1"));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera size must be non-zero"));
        }
        if self.mqtt.topic.trim().is_empty() {
            return Err(anyhow!("MQTT topic must not be empty"));
        }
        // Cutoff and order rules live with the filter design.
        self.band_pass()?;
        Ok(())
    }

    pub fn band_pass(&self) -> Result<BandPass> {
        BandPass::new(
            self.seismic.lowcut,
            self.seismic.highcut,
            self.seismic.sampling_rate,
            self.seismic.order,
        )
    }

    pub fn processor_config(&self) -> ProcessorConfig {
        ProcessorConfig {
            persistence_threshold: self.vision.persistence_threshold,
            confidence_floor: self.vision.confidence_floor,
            ..ProcessorConfig::default()
        }
    }

    /// Resolves the broker address and loads TLS materials.
    pub fn mqtt_settings(&self) -> Result<MqttSettings> {
        let endpoint = parse_mqtt_endpoint(&self.mqtt.broker, self.mqtt.port, self.mqtt.use_tls)?;
        let mut settings = MqttSettings::new(endpoint);
        settings.topic = self.mqtt.topic.clone();
        if let Some(client_id) = &self.mqtt.client_id {
            settings.client_id = client_id.clone();
        }
        settings.username = self.mqtt.username.clone();
        settings.password = self.mqtt.password.clone();
        settings.tls = TlsMaterials::load(
            self.mqtt.ca_path.as_deref(),
            self.mqtt.client_cert_path.as_deref(),
            self.mqtt.client_key_path.as_deref(),
        )?;
        Ok(settings)
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn read_config_file(path: &Path) -> Result<GuardConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .map_or(false, |ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
