use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::{Builder, NamedTempFile};

use perimeter_guard::config::GuardConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "PERIMETER_CONFIG",
        "PERIMETER_API_ADDR",
        "CAMERA_SOURCE",
        "MQTT_BROKER",
        "MQTT_PORT",
        "MQTT_TOPIC",
        "MQTT_USERNAME",
        "MQTT_PASSWORD",
        "PERIMETER_SENSITIVITY",
        "PERIMETER_PERSISTENCE_THRESHOLD",
        "PERIMETER_BUZZER_PIN",
        "PERIMETER_MODEL_PATH",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn defaults_without_file_or_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = GuardConfig::load().expect("load defaults");
    assert_eq!(cfg.api_addr, "0.0.0.0:5000");
    assert_eq!(cfg.camera.source, "0");
    assert_eq!(cfg.mqtt.broker, "localhost");
    assert_eq!(cfg.mqtt.port, 1883);
    assert_eq!(cfg.mqtt.topic, "seismic/data");
    assert_eq!(cfg.sensitivity, 50.0);
    assert_eq!(cfg.vision.persistence_threshold, 5);
    assert_eq!(cfg.vision.confidence_floor, 0.5);
    assert_eq!(cfg.seismic.persistence_threshold, 1);
    assert_eq!(cfg.seismic.sampling_rate, 100.0);
    assert_eq!((cfg.seismic.lowcut, cfg.seismic.highcut), (2.0, 15.0));
    assert_eq!(cfg.seismic.order, 5);
    assert_eq!(cfg.alarm.buzzer_pin, 18);
    assert_eq!(cfg.alarm.pulse, Duration::from_secs(1));
    assert_eq!(cfg.location.name, "Construction Site Alpha");

    let mqtt = cfg.mqtt_settings().expect("mqtt settings");
    assert_eq!(mqtt.endpoint.to_string(), "mqtt://localhost:1883");
}

#[test]
fn loads_json_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "api_addr": "127.0.0.1:5050",
        "sensitivity": 70,
        "camera": { "source": "stub://gate", "width": 320, "height": 240 },
        "mqtt": { "broker": "mqtts://broker.local:8883", "topic": "site/seismic" },
        "seismic": { "lowcut": 1.0, "highcut": 20.0, "order": 4, "persistence_threshold": 2 },
        "vision": { "persistence_threshold": 3 },
        "alarm": { "pulse_ms": 250 },
        "location": { "name": "North Gate", "latitude": 52.1 }
    }"#;
    file.write_all(json.as_bytes()).expect("write config");

    std::env::set_var("PERIMETER_CONFIG", file.path());
    std::env::set_var("CAMERA_SOURCE", "2");
    std::env::set_var("PERIMETER_PERSISTENCE_THRESHOLD", "7");
    std::env::set_var("MQTT_TOPIC", "  ");

    let cfg = GuardConfig::load().expect("load config");
    assert_eq!(cfg.api_addr, "127.0.0.1:5050");
    assert_eq!(cfg.sensitivity, 70.0);
    assert_eq!(cfg.camera.source, "2");
    assert_eq!((cfg.camera.width, cfg.camera.height), (320, 240));
    assert_eq!(cfg.mqtt.topic, "site/seismic");
    assert_eq!(cfg.seismic.order, 4);
    assert_eq!(cfg.seismic.persistence_threshold, 2);
    assert_eq!(cfg.vision.persistence_threshold, 7);
    assert_eq!(cfg.alarm.pulse, Duration::from_millis(250));
    assert_eq!(cfg.location.name, "North Gate");
    assert_eq!(cfg.location.latitude, 52.1);
    assert_eq!(cfg.location.longitude, 0.0);

    let mqtt = cfg.mqtt_settings().expect("mqtt settings");
    assert!(mqtt.endpoint.use_tls);
    assert_eq!(mqtt.endpoint.port, 8883);
    assert_eq!(cfg.processor_config().persistence_threshold, 7);

    clear_env();
}

#[test]
fn loads_toml_by_extension() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new().suffix(".toml").tempfile().expect("temp config");
    let toml = r#"
sensitivity = 35.0

[mqtt]
broker = "10.0.0.5"
port = 1884

[alarm]
buzzer_pin = 23
"#;
    file.write_all(toml.as_bytes()).expect("write config");

    let cfg = GuardConfig::load_from(Some(file.path())).expect("load toml");
    assert_eq!(cfg.sensitivity, 35.0);
    assert_eq!(cfg.mqtt.broker, "10.0.0.5");
    assert_eq!(cfg.mqtt.port, 1884);
    assert_eq!(cfg.alarm.buzzer_pin, 23);
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("PERIMETER_SENSITIVITY", "150");
    assert!(GuardConfig::load().is_err());
    std::env::set_var("PERIMETER_SENSITIVITY", "loud");
    assert!(GuardConfig::load().is_err());
    clear_env();

    std::env::set_var("PERIMETER_PERSISTENCE_THRESHOLD", "0");
    assert!(GuardConfig::load().is_err());
    clear_env();

    std::env::set_var("MQTT_PORT", "99999");
    assert!(GuardConfig::load().is_err());
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    file.write_all(br#"{ "seismic": { "lowcut": 20.0, "highcut": 15.0 } }"#)
        .expect("write config");
    let err = GuardConfig::load_from(Some(file.path())).unwrap_err();
    assert!(err.to_string().contains("cutoff") || err.to_string().contains("lowcut"));

    let err = GuardConfig::load_from(Some(std::path::Path::new("/nonexistent/perimeter.json")))
        .unwrap_err();
    assert!(err.to_string().contains("failed to read config file"));
}
