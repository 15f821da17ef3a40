//! perimeterd - perimeter intrusion guard daemon
//!
//! This daemon:
//! 1. Captures frames and runs person detection against geofenced zones
//! 2. Subscribes to seismic sample batches over MQTT (or simulates them)
//! 3. Raises a single debounced alarm and drives the buzzer
//! 4. Serves the dashboard API and the annotated video stream

use anyhow::{anyhow, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;

use perimeter_guard::api::{ApiConfig, ApiContext, ApiServer};
use perimeter_guard::config::GuardConfig;
use perimeter_guard::transport::{MqttSubscriber, SimulatedSeismicSource, SimulatorHandle};
use perimeter_guard::{
    frame_buffer, select_actuator, ActuatorWorker, AlarmHandle, AlarmStateMachine, CaptureSource,
    Detector, FrameProcessor, IngestMode, LocationUpdate, SeismicPipeline, SimulatedDetector,
    StatusStore, SystemDevices,
};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about = "Vision + seismic perimeter intrusion guard")]
struct Args {
    /// Config file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "PERIMETER_CONFIG")]
    config: Option<PathBuf>,

    /// HTTP listen address (overrides config).
    #[arg(long)]
    api_addr: Option<String>,

    /// Initial camera source: device index, `stub://name` or http(s) URL.
    #[arg(long)]
    camera: Option<String>,

    /// Skip the broker and feed the seismic pipeline simulated batches.
    #[arg(long)]
    simulate_seismic: bool,

    /// Startup output: auto, plain or pretty.
    #[arg(long, default_value = "auto")]
    ui: ui::UiMode,
}

enum SeismicFeed {
    Live(MqttSubscriber),
    Simulated(SimulatorHandle),
}

impl SeismicFeed {
    fn stop(self) -> Result<()> {
        match self {
            Self::Live(subscriber) => subscriber.stop(),
            Self::Simulated(simulator) => simulator.stop(),
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let ui = ui::Ui::new(args.ui, std::io::stderr().is_terminal());

    let cfg = {
        let mut stage = ui.stage("Load configuration");
        let mut cfg = GuardConfig::load_from(args.config.as_deref())?;
        if let Some(addr) = &args.api_addr {
            cfg.api_addr = addr.clone();
        }
        if let Some(camera) = &args.camera {
            cfg.camera.source = camera.clone();
        }
        stage.detail(match &args.config {
            Some(path) => path.display().to_string(),
            None => "defaults + environment".to_string(),
        });
        cfg
    };

    let status = StatusStore::new(cfg.sensitivity, &cfg.camera.source);
    status.update_location(LocationUpdate {
        name: Some(cfg.location.name.clone()),
        latitude: Some(cfg.location.latitude),
        longitude: Some(cfg.location.longitude),
    });

    let (actuator_queue, actuator_worker) = {
        let mut stage = ui.stage("Initialize buzzer");
        let actuator = select_actuator(cfg.alarm.buzzer_pin);
        stage.detail(format!("{} on GPIO {}", actuator.name(), cfg.alarm.buzzer_pin));
        ActuatorWorker::spawn(actuator)
    };
    let (alarm, alarm_worker) =
        AlarmStateMachine::new(status.clone(), actuator_queue, cfg.alarm.pulse).spawn();

    let capture = {
        let mut stage = ui.stage("Open camera");
        let devices = SystemDevices {
            width: cfg.camera.width,
            height: cfg.camera.height,
        };
        let capture = Arc::new(CaptureSource::new(Box::new(devices), &cfg.camera.source));
        if capture.is_online() {
            stage.detail(capture.source().to_string());
        } else {
            stage.degraded(format!("{} offline, serving placeholder", capture.source()));
        }
        capture
    };

    let (frame_writer, frames) = frame_buffer();
    let processor = {
        let mut stage = ui.stage("Start frame processor");
        let detector = build_detector(&cfg);
        stage.detail(format!("detector {}", detector.name()));
        FrameProcessor::new(
            Arc::clone(&capture),
            detector,
            status.clone(),
            alarm.clone(),
            frame_writer,
            cfg.processor_config(),
        )
        .start()
    };

    let seismic = {
        let mut stage = ui.stage("Connect seismic feed");
        let feed = start_seismic(&cfg, &status, &alarm, args.simulate_seismic)?;
        match &feed {
            SeismicFeed::Live(_) => {
                status.set_ingest_mode(IngestMode::Live);
                stage.detail(format!("{} on {}", cfg.mqtt.topic, cfg.mqtt.broker));
            }
            SeismicFeed::Simulated(_) => {
                status.set_ingest_mode(IngestMode::Simulated);
                stage.degraded("simulated samples");
            }
        }
        feed
    };

    let api_handle = {
        let _stage = ui.stage("Start HTTP API");
        let ctx = ApiContext {
            status: status.clone(),
            alarm: alarm.clone(),
            capture: Arc::clone(&capture),
            frames,
        };
        ApiServer::new(
            ApiConfig {
                addr: cfg.api_addr.clone(),
            },
            ctx,
        )
        .spawn()?
    };
    log::info!("perimeterd running. api listening on {}", api_handle.addr);

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping...");

    api_handle.stop()?;
    seismic.stop()?;
    processor.stop()?;
    drop(alarm);
    alarm_worker.stop()?;
    actuator_worker.stop()?;
    log::info!("perimeterd stopped");
    Ok(())
}

fn start_seismic(
    cfg: &GuardConfig,
    status: &StatusStore,
    alarm: &AlarmHandle,
    force_simulated: bool,
) -> Result<SeismicFeed> {
    let pipeline = || -> Result<SeismicPipeline> {
        Ok(
            SeismicPipeline::new(Box::new(cfg.band_pass()?), status.clone(), alarm.clone())
                .with_persistence(cfg.seismic.persistence_threshold),
        )
    };
    if !force_simulated {
        let settings = cfg.mqtt_settings()?;
        match MqttSubscriber::connect(&settings, pipeline()?) {
            Ok(subscriber) => return Ok(SeismicFeed::Live(subscriber)),
            Err(err) => log::warn!(
                "MQTT unavailable ({:#}); switching seismic ingestion to simulated data",
                err
            ),
        }
    }
    let simulator = SimulatedSeismicSource::new().spawn(pipeline()?);
    Ok(SeismicFeed::Simulated(simulator))
}

#[cfg(feature = "backend-tract")]
fn build_detector(cfg: &GuardConfig) -> Box<dyn Detector> {
    if let Some(path) = &cfg.vision.model_path {
        match perimeter_guard::detect::TractDetector::new(path) {
            Ok(detector) => return Box::new(detector),
            Err(err) => log::warn!("model unavailable ({:#}); using simulated detector", err),
        }
    }
    Box::new(SimulatedDetector::new())
}

#[cfg(not(feature = "backend-tract"))]
fn build_detector(cfg: &GuardConfig) -> Box<dyn Detector> {
    if let Some(path) = &cfg.vision.model_path {
        log::warn!(
            "model {} ignored: built without the backend-tract feature",
            path.display()
        );
    }
    Box::new(SimulatedDetector::new())
}
