//! Frame processing loop.
//!
//! One thread pulls frames from the [`CaptureSource`], runs the detector,
//! tests person boxes against the configured zones and debounces the result
//! with a [`PersistenceCounter`] before asking the alarm to trigger. Every
//! processed frame is annotated and published to the [`FrameWriter`].

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::alarm::AlarmHandle;
use crate::capture::{decode_jpeg, encode_jpeg, CaptureSource, JPEG_QUALITY};
use crate::detect::{Detector, DEFAULT_CONFIDENCE_FLOOR};
use crate::frame::FrameWriter;
use crate::overlay::{annotate, MarkedDetection};
use crate::persistence::PersistenceCounter;
use crate::status::StatusStore;
use crate::zone::first_matching_zone;
use crate::Modality;

pub const DEFAULT_VISION_PERSISTENCE: u32 = 5;

#[derive(Clone, Debug)]
pub struct ProcessorConfig {
    /// Consecutive in-zone frames required to trigger.
    pub persistence_threshold: u32,
    pub confidence_floor: f32,
    /// Pause between iterations.
    pub idle: Duration,
    /// Pause after an unexpected error.
    pub error_backoff: Duration,
    /// Pause after an undecodable frame.
    pub decode_retry: Duration,
    pub health_interval: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            persistence_threshold: DEFAULT_VISION_PERSISTENCE,
            confidence_floor: DEFAULT_CONFIDENCE_FLOOR,
            idle: Duration::from_millis(10),
            error_backoff: Duration::from_millis(500),
            decode_retry: Duration::from_millis(10),
            health_interval: Duration::from_secs(5),
        }
    }
}

/// Result of one loop iteration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    /// The captured frame could not be decoded.
    Skipped,
    Processed {
        persons: usize,
        in_zone: bool,
        /// A trigger was sent to the alarm.
        triggered: bool,
        /// Sequence number of the published frame.
        sequence: u64,
    },
}

pub struct FrameProcessor {
    capture: Arc<CaptureSource>,
    detector: Box<dyn Detector>,
    status: StatusStore,
    alarm: AlarmHandle,
    writer: FrameWriter,
    config: ProcessorConfig,
    persistence: PersistenceCounter,
    frames: u64,
}

impl FrameProcessor {
    pub fn new(
        capture: Arc<CaptureSource>,
        detector: Box<dyn Detector>,
        status: StatusStore,
        alarm: AlarmHandle,
        writer: FrameWriter,
        config: ProcessorConfig,
    ) -> Self {
        let persistence = PersistenceCounter::new(config.persistence_threshold);
        Self {
            capture,
            detector,
            status,
            alarm,
            writer,
            config,
            persistence,
            frames: 0,
        }
    }

    pub fn persistence(&self) -> &PersistenceCounter {
        &self.persistence
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames
    }

    /// Runs one iteration.
    pub fn step(&mut self) -> Result<StepOutcome> {
        let jpeg = self.capture.get_frame();
        let mut frame = match decode_jpeg(&jpeg) {
            Ok(frame) => frame,
            Err(err) => {
                log::debug!("frame decode failed: {:#}", err);
                return Ok(StepOutcome::Skipped);
            }
        };

        let detections = match self.detector.detect(&frame, self.config.confidence_floor) {
            Ok(detections) => detections,
            Err(err) => {
                log::warn!("{} detection failed: {:#}", self.detector.name(), err);
                Vec::new()
            }
        };

        let zones = self.status.zones();
        let marked: Vec<MarkedDetection<'_>> = detections
            .iter()
            .map(|detection| MarkedDetection {
                detection,
                in_zone: detection.is_person()
                    && first_matching_zone(&detection.bbox, &zones).is_some(),
            })
            .collect();
        let persons = detections.iter().filter(|d| d.is_person()).count();
        let in_zone = marked.iter().any(|m| m.in_zone);

        self.persistence.observe(in_zone);
        let mut triggered = false;
        let alarm = self.status.alarm_summary();
        if self.persistence.should_trigger(alarm) {
            log::info!(
                "person in zone for {} consecutive frames",
                self.persistence.count()
            );
            match self.alarm.trigger(Modality::Vision) {
                Ok(()) => {
                    self.persistence.triggered(alarm.1);
                    triggered = true;
                }
                Err(err) => log::error!("vision trigger not delivered: {:#}", err),
            }
        }

        annotate(&mut frame, &zones, &marked, self.status.alarm_active());
        let annotated = encode_jpeg(&frame, JPEG_QUALITY)?;
        let sequence = self.writer.publish(annotated);
        self.frames += 1;

        Ok(StepOutcome::Processed {
            persons,
            in_zone,
            triggered,
            sequence,
        })
    }

    /// Moves the loop onto its own thread.
    pub fn start(mut self) -> ProcessorHandle {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let join = std::thread::spawn(move || {
            if let Err(err) = self.detector.warm_up() {
                log::warn!("{} warm-up failed: {:#}", self.detector.name(), err);
            }
            log::info!(
                "frame processor started (detector {}, persistence {})",
                self.detector.name(),
                self.persistence.threshold()
            );
            let mut last_health_log = Instant::now();
            while flag.load(Ordering::SeqCst) {
                let pause = match self.step() {
                    Ok(StepOutcome::Skipped) => self.config.decode_retry,
                    Ok(StepOutcome::Processed { .. }) => self.config.idle,
                    Err(err) => {
                        log::error!("frame processing error: {:#}", err);
                        self.config.error_backoff
                    }
                };
                if last_health_log.elapsed() >= self.config.health_interval {
                    log::debug!(
                        "processor health: frames={} capture_online={} source={}",
                        self.frames,
                        self.capture.is_online(),
                        self.capture.source()
                    );
                    last_health_log = Instant::now();
                }
                std::thread::sleep(pause);
            }
            log::info!("frame processor stopped after {} frames", self.frames);
        });
        ProcessorHandle {
            running,
            join: Some(join),
        }
    }
}

pub struct ProcessorHandle {
    running: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ProcessorHandle {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Clears the running flag and joins the loop thread.
    pub fn stop(mut self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("frame processor thread panicked"))?;
        }
        Ok(())
    }
}
