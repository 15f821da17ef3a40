use anyhow::Result;
use image::RgbImage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use perimeter_guard::actuator::{ActuatorWorker, BuzzerEvent, SimulatedBuzzer};
use perimeter_guard::seismic::{BandPass, PassThrough};
use perimeter_guard::transport::SampleSink;
use perimeter_guard::{
    frame_buffer, AlarmStateMachine, BoundingBox, CaptureSource, Detection, Detector,
    FrameProcessor, IngestOutcome, Modality, ProcessorConfig, SeismicPipeline, StatusStore,
    StepOutcome, SystemDevices, ZoneShape, ZoneSpec,
};

/// Reports a person in the yard while `present` is set.
struct Intruder {
    present: Arc<AtomicBool>,
}

impl Detector for Intruder {
    fn name(&self) -> &'static str {
        "intruder"
    }

    fn detect(&mut self, _frame: &RgbImage, _floor: f32) -> Result<Vec<Detection>> {
        if self.present.load(Ordering::SeqCst) {
            Ok(vec![Detection::person(
                BoundingBox::new(60.0, 60.0, 110.0, 160.0),
                0.92,
            )])
        } else {
            Ok(Vec::new())
        }
    }
}

fn wait_until(what: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !what() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        std::thread::sleep(Duration::from_millis(2));
    }
}

fn yard_zone() -> ZoneSpec {
    ZoneSpec {
        id: Some("zone:yard".to_string()),
        shape: ZoneShape::Rect {
            x: 0.0,
            y: 0.0,
            w: 200.0,
            h: 200.0,
        },
    }
}

#[test]
fn both_modalities_share_one_alarm() -> Result<()> {
    let status = StatusStore::default();
    status.add_zone(yard_zone())?;
    let buzzer = Arc::new(SimulatedBuzzer::new(18));
    let (queue, actuator_worker) = ActuatorWorker::spawn(buzzer.clone());
    let (alarm, alarm_worker) =
        AlarmStateMachine::new(status.clone(), queue, Duration::from_millis(1)).spawn();

    let present = Arc::new(AtomicBool::new(false));
    let (writer, _frames) = frame_buffer();
    let capture = Arc::new(CaptureSource::new(
        Box::new(SystemDevices::default()),
        "stub://yard",
    ));
    let mut processor = FrameProcessor::new(
        capture,
        Box::new(Intruder {
            present: Arc::clone(&present),
        }),
        status.clone(),
        alarm.clone(),
        writer,
        ProcessorConfig::default(),
    );
    let mut seismic = SeismicPipeline::new(Box::new(PassThrough), status.clone(), alarm.clone());

    // Seismic footfall raises the alarm first.
    status.set_sensitivity(90.0);
    assert!(matches!(
        seismic.ingest(br#"{"data":[3.0, 2.0, 1.0]}"#),
        IngestOutcome::Footfall { triggered: true, .. }
    ));
    wait_until(|| status.alarm_active());

    // A confirmed vision intrusion while active changes nothing.
    present.store(true, Ordering::SeqCst);
    for _ in 0..6 {
        processor.step()?;
    }
    assert_eq!(status.intrusion_count(), 1);
    assert_eq!(
        status.snapshot().last_event.map(|e| e.modality),
        Some(Modality::Seismic)
    );

    // Silence leaves the vision counter alone: the next in-zone frame re-raises.
    alarm.silence()?;
    wait_until(|| !status.alarm_active());
    assert!(processor.persistence().reached());
    assert!(matches!(
        processor.step()?,
        StepOutcome::Processed { triggered: true, .. }
    ));
    wait_until(|| status.intrusion_count() == 2);
    let last = status.snapshot().last_event.expect("last event");
    assert_eq!(last.modality, Modality::Vision);
    assert!(last.description.starts_with("Intrusion (Vision) @ "));

    alarm_worker.stop()?;
    actuator_worker.stop()?;
    let pulses = buzzer
        .events()
        .iter()
        .filter(|e| **e == BuzzerEvent::On)
        .count();
    assert_eq!(pulses, 2);
    Ok(())
}

#[test]
fn status_never_shows_half_applied_trigger() -> Result<()> {
    let status = StatusStore::default();
    let (queue, actuator_worker) = ActuatorWorker::spawn(Arc::new(SimulatedBuzzer::new(18)));
    let (alarm, alarm_worker) =
        AlarmStateMachine::new(status.clone(), queue, Duration::from_millis(1)).spawn();

    let done = Arc::new(AtomicBool::new(false));
    let reader = {
        let status = status.clone();
        let done = Arc::clone(&done);
        std::thread::spawn(move || {
            while !done.load(Ordering::SeqCst) {
                let snap = status.snapshot();
                if snap.alarm_active {
                    assert!(snap.intrusion_count > 0);
                    assert!(snap.last_event.is_some());
                }
                if snap.intrusion_count > 0 {
                    assert!(snap.last_event.is_some());
                }
            }
        })
    };

    for _ in 0..50 {
        alarm.trigger(Modality::Vision)?;
        alarm.trigger(Modality::Seismic)?;
        alarm.silence()?;
    }
    alarm_worker.stop()?;
    done.store(true, Ordering::SeqCst);
    reader.join().expect("reader thread");
    assert_eq!(status.intrusion_count(), 50);
    assert!(!status.alarm_active());
    actuator_worker.stop()
}

#[test]
fn band_passed_footfall_reaches_alarm_through_sink() -> Result<()> {
    let status = StatusStore::default();
    status.set_sensitivity(100.0);
    let (queue, actuator_worker) = ActuatorWorker::spawn(Arc::new(SimulatedBuzzer::new(18)));
    let (alarm, alarm_worker) =
        AlarmStateMachine::new(status.clone(), queue, Duration::from_millis(1)).spawn();

    let mut pipeline = SeismicPipeline::new(
        Box::new(BandPass::new(2.0, 15.0, 100.0, 5)?),
        status.clone(),
        alarm,
    );
    pipeline.on_connect();
    assert!(status.connected());

    // 8 Hz burst sits inside the pass band.
    let burst: Vec<String> = (0..100)
        .map(|i| format!("{:.4}", 4.0 * (2.0 * std::f64::consts::PI * 8.0 * i as f64 / 100.0).sin()))
        .collect();
    let payload = format!(r#"{{"data":[{}]}}"#, burst.join(","));
    pipeline.on_payload(payload.as_bytes());
    wait_until(|| status.alarm_active());
    assert_eq!(
        status.snapshot().last_event.map(|e| e.modality),
        Some(Modality::Seismic)
    );

    alarm_worker.stop()?;
    actuator_worker.stop()
}
