//! Alarm actuator (buzzer) and its background queue.
//!
//! Actuation never runs on a producer thread. The alarm state machine hands
//! requests to an [`ActuatorQueue`]; a single [`ActuatorWorker`] thread drains
//! it and drives the [`Actuator`]. The queue is bounded and requests that do
//! not fit are dropped with a warning.

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

pub const ACTUATOR_QUEUE_DEPTH: usize = 4;
pub const DEFAULT_PULSE: Duration = Duration::from_secs(1);

const GPIO_ROOT: &str = "/sys/class/gpio";

/// Output device driven by the alarm.
pub trait Actuator: Send + Sync {
    fn name(&self) -> &str;

    /// Switch on for `duration`, then off. Blocks for the duration.
    fn activate(&self, duration: Duration) -> Result<()>;

    fn deactivate(&self) -> Result<()>;

    /// Release the hardware. Called once at shutdown.
    fn cleanup(&self) -> Result<()> {
        self.deactivate()
    }
}

/// Stand-in used when no GPIO hardware is present. Logs and sleeps.
#[derive(Debug)]
pub struct SimulatedBuzzer {
    pin: u32,
    events: Mutex<Vec<BuzzerEvent>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuzzerEvent {
    On,
    Off,
}

impl SimulatedBuzzer {
    pub fn new(pin: u32) -> Self {
        log::warn!("GPIO not available; buzzer on pin {} runs in simulated mode", pin);
        Self {
            pin,
            events: Mutex::new(Vec::new()),
        }
    }

    /// Everything the buzzer was asked to do, oldest first.
    pub fn events(&self) -> Vec<BuzzerEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, event: BuzzerEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

impl Actuator for SimulatedBuzzer {
    fn name(&self) -> &str {
        "simulated-buzzer"
    }

    fn activate(&self, duration: Duration) -> Result<()> {
        log::info!("output [GPIO {}]: ON (buzzer activated)", self.pin);
        self.record(BuzzerEvent::On);
        std::thread::sleep(duration);
        self.record(BuzzerEvent::Off);
        log::info!("output [GPIO {}]: OFF (simulated pulse complete)", self.pin);
        Ok(())
    }

    fn deactivate(&self) -> Result<()> {
        log::info!("output [GPIO {}]: OFF", self.pin);
        self.record(BuzzerEvent::Off);
        Ok(())
    }
}

/// Buzzer on a Linux sysfs GPIO line.
#[derive(Debug)]
pub struct SysfsBuzzer {
    pin: u32,
    root: PathBuf,
    exported_here: bool,
}

impl SysfsBuzzer {
    pub fn open(pin: u32) -> Result<Self> {
        Self::open_at(Path::new(GPIO_ROOT), pin)
    }

    /// Opens `pin` under an alternative sysfs root.
    pub fn open_at(root: &Path, pin: u32) -> Result<Self> {
        if !root.join("export").exists() {
            return Err(anyhow!("{} has no GPIO export interface", root.display()));
        }
        let line = root.join(format!("gpio{}", pin));
        let exported_here = if line.exists() {
            false
        } else {
            std::fs::write(root.join("export"), pin.to_string())
                .with_context(|| format!("export GPIO {}", pin))?;
            true
        };
        std::fs::write(line.join("direction"), "out")
            .with_context(|| format!("set GPIO {} direction", pin))?;
        let buzzer = Self {
            pin,
            root: root.to_path_buf(),
            exported_here,
        };
        buzzer.write_level(false)?;
        log::info!("GPIO initialized on pin {}", pin);
        Ok(buzzer)
    }

    fn write_level(&self, high: bool) -> Result<()> {
        let value = self.root.join(format!("gpio{}", self.pin)).join("value");
        std::fs::write(&value, if high { "1" } else { "0" })
            .with_context(|| format!("write {}", value.display()))
    }
}

impl Actuator for SysfsBuzzer {
    fn name(&self) -> &str {
        "sysfs-buzzer"
    }

    fn activate(&self, duration: Duration) -> Result<()> {
        log::info!("output [GPIO {}]: ON (buzzer activated)", self.pin);
        self.write_level(true)?;
        std::thread::sleep(duration);
        let result = self.write_level(false);
        log::info!("output [GPIO {}]: OFF", self.pin);
        result
    }

    fn deactivate(&self) -> Result<()> {
        log::info!("output [GPIO {}]: OFF", self.pin);
        self.write_level(false)
    }

    fn cleanup(&self) -> Result<()> {
        self.write_level(false)?;
        if self.exported_here {
            std::fs::write(self.root.join("unexport"), self.pin.to_string())
                .with_context(|| format!("unexport GPIO {}", self.pin))?;
        }
        Ok(())
    }
}

/// Probes sysfs GPIO once and falls back to the simulated buzzer.
pub fn select_actuator(pin: u32) -> Arc<dyn Actuator> {
    match SysfsBuzzer::open(pin) {
        Ok(buzzer) => Arc::new(buzzer),
        Err(err) => {
            log::debug!("sysfs GPIO unavailable: {:#}", err);
            Arc::new(SimulatedBuzzer::new(pin))
        }
    }
}

// -------------------- Queue --------------------

#[derive(Debug)]
enum ActuatorRequest {
    Pulse(Duration),
    Deactivate,
    Shutdown,
}

/// Non-blocking producer side of the actuator queue.
#[derive(Clone, Debug)]
pub struct ActuatorQueue {
    tx: SyncSender<ActuatorRequest>,
}

impl ActuatorQueue {
    /// Queues an activation pulse. Returns `false` when the request was dropped.
    pub fn pulse(&self, duration: Duration) -> bool {
        self.offer(ActuatorRequest::Pulse(duration))
    }

    /// Queues a deactivation. Returns `false` when the request was dropped.
    pub fn deactivate(&self) -> bool {
        self.offer(ActuatorRequest::Deactivate)
    }

    fn offer(&self, request: ActuatorRequest) -> bool {
        match self.tx.try_send(request) {
            Ok(()) => true,
            Err(TrySendError::Full(request)) => {
                log::warn!("actuator queue full; dropping {:?}", request);
                false
            }
            Err(TrySendError::Disconnected(request)) => {
                log::warn!("actuator worker stopped; dropping {:?}", request);
                false
            }
        }
    }
}

/// Owns the actuator thread.
pub struct ActuatorWorker {
    tx: SyncSender<ActuatorRequest>,
    join: Option<JoinHandle<()>>,
}

impl ActuatorWorker {
    pub fn spawn(actuator: Arc<dyn Actuator>) -> (ActuatorQueue, ActuatorWorker) {
        let (tx, rx) = mpsc::sync_channel(ACTUATOR_QUEUE_DEPTH);
        let join = std::thread::spawn(move || run_actuator(actuator, rx));
        (
            ActuatorQueue { tx: tx.clone() },
            ActuatorWorker {
                tx,
                join: Some(join),
            },
        )
    }

    /// Finishes queued requests, releases the hardware and joins the thread.
    pub fn stop(mut self) -> Result<()> {
        // Blocking send: shutdown must not be dropped when the queue is full.
        let _ = self.tx.send(ActuatorRequest::Shutdown);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("actuator thread panicked"))?;
        }
        Ok(())
    }
}

fn run_actuator(actuator: Arc<dyn Actuator>, rx: Receiver<ActuatorRequest>) {
    log::debug!("actuator worker started ({})", actuator.name());
    while let Ok(request) = rx.recv() {
        let result = match request {
            ActuatorRequest::Pulse(duration) => actuator.activate(duration),
            ActuatorRequest::Deactivate => actuator.deactivate(),
            ActuatorRequest::Shutdown => break,
        };
        if let Err(err) = result {
            log::error!("actuator {} failed: {:#}", actuator.name(), err);
        }
    }
    if let Err(err) = actuator.cleanup() {
        log::warn!("actuator cleanup failed: {:#}", err);
    }
    log::debug!("actuator worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Slow {
        started: AtomicUsize,
        release: Mutex<()>,
    }

    impl Actuator for Slow {
        fn name(&self) -> &str {
            "slow"
        }

        fn activate(&self, _duration: Duration) -> Result<()> {
            self.started.fetch_add(1, Ordering::SeqCst);
            let _gate = self.release.lock().unwrap();
            Ok(())
        }

        fn deactivate(&self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn simulated_buzzer_pulses_through_queue() -> Result<()> {
        let buzzer = Arc::new(SimulatedBuzzer::new(18));
        let (queue, worker) = ActuatorWorker::spawn(buzzer.clone());
        assert!(queue.pulse(Duration::from_millis(1)));
        assert!(queue.deactivate());
        worker.stop()?;
        assert_eq!(
            buzzer.events(),
            vec![BuzzerEvent::On, BuzzerEvent::Off, BuzzerEvent::Off, BuzzerEvent::Off]
        );
        Ok(())
    }

    #[test]
    fn full_queue_drops_without_blocking() -> Result<()> {
        let slow = Arc::new(Slow {
            started: AtomicUsize::new(0),
            release: Mutex::new(()),
        });
        let gate = slow.release.lock().unwrap();
        let (queue, worker) = ActuatorWorker::spawn(slow.clone());

        assert!(queue.pulse(DEFAULT_PULSE));
        while slow.started.load(Ordering::SeqCst) == 0 {
            std::thread::sleep(Duration::from_millis(1));
        }
        for _ in 0..ACTUATOR_QUEUE_DEPTH {
            assert!(queue.pulse(DEFAULT_PULSE));
        }
        assert!(!queue.pulse(DEFAULT_PULSE));

        drop(gate);
        worker.stop()?;
        assert_eq!(slow.started.load(Ordering::SeqCst), ACTUATOR_QUEUE_DEPTH + 1);
        Ok(())
    }

    #[test]
    fn sysfs_buzzer_writes_levels() -> Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("export"), "")?;
        std::fs::write(dir.path().join("unexport"), "")?;
        std::fs::create_dir(dir.path().join("gpio18"))?;

        let buzzer = SysfsBuzzer::open_at(dir.path(), 18)?;
        let value = dir.path().join("gpio18/value");
        assert_eq!(std::fs::read_to_string(dir.path().join("gpio18/direction"))?, "out");
        buzzer.activate(Duration::from_millis(1))?;
        assert_eq!(std::fs::read_to_string(&value)?, "0");
        buzzer.cleanup()?;
        assert!(SysfsBuzzer::open_at(&dir.path().join("missing"), 18).is_err());
        Ok(())
    }
}
