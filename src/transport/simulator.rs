//! Stand-in seismic feed used when no broker is reachable.

use anyhow::{anyhow, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::SampleSink;

pub const SIMULATOR_INTERVAL: Duration = Duration::from_secs(2);
const BATCH_LEN: usize = 10;
const SPIKE_PROBABILITY: f64 = 0.01;
const SPIKE: f64 = 8.0;

/// One batch of background vibration, occasionally with a footfall spike.
///
/// Every sample is `0.1 + 0.05 * frac(elapsed_s)`. With probability 1% one
/// random sample gets `+8.0`.
pub fn simulated_batch<R: Rng>(rng: &mut R, elapsed_s: f64) -> Vec<f64> {
    let base = 0.1 + 0.05 * elapsed_s.rem_euclid(1.0);
    let mut batch = vec![base; BATCH_LEN];
    if rng.gen_bool(SPIKE_PROBABILITY) {
        let at = rng.gen_range(0..BATCH_LEN);
        batch[at] += SPIKE;
        log::info!("simulator: injecting test seismic spike");
    }
    batch
}

pub struct SimulatedSeismicSource {
    rng: StdRng,
    interval: Duration,
}

impl Default for SimulatedSeismicSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedSeismicSource {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
            interval: SIMULATOR_INTERVAL,
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            interval: SIMULATOR_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Encoded like a broker message so the sink sees one format.
    pub fn next_payload(&mut self, elapsed_s: f64) -> Vec<u8> {
        let batch = simulated_batch(&mut self.rng, elapsed_s);
        match serde_json::to_vec(&serde_json::json!({ "data": batch })) {
            Ok(payload) => payload,
            Err(err) => {
                log::warn!("simulator payload encoding failed: {}", err);
                Vec::new()
            }
        }
    }

    pub fn spawn<S>(mut self, mut sink: S) -> SimulatorHandle
    where
        S: SampleSink + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let join = std::thread::spawn(move || {
            log::warn!(
                "seismic ingestion running on simulated data (every {:?})",
                self.interval
            );
            sink.on_connect();
            let started = Instant::now();
            while flag.load(Ordering::SeqCst) {
                let payload = self.next_payload(started.elapsed().as_secs_f64());
                sink.on_payload(&payload);
                if !super::sleep_while_running(&flag, self.interval) {
                    break;
                }
            }
            log::debug!("seismic simulator stopped");
        });
        SimulatorHandle {
            running,
            join: Some(join),
        }
    }
}

pub struct SimulatorHandle {
    running: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl SimulatorHandle {
    pub fn stop(mut self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("seismic simulator thread panicked"))?;
        }
        Ok(())
    }
}
