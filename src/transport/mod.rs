//! Seismic sample transports.
//!
//! Samples arrive either from an MQTT broker ([`MqttSubscriber`]) or, when the
//! broker is unreachable at startup, from [`SimulatedSeismicSource`]. Both
//! deliver raw JSON payloads to a [`SampleSink`].

mod endpoint;
mod mqtt;
mod simulator;

pub use endpoint::{build_transport, parse_mqtt_endpoint, MqttEndpoint, TlsMaterials};
pub use mqtt::{MqttSettings, MqttSubscriber, DEFAULT_TOPIC, RECONNECT_BACKOFF};
pub use simulator::{simulated_batch, SimulatedSeismicSource, SimulatorHandle};

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::seismic::SeismicPipeline;

/// Receiver of transport traffic. Called from the transport's own thread.
pub trait SampleSink: Send {
    /// The transport (re)established its connection.
    fn on_connect(&mut self) {}

    fn on_payload(&mut self, payload: &[u8]);
}

impl SampleSink for SeismicPipeline {
    fn on_connect(&mut self) {
        self.mark_connected();
    }

    fn on_payload(&mut self, payload: &[u8]) {
        self.ingest(payload);
    }
}

// Sleeps in short slices; false when `running` was cleared meanwhile.
fn sleep_while_running(running: &AtomicBool, total: Duration) -> bool {
    let deadline = Instant::now() + total;
    while running.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep((deadline - now).min(Duration::from_millis(50)));
    }
    false
}
