//! Seismic sample subscription over MQTT v5.

use anyhow::{anyhow, Context, Result};
use rumqttc::v5::{mqttbytes::QoS, Client, Connection, Event, Incoming, MqttOptions};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use super::endpoint::{build_transport, MqttEndpoint, TlsMaterials};
use super::SampleSink;

pub const DEFAULT_TOPIC: &str = "seismic/data";
pub const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const KEEP_ALIVE: Duration = Duration::from_secs(60);

#[derive(Clone, Debug)]
pub struct MqttSettings {
    pub endpoint: MqttEndpoint,
    pub topic: String,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub tls: TlsMaterials,
    /// How long to wait for the first ConnAck.
    pub connect_timeout: Duration,
}

impl MqttSettings {
    pub fn new(endpoint: MqttEndpoint) -> Self {
        Self {
            endpoint,
            topic: DEFAULT_TOPIC.to_string(),
            client_id: format!("perimeterd-{}", std::process::id()),
            username: None,
            password: None,
            tls: TlsMaterials::default(),
            connect_timeout: CONNECT_TIMEOUT,
        }
    }

    fn options(&self) -> Result<MqttOptions> {
        let mut options = MqttOptions::new(&self.client_id, &self.endpoint.host, self.endpoint.port);
        options.set_keep_alive(KEEP_ALIVE);
        options.set_clean_start(true);
        if let Some(user) = &self.username {
            options.set_credentials(user, self.password.clone().unwrap_or_default());
        }
        options.set_transport(build_transport(&self.endpoint, &self.tls)?);
        Ok(options)
    }
}

/// Running subscription. Messages go to the sink on the connection thread.
pub struct MqttSubscriber {
    client: Client,
    running: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl MqttSubscriber {
    /// Connects and subscribes. Fails if the broker does not acknowledge the
    /// connection within `connect_timeout`; after that the subscriber
    /// reconnects on its own.
    pub fn connect<S>(settings: &MqttSettings, sink: S) -> Result<Self>
    where
        S: SampleSink + 'static,
    {
        let options = settings.options()?;
        let (client, connection) = Client::new(options, 10);
        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = mpsc::channel();

        let join = {
            let client = client.clone();
            let running = Arc::clone(&running);
            let topic = settings.topic.clone();
            std::thread::spawn(move || {
                run_connection(connection, client, topic, sink, running, ready_tx)
            })
        };

        let first = ready_rx
            .recv_timeout(settings.connect_timeout)
            .map_err(|_| anyhow!("no ConnAck from {} within {:?}", settings.endpoint, settings.connect_timeout))
            .and_then(|ready| ready);
        let subscriber = Self {
            client,
            running,
            join: Some(join),
        };
        match first {
            Ok(()) => {
                log::info!(
                    "connected to MQTT broker {} (topic {})",
                    settings.endpoint,
                    settings.topic
                );
                Ok(subscriber)
            }
            Err(err) => {
                if let Err(stop_err) = subscriber.stop() {
                    log::debug!("MQTT teardown after failed connect: {:#}", stop_err);
                }
                Err(err)
            }
        }
    }

    pub fn stop(mut self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        if let Err(err) = self.client.disconnect() {
            log::debug!("MQTT disconnect: {}", err);
        }
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("MQTT connection thread panicked"))?;
        }
        Ok(())
    }
}

fn run_connection<S: SampleSink>(
    mut connection: Connection,
    client: Client,
    topic: String,
    mut sink: S,
    running: Arc<AtomicBool>,
    ready: mpsc::Sender<Result<()>>,
) {
    let mut ready = Some(ready);
    for event in connection.iter() {
        if !running.load(Ordering::SeqCst) {
            break;
        }
        match event {
            Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                if let Err(err) = client
                    .try_subscribe(topic.as_str(), QoS::AtMostOnce)
                    .context("subscribe")
                {
                    log::error!("MQTT subscribe to {} failed: {:#}", topic, err);
                } else {
                    log::info!("subscribed to {}", topic);
                }
                sink.on_connect();
                if let Some(tx) = ready.take() {
                    let _ = tx.send(Ok(()));
                }
            }
            Ok(Event::Incoming(Incoming::Publish(publish))) => {
                sink.on_payload(&publish.payload);
            }
            Ok(_) => {}
            Err(err) => {
                if let Some(tx) = ready.take() {
                    let _ = tx.send(Err(anyhow!("MQTT connection failed: {}", err)));
                    break;
                }
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                log::error!(
                    "MQTT connection error: {}. Reconnecting in {:?}",
                    err,
                    RECONNECT_BACKOFF
                );
                if !super::sleep_while_running(&running, RECONNECT_BACKOFF) {
                    break;
                }
            }
        }
    }
    log::debug!("MQTT connection thread stopped");
}
