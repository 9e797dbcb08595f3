use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use rumqttc::{ConnectionError, Event, MqttOptions, Outgoing, Packet, QoS, SubscribeFilter};
use tokio::sync::mpsc;

use crate::{config, messages::RawMessage};

const DEFAULT_TOPICS: [&str; 2] = ["sensors/Doorbell", "sensors/Button"];
const RECONNECT_DELAY: Duration = Duration::from_secs(1);
const DISCONNECT_TIMEOUT: Duration = Duration::from_millis(250);

/// Callbacks for connection state changes, passed to [`MqttClient::new`].
pub trait ConnectionHooks: Send + Sync {
    fn on_connect(&self) {}
    fn on_connection_lost(&self, _err: &ConnectionError) {}
}

pub struct LogHooks;

impl ConnectionHooks for LogHooks {
    fn on_connect(&self) {
        info!("Connected");
    }

    fn on_connection_lost(&self, err: &ConnectionError) {
        warn!("Connection lost: {}", err);
    }
}

#[derive(Clone)]
pub struct MqttClient {
    client: rumqttc::AsyncClient,
    topics: Vec<String>,
    hooks: Arc<dyn ConnectionHooks>,
}

const CLIENT_ID_PREFIX: &str = "doorbell-rs";

/// Unique per host so several doorbells can share one broker.
fn default_client_id() -> String {
    client_id_for(gethostname::gethostname().to_str())
}

fn client_id_for(hostname: Option<&str>) -> String {
    match hostname.map(str::trim) {
        Some(hostname) if !hostname.is_empty() => format!("{CLIENT_ID_PREFIX}-{hostname}"),
        _ => CLIENT_ID_PREFIX.to_string(),
    }
}

impl MqttClient {
    pub fn new(
        config: &config::MqttConfig,
        hooks: Arc<dyn ConnectionHooks>,
    ) -> (Self, rumqttc::EventLoop) {
        let client_id = config.client_id.clone().unwrap_or_else(default_client_id);
        info!("Using client ID: {}", client_id);

        let mut mqttoptions =
            MqttOptions::new(client_id, config.host.clone(), config.port.unwrap_or(1883));

        mqttoptions.set_keep_alive(Duration::from_secs(config.keep_alive_seconds.unwrap_or(5)));

        if let (Some(username), Some(password)) =
            (config.username.as_ref(), config.password.as_ref())
        {
            mqttoptions.set_credentials(username.clone(), password.clone());
        }

        let (client, eventloop) = rumqttc::AsyncClient::new(mqttoptions, 10);

        let topics = config
            .topics
            .clone()
            .unwrap_or_else(|| DEFAULT_TOPICS.iter().map(|t| t.to_string()).collect());

        (
            MqttClient {
                client,
                topics,
                hooks,
            },
            eventloop,
        )
    }

    pub async fn subscribe(&self) -> Result<(), rumqttc::ClientError> {
        self.client
            .subscribe_many(
                self.topics
                    .iter()
                    .map(|topic| SubscribeFilter::new(topic.clone(), QoS::AtLeastOnce)),
            )
            .await?;

        info!("Subscribed to topics: {}", self.topics.join(", "));
        Ok(())
    }

    /// Polls until the broker accepts the connection. The first error is
    /// returned instead of retried.
    pub async fn wait_for_connection(
        &self,
        eventloop: &mut rumqttc::EventLoop,
    ) -> anyhow::Result<()> {
        loop {
            match eventloop.poll().await? {
                Event::Incoming(Packet::ConnAck(_)) => {
                    self.subscribe().await?;
                    self.hooks.on_connect();
                    return Ok(());
                }
                other => debug!("Waiting for connection: {:?}", other),
            }
        }
    }

    /// Forwards every publish into `tx` untouched until `shutdown` resolves or
    /// the receiving side goes away. Dropping `tx` on return closes the stream.
    pub async fn forward(
        &self,
        eventloop: &mut rumqttc::EventLoop,
        tx: mpsc::Sender<RawMessage>,
        shutdown: impl Future<Output = ()>,
    ) {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutting down MQTT client");
                    self.disconnect(eventloop).await;
                    break;
                }
                notification = eventloop.poll() => match notification {
                    Ok(event) => {
                        if let Some(msg) = inbound_message(&event) {
                            if tx.send(msg).await.is_err() {
                                debug!("Inbound receiver closed");
                                break;
                            }
                            continue;
                        }
                        match event {
                            Event::Incoming(Packet::SubAck(_)) => {
                                debug!("Subscription acknowledged");
                            }
                            Event::Incoming(Packet::ConnAck(_)) => {
                                debug!("Connection acknowledged");
                                if let Err(err) = self.subscribe().await {
                                    error!("Error subscribing to MQTT topics: {:?}", err);
                                }
                                self.hooks.on_connect();
                            }
                            _ => {}
                        }
                    }
                    Err(err) => {
                        self.hooks.on_connection_lost(&err);
                        tokio::time::sleep(RECONNECT_DELAY).await;
                    }
                },
            }
        }
    }

    async fn disconnect(&self, eventloop: &mut rumqttc::EventLoop) {
        debug!("Disconnecting MQTT client");
        if let Err(err) = self.client.disconnect().await {
            error!("Error requesting MQTT disconnect: {:?}", err);
            return;
        }

        let flushed = tokio::time::timeout(DISCONNECT_TIMEOUT, async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        })
        .await;

        if flushed.is_err() {
            warn!("Timed out waiting for MQTT disconnect");
        }
    }
}

fn inbound_message(event: &Event) -> Option<RawMessage> {
    match event {
        Event::Incoming(Packet::Publish(p)) => Some(RawMessage {
            topic: p.topic.clone(),
            payload: p.payload.to_vec(),
        }),
        _ => None,
    }
}
