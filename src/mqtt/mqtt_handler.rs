//! MQTT link lifecycle and the network task.
//!
//! # State Machine
//!
//! ```text
//! Configured ──connect──► Running ──disconnect──► Stopped
//! ```
//!
//! The rumqttc event loop runs in its own tokio task. It never touches
//! pipeline state; every publish and connection change is pushed into the
//! bounded handoff queue and applied by the consumer in arrival order.

use std::future::Future;
use std::time::Duration;

use rumqttc::{
    AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, Publish, QoS, SubAck,
    SubscribeReasonCode,
};
use statum::{machine, state};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::MqttConfig;
use super::message_manager::{Handoff, HandoffSender, InboundMessage};
use crate::error::{TransitionError, TransportError};

const RETRY_DELAY: Duration = Duration::from_secs(1);
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

/// Connection state as seen by the pipeline.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// The only events that move a [`ConnectionState`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionEvent {
    ConnectRequested,
    Connected,
    DisconnectRequested,
    Disconnected,
}

impl ConnectionState {
    pub fn apply(self, event: ConnectionEvent) -> Result<ConnectionState, TransitionError> {
        use ConnectionEvent as E;
        use ConnectionState as S;

        match (self, event) {
            (S::Disconnected, E::ConnectRequested) => Ok(S::Connecting),
            // rumqttc reconnects on its own after a drop.
            (S::Connecting | S::Connected | S::Disconnected, E::Connected) => Ok(S::Connected),
            (S::Connecting | S::Connected | S::Disconnected, E::DisconnectRequested) => {
                Ok(S::Disconnecting)
            }
            (_, E::Disconnected) => Ok(S::Disconnected),
            (state, event) => Err(TransitionError { state, event }),
        }
    }
}

/// Capability to publish on the transport.
pub trait Publisher: Send + Sync {
    fn publish(
        &self,
        topic: &str,
        payload: &str,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// Publisher backed by the link's rumqttc client.
#[derive(Clone, Debug)]
pub struct MqttPublisher {
    client: AsyncClient,
}

impl Publisher for MqttPublisher {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), TransportError> {
        // Never wait on the request queue: the consumer must not stall when
        // the network task is down.
        self.client
            .try_publish(topic, QoS::AtLeastOnce, false, payload.as_bytes().to_vec())
            .map_err(|e| TransportError::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }
}

#[state]
#[derive(Debug, Clone)]
pub enum LinkState {
    Configured, // Client built, event loop not yet polled
    Running,    // Network task polling the broker
    Stopped,    // Network task joined
}

#[machine]
pub struct MqttLink<S: LinkState> {
    config: MqttConfig,
    subscription: String,
    client: AsyncClient,
    eventloop: Option<EventLoop>,
    handoff: HandoffSender,
    cancel: CancellationToken,
    task: Option<JoinHandle<Result<(), TransportError>>>,
}

impl<S: LinkState> MqttLink<S> {
    pub fn publisher(&self) -> MqttPublisher {
        MqttPublisher {
            client: self.client.clone(),
        }
    }
}

impl MqttLink<Configured> {
    /// Builds the client. Nothing touches the network until [`connect`](Self::connect).
    pub fn create(config: MqttConfig, subscription: String, handoff: HandoffSender) -> Self {
        let client_id = config.client_id();
        info!(
            "Configuring MQTT link {} for {}:{}",
            client_id, config.host, config.port
        );

        let mut options = MqttOptions::new(client_id, config.host.clone(), config.port);
        // rumqttc rejects keep-alives shorter than 5 seconds.
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(5)));
        options.set_clean_session(true);
        if config.has_credentials() {
            options.set_credentials(config.username.clone(), config.password.clone());
        }

        let (client, eventloop) = AsyncClient::new(options, config.request_capacity.max(1));

        Self::new(
            config,
            subscription,
            client,
            Some(eventloop),
            handoff,
            CancellationToken::new(),
            None, // task
        )
    }

    /// Spawns the network task and transitions to Running.
    pub async fn connect(mut self) -> Result<MqttLink<Running>, TransportError> {
        let eventloop = self.eventloop.take().ok_or_else(|| TransportError::Connect {
            host: self.config.host.clone(),
            port: self.config.port,
            reason: "event loop already consumed".to_string(),
        })?;

        forward(&self.handoff, ConnectionEvent::ConnectRequested).await?;

        info!(
            "Connecting to {}:{} (subscription {})",
            self.config.host, self.config.port, self.subscription
        );
        let task = tokio::spawn(run_network_loop(
            eventloop,
            self.client.clone(),
            self.subscription.clone(),
            self.handoff.clone(),
            self.cancel.clone(),
        ));
        self.task = Some(task);
        Ok(self.transition())
    }
}

impl MqttLink<Running> {
    /// Stops the network task and reports `Disconnected` once it has exited.
    pub async fn disconnect(mut self) -> Result<MqttLink<Stopped>, TransportError> {
        info!("Disconnecting from {}:{}", self.config.host, self.config.port);
        forward(&self.handoff, ConnectionEvent::DisconnectRequested).await?;

        self.cancel.cancel();
        let outcome = match self.task.take() {
            Some(handle) => match handle.await {
                Ok(result) => result,
                Err(e) => Err(TransportError::Task(e.to_string())),
            },
            None => Ok(()),
        };
        if let Err(e) = &outcome {
            warn!("Network task ended with error: {}", e);
        }

        forward(&self.handoff, ConnectionEvent::Disconnected).await?;
        info!("Network task stopped");
        Ok(self.transition())
    }
}

async fn forward_publish(handoff: &HandoffSender, publish: Publish) -> Result<(), TransportError> {
    let message = InboundMessage::from_topic(publish.topic, publish.payload.to_vec());
    debug!("Inbound {}", message);
    handoff
        .send(Handoff::Message(message))
        .await
        .map_err(|_| TransportError::ChannelClosed)
}

fn subscription_rejected(ack: &SubAck) -> bool {
    ack.return_codes
        .iter()
        .any(|code| matches!(code, SubscribeReasonCode::Failure))
}

async fn forward(handoff: &HandoffSender, event: ConnectionEvent) -> Result<(), TransportError> {
    handoff
        .send(Handoff::Connection(event))
        .await
        .map_err(|_| TransportError::ChannelClosed)
}

/// Polls the broker until cancelled.
///
/// Transport errors are logged and reported once as `Disconnected`; rumqttc
/// reconnects on the next poll and a fresh ConnAck re-subscribes.
async fn run_network_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    subscription: String,
    handoff: HandoffSender,
    cancel: CancellationToken,
) -> Result<(), TransportError> {
    let mut reported_down = false;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Network task cancelled");
                flush_disconnect(&client, &mut eventloop, &handoff).await?;
                break;
            }

            polled = eventloop.poll() => match polled {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    info!("Broker accepted connection: {:?}", ack.code);
                    if let Err(e) = client.try_subscribe(subscription.clone(), QoS::AtMostOnce) {
                        error!(
                            "{}",
                            TransportError::Subscribe {
                                topic: subscription.clone(),
                                reason: e.to_string(),
                            }
                        );
                    }
                    reported_down = false;
                    forward(&handoff, ConnectionEvent::Connected).await?;
                }
                Ok(Event::Incoming(Packet::SubAck(ack))) if subscription_rejected(&ack) => {
                    error!(
                        "{}",
                        TransportError::Subscribe {
                            topic: subscription.clone(),
                            reason: format!("broker refused: {:?}", ack.return_codes),
                        }
                    );
                }
                Ok(Event::Incoming(Packet::SubAck(ack))) => {
                    debug!("Subscribed to {} ({:?})", subscription, ack.return_codes);
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    forward_publish(&handoff, publish).await?;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("MQTT connection error: {}", e);
                    if !reported_down {
                        reported_down = true;
                        forward(&handoff, ConnectionEvent::Disconnected).await?;
                    }
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(RETRY_DELAY) => {}
                    }
                }
            }
        }
    }

    Ok(())
}

/// Sends DISCONNECT and keeps polling until the broker closes the
/// connection, bounded by a grace period. Publishes still in flight are
/// handed off like any other.
async fn flush_disconnect(
    client: &AsyncClient,
    eventloop: &mut EventLoop,
    handoff: &HandoffSender,
) -> Result<(), TransportError> {
    if let Err(e) = client.try_disconnect() {
        warn!("{}", TransportError::Disconnect(e.to_string()));
        return Ok(());
    }

    let flush = async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    forward_publish(handoff, publish).await?;
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => debug!("DISCONNECT sent"),
                Ok(_) => {}
                Err(e) => {
                    debug!("Connection closed: {}", e);
                    return Ok::<(), TransportError>(());
                }
            }
        }
    };
    match tokio::time::timeout(DISCONNECT_GRACE, flush).await {
        Ok(result) => result,
        Err(_) => {
            warn!("Broker kept the connection open {:?} after DISCONNECT", DISCONNECT_GRACE);
            Ok(())
        }
    }
}
