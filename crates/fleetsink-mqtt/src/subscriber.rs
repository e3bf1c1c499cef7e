use crate::message::InboundMessage;
use crate::supervisor::{ReconnectPolicy, ReconnectSupervisor, SupervisorAction};
use rumqttc::{
    AsyncClient, ConnAck, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions,
    Outgoing, Packet, Publish, QoS, SubAck, SubscribeReasonCode,
};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

const DEFAULT_MQTT_PORT: u16 = 1883;

/// Capacity of the rumqttc request channel. Inbound flow control happens at
/// the intake channel, not here.
const REQUEST_CHANNEL_CAPACITY: usize = 10;

/// How long to keep flushing the event loop after disconnect is requested
const SHUTDOWN_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum MqttError {
    #[error("invalid broker URL `{0}`")]
    InvalidBrokerUrl(String),

    #[error("invalid QoS level {0}, expected 0, 1 or 2")]
    InvalidQosLevel(u8),

    #[error("broker refused the connection: {0}")]
    ConnectionRefused(String),

    #[error("failed to establish broker connection: {0}")]
    ConnectFailed(rumqttc::ConnectionError),

    #[error("broker rejected subscription to `{0}`")]
    SubscribeRejected(String),

    #[error("reconnect attempts exhausted after {0} attempts")]
    ReconnectExhausted(u32),

    #[error("mqtt client request failed: {0}")]
    Client(#[from] rumqttc::ClientError),

    #[error("intake channel closed by the consumer")]
    IntakeClosed,
}

#[derive(Debug, Clone)]
pub struct MqttSubscriberConfig {
    /// `mqtt://host:port`, `tcp://host:port` or `host:port`; port defaults
    /// to 1883
    pub broker_url: String,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub topic: String,
    pub qos: QoS,
    pub keep_alive: Duration,
    pub reconnect: ReconnectPolicy,
}

/// Map a numeric QoS level from configuration to the client's QoS type
pub fn qos_from_level(level: u8) -> Result<QoS, MqttError> {
    match level {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(MqttError::InvalidQosLevel(other)),
    }
}

/// What the event handler decided about the pipeline's lifecycle
enum Flow {
    Continue,
    Shutdown,
}

/// Owns the broker connection lifecycle: connect, subscribe, receive,
/// unsubscribe, disconnect.
///
/// Inbound publishes are forwarded into a bounded intake channel. When the
/// channel is full the event loop is not polled again until the consumer
/// drains capacity, so unacknowledged deliveries back up into the broker
/// instead of being dropped.
///
/// Errors before the first successful session are fatal and returned to the
/// caller; once a session existed, interruptions are handed to the
/// [`ReconnectSupervisor`] and recovered with backoff.
pub struct MqttSubscriber {
    client: AsyncClient,
    eventloop: EventLoop,
    intake: mpsc::Sender<InboundMessage>,
    supervisor: ReconnectSupervisor,
    config: MqttSubscriberConfig,
}

impl MqttSubscriber {
    pub fn new(
        config: MqttSubscriberConfig,
        intake: mpsc::Sender<InboundMessage>,
    ) -> Result<Self, MqttError> {
        let (host, port) = parse_broker_url(&config.broker_url)?;

        let mut options = MqttOptions::new(&config.client_id, host, port);
        options.set_keep_alive(config.keep_alive);
        options.set_clean_session(true);
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            options.set_credentials(username, password);
        }

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);
        let supervisor = ReconnectSupervisor::new(config.reconnect);

        Ok(Self {
            client,
            eventloop,
            intake,
            supervisor,
            config,
        })
    }

    /// Drive the connection until cancellation or a fatal error.
    ///
    /// On cancellation the subscriber unsubscribes, disconnects and flushes
    /// the event loop before returning.
    pub async fn run(mut self, ctx: CancellationToken) -> Result<(), MqttError> {
        info!(
            broker_url = %self.config.broker_url,
            topic = %self.config.topic,
            qos = ?self.config.qos,
            "starting MQTT subscriber"
        );
        self.supervisor.on_connecting();

        loop {
            if ctx.is_cancelled() {
                return self.shutdown().await;
            }

            tokio::select! {
                _ = ctx.cancelled() => {
                    return self.shutdown().await;
                }
                event = self.eventloop.poll() => {
                    match self.handle_event(event, &ctx).await {
                        Ok(Flow::Continue) => {}
                        Ok(Flow::Shutdown) => return self.shutdown().await,
                        Err(error) => {
                            // Best effort; the session may already be gone
                            let _ = self.client.disconnect().await;
                            return Err(error);
                        }
                    }
                }
            }
        }
    }

    async fn handle_event(
        &mut self,
        event: Result<Event, ConnectionError>,
        ctx: &CancellationToken,
    ) -> Result<Flow, MqttError> {
        match event {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => self.on_conn_ack(ack).await,
            Ok(Event::Incoming(Packet::SubAck(ack))) => self.on_sub_ack(&ack),
            Ok(Event::Incoming(Packet::Publish(publish))) => self.forward(publish, ctx).await,
            Ok(Event::Incoming(packet)) => {
                trace!(packet = ?packet, "incoming frame");
                Ok(Flow::Continue)
            }
            Ok(Event::Outgoing(_)) => Ok(Flow::Continue),
            Err(error) => self.on_connection_error(error, ctx).await,
        }
    }

    async fn on_conn_ack(&mut self, ack: ConnAck) -> Result<Flow, MqttError> {
        if ack.code != ConnectReturnCode::Success {
            error!(code = ?ack.code, "broker refused the connection");
            return Err(MqttError::ConnectionRefused(format!("{:?}", ack.code)));
        }

        let resumed = self.supervisor.on_connected() == SupervisorAction::Resubscribe;
        if resumed {
            info!(topic = %self.config.topic, "connection resumed, restoring subscription");
        } else {
            info!(
                topic = %self.config.topic,
                session_present = ack.session_present,
                "connected to MQTT broker"
            );
        }

        self.client
            .subscribe(&self.config.topic, self.config.qos)
            .await?;

        Ok(Flow::Continue)
    }

    fn on_sub_ack(&mut self, ack: &SubAck) -> Result<Flow, MqttError> {
        let rejected = ack
            .return_codes
            .iter()
            .any(|code| matches!(code, SubscribeReasonCode::Failure));

        if rejected {
            error!(topic = %self.config.topic, "broker rejected the subscription");
            return Err(MqttError::SubscribeRejected(self.config.topic.clone()));
        }

        debug!(topic = %self.config.topic, "subscription acknowledged");
        Ok(Flow::Continue)
    }

    /// Hand one publish to the ingestion loop, suspending while the intake
    /// channel is full.
    async fn forward(
        &mut self,
        publish: Publish,
        ctx: &CancellationToken,
    ) -> Result<Flow, MqttError> {
        trace!(
            topic = %publish.topic,
            payload_size = publish.payload.len(),
            duplicate = publish.dup,
            "received publish"
        );

        let topic = publish.topic.clone();
        let message = InboundMessage {
            topic: publish.topic,
            payload: publish.payload,
            qos: publish.qos,
            duplicate: publish.dup,
        };

        tokio::select! {
            // Prefer delivery: a message that still fits in the queue is
            // drained by the loop even during shutdown
            biased;
            sent = self.intake.send(message) => {
                if sent.is_err() {
                    return Err(MqttError::IntakeClosed);
                }
                Ok(Flow::Continue)
            }
            _ = ctx.cancelled() => {
                warn!(topic = %topic, "intake full at shutdown, dropping undelivered message");
                Ok(Flow::Shutdown)
            }
        }
    }

    async fn on_connection_error(
        &mut self,
        error: ConnectionError,
        ctx: &CancellationToken,
    ) -> Result<Flow, MqttError> {
        if !self.supervisor.has_connected() {
            error!(error = %error, "failed to establish broker connection");
            return Err(MqttError::ConnectFailed(error));
        }

        match self.supervisor.on_interrupted() {
            SupervisorAction::Backoff(delay) => {
                warn!(
                    error = %error,
                    attempt = self.supervisor.attempts(),
                    delay_ms = delay.as_millis() as u64,
                    "connection interrupted, backing off before reconnect"
                );
                tokio::select! {
                    _ = ctx.cancelled() => {}
                    _ = tokio::time::sleep(delay) => {}
                }
                self.supervisor.on_reconnecting();
                Ok(Flow::Continue)
            }
            SupervisorAction::GiveUp => {
                error!(
                    error = %error,
                    attempts = self.supervisor.attempts(),
                    "reconnect attempts exhausted"
                );
                Err(MqttError::ReconnectExhausted(
                    self.config.reconnect.max_attempts,
                ))
            }
            // Shutting down; the run loop handles the cancellation
            _ => Ok(Flow::Continue),
        }
    }

    async fn shutdown(mut self) -> Result<(), MqttError> {
        info!("shutting down MQTT subscriber");
        self.supervisor.on_shutdown();

        // Best effort; the broker may already be unreachable
        let _ = self.client.unsubscribe(&self.config.topic).await;
        let _ = self.client.disconnect().await;

        let deadline = tokio::time::sleep(SHUTDOWN_FLUSH_TIMEOUT);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => break,
                event = self.eventloop.poll() => match event {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        warn!(topic = %publish.topic, "dropping message received during shutdown");
                    }
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                        debug!("disconnect flushed to the broker");
                        break;
                    }
                    Ok(_) => {}
                    Err(_) => break,
                }
            }
        }

        info!("MQTT subscriber stopped");
        Ok(())
    }
}

/// Parse a broker URL in format mqtt://host:port, tcp://host:port or
/// host:port
fn parse_broker_url(url: &str) -> Result<(&str, u16), MqttError> {
    let trimmed = url.trim_start_matches("mqtt://").trim_start_matches("tcp://");

    let parts: Vec<&str> = trimmed.split(':').collect();
    match parts.len() {
        1 if !parts[0].is_empty() => Ok((parts[0], DEFAULT_MQTT_PORT)),
        2 => {
            let port = parts[1]
                .parse::<u16>()
                .map_err(|_| MqttError::InvalidBrokerUrl(url.to_string()))?;
            Ok((parts[0], port))
        }
        _ => Err(MqttError::InvalidBrokerUrl(url.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> MqttSubscriberConfig {
        MqttSubscriberConfig {
            broker_url: "mqtt://localhost:1883".to_string(),
            client_id: "fleetsink-test".to_string(),
            username: None,
            password: None,
            topic: "fleet/telemetry".to_string(),
            qos: QoS::AtLeastOnce,
            keep_alive: Duration::from_secs(30),
            reconnect: ReconnectPolicy::default(),
        }
    }

    fn test_publish(topic: &str) -> Publish {
        Publish::new(topic, QoS::AtLeastOnce, b"{}".to_vec())
    }

    #[test]
    fn test_parse_broker_url_with_port() {
        let (host, port) = parse_broker_url("mqtt://localhost:1883").unwrap();
        assert_eq!(host, "localhost");
        assert_eq!(port, 1883);
    }

    #[test]
    fn test_parse_broker_url_without_scheme() {
        let (host, port) = parse_broker_url("broker.example.com:8883").unwrap();
        assert_eq!(host, "broker.example.com");
        assert_eq!(port, 8883);
    }

    #[test]
    fn test_parse_broker_url_default_port() {
        let (host, port) = parse_broker_url("mqtt://broker.local").unwrap();
        assert_eq!(host, "broker.local");
        assert_eq!(port, 1883);
    }

    #[test]
    fn test_parse_broker_url_tcp_scheme() {
        let (host, port) = parse_broker_url("tcp://mqtt.example.com:1883").unwrap();
        assert_eq!(host, "mqtt.example.com");
        assert_eq!(port, 1883);
    }

    #[test]
    fn test_parse_broker_url_rejects_garbage() {
        assert!(parse_broker_url("mqtt://host:port:extra").is_err());
        assert!(parse_broker_url("mqtt://host:notaport").is_err());
        assert!(parse_broker_url("").is_err());
    }

    #[test]
    fn test_qos_from_level() {
        assert_eq!(qos_from_level(0).unwrap(), QoS::AtMostOnce);
        assert_eq!(qos_from_level(1).unwrap(), QoS::AtLeastOnce);
        assert_eq!(qos_from_level(2).unwrap(), QoS::ExactlyOnce);
        assert!(matches!(qos_from_level(3), Err(MqttError::InvalidQosLevel(3))));
    }

    #[tokio::test]
    async fn test_forward_suspends_while_intake_is_full() {
        let (tx, mut rx) = mpsc::channel::<InboundMessage>(1);
        let mut subscriber = MqttSubscriber::new(test_config(), tx).unwrap();
        let ctx = CancellationToken::new();

        // First message fills the only slot
        let flow = subscriber.forward(test_publish("fleet/telemetry"), &ctx).await;
        assert!(matches!(flow, Ok(Flow::Continue)));

        // Second message must park until the consumer drains capacity
        let pending = tokio::time::timeout(
            Duration::from_millis(50),
            subscriber.forward(test_publish("fleet/telemetry"), &ctx),
        )
        .await;
        assert!(pending.is_err(), "send should block while the queue is full");

        // Drain one slot and the producer resumes
        rx.recv().await.unwrap();
        let resumed = tokio::time::timeout(
            Duration::from_millis(50),
            subscriber.forward(test_publish("fleet/telemetry"), &ctx),
        )
        .await;
        assert!(matches!(resumed, Ok(Ok(Flow::Continue))));
    }

    #[tokio::test]
    async fn test_forward_drops_explicitly_when_cancelled_while_full() {
        let (tx, _rx) = mpsc::channel::<InboundMessage>(1);
        let mut subscriber = MqttSubscriber::new(test_config(), tx).unwrap();
        let ctx = CancellationToken::new();

        subscriber
            .forward(test_publish("fleet/telemetry"), &ctx)
            .await
            .unwrap();

        ctx.cancel();
        let flow = subscriber.forward(test_publish("fleet/telemetry"), &ctx).await;
        assert!(matches!(flow, Ok(Flow::Shutdown)));
    }

    #[tokio::test]
    async fn test_forward_fails_when_consumer_is_gone() {
        let (tx, rx) = mpsc::channel::<InboundMessage>(1);
        drop(rx);
        let mut subscriber = MqttSubscriber::new(test_config(), tx).unwrap();
        let ctx = CancellationToken::new();

        let result = subscriber.forward(test_publish("fleet/telemetry"), &ctx).await;
        assert!(matches!(result, Err(MqttError::IntakeClosed)));
    }
}
