use bytes::Bytes;
use rumqttc::QoS;

/// One inbound broker delivery, handed from the subscriber to the ingestion
/// loop through the bounded intake channel.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    /// Broker redelivery hint. Not authoritative; the content-derived dedup
    /// key is the guard that actually prevents duplicate rows.
    pub duplicate: bool,
}
