mod message;
mod state;
mod subscriber;
mod supervisor;

pub use message::InboundMessage;
pub use state::ConnectionState;
pub use subscriber::{qos_from_level, MqttError, MqttSubscriber, MqttSubscriberConfig};
pub use supervisor::{ReconnectPolicy, ReconnectSupervisor, SupervisorAction};

// Downstream crates configure the subscription QoS without depending on the
// client library directly
pub use rumqttc::QoS;
