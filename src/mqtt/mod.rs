//! MQTT 3.1.1 client stack.
//!
//! ```text
//!   Connector ──▶ Transport ──▶ codec ──▶ MqttSession ──▶ ConnectionSupervisor ──▶ listeners
//! ```

pub mod client;
pub mod codec;
pub mod supervisor;
pub mod transport;

pub use supervisor::{ConnectionState, ConnectionSupervisor, MessageListener, SupervisorStats};
pub use transport::{Connector, Endpoint, ReadMode, Transport};
