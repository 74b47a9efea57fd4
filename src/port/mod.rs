pub mod broker;
pub mod sink;
pub mod system;

pub use broker::{BrokerClient, BrokerSession, Delivery, DeliveryStream};
pub use sink::{LogSink, PersistOutcome};
pub use system::SystemProbe;
