pub mod connector;
pub mod consumer;
pub mod health;
pub mod publisher;

pub use connector::{BrokerConnector, ConnectOutcome};
pub use consumer::{Consumer, ConsumerStats, Disposition, PREFETCH_COUNT};
pub use health::HealthAggregator;
pub use publisher::{PublishReceipt, Publisher};
