pub mod health;
pub mod log_record;

pub use health::{
    BrokerHealth, BrokerLinkStatus, DiskUsage, HealthSnapshot, HealthStatus, MemoryUsage,
    ProcessUsage, SystemSample,
};
pub use log_record::{LogRecord, RecordParseError, iso_timestamp};
