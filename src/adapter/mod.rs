pub mod amqp;
pub mod file_sink;
pub mod sysinfo_probe;

pub use amqp::AmqpClient;
pub use file_sink::FileSink;
pub use sysinfo_probe::SysinfoProbe;
