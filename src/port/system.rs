use crate::domain::SystemSample;
use futures::future::BoxFuture;

/// Reads memory, disk and process usage from the host at call time.
pub trait SystemProbe: Send + Sync {
    fn sample(&self) -> BoxFuture<'_, SystemSample>;
}
