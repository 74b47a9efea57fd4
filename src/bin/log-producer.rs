use anyhow::Context;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rask_log_queue::app::run_producer()
        .await
        .context("log producer terminated")
}
