use anyhow::Context;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rask_log_queue::app::run_consumer()
        .await
        .context("log consumer terminated")
}
