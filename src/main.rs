#[tokio::main]
async fn main() -> anyhow::Result<()> {
    claimflow_rust::run().await
}
