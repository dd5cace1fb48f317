mod host;
mod platform;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    host::run().await
}
