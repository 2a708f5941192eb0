use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    ms500_provision::cli::run().await
}
