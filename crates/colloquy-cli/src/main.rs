//! Binary entry point for the Colloquy CLI.

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    colloquy_cli::run().await
}
