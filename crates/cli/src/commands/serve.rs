use anyhow::{Context, Result};
use searchd::{Node, config::Config};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Run a node until ctrl-c
pub async fn cmd_serve(config: Config) -> Result<()> {
  info!("Starting searchd node");
  let node = Node::build(config).await;
  node
    .run(CancellationToken::new())
    .await
    .context("Failed to run node")?;
  Ok(())
}
