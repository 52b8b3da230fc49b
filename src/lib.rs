pub mod buffer;
pub mod config;
pub mod node;

use self::{config::Config, node::Node};

/// In order to let the integration tests directly use the ring-node crate
/// and start a node, a function is opened to replace the main function to
/// directly run the state machine to completion.
pub async fn startup(config: &Config) -> anyhow::Result<()> {
    let node = Node::bootstrap(config).await?;
    node.run().await
}
