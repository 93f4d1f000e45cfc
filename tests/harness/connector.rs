//! In-memory connector running the test server logic on `tokio::io::duplex`.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{DuplexStream, duplex};

use wsload::{Connector, Result, Target};

use super::server::{Behavior, ServerStats, serve};

/// Each `connect` spawns a fresh server task on the far end of a pipe.
#[derive(Clone)]
pub struct DuplexConnector {
    behavior: Behavior,
    pub stats: Arc<ServerStats>,
}

impl DuplexConnector {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            stats: Arc::new(ServerStats::default()),
        }
    }
}

#[async_trait]
impl Connector for DuplexConnector {
    type Stream = DuplexStream;

    async fn connect(&self, _target: &Target) -> Result<DuplexStream> {
        let (client, server) = duplex(64 * 1024);
        let behavior = self.behavior.clone();
        let stats = Arc::clone(&self.stats);
        tokio::spawn(async move {
            let _ = serve(server, behavior, stats).await;
        });
        Ok(client)
    }
}
