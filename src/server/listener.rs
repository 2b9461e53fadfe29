use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::http::connection::{Connection, ServerContext};

pub async fn run(cfg: &Config, shared: Arc<ServerContext>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(&cfg.listen_addr).await?;
    info!("Listening on {}", listener.local_addr()?);
    serve(listener, shared).await
}

/// Accepts connections forever, one task per connection.
pub async fn serve(listener: TcpListener, shared: Arc<ServerContext>) -> anyhow::Result<()> {
    loop {
        let (socket, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "accept failed");
                tokio::time::sleep(Duration::from_millis(100)).await;
                continue;
            }
        };
        debug!("Accepted connection from {}", peer);
        if let Err(e) = socket.set_nodelay(true) {
            debug!(%peer, error = %e, "set_nodelay failed");
        }

        let shared = Arc::clone(&shared);
        tokio::spawn(async move {
            let release = Connection::new(socket, shared).run().await;
            debug!(%peer, ?release, "connection finished");
        });
    }
}
