use std::sync::Arc;

use conduit::config::Config;
use conduit::http::BoxFuture;
use conduit::http::connection::ServerContext;
use conduit::http::date::CachedDate;
use conduit::http::handler::Handler;
use conduit::http::middleware::{AccessLog, MiddlewareChain};
use conduit::http::request::Request;
use conduit::http::response::Response;
use conduit::server;
use tracing_subscriber::EnvFilter;

/// Answers every request with a small JSON document describing it.
struct ServiceInfo {
    name: String,
}

impl Handler for ServiceInfo {
    fn handle<'a>(&'a self, req: &'a Request, res: &'a mut Response) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            res.set_header("Content-Type", "application/json");
            res.json = Some(serde_json::json!({
                "Name": self.name,
                "Method": req.method.as_str(),
                "Path": req.path(),
            }));
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_level(true)
        .init();

    let cfg = Config::load()?;

    let date = Arc::new(CachedDate::new());
    let refresher = date.spawn_refresher(cfg.date_refresh());

    let shared = Arc::new(
        ServerContext::new(ServiceInfo {
            name: cfg.server_name.clone(),
        })
        .server_name(cfg.server_name.clone())
        .date(date)
        .middlewares(MiddlewareChain::new().with(AccessLog))
        .idle_timeout(cfg.idle_timeout())
        .max_request_bytes(cfg.max_request_bytes),
    );

    tokio::select! {
        res = server::listener::run(&cfg, shared) => {
            res?;
        }

        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    refresher.abort();
    Ok(())
}
