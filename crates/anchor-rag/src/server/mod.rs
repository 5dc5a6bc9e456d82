//! HTTP server assembly

pub mod routes;
pub mod state;

use axum::Router;
use std::net::SocketAddr;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::config::AppConfig;
use crate::error::{Error, Result};
use state::AppState;

/// QA backend HTTP server.
pub struct Server {
    config: AppConfig,
    state: AppState,
}

impl Server {
    pub fn new(config: AppConfig) -> Result<Self> {
        let state = AppState::new(config.clone())?;
        Ok(Self { config, state })
    }

    fn build_router(&self) -> Router {
        let mut router = routes::routes(self.config.ingest.max_upload_bytes())
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http());

        if self.config.server.enable_cors {
            let cors = CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any);
            router = router.layer(cors);
        }
        router
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.config.server.host, self.config.server.port)
    }

    pub async fn start(self) -> Result<()> {
        let addr: SocketAddr = self
            .address()
            .parse()
            .map_err(|e| Error::Config(format!("invalid listen address: {}", e)))?;
        let router = self.build_router();

        tracing::info!("listening on http://{}", addr);
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Config(format!("failed to bind {}: {}", addr, e)))?;
        axum::serve(listener, router)
            .await
            .map_err(|e| Error::internal(format!("server error: {}", e)))?;
        Ok(())
    }
}
