// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The HTTP API: data queries and writes, policy management and ad-hoc
//! queries over the v1 REST surface.

pub mod error;
mod handlers;
pub mod input;
pub mod routing;
pub mod shaper;
pub mod types;

use crate::policy::PolicyManager;
use crate::storage::Store;

use std::any::Any;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

use error::ApiError;

/// State shared by all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub policies: Arc<PolicyManager>,
}

fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    tracing::warn!(panic = detail, "recovered from panic while handling request");
    ApiError::Internal("internal error".to_string()).into_response()
}

pub fn router(state: AppState) -> Router {
    let data = get(handlers::get_data)
        .post(handlers::post_data)
        .put(handlers::put_data)
        .patch(handlers::patch_data)
        .delete(handlers::delete_data);

    Router::new()
        .route("/", get(handlers::index))
        .route("/health", get(handlers::health))
        .route("/v1/data", data.clone())
        .route("/v1/data/*path", data.clone())
        .route("/data", data.clone())
        .route("/data/*path", data)
        .route("/v1/policies", get(handlers::list_policies))
        .route(
            "/v1/policies/*id",
            get(handlers::get_policy)
                .put(handlers::put_policy)
                .delete(handlers::delete_policy),
        )
        .route("/policies", get(handlers::list_policies))
        .route(
            "/policies/*id",
            get(handlers::get_policy)
                .put(handlers::put_policy)
                .delete(handlers::delete_policy),
        )
        .route("/v1/query", get(handlers::query))
        .route("/query", get(handlers::query))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Policy decision server.
pub struct Server {
    state: AppState,
    listen_addr: SocketAddr,
}

impl Server {
    /// Create a server around a prepared store. Modules found in
    /// `policy_dir` are installed before the server starts; with
    /// `persist_policies` set, policy changes are written back to it.
    pub fn new(
        store: Arc<dyn Store>,
        listen_addr: SocketAddr,
        policy_dir: Option<PathBuf>,
        persist_policies: bool,
    ) -> Result<Server> {
        let policies = PolicyManager::open(policy_dir.as_deref(), persist_policies)?;
        Ok(Server {
            state: AppState {
                store,
                policies: Arc::new(policies),
            },
            listen_addr,
        })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn router(&self) -> Router {
        router(self.state.clone())
    }

    /// Serve requests until Ctrl+C or SIGTERM.
    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(self.listen_addr)
            .await
            .with_context(|| format!("binding {}", self.listen_addr))?;
        tracing::info!(addr = %self.listen_addr, "regoserve listening");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("serving requests")?;

        tracing::info!("regoserve shut down");
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
