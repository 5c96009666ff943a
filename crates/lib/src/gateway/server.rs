//! Gateway HTTP server (single port).

use crate::channels::{Activity, ChannelSink, SinkEvent};
use crate::config::{self, Config};
use crate::llm::AzureOpenAiClient;
use crate::turn::TurnHandler;
use anyhow::{Context, Result};
use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Buffered sink events per turn before the relay waits on the client.
const SINK_CAPACITY: usize = 64;

/// Shared state for the gateway: immutable after startup.
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<Config>,
    pub handler: Arc<TurnHandler>,
    /// When Some, `/api/messages` must carry `Authorization: Bearer <token>` matching this.
    pub required_token: Option<String>,
    pub sink_timeout: Duration,
}

impl GatewayState {
    pub fn new(config: Config, handler: TurnHandler) -> Self {
        Self::new_with(config, handler, &|name| std::env::var(name).ok())
    }

    /// Like [`GatewayState::new`], resolving RELAY_GATEWAY_TOKEN through `lookup`.
    pub fn new_with(
        config: Config,
        handler: TurnHandler,
        lookup: &dyn Fn(&str) -> Option<String>,
    ) -> Self {
        let required_token = if config.gateway.auth.mode == config::GatewayAuthMode::Token {
            config::resolve_gateway_token_with(&config, lookup)
        } else {
            None
        };
        let sink_timeout = Duration::from_secs(config.gateway.sink_timeout_secs.max(1));
        Self {
            config: Arc::new(config),
            handler: Arc::new(handler),
            required_token,
            sink_timeout,
        }
    }
}

/// Build the turn handler from config: resolves upstream settings (fatal when incomplete) and
/// the tenant allow-list.
pub fn build_handler(config: &Config) -> Result<TurnHandler> {
    build_handler_with(config, &|name| std::env::var(name).ok())
}

/// Like [`build_handler`], reading the AZURE_OPENAI_*, ALLOWED_TENANTS and REQUIRE_TENANT_ID
/// overrides through `lookup` instead of the process environment.
pub fn build_handler_with(
    config: &Config,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Result<TurnHandler> {
    let upstream =
        config::resolve_upstream_with(config, lookup).context("upstream configuration")?;
    log::info!(
        "upstream: deployment {} at {}",
        upstream.deployment,
        upstream.endpoint
    );
    let tenants = config::resolve_tenants_with(config, lookup);
    if tenants.allow_list.is_empty() {
        log::info!("tenant allow-list empty: every tenant may use the bot");
    } else {
        log::info!(
            "tenant allow-list active with {} tenant(s), missing tenant ids: {:?}",
            tenants.allow_list.ids().len(),
            tenants.missing_tenant
        );
    }
    let backend = AzureOpenAiClient::new(upstream).context("building upstream client")?;
    Ok(TurnHandler::new(
        tenants,
        Arc::new(backend),
        config.stream.into(),
    ))
}

pub fn app(state: GatewayState) -> Router {
    Router::new()
        .route("/", get(health_http))
        .route("/api/messages", post(api_messages))
        .with_state(state)
}

/// Run the gateway server; binds to config.gateway.bind:config.gateway.port.
/// When bind is not loopback, a gateway token must be configured or startup fails.
/// Missing upstream settings are fatal. Blocks until shutdown (Ctrl+C / SIGTERM).
pub async fn run_gateway(config: Config) -> Result<()> {
    run_gateway_with(config, &|name| std::env::var(name).ok()).await
}

/// Like [`run_gateway`], resolving environment overrides through `lookup`.
pub async fn run_gateway_with(
    config: Config,
    lookup: &(dyn Fn(&str) -> Option<String> + Sync),
) -> Result<()> {
    let bind = config.gateway.bind.trim().to_string();
    if !config::is_loopback_bind(&bind) {
        let token = config::resolve_gateway_token_with(&config, lookup);
        if token.is_none() || config.gateway.auth.mode != config::GatewayAuthMode::Token {
            anyhow::bail!(
                "refusing to bind gateway to {} without auth (set gateway.auth.mode to \"token\" and gateway.auth.token or RELAY_GATEWAY_TOKEN)",
                bind
            );
        }
    }
    let handler = build_handler_with(&config, lookup)?;
    let bind_addr = format!("{}:{}", bind, config.gateway.port);
    let state = GatewayState::new_with(config, handler, lookup);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("gateway listening on {}", bind_addr);
    serve(listener, state, shutdown_signal()).await
}

/// Serve on an already bound listener until `shutdown` completes.
pub async fn serve(
    listener: tokio::net::TcpListener,
    state: GatewayState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("gateway server exited")?;
    log::info!("gateway stopped");
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::warn!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                log::warn!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, draining connections");
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
}

/// POST /api/messages: one activity in, the turn's sink events out as NDJSON.
/// The turn runs on its own task; a client that disconnects closes the sink, which ends the turn.
async fn api_messages(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Some(ref expected) = state.required_token {
        if bearer_token(&headers) != Some(expected.as_str()) {
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }
    let activity: Activity = match serde_json::from_slice(&body) {
        Ok(a) => a,
        Err(e) => {
            log::debug!("api/messages: invalid activity: {}", e);
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    let (sink, rx) = ChannelSink::channel(SINK_CAPACITY, state.sink_timeout);
    let handler = state.handler.clone();
    tokio::spawn(async move {
        let outcome = handler.handle_activity(&activity, Arc::new(sink)).await;
        log::debug!("turn finished: {:?}", outcome);
    });

    let lines = futures_util::stream::unfold(rx, |mut rx| async move {
        loop {
            let event = rx.recv().await?;
            match ndjson_line(&event) {
                Some(line) => return Some((Ok::<_, std::convert::Infallible>(line), rx)),
                None => log::warn!("api/messages: dropping unserializable event {:?}", event),
            }
        }
    });
    (
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(lines),
    )
        .into_response()
}

fn ndjson_line(event: &SinkEvent) -> Option<String> {
    let mut line = serde_json::to_string(event).ok()?;
    line.push('\n');
    Some(line)
}

/// GET / returns a simple health JSON (for probes).
async fn health_http(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    Json(json!({
        "runtime": "running",
        "port": state.config.gateway.port,
        "tenantMode": if state.handler.is_restricted() { "restricted" } else { "open" },
    }))
}
