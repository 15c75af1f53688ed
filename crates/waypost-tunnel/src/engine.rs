//! CONNECT handling: validate, dial, take over the connection, relay

use axum::{
    extract::{Request, State},
    http::{header, uri::Authority, Method, StatusCode},
    response::{IntoResponse, Response},
};
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use waypost_http_auth::AuthorizedToken;

use crate::error::TunnelError;
use crate::relay::relay;

#[derive(Debug, Clone)]
pub struct TunnelConfig {
    /// Upper bound on establishing the target connection
    pub dial_timeout: Duration,
    /// Copy buffer per direction
    pub buffer_size: usize,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            dial_timeout: Duration::from_secs(10),
            buffer_size: 8192,
        }
    }
}

pub struct TunnelEngine {
    config: TunnelConfig,
    active: Arc<AtomicUsize>,
    next_id: AtomicU64,
}

/// Keeps the active tunnel gauge honest on every exit path
struct ActiveTunnel(Arc<AtomicUsize>);

impl ActiveTunnel {
    fn enter(gauge: &Arc<AtomicUsize>) -> Self {
        gauge.fetch_add(1, Ordering::SeqCst);
        Self(gauge.clone())
    }
}

impl Drop for ActiveTunnel {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl TunnelEngine {
    pub fn new(config: TunnelConfig) -> Self {
        Self {
            config,
            active: Arc::new(AtomicUsize::new(0)),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn active_tunnels(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// `host:port` the client asked for: the request-target authority, or the
    /// `Host` header when the URI carries none.
    pub fn target_authority(request: &Request) -> Result<Authority, TunnelError> {
        let authority = match request.uri().authority() {
            Some(authority) => authority.clone(),
            None => request
                .headers()
                .get(header::HOST)
                .and_then(|host| host.to_str().ok())
                .filter(|host| !host.is_empty())
                .ok_or_else(|| TunnelError::BadRequest("missing target".to_string()))?
                .parse::<Authority>()
                .map_err(|e| TunnelError::BadRequest(format!("invalid target: {}", e)))?,
        };

        if authority.host().is_empty() || authority.port_u16().is_none() {
            return Err(TunnelError::BadRequest(format!(
                "target {} has no port",
                authority
            )));
        }
        Ok(authority)
    }

    /// Handle one CONNECT request.
    ///
    /// On success the 200 response is returned immediately and the relay runs
    /// in its own task once hyper hands over the raw connection.
    pub async fn handle(&self, mut request: Request) -> Result<Response, TunnelError> {
        if request.method() != Method::CONNECT {
            return Err(TunnelError::MethodNotAllowed);
        }

        let target = Self::target_authority(&request)?;
        let tunnel_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let jti = request
            .extensions()
            .get::<AuthorizedToken>()
            .map(|token| token.jti.to_string())
            .unwrap_or_default();

        let target_stream = tokio::time::timeout(
            self.config.dial_timeout,
            TcpStream::connect(target.as_str()),
        )
        .await
        .map_err(|_| TunnelError::DialFailure {
            target: target.to_string(),
            reason: "timed out".to_string(),
        })?
        .map_err(|e| TunnelError::DialFailure {
            target: target.to_string(),
            reason: e.to_string(),
        })?;

        let Some(on_upgrade) = request.extensions_mut().remove::<OnUpgrade>() else {
            // target_stream drops here, closing the dialed socket
            warn!(tunnel_id = tunnel_id, upstream = %target, "Connection does not support takeover");
            return Err(TunnelError::UpgradeUnsupported);
        };

        let guard = ActiveTunnel::enter(&self.active);
        info!(
            tunnel_id = tunnel_id,
            upstream = %target,
            jti = %jti,
            active = self.active_tunnels(),
            "Tunnel established"
        );

        let buffer_size = self.config.buffer_size;
        tokio::spawn(async move {
            let _guard = guard;
            let started = Instant::now();

            let client = match on_upgrade.await {
                Ok(upgraded) => TokioIo::new(upgraded),
                Err(e) => {
                    warn!(tunnel_id = tunnel_id, "Connection takeover failed: {}", e);
                    return;
                }
            };

            let stats = relay(client, target_stream, CancellationToken::new(), buffer_size).await;
            info!(
                tunnel_id = tunnel_id,
                upstream = %target,
                bytes_up = stats.client_to_target,
                bytes_down = stats.target_to_client,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Tunnel closed"
            );
        });

        debug!(tunnel_id = tunnel_id, "Answering CONNECT with 200");
        Ok(StatusCode::OK.into_response())
    }
}

/// axum handler serving every request through the engine.
pub async fn connect_handler(
    State(engine): State<Arc<TunnelEngine>>,
    request: Request,
) -> Response {
    match engine.handle(request).await {
        Ok(response) => response,
        Err(e) => {
            debug!("CONNECT rejected: {}", e);
            e.into_response()
        }
    }
}
