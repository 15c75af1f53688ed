use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::debug;

use crate::gate::AuthorizationGate;

/// Gate every request behind a capability token.
///
/// On success the [`AuthorizedToken`](crate::AuthorizedToken) is inserted
/// into the request extensions for the wrapped handler.
pub async fn require_token(
    State(gate): State<Arc<AuthorizationGate>>,
    mut request: Request,
    next: Next,
) -> Response {
    match gate.authorize(request.headers()).await {
        Ok(token) => {
            debug!("Authorized request with token {}", token.jti);
            request.extensions_mut().insert(token);
            next.run(request).await
        }
        Err(e) => {
            debug!("Rejected {} {}: {}", request.method(), request.uri(), e);
            e.into_response()
        }
    }
}
