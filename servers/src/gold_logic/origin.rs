//! Cross-origin policy: a `CorsLayer` built from the allow-list, plus a guard
//! that turns away any request carrying a foreign `Origin` header, including
//! WebSocket upgrades that CORS alone never blocks.

use axum::{
    extract::{Request, State},
    http::{HeaderValue, Method, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};

#[derive(Debug, Clone)]
pub struct OriginPolicy {
    allowed: Vec<String>,
}

impl OriginPolicy {
    pub fn new(allowed: Vec<String>) -> Self {
        Self { allowed }
    }

    /// Requests without an `Origin` header are same-origin or server-to-server.
    pub fn allows(&self, origin: Option<&str>) -> bool {
        match origin {
            None => true,
            Some(origin) => {
                let origin = origin.trim_end_matches('/');
                self.allowed.iter().any(|allowed| allowed.eq_ignore_ascii_case(origin))
            }
        }
    }

    pub fn cors_layer(&self) -> CorsLayer {
        let origins: Vec<HeaderValue> = self
            .allowed
            .iter()
            .filter_map(|origin| match HeaderValue::from_str(origin) {
                Ok(value) => Some(value),
                Err(_) => {
                    log::warn!("Ignoring malformed allowed origin: {}", origin);
                    None
                }
            })
            .collect();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::GET, Method::POST])
    }
}

pub async fn origin_guard(State(policy): State<Arc<OriginPolicy>>, request: Request, next: Next) -> Response {
    let origin = request.headers().get(header::ORIGIN);
    let allowed = match origin {
        None => true,
        Some(value) => value.to_str().map(|o| policy.allows(Some(o))).unwrap_or(false),
    };

    if allowed {
        next.run(request).await
    } else {
        log::warn!("Rejected request from disallowed origin {:?} to {}", origin, request.uri().path());
        (StatusCode::FORBIDDEN, "Origin not allowed").into_response()
    }
}
