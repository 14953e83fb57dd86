//! Per-request context carried in extensions.
//!
//! The verified [`backoffice_auth::Identity`] is inserted by the auth
//! middleware; [`ClientIp`] by [`client_ip_middleware`] on every route.

use std::net::{IpAddr, SocketAddr};

use axum::extract::{ConnectInfo, Request};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;

/// Best-effort originating address of the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClientIp(pub Option<IpAddr>);

/// Priority:
/// 1. X-Forwarded-For header (first hop)
/// 2. X-Real-IP header
/// 3. socket address
pub fn client_ip_from(headers: &HeaderMap, socket: Option<SocketAddr>) -> Option<IpAddr> {
    if let Some(forwarded) = headers.get("x-forwarded-for") {
        return forwarded
            .to_str()
            .ok()
            .and_then(|s| s.split(',').next())
            .and_then(|s| s.trim().parse::<IpAddr>().ok());
    }
    if let Some(real_ip) = headers.get("x-real-ip") {
        return real_ip.to_str().ok().and_then(|s| s.trim().parse::<IpAddr>().ok());
    }
    socket.map(|addr| addr.ip())
}

pub async fn client_ip_middleware(mut request: Request, next: Next) -> Response {
    let socket = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let ip = client_ip_from(request.headers(), socket);
    request.extensions_mut().insert(ClientIp(ip));
    next.run(request).await
}
