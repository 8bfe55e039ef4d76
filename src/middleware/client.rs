use std::{convert::Infallible, net::IpAddr};

use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap},
};

use crate::models::auth::ClientInfo;

/// Real client IP from proxy headers.
/// Priority: X-Real-IP (set by the reverse proxy) then the first X-Forwarded-For entry.
/// Values that do not parse as an address are ignored.
pub fn client_ip(headers: &HeaderMap) -> Option<String> {
    let parse = |v: &str| v.trim().parse::<IpAddr>().ok();
    headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .and_then(parse)
        .or_else(|| {
            headers
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .and_then(|xff| xff.split(',').next())
                .and_then(parse)
        })
        .map(|ip| ip.to_string())
}

impl<S> FromRequestParts<S> for ClientInfo
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(ClientInfo {
            ip: client_ip(&parts.headers),
            user_agent: parts
                .headers
                .get(header::USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .map(|ua| ua.chars().take(512).collect()),
        })
    }
}
