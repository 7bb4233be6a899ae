//! Client address resolution.
//!
//! The socket peer is the client unless it is a configured proxy. Only then
//! are `x-forwarded-for` and `x-real-ip` consulted, walking the forwarded chain
//! from the right and skipping proxy hops.

use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequestParts, Request, State},
    http::{request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use ipnetwork::IpNetwork;
use std::{
    convert::Infallible,
    fmt,
    net::{IpAddr, SocketAddr},
    str::FromStr,
    sync::Arc,
};
use tracing::debug;

pub use crate::rate_limit::UNKNOWN_CLIENT;

/// Networks whose forwarding headers are believed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrustedProxies(Vec<IpNetwork>);

impl TrustedProxies {
    #[must_use]
    pub fn new(networks: Vec<IpNetwork>) -> Self {
        Self(networks)
    }

    #[must_use]
    pub fn contains(&self, ip: IpAddr) -> bool {
        self.0.iter().any(|network| network.contains(ip))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for TrustedProxies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("none");
        }
        let networks: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        f.write_str(&networks.join(","))
    }
}

impl FromStr for TrustedProxies {
    type Err = String;

    /// Comma separated addresses or CIDR blocks; empty means trust nobody.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        value
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| {
                entry
                    .parse::<IpNetwork>()
                    .map_err(|err| format!("invalid trusted proxy {entry}: {err}"))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }
}

/// Resolved client address, set on every request by [`resolve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIp(pub String);

impl ClientIp {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `None` for the unknown stand-in, so it never lands in stored rows.
    #[must_use]
    pub fn known(&self) -> Option<String> {
        (self.0 != UNKNOWN_CLIENT).then(|| self.0.clone())
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for ClientIp {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<Self>()
            .cloned()
            .unwrap_or_else(|| Self(UNKNOWN_CLIENT.to_string())))
    }
}

/// Pick the client address for a request that arrived from `peer`.
#[must_use]
pub fn client_ip(peer: Option<IpAddr>, headers: &HeaderMap, trusted: &TrustedProxies) -> String {
    let Some(peer) = peer else {
        return UNKNOWN_CLIENT.to_string();
    };
    if !trusted.contains(peer) {
        return peer.to_string();
    }

    forwarded_client(headers, trusted)
        .or_else(|| header_ip(headers, "x-real-ip"))
        .unwrap_or(peer)
        .to_string()
}

// Rightmost hop that is not a proxy; the leftmost entry when every hop is.
fn forwarded_client(headers: &HeaderMap, trusted: &TrustedProxies) -> Option<IpAddr> {
    let hops: Vec<IpAddr> = headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|hop| hop.trim().parse::<IpAddr>().ok())
        .collect();

    hops.iter()
        .rev()
        .find(|hop| !trusted.contains(**hop))
        .or_else(|| hops.first())
        .copied()
}

fn header_ip(headers: &HeaderMap, name: &str) -> Option<IpAddr> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
}

/// Attach a [`ClientIp`] to the request from the socket peer and, behind a
/// trusted proxy, the forwarding headers.
pub async fn resolve(
    State(trusted): State<Arc<TrustedProxies>>,
    mut request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let ip = client_ip(peer, request.headers(), &trusted);
    if peer.is_none() {
        debug!("no peer address on request, using shared window");
    }
    request.extensions_mut().insert(ClientIp(ip));
    next.run(request).await
}
