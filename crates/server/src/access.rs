//! Admin authorization by connecting address.

use crate::error::{ApiError, ApiResult};
use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use ipnet::IpNet;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

/// A parsed allow-list entry (either an IP or CIDR range).
#[derive(Clone, Debug)]
enum AllowedEntry {
    Ip(IpAddr),
    Cidr(IpNet),
}

impl AllowedEntry {
    fn matches(&self, ip: IpAddr) -> bool {
        match self {
            Self::Ip(allowed) => *allowed == ip,
            Self::Cidr(net) => net.contains(&ip),
        }
    }
}

/// Source addresses allowed to purge and to call admin endpoints.
#[derive(Clone, Debug)]
pub struct AdminAccess {
    entries: Vec<AllowedEntry>,
}

impl AdminAccess {
    pub fn from_config(addresses: &[String]) -> Self {
        let entries = addresses
            .iter()
            .filter_map(|entry| {
                let bare = entry.trim().trim_start_matches('[').trim_end_matches(']');
                if bare.contains('/') {
                    match bare.parse::<IpNet>() {
                        Ok(net) => Some(AllowedEntry::Cidr(net)),
                        Err(e) => {
                            tracing::warn!("Invalid CIDR in admin allowed_addresses: '{}': {}", entry, e);
                            None
                        }
                    }
                } else {
                    match bare.parse::<IpAddr>() {
                        Ok(ip) => Some(AllowedEntry::Ip(ip)),
                        Err(e) => {
                            tracing::warn!("Invalid IP in admin allowed_addresses: '{}': {}", entry, e);
                            None
                        }
                    }
                }
            })
            .collect();
        Self { entries }
    }

    /// Whether `ip` may act as an admin. IPv4-mapped IPv6 addresses are
    /// compared as IPv4.
    pub fn is_allowed(&self, ip: IpAddr) -> bool {
        let ip = ip.to_canonical();
        self.entries.iter().any(|entry| entry.matches(ip))
    }

    /// Check a caller. A request without connection info is refused.
    pub fn authorize(&self, client: Option<SocketAddr>) -> ApiResult<()> {
        match client {
            Some(addr) if self.is_allowed(addr.ip()) => Ok(()),
            Some(addr) => {
                tracing::warn!(client = %addr, "Rejected admin request");
                Err(ApiError::Unauthorized(format!(
                    "{} is not an admin address",
                    addr.ip()
                )))
            }
            None => Err(ApiError::Unauthorized(
                "client address unavailable".to_string(),
            )),
        }
    }
}

/// Connecting address of a request, as recorded by `ConnectInfo`.
pub fn client_addr(req: &Request) -> Option<SocketAddr> {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0)
}

/// Middleware guarding the admin routes.
pub async fn require_admin(
    State(access): State<Arc<AdminAccess>>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    access.authorize(client_addr(&req))?;
    Ok(next.run(req).await)
}
