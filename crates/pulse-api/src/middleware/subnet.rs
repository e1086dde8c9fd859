//! Trusted-subnet enforcement.

use std::net::IpAddr;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use ipnet::IpNet;
use tracing::{error, warn};

/// Header carrying the caller's address on HTTP.
pub const REAL_IP_HEADER: &str = "X-Real-IP";

/// Which callers may push metrics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustedSubnet {
    /// No subnet configured.
    Any,
    Only(IpNet),
    /// The configured CIDR did not parse; every caller is refused.
    Nothing(String),
}

impl TrustedSubnet {
    pub fn parse(cidr: Option<&str>) -> Self {
        match cidr.map(str::trim).filter(|c| !c.is_empty()) {
            None => TrustedSubnet::Any,
            Some(cidr) => match cidr.parse::<IpNet>() {
                Ok(net) => TrustedSubnet::Only(net),
                Err(e) => {
                    error!(%cidr, error = %e, "invalid trusted subnet, rejecting all updates");
                    TrustedSubnet::Nothing(cidr.to_string())
                }
            },
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, TrustedSubnet::Any)
    }

    /// Whether `addr` may push. An unknown address is only allowed when
    /// no subnet is configured.
    pub fn allows(&self, addr: Option<IpAddr>) -> bool {
        match self {
            TrustedSubnet::Any => true,
            TrustedSubnet::Only(net) => addr.is_some_and(|a| net.contains(&a.to_canonical())),
            TrustedSubnet::Nothing(_) => false,
        }
    }
}

/// Reject requests whose `X-Real-IP` is missing, unparsable or outside
/// the trusted subnet.
pub async fn enforce_subnet(
    State(subnet): State<Arc<TrustedSubnet>>,
    req: Request,
    next: Next,
) -> Response {
    if subnet.is_open() {
        return next.run(req).await;
    }

    let addr = req
        .headers()
        .get(REAL_IP_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<IpAddr>().ok());

    if subnet.allows(addr) {
        next.run(req).await
    } else {
        warn!(addr = ?addr, uri = %req.uri(), "caller outside trusted subnet");
        (StatusCode::FORBIDDEN, "caller is not in the trusted subnet").into_response()
    }
}
