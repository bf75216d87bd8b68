//! SSRF protection for callback destinations.
//!
//! A URL is safe only if it parses, uses an allowed scheme, has a host, and
//! (when private-IP blocking is on) every address its host resolves to is
//! publicly routable. Resolution failures count as unsafe.
//!
//! The callback client resolves hosts again when it connects, so
//! `PublicAddressResolver` repeats the address check at connect time.

use std::{
    error::Error as StdError,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
};

use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::{Host, Url};

use crate::error::{DeliveryError, Result};

const BLOCKED_HOSTNAMES: [&str; 5] = ["localhost", "127.0.0.1", "::1", "[::1]", "0.0.0.0"];

/// Rules applied to callback URLs before any request is made.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SsrfPolicy {
    /// Lowercase schemes callbacks may use.
    pub allowed_schemes: Vec<String>,
    /// Reject hosts resolving to private, loopback, or reserved addresses.
    pub block_private_ips: bool,
}

impl Default for SsrfPolicy {
    fn default() -> Self {
        Self {
            allowed_schemes: vec!["http".to_string(), "https".to_string()],
            block_private_ips: true,
        }
    }
}

impl SsrfPolicy {
    /// Policy that only checks scheme and host presence.
    ///
    /// Intended for local development and tests against loopback receivers.
    pub fn permissive() -> Self {
        Self { block_private_ips: false, ..Self::default() }
    }
}

/// Validates callback URLs against an `SsrfPolicy`.
#[derive(Debug, Clone, Default)]
pub struct SsrfValidator {
    policy: SsrfPolicy,
}

impl SsrfValidator {
    /// Creates a validator for the given policy.
    pub fn new(policy: SsrfPolicy) -> Self {
        Self { policy }
    }

    /// Returns the policy in force.
    pub fn policy(&self) -> &SsrfPolicy {
        &self.policy
    }

    /// Whether `url` may be contacted.
    pub async fn is_safe(&self, url: &str) -> bool {
        match self.validate(url).await {
            Ok(()) => true,
            Err(error) => {
                debug!(url, error = %error, "callback URL rejected");
                false
            },
        }
    }

    /// Checks `url`, explaining any rejection.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::SsrfBlocked` naming the first violated rule.
    pub async fn validate(&self, url: &str) -> Result<()> {
        let parsed = Url::parse(url)
            .map_err(|e| DeliveryError::ssrf_blocked(format!("invalid URL: {e}")))?;

        let scheme = parsed.scheme();
        if !self.policy.allowed_schemes.iter().any(|allowed| allowed.eq_ignore_ascii_case(scheme)) {
            return Err(DeliveryError::ssrf_blocked(format!("scheme {scheme} not allowed")));
        }

        let host = parsed.host().ok_or_else(|| DeliveryError::ssrf_blocked("URL has no host"))?;

        if !self.policy.block_private_ips {
            return Ok(());
        }

        if let Some(name) = parsed.host_str() {
            let lower = name.to_ascii_lowercase();
            if BLOCKED_HOSTNAMES.contains(&lower.as_str()) {
                return Err(DeliveryError::ssrf_blocked(format!("host {name} is blocked")));
            }
        }

        let addresses = match host {
            Host::Ipv4(v4) => vec![IpAddr::V4(v4)],
            Host::Ipv6(v6) => vec![IpAddr::V6(v6)],
            Host::Domain(domain) => {
                let port = parsed.port_or_known_default().unwrap_or(80);
                tokio::net::lookup_host((domain, port))
                    .await
                    .map_err(|e| {
                        DeliveryError::ssrf_blocked(format!("cannot resolve {domain}: {e}"))
                    })?
                    .map(|addr| addr.ip())
                    .collect()
            },
        };

        if addresses.is_empty() {
            return Err(DeliveryError::ssrf_blocked("host resolved to no addresses"));
        }

        if let Some(blocked) = addresses.iter().find(|ip| is_blocked_ip(ip)) {
            return Err(DeliveryError::ssrf_blocked(format!("address {blocked} is not public")));
        }

        Ok(())
    }
}

/// Whether `ip` is outside the publicly routable unicast space.
pub fn is_blocked_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_blocked_v4(v4),
        IpAddr::V6(v6) => is_blocked_v6(v6),
    }
}

fn is_blocked_v4(ip: &Ipv4Addr) -> bool {
    let [a, b, c, _] = ip.octets();
    ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_multicast()
        || ip.is_broadcast()
        || ip.is_unspecified()
        || ip.is_documentation()
        || a == 0
        || (a == 100 && (b & 0xC0) == 64) // 100.64.0.0/10
        || (a == 192 && b == 0 && c == 0) // 192.0.0.0/24
        || (a == 198 && (b & 0xFE) == 18) // 198.18.0.0/15
        || a >= 240
}

fn is_blocked_v6(ip: &Ipv6Addr) -> bool {
    if let Some(mapped) = ip.to_ipv4_mapped() {
        return is_blocked_v4(&mapped);
    }

    let [first, second, ..] = ip.segments();
    // Outside 2000::/3 everything is loopback, link-local, unique-local,
    // multicast, or IANA-reserved, including ::/8, 64:ff9b::/96 and 100::/64.
    (first & 0xE000) != 0x2000
        || (first == 0x2001 && second < 0x0200) // 2001::/23
        || (first == 0x2001 && second == 0x0DB8) // 2001:db8::/32
        || first == 0x2002 // 6to4
}

/// Drops addresses `is_blocked_ip` rejects.
pub fn retain_public(addrs: impl IntoIterator<Item = SocketAddr>) -> Vec<SocketAddr> {
    addrs.into_iter().filter(|addr| !is_blocked_ip(&addr.ip())).collect()
}

/// DNS resolver for the callback client that only yields public addresses.
///
/// Installed when private-IP blocking is on, so a host that passed
/// validation cannot be re-resolved to an internal address at connect time.
#[derive(Debug, Clone, Copy, Default)]
pub struct PublicAddressResolver;

impl Resolve for PublicAddressResolver {
    fn resolve(&self, name: Name) -> Resolving {
        Box::pin(resolve_public(name.as_str().to_owned()))
    }
}

type ResolveError = Box<dyn StdError + Send + Sync>;

async fn resolve_public(host: String) -> std::result::Result<Addrs, ResolveError> {
    let resolved = tokio::net::lookup_host((host.as_str(), 0)).await?;
    let public = retain_public(resolved);
    if public.is_empty() {
        debug!(host = %host, "resolved only to non-public addresses");
        return Err(format!("{host} resolves only to non-public addresses").into());
    }
    Ok(Box::new(public.into_iter()))
}
