//! Relay URL normalization and validation.
//!
//! Endpoints are identified by their normalized URL, so two spellings of the
//! same relay must collapse to one key.
//!
//! # Normalization Rules
//!
//! - Force a websocket scheme: `https://` becomes `wss://`, `http://` becomes
//!   `ws://`, and a bare host gets `wss://`
//! - Lowercase the whole URL (relay URLs compare case-insensitively)
//! - Remove trailing slashes
//! - Preserve non-default ports and paths
//!
//! # Filtering Rules
//!
//! Only publicly routable hosts are accepted. Rejected:
//! - `localhost` and `*.localhost`
//! - IP literals that are unspecified, loopback, private, link-local, or in
//!   the CGNAT shared range; IPv6 unique-local and IPv4-mapped forms of these
//! - mDNS `.local` names
//! - Tor `.onion` names, unless [`NormalizeOptions::allow_onion`] is set

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use nostr::RelayUrl;

#[derive(Debug, Clone, Default)]
pub struct NormalizeOptions {
    /// Accept `.onion` hosts (the transport must be able to reach Tor).
    pub allow_onion: bool,
}

/// Outcome of normalizing one candidate URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizeResult {
    Ok(String),
    /// Not a usable websocket URL.
    Invalid(String),
    /// Well formed, but points somewhere a relay client must not dial.
    Blocked(String),
}

impl NormalizeResult {
    pub fn ok(self) -> Option<String> {
        match self {
            Self::Ok(url) => Some(url),
            Self::Invalid(_) | Self::Blocked(_) => None,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    /// Converts into a `Result`, with the rejection reason as the error.
    pub fn into_result(self) -> Result<String, String> {
        match self {
            Self::Ok(url) => Ok(url),
            Self::Invalid(reason) => Err(format!("invalid relay URL: {}", reason)),
            Self::Blocked(reason) => Err(format!("blocked relay URL: {}", reason)),
        }
    }
}

/// Normalize a relay URL with default options (.onion blocked).
///
/// # Examples
///
/// ```
/// use outbox_core::url::normalize_relay_url;
///
/// assert_eq!(
///     normalize_relay_url("Relay.Example.COM/").ok(),
///     Some("wss://relay.example.com".to_string())
/// );
///
/// assert!(normalize_relay_url("wss://localhost:8080").ok().is_none());
/// ```
pub fn normalize_relay_url(url: &str) -> NormalizeResult {
    normalize_relay_url_with_opts(url, &NormalizeOptions::default())
}

/// Normalize a relay URL with custom options.
pub fn normalize_relay_url_with_opts(url: &str, opts: &NormalizeOptions) -> NormalizeResult {
    let lowered = url.trim().to_lowercase();
    if lowered.is_empty() {
        return NormalizeResult::Invalid("empty URL".to_string());
    }

    let Some(candidate) = force_socket_scheme(&lowered) else {
        return NormalizeResult::Invalid(
            "URL must use wss://, ws://, https://, or http://".to_string(),
        );
    };

    let parsed = match RelayUrl::parse(&candidate) {
        Ok(parsed) => parsed,
        Err(e) => return NormalizeResult::Invalid(e.to_string()),
    };
    let normalized = parsed.to_string().trim_end_matches('/').to_string();

    match blocked_reason(&normalized, opts) {
        Some(reason) => NormalizeResult::Blocked(reason),
        None => NormalizeResult::Ok(normalized),
    }
}

/// Rewrite the scheme of an already-lowercased URL to a websocket scheme.
///
/// Returns `None` for schemes that cannot carry a relay connection.
fn force_socket_scheme(url: &str) -> Option<String> {
    if url.starts_with("wss://") || url.starts_with("ws://") {
        return Some(url.to_string());
    }
    if let Some(rest) = url.strip_prefix("https://") {
        return Some(format!("wss://{}", rest));
    }
    if let Some(rest) = url.strip_prefix("http://") {
        return Some(format!("ws://{}", rest));
    }
    if url.contains("://") {
        return None;
    }
    Some(format!("wss://{}", url))
}

/// Map a normalized websocket URL to the HTTP URL serving its NIP-11 document.
///
/// ```
/// use outbox_core::url::to_http_url;
///
/// assert_eq!(to_http_url("wss://relay.example.com"), "https://relay.example.com");
/// assert_eq!(to_http_url("ws://relay.example.com:8080"), "http://relay.example.com:8080");
/// ```
pub fn to_http_url(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("wss://") {
        format!("https://{}", rest)
    } else if let Some(rest) = url.strip_prefix("ws://") {
        format!("http://{}", rest)
    } else {
        url.to_string()
    }
}

/// Reason the URL's host must not be dialed, if any.
fn blocked_reason(url: &str, opts: &NormalizeOptions) -> Option<String> {
    let host = strip_port(extract_host(url));
    if host.is_empty() {
        return Some("empty host".to_string());
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        return non_public_class(ip).map(|class| format!("{} address {} not allowed", class, ip));
    }

    if host == "localhost" || host.ends_with(".localhost") {
        return Some("localhost not allowed".to_string());
    }
    if host.ends_with(".local") {
        return Some("mDNS .local host not allowed".to_string());
    }
    if host.ends_with(".onion") && !opts.allow_onion {
        return Some("Tor .onion host not allowed".to_string());
    }
    None
}

/// Host without port or IPv6 brackets.
fn strip_port(authority: &str) -> &str {
    if let Some(rest) = authority.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    authority
        .rsplit_once(':')
        .map_or(authority, |(host, _)| host)
}

fn non_public_class(ip: IpAddr) -> Option<&'static str> {
    match ip {
        IpAddr::V4(v4) => non_public_v4(v4),
        IpAddr::V6(v6) => non_public_v6(v6),
    }
}

fn non_public_v4(ip: Ipv4Addr) -> Option<&'static str> {
    let [a, b, _, _] = ip.octets();
    if ip.is_unspecified() {
        Some("unspecified")
    } else if ip.is_loopback() {
        Some("loopback")
    } else if ip.is_private() {
        Some("private")
    } else if ip.is_link_local() {
        Some("link-local")
    } else if a == 100 && (64..128).contains(&b) {
        // RFC 6598
        Some("shared (CGNAT)")
    } else {
        None
    }
}

fn non_public_v6(ip: Ipv6Addr) -> Option<&'static str> {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return non_public_v4(v4);
    }
    let first = ip.segments()[0];
    if ip.is_unspecified() {
        Some("unspecified")
    } else if ip.is_loopback() {
        Some("loopback")
    } else if first & 0xffc0 == 0xfe80 {
        Some("link-local")
    } else if first & 0xfe00 == 0xfc00 {
        Some("unique-local")
    } else {
        None
    }
}

/// Extract the host portion (with port, if any) from a websocket URL.
pub fn extract_host(url: &str) -> &str {
    let without_scheme = url
        .strip_prefix("wss://")
        .or_else(|| url.strip_prefix("ws://"))
        .unwrap_or(url);

    without_scheme.split('/').next().unwrap_or(without_scheme)
}
