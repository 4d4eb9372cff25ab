//! Client identification: turns request metadata into a rate-limit key.
//!
//! Transport-agnostic. Each transport converts its own header map into
//! [`RequestHeaders`] and calls [`IdentityPolicy::resolve`].

use std::fmt;

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Identifier returned in development mode.
pub const LOOPBACK_IDENTIFIER: &str = "127.0.0.1";

/// Prefix marking fingerprint identifiers.
pub const FINGERPRINT_PREFIX: &str = "fp_";

/// Number of hex characters kept from the fingerprint digest.
const FINGERPRINT_HEX_LEN: usize = 16;

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
pub const X_REAL_IP: &str = "x-real-ip";
pub const USER_AGENT: &str = "user-agent";
pub const ACCEPT_LANGUAGE: &str = "accept-language";
pub const ACCEPT_ENCODING: &str = "accept-encoding";
pub const SEC_CH_UA: &str = "sec-ch-ua";

/// The request headers the resolver looks at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestHeaders {
    pub forwarded_for: Option<String>,
    pub real_ip: Option<String>,
    pub user_agent: Option<String>,
    pub accept_language: Option<String>,
    pub accept_encoding: Option<String>,
    pub client_hint: Option<String>,
}

impl RequestHeaders {
    /// Collects the relevant headers from `(name, value)` pairs.
    ///
    /// Names are matched case-insensitively; unrelated headers are ignored.
    /// For repeated headers the first occurrence wins.
    pub fn from_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut headers = Self::default();
        for (name, value) in pairs {
            headers.set(name, value);
        }
        headers
    }

    /// Builder-style setter, handy in tests.
    #[must_use]
    pub fn with(mut self, name: &str, value: &str) -> Self {
        self.set(name, value);
        self
    }

    fn set(&mut self, name: &str, value: &str) {
        let slot = match name.to_ascii_lowercase().as_str() {
            X_FORWARDED_FOR => &mut self.forwarded_for,
            X_REAL_IP => &mut self.real_ip,
            USER_AGENT => &mut self.user_agent,
            ACCEPT_LANGUAGE => &mut self.accept_language,
            ACCEPT_ENCODING => &mut self.accept_encoding,
            SEC_CH_UA => &mut self.client_hint,
            _ => return,
        };
        if slot.is_none() {
            *slot = Some(value.to_string());
        }
    }

    /// First entry of the forwarded-for chain, if non-empty.
    fn first_forwarded(&self) -> Option<&str> {
        self.forwarded_for
            .as_deref()
            .and_then(|chain| chain.split(',').next())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    fn real_ip(&self) -> Option<&str> {
        self.real_ip
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Where an identifier came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum IdentifierSource {
    /// Forwarded address inserted by the managed hosting platform's edge.
    Platform,
    /// Fixed loopback token used in local development.
    Development,
    /// `X-Real-IP` set by a reverse proxy.
    RealIp,
    /// Operator-trusted `X-Forwarded-For` chain.
    ForwardedFor,
    /// Hash of non-address request characteristics.
    Fingerprint,
}

impl IdentifierSource {
    pub fn label(self) -> &'static str {
        match self {
            Self::Platform => "platform",
            Self::Development => "development",
            Self::RealIp => "real_ip",
            Self::ForwardedFor => "forwarded_for",
            Self::Fingerprint => "fingerprint",
        }
    }
}

/// Stable per-client key used for rate limiting and abuse tracking.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientIdentifier {
    value: String,
    source: IdentifierSource,
}

impl ClientIdentifier {
    pub fn new(value: impl Into<String>, source: IdentifierSource) -> Self {
        Self {
            value: value.into(),
            source,
        }
    }

    /// Wraps an identifier supplied out-of-band (admin calls, sidecar
    /// callers that already resolved it). The source is inferred from the
    /// fingerprint prefix.
    pub fn from_raw(value: impl Into<String>) -> Self {
        let value = value.into();
        let source = if is_fingerprint(&value) {
            IdentifierSource::Fingerprint
        } else {
            IdentifierSource::RealIp
        };
        Self { value, source }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn source(&self) -> IdentifierSource {
        self.source
    }

    pub fn is_fingerprint(&self) -> bool {
        self.source == IdentifierSource::Fingerprint
    }
}

impl fmt::Display for ClientIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

/// Deployment flags that decide which headers can be trusted.
///
/// Read once from process configuration, never from the request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IdentityPolicy {
    /// Running behind a managed platform whose edge sets `X-Forwarded-For`.
    pub managed_platform: bool,
    /// Local development: every client maps to the loopback identifier.
    pub development: bool,
    /// Trust an arbitrary `X-Forwarded-For` chain.
    ///
    /// Any client can send this header, so enabling it outside a trusted
    /// proxy setup lets clients pick their own rate-limit key.
    pub trust_forwarded_for: bool,
}

impl IdentityPolicy {
    /// Resolves the identifier for a request. Never fails.
    pub fn resolve(&self, headers: &RequestHeaders) -> ClientIdentifier {
        if self.managed_platform
            && let Some(addr) = headers.first_forwarded()
        {
            return ClientIdentifier::new(addr, IdentifierSource::Platform);
        }

        if self.development {
            return ClientIdentifier::new(LOOPBACK_IDENTIFIER, IdentifierSource::Development);
        }

        if let Some(addr) = headers.real_ip() {
            return ClientIdentifier::new(addr, IdentifierSource::RealIp);
        }

        if self.trust_forwarded_for
            && let Some(addr) = headers.first_forwarded()
        {
            return ClientIdentifier::new(addr, IdentifierSource::ForwardedFor);
        }

        ClientIdentifier::new(fingerprint(headers), IdentifierSource::Fingerprint)
    }
}

/// Hashes the non-address request characteristics into `fp_<16 hex>`.
///
/// Clients sharing a header profile collide into the same identifier.
pub fn fingerprint(headers: &RequestHeaders) -> String {
    let parts = [
        headers.user_agent.as_deref().unwrap_or_default(),
        headers.accept_language.as_deref().unwrap_or_default(),
        headers.accept_encoding.as_deref().unwrap_or_default(),
        headers.client_hint.as_deref().unwrap_or_default(),
    ];
    let digest = Sha256::digest(parts.join("|").as_bytes());
    let hex = hex::encode(digest);
    format!("{FINGERPRINT_PREFIX}{}", &hex[..FINGERPRINT_HEX_LEN])
}

fn is_fingerprint(value: &str) -> bool {
    value.strip_prefix(FINGERPRINT_PREFIX).is_some_and(|rest| {
        rest.len() == FINGERPRINT_HEX_LEN
            && rest.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn browser(ua: &str) -> RequestHeaders {
        RequestHeaders::default()
            .with("User-Agent", ua)
            .with("Accept-Language", "en")
            .with("Accept-Encoding", "gzip")
    }

    #[test]
    fn fingerprint_is_deterministic() {
        let policy = IdentityPolicy::default();
        let a = policy.resolve(&browser("UA1"));
        let b = policy.resolve(&browser("UA1"));
        assert_eq!(a, b);
        assert_eq!(a.source(), IdentifierSource::Fingerprint);
    }

    #[test]
    fn fingerprint_format() {
        let id = IdentityPolicy::default().resolve(&RequestHeaders::default());
        let value = id.as_str();
        assert!(value.starts_with("fp_"), "{value}");
        let hex = &value[3..];
        assert_eq!(hex.len(), 16);
        assert!(hex.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
        assert!(is_fingerprint(value));
    }

    #[test]
    fn fingerprint_changes_with_user_agent() {
        let policy = IdentityPolicy::default();
        assert_ne!(
            policy.resolve(&browser("UA1")),
            policy.resolve(&browser("UA2"))
        );
    }

    #[test]
    fn platform_takes_first_forwarded_entry() {
        let policy = IdentityPolicy {
            managed_platform: true,
            ..IdentityPolicy::default()
        };
        let headers = RequestHeaders::default().with("x-forwarded-for", "203.0.113.5, 10.0.0.1");
        let id = policy.resolve(&headers);
        assert_eq!(id.as_str(), "203.0.113.5");
        assert_eq!(id.source(), IdentifierSource::Platform);
    }

    #[test]
    fn development_wins_over_forwarded_for() {
        let policy = IdentityPolicy {
            development: true,
            trust_forwarded_for: true,
            ..IdentityPolicy::default()
        };
        let headers = RequestHeaders::default()
            .with("x-forwarded-for", "203.0.113.5")
            .with("x-real-ip", "198.51.100.7");
        let id = policy.resolve(&headers);
        assert_eq!(id.as_str(), LOOPBACK_IDENTIFIER);
        assert_eq!(id.source(), IdentifierSource::Development);
    }

    #[test]
    fn platform_beats_development_when_header_present() {
        let policy = IdentityPolicy {
            managed_platform: true,
            development: true,
            trust_forwarded_for: false,
        };
        let with_xff = RequestHeaders::default().with("x-forwarded-for", "203.0.113.5");
        assert_eq!(policy.resolve(&with_xff).as_str(), "203.0.113.5");
        let without = RequestHeaders::default();
        assert_eq!(policy.resolve(&without).as_str(), LOOPBACK_IDENTIFIER);
    }

    #[test]
    fn real_ip_used_when_present() {
        let headers = RequestHeaders::default()
            .with("X-Real-IP", " 198.51.100.7 ")
            .with("x-forwarded-for", "203.0.113.5");
        let id = IdentityPolicy::default().resolve(&headers);
        assert_eq!(id.as_str(), "198.51.100.7");
        assert_eq!(id.source(), IdentifierSource::RealIp);
    }

    #[test]
    fn forwarded_for_ignored_unless_trusted() {
        let headers = RequestHeaders::default().with("x-forwarded-for", "203.0.113.5");
        let untrusted = IdentityPolicy::default().resolve(&headers);
        assert!(untrusted.is_fingerprint());

        let trusted = IdentityPolicy {
            trust_forwarded_for: true,
            ..IdentityPolicy::default()
        }
        .resolve(&headers);
        assert_eq!(trusted.as_str(), "203.0.113.5");
        assert_eq!(trusted.source(), IdentifierSource::ForwardedFor);
    }

    #[test]
    fn empty_headers_fall_through() {
        let policy = IdentityPolicy {
            managed_platform: true,
            trust_forwarded_for: true,
            ..IdentityPolicy::default()
        };
        let headers = RequestHeaders::default()
            .with("x-forwarded-for", " , 10.0.0.1")
            .with("x-real-ip", "   ");
        assert!(policy.resolve(&headers).is_fingerprint());
    }

    #[test]
    fn first_header_occurrence_wins() {
        let headers =
            RequestHeaders::from_pairs([("x-real-ip", "198.51.100.7"), ("X-Real-Ip", "10.0.0.1")]);
        assert_eq!(headers.real_ip.as_deref(), Some("198.51.100.7"));
    }

    #[test]
    fn raw_identifier_source_inference() {
        let fp = fingerprint(&RequestHeaders::default());
        assert!(ClientIdentifier::from_raw(fp).is_fingerprint());
        assert!(!ClientIdentifier::from_raw("203.0.113.5").is_fingerprint());
        assert!(!ClientIdentifier::from_raw("fp_nothex").is_fingerprint());
    }

    #[test]
    fn identifiers_dedupe_in_hash_sets() {
        let policy = IdentityPolicy::default();
        let headers = browser("UA1");
        let ids: std::collections::HashSet<ClientIdentifier> = [
            policy.resolve(&headers),
            policy.resolve(&headers),
            policy.resolve(&browser("UA2")),
        ]
        .into_iter()
        .collect();
        assert_eq!(ids.len(), 2);
    }
}
