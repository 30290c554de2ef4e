//! Provisioning endpoint descriptor parsing
//!
//! The boot parameter is an untrusted string such as `10.0.0.1:4000`,
//! `grpc://10.0.0.1:4000?jointoken=abc` or `https://link.example.com`.

use crate::error::EndpointError;
use http::Uri;
use regex::Regex;
use std::sync::LazyLock;

/// Scheme assumed when the descriptor carries none (plaintext gRPC)
pub const DEFAULT_SCHEME: &str = "grpc";

/// Scheme that selects TLS with an implicit port 443
pub const TLS_SCHEME: &str = "https";

/// Query parameter carrying the join token
pub const JOIN_TOKEN_PARAM: &str = "jointoken";

// Matches a scheme marker anywhere in the descriptor, not only at the start.
static SCHEME_MATCHER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[a-zA-z]+://").expect("scheme pattern is valid"));

/// Where and how to reach the provisioning service
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointDescriptor {
    /// `host:port` (or bare host) to dial
    pub host: String,

    /// Dial without TLS
    pub insecure: bool,

    /// Credential forwarded to the provisioning service
    pub join_token: Option<String>,
}

impl EndpointDescriptor {
    /// URI handed to the gRPC transport
    pub fn transport_uri(&self) -> String {
        if self.insecure {
            format!("http://{}", self.host)
        } else {
            format!("https://{}", self.host)
        }
    }
}

/// Parse the raw boot parameter into an [`EndpointDescriptor`]
///
/// Callers that must not fail on a malformed parameter fall back to
/// `EndpointDescriptor::default()` on error.
pub fn parse_endpoint(raw: &str) -> Result<EndpointDescriptor, EndpointError> {
    let raw = raw.trim();
    let candidate = if SCHEME_MATCHER.is_match(raw) {
        raw.to_string()
    } else {
        format!("{DEFAULT_SCHEME}://{raw}")
    };

    let uri: Uri = candidate
        .parse()
        .map_err(|source| EndpointError::InvalidUri {
            value: raw.to_string(),
            source,
        })?;

    let scheme = uri
        .scheme_str()
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    let authority = uri
        .authority()
        .ok_or_else(|| EndpointError::MissingHost(raw.to_string()))?;

    // Drop userinfo, keep host and port as written.
    let mut host = authority
        .as_str()
        .rsplit('@')
        .next()
        .unwrap_or_default()
        .to_string();

    if host.is_empty() {
        return Err(EndpointError::MissingHost(raw.to_string()));
    }

    if authority.port().is_none() && scheme == TLS_SCHEME {
        host.push_str(":443");
    }

    let join_token = uri.query().and_then(query_join_token);

    Ok(EndpointDescriptor {
        host,
        insecure: scheme == DEFAULT_SCHEME,
        join_token,
    })
}

/// First `jointoken` value, form-decoded (`%XX` escapes, `+` as space).
/// An empty value means no token.
fn query_join_token(query: &str) -> Option<String> {
    form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == JOIN_TOKEN_PARAM)
        .map(|(_, value)| value.into_owned())
        .filter(|token| !token.is_empty())
}
