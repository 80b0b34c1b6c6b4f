//! Shared-secret access check
//!
//! Runs once per inbound request, before any credential is selected.

use axum::http::{HeaderMap, HeaderName, StatusCode, header};
use axum::response::{IntoResponse, Response};
use common::Secret;

/// Header callers put the shared secret in, unless configured otherwise.
pub const DEFAULT_ACCESS_HEADER: &str = "x-proxy-token";

/// Stateless authorization predicate.
///
/// With no secret configured every request passes (open proxy mode).
pub struct AccessGate {
    header: HeaderName,
    secret: Option<Secret<String>>,
}

impl AccessGate {
    pub fn new(header: HeaderName, secret: Option<Secret<String>>) -> Self {
        Self { header, secret }
    }

    pub fn is_enabled(&self) -> bool {
        self.secret.is_some()
    }

    /// True when no secret is configured, or the access header carries
    /// exactly the configured value (case-sensitive).
    pub fn is_authorized(&self, headers: &HeaderMap) -> bool {
        let Some(secret) = &self.secret else {
            return true;
        };
        headers
            .get(&self.header)
            .is_some_and(|value| secret.matches(value.as_bytes()))
    }
}

/// Plain-text 401 returned before any forwarding logic runs.
pub fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
        ],
        "Unauthorized",
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn gate(secret: Option<&str>) -> AccessGate {
        AccessGate::new(
            HeaderName::from_static(DEFAULT_ACCESS_HEADER),
            secret.map(|s| Secret::new(s.to_string())),
        )
    }

    fn headers_with(name: &'static str, value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(name, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn open_gate_authorizes_everything() {
        let gate = gate(None);
        assert!(!gate.is_enabled());
        assert!(gate.is_authorized(&HeaderMap::new()));
        assert!(gate.is_authorized(&headers_with(DEFAULT_ACCESS_HEADER, "anything")));
        assert!(gate.is_authorized(&headers_with("authorization", "Bearer x")));
    }

    #[test]
    fn missing_header_is_rejected() {
        let gate = gate(Some("s3cret"));
        assert!(gate.is_enabled());
        assert!(!gate.is_authorized(&HeaderMap::new()));
        assert!(!gate.is_authorized(&headers_with("authorization", "s3cret")));
    }

    #[test]
    fn mismatched_value_is_rejected() {
        let gate = gate(Some("s3cret"));
        assert!(!gate.is_authorized(&headers_with(DEFAULT_ACCESS_HEADER, "wrong")));
        assert!(!gate.is_authorized(&headers_with(DEFAULT_ACCESS_HEADER, "S3CRET")));
        assert!(!gate.is_authorized(&headers_with(DEFAULT_ACCESS_HEADER, "s3cret2")));
        assert!(!gate.is_authorized(&headers_with(DEFAULT_ACCESS_HEADER, "")));
    }

    #[test]
    fn exact_match_is_accepted() {
        let gate = gate(Some("s3cret"));
        assert!(gate.is_authorized(&headers_with(DEFAULT_ACCESS_HEADER, "s3cret")));
    }

    #[test]
    fn header_name_lookup_is_case_insensitive() {
        let gate = AccessGate::new(
            HeaderName::from_static("x-custom-auth"),
            Some(Secret::new("tok".into())),
        );
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_bytes(b"X-Custom-Auth").unwrap(),
            HeaderValue::from_static("tok"),
        );
        assert!(gate.is_authorized(&headers));
    }

    #[test]
    fn unauthorized_is_plain_text_401() {
        let resp = unauthorized();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert!(
            resp.headers()[header::CONTENT_TYPE]
                .to_str()
                .unwrap()
                .starts_with("text/plain")
        );
    }
}
