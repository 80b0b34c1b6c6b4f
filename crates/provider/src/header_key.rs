//! Credential in a request header

use crate::{Provider, ProviderError};
use reqwest::Url;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

/// Header the generative-language API accepts as an alternative to `?key=`.
pub const DEFAULT_HEADER: &str = "x-goog-api-key";

/// Sends the credential in a fixed header, overwriting any caller value.
/// The header value is flagged sensitive so HTTP/2 HPACK never indexes it.
pub struct HeaderKeyProvider {
    header: HeaderName,
}

impl HeaderKeyProvider {
    pub fn new(header: HeaderName) -> Self {
        Self { header }
    }
}

impl Default for HeaderKeyProvider {
    fn default() -> Self {
        Self::new(HeaderName::from_static(DEFAULT_HEADER))
    }
}

impl Provider for HeaderKeyProvider {
    fn id(&self) -> &str {
        "header"
    }

    fn attach_credential(
        &self,
        _url: &mut Url,
        headers: &mut HeaderMap,
        credential: &str,
    ) -> crate::Result<()> {
        let mut value = HeaderValue::from_str(credential)
            .map_err(|_| ProviderError::Unrepresentable("header value"))?;
        value.set_sensitive(true);
        headers.insert(self.header.clone(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inserts_sensitive_header() {
        let mut url = Url::parse("https://example.test/v1?alt=sse").unwrap();
        let mut headers = HeaderMap::new();
        HeaderKeyProvider::default()
            .attach_credential(&mut url, &mut headers, "AIza-1")
            .unwrap();

        let value = headers.get(DEFAULT_HEADER).unwrap();
        assert_eq!(value, "AIza-1");
        assert!(value.is_sensitive());
        assert_eq!(url.query(), Some("alt=sse"), "url must be untouched");
    }

    #[test]
    fn overwrites_caller_header() {
        let mut headers = HeaderMap::new();
        headers.insert(DEFAULT_HEADER, HeaderValue::from_static("caller"));
        HeaderKeyProvider::default()
            .attach_credential(
                &mut Url::parse("https://example.test").unwrap(),
                &mut headers,
                "pool",
            )
            .unwrap();
        assert_eq!(headers.get_all(DEFAULT_HEADER).iter().count(), 1);
        assert_eq!(headers.get(DEFAULT_HEADER).unwrap(), "pool");
    }

    #[test]
    fn rejects_control_characters() {
        let result = HeaderKeyProvider::default().attach_credential(
            &mut Url::parse("https://example.test").unwrap(),
            &mut HeaderMap::new(),
            "bad\nkey",
        );
        let err = result.unwrap_err().to_string();
        assert!(!err.contains("bad"), "credential leaked into error: {err}");
    }

    #[test]
    fn custom_header_name() {
        let provider = HeaderKeyProvider::new(HeaderName::from_static("x-api-key"));
        assert_eq!(provider.id(), "header");
        let mut headers = HeaderMap::new();
        provider
            .attach_credential(
                &mut Url::parse("https://example.test").unwrap(),
                &mut headers,
                "k",
            )
            .unwrap();
        assert_eq!(headers.get("x-api-key").unwrap(), "k");
    }
}
