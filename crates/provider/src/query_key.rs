//! Credential as a URL query parameter

use crate::{Provider, ProviderError};
use reqwest::Url;
use reqwest::header::HeaderMap;
use tracing::debug;

/// Query parameter name the generative-language API reads.
pub const DEFAULT_PARAM: &str = "key";

/// Appends the credential as `?key=<credential>`.
///
/// Any caller-supplied parameter with the same name is dropped first, so the
/// upstream only ever sees the pool's credential. The rest of the query string
/// is kept byte for byte.
pub struct QueryKeyProvider {
    param: String,
}

impl QueryKeyProvider {
    pub fn new(param: impl Into<String>) -> Self {
        Self {
            param: param.into(),
        }
    }
}

impl Default for QueryKeyProvider {
    fn default() -> Self {
        Self::new(DEFAULT_PARAM)
    }
}

impl Provider for QueryKeyProvider {
    fn id(&self) -> &str {
        "query"
    }

    fn attach_credential(
        &self,
        url: &mut Url,
        _headers: &mut HeaderMap,
        credential: &str,
    ) -> crate::Result<()> {
        if let Some(query) = url.query() {
            let mut dropped = false;
            let kept: Vec<&str> = query
                .split('&')
                .filter(|pair| {
                    let name = pair.split_once('=').map_or(*pair, |(name, _)| name);
                    let matches = name == self.param;
                    dropped |= matches;
                    !matches && !pair.is_empty()
                })
                .collect();
            if dropped {
                debug!(param = %self.param, "replacing caller-supplied credential parameter");
            }
            let kept = kept.join("&");
            url.set_query(if kept.is_empty() { None } else { Some(&kept) });
        }
        if credential.is_empty() {
            return Err(ProviderError::Unrepresentable("query parameter"));
        }
        url.query_pairs_mut().append_pair(&self.param, credential);
        Ok(())
    }
}
