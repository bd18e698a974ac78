//! Cache keys.

use std::fmt;

use http::Uri;
use url::Url;

/// The canonical URL of a GET request.
///
/// Both proxies derive keys through `url::Url` so that the server-side push
/// and the client-side request for the same resource agree on spelling
/// (scheme and host case, default ports, empty paths).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Canonicalize a URL string. Unparseable input is kept verbatim.
    pub fn new(raw: &str) -> Self {
        match Url::parse(raw) {
            Ok(url) => Self::from_url(&url),
            Err(_) => Self(raw.to_string()),
        }
    }

    pub fn from_url(url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self(url.into())
    }

    pub fn from_uri(uri: &Uri) -> Self {
        Self::new(&uri.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
