use bytes::Bytes;
use reqwest::Method;
use reqwest::header::{ACCEPT, HeaderMap};
use url::Url;

use crate::cache::RequestKey;
use crate::error::NetworkError;

/// The kind of content an outgoing request expects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestDestination {
    /// A full document or page navigation
    Document,
    Script,
    Style,
    Image,
    Font,
    Manifest,
    /// Anything else (fetch/XHR, unknown)
    #[default]
    Other,
}

impl RequestDestination {
    /// Infer the destination from request headers: `Sec-Fetch-Dest` when present,
    /// otherwise an `Accept` header asking for HTML is taken as a navigation.
    pub fn infer(headers: &HeaderMap) -> Self {
        if let Some(dest) = headers
            .get("sec-fetch-dest")
            .and_then(|v| v.to_str().ok())
        {
            return Self::from_fetch_dest(dest);
        }

        let wants_html = headers
            .get(ACCEPT)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|accept| accept.contains("text/html"));
        if wants_html {
            Self::Document
        } else {
            Self::Other
        }
    }

    fn from_fetch_dest(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "document" | "iframe" | "frame" => Self::Document,
            "script" | "worker" | "sharedworker" => Self::Script,
            "style" => Self::Style,
            "image" => Self::Image,
            "font" => Self::Font,
            "manifest" => Self::Manifest,
            _ => Self::Other,
        }
    }

    pub fn is_document(self) -> bool {
        self == Self::Document
    }
}

/// An outgoing request as seen by the proxy
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Bytes,
    destination: RequestDestination,
}

impl ProxyRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            destination: RequestDestination::Other,
        }
    }

    /// A plain GET request
    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// Parse an absolute URL into a GET request
    pub fn parse_get(url: &str) -> Result<Self, NetworkError> {
        let url = Url::parse(url).map_err(|e| NetworkError::InvalidUrl(format!("{url}: {e}")))?;
        Ok(Self::get(url))
    }

    /// Attach headers; the destination is re-inferred from them
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.destination = RequestDestination::infer(&headers);
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }

    pub fn with_destination(mut self, destination: RequestDestination) -> Self {
        self.destination = destination;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn destination(&self) -> RequestDestination {
        self.destination
    }

    /// Cache key this request is looked up under
    pub fn key(&self) -> RequestKey {
        RequestKey::new(&self.method, &self.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn sec_fetch_dest_wins_over_accept() {
        let mut headers = HeaderMap::new();
        headers.insert("sec-fetch-dest", HeaderValue::from_static("image"));
        headers.insert(ACCEPT, HeaderValue::from_static("text/html"));
        assert_eq!(RequestDestination::infer(&headers), RequestDestination::Image);
    }

    #[test]
    fn html_accept_is_a_navigation() {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml;q=0.9"),
        );
        assert!(RequestDestination::infer(&headers).is_document());
    }

    #[test]
    fn no_hints_means_other() {
        assert_eq!(
            RequestDestination::infer(&HeaderMap::new()),
            RequestDestination::Other
        );
    }

    #[test]
    fn with_headers_reinfers_destination() {
        let mut headers = HeaderMap::new();
        headers.insert("sec-fetch-dest", HeaderValue::from_static("document"));
        let request = ProxyRequest::parse_get("https://a.test/")
            .unwrap()
            .with_headers(headers);
        assert_eq!(request.destination(), RequestDestination::Document);
        assert_eq!(request.key(), RequestKey::parse("https://a.test/").unwrap());
    }
}
