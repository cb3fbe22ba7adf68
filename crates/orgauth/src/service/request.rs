use std::net::SocketAddr;

use http::{HeaderMap, Method, Uri, header::AsHeaderName};
use tokio_util::sync::CancellationToken;
use typed_builder::TypedBuilder;
use url::form_urlencoded;
use uuid::Uuid;

use super::OrgId;

/// Inbound authentication context.
///
/// Headers and query parameters are read-only for clients. The only sanctioned
/// mutation is the removal of a sensitive query parameter by the client that consumed it.
#[derive(Debug, Clone, TypedBuilder)]
pub struct Request {
    #[builder(default = Uuid::now_v7())]
    request_id: Uuid,
    #[builder(default = Method::GET)]
    method: Method,
    #[builder(default = "/".to_string(), setter(into))]
    path: String,
    #[builder(default)]
    query: Vec<(String, String)>,
    #[builder(default)]
    headers: HeaderMap,
    #[builder(default, setter(strip_option))]
    remote_addr: Option<SocketAddr>,
    /// Organization the caller asked to act in, if any.
    #[builder(default, setter(strip_option))]
    org_id: Option<OrgId>,
    #[builder(default)]
    cancellation_token: CancellationToken,
}

impl Request {
    /// Build a request from the parts of an inbound HTTP call.
    #[must_use]
    pub fn from_parts(method: Method, uri: &Uri, headers: HeaderMap) -> Self {
        let query = uri
            .query()
            .map(|q| form_urlencoded::parse(q.as_bytes()).into_owned().collect())
            .unwrap_or_default();
        Request::builder()
            .method(method)
            .path(uri.path())
            .query(query)
            .headers(headers)
            .build()
    }

    #[must_use]
    pub fn with_org_id(mut self, org_id: OrgId) -> Self {
        self.org_id = Some(org_id);
        self
    }

    #[must_use]
    pub fn with_remote_addr(mut self, remote_addr: SocketAddr) -> Self {
        self.remote_addr = Some(remote_addr);
        self
    }

    #[must_use]
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = token;
        self
    }

    #[must_use]
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// First value of the header, if it is present and valid UTF-8.
    pub fn header<K: AsHeaderName>(&self, name: K) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    #[must_use]
    pub fn query_params(&self) -> &[(String, String)] {
        &self.query
    }

    /// First value of the query parameter.
    #[must_use]
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    #[must_use]
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    #[must_use]
    pub fn org_id(&self) -> Option<OrgId> {
        self.org_id
    }

    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation_token
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    /// Path and re-encoded query string, e.g. `/d/abc?orgId=2`.
    #[must_use]
    pub fn path_and_query(&self) -> String {
        if self.query.is_empty() {
            return self.path.clone();
        }
        let query = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.query.iter())
            .finish();
        format!("{}?{query}", self.path)
    }

    /// Remove every occurrence of a query parameter. Returns whether anything was removed.
    pub(crate) fn remove_query_param(&mut self, name: &str) -> bool {
        let before = self.query.len();
        self.query.retain(|(k, _)| k != name);
        before != self.query.len()
    }
}

#[cfg(test)]
mod tests {
    use http::HeaderValue;

    use super::*;

    #[test]
    fn test_from_parts_parses_query() {
        let uri: Uri = "/d/abc?orgId=2&auth_token=a%2Eb&orgId=3".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("x-jwt-assertion", HeaderValue::from_static("token"));
        let request = Request::from_parts(Method::GET, &uri, headers);

        assert_eq!(request.path(), "/d/abc");
        assert_eq!(request.query_param("orgId"), Some("2"));
        assert_eq!(request.query_param("auth_token"), Some("a.b"));
        assert_eq!(request.header("x-jwt-assertion"), Some("token"));
        assert_eq!(request.org_id(), None);
    }

    #[test]
    fn test_remove_query_param() {
        let mut request = Request::builder()
            .path("/api/search")
            .query(vec![
                ("auth_token".to_string(), "secret".to_string()),
                ("q".to_string(), "a b".to_string()),
            ])
            .build();
        assert!(request.remove_query_param("auth_token"));
        assert!(!request.remove_query_param("auth_token"));
        assert_eq!(request.path_and_query(), "/api/search?q=a+b");
    }
}
