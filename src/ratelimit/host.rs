//! Request and response access provided by the hosting gateway.

use std::collections::HashMap;

/// Read access to the inbound request.
///
/// Values the gateway cannot supply are returned as empty strings.
pub trait RequestContext: Send + Sync {
    /// The client's source address.
    fn source_address(&self) -> &str;

    /// A request header by name, if present.
    fn header(&self, name: &str) -> Option<&str>;

    /// The request path.
    fn path(&self) -> &str;

    /// Identity of the matched route.
    fn route_id(&self) -> &str;

    /// Identity of the upstream service.
    fn service_id(&self) -> &str;
}

/// Write access to the outbound response headers.
pub trait ResponseHeaders {
    /// Set a header, replacing any previous value under the same name in any
    /// letter case.
    fn replace(&mut self, name: &str, value: &str);
}

impl ResponseHeaders for HashMap<String, String> {
    fn replace(&mut self, name: &str, value: &str) {
        self.retain(|n, _| !n.eq_ignore_ascii_case(name));
        self.insert(name.to_string(), value.to_string());
    }
}

impl ResponseHeaders for Vec<(String, String)> {
    fn replace(&mut self, name: &str, value: &str) {
        match self.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(name)) {
            Some(entry) => entry.1 = value.to_string(),
            None => self.push((name.to_string(), value.to_string())),
        }
    }
}

/// An owned request snapshot.
///
/// Header names are matched case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpRequest {
    source_address: String,
    path: String,
    route_id: String,
    service_id: String,
    headers: HashMap<String, String>,
}

impl HttpRequest {
    /// Create a request from a client address and path.
    pub fn new(source_address: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            source_address: source_address.into(),
            path: path.into(),
            ..Self::default()
        }
    }

    /// Set the route and service identities.
    pub fn with_route(mut self, route_id: impl Into<String>, service_id: impl Into<String>) -> Self {
        self.route_id = route_id.into();
        self.service_id = service_id.into();
        self
    }

    /// Add a request header.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }
}

impl RequestContext for HttpRequest {
    fn source_address(&self) -> &str {
        &self.source_address
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn route_id(&self) -> &str {
        &self.route_id
    }

    fn service_id(&self) -> &str {
        &self.service_id
    }
}
