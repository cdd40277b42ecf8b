//! Logical HTTP request and response values.
//!
//! These are the already-parsed forms the dispatch core works with. Both are
//! immutable once built; equality is structural.

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// HTTP request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RequestMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Options,
    Head,
    Trace,
    Connect,
}

impl RequestMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestMethod::Get => "GET",
            RequestMethod::Post => "POST",
            RequestMethod::Put => "PUT",
            RequestMethod::Delete => "DELETE",
            RequestMethod::Patch => "PATCH",
            RequestMethod::Options => "OPTIONS",
            RequestMethod::Head => "HEAD",
            RequestMethod::Trace => "TRACE",
            RequestMethod::Connect => "CONNECT",
        }
    }
}

impl fmt::Display for RequestMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestMethod {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(RequestMethod::Get),
            "POST" => Ok(RequestMethod::Post),
            "PUT" => Ok(RequestMethod::Put),
            "DELETE" => Ok(RequestMethod::Delete),
            "PATCH" => Ok(RequestMethod::Patch),
            "OPTIONS" => Ok(RequestMethod::Options),
            "HEAD" => Ok(RequestMethod::Head),
            "TRACE" => Ok(RequestMethod::Trace),
            "CONNECT" => Ok(RequestMethod::Connect),
            other => anyhow::bail!("Unknown request method: {}", other),
        }
    }
}

/// Ordered multimap of header names to values.
///
/// Insertion order is preserved, a name may repeat, and lookups by name are
/// ASCII case-insensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpHeaders {
    entries: Vec<(String, String)>,
}

impl HttpHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value, keeping any existing values for the same name.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Replace every value for `name` with a single value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove(&name);
        self.entries.push((name, value.into()));
    }

    pub fn remove(&mut self, name: &str) {
        self.entries.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
    }

    /// First value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// First value for `name`, comparing the name byte for byte.
    pub fn get_exact(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for HttpHeaders {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = HttpHeaders::new();
        for (k, v) in iter {
            headers.append(k, v);
        }
        headers
    }
}

impl Serialize for HttpHeaders {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        // Group repeated names so the output stays a valid mapping.
        let mut names: Vec<&str> = Vec::new();
        for (k, _) in &self.entries {
            if !names.iter().any(|n| n.eq_ignore_ascii_case(k)) {
                names.push(k);
            }
        }

        let mut map = serializer.serialize_map(Some(names.len()))?;
        for name in names {
            let values: Vec<&str> = self.get_all(name).collect();
            if values.len() == 1 {
                map.serialize_entry(name, values[0])?;
            } else {
                map.serialize_entry(name, &values)?;
            }
        }
        map.end()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum HeaderValues {
    One(String),
    Many(Vec<String>),
}

impl<'de> Deserialize<'de> for HttpHeaders {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct HeadersVisitor;

        impl<'de> Visitor<'de> for HeadersVisitor {
            type Value = HttpHeaders;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a mapping of header names to a value or list of values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut headers = HttpHeaders::new();
                while let Some((name, values)) = access.next_entry::<String, HeaderValues>()? {
                    match values {
                        HeaderValues::One(value) => headers.append(name, value),
                        HeaderValues::Many(values) => {
                            for value in values {
                                headers.append(name.clone(), value);
                            }
                        }
                    }
                }
                Ok(headers)
            }
        }

        deserializer.deserialize_map(HeadersVisitor)
    }
}

/// An inbound HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    method: RequestMethod,
    url: String,
    headers: HttpHeaders,
    query_params: Vec<(String, String)>,
    body: Vec<u8>,
    client_ip: String,
}

impl Request {
    pub fn builder() -> RequestBuilder {
        RequestBuilder::default()
    }

    pub fn method(&self) -> RequestMethod {
        self.method
    }

    /// Path plus query string, as received.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Path component of the URL.
    pub fn path(&self) -> &str {
        self.url.split_once('?').map(|(p, _)| p).unwrap_or(&self.url)
    }

    pub fn query_string(&self) -> Option<&str> {
        self.url.split_once('?').map(|(_, q)| q)
    }

    pub fn headers(&self) -> &HttpHeaders {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Decoded query parameters in URL order.
    pub fn query_params(&self) -> &[(String, String)] {
        &self.query_params
    }

    /// First value of a query parameter.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query_params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Body as UTF-8 text, if it is valid UTF-8.
    pub fn body_as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    pub fn client_ip(&self) -> &str {
        &self.client_ip
    }
}

/// Builder for [`Request`].
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    method: RequestMethod,
    url: String,
    headers: HttpHeaders,
    body: Vec<u8>,
    client_ip: String,
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self {
            method: RequestMethod::Get,
            url: "/".to_string(),
            headers: HttpHeaders::new(),
            body: Vec::new(),
            client_ip: "127.0.0.1".to_string(),
        }
    }
}

impl RequestBuilder {
    pub fn method(mut self, method: RequestMethod) -> Self {
        self.method = method;
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn client_ip(mut self, client_ip: impl Into<String>) -> Self {
        self.client_ip = client_ip.into();
        self
    }

    pub fn build(self) -> Request {
        let query_params = self
            .url
            .split_once('?')
            .map(|(_, q)| parse_query_string(q))
            .unwrap_or_default();

        Request {
            method: self.method,
            url: self.url,
            headers: self.headers,
            query_params,
            body: self.body,
            client_ip: self.client_ip,
        }
    }
}

/// A concrete outbound response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    status: u16,
    headers: HttpHeaders,
    body: Vec<u8>,
}

/// Status of the response returned when no stub matches.
pub const NOT_CONFIGURED_STATUS: u16 = 404;

impl Response {
    pub fn new(status: u16, headers: HttpHeaders, body: Vec<u8>) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    pub fn builder() -> ResponseBuilder {
        ResponseBuilder::default()
    }

    /// The fixed response for requests no stub matched.
    pub fn not_configured() -> Self {
        Self::new(NOT_CONFIGURED_STATUS, HttpHeaders::new(), Vec::new())
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn headers(&self) -> &HttpHeaders {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn body_as_string(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Builder for [`Response`].
#[derive(Debug, Clone)]
pub struct ResponseBuilder {
    status: u16,
    headers: HttpHeaders,
    body: Vec<u8>,
}

impl Default for ResponseBuilder {
    fn default() -> Self {
        Self {
            status: 200,
            headers: HttpHeaders::new(),
            body: Vec::new(),
        }
    }
}

impl ResponseBuilder {
    pub fn status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn build(self) -> Response {
        Response::new(self.status, self.headers, self.body)
    }
}

/// Parse a query string into ordered key-value pairs.
pub(crate) fn parse_query_string(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter(|part| !part.is_empty())
        .map(|part| match part.split_once('=') {
            Some((key, value)) => (urlencoding_decode(key), urlencoding_decode(value)),
            None => (urlencoding_decode(part), String::new()),
        })
        .collect()
}

/// Percent-decoding, with `+` as space. Invalid escapes are kept verbatim.
fn urlencoding_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hex = bytes
                    .get(i + 1..i + 3)
                    .filter(|h| h.iter().all(u8::is_ascii_hexdigit))
                    .and_then(|h| std::str::from_utf8(h).ok())
                    .and_then(|h| u8::from_str_radix(h, 16).ok());
                match hex {
                    Some(byte) => {
                        decoded.push(byte);
                        i += 3;
                    }
                    None => {
                        decoded.push(b'%');
                        i += 1;
                    }
                }
            }
            b'+' => {
                decoded.push(b' ');
                i += 1;
            }
            b => {
                decoded.push(b);
                i += 1;
            }
        }
    }

    String::from_utf8_lossy(&decoded).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_equality_is_structural() {
        let a = Request::builder()
            .method(RequestMethod::Post)
            .url("/things?x=1")
            .header("Accept", "application/json")
            .body("payload")
            .client_ip("10.0.0.1")
            .build();
        let b = Request::builder()
            .method(RequestMethod::Post)
            .url("/things?x=1")
            .header("Accept", "application/json")
            .body("payload")
            .client_ip("10.0.0.1")
            .build();
        assert_eq!(a, b);

        let c = Request::builder().url("/things?x=2").build();
        assert_ne!(a, c);
    }

    #[test]
    fn test_path_and_query() {
        let request = Request::builder()
            .url("/search?q=John%20Doe&tag=a&tag=b&flag")
            .build();

        assert_eq!(request.path(), "/search");
        assert_eq!(request.query_string(), Some("q=John%20Doe&tag=a&tag=b&flag"));
        assert_eq!(request.query_param("q"), Some("John Doe"));
        assert_eq!(request.query_param("tag"), Some("a"));
        assert_eq!(request.query_param("flag"), Some(""));
        assert_eq!(request.query_params().len(), 4);
    }

    #[test]
    fn test_headers_case_insensitive_and_ordered() {
        let mut headers = HttpHeaders::new();
        headers.append("X-Trace", "one");
        headers.append("Content-Type", "text/plain");
        headers.append("x-trace", "two");

        assert_eq!(headers.get("X-TRACE"), Some("one"));
        assert_eq!(headers.get_exact("x-trace"), Some("two"));
        assert_eq!(headers.get_all("x-trace").collect::<Vec<_>>(), vec!["one", "two"]);

        headers.set("X-Trace", "three");
        let names: Vec<_> = headers.iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["Content-Type", "X-Trace"]);
    }

    #[test]
    fn test_headers_from_yaml() {
        let yaml = "Content-Type: application/json\nSet-Cookie: [a=1, b=2]\n";
        let headers: HttpHeaders = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(headers.len(), 3);
        assert_eq!(headers.get("content-type"), Some("application/json"));
        assert_eq!(headers.get_all("set-cookie").collect::<Vec<_>>(), vec!["a=1", "b=2"]);
    }

    #[test]
    fn test_method_parse_and_display() {
        assert_eq!("get".parse::<RequestMethod>().unwrap(), RequestMethod::Get);
        assert_eq!(RequestMethod::Delete.to_string(), "DELETE");
        assert!("FETCH".parse::<RequestMethod>().is_err());
    }

    #[test]
    fn test_not_configured_response() {
        let response = Response::not_configured();
        assert_eq!(response.status(), NOT_CONFIGURED_STATUS);
        assert!(response.headers().is_empty());
        assert!(response.body().is_empty());
    }

    #[test]
    fn test_invalid_percent_escape_kept() {
        let params = parse_query_string("a=100%&b=%zz&c=a+b");
        assert_eq!(params[0], ("a".to_string(), "100%".to_string()));
        assert_eq!(params[1], ("b".to_string(), "%zz".to_string()));
        assert_eq!(params[2], ("c".to_string(), "a b".to_string()));
    }

    #[test]
    fn test_signed_percent_escape_kept() {
        let params = parse_query_string("a=%+f&b=%-1&c=%2F");
        assert_eq!(params[0], ("a".to_string(), "% f".to_string()));
        assert_eq!(params[1], ("b".to_string(), "%-1".to_string()));
        assert_eq!(params[2], ("c".to_string(), "/".to_string()));
    }
}
