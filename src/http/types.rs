//! Request and response snapshots passed between the router, the strategies
//! and the network.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

/// HTTP request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
  Get,
  Head,
  Post,
  Put,
  Patch,
  Delete,
  Options,
}

impl Method {
  pub fn as_str(&self) -> &'static str {
    match self {
      Method::Get => "GET",
      Method::Head => "HEAD",
      Method::Post => "POST",
      Method::Put => "PUT",
      Method::Patch => "PATCH",
      Method::Delete => "DELETE",
      Method::Options => "OPTIONS",
    }
  }
}

impl fmt::Display for Method {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Method {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_uppercase().as_str() {
      "GET" => Ok(Method::Get),
      "HEAD" => Ok(Method::Head),
      "POST" => Ok(Method::Post),
      "PUT" => Ok(Method::Put),
      "PATCH" => Ok(Method::Patch),
      "DELETE" => Ok(Method::Delete),
      "OPTIONS" => Ok(Method::Options),
      other => Err(format!("unsupported HTTP method: {}", other)),
    }
  }
}

/// Ordered header list with case-insensitive lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
  pub fn new() -> Self {
    Self::default()
  }

  /// Set a header, replacing any existing value with the same name.
  pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
    let name = name.into();
    let value = value.into();
    match self
      .0
      .iter_mut()
      .find(|(existing, _)| existing.eq_ignore_ascii_case(&name))
    {
      Some((_, existing)) => *existing = value,
      None => self.0.push((name, value)),
    }
  }

  pub fn get(&self, name: &str) -> Option<&str> {
    self
      .0
      .iter()
      .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
      .map(|(_, value)| value.as_str())
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
    self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
  }
}

/// Identity of a request inside a cache tier: GET and POST to the same URL
/// are different entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
  pub method: Method,
  pub url: String,
}

impl RequestKey {
  pub fn new(method: Method, url: &Url) -> Self {
    Self {
      method,
      url: url.as_str().to_string(),
    }
  }

  /// Stable, fixed-length storage key.
  pub fn cache_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_str().as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_bytes());
    hex::encode(hasher.finalize())
  }
}

impl fmt::Display for RequestKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} {}", self.method, self.url)
  }
}

/// An outgoing request as seen by the worker.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub headers: Headers,
  pub body: Option<Vec<u8>>,
}

impl Request {
  pub fn new(method: Method, url: Url) -> Self {
    Self {
      method,
      url,
      headers: Headers::new(),
      body: None,
    }
  }

  pub fn get(url: Url) -> Self {
    Self::new(Method::Get, url)
  }

  /// Build a POST carrying `payload` serialized as JSON.
  pub fn post_json<T: Serialize>(url: Url, payload: &T) -> serde_json::Result<Self> {
    let body = serde_json::to_vec(payload)?;
    Ok(
      Self::new(Method::Post, url)
        .with_header("Content-Type", "application/json")
        .with_body(body),
    )
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.insert(name, value);
    self
  }

  pub fn with_body(mut self, body: Vec<u8>) -> Self {
    self.body = Some(body);
    self
  }

  pub fn key(&self) -> RequestKey {
    RequestKey::new(self.method, &self.url)
  }

  /// Whether the caller is asking for a page rather than data.
  pub fn accepts_html(&self) -> bool {
    self
      .headers
      .get("accept")
      .is_some_and(|accept| accept.contains("text/html"))
  }
}

/// A fully buffered response. Cloning copies the body, so a response can be
/// stored and served independently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub status_text: String,
  pub headers: Headers,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      status_text: String::new(),
      headers: Headers::new(),
      body: body.into(),
    }
  }

  /// Plain text response.
  pub fn text(status: u16, status_text: &str, body: &str) -> Self {
    let mut response = Self::new(status, body.as_bytes().to_vec());
    response.status_text = status_text.to_string();
    response
      .headers
      .insert("Content-Type", "text/plain; charset=utf-8");
    response
  }

  /// JSON response with `value` as the body.
  pub fn json<T: Serialize>(status: u16, status_text: &str, value: &T) -> serde_json::Result<Self> {
    let mut response = Self::new(status, serde_json::to_vec(value)?);
    response.status_text = status_text.to_string();
    response.headers.insert("Content-Type", "application/json");
    Ok(response)
  }

  /// `ok` in the fetch sense: any 2xx status.
  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self.headers.get(name)
  }

  pub fn body_text(&self) -> Cow<'_, str> {
    String::from_utf8_lossy(&self.body)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_headers_are_case_insensitive() {
    let mut headers = Headers::new();
    headers.insert("Content-Type", "text/html");
    headers.insert("content-type", "application/json");
    assert_eq!(headers.get("CONTENT-TYPE"), Some("application/json"));
    assert_eq!(headers.iter().count(), 1);
  }

  #[test]
  fn test_request_key_distinguishes_method() {
    let url = Url::parse("https://example.org/api").unwrap();
    let get = RequestKey::new(Method::Get, &url);
    let post = RequestKey::new(Method::Post, &url);
    assert_ne!(get.cache_hash(), post.cache_hash());
    assert_eq!(get.cache_hash().len(), 64);
  }

  #[test]
  fn test_accepts_html() {
    let url = Url::parse("https://example.org/page").unwrap();
    let page = Request::get(url.clone()).with_header("Accept", "text/html,application/xhtml+xml");
    let data = Request::get(url).with_header("Accept", "application/json");
    assert!(page.accepts_html());
    assert!(!data.accepts_html());
  }

  #[test]
  fn test_response_ok_range() {
    assert!(Response::new(200, "").is_ok());
    assert!(Response::new(204, "").is_ok());
    assert!(!Response::new(302, "").is_ok());
    assert!(!Response::new(503, "").is_ok());
  }

  #[test]
  fn test_method_from_str() {
    assert_eq!("post".parse::<Method>(), Ok(Method::Post));
    assert!("BREW".parse::<Method>().is_err());
  }
}
