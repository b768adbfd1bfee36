//! Network seam and its reqwest-backed implementation.

use std::time::Duration;

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use thiserror::Error;
use tracing::debug;

use super::types::{Headers, Request, Response};

/// Transport-level failure. A response with any status code is not an error.
#[derive(Error, Debug)]
pub enum NetworkError {
  #[error("Request timed out: {0}")]
  Timeout(String),

  #[error("Connection failed: {0}")]
  Connect(String),

  #[error("Transport error: {0}")]
  Transport(String),
}

impl From<reqwest::Error> for NetworkError {
  fn from(e: reqwest::Error) -> Self {
    if e.is_timeout() {
      NetworkError::Timeout(e.to_string())
    } else if e.is_connect() {
      NetworkError::Connect(e.to_string())
    } else {
      NetworkError::Transport(e.to_string())
    }
  }
}

/// Anything that can perform a request on the worker's behalf.
#[async_trait]
pub trait Network: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<Response, NetworkError>;
}

/// HTTP network backed by a pooled reqwest client.
/// Clone is cheap - reqwest::Client is reference counted.
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
}

impl HttpNetwork {
  pub fn new(timeout: Duration) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

#[async_trait]
impl Network for HttpNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
    let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
      .map_err(|e| NetworkError::Transport(e.to_string()))?;

    let mut builder = self.client.request(method, request.url.clone());
    for (name, value) in request.headers.iter() {
      builder = builder.header(name, value);
    }
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let response = builder.send().await?;
    let status = response.status();

    let mut headers = Headers::new();
    for (name, value) in response.headers() {
      if let Ok(value) = value.to_str() {
        headers.insert(name.as_str(), value);
      }
    }

    let body = response.bytes().await?.to_vec();
    debug!(url = %request.url, status = status.as_u16(), bytes = body.len(), "Fetched");

    Ok(Response {
      status: status.as_u16(),
      status_text: status.canonical_reason().unwrap_or_default().to_string(),
      headers,
      body,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::http::Method;
  use url::Url;
  use wiremock::matchers::{body_json, header, method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  fn network() -> HttpNetwork {
    HttpNetwork::new(Duration::from_secs(5)).unwrap()
  }

  #[tokio::test]
  async fn test_fetch_returns_snapshot() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/styles.css"))
      .respond_with(
        ResponseTemplate::new(200)
          .set_body_raw("body { margin: 0 }", "text/css")
          .insert_header("content-type", "text/css"),
      )
      .mount(&server)
      .await;

    let url = Url::parse(&format!("{}/styles.css", server.uri())).unwrap();
    let response = network().fetch(&Request::get(url)).await.unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.status_text, "OK");
    assert_eq!(response.header("Content-Type"), Some("text/css"));
    assert_eq!(response.body_text(), "body { margin: 0 }");
  }

  #[tokio::test]
  async fn test_non_success_status_is_not_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .respond_with(ResponseTemplate::new(404))
      .mount(&server)
      .await;

    let url = Url::parse(&format!("{}/missing", server.uri())).unwrap();
    let response = network().fetch(&Request::get(url)).await.unwrap();
    assert_eq!(response.status, 404);
    assert!(!response.is_ok());
  }

  #[tokio::test]
  async fn test_post_sends_json_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/webhook/asistencias"))
      .and(header("content-type", "application/json"))
      .and(body_json(serde_json::json!({ "tipo": "ENTRADA" })))
      .respond_with(ResponseTemplate::new(201))
      .expect(1)
      .mount(&server)
      .await;

    let url = Url::parse(&format!("{}/webhook/asistencias", server.uri())).unwrap();
    let request = Request::post_json(url, &serde_json::json!({ "tipo": "ENTRADA" })).unwrap();
    assert_eq!(request.method, Method::Post);

    let response = network().fetch(&request).await.unwrap();
    assert_eq!(response.status, 201);
  }

  #[tokio::test]
  async fn test_unreachable_host_is_a_network_error() {
    // Port 9 (discard) on localhost is expected to refuse connections.
    let url = Url::parse("http://127.0.0.1:9/").unwrap();
    let result = network().fetch(&Request::get(url)).await;
    assert!(result.is_err());
  }
}
