//! Caching strategies. Each one ends in exactly one response; none of them
//! retries or returns an error.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use super::background::BackgroundTasks;
use crate::cache::CacheStore;
use crate::http::{Network, Request, Response};

const OFFLINE_ERROR: &str = "Sin conexión";
const OFFLINE_MESSAGE: &str =
  "Los datos se guardarán localmente y se enviarán cuando haya conexión";

/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Live network response
  Network,
  /// Stored snapshot from one of the tiers
  Cache,
  /// Offline page or a synthesized 503
  OfflineFallback,
}

impl std::fmt::Display for ResponseSource {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      ResponseSource::Network => write!(f, "network"),
      ResponseSource::Cache => write!(f, "cache"),
      ResponseSource::OfflineFallback => write!(f, "offline-fallback"),
    }
  }
}

/// A response handed back for an intercepted request.
#[derive(Debug, Clone)]
pub struct Served {
  pub response: Response,
  pub source: ResponseSource,
}

impl Served {
  fn new(response: Response, source: ResponseSource) -> Self {
    Self { response, source }
  }
}

/// What to serve when the network fails and nothing is cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fallback {
  /// 503 with the offline JSON notice
  OfflineJson,
  /// The cached offline page for HTML requests, plain 503 otherwise
  OfflinePage,
}

/// Body of the synthesized webhook response.
#[derive(Debug, Serialize)]
struct OfflineNotice<'a> {
  error: &'a str,
  message: &'a str,
}

/// Strategy executors bound to one cache store and network.
#[derive(Clone)]
pub struct Strategies {
  store: CacheStore,
  network: Arc<dyn Network>,
  background: BackgroundTasks,
  offline_page: Request,
}

impl Strategies {
  pub fn new(
    store: CacheStore,
    network: Arc<dyn Network>,
    background: BackgroundTasks,
    offline_page: Request,
  ) -> Self {
    Self {
      store,
      network,
      background,
      offline_page,
    }
  }

  /// Serve from any tier; go to the network only on a miss. Network results
  /// are returned as-is and not cached.
  pub async fn cache_first(&self, request: &Request) -> Served {
    if let Some(response) = self.cached(request) {
      debug!(url = %request.url, "Served from cache");
      return Served::new(response, ResponseSource::Cache);
    }

    match self.network.fetch(request).await {
      Ok(response) => Served::new(response, ResponseSource::Network),
      Err(e) => {
        warn!(url = %request.url, error = %e, "Static asset missing from cache and network failed");
        Served::new(plain_unavailable(), ResponseSource::OfflineFallback)
      }
    }
  }

  /// Try the network; on success store a copy in the dynamic tier in the
  /// background. On network failure fall back to the cache, then `fallback`.
  pub async fn network_first(&self, request: &Request, fallback: Fallback) -> Served {
    match self.network.fetch(request).await {
      Ok(response) => {
        if response.is_ok() {
          self.store_in_background(request, &response);
        }
        Served::new(response, ResponseSource::Network)
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "Network failed, trying cache");
        if let Some(response) = self.cached(request) {
          return Served::new(response, ResponseSource::Cache);
        }
        Served::new(self.offline_response(request, fallback), ResponseSource::OfflineFallback)
      }
    }
  }

  /// Lookup where a storage error counts as a miss.
  fn cached(&self, request: &Request) -> Option<Response> {
    match self.store.lookup(request) {
      Ok(found) => found,
      Err(e) => {
        warn!(url = %request.url, error = %e, "Cache lookup failed");
        None
      }
    }
  }

  fn store_in_background(&self, request: &Request, response: &Response) {
    let store = self.store.clone();
    let tier = store.tiers().dynamic_tier.clone();
    let key = request.key();
    let snapshot = response.clone();

    self.background.spawn("dynamic-store", async move {
      store.put_if_open(&tier, &key, &snapshot).map(|_| ())
    });
  }

  fn offline_response(&self, request: &Request, fallback: Fallback) -> Response {
    match fallback {
      Fallback::OfflineJson => offline_json(),
      Fallback::OfflinePage => {
        if request.accepts_html() {
          let static_tier = &self.store.tiers().static_tier;
          match self.store.lookup_in(static_tier, &self.offline_page) {
            Ok(Some(page)) => return page,
            Ok(None) => debug!("Offline page not cached"),
            Err(e) => warn!(error = %e, "Offline page lookup failed"),
          }
        }
        plain_unavailable()
      }
    }
  }
}

fn offline_json() -> Response {
  let notice = OfflineNotice {
    error: OFFLINE_ERROR,
    message: OFFLINE_MESSAGE,
  };
  Response::json(503, "Service Unavailable", &notice)
    .unwrap_or_else(|_| Response::text(503, "Service Unavailable", OFFLINE_ERROR))
}

fn plain_unavailable() -> Response {
  Response::text(503, "Service Unavailable", OFFLINE_ERROR)
}
