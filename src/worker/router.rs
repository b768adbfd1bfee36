//! Request classification. Pure and synchronous: no I/O, no state.

use std::collections::HashSet;

use url::{Origin, Url};

use crate::http::{Method, Request};

/// The strategy a request is handed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
  /// Not intercepted: the request goes to the network untouched
  Passthrough,
  /// App shell asset: serve from cache, network on miss
  CacheFirst,
  /// Webhook call: network first, offline JSON fallback
  Webhook,
  /// Anything else: network first, offline page fallback
  NetworkFirst,
}

/// What the router needs to know about the app.
#[derive(Debug, Clone)]
pub struct RouteTable {
  origin: Origin,
  static_paths: HashSet<String>,
  webhook_host: Option<String>,
}

impl RouteTable {
  /// `app_root` is the root document URL; its path and `index.html` under it
  /// are always treated as static.
  pub fn new(app_root: &Url, static_assets: &[Url], webhook: &Url) -> Self {
    let mut static_paths: HashSet<String> = static_assets
      .iter()
      .map(|url| url.path().to_string())
      .collect();
    static_paths.insert(app_root.path().to_string());
    if let Ok(index) = app_root.join("index.html") {
      static_paths.insert(index.path().to_string());
    }

    Self {
      origin: app_root.origin(),
      static_paths,
      webhook_host: webhook.host_str().map(|host| host.to_ascii_lowercase()),
    }
  }

  pub fn classify(&self, request: &Request) -> Route {
    if !matches!(request.method, Method::Get | Method::Post) {
      return Route::Passthrough;
    }

    let url = &request.url;
    if url.origin() == self.origin && self.static_paths.contains(url.path()) {
      return Route::CacheFirst;
    }

    let is_webhook = match (url.host_str(), &self.webhook_host) {
      (Some(host), Some(webhook)) => host.eq_ignore_ascii_case(webhook),
      _ => false,
    };
    if is_webhook {
      return Route::Webhook;
    }

    Route::NetworkFirst
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn table() -> RouteTable {
    let root = Url::parse("https://app.test/asistencias/").unwrap();
    let assets = ["", "offline.html", "styles.css", "icons/icon-192x192.png"]
      .iter()
      .map(|p| root.join(p).unwrap())
      .collect::<Vec<_>>();
    let webhook = Url::parse("https://hooks.test/webhook/asistencias").unwrap();
    RouteTable::new(&root, &assets, &webhook)
  }

  fn request(method: Method, url: &str) -> Request {
    Request::new(method, Url::parse(url).unwrap())
  }

  #[test]
  fn test_methods_other_than_get_and_post_pass_through() {
    let table = table();
    for method in [
      Method::Head,
      Method::Put,
      Method::Patch,
      Method::Delete,
      Method::Options,
    ] {
      for url in [
        "https://app.test/asistencias/styles.css",
        "https://hooks.test/webhook/asistencias",
        "https://other.test/",
      ] {
        assert_eq!(table.classify(&request(method, url)), Route::Passthrough);
      }
    }
  }

  #[test]
  fn test_static_assets_are_cache_first() {
    let table = table();
    for url in [
      "https://app.test/asistencias/",
      "https://app.test/asistencias/index.html",
      "https://app.test/asistencias/styles.css",
      "https://app.test/asistencias/icons/icon-192x192.png",
    ] {
      assert_eq!(table.classify(&request(Method::Get, url)), Route::CacheFirst, "{}", url);
    }
  }

  #[test]
  fn test_static_path_on_other_origin_is_not_cache_first() {
    let table = table();
    assert_eq!(
      table.classify(&request(Method::Get, "https://cdn.test/asistencias/styles.css")),
      Route::NetworkFirst
    );
  }

  #[test]
  fn test_webhook_host_is_routed_to_webhook() {
    let table = table();
    assert_eq!(
      table.classify(&request(Method::Post, "https://hooks.test/webhook/asistencias")),
      Route::Webhook
    );
    assert_eq!(
      table.classify(&request(Method::Get, "https://HOOKS.test/anything")),
      Route::Webhook
    );
  }

  #[test]
  fn test_everything_else_is_network_first() {
    let table = table();
    assert_eq!(
      table.classify(&request(Method::Get, "https://app.test/asistencias/report.json")),
      Route::NetworkFirst
    );
    assert_eq!(
      table.classify(&request(Method::Get, "https://fonts.test/font.woff2")),
      Route::NetworkFirst
    );
  }
}
