//! The offline worker: request interception, lifecycle and background sync.
//!
//! A `Worker` is one deployed version. It owns the cache tiers named after
//! that version, classifies every request with the `RouteTable`, and hands it
//! to exactly one strategy. `Registration` decides which version is active.

mod background;
mod lifecycle;
mod registration;
mod router;
mod strategy;

use std::sync::Arc;

use color_eyre::{eyre::eyre, Result};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::cache::{CacheStore, CacheVersion, TierStorage};
use crate::config::Config;
use crate::http::{Network, Request};
use crate::submission::{SubmitOutcome, Submission};
use crate::sync::{DrainReport, SyncQueue};

pub use background::BackgroundTasks;
pub use lifecycle::{Lifecycle, LifecycleError, WorkerMessage, WorkerState};
pub use registration::{Registration, UpdateOutcome};
pub use router::{Route, RouteTable};
pub use strategy::{Fallback, ResponseSource, Served, Strategies};

/// Everything a worker version needs to know about the app it serves.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
  pub version: CacheVersion,
  pub app_root: Url,
  /// The Static Asset Set, resolved
  pub static_assets: Vec<Url>,
  pub offline_page: Url,
  pub webhook_url: Url,
  pub sync_tag: String,
  pub skip_waiting_on_install: bool,
}

impl WorkerSettings {
  pub fn from_config(config: &Config) -> Result<Self> {
    Ok(Self {
      version: config.cache_version(),
      app_root: config.app_root()?,
      static_assets: config.static_asset_urls()?,
      offline_page: config.resolve_asset(&config.cache.offline_page)?,
      webhook_url: config.webhook_url()?,
      sync_tag: config.sync.tag.clone(),
      skip_waiting_on_install: config.lifecycle.skip_waiting_on_install,
    })
  }

  /// The same app under another deployment version.
  pub fn with_version(&self, version: &str) -> Self {
    Self {
      version: self.version.with_version(version),
      ..self.clone()
    }
  }

  /// The same settings with install-time skip-waiting turned off, so the
  /// version waits for a `SKIP_WAITING` message while pages are open.
  pub fn without_skip_waiting(&self) -> Self {
    Self {
      skip_waiting_on_install: false,
      ..self.clone()
    }
  }
}

pub struct Worker {
  settings: WorkerSettings,
  store: CacheStore,
  routes: RouteTable,
  strategies: Strategies,
  lifecycle: Lifecycle,
  network: Arc<dyn Network>,
  queue: SyncQueue,
  background: BackgroundTasks,
}

impl Worker {
  pub fn new(
    settings: WorkerSettings,
    storage: Arc<dyn TierStorage>,
    queue: SyncQueue,
    network: Arc<dyn Network>,
  ) -> Self {
    let store = CacheStore::new(storage, settings.version.tier_names());
    let routes = RouteTable::new(
      &settings.app_root,
      &settings.static_assets,
      &settings.webhook_url,
    );
    let background = BackgroundTasks::new();
    let strategies = Strategies::new(
      store.clone(),
      Arc::clone(&network),
      background.clone(),
      Request::get(settings.offline_page.clone()),
    );

    Self {
      settings,
      store,
      routes,
      strategies,
      lifecycle: Lifecycle::new(),
      network,
      queue,
      background,
    }
  }

  pub fn version(&self) -> &CacheVersion {
    &self.settings.version
  }

  pub fn state(&self) -> WorkerState {
    self.lifecycle.state()
  }

  pub fn lifecycle(&self) -> &Lifecycle {
    &self.lifecycle
  }

  pub fn store(&self) -> &CacheStore {
    &self.store
  }

  pub fn queue(&self) -> &SyncQueue {
    &self.queue
  }

  /// Pre-warm the static tier. On failure this version becomes redundant and
  /// must never be activated.
  pub async fn install(&self) -> Result<(), LifecycleError> {
    info!(version = %self.version(), "Worker installing");

    let requests: Vec<Request> = self
      .settings
      .static_assets
      .iter()
      .cloned()
      .map(Request::get)
      .collect();
    let static_tier = self.store.tiers().static_tier.clone();

    if let Err(e) = self
      .store
      .warm(&static_tier, &requests, self.network.as_ref())
      .await
    {
      self.lifecycle.set_state(WorkerState::Redundant);
      error!(version = %self.version(), error = %e, "Worker install failed");
      return Err(LifecycleError::InstallFailed {
        version: self.version().to_string(),
        reason: e.to_string(),
      });
    }

    if let Err(e) = self.store.open(&self.store.tiers().dynamic_tier) {
      warn!(error = %e, "Failed to open dynamic tier");
    }

    self
      .lifecycle
      .transition(WorkerState::Installing, WorkerState::Installed)?;
    if self.settings.skip_waiting_on_install {
      self.lifecycle.request_skip_waiting();
    }

    info!(version = %self.version(), "Worker installed");
    Ok(())
  }

  /// Purge other versions' tiers and take control of open pages. Cleanup is
  /// best effort: a purge failure is logged and activation still completes.
  pub async fn activate(&self) -> Result<(), LifecycleError> {
    self
      .lifecycle
      .transition(WorkerState::Installed, WorkerState::Activating)?;
    info!(version = %self.version(), "Worker activating");

    match self.store.purge_stale(&self.store.tiers().current()) {
      Ok(purged) => info!(count = purged.len(), "Old caches removed"),
      Err(e) => warn!(error = %e, "Failed to purge stale caches"),
    }

    self.lifecycle.set_state(WorkerState::Active);
    self.lifecycle.claim();
    info!(version = %self.version(), "Worker activated");
    Ok(())
  }

  /// Mark a version restored from the registration record as active.
  pub(crate) fn resume(&self) {
    self.lifecycle.set_state(WorkerState::Active);
    self.lifecycle.claim();
  }

  pub(crate) fn supersede(&self) {
    self.lifecycle.set_state(WorkerState::Superseded);
    info!(version = %self.version(), "Worker superseded");
  }

  pub fn handle_message(&self, message: WorkerMessage) {
    match message {
      WorkerMessage::SkipWaiting => {
        debug!(version = %self.version(), "Skip waiting requested");
        self.lifecycle.request_skip_waiting();
      }
    }
  }

  pub fn classify(&self, request: &Request) -> Route {
    self.routes.classify(request)
  }

  /// Handle an outgoing request. `None` means not intercepted: the caller
  /// should send it to the network unchanged.
  pub async fn intercept(&self, request: &Request) -> Option<Served> {
    let route = self.classify(request);
    debug!(method = %request.method, url = %request.url, route = ?route, "Intercept");

    match route {
      Route::Passthrough => None,
      Route::CacheFirst => Some(self.strategies.cache_first(request).await),
      Route::Webhook => Some(
        self
          .strategies
          .network_first(request, Fallback::OfflineJson)
          .await,
      ),
      Route::NetworkFirst => Some(
        self
          .strategies
          .network_first(request, Fallback::OfflinePage)
          .await,
      ),
    }
  }

  /// Background sync trigger. Only the configured tag drains the queue.
  pub async fn handle_sync(&self, tag: &str) -> Option<DrainReport> {
    if tag != self.settings.sync_tag {
      debug!(tag, "Ignoring unknown sync tag");
      return None;
    }
    info!("Background sync started");
    Some(
      self
        .queue
        .drain(self.network.as_ref(), &self.settings.webhook_url)
        .await,
    )
  }

  /// Send a submission the way the page does. Anything that did not reach
  /// the webhook live, or met a transient failure there, is queued for
  /// background sync. Other 4xx answers are rejections.
  pub async fn submit(&self, submission: &Submission) -> Result<SubmitOutcome> {
    let request = Request::post_json(self.settings.webhook_url.clone(), submission)
      .map_err(|e| eyre!("Failed to encode submission: {}", e))?
      .with_header("Accept", "application/json, text/plain, */*");

    let served = self
      .intercept(&request)
      .await
      .ok_or_else(|| eyre!("Submission to {} was not intercepted", request.url))?;

    match served.source {
      ResponseSource::Network if served.response.is_ok() => {
        info!(tipo = %submission.tipo, "Submission delivered");
        Ok(SubmitOutcome::Delivered {
          status: served.response.status,
        })
      }
      ResponseSource::Network if is_transient(served.response.status) => {
        warn!(status = served.response.status, "Webhook unavailable, queueing submission");
        let record = self.queue.enqueue(submission)?;
        Ok(SubmitOutcome::Queued { id: record.id })
      }
      ResponseSource::Network => {
        warn!(status = served.response.status, "Submission rejected by webhook");
        Ok(SubmitOutcome::Rejected {
          status: served.response.status,
          body: served.response.body_text().into_owned(),
        })
      }
      ResponseSource::Cache | ResponseSource::OfflineFallback => {
        let record = self.queue.enqueue(submission)?;
        Ok(SubmitOutcome::Queued { id: record.id })
      }
    }
  }

  /// Wait for detached cache stores to finish.
  pub async fn wait_idle(&self) {
    debug!(in_flight = self.background.in_flight(), "Flushing background tasks");
    self.background.wait_idle().await;
  }
}

/// Statuses worth retrying later: server errors, timeouts and throttling.
fn is_transient(status: u16) -> bool {
  status >= 500 || status == 408 || status == 429
}
