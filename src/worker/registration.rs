//! Version handover: which worker controls the app scope.

use std::sync::Arc;

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension};
use tracing::{debug, error, info};

use super::{Served, Worker, WorkerMessage};
use crate::db::Database;
use crate::http::Request;

/// Result of offering a new version to the registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
  /// The offered version is already active
  Unchanged,
  /// Installed and now active
  Activated,
  /// Installed, waiting for open pages to close or a skip-waiting message
  Waiting,
  /// Install failed; the previous version keeps serving
  InstallFailed(String),
}

/// Tracks the active and waiting worker for one scope and persists which
/// version is active across restarts.
pub struct Registration {
  db: Arc<Database>,
  scope: String,
  active: Option<Worker>,
  waiting: Option<Worker>,
}

impl Registration {
  pub fn new(db: Arc<Database>, scope: impl Into<String>) -> Self {
    Self {
      db,
      scope: scope.into(),
      active: None,
      waiting: None,
    }
  }

  /// Version recorded as active by a previous run.
  pub fn recorded_version(&self) -> Result<Option<String>> {
    let conn = self.db.lock()?;
    conn
      .query_row(
        "SELECT active_version FROM registration WHERE scope = ?",
        params![self.scope],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read registration for {}: {}", self.scope, e))
  }

  fn record_active(&self, version: &str) -> Result<()> {
    let conn = self.db.lock()?;
    conn
      .execute(
        "INSERT OR REPLACE INTO registration (scope, active_version, activated_at)
         VALUES (?, ?, datetime('now'))",
        params![self.scope, version],
      )
      .map_err(|e| eyre!("Failed to record active version for {}: {}", self.scope, e))?;
    Ok(())
  }

  /// Reinstate the version recorded by a previous run as active, without
  /// installing it again.
  pub fn restore(&mut self, worker: Worker) {
    debug!(version = %worker.version(), "Restoring active worker");
    worker.resume();
    self.active = Some(worker);
  }

  pub fn active(&self) -> Option<&Worker> {
    self.active.as_ref()
  }

  pub fn waiting(&self) -> Option<&Worker> {
    self.waiting.as_ref()
  }

  /// Install `candidate` and activate it when nothing holds it back.
  ///
  /// With `open_clients > 0` the new version waits unless it asked to skip
  /// waiting. A failed install leaves the active version untouched.
  pub async fn update(&mut self, candidate: Worker, open_clients: usize) -> Result<UpdateOutcome> {
    if let Some(active) = &self.active {
      if active.version() == candidate.version() {
        return Ok(UpdateOutcome::Unchanged);
      }
    }

    if let Err(e) = candidate.install().await {
      error!(
        error = %e,
        active = ?self.active.as_ref().map(|w| w.version().to_string()),
        "Update rejected, keeping current worker"
      );
      return Ok(UpdateOutcome::InstallFailed(e.to_string()));
    }

    let ready = candidate.lifecycle().skip_waiting_requested() || open_clients == 0;
    self.waiting = Some(candidate);

    if ready {
      self.activate_waiting().await?;
      Ok(UpdateOutcome::Activated)
    } else {
      info!(open_clients, "New worker installed, waiting to activate");
      Ok(UpdateOutcome::Waiting)
    }
  }

  /// Deliver a page message to the waiting worker. Returns true when it
  /// caused that worker to activate.
  pub async fn post_message(&mut self, message: WorkerMessage) -> Result<bool> {
    let Some(waiting) = &self.waiting else {
      debug!(?message, "No waiting worker for message");
      return Ok(false);
    };

    waiting.handle_message(message);
    if waiting.lifecycle().skip_waiting_requested() {
      self.activate_waiting().await?;
      return Ok(true);
    }
    Ok(false)
  }

  async fn activate_waiting(&mut self) -> Result<()> {
    let Some(worker) = self.waiting.take() else {
      return Ok(());
    };

    // Pending dynamic stores must land before the purge
    worker.wait_idle().await;
    if let Some(previous) = &self.active {
      previous.wait_idle().await;
    }

    worker
      .activate()
      .await
      .map_err(|e| eyre!("Failed to activate {}: {}", worker.version(), e))?;

    let version = worker.version().version().to_string();
    if let Some(previous) = self.active.replace(worker) {
      previous.supersede();
    }
    self.record_active(&version)?;
    Ok(())
  }

  /// Route a request through the active worker. `None` when no worker is
  /// active or the request is not intercepted.
  pub async fn intercept(&self, request: &Request) -> Option<Served> {
    match &self.active {
      Some(worker) => worker.intercept(request).await,
      None => None,
    }
  }

  /// Flush detached work of every held worker.
  pub async fn wait_idle(&self) {
    for worker in self.active.iter().chain(self.waiting.iter()) {
      worker.wait_idle().await;
    }
  }
}
