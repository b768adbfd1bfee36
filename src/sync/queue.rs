//! Durable queue of submissions waiting for delivery.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::params;
use serde::Serialize;
use tracing::{error, info, warn};
use url::Url;

use crate::db::{parse_datetime, Database};
use crate::http::{Network, Request};
use crate::submission::{Submission, Tipo};

/// A queued submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingSubmission {
  pub id: i64,
  #[serde(flatten)]
  pub submission: Submission,
  pub enqueued_at: DateTime<Utc>,
  /// Failed delivery attempts so far
  pub attempts: u32,
  pub last_error: Option<String>,
}

/// Result of one drain pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
  pub delivered: usize,
  pub failed: usize,
  /// Records dropped after reaching the attempt cap
  pub dropped: usize,
  /// Records still queued after the pass
  pub remaining: usize,
}

/// Deferred sync queue. The only writer of `pending_submissions`.
#[derive(Clone)]
pub struct SyncQueue {
  db: Arc<Database>,
  max_attempts: Option<u32>,
}

impl SyncQueue {
  pub fn new(db: Arc<Database>, max_attempts: Option<u32>) -> Self {
    Self { db, max_attempts }
  }

  /// Persist a submission. Ids grow with insertion order.
  pub fn enqueue(&self, submission: &Submission) -> Result<PendingSubmission> {
    let conn = self.db.lock()?;

    conn
      .execute(
        "INSERT INTO pending_submissions (tipo, fecha, fecha_iso, hora, enqueued_at)
         VALUES (?, ?, ?, ?, datetime('now'))",
        params![
          submission.tipo.as_str(),
          submission.fecha,
          submission.fecha_iso,
          submission.hora
        ],
      )
      .map_err(|e| eyre!("Failed to enqueue submission: {}", e))?;

    let id = conn.last_insert_rowid();
    info!(id, tipo = %submission.tipo, "Submission queued for background sync");

    Ok(PendingSubmission {
      id,
      submission: submission.clone(),
      enqueued_at: Utc::now(),
      attempts: 0,
      last_error: None,
    })
  }

  /// Every queued record, oldest first.
  pub fn pending(&self) -> Result<Vec<PendingSubmission>> {
    let conn = self.db.lock()?;

    let mut stmt = conn
      .prepare(
        "SELECT id, tipo, fecha, fecha_iso, hora, enqueued_at, attempts, last_error
         FROM pending_submissions ORDER BY id",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows = stmt
      .query_map([], |row| {
        Ok((
          row.get::<_, i64>(0)?,
          row.get::<_, String>(1)?,
          row.get::<_, String>(2)?,
          row.get::<_, String>(3)?,
          row.get::<_, String>(4)?,
          row.get::<_, String>(5)?,
          row.get::<_, u32>(6)?,
          row.get::<_, Option<String>>(7)?,
        ))
      })
      .map_err(|e| eyre!("Failed to query pending submissions: {}", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read pending submission: {}", e))?;

    rows
      .into_iter()
      .map(
        |(id, tipo, fecha, fecha_iso, hora, enqueued_at, attempts, last_error)| {
          let tipo: Tipo = tipo
            .parse()
            .map_err(|_| eyre!("Pending submission {} has invalid tipo '{}'", id, tipo))?;
          Ok(PendingSubmission {
            id,
            submission: Submission {
              tipo,
              fecha,
              fecha_iso,
              hora,
            },
            enqueued_at: parse_datetime(&enqueued_at)?,
            attempts,
            last_error,
          })
        },
      )
      .collect()
  }

  /// Delete a record. Removing an absent id is a no-op returning false.
  pub fn remove(&self, id: i64) -> Result<bool> {
    let conn = self.db.lock()?;
    let removed = conn
      .execute("DELETE FROM pending_submissions WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to remove pending submission {}: {}", id, e))?;
    Ok(removed > 0)
  }

  /// Operator-initiated removal of a record that will never be delivered.
  pub fn purge(&self, id: i64) -> Result<bool> {
    let removed = self.remove(id)?;
    if removed {
      warn!(id, "Pending submission purged without delivery");
    }
    Ok(removed)
  }

  /// Count a failed attempt; returns the new attempt count.
  fn record_failure(&self, id: i64, reason: &str) -> Result<u32> {
    let conn = self.db.lock()?;
    conn
      .execute(
        "UPDATE pending_submissions SET attempts = attempts + 1, last_error = ? WHERE id = ?",
        params![reason, id],
      )
      .map_err(|e| eyre!("Failed to record attempt for {}: {}", id, e))?;

    conn
      .query_row(
        "SELECT attempts FROM pending_submissions WHERE id = ?",
        params![id],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to read attempts for {}: {}", id, e))
  }

  /// Deliver every queued record to `webhook`, one at a time.
  ///
  /// Delivered records are removed; failed ones stay queued for the next
  /// trigger. Never fails: storage and delivery errors are logged.
  pub async fn drain(&self, network: &dyn Network, webhook: &Url) -> DrainReport {
    let mut report = DrainReport::default();

    let pending = match self.pending() {
      Ok(pending) => pending,
      Err(e) => {
        error!(error = %e, "Failed to read pending submissions");
        return report;
      }
    };

    if pending.is_empty() {
      return report;
    }
    info!(count = pending.len(), "Syncing pending submissions");

    for record in pending {
      match self.deliver(network, webhook, &record).await {
        Ok(()) => {
          report.delivered += 1;
          match self.remove(record.id) {
            Ok(_) => info!(id = record.id, "Pending submission synced"),
            Err(e) => error!(id = record.id, error = %e, "Delivered but failed to dequeue"),
          }
        }
        Err(reason) => {
          report.failed += 1;
          warn!(id = record.id, error = %reason, "Failed to sync pending submission");
          self.handle_failure(&record, &reason, &mut report);
        }
      }
    }

    report.remaining = match self.pending() {
      Ok(pending) => pending.len(),
      Err(e) => {
        error!(error = %e, "Failed to count pending submissions");
        0
      }
    };
    report
  }

  async fn deliver(
    &self,
    network: &dyn Network,
    webhook: &Url,
    record: &PendingSubmission,
  ) -> Result<(), String> {
    let request = Request::post_json(webhook.clone(), &record.submission)
      .map_err(|e| format!("failed to encode submission: {}", e))?
      .with_header("Accept", "application/json, text/plain, */*");

    let response = network.fetch(&request).await.map_err(|e| e.to_string())?;
    if response.is_ok() {
      Ok(())
    } else {
      Err(format!("webhook answered {}", response.status))
    }
  }

  fn handle_failure(&self, record: &PendingSubmission, reason: &str, report: &mut DrainReport) {
    let attempts = match self.record_failure(record.id, reason) {
      Ok(attempts) => attempts,
      Err(e) => {
        error!(id = record.id, error = %e, "Failed to record sync attempt");
        return;
      }
    };

    if let Some(max) = self.max_attempts {
      if attempts >= max {
        match self.remove(record.id) {
          Ok(_) => {
            report.dropped += 1;
            warn!(id = record.id, attempts, "Dropping submission after repeated failures");
          }
          Err(e) => error!(id = record.id, error = %e, "Failed to drop submission"),
        }
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::http::testing::FakeNetwork;
  use crate::http::{Method, Response};

  const WEBHOOK: &str = "https://hooks.test/webhook/asistencias";

  fn queue(max_attempts: Option<u32>) -> SyncQueue {
    SyncQueue::new(Arc::new(Database::open_in_memory().unwrap()), max_attempts)
  }

  fn submission(hora: &str) -> Submission {
    Submission::from_form("ENTRADA", "2025-08-31", hora).unwrap()
  }

  fn webhook() -> Url {
    Url::parse(WEBHOOK).unwrap()
  }

  #[test]
  fn test_enqueue_preserves_insertion_order() {
    let queue = queue(None);
    let first = queue.enqueue(&submission("08:00")).unwrap();
    let second = queue.enqueue(&submission("17:00")).unwrap();
    assert!(second.id > first.id);

    let pending = queue.pending().unwrap();
    assert_eq!(pending.len(), 2);
    assert_eq!(pending[0].submission.hora, "08:00");
    assert_eq!(pending[1].submission.hora, "17:00");
    assert_eq!(pending[0].attempts, 0);
  }

  #[test]
  fn test_remove_is_idempotent() {
    let queue = queue(None);
    let record = queue.enqueue(&submission("08:00")).unwrap();
    assert!(queue.remove(record.id).unwrap());
    assert!(!queue.remove(record.id).unwrap());
    assert!(queue.pending().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_drain_removes_delivered_records() {
    let queue = queue(None);
    queue.enqueue(&submission("08:00")).unwrap();
    queue.enqueue(&submission("17:00")).unwrap();

    let network = FakeNetwork::new();
    network.respond(Method::Post, WEBHOOK, Response::new(200, "ok"));

    let report = queue.drain(&network, &webhook()).await;
    assert_eq!(report.delivered, 2);
    assert_eq!(report.remaining, 0);
    assert_eq!(network.calls(), 2);
    assert!(queue.pending().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_drain_keeps_failed_records() {
    let queue = queue(None);
    queue.enqueue(&submission("08:00")).unwrap();

    let network = FakeNetwork::new();
    network.set_offline(true);

    let report = queue.drain(&network, &webhook()).await;
    assert_eq!(report.failed, 1);
    assert_eq!(report.remaining, 1);

    let pending = queue.pending().unwrap();
    assert_eq!(pending[0].attempts, 1);
    assert!(pending[0].last_error.is_some());

    network.set_offline(false);
    network.respond(Method::Post, WEBHOOK, Response::new(201, ""));
    let report = queue.drain(&network, &webhook()).await;
    assert_eq!(report.delivered, 1);
    assert_eq!(report.remaining, 0);
  }

  #[tokio::test]
  async fn test_drain_treats_non_success_as_failure() {
    let queue = queue(None);
    queue.enqueue(&submission("08:00")).unwrap();

    let network = FakeNetwork::new();
    network.respond(Method::Post, WEBHOOK, Response::new(500, "boom"));

    let report = queue.drain(&network, &webhook()).await;
    assert_eq!(report.failed, 1);
    assert_eq!(
      queue.pending().unwrap()[0].last_error.as_deref(),
      Some("webhook answered 500")
    );
  }

  #[tokio::test]
  async fn test_drain_drops_after_max_attempts() {
    let queue = queue(Some(2));
    queue.enqueue(&submission("08:00")).unwrap();

    let network = FakeNetwork::new();
    network.set_offline(true);

    let first = queue.drain(&network, &webhook()).await;
    assert_eq!((first.dropped, first.remaining), (0, 1));

    let second = queue.drain(&network, &webhook()).await;
    assert_eq!((second.dropped, second.remaining), (1, 0));
  }

  #[tokio::test]
  async fn test_drain_empty_queue_makes_no_requests() {
    let queue = queue(None);
    let network = FakeNetwork::new();
    let report = queue.drain(&network, &webhook()).await;
    assert_eq!(report, DrainReport::default());
    assert_eq!(network.calls(), 0);
  }
}
