//! Detached side tasks that must never hold up a response.

use std::future::Future;
use std::sync::{Arc, Mutex};

use color_eyre::Result;
use tokio::task::JoinSet;
use tracing::warn;

/// A set of fire-and-forget tasks.
///
/// `spawn` never waits and the outcome of a task is only ever logged.
/// `wait_idle` lets the owner flush outstanding work before shutting down.
#[derive(Clone, Default)]
pub struct BackgroundTasks {
  tasks: Arc<Mutex<JoinSet<()>>>,
}

impl BackgroundTasks {
  pub fn new() -> Self {
    Self::default()
  }

  /// Start `task` without awaiting it. Must be called within a tokio runtime.
  pub fn spawn<F>(&self, label: &'static str, task: F)
  where
    F: Future<Output = Result<()>> + Send + 'static,
  {
    let task = async move {
      if let Err(e) = task.await {
        warn!(task = label, error = %e, "Background task failed");
      }
    };

    match self.tasks.lock() {
      Ok(mut tasks) => {
        reap_finished(&mut tasks);
        tasks.spawn(task);
      }
      Err(_) => {
        // Poisoned set: run untracked
        tokio::spawn(task);
      }
    }
  }

  /// Wait until every task spawned so far, and any they spawn, has finished.
  pub async fn wait_idle(&self) {
    loop {
      let mut batch = match self.tasks.lock() {
        Ok(mut tasks) => std::mem::take(&mut *tasks),
        Err(_) => return,
      };
      if batch.is_empty() {
        return;
      }
      while let Some(result) = batch.join_next().await {
        if let Err(e) = result {
          warn!(error = %e, "Background task panicked or was cancelled");
        }
      }
    }
  }

  /// Tasks spawned and not yet finished.
  pub fn in_flight(&self) -> usize {
    match self.tasks.lock() {
      Ok(mut tasks) => {
        reap_finished(&mut tasks);
        tasks.len()
      }
      Err(_) => 0,
    }
  }
}

/// Drop every task that has already completed.
fn reap_finished(tasks: &mut JoinSet<()>) {
  while let Some(result) = tasks.try_join_next() {
    if let Err(e) = result {
      warn!(error = %e, "Background task panicked or was cancelled");
    }
  }
}
