//! Worker lifecycle states and control messages.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use serde::Deserialize;
use thiserror::Error;

/// Lifecycle states of one worker version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  /// Pre-warming the static tier
  Installing,
  /// Static tier complete; waiting to activate
  Installed,
  /// Purging tiers of older versions
  Activating,
  /// Controlling pages and intercepting requests
  Active,
  /// Replaced by a newer active version
  Superseded,
  /// Install failed; this version never becomes active
  Redundant,
}

impl fmt::Display for WorkerState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      WorkerState::Installing => write!(f, "installing"),
      WorkerState::Installed => write!(f, "installed"),
      WorkerState::Activating => write!(f, "activating"),
      WorkerState::Active => write!(f, "active"),
      WorkerState::Superseded => write!(f, "superseded"),
      WorkerState::Redundant => write!(f, "redundant"),
    }
  }
}

/// Control message posted by a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum WorkerMessage {
  /// Activate now instead of waiting for open pages to close
  #[serde(rename = "SKIP_WAITING")]
  SkipWaiting,
}

impl WorkerMessage {
  /// Parse a JSON message. Unknown types are not messages.
  pub fn parse(raw: &str) -> Option<Self> {
    serde_json::from_str(raw).ok()
  }
}

#[derive(Error, Debug)]
pub enum LifecycleError {
  #[error("Install failed for {version}: {reason}")]
  InstallFailed { version: String, reason: String },

  #[error("Invalid worker state: expected {expected}, got {actual}")]
  InvalidState {
    expected: WorkerState,
    actual: WorkerState,
  },
}

/// State cell shared by the tasks of one worker.
#[derive(Debug)]
pub struct Lifecycle {
  state: RwLock<WorkerState>,
  skip_waiting: AtomicBool,
  claimed: AtomicBool,
}

impl Default for Lifecycle {
  fn default() -> Self {
    Self {
      state: RwLock::new(WorkerState::Installing),
      skip_waiting: AtomicBool::new(false),
      claimed: AtomicBool::new(false),
    }
  }
}

impl Lifecycle {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn state(&self) -> WorkerState {
    match self.state.read() {
      Ok(state) => *state,
      Err(poisoned) => *poisoned.into_inner(),
    }
  }

  pub(crate) fn set_state(&self, next: WorkerState) {
    match self.state.write() {
      Ok(mut state) => *state = next,
      Err(poisoned) => *poisoned.into_inner() = next,
    }
  }

  /// Move to `next` only if currently in `expected`.
  pub(crate) fn transition(
    &self,
    expected: WorkerState,
    next: WorkerState,
  ) -> Result<(), LifecycleError> {
    let mut state = match self.state.write() {
      Ok(state) => state,
      Err(poisoned) => poisoned.into_inner(),
    };
    if *state != expected {
      return Err(LifecycleError::InvalidState {
        expected,
        actual: *state,
      });
    }
    *state = next;
    Ok(())
  }

  pub fn request_skip_waiting(&self) {
    self.skip_waiting.store(true, Ordering::SeqCst);
  }

  pub fn skip_waiting_requested(&self) -> bool {
    self.skip_waiting.load(Ordering::SeqCst)
  }

  pub(crate) fn claim(&self) {
    self.claimed.store(true, Ordering::SeqCst);
  }

  /// Whether this version has taken control of open pages.
  pub fn has_claimed(&self) -> bool {
    self.claimed.load(Ordering::SeqCst)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_skip_waiting() {
    assert_eq!(
      WorkerMessage::parse(r#"{"type":"SKIP_WAITING"}"#),
      Some(WorkerMessage::SkipWaiting)
    );
  }

  #[test]
  fn test_unknown_message_is_ignored() {
    assert_eq!(WorkerMessage::parse(r#"{"type":"RELOAD"}"#), None);
    assert_eq!(WorkerMessage::parse("not json"), None);
  }

  #[test]
  fn test_transition_checks_current_state() {
    let lifecycle = Lifecycle::new();
    assert!(lifecycle
      .transition(WorkerState::Installed, WorkerState::Activating)
      .is_err());
    lifecycle
      .transition(WorkerState::Installing, WorkerState::Installed)
      .unwrap();
    assert_eq!(lifecycle.state(), WorkerState::Installed);
  }
}
