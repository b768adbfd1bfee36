//! Cache store managing the static and dynamic tiers of one worker version.

use std::sync::Arc;

use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use tracing::{debug, info};

use super::storage::TierStorage;
use super::version::TierNames;
use crate::http::{Network, Request, RequestKey, Response};

/// Cache store that owns the two live tiers of a version.
///
/// Clone is cheap and shares the same backend.
#[derive(Clone)]
pub struct CacheStore {
  storage: Arc<dyn TierStorage>,
  tiers: TierNames,
}

impl CacheStore {
  pub fn new(storage: Arc<dyn TierStorage>, tiers: TierNames) -> Self {
    Self { storage, tiers }
  }

  pub fn tiers(&self) -> &TierNames {
    &self.tiers
  }

  /// Fetch every request and store all of them in `tier`.
  ///
  /// All-or-nothing: if any fetch fails or returns a non-2xx status, nothing
  /// is written. Returns the number of stored entries.
  pub async fn warm(&self, tier: &str, requests: &[Request], network: &dyn Network) -> Result<usize> {
    let entries: Vec<(RequestKey, Response)> =
      try_join_all(requests.iter().map(|request| async move {
        let response = network
          .fetch(request)
          .await
          .map_err(|e| eyre!("Failed to fetch {}: {}", request.url, e))?;
        if !response.is_ok() {
          return Err(eyre!(
            "Failed to fetch {}: status {}",
            request.url,
            response.status
          ));
        }
        Ok((request.key(), response))
      }))
      .await?;

    self.storage.put_all(tier, &entries)?;
    info!(tier = %tier, count = entries.len(), "Cache tier warmed");

    Ok(entries.len())
  }

  /// Create `tier` if needed. Safe to call concurrently.
  pub fn open(&self, tier: &str) -> Result<()> {
    self.storage.open_tier(tier)
  }

  /// Store a snapshot under the request's key, replacing any previous one.
  pub fn put(&self, tier: &str, request: &Request, response: &Response) -> Result<()> {
    self.put_key(tier, &request.key(), response)
  }

  pub fn put_key(&self, tier: &str, key: &RequestKey, response: &Response) -> Result<()> {
    self.storage.put(tier, key, response)?;
    debug!(tier = %tier, request = %key, "Stored response");
    Ok(())
  }

  /// Store a snapshot unless `tier` has been deleted meanwhile. Returns
  /// whether anything was written.
  pub fn put_if_open(&self, tier: &str, key: &RequestKey, response: &Response) -> Result<bool> {
    let stored = self.storage.put_if_open(tier, key, response)?;
    if stored {
      debug!(tier = %tier, request = %key, "Stored response");
    } else {
      debug!(tier = %tier, request = %key, "Tier gone, response not stored");
    }
    Ok(stored)
  }

  /// Look the request up in the dynamic tier, then the static tier.
  pub fn lookup(&self, request: &Request) -> Result<Option<Response>> {
    for tier in [&self.tiers.dynamic_tier, &self.tiers.static_tier] {
      if let Some(response) = self.lookup_in(tier, request)? {
        return Ok(Some(response));
      }
    }
    Ok(None)
  }

  /// Look the request up in a single tier.
  pub fn lookup_in(&self, tier: &str, request: &Request) -> Result<Option<Response>> {
    Ok(self.storage.get(tier, &request.key())?.map(|cached| {
      debug!(tier = %tier, url = %request.url, cached_at = %cached.cached_at, "Cache hit");
      cached.response
    }))
  }

  /// Delete every tier whose name is not in `current`. Returns the deleted
  /// names; calling it again with the same set deletes nothing.
  pub fn purge_stale(&self, current: &[&str]) -> Result<Vec<String>> {
    let mut purged = Vec::new();
    for name in self.storage.tier_names()? {
      if current.contains(&name.as_str()) {
        continue;
      }
      if self.storage.delete_tier(&name)? {
        info!(tier = %name, "Purged stale cache tier");
        purged.push(name);
      }
    }
    Ok(purged)
  }

  /// All tier names known to the backend, including other versions'.
  pub fn tier_names(&self) -> Result<Vec<String>> {
    self.storage.tier_names()
  }

  pub fn entry_count(&self, tier: &str) -> Result<usize> {
    self.storage.entry_count(tier)
  }
}
