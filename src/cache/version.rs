//! Versioned tier naming.

use std::fmt;

/// The deployment version a worker instance caches under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheVersion {
  prefix: String,
  version: String,
}

impl CacheVersion {
  pub fn new(prefix: impl Into<String>, version: impl Into<String>) -> Self {
    Self {
      prefix: prefix.into(),
      version: version.into(),
    }
  }

  pub fn version(&self) -> &str {
    &self.version
  }

  /// Same prefix, different version.
  pub fn with_version(&self, version: impl Into<String>) -> Self {
    Self::new(self.prefix.clone(), version)
  }

  pub fn tier_names(&self) -> TierNames {
    TierNames {
      static_tier: format!("{}-static-{}", self.prefix, self.version),
      dynamic_tier: format!("{}-dynamic-{}", self.prefix, self.version),
    }
  }
}

impl fmt::Display for CacheVersion {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}-{}", self.prefix, self.version)
  }
}

/// The two live tiers of one version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierNames {
  /// App shell assets, written once at install
  pub static_tier: String,
  /// Responses captured at runtime
  pub dynamic_tier: String,
}

impl TierNames {
  pub fn current(&self) -> [&str; 2] {
    [&self.static_tier, &self.dynamic_tier]
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_tier_names_embed_version() {
    let names = CacheVersion::new("asistencia", "v1.0.0").tier_names();
    assert_eq!(names.static_tier, "asistencia-static-v1.0.0");
    assert_eq!(names.dynamic_tier, "asistencia-dynamic-v1.0.0");
  }

  #[test]
  fn test_with_version_keeps_prefix() {
    let v1 = CacheVersion::new("asistencia", "v1");
    let v2 = v1.with_version("v2");
    assert_eq!(v2.tier_names().static_tier, "asistencia-static-v2");
    assert_eq!(v2.version(), "v2");
  }
}
