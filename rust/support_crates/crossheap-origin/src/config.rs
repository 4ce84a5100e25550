use serde::{Deserialize, Serialize};

/// Default number of released identities remembered for double-release detection.
pub const DEFAULT_MAX_TOMBSTONES: usize = 4096;

pub const MAX_TOMBSTONES_LIMIT: usize = 1 << 24;

/// What the registry does after reporting a protocol violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationPolicy {
    /// Log the violation and return it as an error; the offending operation is aborted.
    #[default]
    Report,
    /// Log the violation and fail an assertion.
    Panic,
}

/// Configuration of the origin-tag verification layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    /// Whether allocations are registered at all. Defaults to on in debug builds.
    pub enabled: bool,
    pub policy: ViolationPolicy,
    /// Upper bound on remembered released identities. Older tombstones are
    /// evicted first; a release of an evicted identity is classified by the
    /// caller's own bookkeeping, or as `UnknownHandle` when it has none.
    pub max_tombstones: usize,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            enabled: cfg!(debug_assertions),
            policy: ViolationPolicy::default(),
            max_tombstones: DEFAULT_MAX_TOMBSTONES,
        }
    }
}

impl VerificationConfig {
    /// Verification switched on with the given policy and default limits.
    pub fn enabled(policy: ViolationPolicy) -> Self {
        Self {
            enabled: true,
            policy,
            ..Default::default()
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Validates the configuration and returns an error if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_tombstones > MAX_TOMBSTONES_LIMIT {
            return Err(format!(
                "max_tombstones must not exceed {MAX_TOMBSTONES_LIMIT}"
            ));
        }
        Ok(())
    }
}
