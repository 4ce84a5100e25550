use serde::{Deserialize, Serialize};

use crossheap_origin::VerificationConfig;

/// Default byte quota shared by all modules of a host.
pub const DEFAULT_TOTAL_QUOTA: u64 = 64 * 1024 * 1024;

/// Default byte quota of a single module.
pub const DEFAULT_MODULE_QUOTA: u64 = 16 * 1024 * 1024;

/// Configuration of a [`Host`](crate::Host).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Bytes all loaded modules may hold at once.
    pub total_quota: u64,
    /// Bytes a single module may hold at once, unless overridden at load time.
    pub module_quota: u64,
    pub verification: VerificationConfig,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            total_quota: DEFAULT_TOTAL_QUOTA,
            module_quota: DEFAULT_MODULE_QUOTA,
            verification: VerificationConfig::default(),
        }
    }
}

impl HostConfig {
    pub fn with_verification(mut self, verification: VerificationConfig) -> Self {
        self.verification = verification;
        self
    }

    pub fn with_quotas(mut self, total_quota: u64, module_quota: u64) -> Self {
        self.total_quota = total_quota;
        self.module_quota = module_quota;
        self
    }

    /// Validates the configuration and returns an error if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.module_quota == 0 {
            return Err("module_quota must be greater than 0".to_string());
        }
        if self.module_quota > self.total_quota {
            return Err(format!(
                "module_quota ({}) must not exceed total_quota ({})",
                self.module_quota, self.total_quota
            ));
        }
        self.verification.validate()
    }
}

#[cfg(test)]
mod tests {
    use crossheap_origin::ViolationPolicy;

    use super::*;

    #[test]
    fn test_default_is_valid() {
        HostConfig::default().validate().unwrap();
    }

    #[test]
    fn test_module_quota_bounds() {
        let config = HostConfig::default().with_quotas(100, 200);
        assert!(config.validate().is_err());
        let config = HostConfig::default().with_quotas(100, 0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deserialize_partial() {
        let config: HostConfig = serde_json::from_str(
            r#"{ "module_quota": 4096, "verification": { "enabled": true, "policy": "report" } }"#,
        )
        .unwrap();
        assert_eq!(config.total_quota, DEFAULT_TOTAL_QUOTA);
        assert_eq!(config.module_quota, 4096);
        assert!(config.verification.enabled);
        assert_eq!(config.verification.policy, ViolationPolicy::Report);
    }
}
