//! Command implementations for crossheap-cmd

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use crossheap::{HostConfig, ViolationPolicy};

pub mod run;
pub mod uppercase;

/// Host configuration sources shared by all commands.
#[derive(Args, Debug, Default)]
pub struct ConfigArgs {
    /// Path to a JSON host configuration
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Force origin-tag verification on
    #[arg(long, global = true, conflicts_with = "no_verify")]
    pub verify: bool,

    /// Force origin-tag verification off
    #[arg(long, global = true)]
    pub no_verify: bool,

    /// What to do on an ownership protocol violation
    #[arg(long, global = true, value_enum)]
    pub policy: Option<PolicyArg>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum PolicyArg {
    Report,
    Panic,
}

impl From<PolicyArg> for ViolationPolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::Report => ViolationPolicy::Report,
            PolicyArg::Panic => ViolationPolicy::Panic,
        }
    }
}

impl ConfigArgs {
    /// Reads the configuration file, if any, and applies the flag overrides.
    pub fn load(&self) -> Result<HostConfig> {
        let mut config = match &self.config {
            Some(path) => read_config(path)?,
            None => HostConfig::default(),
        };
        if self.verify {
            config.verification.enabled = true;
        }
        if self.no_verify {
            config.verification.enabled = false;
        }
        if let Some(policy) = self.policy {
            config.verification.policy = policy.into();
        }
        config
            .validate()
            .map_err(|message| anyhow::anyhow!("invalid configuration: {message}"))?;
        Ok(config)
    }
}

fn read_config(path: &Path) -> Result<HostConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

pub fn print_config(config: &HostConfig) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}

/// Which ownership strategy a scenario exercises.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Scenario {
    Opaque,
    Interface,
    Bound,
    Shared,
    Buffer,
    Churn,
    /// Deliberate misuse: cross-module and double destroys
    Misuse,
}

impl Scenario {
    /// Scenarios run when none is requested. Misuse is excluded since it
    /// aborts under the panic policy.
    pub const DEFAULT: [Scenario; 6] = [
        Scenario::Opaque,
        Scenario::Interface,
        Scenario::Bound,
        Scenario::Shared,
        Scenario::Buffer,
        Scenario::Churn,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Scenario::Opaque => "opaque",
            Scenario::Interface => "interface",
            Scenario::Bound => "bound",
            Scenario::Shared => "shared",
            Scenario::Buffer => "buffer",
            Scenario::Churn => "churn",
            Scenario::Misuse => "misuse",
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_load_defaults() {
        let config = ConfigArgs::default().load().unwrap();
        assert_eq!(config.total_quota, HostConfig::default().total_quota);
    }

    #[test]
    fn test_load_file_with_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "module_quota": 4096, "verification": {{ "enabled": false, "max_tombstones": 8 }} }}"#
        )
        .unwrap();

        let args = ConfigArgs {
            config: Some(file.path().to_path_buf()),
            verify: true,
            policy: Some(PolicyArg::Panic),
            ..Default::default()
        };
        let config = args.load().unwrap();
        assert_eq!(config.module_quota, 4096);
        assert!(config.verification.enabled);
        assert_eq!(config.verification.policy, ViolationPolicy::Panic);
        assert_eq!(config.verification.max_tombstones, 8);
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "total_quota": 10, "module_quota": 20 }}"#).unwrap();
        let args = ConfigArgs {
            config: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        assert!(args.load().is_err());

        let args = ConfigArgs {
            config: Some(PathBuf::from("/nonexistent/crossheap.json")),
            ..Default::default()
        };
        assert!(args.load().is_err());
    }
}
