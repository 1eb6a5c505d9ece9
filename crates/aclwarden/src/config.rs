// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Warden configuration.
//!
//! Supports both programmatic (builder) and file-based (TOML) configuration.
//! Every section and field has a default, so an empty file plus `--root` on
//! the command line is a valid setup.

use crate::acl::Principal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WardenConfig {
    #[serde(default)]
    pub watch: WatchConfig,

    #[serde(default)]
    pub readiness: ReadinessConfig,

    #[serde(default)]
    pub dedup: DedupConfig,

    #[serde(default)]
    pub policy: PolicyConfig,

    #[serde(default)]
    pub propagation: PropagationConfig,

    #[serde(default)]
    pub audit: AuditConfig,
}

impl WardenConfig {
    /// Create a new builder.
    pub fn builder() -> WardenConfigBuilder {
        WardenConfigBuilder::default()
    }

    /// Load and validate configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file without validating it, so command-line overrides
    /// can fill in what the file leaves out.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.watch.roots.is_empty() {
            return Err(ConfigError::Invalid("No watch roots configured".into()));
        }
        if self.watch.workers == 0 {
            return Err(ConfigError::Invalid("watch.workers must be at least 1".into()));
        }
        if self.readiness.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "readiness.max_attempts must be at least 1".into(),
            ));
        }
        if self.dedup.capacity == 0 {
            return Err(ConfigError::Invalid("dedup.capacity must be at least 1".into()));
        }
        if self.dedup.retention() < self.readiness.budget() {
            return Err(ConfigError::Invalid(format!(
                "dedup.retention_secs ({}s) is shorter than the readiness budget ({:?})",
                self.dedup.retention_secs,
                self.readiness.budget()
            )));
        }
        if self.audit.max_bytes == 0 {
            return Err(ConfigError::Invalid("audit.max_bytes must be positive".into()));
        }
        if self.audit.path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("audit.path is empty".into()));
        }

        let policy = &self.policy;
        for (field, principal) in [
            ("privileged", &policy.privileged),
            ("broad", &policy.broad),
            ("system", &policy.system),
        ] {
            if principal.name().trim().is_empty() {
                return Err(ConfigError::Invalid(format!("policy.{} is empty", field)));
            }
        }
        if policy.allow_list.iter().any(|p| p.name().trim().is_empty()) {
            return Err(ConfigError::Invalid(
                "policy.allow_list contains an empty name".into(),
            ));
        }

        Ok(())
    }

    /// Fully populated configuration used by `gen-config`.
    pub fn example() -> Self {
        Self {
            watch: WatchConfig {
                roots: vec![PathBuf::from("/srv/share"), PathBuf::from("/srv/drop")],
                ..Default::default()
            },
            audit: AuditConfig {
                path: PathBuf::from("/var/log/aclwarden/aclwarden.log"),
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

/// Which trees to watch and how many workers normalize them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Watched root directories.
    #[serde(default)]
    pub roots: Vec<PathBuf>,

    /// Watch subdirectories as well.
    #[serde(default = "default_true")]
    pub recursive: bool,

    /// Treat content writes as a new creation.
    #[serde(default)]
    pub reprocess_on_modify: bool,

    /// Treat the destination of a rename as a new creation.
    #[serde(default)]
    pub reprocess_on_rename: bool,

    /// Normalization worker threads.
    #[serde(default = "default_workers")]
    pub workers: usize,
}

fn default_true() -> bool {
    true
}

fn default_workers() -> usize {
    4
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            recursive: true,
            reprocess_on_modify: false,
            reprocess_on_rename: false,
            workers: default_workers(),
        }
    }
}

/// Exclusive-open probing of new objects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

fn default_max_attempts() -> u32 {
    10
}

fn default_interval_ms() -> u64 {
    500
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            interval_ms: default_interval_ms(),
        }
    }
}

impl ReadinessConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Longest time a worker can spend waiting on one object.
    pub fn budget(&self) -> Duration {
        self.interval() * self.max_attempts.saturating_sub(1)
    }
}

/// Duplicate-notification suppression.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    /// How long a handled path stays claimed after its normalization ended.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,

    /// Maximum tracked paths.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

fn default_retention_secs() -> u64 {
    30
}

fn default_capacity() -> usize {
    4096
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            retention_secs: default_retention_secs(),
            capacity: default_capacity(),
        }
    }
}

impl DedupConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

/// How rules are transformed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyMode {
    /// Keep existing rules, grant broad Read and privileged FullControl.
    Additive,
    /// Strip write access from principals outside the allow-list.
    #[default]
    Subtractive,
    /// SYSTEM keeps FullControl, every other explicit grant becomes Read.
    Rebuild,
}

impl fmt::Display for PolicyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyMode::Additive => f.write_str("additive"),
            PolicyMode::Subtractive => f.write_str("subtractive"),
            PolicyMode::Rebuild => f.write_str("rebuild"),
        }
    }
}

/// Per object-kind treatment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindPolicy {
    /// Block inheritance from the parent.
    #[serde(default)]
    pub protect: bool,

    /// Hand ownership to the privileged principal.
    #[serde(default)]
    pub take_ownership: bool,
}

impl KindPolicy {
    fn file_default() -> Self {
        Self {
            protect: true,
            take_ownership: true,
        }
    }

    fn directory_default() -> Self {
        Self {
            protect: true,
            take_ownership: true,
        }
    }

    fn propagated_default() -> Self {
        Self {
            protect: false,
            take_ownership: false,
        }
    }
}

/// Access model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default)]
    pub mode: PolicyMode,

    /// Trust group: receives FullControl and ownership.
    #[serde(default = "default_privileged")]
    pub privileged: Principal,

    /// Broad-access group: receives Read in additive mode.
    #[serde(default = "default_broad")]
    pub broad: Principal,

    /// Local system account: keeps FullControl in rebuild mode.
    #[serde(default = "default_system")]
    pub system: Principal,

    /// Principals allowed to keep write access in subtractive mode.
    #[serde(default = "default_allow_list")]
    pub allow_list: Vec<Principal>,

    /// Additive: grant Read to the broad principal.
    #[serde(default = "default_true")]
    pub grant_broad_read: bool,

    /// Subtractive: remove every rule of the broad principal.
    #[serde(default)]
    pub revoke_broad: bool,

    /// Subtractive: remove every rule outside the allow-list, not only writers.
    #[serde(default)]
    pub strict: bool,

    /// Turn inherited rules into explicit ones instead of dropping them when
    /// inheritance is blocked.
    #[serde(default)]
    pub preserve_inherited: bool,

    #[serde(default = "KindPolicy::file_default")]
    pub file: KindPolicy,

    /// Created directories.
    #[serde(default = "KindPolicy::directory_default")]
    pub directory: KindPolicy,

    /// Ancestors and descendants reached by propagation.
    #[serde(default = "KindPolicy::propagated_default")]
    pub propagated: KindPolicy,
}

fn default_privileged() -> Principal {
    Principal::new("Administrators")
}

fn default_broad() -> Principal {
    Principal::new("Authenticated Users")
}

fn default_system() -> Principal {
    Principal::new("SYSTEM")
}

fn default_allow_list() -> Vec<Principal> {
    vec![Principal::new("SYSTEM"), Principal::new("Domain Admins")]
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            mode: PolicyMode::default(),
            privileged: default_privileged(),
            broad: default_broad(),
            system: default_system(),
            allow_list: default_allow_list(),
            grant_broad_read: true,
            revoke_broad: false,
            strict: false,
            preserve_inherited: false,
            file: KindPolicy::file_default(),
            directory: KindPolicy::directory_default(),
            propagated: KindPolicy::propagated_default(),
        }
    }
}

/// Which related directories are normalized after an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Parent directories up to the watched root.
    #[default]
    Ancestors,
    /// Every directory below the object (or its parent, for files).
    Descendants,
    /// Ancestors first, then descendants.
    Both,
    /// Only the object itself.
    None,
}

impl Direction {
    pub fn ancestors(self) -> bool {
        matches!(self, Direction::Ancestors | Direction::Both)
    }

    pub fn descendants(self) -> bool {
        matches!(self, Direction::Descendants | Direction::Both)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Ancestors => f.write_str("ancestors"),
            Direction::Descendants => f.write_str("descendants"),
            Direction::Both => f.write_str("both"),
            Direction::None => f.write_str("none"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PropagationConfig {
    #[serde(default)]
    pub direction: Direction,

    /// Also normalize the watched root itself during the ancestor walk.
    #[serde(default)]
    pub include_root: bool,
}

/// Audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_audit_path")]
    pub path: PathBuf,

    /// Rotation ceiling in bytes.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,

    /// Archives to keep (0 keeps all).
    #[serde(default)]
    pub keep_archives: usize,

    /// Mirror records to the console.
    #[serde(default = "default_true")]
    pub console: bool,
}

fn default_audit_path() -> PathBuf {
    PathBuf::from("aclwarden.log")
}

fn default_max_bytes() -> u64 {
    50 * 1024 * 1024
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            path: default_audit_path(),
            max_bytes: default_max_bytes(),
            keep_archives: 0,
            console: true,
        }
    }
}

/// Builder for WardenConfig.
#[derive(Debug, Default)]
pub struct WardenConfigBuilder {
    config: WardenConfig,
}

impl WardenConfigBuilder {
    /// Add a watched root.
    pub fn root(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.watch.roots.push(path.into());
        self
    }

    pub fn recursive(mut self, recursive: bool) -> Self {
        self.config.watch.recursive = recursive;
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.config.watch.workers = workers;
        self
    }

    pub fn mode(mut self, mode: PolicyMode) -> Self {
        self.config.policy.mode = mode;
        self
    }

    pub fn allow_list<I, P>(mut self, principals: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Principal>,
    {
        self.config.policy.allow_list = principals.into_iter().map(Into::into).collect();
        self
    }

    pub fn propagation(mut self, direction: Direction) -> Self {
        self.config.propagation.direction = direction;
        self
    }

    pub fn readiness(mut self, max_attempts: u32, interval: Duration) -> Self {
        self.config.readiness.max_attempts = max_attempts;
        self.config.readiness.interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn dedup_retention(mut self, retention: Duration) -> Self {
        self.config.dedup.retention_secs = retention.as_secs();
        self
    }

    pub fn audit_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.audit.path = path.into();
        self
    }

    pub fn audit_max_bytes(mut self, max_bytes: u64) -> Self {
        self.config.audit.max_bytes = max_bytes;
        self
    }

    pub fn audit_console(mut self, console: bool) -> Self {
        self.config.audit.console = console;
        self
    }

    /// Build the configuration (not validated).
    pub fn build(self) -> WardenConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WardenConfig::default();
        assert_eq!(config.readiness.max_attempts, 10);
        assert_eq!(config.readiness.interval(), Duration::from_millis(500));
        assert_eq!(config.audit.max_bytes, 50 * 1024 * 1024);
        assert_eq!(config.policy.mode, PolicyMode::Subtractive);
        assert_eq!(config.propagation.direction, Direction::Ancestors);
        assert!(config.policy.file.protect);
        assert!(config.policy.directory.protect);
        assert!(config.policy.directory.take_ownership);
        assert!(!config.policy.propagated.protect);
        assert!(!config.policy.propagated.take_ownership);
    }

    #[test]
    fn test_empty_roots_invalid() {
        let err = WardenConfig::default().validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_builder_valid() {
        let config = WardenConfig::builder()
            .root("/watch")
            .mode(PolicyMode::Additive)
            .propagation(Direction::Both)
            .workers(2)
            .build();
        config.validate().unwrap();
        assert_eq!(config.watch.roots, vec![PathBuf::from("/watch")]);
        assert!(config.propagation.direction.ancestors());
        assert!(config.propagation.direction.descendants());
    }

    #[test]
    fn test_retention_shorter_than_readiness_invalid() {
        let config = WardenConfig::builder()
            .root("/watch")
            .readiness(10, Duration::from_secs(2))
            .dedup_retention(Duration::from_secs(5))
            .build();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_toml() {
        let text = r#"
            [watch]
            roots = ["/srv/share"]
            recursive = false
            workers = 2

            [policy]
            mode = "rebuild"
            allow_list = ["SYSTEM"]

            [policy.propagated]
            protect = true

            [propagation]
            direction = "descendants"

            [audit]
            path = "/tmp/warden.log"
            max_bytes = 1024
        "#;
        let config: WardenConfig = toml::from_str(text).unwrap();
        config.validate().unwrap();

        assert!(!config.watch.recursive);
        assert_eq!(config.policy.mode, PolicyMode::Rebuild);
        assert_eq!(config.policy.allow_list, vec![Principal::new("system")]);
        assert!(config.policy.propagated.protect);
        assert!(!config.policy.propagated.take_ownership);
        assert!(config.policy.directory.take_ownership);
        assert!(config.policy.file.take_ownership);
        assert_eq!(config.propagation.direction, Direction::Descendants);
        assert_eq!(config.audit.max_bytes, 1024);
        assert_eq!(config.readiness.max_attempts, 10);
    }

    #[test]
    fn test_example_roundtrips_through_toml() {
        let example = WardenConfig::example();
        let text = toml::to_string_pretty(&example).unwrap();
        let parsed: WardenConfig = toml::from_str(&text).unwrap();
        parsed.validate().unwrap();
        assert_eq!(parsed.watch.roots, example.watch.roots);
    }
}
