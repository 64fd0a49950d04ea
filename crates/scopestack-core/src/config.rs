//! Runtime configuration.
//!
//! Two environment variables are read once per process:
//! - `SCOPESTACK_PAYLOAD_POLICY`: what to do when a registration carries both
//!   a resource handle and a callback.
//!   - `prefer-resource` (default): keep the handle, drop the callback.
//!   - `reject`: refuse the registration.
//! - `SCOPESTACK_LOG`: structured event log target.
//!   - unset or `off` (default): no event log.
//!   - `stderr`: JSONL on the standard error stream.
//!   - anything else: path of a JSONL file, appended to.
//!
//! Unknown policy values fall back to the default, matching how the runtime
//! mode variable of the libc membrane is parsed.

use std::path::PathBuf;
use std::sync::OnceLock;

pub const PAYLOAD_POLICY_ENV: &str = "SCOPESTACK_PAYLOAD_POLICY";
pub const LOG_ENV: &str = "SCOPESTACK_LOG";

/// Rule for registrations that supply both payloads.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadPolicy {
    /// The resource handle wins and the callback is dropped.
    #[default]
    PreferResource,
    /// The registration fails with [`crate::ScopeError::AmbiguousPayload`].
    Reject,
}

impl PayloadPolicy {
    /// Parse from string (case-insensitive).
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "reject" | "strict" | "deny" => Self::Reject,
            _ => Self::PreferResource,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PreferResource => "prefer-resource",
            Self::Reject => "reject",
        }
    }
}

/// Where structured events go.
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash)]
pub enum LogTarget {
    #[default]
    Off,
    Stderr,
    File(PathBuf),
}

impl LogTarget {
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        let trimmed = s.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "" | "off" | "none" | "0" | "false" => Self::Off,
            "stderr" | "-" => Self::Stderr,
            _ => Self::File(PathBuf::from(trimmed)),
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::Off)
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScopeStackConfig {
    pub payload_policy: PayloadPolicy,
    pub log: LogTarget,
}

impl ScopeStackConfig {
    /// Reads the environment now, bypassing the process cache.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary variable lookup.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            payload_policy: lookup(PAYLOAD_POLICY_ENV)
                .map(|v| PayloadPolicy::from_str_loose(&v))
                .unwrap_or_default(),
            log: lookup(LOG_ENV)
                .map(|v| LogTarget::from_str_loose(&v))
                .unwrap_or_default(),
        }
    }

    #[must_use]
    pub fn with_payload_policy(mut self, policy: PayloadPolicy) -> Self {
        self.payload_policy = policy;
        self
    }

    #[must_use]
    pub fn with_log(mut self, log: LogTarget) -> Self {
        self.log = log;
        self
    }
}

/// Process-wide configuration, resolved from the environment on first call.
#[must_use]
pub fn process_config() -> &'static ScopeStackConfig {
    static CONFIG: OnceLock<ScopeStackConfig> = OnceLock::new();
    CONFIG.get_or_init(ScopeStackConfig::from_env)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_payload_policies() {
        assert_eq!(
            PayloadPolicy::from_str_loose("reject"),
            PayloadPolicy::Reject
        );
        assert_eq!(
            PayloadPolicy::from_str_loose("STRICT"),
            PayloadPolicy::Reject
        );
        assert_eq!(
            PayloadPolicy::from_str_loose("prefer-resource"),
            PayloadPolicy::PreferResource
        );
        assert_eq!(
            PayloadPolicy::from_str_loose("garbage"),
            PayloadPolicy::PreferResource
        );
    }

    #[test]
    fn parse_log_targets() {
        assert_eq!(LogTarget::from_str_loose(""), LogTarget::Off);
        assert_eq!(LogTarget::from_str_loose("OFF"), LogTarget::Off);
        assert_eq!(LogTarget::from_str_loose("stderr"), LogTarget::Stderr);
        assert_eq!(
            LogTarget::from_str_loose(" /tmp/events.jsonl "),
            LogTarget::File(PathBuf::from("/tmp/events.jsonl"))
        );
        assert!(!LogTarget::Off.is_enabled());
        assert!(LogTarget::Stderr.is_enabled());
    }

    #[test]
    fn lookup_defaults_when_unset() {
        let config = ScopeStackConfig::from_lookup(|_| None);
        assert_eq!(config, ScopeStackConfig::default());
    }

    #[test]
    fn lookup_reads_both_variables() {
        let config = ScopeStackConfig::from_lookup(|key| match key {
            PAYLOAD_POLICY_ENV => Some("deny".to_string()),
            LOG_ENV => Some("stderr".to_string()),
            _ => None,
        });
        assert_eq!(config.payload_policy, PayloadPolicy::Reject);
        assert_eq!(config.log, LogTarget::Stderr);
    }
}
