//! Resolver configuration.

use std::time::Duration;

use crate::error::ValidationError;

/// Environment variable overriding [`ResolverConfig::lock_timeout`] (milliseconds).
pub const ENV_LOCK_TIMEOUT_MS: &str = "CONTACTLINK_LOCK_TIMEOUT_MS";
/// Environment variable overriding [`ResolverConfig::lock_stripes`].
pub const ENV_LOCK_STRIPES: &str = "CONTACTLINK_LOCK_STRIPES";
/// Environment variable overriding [`ResolverConfig::commit_attempts`].
pub const ENV_COMMIT_ATTEMPTS: &str = "CONTACTLINK_COMMIT_ATTEMPTS";

/// Tuning knobs for [`IdentityResolver`](crate::IdentityResolver).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverConfig {
    /// Longest wait for the identifier locks of one submission.
    pub lock_timeout: Duration,
    /// Number of lock stripes. `1` serializes every resolution globally.
    pub lock_stripes: usize,
    /// How often a resolution is re-planned after the store reports that a
    /// primary changed precedence under it.
    pub commit_attempts: u32,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(5),
            lock_stripes: 64,
            commit_attempts: 3,
        }
    }
}

impl ResolverConfig {
    const MAX_STRIPES: usize = 4096;

    /// Validate the configuration.
    ///
    /// # Errors
    /// Returns `InvalidConfig` for a zero timeout, a stripe count outside
    /// `1..=4096`, or zero commit attempts.
    pub fn validate(self) -> Result<Self, ValidationError> {
        if self.lock_timeout < Duration::from_millis(1) {
            return Err(invalid("lock_timeout must be at least 1ms"));
        }
        if !(1..=Self::MAX_STRIPES).contains(&self.lock_stripes) {
            return Err(invalid(format!(
                "lock_stripes must be in 1..={} (got {})",
                Self::MAX_STRIPES,
                self.lock_stripes
            )));
        }
        if self.commit_attempts == 0 {
            return Err(invalid("commit_attempts must be at least 1"));
        }
        Ok(self)
    }

    /// Defaults overridden by the `CONTACTLINK_*` environment variables.
    ///
    /// # Errors
    /// Returns `InvalidConfig` if a variable is set but not a number, or the
    /// result fails [`ResolverConfig::validate`].
    pub fn from_env() -> Result<Self, ValidationError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ValidationError> {
        let mut config = Self::default();
        if let Some(ms) = parse::<u64>(&lookup, ENV_LOCK_TIMEOUT_MS)? {
            config.lock_timeout = Duration::from_millis(ms);
        }
        if let Some(stripes) = parse::<usize>(&lookup, ENV_LOCK_STRIPES)? {
            config.lock_stripes = stripes;
        }
        if let Some(attempts) = parse::<u32>(&lookup, ENV_COMMIT_ATTEMPTS)? {
            config.commit_attempts = attempts;
        }
        config.validate()
    }
}

fn parse<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, ValidationError> {
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|_| invalid(format!("{key} is not a valid number: {raw:?}")))
        })
        .transpose()
}

fn invalid(reason: impl Into<String>) -> ValidationError {
    ValidationError::InvalidConfig {
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_is_valid() {
        assert!(ResolverConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_values() {
        let zero_stripes = ResolverConfig {
            lock_stripes: 0,
            ..ResolverConfig::default()
        };
        assert!(zero_stripes.validate().is_err());

        let zero_attempts = ResolverConfig {
            commit_attempts: 0,
            ..ResolverConfig::default()
        };
        assert!(zero_attempts.validate().is_err());

        let zero_timeout = ResolverConfig {
            lock_timeout: Duration::ZERO,
            ..ResolverConfig::default()
        };
        assert!(zero_timeout.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let config = ResolverConfig::from_lookup(lookup(&[
            (ENV_LOCK_TIMEOUT_MS, "250"),
            (ENV_LOCK_STRIPES, " 1 "),
        ]))
        .unwrap();
        assert_eq!(config.lock_timeout, Duration::from_millis(250));
        assert_eq!(config.lock_stripes, 1);
        assert_eq!(config.commit_attempts, 3);
    }

    #[test]
    fn test_env_rejects_garbage() {
        let err = ResolverConfig::from_lookup(lookup(&[(ENV_COMMIT_ATTEMPTS, "many")])).unwrap_err();
        assert!(err.to_string().contains(ENV_COMMIT_ATTEMPTS));
    }
}
