//! Node policy values. Every deadline is measured in blocks.

use std::env;

use serde::Deserialize;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must not be zero")]
    Zero(&'static str),
    #[error("reveal_timeout ({reveal}) must be smaller than settle_timeout ({settle})")]
    RevealNotBelowSettle { reveal: u64, settle: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Blocks between close and the earliest settle.
    pub settle_timeout: u64,
    /// Safety margin before a lock's expiration in which its secret must be
    /// registered on-chain instead of revealed off-chain.
    pub reveal_timeout: u64,
    /// Blocks after the settle block in which unlocks are still accepted.
    pub punish_blocks: u64,
    /// How many secrets are registered on-chain in one call; the rest are
    /// resolved off-chain.
    pub secret_registration_cap: usize,
    /// Withdraw requests expire after `settle_timeout / withdraw_timeout_divisor`.
    pub withdraw_timeout_divisor: u64,
    /// Delegated balance proof updates are due by
    /// `settle_block - settle_timeout / update_transfer_divisor`.
    pub update_transfer_divisor: u64,
    pub poll_interval_ms: u64,
    pub chain_retry: RetryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            settle_timeout: 600,
            reveal_timeout: 30,
            punish_blocks: 5,
            secret_registration_cap: 5,
            withdraw_timeout_divisor: 2,
            update_transfer_divisor: 2,
            poll_interval_ms: 1_000,
            chain_retry: RetryConfig::default(),
        }
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Defaults overridden by `RAIDEN_*` environment variables, e.g.
    /// `RAIDEN_SETTLE_TIMEOUT`.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            settle_timeout: env_or("RAIDEN_SETTLE_TIMEOUT", d.settle_timeout),
            reveal_timeout: env_or("RAIDEN_REVEAL_TIMEOUT", d.reveal_timeout),
            punish_blocks: env_or("RAIDEN_PUNISH_BLOCKS", d.punish_blocks),
            secret_registration_cap: env_or(
                "RAIDEN_SECRET_REGISTRATION_CAP",
                d.secret_registration_cap,
            ),
            withdraw_timeout_divisor: env_or(
                "RAIDEN_WITHDRAW_TIMEOUT_DIVISOR",
                d.withdraw_timeout_divisor,
            ),
            update_transfer_divisor: env_or(
                "RAIDEN_UPDATE_TRANSFER_DIVISOR",
                d.update_transfer_divisor,
            ),
            poll_interval_ms: env_or("RAIDEN_POLL_INTERVAL_MS", d.poll_interval_ms),
            chain_retry: RetryConfig {
                max_attempts: env_or("RAIDEN_CHAIN_RETRY_MAX_ATTEMPTS", d.chain_retry.max_attempts),
                ..d.chain_retry
            },
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_zero = [
            ("settle_timeout", self.settle_timeout),
            ("reveal_timeout", self.reveal_timeout),
            ("secret_registration_cap", self.secret_registration_cap as u64),
            ("withdraw_timeout_divisor", self.withdraw_timeout_divisor),
            ("update_transfer_divisor", self.update_transfer_divisor),
            ("poll_interval_ms", self.poll_interval_ms),
            ("chain_retry.max_attempts", self.chain_retry.max_attempts.into()),
        ];
        for (name, value) in non_zero {
            if value == 0 {
                return Err(ConfigError::Zero(name));
            }
        }
        if self.reveal_timeout >= self.settle_timeout {
            return Err(ConfigError::RevealNotBelowSettle {
                reveal: self.reveal_timeout,
                settle: self.settle_timeout,
            });
        }
        Ok(())
    }

    /// Last block at which a withdraw request made at `request_block` can
    /// still be co-signed.
    pub fn withdraw_deadline(&self, request_block: u64) -> u64 {
        request_block.saturating_add(self.settle_timeout / self.withdraw_timeout_divisor.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(Config::default().validate(), Ok(()));
        assert_eq!(Config::default().secret_registration_cap, 5);
    }

    #[test]
    fn partial_config_keeps_defaults() {
        let cfg: Config =
            serde_json::from_str(r#"{"settle_timeout": 40, "chain_retry": {"max_attempts": 2}}"#)
                .unwrap();
        assert_eq!(cfg.settle_timeout, 40);
        assert_eq!(cfg.reveal_timeout, Config::default().reveal_timeout);
        assert_eq!(cfg.chain_retry.max_attempts, 2);
        assert_eq!(
            cfg.chain_retry.initial_backoff_ms,
            RetryConfig::default().initial_backoff_ms
        );
    }

    #[test]
    fn zero_divisor_is_rejected() {
        let cfg = Config {
            withdraw_timeout_divisor: 0,
            ..Config::default()
        };
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::Zero("withdraw_timeout_divisor"))
        );
    }

    #[test]
    fn registration_cap_must_be_positive() {
        let cfg = Config {
            secret_registration_cap: 0,
            ..Config::default()
        };
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::Zero("secret_registration_cap"))
        );
    }

    #[test]
    fn environment_overrides_defaults() {
        // No other test reads these variables.
        env::set_var("RAIDEN_SETTLE_TIMEOUT", "77");
        env::set_var("RAIDEN_CHAIN_RETRY_MAX_ATTEMPTS", "9");
        env::set_var("RAIDEN_POLL_INTERVAL_MS", "soon");
        let cfg = Config::from_env();
        for name in [
            "RAIDEN_SETTLE_TIMEOUT",
            "RAIDEN_CHAIN_RETRY_MAX_ATTEMPTS",
            "RAIDEN_POLL_INTERVAL_MS",
        ] {
            env::remove_var(name);
        }

        assert_eq!(cfg.settle_timeout, 77);
        assert_eq!(cfg.chain_retry.max_attempts, 9);
        // Unparsable values fall back to the default.
        assert_eq!(cfg.poll_interval_ms, Config::default().poll_interval_ms);
        assert_eq!(cfg.reveal_timeout, Config::default().reveal_timeout);
    }

    #[test]
    fn reveal_timeout_must_fit_in_settle_timeout() {
        let cfg = Config {
            settle_timeout: 10,
            reveal_timeout: 10,
            ..Config::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::RevealNotBelowSettle { .. })
        ));
    }

    #[test]
    fn withdraw_deadline_uses_divisor() {
        let cfg = Config {
            settle_timeout: 100,
            ..Config::default()
        };
        assert_eq!(cfg.withdraw_deadline(1000), 1050);
    }
}
