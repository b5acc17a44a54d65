use std::time::Duration;

use thiserror::Error;

use crate::models::Config;

/// Hard configuration errors the monitor refuses to start with.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigGuardRailError {
    /// A zero bucket would disable violation dedup entirely.
    #[error("VIGIL_DEDUP_BUCKET must be non-zero")]
    ZeroDedupBucket,

    #[error("VIGIL_STOP_AFTER_MISSES must be at least 1")]
    ZeroStopMisses,

    #[error("{key} must be non-zero")]
    ZeroWorkerPool { key: &'static str },

    #[error("geo provider URL must contain an {{ip}} placeholder: {url}")]
    GeoProviderMissingPlaceholder { url: String },
}

/// Non-fatal configuration findings surfaced at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigWarning {
    pub message: String,
}

pub type ConfigWarnings = Vec<ConfigWarning>;

pub fn check(config: &Config) -> Result<ConfigWarnings, ConfigGuardRailError> {
    if config.rules.dedup_bucket.is_zero() {
        return Err(ConfigGuardRailError::ZeroDedupBucket);
    }
    if config.lifecycle.stop_after_misses == 0 {
        return Err(ConfigGuardRailError::ZeroStopMisses);
    }
    if config.rules.worker_pool == 0 {
        return Err(ConfigGuardRailError::ZeroWorkerPool {
            key: "VIGIL_RULE_WORKERS",
        });
    }
    if config.maintenance.sync_workers == 0 {
        return Err(ConfigGuardRailError::ZeroWorkerPool {
            key: "VIGIL_SYNC_WORKERS",
        });
    }
    if !config.geo.provider_url.contains("{ip}") {
        return Err(ConfigGuardRailError::GeoProviderMissingPlaceholder {
            url: config.geo.provider_url.clone(),
        });
    }

    let mut warnings = ConfigWarnings::new();
    if config.polling.interval < Duration::from_secs(1) {
        warnings.push(ConfigWarning {
            message: format!(
                "poll interval {:?} is aggressive; vendors may rate limit",
                config.polling.interval
            ),
        });
    }
    if config.polling.tick_deadline >= config.polling.max_backoff {
        warnings.push(ConfigWarning {
            message: "poll deadline exceeds the backoff cap".to_string(),
        });
    }
    if config.database.url.is_none() {
        warnings.push(ConfigWarning {
            message: "DATABASE_URL is not set; the monitor cannot persist"
                .to_string(),
        });
    }
    Ok(warnings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_passes() {
        let mut config = Config::default();
        config.database.url = Some("postgres://localhost/vigil".into());
        assert!(check(&config).unwrap().is_empty());
    }

    #[test]
    fn missing_ip_placeholder_fails() {
        let mut config = Config::default();
        config.geo.provider_url = "http://ip-api.com/json/".into();
        assert!(matches!(
            check(&config),
            Err(ConfigGuardRailError::GeoProviderMissingPlaceholder { .. })
        ));
    }

    #[test]
    fn aggressive_interval_warns() {
        let mut config = Config::default();
        config.database.url = Some("postgres://localhost/vigil".into());
        config.polling.interval = Duration::from_millis(200);
        let warnings = check(&config).unwrap();
        assert_eq!(warnings.len(), 1);
    }
}
