use std::collections::HashMap;
use std::time::Duration;

use thiserror::Error;

use crate::models::Config;
use crate::validation::{self, ConfigGuardRailError, ConfigWarnings};

#[derive(Error, Debug)]
pub enum ConfigLoadError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error(transparent)]
    GuardRail(#[from] ConfigGuardRailError),
}

/// Loads a [`Config`] from environment variables.
///
/// Every key is optional; missing keys fall back to the defaults in
/// [`crate::models`]. The loader is deterministic over a captured snapshot of
/// the environment so tests can drive it without touching process state.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    overrides: Option<HashMap<String, String>>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `vars` instead of the process environment.
    pub fn with_vars(vars: HashMap<String, String>) -> Self {
        Self {
            overrides: Some(vars),
        }
    }

    fn var(&self, key: &'static str) -> Option<String> {
        match &self.overrides {
            Some(map) => map.get(key).cloned(),
            None => std::env::var(key).ok(),
        }
        .filter(|value| !value.trim().is_empty())
    }

    fn parse<T: std::str::FromStr>(
        &self,
        key: &'static str,
    ) -> Result<Option<T>, ConfigLoadError>
    where
        T::Err: std::fmt::Display,
    {
        match self.var(key) {
            Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|e| {
                ConfigLoadError::InvalidValue {
                    key,
                    value: raw,
                    reason: e.to_string(),
                }
            }),
            None => Ok(None),
        }
    }

    fn parse_duration(
        &self,
        key: &'static str,
    ) -> Result<Option<Duration>, ConfigLoadError> {
        match self.var(key) {
            Some(raw) => humantime::parse_duration(raw.trim())
                .map(Some)
                .map_err(|e| ConfigLoadError::InvalidValue {
                    key,
                    value: raw,
                    reason: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    pub fn load(&self) -> Result<(Config, ConfigWarnings), ConfigLoadError> {
        let mut config = Config::default();

        if let Some(host) = self.var("VIGIL_HOST") {
            config.server.host = host;
        }
        if let Some(port) = self.parse::<u16>("VIGIL_PORT")? {
            config.server.port = port;
        }

        config.database.url = self.var("DATABASE_URL");
        config.database.max_connections =
            self.parse::<u32>("DATABASE_MAX_CONNECTIONS")?;

        if let Some(interval) = self.parse_duration("VIGIL_POLL_INTERVAL")? {
            config.polling.interval = interval;
        }
        if let Some(deadline) = self.parse_duration("VIGIL_POLL_DEADLINE")? {
            config.polling.tick_deadline = deadline;
        }
        if let Some(backoff) = self.parse_duration("VIGIL_POLL_MAX_BACKOFF")? {
            config.polling.max_backoff = backoff;
        }
        if let Some(rps) = self.parse::<u32>("VIGIL_ADAPTER_RPS")? {
            config.polling.requests_per_second = rps;
        }

        if let Some(misses) = self.parse::<u32>("VIGIL_STOP_AFTER_MISSES")? {
            config.lifecycle.stop_after_misses = misses;
        }

        if let Some(window) = self.parse_duration("VIGIL_HISTORY_WINDOW")? {
            config.rules.history_window = window;
        }
        if let Some(bucket) = self.parse_duration("VIGIL_DEDUP_BUCKET")? {
            config.rules.dedup_bucket = bucket;
        }
        if let Some(workers) = self.parse::<usize>("VIGIL_RULE_WORKERS")? {
            config.rules.worker_pool = workers;
        }
        if let Some(interval) = self.parse_duration("VIGIL_BATCH_INTERVAL")? {
            config.rules.batch_interval = interval;
        }

        if let Some(workers) = self.parse::<usize>("VIGIL_SYNC_WORKERS")? {
            config.maintenance.sync_workers = workers;
        }
        if let Some(interval) =
            self.parse_duration("VIGIL_MAINTENANCE_INTERVAL")?
        {
            config.maintenance.evaluate_interval = Some(interval);
        }

        if let Some(ttl) = self.parse_duration("VIGIL_GEO_CACHE_TTL")? {
            config.geo.cache_ttl = ttl;
        }
        if let Some(url) = self.var("VIGIL_GEO_PROVIDER_URL") {
            config.geo.provider_url = url;
        }
        if let Some(min) = self.parse::<i64>("VIGIL_HOUSEHOLD_MIN_SESSIONS")? {
            config.geo.household_min_sessions = min;
        }

        if let Some(attempts) = self.parse::<u32>("VIGIL_NOTIFY_MAX_ATTEMPTS")? {
            config.notify.max_attempts = attempts;
        }
        if let Some(base) = self.parse_duration("VIGIL_NOTIFY_RETRY_BASE")? {
            config.notify.retry_base = base;
        }

        let warnings = validation::check(&config)?;
        Ok((config, warnings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loader(pairs: &[(&str, &str)]) -> ConfigLoader {
        ConfigLoader::with_vars(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn defaults_load_cleanly() {
        let (config, warnings) = loader(&[]).load().unwrap();
        assert_eq!(config.lifecycle.stop_after_misses, 2);
        assert_eq!(config.polling.interval, Duration::from_secs(5));
        assert!(warnings.is_empty());
    }

    #[test]
    fn durations_use_humantime() {
        let (config, _) = loader(&[("VIGIL_POLL_INTERVAL", "30s")])
            .load()
            .unwrap();
        assert_eq!(config.polling.interval, Duration::from_secs(30));
    }

    #[test]
    fn zero_dedup_bucket_is_rejected() {
        let result = loader(&[("VIGIL_DEDUP_BUCKET", "0s")]).load();
        assert!(matches!(
            result,
            Err(ConfigLoadError::GuardRail(
                ConfigGuardRailError::ZeroDedupBucket
            ))
        ));
    }

    #[test]
    fn invalid_port_surfaces_key() {
        let err = loader(&[("VIGIL_PORT", "not-a-port")]).load().unwrap_err();
        match err {
            ConfigLoadError::InvalidValue { key, .. } => {
                assert_eq!(key, "VIGIL_PORT");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
