pub mod household;
pub mod provider;

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, warn};

use crate::database::ports::GeoCacheRepository;
use crate::error::Result;
use crate::lifecycle::GeoEnricher;
use provider::GeoProvider;
use vigil_model::GeoResult;

/// Bound on the in-memory layer; the durable cache does the real work.
const HOT_CACHE_MAX: usize = 4096;

/// Mean Earth radius in kilometres.
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance between two `(lat, lng)` points in kilometres.
pub fn haversine_km(a: (f64, f64), b: (f64, f64)) -> f64 {
    let (lat1, lng1) = (a.0.to_radians(), a.1.to_radians());
    let (lat2, lng2) = (b.0.to_radians(), b.1.to_radians());
    let dlat = lat2 - lat1;
    let dlng = lng2 - lng1;
    let h = (dlat / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().asin()
}

/// Whether `ip` never leaves the LAN (or is empty/unparseable).
pub fn is_private_ip(ip: &str) -> bool {
    let Ok(addr) = ip.parse::<IpAddr>() else {
        return true;
    };
    match addr {
        IpAddr::V4(v4) => {
            v4.is_private()
                || v4.is_loopback()
                || v4.is_link_local()
                || v4.is_unspecified()
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                // fc00::/7 unique-local
                || (v6.segments()[0] & 0xfe00) == 0xfc00
                // fe80::/10 link-local
                || (v6.segments()[0] & 0xffc0) == 0xfe80
        }
    }
}

/// Cached IP geolocation.
///
/// Lookups go hot cache → durable cache (TTL) → provider. Private and empty
/// addresses short-circuit to a sentinel without touching either cache.
pub struct GeoService {
    cache: Arc<dyn GeoCacheRepository>,
    provider: Arc<dyn GeoProvider>,
    ttl: Duration,
    hot: DashMap<String, GeoResult>,
}

impl std::fmt::Debug for GeoService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeoService")
            .field("ttl", &self.ttl)
            .field("hot_entries", &self.hot.len())
            .finish()
    }
}

impl GeoService {
    pub fn new(
        cache: Arc<dyn GeoCacheRepository>,
        provider: Arc<dyn GeoProvider>,
        ttl: Duration,
    ) -> Self {
        Self {
            cache,
            provider,
            ttl,
            hot: DashMap::new(),
        }
    }

    pub async fn lookup(&self, ip: &str) -> Result<GeoResult> {
        if ip.is_empty() || is_private_ip(ip) {
            return Ok(GeoResult::private_sentinel(ip));
        }

        if let Some(hit) = self.hot.get(ip) {
            return Ok(hit.clone());
        }

        if let Some(cached) = self.cache.get_fresh(ip, self.ttl).await? {
            self.remember(cached.clone());
            return Ok(cached);
        }

        let resolved = self.provider.resolve(ip).await?;
        self.cache.upsert(&resolved).await?;
        self.remember(resolved.clone());
        debug!(ip, country = ?resolved.country, "geo lookup resolved");
        Ok(resolved)
    }

    fn remember(&self, result: GeoResult) {
        if self.hot.len() >= HOT_CACHE_MAX {
            self.hot.clear();
        }
        self.hot.insert(result.ip.clone(), result);
    }
}

#[async_trait]
impl GeoEnricher for GeoService {
    async fn enrich(&self, ip: &str) -> Option<GeoResult> {
        match self.lookup(ip).await {
            Ok(result) => Some(result),
            Err(e) => {
                warn!(ip, "geo enrichment failed: {e}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    struct FakeCache {
        stored: Mutex<HashMap<String, GeoResult>>,
    }

    #[async_trait]
    impl GeoCacheRepository for FakeCache {
        async fn get_fresh(
            &self,
            ip: &str,
            _ttl: Duration,
        ) -> Result<Option<GeoResult>> {
            Ok(self.stored.lock().get(ip).cloned())
        }

        async fn upsert(&self, result: &GeoResult) -> Result<()> {
            self.stored
                .lock()
                .insert(result.ip.clone(), result.clone());
            Ok(())
        }
    }

    struct CountingProvider {
        calls: Mutex<u32>,
    }

    #[async_trait]
    impl GeoProvider for CountingProvider {
        async fn resolve(&self, ip: &str) -> Result<GeoResult> {
            *self.calls.lock() += 1;
            Ok(GeoResult {
                ip: ip.to_string(),
                city: Some("Testville".into()),
                country: Some("Testland".into()),
                isp: None,
                latitude: Some(1.0),
                longitude: Some(2.0),
                private: false,
            })
        }
    }

    fn service() -> (GeoService, Arc<CountingProvider>) {
        let provider = Arc::new(CountingProvider {
            calls: Mutex::new(0),
        });
        let service = GeoService::new(
            Arc::new(FakeCache {
                stored: Mutex::new(HashMap::new()),
            }),
            provider.clone(),
            Duration::from_secs(3600),
        );
        (service, provider)
    }

    #[test]
    fn haversine_nyc_to_london() {
        let nyc = (40.71, -74.01);
        let london = (51.51, -0.13);
        let distance = haversine_km(nyc, london);
        assert!((distance - 5570.0).abs() < 30.0, "got {distance}");
    }

    #[test]
    fn haversine_zero_for_same_point() {
        let p = (48.86, 2.35);
        assert!(haversine_km(p, p) < 1e-9);
    }

    #[test]
    fn private_ip_detection() {
        assert!(is_private_ip(""));
        assert!(is_private_ip("not-an-ip"));
        assert!(is_private_ip("192.168.1.10"));
        assert!(is_private_ip("10.0.0.1"));
        assert!(is_private_ip("127.0.0.1"));
        assert!(is_private_ip("::1"));
        assert!(is_private_ip("fe80::1"));
        assert!(is_private_ip("fd12:3456::1"));
        assert!(!is_private_ip("203.0.113.9"));
        assert!(!is_private_ip("2001:db8::1"));
    }

    #[tokio::test]
    async fn private_ips_never_hit_the_provider() {
        let (service, provider) = service();
        let result = service.lookup("192.168.0.2").await.unwrap();
        assert!(result.private);
        assert_eq!(*provider.calls.lock(), 0);
    }

    #[tokio::test]
    async fn second_lookup_is_cached() {
        let (service, provider) = service();
        service.lookup("203.0.113.9").await.unwrap();
        let second = service.lookup("203.0.113.9").await.unwrap();
        assert_eq!(second.city.as_deref(), Some("Testville"));
        assert_eq!(*provider.calls.lock(), 1);
    }
}
