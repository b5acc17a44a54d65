use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::adapters::check_status;
use crate::error::Result;
use vigil_model::GeoResult;

/// Backend that turns a public IP into a [`GeoResult`].
///
/// The HTTP implementation below is the shipped backend; an on-disk
/// database reader would slot in behind the same trait.
#[async_trait]
pub trait GeoProvider: Send + Sync {
    async fn resolve(&self, ip: &str) -> Result<GeoResult>;
}

/// ip-api.com style JSON lookup. The endpoint template carries an `{ip}`
/// placeholder.
pub struct HttpGeoProvider {
    client: Client,
    url_template: String,
}

#[derive(Deserialize)]
struct ProviderResponse {
    #[serde(default)]
    status: String,
    city: Option<String>,
    country: Option<String>,
    isp: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
}

impl HttpGeoProvider {
    pub fn new(client: Client, url_template: impl Into<String>) -> Self {
        Self {
            client,
            url_template: url_template.into(),
        }
    }
}

#[async_trait]
impl GeoProvider for HttpGeoProvider {
    async fn resolve(&self, ip: &str) -> Result<GeoResult> {
        let url = self.url_template.replace("{ip}", ip);
        let response = self.client.get(url).send().await?;
        let response = check_status(response).await?;
        let body: ProviderResponse = response.json().await?;

        // A failed lookup is still a result worth caching; an unknown IP
        // stays unknown for the TTL instead of being re-queried every poll.
        if body.status == "fail" {
            return Ok(GeoResult {
                ip: ip.to_string(),
                ..Default::default()
            });
        }
        Ok(GeoResult {
            ip: ip.to_string(),
            city: body.city,
            country: body.country,
            isp: body.isp,
            latitude: body.lat,
            longitude: body.lon,
            private: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_success_payload() {
        let raw = r#"{
            "status": "success",
            "country": "United States",
            "city": "New York",
            "isp": "ExampleNet",
            "lat": 40.71,
            "lon": -74.01
        }"#;
        let body: ProviderResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(body.status, "success");
        assert_eq!(body.city.as_deref(), Some("New York"));
        assert_eq!(body.lat, Some(40.71));
    }

    #[test]
    fn decodes_failure_payload() {
        let raw = r#"{"status": "fail", "message": "private range"}"#;
        let body: ProviderResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(body.status, "fail");
        assert!(body.city.is_none());
    }
}
