//! IQAir (AirVisual) API client.
//!
//! GET `{base_url}/city?city&state&country&key`; success is HTTP 200 with
//! a body whose `status` field is "success".

use async_trait::async_trait;
use domain_readings::{Coordinates, Pollutant, WeatherSnapshot};
use reqwest::Client;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

use super::{AirQualityProvider, ProviderReading, UpstreamError, UpstreamResult};
use crate::config::{CityTarget, IqAirConfig};

#[derive(Debug, Deserialize)]
struct ApiEnvelope {
    status: String,
    data: Option<ApiData>,
}

#[derive(Debug, Deserialize)]
struct ApiData {
    location: ApiLocation,
    current: ApiCurrent,
}

#[derive(Debug, Deserialize)]
struct ApiLocation {
    /// GeoJSON order: [longitude, latitude]
    coordinates: [f64; 2],
}

#[derive(Debug, Deserialize)]
struct ApiCurrent {
    pollution: ApiPollution,
    weather: ApiWeather,
}

#[derive(Debug, Deserialize)]
struct ApiPollution {
    aqius: i32,
    mainus: String,
    aqicn: Option<i32>,
    maincn: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiWeather {
    /// Temperature in °C
    tp: f64,
    /// Pressure in hPa
    pr: f64,
    /// Humidity percentage
    hu: f64,
    /// Wind speed in m/s
    ws: f64,
    /// Wind direction in degrees
    wd: f64,
    /// Weather icon code (unused)
    #[allow(dead_code)]
    ic: Option<String>,
}

/// IQAir provider.
pub struct IqAirProvider {
    config: IqAirConfig,
    client: Client,
}

impl IqAirProvider {
    pub fn new(config: IqAirConfig, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(4)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self { config, client }
    }

    fn parse_payload(body: &str) -> UpstreamResult<ProviderReading> {
        let envelope: ApiEnvelope = serde_json::from_str(body)
            .map_err(|e| UpstreamError::Payload(format!("invalid JSON: {}", e)))?;

        if envelope.status != "success" {
            return Err(UpstreamError::Api(envelope.status));
        }

        let data = envelope
            .data
            .ok_or_else(|| UpstreamError::Payload("missing data field".to_string()))?;

        let [lon, lat] = data.location.coordinates;
        let coordinates = Coordinates::new(lat, lon)
            .map_err(|e| UpstreamError::Payload(format!("bad coordinates: {}", e)))?;

        let main_pollutant = Pollutant::from_str(&data.current.pollution.mainus)
            .map_err(|_| {
                UpstreamError::Payload(format!(
                    "unknown pollutant code '{}'",
                    data.current.pollution.mainus
                ))
            })?;

        let main_pollutant_cn = data
            .current
            .pollution
            .maincn
            .as_deref()
            .and_then(|code| Pollutant::from_str(code).ok());

        Ok(ProviderReading {
            coordinates,
            aqi: data.current.pollution.aqius,
            main_pollutant,
            aqi_cn: data.current.pollution.aqicn,
            main_pollutant_cn,
            weather: WeatherSnapshot {
                temperature: data.current.weather.tp,
                humidity: data.current.weather.hu,
                pressure: data.current.weather.pr,
                wind_speed: data.current.weather.ws,
                wind_direction: data.current.weather.wd,
            },
        })
    }
}

#[async_trait]
impl AirQualityProvider for IqAirProvider {
    async fn fetch_city(&self, city: &CityTarget) -> UpstreamResult<ProviderReading> {
        let url = format!("{}/city", self.config.base_url);

        debug!(city = %city.city, "Fetching current reading");

        let response = self
            .client
            .get(&url)
            .query(&[
                ("city", city.city.as_str()),
                ("state", city.state.as_str()),
                ("country", city.country.as_str()),
                ("key", self.config.api_key.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = %status, city = %city.city, "Provider returned non-success status");
            return Err(UpstreamError::Http {
                status: status.as_u16(),
            });
        }

        let body = response.text().await?;
        Self::parse_payload(&body)
    }

    fn name(&self) -> &'static str {
        "iqair"
    }

    async fn health_check(&self) -> UpstreamResult<bool> {
        let url = format!("{}/countries", self.config.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("key", self.config.api_key.as_str())])
            .send()
            .await?;
        Ok(response.status().is_success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn success_body(aqi: i32, mainus: &str) -> String {
        format!(
            r#"{{
                "status": "success",
                "data": {{
                    "city": "Paris",
                    "location": {{ "type": "Point", "coordinates": [2.3522, 48.8566] }},
                    "current": {{
                        "pollution": {{ "ts": "2026-03-14T09:00:00.000Z", "aqius": {aqi}, "mainus": "{mainus}", "aqicn": 31, "maincn": "p2" }},
                        "weather": {{ "ts": "2026-03-14T09:00:00.000Z", "tp": 12, "pr": 1013, "hu": 60, "ws": 3.5, "wd": 220, "ic": "01d" }}
                    }}
                }}
            }}"#
        )
    }

    #[test]
    fn test_parse_success_payload() {
        let reading = IqAirProvider::parse_payload(&success_body(65, "p2")).unwrap();

        assert_eq!(reading.aqi, 65);
        assert_eq!(reading.main_pollutant, Pollutant::P2);
        assert_eq!(reading.aqi_cn, Some(31));
        assert_eq!(reading.main_pollutant_cn, Some(Pollutant::P2));
        // Coordinates arrive [lon, lat]
        assert!((reading.coordinates.lat - 48.8566).abs() < 1e-9);
        assert!((reading.coordinates.lon - 2.3522).abs() < 1e-9);
        assert!((reading.weather.temperature - 12.0).abs() < 1e-9);
        assert!((reading.weather.humidity - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_parse_api_failure_status() {
        let body = r#"{ "status": "call_limit_reached" }"#;
        let result = IqAirProvider::parse_payload(body);
        assert!(matches!(result, Err(UpstreamError::Api(s)) if s == "call_limit_reached"));
    }

    #[test]
    fn test_parse_missing_data() {
        let body = r#"{ "status": "success" }"#;
        assert!(matches!(
            IqAirProvider::parse_payload(body),
            Err(UpstreamError::Payload(_))
        ));
    }

    #[test]
    fn test_parse_unknown_pollutant() {
        let result = IqAirProvider::parse_payload(&success_body(65, "zz"));
        assert!(matches!(result, Err(UpstreamError::Payload(_))));
    }

    #[test]
    fn test_parse_invalid_json() {
        assert!(matches!(
            IqAirProvider::parse_payload("not json"),
            Err(UpstreamError::Payload(_))
        ));
    }

    #[test]
    fn test_parse_out_of_range_coordinates() {
        let body = r#"{
            "status": "success",
            "data": {
                "location": { "coordinates": [200.0, 95.0] },
                "current": {
                    "pollution": { "aqius": 65, "mainus": "p2" },
                    "weather": { "tp": 12, "pr": 1013, "hu": 60, "ws": 3.5, "wd": 220 }
                }
            }
        }"#;
        assert!(matches!(
            IqAirProvider::parse_payload(body),
            Err(UpstreamError::Payload(_))
        ));
    }
}
