use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::error::ReadingError;

/// Storage tier a reading currently lives in.
///
/// Tier-specific behavior (indexes, TTL, migration cutoffs) lives in the
/// store and migration policy; the record shape is shared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Tier {
    Hot,
    Warm,
    Cold,
}

impl Tier {
    /// Collection name backing this tier.
    pub fn collection(&self) -> &'static str {
        match self {
            Self::Hot => "air_quality_hot",
            Self::Warm => "air_quality_warm",
            Self::Cold => "air_quality_cold",
        }
    }
}

/// Pollutant codes as reported by the upstream provider.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, Default,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Pollutant {
    /// PM2.5
    #[default]
    P2,
    /// PM10
    P1,
    /// PM1
    P3,
    P4,
    P5,
    N2,
    S4,
    Co,
    O3,
    No2,
    So2,
}

/// AQI classification bands.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display,
)]
pub enum PollutionLevel {
    Good,
    Moderate,
    #[serde(rename = "Unhealthy for Sensitive Groups")]
    #[strum(serialize = "Unhealthy for Sensitive Groups")]
    UnhealthyForSensitiveGroups,
    Unhealthy,
    #[serde(rename = "Very Unhealthy")]
    #[strum(serialize = "Very Unhealthy")]
    VeryUnhealthy,
    Hazardous,
}

impl PollutionLevel {
    /// Band table: Good [0,50]; Moderate (50,100]; USG (100,150];
    /// Unhealthy (150,200]; Very Unhealthy (200,300]; Hazardous (300,500].
    ///
    /// Total over the valid AQI domain; values above 500 clamp to Hazardous.
    pub fn from_aqi(aqi: i32) -> Self {
        match aqi {
            i32::MIN..=50 => Self::Good,
            51..=100 => Self::Moderate,
            101..=150 => Self::UnhealthyForSensitiveGroups,
            151..=200 => Self::Unhealthy,
            201..=300 => Self::VeryUnhealthy,
            _ => Self::Hazardous,
        }
    }

    /// Levels at or above Unhealthy for Sensitive Groups count as unhealthy
    /// in daily/weekly summaries.
    pub fn is_unhealthy(&self) -> bool {
        *self >= Self::UnhealthyForSensitiveGroups
    }
}

/// Geographic coordinates, validated on construction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lon: f64) -> Result<Self, ReadingError> {
        if !(-90.0..=90.0).contains(&lat) {
            return Err(ReadingError::Invalid(format!("latitude {} out of range", lat)));
        }
        if !(-180.0..=180.0).contains(&lon) {
            return Err(ReadingError::Invalid(format!(
                "longitude {} out of range",
                lon
            )));
        }
        Ok(Self { lat, lon })
    }
}

/// Weather conditions captured alongside the AQI sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct WeatherSnapshot {
    /// Temperature in °C
    pub temperature: f64,
    /// Relative humidity, 0-100
    pub humidity: f64,
    /// Atmospheric pressure in hPa
    pub pressure: f64,
    /// Wind speed in m/s
    pub wind_speed: f64,
    /// Wind direction in degrees
    pub wind_direction: f64,
}

/// Fetch-side metadata attached to a reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct ReadingMetadata {
    pub api_response_time_ms: u64,
    pub cached: bool,
    pub retry_count: u32,
}

/// One air-quality reading. Immutable once written; identity is
/// (location, timestamp), deduplicated at write by a unique index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reading {
    /// Storage identity (regenerated when the record moves tiers)
    #[serde(rename = "_id", alias = "id")]
    pub id: Uuid,
    /// Location key, e.g. "paris"
    pub location: String,
    /// Sample timestamp (UTC). Stored as a BSON date so range filters and
    /// the warm tier's TTL index operate on a real date field.
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub timestamp: DateTime<Utc>,
    pub coordinates: Coordinates,
    /// Air Quality Index, 0-500
    pub aqi: i32,
    pub main_pollutant: Pollutant,
    /// Band derived from `aqi`
    pub level: PollutionLevel,
    pub weather: WeatherSnapshot,
    #[serde(default)]
    pub metadata: ReadingMetadata,
    pub created_at: DateTime<Utc>,
}

impl Reading {
    /// Construct a validated reading. The level is derived from the AQI.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        location: impl Into<String>,
        timestamp: DateTime<Utc>,
        coordinates: Coordinates,
        aqi: i32,
        main_pollutant: Pollutant,
        weather: WeatherSnapshot,
        metadata: ReadingMetadata,
    ) -> Result<Self, ReadingError> {
        if !(0..=500).contains(&aqi) {
            return Err(ReadingError::Invalid(format!("aqi {} out of range", aqi)));
        }
        if !(0.0..=100.0).contains(&weather.humidity) {
            return Err(ReadingError::Invalid(format!(
                "humidity {} out of range",
                weather.humidity
            )));
        }

        Ok(Self {
            id: Uuid::new_v4(),
            location: location.into(),
            timestamp,
            coordinates,
            aqi,
            main_pollutant,
            level: PollutionLevel::from_aqi(aqi),
            weather,
            metadata,
            created_at: Utc::now(),
        })
    }

    /// Copy with a fresh storage identity, used when moving between tiers.
    pub fn with_new_identity(&self) -> Self {
        Self {
            id: Uuid::new_v4(),
            ..self.clone()
        }
    }

    /// Hour of day (0-23, UTC) this reading falls in.
    pub fn hour(&self) -> u32 {
        use chrono::Timelike;
        self.timestamp.hour()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_reading(aqi: i32) -> Reading {
        Reading::new(
            "paris",
            Utc.with_ymd_and_hms(2026, 3, 14, 9, 0, 0).unwrap(),
            Coordinates::new(48.8566, 2.3522).unwrap(),
            aqi,
            Pollutant::P2,
            WeatherSnapshot {
                temperature: 12.0,
                humidity: 60.0,
                pressure: 1013.0,
                wind_speed: 3.5,
                wind_direction: 220.0,
            },
            ReadingMetadata::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_level_band_boundaries() {
        assert_eq!(PollutionLevel::from_aqi(0), PollutionLevel::Good);
        assert_eq!(PollutionLevel::from_aqi(50), PollutionLevel::Good);
        assert_eq!(PollutionLevel::from_aqi(51), PollutionLevel::Moderate);
        assert_eq!(PollutionLevel::from_aqi(100), PollutionLevel::Moderate);
        assert_eq!(
            PollutionLevel::from_aqi(101),
            PollutionLevel::UnhealthyForSensitiveGroups
        );
        assert_eq!(
            PollutionLevel::from_aqi(150),
            PollutionLevel::UnhealthyForSensitiveGroups
        );
        assert_eq!(PollutionLevel::from_aqi(151), PollutionLevel::Unhealthy);
        assert_eq!(PollutionLevel::from_aqi(200), PollutionLevel::Unhealthy);
        assert_eq!(PollutionLevel::from_aqi(201), PollutionLevel::VeryUnhealthy);
        assert_eq!(PollutionLevel::from_aqi(300), PollutionLevel::VeryUnhealthy);
        assert_eq!(PollutionLevel::from_aqi(301), PollutionLevel::Hazardous);
        assert_eq!(PollutionLevel::from_aqi(500), PollutionLevel::Hazardous);
    }

    #[test]
    fn test_level_band_is_monotone() {
        let mut previous = PollutionLevel::from_aqi(0);
        for aqi in 1..=500 {
            let level = PollutionLevel::from_aqi(aqi);
            assert!(level >= previous, "level regressed at aqi {}", aqi);
            previous = level;
        }
    }

    #[test]
    fn test_unhealthy_classification() {
        assert!(!PollutionLevel::Good.is_unhealthy());
        assert!(!PollutionLevel::Moderate.is_unhealthy());
        assert!(PollutionLevel::UnhealthyForSensitiveGroups.is_unhealthy());
        assert!(PollutionLevel::Hazardous.is_unhealthy());
    }

    #[test]
    fn test_reading_derives_level() {
        let reading = sample_reading(65);
        assert_eq!(reading.level, PollutionLevel::Moderate);
        assert_eq!(reading.hour(), 9);
    }

    #[test]
    fn test_reading_rejects_out_of_range_aqi() {
        let result = Reading::new(
            "paris",
            Utc::now(),
            Coordinates::new(48.8, 2.3).unwrap(),
            501,
            Pollutant::P2,
            WeatherSnapshot {
                humidity: 50.0,
                ..Default::default()
            },
            ReadingMetadata::default(),
        );
        assert!(matches!(result, Err(ReadingError::Invalid(_))));
    }

    #[test]
    fn test_reading_rejects_bad_humidity() {
        let result = Reading::new(
            "paris",
            Utc::now(),
            Coordinates::new(48.8, 2.3).unwrap(),
            50,
            Pollutant::P2,
            WeatherSnapshot {
                humidity: 130.0,
                ..Default::default()
            },
            ReadingMetadata::default(),
        );
        assert!(matches!(result, Err(ReadingError::Invalid(_))));
    }

    #[test]
    fn test_coordinates_validation() {
        assert!(Coordinates::new(48.85, 2.35).is_ok());
        assert!(Coordinates::new(90.0, 180.0).is_ok());
        assert!(Coordinates::new(-90.0, -180.0).is_ok());
        assert!(Coordinates::new(91.0, 0.0).is_err());
        assert!(Coordinates::new(0.0, -181.0).is_err());
    }

    #[test]
    fn test_new_identity_keeps_content() {
        let reading = sample_reading(42);
        let moved = reading.with_new_identity();
        assert_ne!(moved.id, reading.id);
        assert_eq!(moved.location, reading.location);
        assert_eq!(moved.timestamp, reading.timestamp);
        assert_eq!(moved.aqi, reading.aqi);
    }

    #[test]
    fn test_tier_collections() {
        assert_eq!(Tier::Hot.collection(), "air_quality_hot");
        assert_eq!(Tier::Warm.collection(), "air_quality_warm");
        assert_eq!(Tier::Cold.collection(), "air_quality_cold");
    }

    #[test]
    fn test_pollutant_serialization() {
        assert_eq!(serde_json::to_string(&Pollutant::P2).unwrap(), "\"p2\"");
        assert_eq!(serde_json::to_string(&Pollutant::No2).unwrap(), "\"no2\"");
        let parsed: Pollutant = serde_json::from_str("\"o3\"").unwrap();
        assert_eq!(parsed, Pollutant::O3);
    }
}
