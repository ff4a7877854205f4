// In-memory weather table exposed through the get_weather / set_weather tools

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

/// Weather settings, usually the `[weather]` table of the server config file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherConfig {
    /// Known temperatures loaded into the store at startup
    #[serde(default = "default_seed")]
    pub seed: BTreeMap<String, f64>,

    /// Lower bound for generated temperatures of unknown cities
    #[serde(default = "default_random_min")]
    pub random_min: f64,

    /// Upper bound for generated temperatures of unknown cities
    #[serde(default = "default_random_max")]
    pub random_max: f64,
}

fn default_seed() -> BTreeMap<String, f64> {
    BTreeMap::from([("Copenhagen".to_string(), 20.0)])
}

fn default_random_min() -> f64 {
    -5.0
}

fn default_random_max() -> f64 {
    35.0
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            random_min: default_random_min(),
            random_max: default_random_max(),
        }
    }
}

/// Where a temperature reading came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadingSource {
    Known,
    Generated,
}

/// Temperature table keyed by normalized city name.
///
/// One store is owned by the server and shared by the weather tools; there is
/// no process-wide state.
pub struct WeatherStore {
    known: RwLock<HashMap<String, f64>>,
    random_min: f64,
    random_max: f64,
}

impl WeatherStore {
    pub fn new(config: &WeatherConfig) -> Self {
        let known = config
            .seed
            .iter()
            .filter_map(|(city, temp)| normalize_city(city).map(|key| (key, *temp)))
            .collect();

        let (random_min, random_max) = if !config.random_min.is_finite() || !config.random_max.is_finite() {
            tracing::warn!(
                random_min = config.random_min,
                random_max = config.random_max,
                "Non-finite weather range, using defaults"
            );
            (default_random_min(), default_random_max())
        } else if config.random_min <= config.random_max {
            (config.random_min, config.random_max)
        } else {
            (config.random_max, config.random_min)
        };

        Self {
            known: RwLock::new(known),
            random_min,
            random_max,
        }
    }

    /// Look up a stored temperature
    pub async fn lookup(&self, city: &str) -> Option<f64> {
        let key = normalize_city(city)?;
        self.known.read().await.get(&key).copied()
    }

    /// Stored temperature, or a generated one for unknown cities.
    ///
    /// Generated readings are not remembered.
    pub async fn temperature(&self, city: &str) -> (f64, ReadingSource) {
        match self.lookup(city).await {
            Some(temp) => (temp, ReadingSource::Known),
            None => (self.random_temperature(), ReadingSource::Generated),
        }
    }

    /// Store a temperature; returns false if the city name is blank
    pub async fn set(&self, city: &str, temp: f64) -> bool {
        let Some(key) = normalize_city(city) else {
            return false;
        };
        tracing::debug!(city = %key, temp, "Updating weather");
        self.known.write().await.insert(key, temp);
        true
    }

    pub async fn len(&self) -> usize {
        self.known.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.known.read().await.is_empty()
    }

    /// Uniform sample from the configured range, rounded to one decimal
    fn random_temperature(&self) -> f64 {
        let raw = rand::thread_rng().gen_range(self.random_min..=self.random_max);
        let rounded = (raw * 10.0).round() / 10.0;
        rounded.clamp(self.random_min, self.random_max)
    }
}

impl Default for WeatherStore {
    fn default() -> Self {
        Self::new(&WeatherConfig::default())
    }
}

/// Trim and lowercase a city name; blank names have no key
pub fn normalize_city(city: &str) -> Option<String> {
    let key = city.trim().to_lowercase();
    if key.is_empty() {
        None
    } else {
        Some(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_seeded_city_is_case_and_whitespace_insensitive() {
        let store = WeatherStore::default();

        assert_eq!(store.lookup("Copenhagen").await, Some(20.0));
        assert_eq!(store.lookup("  copenhagen ").await, Some(20.0));
        assert_eq!(store.lookup("COPENHAGEN").await, Some(20.0));
    }

    #[tokio::test]
    async fn test_unknown_city_is_generated_in_range() {
        let store = WeatherStore::default();

        for _ in 0..200 {
            let (temp, source) = store.temperature("Nowhere").await;
            assert_eq!(source, ReadingSource::Generated);
            assert!((-5.0..=35.0).contains(&temp), "out of range: {}", temp);
            assert_eq!((temp * 10.0).round() / 10.0, temp);
        }

        // Generated readings are not stored
        assert_eq!(store.lookup("Nowhere").await, None);
    }

    #[tokio::test]
    async fn test_set_then_lookup() {
        let store = WeatherStore::default();

        assert!(store.set("Lagos", 31.5).await);
        assert_eq!(store.lookup(" LAGOS ").await, Some(31.5));

        let (temp, source) = store.temperature("lagos").await;
        assert_eq!(temp, 31.5);
        assert_eq!(source, ReadingSource::Known);
    }

    #[tokio::test]
    async fn test_set_overwrites_existing_value() {
        let store = WeatherStore::default();

        store.set("copenhagen", -2.5).await;
        assert_eq!(store.lookup("Copenhagen").await, Some(-2.5));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_blank_city_is_rejected() {
        let store = WeatherStore::default();

        assert!(!store.set("   ", 10.0).await);
        assert_eq!(store.lookup("").await, None);
    }

    #[tokio::test]
    async fn test_inverted_range_is_normalized() {
        let config = WeatherConfig {
            seed: BTreeMap::new(),
            random_min: 10.0,
            random_max: 0.0,
        };
        let store = WeatherStore::new(&config);
        assert!(store.is_empty().await);

        let (temp, _) = store.temperature("anywhere").await;
        assert!((0.0..=10.0).contains(&temp));
    }

    #[tokio::test]
    async fn test_non_finite_range_falls_back_to_defaults() {
        let config = WeatherConfig {
            seed: BTreeMap::new(),
            random_min: f64::NAN,
            random_max: f64::INFINITY,
        };
        let store = WeatherStore::new(&config);

        let (temp, source) = store.temperature("Nowhere").await;
        assert_eq!(source, ReadingSource::Generated);
        assert!((-5.0..=35.0).contains(&temp));
    }

    #[test]
    fn test_config_defaults_from_empty_table() {
        let config: WeatherConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.random_min, -5.0);
        assert_eq!(config.random_max, 35.0);
        assert_eq!(config.seed.get("Copenhagen"), Some(&20.0));
    }
}
