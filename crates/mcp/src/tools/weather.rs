// Weather tools backed by the shared weather store

use crate::protocol::ToolSchema;
use crate::tools::{
    json_schema_number, json_schema_object, json_schema_string, parse_arguments, Tool, ToolError,
    ToolRegistry,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use toolwire_core::weather::{normalize_city, ReadingSource, WeatherStore};

/// Register `get_weather` and `set_weather` over one store
pub fn register_weather_tools(registry: &mut ToolRegistry, store: Arc<WeatherStore>) {
    registry.register(Arc::new(GetWeatherTool::new(store.clone())));
    registry.register(Arc::new(SetWeatherTool::new(store)));
}

/// Tool to read the temperature of a city
pub struct GetWeatherTool {
    store: Arc<WeatherStore>,
}

impl GetWeatherTool {
    pub fn new(store: Arc<WeatherStore>) -> Self {
        Self { store }
    }
}

#[derive(Debug, Deserialize)]
struct GetWeatherArgs {
    city: String,
}

#[async_trait::async_trait]
impl Tool for GetWeatherTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "get_weather".to_string(),
            description: "Retrieves the temperature for a specified city. Unknown cities get a generated reading".to_string(),
            input_schema: json_schema_object(
                json!({
                    "city": json_schema_string("The name of the city for which to retrieve weather data")
                }),
                vec!["city"],
            ),
        }
    }

    async fn execute(&self, arguments: Value) -> Result<Value, ToolError> {
        let args: GetWeatherArgs = parse_arguments("get_weather", arguments)?;
        if normalize_city(&args.city).is_none() {
            return Err(ToolError::invalid_arguments("city must not be empty"));
        }

        let (temp, source) = self.store.temperature(&args.city).await;
        if source == ReadingSource::Generated {
            tracing::debug!(city = %args.city, temp, "No stored reading, generated one");
        }

        Ok(json!(temp))
    }
}

/// Tool to store the temperature of a city
pub struct SetWeatherTool {
    store: Arc<WeatherStore>,
}

impl SetWeatherTool {
    pub fn new(store: Arc<WeatherStore>) -> Self {
        Self { store }
    }
}

#[derive(Debug, Deserialize)]
struct SetWeatherArgs {
    city: String,
    temp: f64,
}

#[async_trait::async_trait]
impl Tool for SetWeatherTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "set_weather".to_string(),
            description: "Sets the temperature for a specified city. Returns 'OK'".to_string(),
            input_schema: json_schema_object(
                json!({
                    "city": json_schema_string("The name of the city for which to set the weather data"),
                    "temp": json_schema_number("The temperature to associate with the city")
                }),
                vec!["city", "temp"],
            ),
        }
    }

    async fn execute(&self, arguments: Value) -> Result<Value, ToolError> {
        let args: SetWeatherArgs = parse_arguments("set_weather", arguments)?;

        if !self.store.set(&args.city, args.temp).await {
            return Err(ToolError::invalid_arguments("city must not be empty"));
        }

        Ok(json!("OK"))
    }
}
