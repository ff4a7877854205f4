pub mod weather;
mod registry;

pub use registry::{
    json_schema_number, json_schema_object, json_schema_string, parse_arguments, Tool, ToolError,
    ToolRegistry,
};
pub use weather::{register_weather_tools, GetWeatherTool, SetWeatherTool};
