//! CLI to config conversion utilities

use crate::error::ConfigurationError;

/// Split a comma-separated host list (e.g., "node-1, node-3:2")
pub fn parse_host_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse the `--user-data` JSON payload
pub fn parse_user_data(s: &str) -> Result<serde_json::Value, ConfigurationError> {
    serde_json::from_str(s).map_err(|e| ConfigurationError::UserData(e.to_string()))
}

/// Convert a TOML value into the JSON payload forwarded to computations
pub fn toml_to_json(value: ::toml::Value) -> Result<serde_json::Value, ConfigurationError> {
    serde_json::to_value(value).map_err(|e| ConfigurationError::UserData(e.to_string()))
}
