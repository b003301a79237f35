//! Config validation - warns about unknown fields

use serde_json::Value;
use tracing::warn;

const TOP_LEVEL_KEYS: &[&str] = &[
    "host",
    "port",
    "requestTimeoutSecs",
    "drainTimeoutSecs",
    "maxPayloadSize",
    "plugins",
    "notificator",
];

/// Validate JSON config and warn about unknown top-level fields.
///
/// Plugin entries are not checked here: their extra keys are plugin
/// parameters and are validated by each plugin factory.
pub fn warn_unknown_fields(content: &str, config_name: &str) {
    for key in find_unknown_keys(content) {
        warn!("Unknown config field in {config_name}: {key}");
    }
}

fn find_unknown_keys(content: &str) -> Vec<String> {
    let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(content) else {
        return Vec::new();
    };

    obj.keys()
        .filter(|key| !TOP_LEVEL_KEYS.contains(&key.as_str()))
        .cloned()
        .collect()
}
