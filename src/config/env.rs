//! Environment variable overrides for configuration.
//!
//! Supports overriding config values with environment variables:
//! - `CHATBRIDGE_CONFIG` - config file path
//! - `CHATBRIDGE_<BRIDGE>_LEFT_TOKEN` - token of a bridge's left adapter
//! - `CHATBRIDGE_<BRIDGE>_RIGHT_TOKEN` - token of a bridge's right adapter
//!
//! `<BRIDGE>` is the bridge name uppercased, with `-` and spaces as `_`.

use std::env;

use crate::config::types::Config;

/// Environment variable prefix for all config overrides.
const ENV_PREFIX: &str = "CHATBRIDGE";

/// Apply environment variable overrides to a config.
///
/// This allows tokens to be provided via environment variables instead of
/// the config file.
pub fn apply_env_overrides(mut config: Config) -> Config {
    for bridge in &mut config.bridges {
        let key = bridge_key(&bridge.name);

        if let Ok(token) = env::var(format!("{}_{}_LEFT_TOKEN", ENV_PREFIX, key)) {
            bridge.left.token = token;
        }
        if let Ok(token) = env::var(format!("{}_{}_RIGHT_TOKEN", ENV_PREFIX, key)) {
            bridge.right.token = token;
        }
    }

    config
}

/// Token variables that are set but empty.
pub fn check_empty_env_vars(config: &Config) -> Vec<String> {
    config
        .bridges
        .iter()
        .flat_map(|bridge| {
            let key = bridge_key(&bridge.name);
            [
                format!("{}_{}_LEFT_TOKEN", ENV_PREFIX, key),
                format!("{}_{}_RIGHT_TOKEN", ENV_PREFIX, key),
            ]
        })
        .filter(|var| env::var(var).map(|v| v.is_empty()).unwrap_or(false))
        .collect()
}

/// Get the config file path from environment or use default.
///
/// Checks `CHATBRIDGE_CONFIG` environment variable, otherwise returns "chatbridge.conf".
pub fn get_config_path() -> String {
    env::var(format!("{}_CONFIG", ENV_PREFIX)).unwrap_or_else(|_| "chatbridge.conf".to_string())
}

fn bridge_key(name: &str) -> String {
    name.to_uppercase().replace(['-', ' '], "_")
}
