//! Configuration validation.
//!
//! Validates configuration values and provides helpful error messages.

use std::collections::HashSet;

use crate::common::error::ConfigError;
use crate::config::types::{Config, EndpointConfig};

const PLACEHOLDER_TOKEN: &str = "YOUR_TOKEN_HERE";

/// Validate a configuration and return detailed errors.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    if config.data_dir.is_empty() {
        errors.push("data_dir must not be empty".to_string());
    }
    if config.bridges.is_empty() {
        errors.push("bridges is empty - nothing to run".to_string());
    }

    let mut names = HashSet::new();
    for (i, bridge) in config.bridges.iter().enumerate() {
        if bridge.name.is_empty() {
            errors.push(format!("bridges[{}].name is required", i));
        } else if !names.insert(bridge.name.as_str()) {
            errors.push(format!("bridges[{}].name '{}' is used twice", i, bridge.name));
        }
        if bridge.name.contains(['/', '\\']) {
            errors.push(format!(
                "bridges[{}].name '{}' must not contain path separators",
                i, bridge.name
            ));
        }

        validate_endpoint(&bridge.left, &format!("bridges[{}].left", i), &mut errors);
        validate_endpoint(&bridge.right, &format!("bridges[{}].right", i), &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError {
            message: errors.join("\n"),
        })
    }
}

fn validate_endpoint(endpoint: &EndpointConfig, at: &str, errors: &mut Vec<String>) {
    if endpoint.token.is_empty() {
        errors.push(format!("{}.token is required", at));
    }
    if endpoint.token == PLACEHOLDER_TOKEN {
        errors.push(format!(
            "{}.token has not been configured (still using placeholder)",
            at
        ));
    }
    if endpoint.hub_chat.is_empty() {
        errors.push(format!("{}.hub_chat is required", at));
    }
    if endpoint.admin_chats.iter().any(String::is_empty) {
        errors.push(format!("{}.admin_chats contains an empty id", at));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::message::Messenger;
    use crate::config::types::*;

    fn endpoint(kind: Messenger) -> EndpointConfig {
        EndpointConfig {
            kind,
            token: "valid_token_here".to_string(),
            hub_chat: "100".to_string(),
            admin_chats: vec!["42".to_string()],
            moderation: true,
        }
    }

    fn make_valid_config() -> Config {
        Config {
            data_dir: "data".to_string(),
            bridges: vec![BridgeConfig {
                name: "main".to_string(),
                transport: TransportConfig::default(),
                left: endpoint(Messenger::Telegram),
                right: endpoint(Messenger::Discord),
            }],
        }
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(validate_config(&make_valid_config()).is_ok());
    }

    #[test]
    fn test_same_kind_on_both_sides_is_allowed() {
        let mut config = make_valid_config();
        config.bridges[0].right.kind = Messenger::Telegram;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_empty_token_fails() {
        let mut config = make_valid_config();
        config.bridges[0].left.token = String::new();

        let result = validate_config(&config);
        assert!(result.unwrap_err().to_string().contains("bridges[0].left.token"));
    }

    #[test]
    fn test_placeholder_token_fails() {
        let mut config = make_valid_config();
        config.bridges[0].right.token = PLACEHOLDER_TOKEN.to_string();

        let result = validate_config(&config);
        assert!(result.unwrap_err().to_string().contains("placeholder"));
    }

    #[test]
    fn test_duplicate_bridge_names_fail() {
        let mut config = make_valid_config();
        config.bridges.push(config.bridges[0].clone());

        let result = validate_config(&config);
        assert!(result.unwrap_err().to_string().contains("used twice"));
    }

    #[test]
    fn test_all_problems_reported() {
        let mut config = make_valid_config();
        config.bridges[0].left.hub_chat = String::new();
        config.bridges[0].right.token = String::new();
        config.bridges[0].name = "a/b".to_string();

        let message = validate_config(&config).unwrap_err().to_string();
        assert!(message.contains("bridges[0].left.hub_chat"));
        assert!(message.contains("bridges[0].right.token"));
        assert!(message.contains("path separators"));
    }

    #[test]
    fn test_no_bridges_fails() {
        let mut config = make_valid_config();
        config.bridges.clear();
        assert!(validate_config(&config).is_err());
    }
}
