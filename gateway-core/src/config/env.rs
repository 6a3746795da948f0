//! Environment variable interpolation for configuration

use super::error::ConfigError;
use regex::{Captures, Regex};
use std::env;
use std::sync::LazyLock;

static ENV_VAR_PATTERN: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}"));

/// Compiled `${VAR}` pattern
pub(crate) fn env_var_pattern() -> Result<&'static Regex, ConfigError> {
    ENV_VAR_PATTERN
        .as_ref()
        .map_err(|e| ConfigError::Interpolation {
            message: format!("env var pattern failed to compile: {}", e),
        })
}

/// Replace every `${VAR}` in `content` with the variable's value
///
/// Fails on the first variable that is not set.
pub fn interpolate_env_vars(content: &str) -> Result<String, ConfigError> {
    let pattern = env_var_pattern()?;
    let mut missing: Option<String> = None;

    let result = pattern.replace_all(content, |caps: &Captures| match env::var(&caps[1]) {
        Ok(value) => value,
        Err(_) => {
            missing.get_or_insert_with(|| caps[1].to_string());
            caps[0].to_string()
        }
    });

    match missing {
        Some(var) => Err(ConfigError::EnvVarNotFound { var }),
        None => Ok(result.into_owned()),
    }
}

/// Names of all `${VAR}` placeholders in `text`
pub fn placeholders(text: &str) -> Vec<String> {
    match env_var_pattern() {
        Ok(pattern) => pattern
            .captures_iter(text)
            .map(|cap| cap[1].to_string())
            .collect(),
        Err(_) => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpolate_env_vars() {
        env::set_var("GATEWAY_ENV_TEST_KEY", "test_value");

        let content = "api_key: ${GATEWAY_ENV_TEST_KEY}";
        let result = interpolate_env_vars(content).unwrap();
        assert_eq!(result, "api_key: test_value");

        env::remove_var("GATEWAY_ENV_TEST_KEY");
    }

    #[test]
    fn test_missing_env_var() {
        let content = "api_key: ${GATEWAY_ENV_TEST_MISSING}";
        let result = interpolate_env_vars(content);

        match result {
            Err(ConfigError::EnvVarNotFound { var }) => {
                assert_eq!(var, "GATEWAY_ENV_TEST_MISSING")
            }
            other => panic!("Expected EnvVarNotFound error, got {:?}", other),
        }
    }

    #[test]
    fn test_placeholders() {
        let vars = placeholders("key: ${GATEWAY_KEY}, url: ${GATEWAY_URL}, plain: x");
        assert_eq!(vars, vec!["GATEWAY_KEY".to_string(), "GATEWAY_URL".to_string()]);
    }
}
