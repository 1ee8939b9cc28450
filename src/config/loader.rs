//! Configuration Loader
//!
//! Environment-aware configuration loading built on the `config` crate.
//! Handles file discovery, environment detection, environment-variable
//! overrides and validation.

use super::error::{ConfigResult, ConfigurationError};
use super::GatewayConfig;
use config::{Config, Environment, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Prefix of environment variable overrides (`GATEWAY__HEALTH__FAILURE_THRESHOLD`)
pub const ENV_PREFIX: &str = "GATEWAY";

/// Base name of configuration files inside the configuration directory
pub const CONFIG_BASENAME: &str = "gateway";

/// Owns the loaded configuration for the lifetime of the process
#[derive(Debug)]
pub struct ConfigManager {
    config: GatewayConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with explicit environment
    /// This is useful for testing without modifying global environment variables
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        Self::load_layered(config_dir, environment, ENV_PREFIX)
    }

    /// Wrap an already-built configuration (validated before use)
    pub fn from_config(config: GatewayConfig) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            config,
            environment: Self::detect_environment(),
            config_directory: Self::default_config_directory(),
        }))
    }

    pub(crate) fn load_layered(
        config_dir: Option<PathBuf>,
        environment: &str,
        env_prefix: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(Self::default_config_directory);

        debug!(
            "Loading configuration for environment '{}' from directory: {}",
            environment,
            config_directory.display()
        );

        let config = Self::build_config(&config_directory, environment, env_prefix)?;
        config.validate()?;

        debug!(
            "Configuration loaded successfully: {}",
            serde_json::to_string_pretty(&Self::sanitize_config_for_logging(&config))
                .unwrap_or_else(|_| "[serialization error]".to_string())
        );

        info!(
            environment = %environment,
            config_directory = %config_directory.display(),
            sms_providers = config.providers.sms.len(),
            email_providers = config.providers.email.len(),
            whatsapp_providers = config.providers.whatsapp.len(),
            "⚙️ Gateway configuration loaded"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    fn build_config(
        config_directory: &Path,
        environment: &str,
        env_prefix: &str,
    ) -> ConfigResult<GatewayConfig> {
        let base = config_directory.join(CONFIG_BASENAME);
        let overlay = config_directory.join(format!("{CONFIG_BASENAME}.{environment}"));

        let settings = Config::builder()
            .add_source(File::with_name(&base.to_string_lossy()).required(false))
            .add_source(File::with_name(&overlay.to_string_lossy()).required(false))
            .add_source(
                Environment::with_prefix(env_prefix)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigurationError::load_error(base.display().to_string(), e))?;

        settings
            .try_deserialize::<GatewayConfig>()
            .map_err(|e| ConfigurationError::load_error(base.display().to_string(), e))
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Get the detected or explicit environment name
    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// Get sanitized configuration for debugging/logging that masks sensitive fields
    pub fn debug_config(&self) -> serde_json::Value {
        Self::sanitize_config_for_logging(&self.config)
    }

    /// Current environment from `GATEWAY_ENV`, then `APP_ENV`, default `development`
    pub fn detect_environment() -> String {
        std::env::var("GATEWAY_ENV")
            .or_else(|_| std::env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
    }

    fn default_config_directory() -> PathBuf {
        std::env::var("GATEWAY_CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config"))
    }

    /// Sanitize configuration for safe logging by masking sensitive fields
    fn sanitize_config_for_logging(config: &GatewayConfig) -> serde_json::Value {
        let mut config_json = serde_json::to_value(config).unwrap_or(serde_json::Value::Null);
        let sensitive_patterns = ["password", "secret", "token", "credential", "redis_url"];
        Self::sanitize_json_recursive(&mut config_json, &sensitive_patterns);
        config_json
    }

    /// Recursively sanitize sensitive fields in JSON configuration
    fn sanitize_json_recursive(value: &mut serde_json::Value, sensitive_patterns: &[&str]) {
        match value {
            serde_json::Value::Object(map) => {
                for (key, val) in map.iter_mut() {
                    let key_lower = key.to_lowercase();
                    let is_sensitive = sensitive_patterns
                        .iter()
                        .any(|pattern| key_lower.contains(pattern));

                    if is_sensitive && !val.is_null() {
                        *val = serde_json::Value::String("[MASKED]".to_string());
                    } else {
                        Self::sanitize_json_recursive(val, sensitive_patterns);
                    }
                }
            }
            serde_json::Value::Array(items) => {
                for item in items {
                    Self::sanitize_json_recursive(item, sensitive_patterns);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreBackend;
    use crate::models::Channel;
    use std::fs;

    #[test]
    fn test_missing_files_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ConfigManager::load_layered(
            Some(dir.path().to_path_buf()),
            "test",
            "GATEWAY_TEST_DEFAULTS",
        )
        .unwrap();

        assert_eq!(manager.config(), &GatewayConfig::default());
        assert_eq!(manager.environment(), "test");
    }

    #[test]
    fn test_file_and_environment_overlay() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("gateway.toml"),
            r#"
[health]
failure_threshold = 7

[[providers.sms]]
id = "beem"
priority = 90

[[providers.sms]]
id = "termii"
priority = 60
rate_limit = { max_attempts = 100, window_seconds = 60 }

[webhook]
secret = "a-long-enough-signing-secret"
"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("gateway.production.toml"),
            "[health]\ntimeout_seconds = 120\n",
        )
        .unwrap();

        let manager = ConfigManager::load_layered(
            Some(dir.path().to_path_buf()),
            "production",
            "GATEWAY_TEST_OVERLAY",
        )
        .unwrap();
        let config = manager.config();

        assert_eq!(config.health.failure_threshold, 7);
        assert_eq!(config.health.timeout_seconds, 120);
        assert_eq!(config.health.success_threshold, 3);

        let sms = config.providers.for_channel(Channel::Sms);
        assert_eq!(sms.len(), 2);
        assert_eq!(sms[0].id, "beem");
        assert!(sms[0].enabled);
        assert_eq!(sms[1].rate_limit.map(|r| r.max_attempts), Some(100));

        let debug = manager.debug_config();
        assert_eq!(debug["webhook"]["secret"], "[MASKED]");
    }

    #[test]
    fn test_environment_variables_override_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("gateway.toml"),
            "[health]\nfailure_threshold = 7\n",
        )
        .unwrap();

        std::env::set_var("GATEWAY_TEST_ENVVARS__HEALTH__FAILURE_THRESHOLD", "9");
        std::env::set_var("GATEWAY_TEST_ENVVARS__STORE__KEY_PREFIX", "gw");
        let result = ConfigManager::load_layered(
            Some(dir.path().to_path_buf()),
            "test",
            "GATEWAY_TEST_ENVVARS",
        );
        std::env::remove_var("GATEWAY_TEST_ENVVARS__HEALTH__FAILURE_THRESHOLD");
        std::env::remove_var("GATEWAY_TEST_ENVVARS__STORE__KEY_PREFIX");

        let manager = result.unwrap();
        assert_eq!(manager.config().health.failure_threshold, 9);
        assert_eq!(manager.config().store.key_prefix, "gw");
        assert_eq!(manager.config().store.backend, StoreBackend::Memory);
    }

    #[test]
    fn test_invalid_file_values_fail_validation() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("gateway.toml"),
            "[health]\nfailure_threshold = 0\n",
        )
        .unwrap();

        let result = ConfigManager::load_layered(
            Some(dir.path().to_path_buf()),
            "test",
            "GATEWAY_TEST_INVALID",
        );
        assert!(matches!(result, Err(ConfigurationError::InvalidValue { .. })));
    }
}
