//! Configuration management for fleethub.
//!
//! Configuration is loaded with figment from defaults, a TOML file and
//! environment variables. The three injected values of a session (backend
//! configuration JSON, optional bootstrap token, tenant id) all have safe
//! fallbacks so loading never fails just because they are absent; a missing
//! backend configuration is reported later, when the store connects.

use std::path::PathBuf;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::store::ArrayUnionMode;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "fleethub";

/// Tenant used when none is injected.
pub const DEFAULT_APP_ID: &str = "default-app-id";

/// A tenant id must be usable as a single collection path segment.
/// Tenant and project ids become path segments and file names.
const APP_ID_PATTERN: &str = r"^[A-Za-z0-9._-]+$";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `FLEETHUB_`, sections split by `__`,
///    e.g. `FLEETHUB_TENANT__APP_ID`)
/// 2. TOML config file at `~/.config/fleethub/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Backend connection settings.
    pub backend: BackendSettings,
    /// Tenant namespacing.
    pub tenant: TenantConfig,
    /// Document store behaviour.
    pub store: StoreConfig,
    /// First-run seeding.
    pub seed: SeedConfig,
    /// Dashboard presentation.
    pub dashboard: DashboardConfig,
}

/// Injected backend values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    /// Backend configuration as a JSON object string.
    /// Defaults to `{}`, which fails to connect with a configuration error.
    pub config: String,
    /// Optional pre-issued auth token.
    pub auth_token: Option<String>,
}

/// Tenant configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TenantConfig {
    /// Application/tenant id used in `artifacts/{app_id}/public/data/cars`.
    pub app_id: String,
}

/// Document store configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Duplicate handling for array-union appends.
    pub array_union: ArrayUnionMode,
}

/// Seeding configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeedConfig {
    /// Seed the collection when it is empty at startup.
    pub enabled: bool,
    /// JSON fixture file to seed from instead of the built-in fleet.
    pub fixtures_path: Option<PathBuf>,
}

/// Dashboard configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    /// Flag vehicles whose next service falls within this many months.
    pub service_due_months: u32,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            config: "{}".to_string(),
            auth_token: None,
        }
    }
}

impl Default for TenantConfig {
    fn default() -> Self {
        Self {
            app_id: DEFAULT_APP_ID.to_string(),
        }
    }
}

impl Default for SeedConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            fixtures_path: None,
        }
    }
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            service_due_months: 2,
        }
    }
}

/// Parsed backend configuration.
///
/// Unknown keys are ignored so configuration objects written for other
/// clients of the same backend can be passed through unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendConfig {
    /// Backend project identifier.
    pub project_id: String,
    /// Database file. Defaults to `<data dir>/<project_id>.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,
    /// Keep all data in memory (nothing persists across runs).
    #[serde(default)]
    pub in_memory: bool,
}

impl BackendConfig {
    /// Parse a backend configuration JSON string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigInvalid`] if the string is blank, is not a JSON
    /// object, is an empty object, or lacks a `projectId` that is a single
    /// file name segment.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(Error::config_invalid("backend configuration is empty"));
        }

        let value: serde_json::Value = serde_json::from_str(raw)
            .map_err(|e| Error::config_invalid(format!("not valid JSON: {e}")))?;
        match value.as_object() {
            None => {
                return Err(Error::config_invalid(
                    "backend configuration must be a JSON object",
                ))
            }
            Some(map) if map.is_empty() => {
                return Err(Error::config_invalid("backend configuration is empty"))
            }
            Some(_) => {}
        }

        let config: Self = serde_json::from_value(value)
            .map_err(|e| Error::config_invalid(e.to_string()))?;
        if config.project_id.trim().is_empty() {
            return Err(Error::config_invalid("projectId must not be empty"));
        }
        if !id_regex()?.is_match(&config.project_id) {
            return Err(Error::config_invalid(format!(
                "projectId '{}' must match {APP_ID_PATTERN}",
                config.project_id
            )));
        }
        Ok(config)
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.database_path.clone().unwrap_or_else(|| {
            Config::default_data_dir().join(format!("{}.db", self.project_id))
        })
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed("FLEETHUB_").split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// The backend JSON is deliberately not checked here; connecting reports
    /// it as [`Error::ConfigInvalid`].
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        if !id_regex()?.is_match(&self.tenant.app_id) {
            return Err(Error::ConfigValidation {
                message: format!(
                    "tenant app_id '{}' must match {APP_ID_PATTERN}",
                    self.tenant.app_id
                ),
            });
        }

        if self.dashboard.service_due_months == 0 {
            return Err(Error::ConfigValidation {
                message: "service_due_months must be greater than 0".to_string(),
            });
        }

        if let Some(path) = &self.seed.fixtures_path {
            if path.as_os_str().is_empty() {
                return Err(Error::ConfigValidation {
                    message: "fixtures_path must not be empty".to_string(),
                });
            }
        }

        Ok(())
    }

    /// Parse the injected backend configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigInvalid`] if the backend configuration is
    /// missing or malformed.
    pub fn backend_config(&self) -> Result<BackendConfig> {
        BackendConfig::parse(&self.backend.config)
    }

    /// Get the bootstrap auth token, treating a blank token as absent.
    #[must_use]
    pub fn auth_token(&self) -> Option<&str> {
        self.backend
            .auth_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

fn id_regex() -> Result<Regex> {
    Regex::new(APP_ID_PATTERN).map_err(|e| Error::internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.backend.config, "{}");
        assert!(config.backend.auth_token.is_none());
        assert_eq!(config.tenant.app_id, DEFAULT_APP_ID);
        assert_eq!(config.store.array_union, ArrayUnionMode::ValueEquality);
        assert!(config.seed.enabled);
        assert!(config.seed.fixtures_path.is_none());
        assert_eq!(config.dashboard.service_due_months, 2);
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_path_separator_in_app_id() {
        let mut config = Config::default();
        config.tenant.app_id = "tenant/../other".to_string();

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("app_id"));
    }

    #[test]
    fn test_validate_rejects_empty_app_id() {
        let mut config = Config::default();
        config.tenant.app_id = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_service_window() {
        let mut config = Config::default();
        config.dashboard.service_due_months = 0;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("service_due_months"));
    }

    #[test]
    fn test_default_backend_config_is_invalid() {
        let err = Config::default().backend_config().unwrap_err();
        assert!(matches!(err, Error::ConfigInvalid { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_backend_config_parse() {
        let config =
            BackendConfig::parse(r#"{"projectId": "fleet", "apiKey": "ignored"}"#).unwrap();
        assert_eq!(config.project_id, "fleet");
        assert!(config.database_path.is_none());
        assert!(!config.in_memory);
    }

    #[test]
    fn test_backend_config_parse_rejects_bad_input() {
        for raw in ["", "   ", "not json", "[1, 2]", "{}", r#"{"projectId": ""}"#, r#"{"apiKey": "k"}"#]
        {
            let result = BackendConfig::parse(raw);
            assert!(
                matches!(result, Err(Error::ConfigInvalid { .. })),
                "expected ConfigInvalid for {raw:?}"
            );
        }
    }

    #[test]
    fn test_backend_config_rejects_project_id_outside_data_dir() {
        for raw in [
            r#"{"projectId": "../escape"}"#,
            r#"{"projectId": "/etc/fleet"}"#,
            r#"{"projectId": "a b"}"#,
        ] {
            let err = BackendConfig::parse(raw).unwrap_err();
            assert!(matches!(err, Error::ConfigInvalid { .. }), "{raw}");
        }

        let backend = BackendConfig::parse(r#"{"projectId": "fleet.prod-1"}"#).unwrap();
        assert_eq!(
            backend.database_path(),
            Config::default_data_dir().join("fleet.prod-1.db")
        );
    }

    #[test]
    fn test_backend_database_path_default() {
        let config = BackendConfig::parse(r#"{"projectId": "fleet"}"#).unwrap();
        let path = config.database_path();
        assert!(path.to_string_lossy().contains("fleethub"));
        assert!(path.to_string_lossy().ends_with("fleet.db"));
    }

    #[test]
    fn test_backend_database_path_custom() {
        let config =
            BackendConfig::parse(r#"{"projectId": "fleet", "databasePath": "/tmp/x.db"}"#)
                .unwrap();
        assert_eq!(config.database_path(), PathBuf::from("/tmp/x.db"));
    }

    #[test]
    fn test_auth_token_blank_is_absent() {
        let mut config = Config::default();
        assert!(config.auth_token().is_none());

        config.backend.auth_token = Some("   ".to_string());
        assert!(config.auth_token().is_none());

        config.backend.auth_token = Some(" abc ".to_string());
        assert_eq!(config.auth_token(), Some("abc"));
    }

    #[test]
    fn test_default_config_path() {
        let path = Config::default_config_path();
        assert!(path.to_string_lossy().contains("fleethub"));
        assert!(path.to_string_lossy().contains("config.toml"));
    }

    #[test]
    fn test_load_nonexistent_config() {
        let result = Config::load_from(Some(PathBuf::from("/nonexistent/config.toml")));
        assert!(result.is_ok());
    }

    #[test]
    fn test_load_from_toml_file() {
        let path = std::env::temp_dir().join(format!("fleethub_config_{}.toml", std::process::id()));
        std::fs::write(
            &path,
            r#"
            [backend]
            config = '{"projectId": "demo", "inMemory": true}'

            [tenant]
            app_id = "acme"

            [store]
            array_union = "append"

            [seed]
            enabled = false

            [dashboard]
            service_due_months = 3
            "#,
        )
        .unwrap();

        let config = Config::load_from(Some(path.clone())).unwrap();
        assert_eq!(config.tenant.app_id, "acme");
        assert_eq!(config.store.array_union, ArrayUnionMode::Append);
        assert!(config.backend_config().unwrap().in_memory);
        assert!(!config.seed.enabled);
        assert_eq!(config.dashboard.service_due_months, 3);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_config_serialize() {
        let json = serde_json::to_string(&Config::default()).unwrap();
        assert!(json.contains("app_id"));
        assert!(json.contains("value_equality"));
    }
}
