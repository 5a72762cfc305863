use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("Unknown storage backend: {0} (expected file, keyring or memory)")]
    UnknownBackend(String),
}

/// Where the token record is persisted
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    File,
    Keyring,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "file" => Ok(StorageBackend::File),
            "keyring" => Ok(StorageBackend::Keyring),
            "memory" => Ok(StorageBackend::Memory),
            other => Err(ConfigError::UnknownBackend(other.to_string())),
        }
    }
}

/// Identity provider, identity pool and handoff table settings
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    pub region: String,
    pub user_pool_id: String,
    pub client_id: String,
    pub identity_pool_id: String,
    pub sessions_table: String,
    pub auth_codes_table: String,
    pub storage: StorageBackend,
    /// Directory for the file backend
    pub data_dir: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            user_pool_id: String::new(),
            client_id: String::new(),
            identity_pool_id: String::new(),
            sessions_table: "fount-oauth2-sessions".to_string(),
            auth_codes_table: "fount-auth-codes".to_string(),
            storage: StorageBackend::File,
            data_dir: PathBuf::from(".fount-auth"),
        }
    }
}

impl AppConfig {
    /// Defaults, overlaid by `path` when given, overlaid by the process environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        let env: HashMap<String, String> = std::env::vars().collect();
        config.apply_env(&env)?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Apply `FOUNT_*` overrides; empty values are ignored
    pub fn apply_env(&mut self, env: &HashMap<String, String>) -> Result<(), ConfigError> {
        let lookup = |name: &str| env.get(name).filter(|v| !v.is_empty()).cloned();

        if let Some(v) = lookup("FOUNT_COGNITO_REGION") {
            self.region = v;
        }
        if let Some(v) = lookup("FOUNT_COGNITO_USER_POOL_ID") {
            self.user_pool_id = v;
        }
        if let Some(v) = lookup("FOUNT_COGNITO_CLIENT_ID") {
            self.client_id = v;
        }
        if let Some(v) = lookup("FOUNT_IDENTITY_POOL_ID") {
            self.identity_pool_id = v;
        }
        if let Some(v) = lookup("FOUNT_OAUTH2_SESSIONS_TABLE") {
            self.sessions_table = v;
        }
        if let Some(v) = lookup("FOUNT_AUTH_CODES_TABLE") {
            self.auth_codes_table = v;
        }
        if let Some(v) = lookup("FOUNT_TOKEN_STORAGE") {
            self.storage = v.parse()?;
        }
        if let Some(v) = lookup("FOUNT_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        Ok(())
    }

    /// Issuer key under which ID tokens are presented to the identity pool
    pub fn login_provider(&self) -> String {
        format!("cognito-idp.{}.amazonaws.com/{}", self.region, self.user_pool_id)
    }

    /// Human-readable problems that disable parts of the system
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.user_pool_id.is_empty() || self.client_id.is_empty() {
            warnings.push(
                "Identity provider configuration is incomplete: set FOUNT_COGNITO_USER_POOL_ID \
                 and FOUNT_COGNITO_CLIENT_ID"
                    .to_string(),
            );
        }
        if self.identity_pool_id.is_empty() {
            warnings.push(
                "Desktop sign-in is disabled: set FOUNT_IDENTITY_POOL_ID".to_string(),
            );
        }
        warnings
    }

    pub fn log_warnings(&self) {
        for warning in self.validate() {
            warn!("{}", warning);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.region, "us-east-1");
        assert_eq!(config.sessions_table, "fount-oauth2-sessions");
        assert_eq!(config.auth_codes_table, "fount-auth-codes");
        assert_eq!(config.validate().len(), 2);
    }

    #[test]
    fn test_file_then_env() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"region":"eu-central-1","userPoolId":"eu-central-1_X","clientId":"abc","storage":"keyring"}}"#
        )
        .unwrap();

        let mut config = AppConfig::from_file(file.path()).unwrap();
        assert_eq!(config.region, "eu-central-1");
        assert_eq!(config.storage, StorageBackend::Keyring);
        assert_eq!(config.auth_codes_table, "fount-auth-codes");

        config
            .apply_env(&env(&[
                ("FOUNT_IDENTITY_POOL_ID", "eu-central-1:pool"),
                ("FOUNT_COGNITO_CLIENT_ID", ""),
                ("FOUNT_TOKEN_STORAGE", "memory"),
            ]))
            .unwrap();
        assert_eq!(config.identity_pool_id, "eu-central-1:pool");
        assert_eq!(config.client_id, "abc");
        assert_eq!(config.storage, StorageBackend::Memory);
        assert!(config.validate().is_empty());
        assert_eq!(
            config.login_provider(),
            "cognito-idp.eu-central-1.amazonaws.com/eu-central-1_X"
        );
    }

    #[test]
    fn test_bad_inputs() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "region = 'toml'").unwrap();
        assert!(matches!(
            AppConfig::from_file(file.path()),
            Err(ConfigError::Parse { .. })
        ));

        let mut config = AppConfig::default();
        assert!(matches!(
            config.apply_env(&env(&[("FOUNT_TOKEN_STORAGE", "cookie")])),
            Err(ConfigError::UnknownBackend(_))
        ));
    }
}
