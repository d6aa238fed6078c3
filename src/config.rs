use std::env::{self, VarError};
use thiserror::Error;

pub const DATABASE_URL_VAR: &str = "PROGRESSION_DATABASE_URL";
pub const MAX_CONNECTIONS_VAR: &str = "PROGRESSION_DB_MAX_CONNECTIONS";

const DEFAULT_DATABASE_URL: &str = "sqlite://progression.db?mode=rwc";
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
  #[error("Invalid value for {key}: {value}")]
  InvalidConfig { key: &'static str, value: String },
}

/// Where the engine keeps its strategies, counters, and log
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
  pub database_url: String,
  pub max_connections: u32,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      database_url: DEFAULT_DATABASE_URL.to_string(),
      max_connections: DEFAULT_MAX_CONNECTIONS,
    }
  }
}

impl EngineConfig {
  /// Read a `.env` file if one exists, then the process environment
  pub fn load() -> Result<Self, ConfigError> {
    dotenvy::dotenv().ok();
    Self::from_env()
  }

  /// Unset variables fall back to defaults; set but unusable ones are errors
  pub fn from_env() -> Result<Self, ConfigError> {
    let defaults = Self::default();

    let database_url = match read_var(DATABASE_URL_VAR)? {
      Some(url) if url.trim().is_empty() => {
        return Err(ConfigError::InvalidConfig {
          key: DATABASE_URL_VAR,
          value: url,
        })
      }
      Some(url) => url,
      None => defaults.database_url,
    };

    let max_connections = match read_var(MAX_CONNECTIONS_VAR)? {
      Some(raw) => match raw.trim().parse::<u32>() {
        Ok(n) if n >= 1 => n,
        _ => {
          return Err(ConfigError::InvalidConfig {
            key: MAX_CONNECTIONS_VAR,
            value: raw,
          })
        }
      },
      None => defaults.max_connections,
    };

    Ok(Self {
      database_url,
      max_connections,
    })
  }
}

fn read_var(key: &'static str) -> Result<Option<String>, ConfigError> {
  match env::var(key) {
    Ok(value) => Ok(Some(value)),
    Err(VarError::NotPresent) => Ok(None),
    Err(VarError::NotUnicode(raw)) => Err(ConfigError::InvalidConfig {
      key,
      value: raw.to_string_lossy().into_owned(),
    }),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serial_test::serial;

  #[test]
  #[serial]
  fn test_defaults_when_unset() {
    temp_env::with_vars_unset([DATABASE_URL_VAR, MAX_CONNECTIONS_VAR], || {
      let config = EngineConfig::from_env().unwrap();
      assert_eq!(config, EngineConfig::default());
      assert_eq!(config.database_url, "sqlite://progression.db?mode=rwc");
      assert_eq!(config.max_connections, 5);
    });
  }

  #[test]
  #[serial]
  fn test_reads_overrides() {
    temp_env::with_vars(
      [
        (DATABASE_URL_VAR, Some("sqlite::memory:")),
        (MAX_CONNECTIONS_VAR, Some("2")),
      ],
      || {
        let config = EngineConfig::from_env().unwrap();
        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.max_connections, 2);
      },
    );
  }

  #[test]
  #[serial]
  fn test_rejects_zero_connections() {
    temp_env::with_vars(
      [(DATABASE_URL_VAR, None), (MAX_CONNECTIONS_VAR, Some("0"))],
      || {
        let err = EngineConfig::from_env().unwrap_err();
        assert_eq!(
          err,
          ConfigError::InvalidConfig {
            key: MAX_CONNECTIONS_VAR,
            value: "0".into()
          }
        );
      },
    );
  }

  #[test]
  #[serial]
  fn test_rejects_unparseable_connections() {
    temp_env::with_var(MAX_CONNECTIONS_VAR, Some("lots"), || {
      assert!(EngineConfig::from_env().is_err());
    });
  }

  #[test]
  #[serial]
  fn test_rejects_blank_database_url() {
    temp_env::with_vars(
      [(DATABASE_URL_VAR, Some("  ")), (MAX_CONNECTIONS_VAR, None)],
      || {
        let err = EngineConfig::from_env().unwrap_err();
        assert!(err.to_string().contains(DATABASE_URL_VAR));
      },
    );
  }
}
