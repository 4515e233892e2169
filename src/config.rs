//! Configuration file structures for the Salus poller.
//!
//! The configuration is split into two sections: the Salus account and the
//! gateway settings.
//!
//! # Configuration File Format
//!
//! ```yaml
//! # Salus account
//! account:
//!   # Email used to log in the Salus application
//!   username: "me@example.com"
//!   # Account password
//!   password: "secret-password"
//!   # Identifier of the thermostat, shown in the Salus application
//!   device_id: "12345"
//!
//! # Gateway settings, every field is optional
//! gateway:
//!   # `api` (mobile application API) or `web` (legacy web portal)
//!   backend: api
//!   # Polling interval in seconds
//!   polling_interval: 60
//! ```
//!
//! # Environment Variable Overrides
//!
//! Any value can be overridden with a `SALUS_` prefixed environment variable,
//! nested keys are separated by `__`:
//!
//! ```bash
//! export SALUS_ACCOUNT__PASSWORD="secret-from-env"
//! export SALUS_GATEWAY__BACKEND="web"
//! ```

use std::path::Path;

use anyhow::bail;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::Deserialize;

/// Root configuration structure.
#[derive(Deserialize, Debug)]
pub struct Config {
    /// Salus account credentials
    pub account: Account,
    /// Gateway settings
    #[serde(default)]
    pub gateway: Gateway,
}

impl Config {
    /// Loads the configuration from a YAML file, then applies the `SALUS_`
    /// environment overrides.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the YAML configuration file.
    ///
    /// # Errors
    ///
    /// Fails if the file does not exist, is not valid YAML, a mandatory field
    /// is missing or the polling interval is zero.
    pub fn load(path: &str) -> Result<Config, anyhow::Error> {
        if !Path::new(path).exists() {
            bail!("config file {} does not exist", path);
        }

        let config: Config = Figment::new()
            .merge(Yaml::file(path))
            .merge(Env::prefixed("SALUS_").split("__"))
            .extract()?;

        if config.gateway.polling_interval == 0 {
            bail!("gateway.polling_interval must be greater than 0");
        }

        Ok(config)
    }
}

/// Salus account configuration.
#[derive(Deserialize)]
pub struct Account {
    /// Email used to log in the Salus application.
    pub username: String,

    /// Account password.
    ///
    /// The mobile application API only receives its MD5 digest, the web
    /// portal receives it as is.
    pub password: String,

    /// Identifier of the thermostat.
    pub device_id: String,
}

impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Account")
            .field("username", &self.username)
            .field("password", &"***")
            .field("device_id", &self.device_id)
            .finish()
    }
}

/// Backend used to reach the thermostat.
#[derive(Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Arrayent service used by the mobile application
    #[default]
    Api,
    /// Legacy salus-it500.com web portal
    Web,
}

/// Gateway settings.
#[derive(Deserialize, Debug)]
pub struct Gateway {
    /// Backend used to reach the thermostat.
    #[serde(default)]
    pub backend: Backend,

    /// Polling interval in seconds.
    #[serde(default = "default_polling_interval")]
    pub polling_interval: u64,

    /// Overrides the base url of the mobile application API.
    #[serde(default)]
    pub api_url: Option<String>,

    /// Overrides the base url of the web portal.
    #[serde(default)]
    pub web_url: Option<String>,
}

fn default_polling_interval() -> u64 {
    60
}

impl Default for Gateway {
    fn default() -> Self {
        Gateway {
            backend: Backend::default(),
            polling_interval: default_polling_interval(),
            api_url: None,
            web_url: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use serial_test::serial;
    use tempfile::NamedTempFile;

    use super::*;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    #[serial]
    fn test_load_full_config() {
        let file = write_config(
            r#"
account:
  username: "me@example.com"
  password: "secret"
  device_id: "12345"
gateway:
  backend: web
  polling_interval: 120
  web_url: "http://localhost:8080"
"#,
        );

        let config = Config::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.account.username, "me@example.com");
        assert_eq!(config.account.password, "secret");
        assert_eq!(config.account.device_id, "12345");
        assert_eq!(config.gateway.backend, Backend::Web);
        assert_eq!(config.gateway.polling_interval, 120);
        assert_eq!(config.gateway.api_url, None);
        assert_eq!(
            config.gateway.web_url.as_deref(),
            Some("http://localhost:8080")
        );
    }

    #[test]
    #[serial]
    fn test_load_defaults() {
        let file = write_config(
            r#"
account:
  username: "me@example.com"
  password: "secret"
  device_id: "12345"
"#,
        );

        let config = Config::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.gateway.backend, Backend::Api);
        assert_eq!(config.gateway.polling_interval, 60);
    }

    #[test]
    #[serial]
    fn test_load_env_override() {
        let file = write_config(
            r#"
account:
  username: "me@example.com"
  password: "from-file"
  device_id: "12345"
"#,
        );

        // SAFETY: tests touching the environment are serialized
        unsafe {
            std::env::set_var("SALUS_ACCOUNT__PASSWORD", "from-env");
            std::env::set_var("SALUS_GATEWAY__POLLING_INTERVAL", "30");
        }
        let config = Config::load(file.path().to_str().unwrap());
        unsafe {
            std::env::remove_var("SALUS_ACCOUNT__PASSWORD");
            std::env::remove_var("SALUS_GATEWAY__POLLING_INTERVAL");
        }

        let config = config.unwrap();
        assert_eq!(config.account.password, "from-env");
        assert_eq!(config.gateway.polling_interval, 30);
    }

    #[test]
    #[serial]
    fn test_load_missing_field() {
        let file = write_config(
            r#"
account:
  username: "me@example.com"
"#,
        );

        assert!(Config::load(file.path().to_str().unwrap()).is_err());
    }

    #[test]
    #[serial]
    fn test_load_zero_polling_interval() {
        let file = write_config(
            r#"
account:
  username: "me@example.com"
  password: "secret"
  device_id: "12345"
gateway:
  polling_interval: 0
"#,
        );

        let error = Config::load(file.path().to_str().unwrap()).unwrap_err();
        assert!(error.to_string().contains("polling_interval"));
    }

    #[test]
    fn test_load_missing_file() {
        let error = Config::load("/nonexistent/salus.yaml").unwrap_err();
        assert!(error.to_string().contains("does not exist"));
    }

    #[test]
    fn test_account_debug_hides_password() {
        let account = Account {
            username: "me@example.com".to_string(),
            password: "secret".to_string(),
            device_id: "12345".to_string(),
        };

        let debug = format!("{:?}", account);
        assert!(debug.contains("me@example.com"));
        assert!(!debug.contains("secret"));
    }
}
