use std::path::PathBuf;
use std::time::Duration;

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use secrecy::SecretString;
use serde::Deserialize;

use crate::CLIENT_NAME;

const CONFIG_NAME: &str = "config.toml";
const ENV_PREFIX: &str = "BANKLINK";
const DEFAULT_TENANT: &str = "default";
const DEFAULT_REDIRECT_URL: &str = "http://localhost:4545/callback";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub db_file: String,
    pub tenant: String,
    pub redirect_url: String,
    #[serde(default)]
    pub gocardless: Option<GoCardless>,
}

#[derive(Debug, Deserialize)]
pub struct GoCardless {
    pub secret_id: String,
    pub secret_key: SecretString,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Settings {
    /// Defaults, then the config file, then `BANKLINK_*` variables. Only an
    /// explicitly passed config file has to exist.
    pub fn new(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let file = match config_path {
            Some(path) => File::with_name(path),
            None => File::with_name(&default_config_path()).required(false),
        };

        defaults()?
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()
    }

    /// Client for the aggregator, or `None` when no credentials are set.
    pub fn provider(&self) -> Result<Option<gocardless::Client>, gocardless::Error> {
        let conf = match &self.gocardless {
            Some(conf) => conf,
            None => return Ok(None),
        };

        gocardless::Builder::new()
            .with_credentials(gocardless::Credentials {
                secret_id: conf.secret_id.clone(),
                secret_key: conf.secret_key.clone(),
            })
            .with_base_url(conf.base_url.as_str())
            .with_timeout(Duration::from_secs(conf.timeout_secs))
            .build()
            .map(Some)
    }

    pub fn db_url(&self) -> String {
        if self.db_file.starts_with("sqlite:") {
            self.db_file.clone()
        } else {
            format!("sqlite://{}", self.db_file)
        }
    }
}

fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Config::builder()
        .set_default("db_file", default_data_path())?
        .set_default("tenant", DEFAULT_TENANT)?
        .set_default("redirect_url", DEFAULT_REDIRECT_URL)
}

fn default_base_url() -> String {
    gocardless::BASE_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn base_dir(dir: Option<PathBuf>) -> PathBuf {
    dir.or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(std::env::temp_dir)
        .join(CLIENT_NAME)
}

fn default_data_path() -> String {
    base_dir(dirs::data_dir())
        .join(format!("{}.db", CLIENT_NAME))
        .display()
        .to_string()
}

pub(crate) fn default_config_path() -> String {
    base_dir(dirs::config_dir())
        .join(CONFIG_NAME)
        .display()
        .to_string()
}
