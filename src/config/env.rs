//! Environment variable configuration module.
//!
//! Loads `.env` once per process and builds the validated [`AppConfig`]
//! for the selected [`Environment`].

use std::env;
use std::fmt;
use std::str::FromStr;
use std::sync::Once;

use serde::Serialize;
use url::Url;
use validator::Validate;

use crate::error::{AppError, AppResult};

static INIT: Once = Once::new();

/// Loads the .env file once per process.
fn init_env() {
    INIT.call_once(|| {
        if let Err(e) = dotenvy::dotenv() {
            tracing::debug!(".env file not loaded: {}", e);
        }
    });
}

/// Retrieves an environment variable, loading `.env` on first use.
/// Unset and non-UTF-8 variables are `None`.
pub fn get_env(key: &str) -> Option<String> {
    init_env();
    env::var(key).ok()
}

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Dev,
    Test,
    Prod,
}

impl Environment {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Dev => "dev",
            Self::Test => "test",
            Self::Prod => "prod",
        }
    }

    pub const fn is_production(self) -> bool {
        matches!(self, Self::Prod)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dev" => Ok(Self::Dev),
            "test" => Ok(Self::Test),
            "prod" => Ok(Self::Prod),
            other => Err(AppError::Config(format!(
                "Unknown environment '{other}' (expected dev, test or prod)"
            ))),
        }
    }
}

const DEFAULT_MAX_WORKERS: usize = 4;
const DEFAULT_CHARSET: &str = "utf8mb4";

/// Application configuration.
#[derive(Debug, Clone, Validate, Serialize)]
pub struct AppConfig {
    pub env: Environment,

    #[serde(skip)]
    #[validate(length(min = 1, message = "database URL must not be empty"))]
    pub db_url: String,

    pub debug: bool,

    pub log_level: String,

    #[validate(range(min = 1, message = "MAX_WORKERS must be at least 1"))]
    pub max_workers: usize,
}

impl AppConfig {
    /// Builds the configuration for `env` from an arbitrary key lookup.
    pub fn from_lookup<F>(env: Environment, lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let (db_url, debug, log_level) = match env {
            Environment::Dev => {
                let port = match lookup("DB_PORT") {
                    Some(raw) => raw.trim().parse::<u16>().map_err(|_| {
                        AppError::Config(format!("DB_PORT must be a port number, got '{raw}'"))
                    })?,
                    None => 3306,
                };
                let url = build_db_url(
                    &lookup("DB_USER").unwrap_or_else(|| "root".to_string()),
                    &lookup("DB_PASSWORD").unwrap_or_default(),
                    &lookup("DB_HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
                    &lookup("DB_NAME").unwrap_or_else(|| "Microsys4S360".to_string()),
                    port,
                    DEFAULT_CHARSET,
                )?;
                (url, true, "DEBUG".to_string())
            }
            Environment::Test => {
                let url = lookup("TEST_DB_URL").ok_or_else(|| {
                    AppError::Config("TEST_DB_URL is required in the test environment".to_string())
                })?;
                (url, true, "DEBUG".to_string())
            }
            Environment::Prod => {
                let url = lookup("DB_URL").ok_or_else(|| {
                    AppError::Config("DB_URL is required in the prod environment".to_string())
                })?;
                let level = lookup("LOG_LEVEL").unwrap_or_else(|| "INFO".to_string());
                (url, false, level)
            }
        };

        let max_workers = match lookup("MAX_WORKERS") {
            Some(raw) => raw.trim().parse::<usize>().map_err(|_| {
                AppError::Config(format!("MAX_WORKERS must be an integer, got '{raw}'"))
            })?,
            None => DEFAULT_MAX_WORKERS,
        };

        let config = Self {
            env,
            db_url,
            debug,
            log_level,
            max_workers,
        };
        config.validate()?;
        Ok(config)
    }

    /// Builds the configuration for `env` from the process environment.
    pub fn from_env(environment: Environment) -> AppResult<Self> {
        Self::from_lookup(environment, get_env)
    }
}

/// Loads the configuration for `env`, logging the outcome.
pub fn load_config(env: Environment) -> AppResult<AppConfig> {
    let config = AppConfig::from_env(env)?;
    tracing::info!(
        env = %config.env,
        debug = config.debug,
        max_workers = config.max_workers,
        "Configuration loaded"
    );
    Ok(config)
}

/// Builds a MySQL connection URL. The credentials and the database name
/// are percent-encoded so that reserved characters survive parsing.
pub fn build_db_url(
    user: &str,
    password: &str,
    host: &str,
    db: &str,
    port: u16,
    charset: &str,
) -> AppResult<String> {
    for (field, value) in [("user", user), ("host", host), ("database", db)] {
        if value.is_empty() {
            return Err(AppError::Config(format!("Database {field} must not be empty")));
        }
    }

    let mut url = Url::parse(&format!("mysql://{host}:{port}"))
        .map_err(|e| AppError::Config(format!("Invalid database host '{host}': {e}")))?;
    url.set_username(user)
        .and_then(|()| url.set_password(Some(password)))
        .map_err(|()| AppError::Config(format!("Cannot set credentials on '{host}'")))?;
    url.set_path(&format!("/{db}"));
    url.query_pairs_mut().append_pair("charset", charset);

    Ok(url.into())
}
