use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    pub database_url: String,
    pub database_max_connections: u32,
    pub database_connect_timeout: Duration,
    pub database_idle_timeout: Duration,
    pub service_api_key: String,
    /// Allowed skew for per-request agent signatures, seconds (inclusive)
    pub signature_timestamp_window: i64,
    pub rate_limit_max: u32,
    pub rate_limit_window: Duration,
    pub log_level: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing environment variable: {0}")]
    MissingVar(String),
    #[error("invalid value for {name}: {value}")]
    InvalidVar { name: String, value: String },
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            host: parsed_var("HOST", IpAddr::V4(Ipv4Addr::UNSPECIFIED))?,
            port: parsed_var("PORT", 8080)?,
            database_url: required_var("DATABASE_URL")?,
            database_max_connections: parsed_var("DATABASE_MAX_CONNECTIONS", 10)?,
            database_connect_timeout: Duration::from_secs(parsed_var(
                "DATABASE_CONNECT_TIMEOUT_SECS",
                30u64,
            )?),
            database_idle_timeout: Duration::from_secs(parsed_var(
                "DATABASE_IDLE_TIMEOUT_SECS",
                600u64,
            )?),
            service_api_key: required_var("SERVICE_API_KEY")?,
            signature_timestamp_window: parsed_var("SIGNATURE_TIMESTAMP_WINDOW", 300)?,
            rate_limit_max: parsed_var("RATE_LIMIT_MAX", 100)?,
            rate_limit_window: Duration::from_secs(parsed_var("RATE_LIMIT_WINDOW_SECS", 60u64)?),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn required_var(name: &str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingVar(name.to_string()))
}

fn parsed_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value.parse().map_err(|_| ConfigError::InvalidVar {
            name: name.to_string(),
            value,
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Env-var tests mutate process state; keep them in one test to avoid
    // interference under the parallel test runner.
    #[test]
    fn from_env_defaults_and_overrides() {
        std::env::set_var("DATABASE_URL", "postgres://localhost/trail");
        std::env::set_var("SERVICE_API_KEY", "secret");
        std::env::remove_var("PORT");
        std::env::remove_var("SIGNATURE_TIMESTAMP_WINDOW");

        let config = Config::from_env().unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.database_max_connections, 10);
        assert_eq!(config.signature_timestamp_window, 300);
        assert_eq!(config.rate_limit_max, 100);
        assert_eq!(config.rate_limit_window, Duration::from_secs(60));

        std::env::set_var("PORT", "9001");
        std::env::set_var("SIGNATURE_TIMESTAMP_WINDOW", "60");
        let config = Config::from_env().unwrap();
        assert_eq!(config.port, 9001);
        assert_eq!(config.signature_timestamp_window, 60);

        std::env::set_var("PORT", "not-a-port");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::InvalidVar { .. })
        ));
        std::env::remove_var("PORT");

        std::env::remove_var("DATABASE_URL");
        assert!(matches!(Config::from_env(), Err(ConfigError::MissingVar(_))));
        std::env::set_var("DATABASE_URL", "postgres://localhost/trail");
    }
}
