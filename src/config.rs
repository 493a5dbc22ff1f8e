use std::{env, fmt::Display, str::FromStr};

use anyhow::{anyhow, Context as _};
use chrono::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub database_max_connections: u32,
    pub cors_origin: String,
    pub session_ttl: Duration,
    pub otp_ttl: Duration,
    pub cookie_secure: bool,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        // A missing .env file is fine; the environment may already be populated.
        dotenv::dotenv().ok();

        Ok(Self {
            port: try_load("PORT", "3000")?,
            database_url: require("DATABASE_URL")?,
            database_max_connections: try_load("DATABASE_MAX_CONNECTIONS", "5")?,
            cors_origin: try_load("CORS_ORIGIN", "http://localhost:3000")?,
            session_ttl: Duration::hours(try_load("SESSION_TTL_HOURS", "168")?),
            otp_ttl: Duration::minutes(try_load("OTP_TTL_MINUTES", "10")?),
            cookie_secure: try_load("COOKIE_SECURE", "false")?,
        })
    }
}

fn require(key: &str) -> anyhow::Result<String> {
    env::var(key).with_context(|| format!("environment variable {key} must be set"))
}

fn try_load<T: FromStr>(key: &str, default: &str) -> anyhow::Result<T>
where
    T::Err: Display,
{
    let raw = env::var(key).unwrap_or_else(|_| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });

    raw.trim().parse().map_err(|e| {
        warn!("Invalid {key} value: {e}");
        anyhow!("invalid value for {key}: {e}")
    })
}

#[cfg(test)]
impl Config {
    pub(crate) fn for_tests() -> Self {
        Self {
            port: 0,
            database_url: "postgres://athlinked@localhost/athlinked_test".into(),
            database_max_connections: 1,
            cors_origin: "http://localhost:3000".into(),
            session_ttl: Duration::hours(1),
            otp_ttl: Duration::minutes(10),
            cookie_secure: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_default_when_unset() {
        let port: u16 = try_load("ATHLINKED_TEST_UNSET_PORT", "4321").unwrap();
        assert_eq!(port, 4321);
    }

    #[test]
    fn parses_present_value() {
        env::set_var("ATHLINKED_TEST_PRESENT_FLAG", " true ");
        let flag: bool = try_load("ATHLINKED_TEST_PRESENT_FLAG", "false").unwrap();
        assert!(flag);
    }

    #[test]
    fn rejects_unparsable_value() {
        env::set_var("ATHLINKED_TEST_BAD_PORT", "not-a-port");
        let port: anyhow::Result<u16> = try_load("ATHLINKED_TEST_BAD_PORT", "3000");
        assert!(port.is_err());
    }

    #[test]
    fn required_variable_must_exist() {
        assert!(require("ATHLINKED_TEST_DEFINITELY_MISSING").is_err());
    }
}
