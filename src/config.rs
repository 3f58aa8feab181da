//! Runtime configuration for the opensprint server.
//!
//! Values come from environment variables (see `Config::from_env`) and can be overridden with the
//! `with_*` builders, which is how tests assemble a config without touching the process environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

pub const MIN_JWT_SECRET_LEN: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("JWT_SECRET is required")]
    MissingJwtSecret,

    #[error("JWT secret must be at least 32 characters")]
    JwtSecretTooShort,

    #[error("invalid value for {key}: '{value}'")]
    InvalidValue { key: String, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
            Environment::Test => "test",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Some(Environment::Development),
            "production" | "prod" => Some(Environment::Production),
            "test" => Some(Environment::Test),
            _ => None,
        }
    }
}

/// Reserved credentials and display data for the demo identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemoSettings {
    pub username: String,
    pub password: String,
    pub user_name: String,
    pub user_email: String,
}

impl Default for DemoSettings {
    fn default() -> Self {
        Self {
            username: "demo".into(),
            password: "demo".into(),
            user_name: "Demo User".into(),
            user_email: "demo@opensprint.io".into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub environment: Environment,
    pub jwt_secret: String,
    /// Demo mode switch; the settings are kept either way so `/config` can stay silent about them.
    pub demo_mode: bool,
    pub demo: DemoSettings,
    /// Requests allowed per client address per window (production only).
    pub rate_limit_max: u32,
    pub rate_limit_window: Duration,
    /// When set, the store snapshots to `<data_dir>/opensprint.json`.
    pub data_dir: Option<PathBuf>,
    pub log_level: String,
}

impl Config {
    /// Config with defaults for everything but the secret.
    pub fn new(jwt_secret: impl Into<String>) -> Self {
        Self {
            port: 3001,
            environment: Environment::Development,
            jwt_secret: jwt_secret.into(),
            demo_mode: false,
            demo: DemoSettings::default(),
            rate_limit_max: 1000,
            rate_limit_window: Duration::from_secs(15 * 60),
            data_dir: None,
            log_level: "info".into(),
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; `from_env` passes `std::env::var`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let secret = lookup("JWT_SECRET").filter(|s| !s.is_empty()).ok_or(ConfigError::MissingJwtSecret)?;
        let mut cfg = Config::new(secret);

        if let Some(v) = lookup("PORT") {
            cfg.port = parse_value("PORT", &v)?;
        }
        if let Some(v) = lookup("APP_ENV") {
            cfg.environment = Environment::parse(&v).ok_or_else(|| invalid("APP_ENV", &v))?;
        }
        if let Some(v) = lookup("DEMO_MODE") {
            cfg.demo_mode = parse_bool("DEMO_MODE", &v)?;
        }
        if let Some(v) = lookup("DEMO_USERNAME") { cfg.demo.username = v; }
        if let Some(v) = lookup("DEMO_PASSWORD") { cfg.demo.password = v; }
        if let Some(v) = lookup("DEMO_USER_NAME") { cfg.demo.user_name = v; }
        if let Some(v) = lookup("DEMO_USER_EMAIL") { cfg.demo.user_email = v; }
        if let Some(v) = lookup("RATE_LIMIT_MAX") {
            cfg.rate_limit_max = parse_value("RATE_LIMIT_MAX", &v)?;
        }
        if let Some(v) = lookup("DATA_DIR").filter(|s| !s.trim().is_empty()) {
            cfg.data_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("LOG_LEVEL") {
            match v.as_str() {
                "debug" | "info" | "warn" | "error" | "trace" => cfg.log_level = v,
                _ => return Err(invalid("LOG_LEVEL", &v)),
            }
        }
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt_secret.len() < MIN_JWT_SECRET_LEN {
            return Err(ConfigError::JwtSecretTooShort);
        }
        Ok(())
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_environment(mut self, env: Environment) -> Self {
        self.environment = env;
        self
    }

    pub fn with_demo_mode(mut self, on: bool) -> Self {
        self.demo_mode = on;
        self
    }

    pub fn with_demo_settings(mut self, demo: DemoSettings) -> Self {
        self.demo = demo;
        self
    }

    pub fn with_rate_limit(mut self, max: u32, window: Duration) -> Self {
        self.rate_limit_max = max;
        self.rate_limit_window = window;
        self
    }

    pub fn with_data_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.data_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn is_production(&self) -> bool { self.environment == Environment::Production }
    pub fn is_development(&self) -> bool { self.environment == Environment::Development }

    pub fn snapshot_path(&self) -> Option<PathBuf> {
        self.data_dir.as_ref().map(|d| d.join("opensprint.json"))
    }
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue { key: key.to_string(), value: value.to_string() }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| invalid(key, value))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(invalid(key, value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k: &str| map.get(k).cloned()
    }

    #[test]
    fn defaults_apply_when_only_secret_is_set() {
        let cfg = Config::from_lookup(lookup(&[("JWT_SECRET", SECRET)])).unwrap();
        assert_eq!(cfg.port, 3001);
        assert_eq!(cfg.environment, Environment::Development);
        assert!(!cfg.demo_mode);
        assert_eq!(cfg.demo, DemoSettings::default());
        assert_eq!(cfg.rate_limit_max, 1000);
        assert_eq!(cfg.rate_limit_window, Duration::from_secs(900));
        assert!(cfg.snapshot_path().is_none());
    }

    #[test]
    fn secret_is_required_and_must_be_long_enough() {
        assert_eq!(Config::from_lookup(lookup(&[])).unwrap_err(), ConfigError::MissingJwtSecret);
        assert_eq!(
            Config::from_lookup(lookup(&[("JWT_SECRET", "short")])).unwrap_err(),
            ConfigError::JwtSecretTooShort
        );
    }

    #[test]
    fn overrides_are_parsed() {
        let cfg = Config::from_lookup(lookup(&[
            ("JWT_SECRET", SECRET),
            ("PORT", "8080"),
            ("APP_ENV", "production"),
            ("DEMO_MODE", "true"),
            ("DEMO_USER_EMAIL", "guest@example.com"),
            ("RATE_LIMIT_MAX", "5"),
            ("DATA_DIR", "/var/lib/opensprint"),
        ]))
        .unwrap();
        assert_eq!(cfg.port, 8080);
        assert!(cfg.is_production());
        assert!(cfg.demo_mode);
        assert_eq!(cfg.demo.user_email, "guest@example.com");
        assert_eq!(cfg.rate_limit_max, 5);
        assert_eq!(cfg.snapshot_path().unwrap(), PathBuf::from("/var/lib/opensprint/opensprint.json"));
    }

    #[test]
    fn bad_values_are_rejected() {
        let err = Config::from_lookup(lookup(&[("JWT_SECRET", SECRET), ("PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "PORT"));
        let err = Config::from_lookup(lookup(&[("JWT_SECRET", SECRET), ("APP_ENV", "staging")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "APP_ENV"));
        let err = Config::from_lookup(lookup(&[("JWT_SECRET", SECRET), ("DEMO_MODE", "maybe")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "DEMO_MODE"));
    }
}
