use anyhow::{Result, anyhow};
use chrono::Duration;
use std::{fmt, str::FromStr};

/// Deployment environment reported by the healthcheck.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Environment {
    pub const VALUES: [&'static str; 3] = ["development", "staging", "production"];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Staging => "staging",
            Self::Production => "production",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "development" => Ok(Self::Development),
            "staging" => Ok(Self::Staging),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "invalid environment '{other}', expected one of: {}",
                Self::VALUES.join(", ")
            )),
        }
    }
}

/// Runtime settings for the HTTP layer.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub environment: Environment,
    /// Lifetime of authentication tokens issued at login.
    pub token_ttl: Duration,
    /// Lifetime of activation tokens issued at registration.
    pub activation_ttl: Duration,
    /// Empty means any origin.
    pub cors_trusted_origins: Vec<String>,
}

impl ApiConfig {
    /// Defaults: development, 24 hour sessions, 3 day activation window.
    #[must_use]
    pub fn new() -> Self {
        Self {
            environment: Environment::Development,
            token_ttl: Duration::hours(24),
            activation_ttl: Duration::days(3),
            cors_trusted_origins: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    /// # Errors
    /// Returns an error if `seconds` is outside the range of a duration.
    pub fn with_token_ttl_seconds(mut self, seconds: i64) -> Result<Self> {
        self.token_ttl = ttl_from_seconds(seconds)?;
        Ok(self)
    }

    /// # Errors
    /// Returns an error if `seconds` is outside the range of a duration.
    pub fn with_activation_ttl_seconds(mut self, seconds: i64) -> Result<Self> {
        self.activation_ttl = ttl_from_seconds(seconds)?;
        Ok(self)
    }

    #[must_use]
    pub fn with_cors_trusted_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_trusted_origins = origins;
        self
    }
}

fn ttl_from_seconds(seconds: i64) -> Result<Duration> {
    Duration::try_seconds(seconds).ok_or_else(|| anyhow!("token lifetime out of range: {seconds}s"))
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self::new()
    }
}
