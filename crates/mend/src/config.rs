//! Connection settings, read from the environment.
//!
//! | Variable             | Default  |
//! |----------------------|----------|
//! | `DATABASE_URL`       | required |
//! | `DATABASE_SCHEMA`    | `public` |
//! | `DATABASE_POOL_SIZE` | `4`      |
//! | `MEND_RECONCILE`     | `true`   |
//!
//! A `.env` file in the working directory is loaded first, if present.

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} has invalid value {value:?}: expected {expected}")]
    Invalid {
        name: &'static str,
        value: String,
        expected: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Postgres connection string
    pub database_url: String,
    /// Namespace the reconciled tables live in
    pub namespace: String,
    /// Maximum number of pooled connections
    pub pool_size: usize,
    /// Whether handles are reconciled when acquired
    pub reconcile_on_acquire: bool,
}

impl Config {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            namespace: "public".to_string(),
            pool_size: 4,
            reconcile_on_acquire: true,
        }
    }

    /// Load `.env`, then read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a config from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let database_url = lookup("DATABASE_URL")
            .filter(|url| !url.trim().is_empty())
            .ok_or(ConfigError::Missing("DATABASE_URL"))?;
        let mut config = Config::new(database_url);

        if let Some(namespace) = lookup("DATABASE_SCHEMA").filter(|s| !s.trim().is_empty()) {
            config.namespace = namespace;
        }

        if let Some(size) = lookup("DATABASE_POOL_SIZE") {
            config.pool_size = size
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or(ConfigError::Invalid {
                    name: "DATABASE_POOL_SIZE",
                    value: size.clone(),
                    expected: "a positive integer",
                })?;
        }

        if let Some(flag) = lookup("MEND_RECONCILE") {
            config.reconcile_on_acquire = match flag.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => {
                    return Err(ConfigError::Invalid {
                        name: "MEND_RECONCILE",
                        value: flag,
                        expected: "true or false",
                    });
                }
            };
        }

        Ok(config)
    }
}
