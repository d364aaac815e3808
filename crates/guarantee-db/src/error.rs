use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Mend(#[from] mend::Error),

    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("invalid schema: {0}")]
    Schema(#[from] mend::SchemaError),

    #[error("configuration error: {0}")]
    Config(#[from] mend::config::ConfigError),

    #[error("guarantee number {0} already exists")]
    DuplicateNumber(String),

    #[error("guarantee {0} not found")]
    NotFound(String),

    #[error("no free anti-fake code after {0} attempts")]
    NoFreeCode(usize),

    #[error("missing required field: {0}")]
    MissingField(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;
