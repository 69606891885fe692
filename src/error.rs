use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config error: {0}")]
    Config(#[from] serde_yaml::Error),
    #[error("database error: {0}")]
    Sql(#[from] mysql::Error),
    #[error("port {0} out of range (1024..=65535)")]
    InvalidPort(u16),
}

pub type Result<T> = std::result::Result<T, ServerError>;
