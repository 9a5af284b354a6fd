use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigValidationError {
    #[error("TCP configuration error: {0}")]
    Tcp(String),

    #[error("RTU configuration error: {0}")]
    Rtu(String),

    #[error("ASCII configuration error: {0}")]
    Ascii(String),

    #[error("master configuration error: {0}")]
    Master(String),

    #[error("logging configuration error: {0}")]
    Logging(String),

    #[error("configuration source error: {0}")]
    Source(String),
}

impl ConfigValidationError {
    pub fn tcp(details: impl Into<String>) -> Self {
        Self::Tcp(details.into())
    }

    pub fn rtu(details: impl Into<String>) -> Self {
        Self::Rtu(details.into())
    }

    pub fn ascii(details: impl Into<String>) -> Self {
        Self::Ascii(details.into())
    }

    pub fn master(details: impl Into<String>) -> Self {
        Self::Master(details.into())
    }

    pub fn logging(details: impl Into<String>) -> Self {
        Self::Logging(details.into())
    }
}

impl From<config::ConfigError> for ConfigValidationError {
    fn from(err: config::ConfigError) -> Self {
        Self::Source(err.to_string())
    }
}
