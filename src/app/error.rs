use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("failed to initialize logging: {0}")]
    LoggingInit(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("failed to prepare database: {0}")]
    Database(String),
    #[error("http server failed: {0}")]
    Server(String),
    #[error("background worker failed: {0}")]
    Worker(String),
    #[error("working time refresh failed: {0}")]
    StatsRefresh(String),
}

impl AppError {
    pub fn logging_init<E: std::fmt::Display>(error: E) -> Self {
        Self::LoggingInit(error.to_string())
    }

    pub fn config<E: std::fmt::Display>(error: E) -> Self {
        Self::Config(error.to_string())
    }

    pub fn database<E: std::fmt::Display>(error: E) -> Self {
        Self::Database(error.to_string())
    }

    pub fn server<E: std::fmt::Display>(error: E) -> Self {
        Self::Server(error.to_string())
    }

    pub fn worker<E: std::fmt::Display>(error: E) -> Self {
        Self::Worker(error.to_string())
    }

    pub fn stats_refresh<E: std::fmt::Display>(error: E) -> Self {
        Self::StatsRefresh(error.to_string())
    }
}
