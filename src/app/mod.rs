pub mod config;
mod error;
mod logging;
pub mod protocol;
pub mod registry;
pub mod runtime;
pub mod services;
pub mod stats;

pub use error::AppError;

pub fn run() -> Result<(), AppError> {
    logging::init()?;

    let config = config::AppConfig::from_env()?;

    tracing::info!(
        db_path = %config.db_path,
        http_bind = %config.http_bind,
        primary_container = %config.primary_container,
        companion_image = ?config.companion.as_ref().map(|companion| companion.image_name.as_str()),
        dispatch_delta = config.dispatch_delta,
        token_ttl_secs = config.token_ttl_secs,
        status_request_interval_secs = config.status_request_interval_secs,
        "application bootstrap initialized"
    );

    runtime::run(config)
}

/// One-shot working time refresh over every registered device.
pub fn run_stats_refresh() -> Result<(), AppError> {
    logging::init()?;

    let config = config::AppConfig::from_env()?;
    runtime::refresh_once(&config)
}
