use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};
use std::time::Duration;

use actix_cors::Cors;
use actix_web::{App, HttpServer, web};
use rusqlite::Connection;

use crate::adapters::api::{ApiState, configure_routes};
use crate::adapters::db::{open_connection, run_migrations};
use crate::adapters::token::TokenService;
use crate::app::config::AppConfig;
use crate::app::error::AppError;
use crate::app::protocol::{DeviceProtocol, ProtocolSettings};
use crate::app::registry::SessionRegistry;
use crate::app::services::SqliteDeviceService;
use crate::app::stats::{WorkingTimeSettings, refresh_all, start_stats_refresher};
use crate::domain::dispatch::DispatchPolicy;
use crate::domain::session_state::{Clock, SystemClock};

pub fn open_database(db_path: &str) -> Result<Connection, AppError> {
    let mut connection = open_connection(db_path).map_err(AppError::database)?;
    run_migrations(&mut connection).map_err(AppError::database)?;
    Ok(connection)
}

pub fn protocol_settings(config: &AppConfig) -> ProtocolSettings {
    ProtocolSettings {
        primary_container: config.primary_container.clone(),
        companion: config.companion.clone(),
        dispatch: DispatchPolicy::new(config.dispatch_delta),
    }
}

pub fn working_time_settings(config: &AppConfig) -> WorkingTimeSettings {
    WorkingTimeSettings {
        container_name: config.primary_container.clone(),
        window_days: config.stats_window_days,
        stale_after_ms: i64::try_from(config.stats_stale_after_secs.saturating_mul(1000))
            .unwrap_or(i64::MAX),
    }
}

/// Wires every shared component around one database connection.
pub fn build_api_state(
    config: &AppConfig,
    connection: Arc<Mutex<Connection>>,
    clock: Arc<dyn Clock + Send + Sync>,
) -> ApiState {
    let devices = SqliteDeviceService::new(connection);
    let tokens = TokenService::new(&config.jwt_secret, config.token_ttl_secs);
    let protocol = DeviceProtocol::new(
        Arc::new(SessionRegistry::new()),
        devices.clone(),
        Arc::new(tokens.clone()),
        Arc::clone(&clock),
        protocol_settings(config),
    );

    ApiState {
        devices,
        tokens,
        protocol: Arc::new(protocol),
        clock,
        working_time: working_time_settings(config),
        status_request_interval: Duration::from_secs(config.status_request_interval_secs),
    }
}

pub fn run(config: AppConfig) -> Result<(), AppError> {
    let connection = open_database(&config.db_path)?;
    let shared_connection = Arc::new(Mutex::new(connection));
    let api_state = build_api_state(&config, Arc::clone(&shared_connection), Arc::new(SystemClock));

    let stop_flag = Arc::new(AtomicBool::new(false));
    let refresher_handle = if config.stats_refresh_interval_secs > 0 {
        Some(start_stats_refresher(
            SqliteDeviceService::new(Arc::clone(&shared_connection)),
            working_time_settings(&config),
            SystemClock,
            Duration::from_secs(config.stats_refresh_interval_secs),
            Arc::clone(&stop_flag),
        ))
    } else {
        tracing::info!("background working time refresh disabled");
        None
    };

    tracing::info!(bind = %config.http_bind, "http server starting");

    let server_result = actix_web::rt::System::new().block_on(async move {
        HttpServer::new(move || {
            App::new()
                .wrap(
                    Cors::default()
                        .allow_any_origin()
                        .allowed_methods(["GET", "POST"])
                        .allow_any_header(),
                )
                .app_data(web::Data::new(api_state.clone()))
                .configure(configure_routes)
        })
        .bind(&config.http_bind)?
        .run()
        .await
    });

    stop_flag.store(true, Ordering::Relaxed);
    if let Some(handle) = refresher_handle
        && handle.join().is_err()
    {
        return Err(AppError::worker("stats refresher thread panicked"));
    }

    server_result.map_err(AppError::server)
}

pub fn refresh_once(config: &AppConfig) -> Result<(), AppError> {
    let connection = open_database(&config.db_path)?;
    let service = SqliteDeviceService::new(Arc::new(Mutex::new(connection)));

    let summary = refresh_all(&service, &working_time_settings(config), SystemClock.now())
        .map_err(AppError::stats_refresh)?;

    tracing::info!(
        refreshed = summary.refreshed,
        cached = summary.cached,
        failed = summary.failed,
        "working time refresh finished"
    );

    Ok(())
}
