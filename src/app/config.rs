use crate::app::AppError;
use crate::domain::dispatch::DEFAULT_GRID_DELTA;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub jwt_secret: String,
    pub token_ttl_secs: u64,
    pub db_path: String,
    pub http_bind: String,
    pub dispatch_delta: f64,
    pub primary_container: String,
    pub companion: Option<CompanionConfig>,
    pub stats_window_days: u32,
    pub stats_stale_after_secs: u64,
    pub stats_refresh_interval_secs: u64,
    pub status_request_interval_secs: u64,
}

/// Container the device is told to start once its session is authenticated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompanionConfig {
    pub image_name: String,
    pub container_name: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        if let Err(error) = dotenvy::dotenv()
            && !error.not_found()
        {
            return Err(AppError::config(format!("failed to read .env file: {error}")));
        }

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let jwt_secret = non_empty(&lookup, "JWT_SECRET")
            .ok_or_else(|| AppError::config("JWT_SECRET is required"))?;

        let companion = if parse_or_default(&lookup, "START_COMPANION", true)? {
            Some(CompanionConfig {
                image_name: non_empty(&lookup, "COMPANION_IMAGE")
                    .unwrap_or_else(|| "donationbox/solar-plugin:latest".to_string()),
                container_name: non_empty(&lookup, "COMPANION_CONTAINER")
                    .unwrap_or_else(|| "solar-plugin".to_string()),
            })
        } else {
            None
        };

        Ok(Self {
            jwt_secret,
            token_ttl_secs: parse_or_default(&lookup, "TOKEN_TTL_SECS", 3600_u64)?,
            db_path: non_empty(&lookup, "DB_PATH")
                .unwrap_or_else(|| "/var/lib/donationbox/donationbox.db".to_string()),
            http_bind: non_empty(&lookup, "HTTP_BIND").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            dispatch_delta: parse_or_default(&lookup, "DISPATCH_DELTA", DEFAULT_GRID_DELTA)?,
            primary_container: non_empty(&lookup, "PRIMARY_CONTAINER")
                .unwrap_or_else(|| "donationbox".to_string()),
            companion,
            stats_window_days: parse_or_default(&lookup, "STATS_WINDOW_DAYS", 14_u32)?,
            stats_stale_after_secs: parse_or_default(&lookup, "STATS_STALE_AFTER_SECS", 600_u64)?,
            stats_refresh_interval_secs: parse_or_default(
                &lookup,
                "STATS_REFRESH_INTERVAL_SECS",
                600_u64,
            )?,
            status_request_interval_secs: parse_or_default(
                &lookup,
                "STATUS_REQUEST_INTERVAL_SECS",
                60_u64,
            )?,
        })
    }
}

fn non_empty<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_or_default<T, F>(lookup: &F, key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr + Copy,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| AppError::config(format!("{key} has an invalid value"))),
        None => Ok(default),
    }
}
