use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::app::services::{DeviceCommandHandler, DeviceQueryHandler, ServiceError};
use crate::domain::models::WorkingStats;
use crate::domain::session_state::{Clock, TimestampMs};
use crate::domain::working_time::{average_daily_ms, is_stale, working_time_ms};

const STOP_POLL_SLICE: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkingTimeSettings {
    pub container_name: String,
    pub window_days: u32,
    pub stale_after_ms: i64,
}

#[derive(Debug, Error)]
pub enum StatsError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("working time update failed: {0}")]
    Service(#[from] ServiceError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatsOutcome {
    Cached(WorkingStats),
    Refreshed(WorkingStats),
}

impl StatsOutcome {
    pub fn stats(&self) -> &WorkingStats {
        match self {
            Self::Cached(stats) | Self::Refreshed(stats) => stats,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub refreshed: usize,
    pub cached: usize,
    pub failed: usize,
}

/// Returns the cached average daily working time of the device, recomputing
/// it over the trailing window when it is stale or `force` is set.
pub fn working_time_stats<S>(
    service: &S,
    cuid: &str,
    settings: &WorkingTimeSettings,
    now: TimestampMs,
    force: bool,
) -> Result<StatsOutcome, StatsError>
where
    S: DeviceQueryHandler + DeviceCommandHandler,
{
    let device = service
        .get_device(cuid)?
        .ok_or_else(|| StatsError::DeviceNotFound(cuid.to_string()))?;

    let last_updated = device
        .working_stats_updated_at
        .as_deref()
        .and_then(TimestampMs::parse_rfc3339);

    if !force
        && !is_stale(last_updated, now, settings.stale_after_ms)
        && let (Some(avg_working_ms_per_day), Some(updated_at)) = (
            device.avg_working_ms_per_day,
            device.working_stats_updated_at,
        )
    {
        return Ok(StatsOutcome::Cached(WorkingStats {
            avg_working_ms_per_day,
            updated_at,
        }));
    }

    let window_start = now.minus_days(settings.window_days);
    let samples = service.status_samples_since(cuid, &settings.container_name, window_start)?;
    let total_ms = working_time_ms(&samples, Some(window_start), now);

    let stats = WorkingStats {
        avg_working_ms_per_day: average_daily_ms(total_ms, settings.window_days),
        updated_at: now.to_rfc3339(),
    };
    service.update_working_stats(cuid, &stats)?;

    tracing::debug!(
        device_id = cuid,
        total_ms,
        avg_working_ms_per_day = stats.avg_working_ms_per_day,
        "working time recomputed"
    );

    Ok(StatsOutcome::Refreshed(stats))
}

pub fn refresh_all<S>(
    service: &S,
    settings: &WorkingTimeSettings,
    now: TimestampMs,
) -> Result<RefreshSummary, ServiceError>
where
    S: DeviceQueryHandler + DeviceCommandHandler,
{
    let cuids = service.list_device_cuids()?;
    Ok(refresh_devices(service, &cuids, settings, now))
}

/// Refreshes each device independently; a failing device is flagged and
/// counted but never stops the others.
pub fn refresh_devices<S>(
    service: &S,
    cuids: &[String],
    settings: &WorkingTimeSettings,
    now: TimestampMs,
) -> RefreshSummary
where
    S: DeviceQueryHandler + DeviceCommandHandler,
{
    let mut summary = RefreshSummary::default();

    for cuid in cuids {
        match working_time_stats(service, cuid, settings, now, false) {
            Ok(StatsOutcome::Cached(_)) => summary.cached += 1,
            Ok(StatsOutcome::Refreshed(_)) => summary.refreshed += 1,
            Err(error) => {
                summary.failed += 1;
                tracing::warn!(device_id = %cuid, error = %error, "working time refresh failed");

                if let Err(flag_error) = service.mark_stats_update_failed(cuid) {
                    tracing::warn!(
                        device_id = %cuid,
                        error = %flag_error,
                        "failed to flag unsuccessful working time update"
                    );
                }
            }
        }
    }

    summary
}

pub fn start_stats_refresher<S, Cl>(
    service: S,
    settings: WorkingTimeSettings,
    clock: Cl,
    refresh_interval: Duration,
    stop_flag: Arc<AtomicBool>,
) -> JoinHandle<()>
where
    S: DeviceQueryHandler + DeviceCommandHandler + Send + 'static,
    Cl: Clock + Send + 'static,
{
    std::thread::spawn(move || {
        while !stop_flag.load(Ordering::Relaxed) {
            match refresh_all(&service, &settings, clock.now()) {
                Ok(summary) => tracing::info!(
                    refreshed = summary.refreshed,
                    cached = summary.cached,
                    failed = summary.failed,
                    "working time refresh cycle finished"
                ),
                Err(error) => tracing::warn!(error = %error, "working time refresh cycle failed"),
            }

            let cycle_started = Instant::now();
            while cycle_started.elapsed() < refresh_interval && !stop_flag.load(Ordering::Relaxed) {
                std::thread::sleep(STOP_POLL_SLICE.min(refresh_interval));
            }
        }
    })
}
