use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use thiserror::Error;

use crate::adapters::db;
use crate::adapters::db::DbError;
use crate::domain::models::{
    DeviceRecord, NewDeviceRecord, NewStatusRecord, StatusRecord, WorkingStats,
};
use crate::domain::session_state::TimestampMs;
use crate::domain::working_time::StatusSample;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("database lock poisoned")]
    DbLockPoisoned,
    #[error("database operation failed: {0}")]
    Database(#[from] DbError),
}

impl ServiceError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Database(DbError::DeviceNotFound(_)))
    }
}

pub trait DeviceQueryHandler {
    fn get_device(&self, cuid: &str) -> Result<Option<DeviceRecord>, ServiceError>;
    fn list_device_cuids(&self) -> Result<Vec<String>, ServiceError>;
    fn latest_container_statuses(&self, cuid: &str) -> Result<Vec<StatusRecord>, ServiceError>;
    fn latest_successful_container_statuses(
        &self,
        cuid: &str,
    ) -> Result<Vec<StatusRecord>, ServiceError>;
    fn status_samples_since(
        &self,
        cuid: &str,
        container_name: &str,
        since: TimestampMs,
    ) -> Result<Vec<StatusSample>, ServiceError>;
}

pub trait DeviceCommandHandler {
    fn insert_device(&self, new_device: &NewDeviceRecord) -> Result<i64, ServiceError>;
    fn record_status(
        &self,
        cuid: &str,
        new_status: &NewStatusRecord,
    ) -> Result<StatusRecord, ServiceError>;
    fn update_power_supply(
        &self,
        cuid: &str,
        power_supply_json: &str,
        updated_at: &str,
    ) -> Result<(), ServiceError>;
    fn update_working_stats(&self, cuid: &str, stats: &WorkingStats) -> Result<(), ServiceError>;
    fn mark_stats_update_failed(&self, cuid: &str) -> Result<(), ServiceError>;
}

#[derive(Clone)]
pub struct SqliteDeviceService {
    connection: Arc<Mutex<Connection>>,
}

impl SqliteDeviceService {
    pub fn new(connection: Arc<Mutex<Connection>>) -> Self {
        Self { connection }
    }

    fn with_connection<T>(
        &self,
        op: impl FnOnce(&Connection) -> Result<T, DbError>,
    ) -> Result<T, ServiceError> {
        let connection = self
            .connection
            .lock()
            .map_err(|_| ServiceError::DbLockPoisoned)?;
        op(&connection).map_err(ServiceError::from)
    }
}

impl DeviceQueryHandler for SqliteDeviceService {
    fn get_device(&self, cuid: &str) -> Result<Option<DeviceRecord>, ServiceError> {
        self.with_connection(|connection| db::get_device(connection, cuid))
    }

    fn list_device_cuids(&self) -> Result<Vec<String>, ServiceError> {
        self.with_connection(db::list_device_cuids)
    }

    fn latest_container_statuses(&self, cuid: &str) -> Result<Vec<StatusRecord>, ServiceError> {
        self.with_connection(|connection| db::latest_container_statuses(connection, cuid))
    }

    fn latest_successful_container_statuses(
        &self,
        cuid: &str,
    ) -> Result<Vec<StatusRecord>, ServiceError> {
        self.with_connection(|connection| {
            db::latest_successful_container_statuses(connection, cuid)
        })
    }

    fn status_samples_since(
        &self,
        cuid: &str,
        container_name: &str,
        since: TimestampMs,
    ) -> Result<Vec<StatusSample>, ServiceError> {
        self.with_connection(|connection| {
            db::status_samples_since(connection, cuid, container_name, since)
        })
    }
}

impl DeviceCommandHandler for SqliteDeviceService {
    fn insert_device(&self, new_device: &NewDeviceRecord) -> Result<i64, ServiceError> {
        self.with_connection(|connection| db::insert_device(connection, new_device))
    }

    fn record_status(
        &self,
        cuid: &str,
        new_status: &NewStatusRecord,
    ) -> Result<StatusRecord, ServiceError> {
        self.with_connection(|connection| db::record_status(connection, cuid, new_status))
    }

    fn update_power_supply(
        &self,
        cuid: &str,
        power_supply_json: &str,
        updated_at: &str,
    ) -> Result<(), ServiceError> {
        self.with_connection(|connection| {
            db::update_power_supply(connection, cuid, power_supply_json, updated_at)
        })
    }

    fn update_working_stats(&self, cuid: &str, stats: &WorkingStats) -> Result<(), ServiceError> {
        self.with_connection(|connection| db::update_working_stats(connection, cuid, stats))
    }

    fn mark_stats_update_failed(&self, cuid: &str) -> Result<(), ServiceError> {
        self.with_connection(|connection| db::mark_stats_update_failed(connection, cuid))
    }
}
