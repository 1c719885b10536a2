use rusqlite::{Connection, OptionalExtension, Row, params};
use thiserror::Error;

use crate::domain::models::{
    DeviceRecord, NewDeviceRecord, NewStatusRecord, SUCCESS_STATUS_MAX, SUCCESS_STATUS_MIN,
    StatusRecord, WorkingStats,
};
use crate::domain::session_state::TimestampMs;
use crate::domain::working_time::StatusSample;

pub const LATEST_SCHEMA_VERSION: u32 = 2;

const MIGRATIONS: &[(u32, &str)] = &[
    (
        1,
        r#"
CREATE TABLE IF NOT EXISTS devices (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    cuid TEXT NOT NULL UNIQUE,
    name TEXT,
    owner_id TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS containers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    device_id INTEGER NOT NULL REFERENCES devices(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    last_status_code INTEGER,
    last_status_msg TEXT,
    created_at TEXT NOT NULL,
    UNIQUE (device_id, name)
);

CREATE TABLE IF NOT EXISTS status_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    container_id INTEGER NOT NULL REFERENCES containers(id) ON DELETE CASCADE,
    status_code INTEGER NOT NULL,
    status_msg TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_status_records_container_created_at
ON status_records (container_id, created_at);
"#,
    ),
    (
        2,
        r#"
ALTER TABLE devices ADD COLUMN power_supply_json TEXT;
ALTER TABLE devices ADD COLUMN power_supply_updated_at TEXT;
ALTER TABLE devices ADD COLUMN avg_working_ms_per_day INTEGER;
ALTER TABLE devices ADD COLUMN working_stats_updated_at TEXT;
ALTER TABLE devices ADD COLUMN stats_update_ok INTEGER NOT NULL DEFAULT 1;
"#,
    ),
];

const DEVICE_COLUMNS: &str = "id, cuid, name, owner_id, power_supply_json, power_supply_updated_at,
    avg_working_ms_per_day, working_stats_updated_at, stats_update_ok, created_at";

#[derive(Debug, Error)]
pub enum DbError {
    #[error("database operation failed: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("unsupported schema version {current}; latest supported is {latest}")]
    UnsupportedSchemaVersion { current: u32, latest: u32 },
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("stored timestamp is not RFC 3339: {0}")]
    InvalidTimestamp(String),
}

pub fn open_connection(path: &str) -> Result<Connection, DbError> {
    let connection = Connection::open(path)?;
    connection.pragma_update(None, "foreign_keys", true)?;
    Ok(connection)
}

pub fn run_migrations(connection: &mut Connection) -> Result<(), DbError> {
    let current_version = schema_version(connection)?;

    if current_version > LATEST_SCHEMA_VERSION {
        return Err(DbError::UnsupportedSchemaVersion {
            current: current_version,
            latest: LATEST_SCHEMA_VERSION,
        });
    }

    let transaction = connection.transaction()?;

    for (version, sql) in MIGRATIONS {
        if *version > current_version {
            transaction.execute_batch(sql)?;
            transaction.pragma_update(None, "user_version", version)?;
        }
    }

    transaction.commit()?;

    Ok(())
}

pub fn schema_version(connection: &Connection) -> Result<u32, DbError> {
    let version = connection.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

pub fn insert_device(connection: &Connection, new_device: &NewDeviceRecord) -> Result<i64, DbError> {
    connection.execute(
        "INSERT INTO devices (cuid, name, created_at) VALUES (?1, ?2, ?3)",
        params![new_device.cuid, new_device.name, new_device.created_at],
    )?;

    Ok(connection.last_insert_rowid())
}

pub fn get_device(connection: &Connection, cuid: &str) -> Result<Option<DeviceRecord>, DbError> {
    let device = connection
        .query_row(
            &format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE cuid = ?1"),
            params![cuid],
            device_from_row,
        )
        .optional()?;

    Ok(device)
}

pub fn list_device_cuids(connection: &Connection) -> Result<Vec<String>, DbError> {
    let mut statement = connection.prepare("SELECT cuid FROM devices ORDER BY id")?;
    let rows = statement.query_map([], |row| row.get(0))?;

    let mut cuids = Vec::new();
    for row in rows {
        cuids.push(row?);
    }

    Ok(cuids)
}

/// Ensures the container row exists, appends the status record and mirrors it
/// into the container's last-status columns, all in one transaction.
pub fn record_status(
    connection: &Connection,
    device_cuid: &str,
    new_status: &NewStatusRecord,
) -> Result<StatusRecord, DbError> {
    let transaction = connection.unchecked_transaction()?;

    let device_id = device_id_for(&transaction, device_cuid)?;

    transaction.execute(
        "INSERT INTO containers (device_id, name, created_at) VALUES (?1, ?2, ?3)
         ON CONFLICT (device_id, name) DO NOTHING",
        params![device_id, new_status.container_name, new_status.created_at],
    )?;
    let container_id: i64 = transaction.query_row(
        "SELECT id FROM containers WHERE device_id = ?1 AND name = ?2",
        params![device_id, new_status.container_name],
        |row| row.get(0),
    )?;

    transaction.execute(
        "INSERT INTO status_records (container_id, status_code, status_msg, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            container_id,
            new_status.status_code,
            new_status.status_msg,
            new_status.created_at,
        ],
    )?;
    let record_id = transaction.last_insert_rowid();

    transaction.execute(
        "UPDATE containers SET last_status_code = ?1, last_status_msg = ?2 WHERE id = ?3",
        params![new_status.status_code, new_status.status_msg, container_id],
    )?;

    transaction.commit()?;

    Ok(StatusRecord {
        id: record_id,
        container_id,
        container_name: new_status.container_name.clone(),
        status_code: new_status.status_code,
        status_msg: new_status.status_msg.clone(),
        created_at: new_status.created_at.clone(),
    })
}

/// Most recent status record per container of the device, by `created_at`.
pub fn latest_container_statuses(
    connection: &Connection,
    device_cuid: &str,
) -> Result<Vec<StatusRecord>, DbError> {
    let mut statement = connection.prepare(
        "SELECT s.id, c.id, c.name, s.status_code, s.status_msg, s.created_at
         FROM containers c
         JOIN devices d ON d.id = c.device_id
         JOIN status_records s ON s.id = (
             SELECT latest.id FROM status_records latest
             WHERE latest.container_id = c.id
             ORDER BY latest.created_at DESC, latest.id DESC
             LIMIT 1
         )
         WHERE d.cuid = ?1
         ORDER BY c.name",
    )?;

    let rows = statement.query_map(params![device_cuid], status_from_row)?;

    let mut statuses = Vec::new();
    for row in rows {
        statuses.push(row?);
    }

    Ok(statuses)
}

/// Most recent successful (2xx) status record per container. Containers that
/// never reported success are left out; a later failure does not hide an
/// earlier success.
pub fn latest_successful_container_statuses(
    connection: &Connection,
    device_cuid: &str,
) -> Result<Vec<StatusRecord>, DbError> {
    let mut statement = connection.prepare(
        "SELECT s.id, c.id, c.name, s.status_code, s.status_msg, s.created_at
         FROM containers c
         JOIN devices d ON d.id = c.device_id
         JOIN status_records s ON s.id = (
             SELECT latest.id FROM status_records latest
             WHERE latest.container_id = c.id
               AND latest.status_code BETWEEN ?2 AND ?3
             ORDER BY latest.created_at DESC, latest.id DESC
             LIMIT 1
         )
         WHERE d.cuid = ?1
         ORDER BY c.name",
    )?;

    let rows = statement.query_map(
        params![device_cuid, SUCCESS_STATUS_MIN, SUCCESS_STATUS_MAX],
        status_from_row,
    )?;

    let mut statuses = Vec::new();
    for row in rows {
        statuses.push(row?);
    }

    Ok(statuses)
}

pub fn list_status_records(
    connection: &Connection,
    device_cuid: &str,
    container_name: &str,
) -> Result<Vec<StatusRecord>, DbError> {
    let mut statement = connection.prepare(
        "SELECT s.id, c.id, c.name, s.status_code, s.status_msg, s.created_at
         FROM status_records s
         JOIN containers c ON c.id = s.container_id
         JOIN devices d ON d.id = c.device_id
         WHERE d.cuid = ?1 AND c.name = ?2
         ORDER BY s.created_at, s.id",
    )?;

    let rows = statement.query_map(params![device_cuid, container_name], status_from_row)?;

    let mut records = Vec::new();
    for row in rows {
        records.push(row?);
    }

    Ok(records)
}

/// Status samples of one container from `since` onwards, preceded by the last
/// sample before `since` (if any) so an interval already open at the window
/// start is not lost.
pub fn status_samples_since(
    connection: &Connection,
    device_cuid: &str,
    container_name: &str,
    since: TimestampMs,
) -> Result<Vec<StatusSample>, DbError> {
    let since = since.to_rfc3339();

    let preceding: Option<(String, String)> = connection
        .query_row(
            "SELECT s.status_msg, s.created_at
             FROM status_records s
             JOIN containers c ON c.id = s.container_id
             JOIN devices d ON d.id = c.device_id
             WHERE d.cuid = ?1 AND c.name = ?2 AND s.created_at < ?3
             ORDER BY s.created_at DESC, s.id DESC
             LIMIT 1",
            params![device_cuid, container_name, since],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let mut statement = connection.prepare(
        "SELECT s.status_msg, s.created_at
         FROM status_records s
         JOIN containers c ON c.id = s.container_id
         JOIN devices d ON d.id = c.device_id
         WHERE d.cuid = ?1 AND c.name = ?2 AND s.created_at >= ?3
         ORDER BY s.created_at, s.id",
    )?;
    let rows = statement.query_map(params![device_cuid, container_name, since], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;

    let mut samples = Vec::new();
    for row in preceding.into_iter().map(Ok).chain(rows) {
        let (message, created_at) = row?;
        let at = TimestampMs::parse_rfc3339(&created_at)
            .ok_or(DbError::InvalidTimestamp(created_at))?;
        samples.push(StatusSample { at, message });
    }

    Ok(samples)
}

pub fn count_status_records(connection: &Connection, device_cuid: &str) -> Result<i64, DbError> {
    let count = connection.query_row(
        "SELECT COUNT(*)
         FROM status_records s
         JOIN containers c ON c.id = s.container_id
         JOIN devices d ON d.id = c.device_id
         WHERE d.cuid = ?1",
        params![device_cuid],
        |row| row.get(0),
    )?;

    Ok(count)
}

pub fn update_power_supply(
    connection: &Connection,
    device_cuid: &str,
    power_supply_json: &str,
    updated_at: &str,
) -> Result<(), DbError> {
    let changed = connection.execute(
        "UPDATE devices SET power_supply_json = ?1, power_supply_updated_at = ?2 WHERE cuid = ?3",
        params![power_supply_json, updated_at, device_cuid],
    )?;
    require_changed(changed, device_cuid)
}

pub fn update_working_stats(
    connection: &Connection,
    device_cuid: &str,
    stats: &WorkingStats,
) -> Result<(), DbError> {
    let changed = connection.execute(
        "UPDATE devices
         SET avg_working_ms_per_day = ?1, working_stats_updated_at = ?2, stats_update_ok = 1
         WHERE cuid = ?3",
        params![stats.avg_working_ms_per_day, stats.updated_at, device_cuid],
    )?;
    require_changed(changed, device_cuid)
}

pub fn mark_stats_update_failed(connection: &Connection, device_cuid: &str) -> Result<(), DbError> {
    let changed = connection.execute(
        "UPDATE devices SET stats_update_ok = 0 WHERE cuid = ?1",
        params![device_cuid],
    )?;
    require_changed(changed, device_cuid)
}

fn device_id_for(connection: &Connection, device_cuid: &str) -> Result<i64, DbError> {
    connection
        .query_row(
            "SELECT id FROM devices WHERE cuid = ?1",
            params![device_cuid],
            |row| row.get(0),
        )
        .optional()?
        .ok_or_else(|| DbError::DeviceNotFound(device_cuid.to_string()))
}

fn require_changed(changed: usize, device_cuid: &str) -> Result<(), DbError> {
    if changed == 0 {
        return Err(DbError::DeviceNotFound(device_cuid.to_string()));
    }
    Ok(())
}

fn device_from_row(row: &Row<'_>) -> rusqlite::Result<DeviceRecord> {
    Ok(DeviceRecord {
        id: row.get(0)?,
        cuid: row.get(1)?,
        name: row.get(2)?,
        owner_id: row.get(3)?,
        power_supply_json: row.get(4)?,
        power_supply_updated_at: row.get(5)?,
        avg_working_ms_per_day: row.get(6)?,
        working_stats_updated_at: row.get(7)?,
        stats_update_ok: row.get(8)?,
        created_at: row.get(9)?,
    })
}

fn status_from_row(row: &Row<'_>) -> rusqlite::Result<StatusRecord> {
    Ok(StatusRecord {
        id: row.get(0)?,
        container_id: row.get(1)?,
        container_name: row.get(2)?,
        status_code: row.get(3)?,
        status_msg: row.get(4)?,
        created_at: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use rusqlite::params;

    use super::{
        DbError, LATEST_SCHEMA_VERSION, count_status_records, get_device, insert_device,
        latest_container_statuses, latest_successful_container_statuses, list_device_cuids,
        list_status_records,
        mark_stats_update_failed, open_connection, record_status, run_migrations, schema_version,
        status_samples_since, update_power_supply, update_working_stats,
    };
    use crate::domain::models::{NewDeviceRecord, NewStatusRecord, WorkingStats};
    use crate::domain::session_state::TimestampMs;

    fn temp_db_path(name: &str) -> PathBuf {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let path = dir.path().join(name);
        std::mem::forget(dir);
        path
    }

    fn migrated_connection(name: &str) -> rusqlite::Connection {
        let db_path = temp_db_path(name);
        let mut connection =
            open_connection(db_path.to_string_lossy().as_ref()).expect("db connection should open");
        run_migrations(&mut connection).expect("migrations should succeed");
        connection
    }

    fn add_device(connection: &rusqlite::Connection, cuid: &str) {
        insert_device(
            connection,
            &NewDeviceRecord {
                cuid: cuid.to_string(),
                name: Some(format!("box {cuid}")),
                created_at: "2026-03-01T08:00:00.000Z".to_string(),
            },
        )
        .expect("device insert should succeed");
    }

    fn status(container: &str, code: i64, msg: &str, created_at: &str) -> NewStatusRecord {
        NewStatusRecord {
            container_name: container.to_string(),
            status_code: code,
            status_msg: msg.to_string(),
            created_at: created_at.to_string(),
        }
    }

    #[test]
    fn migrates_fresh_database_to_latest_version() {
        let connection = migrated_connection("fresh.sqlite");

        let version = schema_version(&connection).expect("schema version should be queryable");
        assert_eq!(version, LATEST_SCHEMA_VERSION);

        for table in ["devices", "containers", "status_records"] {
            let table_exists: i64 = connection
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    params![table],
                    |row| row.get(0),
                )
                .expect("table check should work");
            assert_eq!(table_exists, 1, "table {table} should exist");
        }

        let index_exists: i64 = connection
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='index' AND name='idx_status_records_container_created_at'",
                [],
                |row| row.get(0),
            )
            .expect("status index check should work");
        assert_eq!(index_exists, 1);
    }

    #[test]
    fn migrations_are_idempotent_and_keep_data() {
        let db_path = temp_db_path("idempotent.sqlite");
        let mut connection =
            open_connection(db_path.to_string_lossy().as_ref()).expect("db connection should open");

        run_migrations(&mut connection).expect("first migration run should succeed");
        add_device(&connection, "cbox1");
        run_migrations(&mut connection).expect("second migration run should succeed");

        assert_eq!(
            schema_version(&connection).expect("schema version should be queryable"),
            LATEST_SCHEMA_VERSION
        );
        assert_eq!(
            list_device_cuids(&connection).expect("list should succeed"),
            vec!["cbox1".to_string()]
        );
    }

    #[test]
    fn rejects_newer_schema_version() {
        let db_path = temp_db_path("newer.sqlite");
        let mut connection =
            open_connection(db_path.to_string_lossy().as_ref()).expect("db connection should open");
        connection
            .pragma_update(None, "user_version", LATEST_SCHEMA_VERSION + 1)
            .expect("pragma update should succeed");

        let result = run_migrations(&mut connection);

        assert!(matches!(
            result,
            Err(DbError::UnsupportedSchemaVersion { .. })
        ));
    }

    #[test]
    fn new_device_has_clean_statistics() {
        let connection = migrated_connection("device.sqlite");
        add_device(&connection, "cbox1");

        let device = get_device(&connection, "cbox1")
            .expect("query should succeed")
            .expect("device should exist");

        assert_eq!(device.name.as_deref(), Some("box cbox1"));
        assert_eq!(device.owner_id, None);
        assert_eq!(device.avg_working_ms_per_day, None);
        assert!(device.stats_update_ok);
        assert_eq!(get_device(&connection, "missing").expect("query"), None);
    }

    #[test]
    fn record_status_creates_container_once_and_appends_records() {
        let connection = migrated_connection("append.sqlite");
        add_device(&connection, "cbox1");

        let first = record_status(
            &connection,
            "cbox1",
            &status("solar-plugin", 500, "crashed", "2026-03-01T10:00:00.000Z"),
        )
        .expect("first record should persist");
        let second = record_status(
            &connection,
            "cbox1",
            &status("solar-plugin", 500, "crashed", "2026-03-01T10:00:00.000Z"),
        )
        .expect("duplicate record should persist");

        assert_eq!(first.container_id, second.container_id);
        assert_ne!(first.id, second.id);
        assert_eq!(
            count_status_records(&connection, "cbox1").expect("count should succeed"),
            2
        );

        let (code, msg): (i64, String) = connection
            .query_row(
                "SELECT last_status_code, last_status_msg FROM containers WHERE id = ?1",
                params![first.container_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .expect("container row should exist");
        assert_eq!((code, msg.as_str()), (500, "crashed"));
    }

    #[test]
    fn record_status_for_unknown_device_is_not_found() {
        let connection = migrated_connection("unknown.sqlite");

        let result = record_status(
            &connection,
            "ghost",
            &status("donationbox", 200, "Working", "2026-03-01T10:00:00.000Z"),
        );

        assert!(matches!(result, Err(DbError::DeviceNotFound(cuid)) if cuid == "ghost"));
    }

    #[test]
    fn latest_statuses_use_most_recent_created_at() {
        let connection = migrated_connection("latest.sqlite");
        add_device(&connection, "cbox1");
        add_device(&connection, "cbox2");

        for record in [
            status("donationbox", 200, "Working", "2026-03-01T12:00:00.000Z"),
            status("donationbox", 503, "Disconnected", "2026-03-01T11:00:00.000Z"),
            status("solar-plugin", 200, "Working", "2026-03-01T09:00:00.000Z"),
            status("solar-plugin", 500, "crashed", "2026-03-01T10:00:00.000Z"),
        ] {
            record_status(&connection, "cbox1", &record).expect("record should persist");
        }
        record_status(
            &connection,
            "cbox2",
            &status("other", 200, "Working", "2026-03-01T13:00:00.000Z"),
        )
        .expect("record should persist");

        let latest = latest_container_statuses(&connection, "cbox1").expect("query should work");

        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].container_name, "donationbox");
        assert_eq!(latest[0].status_msg, "Working");
        assert_eq!(latest[1].container_name, "solar-plugin");
        assert_eq!(latest[1].status_code, 500);

        let history =
            list_status_records(&connection, "cbox1", "donationbox").expect("query should work");
        assert_eq!(history[0].status_msg, "Disconnected");
        assert_eq!(history[1].status_msg, "Working");
    }

    #[test]
    fn latest_successful_statuses_skip_later_failures() {
        let connection = migrated_connection("latest-successful.sqlite");
        add_device(&connection, "cbox1");

        for record in [
            status("donationbox", 200, "Connected", "2026-03-01T09:00:00.000Z"),
            status("miner", 200, "Working", "2026-03-01T09:30:00.000Z"),
            status("miner", 500, "crashed", "2026-03-01T10:00:00.000Z"),
            status("solar-plugin", 500, "inverter unreachable", "2026-03-01T10:00:00.000Z"),
        ] {
            record_status(&connection, "cbox1", &record).expect("record should persist");
        }

        let successful = latest_successful_container_statuses(&connection, "cbox1")
            .expect("query should work");

        assert_eq!(
            successful
                .iter()
                .map(|record| (record.container_name.as_str(), record.status_msg.as_str()))
                .collect::<Vec<_>>(),
            vec![("donationbox", "Connected"), ("miner", "Working")]
        );
    }

    #[test]
    fn samples_since_include_preceding_record() {
        let connection = migrated_connection("samples.sqlite");
        add_device(&connection, "cbox1");

        for record in [
            status("donationbox", 200, "Idle", "2026-03-01T08:00:00.000Z"),
            status("donationbox", 200, "Working", "2026-03-01T09:00:00.000Z"),
            status("donationbox", 200, "Idle", "2026-03-01T11:00:00.000Z"),
            status("solar-plugin", 200, "Working", "2026-03-01T11:30:00.000Z"),
        ] {
            record_status(&connection, "cbox1", &record).expect("record should persist");
        }

        let since = TimestampMs::parse_rfc3339("2026-03-01T10:00:00.000Z").expect("valid time");
        let samples = status_samples_since(&connection, "cbox1", "donationbox", since)
            .expect("query should work");

        let messages: Vec<&str> = samples.iter().map(|sample| sample.message.as_str()).collect();
        assert_eq!(messages, vec!["Working", "Idle"]);
        assert_eq!(
            samples[0].at,
            TimestampMs::parse_rfc3339("2026-03-01T09:00:00.000Z").expect("valid time")
        );
    }

    #[test]
    fn device_updates_fail_for_unknown_device() {
        let connection = migrated_connection("updates.sqlite");
        add_device(&connection, "cbox1");

        update_power_supply(&connection, "cbox1", "{\"grid\":1}", "2026-03-01T10:00:00.000Z")
            .expect("power update should succeed");
        mark_stats_update_failed(&connection, "cbox1").expect("flag update should succeed");

        let device = get_device(&connection, "cbox1")
            .expect("query should succeed")
            .expect("device should exist");
        assert_eq!(device.power_supply_json.as_deref(), Some("{\"grid\":1}"));
        assert!(!device.stats_update_ok);

        update_working_stats(
            &connection,
            "cbox1",
            &WorkingStats {
                avg_working_ms_per_day: 1_000,
                updated_at: "2026-03-01T10:05:00.000Z".to_string(),
            },
        )
        .expect("stats update should succeed");
        let device = get_device(&connection, "cbox1")
            .expect("query should succeed")
            .expect("device should exist");
        assert_eq!(device.avg_working_ms_per_day, Some(1_000));
        assert!(device.stats_update_ok);

        assert!(matches!(
            update_power_supply(&connection, "ghost", "{}", "2026-03-01T10:00:00.000Z"),
            Err(DbError::DeviceNotFound(_))
        ));
        assert!(matches!(
            mark_stats_update_failed(&connection, "ghost"),
            Err(DbError::DeviceNotFound(_))
        ));
    }
}
