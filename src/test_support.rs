use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::Connection;

use crate::adapters::db::{insert_device, open_connection, run_migrations};
use crate::domain::models::NewDeviceRecord;
use crate::domain::session_state::{Clock, TimestampMs};

const SEEDED_AT: &str = "2026-03-01T00:00:00.000Z";

static TEST_DB_COUNTER: AtomicU64 = AtomicU64::new(0);

pub fn open_test_connection(test_name: &str) -> Connection {
    let template = ensure_template_db();
    let test_db_path = unique_test_db_path(test_name);

    if let Some(parent) = test_db_path.parent() {
        std::fs::create_dir_all(parent).expect("test db dir should be creatable");
    }

    std::fs::copy(&template, &test_db_path).expect("template db should be copied");
    open_connection(test_db_path.to_string_lossy().as_ref()).expect("test db should open")
}

pub fn insert_test_device(connection: &Connection, cuid: &str) {
    insert_device(
        connection,
        &NewDeviceRecord {
            cuid: cuid.to_string(),
            name: None,
            created_at: SEEDED_AT.to_string(),
        },
    )
    .expect("device insert should succeed");
}

/// Fresh migrated database holding the given devices, ready to share
/// between a service and direct assertions.
pub fn shared_connection_with_devices(test_name: &str, cuids: &[&str]) -> Arc<Mutex<Connection>> {
    let connection = open_test_connection(test_name);
    for cuid in cuids {
        insert_test_device(&connection, cuid);
    }
    Arc::new(Mutex::new(connection))
}

/// Clock that only moves when a test tells it to.
#[derive(Debug)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn at(rfc3339: &str) -> Self {
        let start = TimestampMs::parse_rfc3339(rfc3339).expect("clock start should parse");
        Self {
            now: AtomicI64::new(start.0),
        }
    }

    pub fn advance_ms(&self, millis: i64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> TimestampMs {
        TimestampMs(self.now.load(Ordering::SeqCst))
    }
}

fn ensure_template_db() -> PathBuf {
    static TEMPLATE_PATH: OnceLock<PathBuf> = OnceLock::new();

    TEMPLATE_PATH
        .get_or_init(|| {
            let template_path = std::env::var("TEST_DB_TEMPLATE_PATH")
                .ok()
                .filter(|value| !value.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(default_template_path);

            if let Some(parent) = template_path.parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent).expect("template parent dir should be creatable");
            }

            let mut connection = open_connection(template_path.to_string_lossy().as_ref())
                .expect("template db opens");
            run_migrations(&mut connection).expect("template migrations should succeed");

            template_path
        })
        .clone()
}

fn default_template_path() -> PathBuf {
    if cfg!(windows) {
        Path::new(".\\data\\donationbox_test.db").to_path_buf()
    } else {
        Path::new("./data/donationbox_test.db").to_path_buf()
    }
}

fn unique_test_db_path(test_name: &str) -> PathBuf {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let counter = TEST_DB_COUNTER.fetch_add(1, Ordering::Relaxed);
    Path::new("./target/testdb")
        .join(format!("{test_name}-{now}-{counter}.sqlite"))
        .to_path_buf()
}
