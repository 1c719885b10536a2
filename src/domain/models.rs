use uuid::Uuid;

pub const CONNECTED_STATUS_CODE: i64 = 200;
pub const CONNECTED_STATUS_MSG: &str = "Connected";
pub const DISCONNECTED_STATUS_CODE: i64 = 503;
pub const DISCONNECTED_STATUS_MSG: &str = "Disconnected";

pub const SUCCESS_STATUS_MIN: i64 = 200;
pub const SUCCESS_STATUS_MAX: i64 = 299;

pub fn is_success_code(status_code: i64) -> bool {
    (SUCCESS_STATUS_MIN..=SUCCESS_STATUS_MAX).contains(&status_code)
}

/// Collision-resistant public handle for a new donation box.
pub fn new_device_cuid() -> String {
    format!("c{}", Uuid::new_v4().simple())
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceRecord {
    pub id: i64,
    pub cuid: String,
    pub name: Option<String>,
    pub owner_id: Option<String>,
    pub power_supply_json: Option<String>,
    pub power_supply_updated_at: Option<String>,
    pub avg_working_ms_per_day: Option<i64>,
    pub working_stats_updated_at: Option<String>,
    pub stats_update_ok: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewDeviceRecord {
    pub cuid: String,
    pub name: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewStatusRecord {
    pub container_name: String,
    pub status_code: i64,
    pub status_msg: String,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusRecord {
    pub id: i64,
    pub container_id: i64,
    pub container_name: String,
    pub status_code: i64,
    pub status_msg: String,
    pub created_at: String,
}

impl StatusRecord {
    pub fn is_success(&self) -> bool {
        is_success_code(self.status_code)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkingStats {
    pub avg_working_ms_per_day: i64,
    pub updated_at: String,
}
