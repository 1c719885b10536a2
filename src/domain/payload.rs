use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq)]
pub struct AuthRequest {
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerStatus {
    pub container_name: String,
    pub status_code: i64,
    pub status_msg: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Production {
    pub solar: f64,
    pub grid: f64,
    pub battery: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Consumption {
    pub house: f64,
    pub wallbox: Option<f64>,
    pub battery: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PowerSupplyStatus {
    pub production: Production,
    pub consumption: Consumption,
    pub state_of_charge: Option<f64>,
    pub system_status: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    /// Device-side report time, kept verbatim for logging.
    pub time: String,
    pub power_supply: Option<PowerSupplyStatus>,
    pub containers: Vec<ContainerStatus>,
}

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("payload must be a JSON object")]
    InvalidPayloadType,
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("invalid field {field}: {reason}")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
    #[error("invalid entry {index} in {field}: {source}")]
    InvalidEntry {
        field: &'static str,
        index: usize,
        source: Box<ValidationError>,
    },
}

pub fn validate_auth_request(payload: &Value) -> Result<AuthRequest, ValidationError> {
    let object = as_object(payload)?;
    let token = require_str(object, "token")?;

    if !is_compact_jwt(token) {
        return Err(ValidationError::InvalidField {
            field: "token",
            reason: "expected a compact JWT",
        });
    }

    Ok(AuthRequest {
        token: token.to_string(),
    })
}

pub fn validate_container_status(payload: &Value) -> Result<ContainerStatus, ValidationError> {
    let object = as_object(payload)?;

    let container_name = require_str(object, "containerName")?.trim();
    if container_name.is_empty() {
        return Err(ValidationError::InvalidField {
            field: "containerName",
            reason: "must not be empty",
        });
    }

    let status_code = require_integer(object, "statusCode")?;
    let status_msg = require_str(object, "statusMsg")?;

    Ok(ContainerStatus {
        container_name: container_name.to_string(),
        status_code,
        status_msg: status_msg.to_string(),
    })
}

/// Validates the whole update before anything is returned: a single bad
/// container entry rejects the batch.
pub fn validate_status_update(payload: &Value) -> Result<StatusUpdate, ValidationError> {
    let object = as_object(payload)?;

    let time = match object.get("time") {
        Some(Value::String(text)) if !text.trim().is_empty() => text.clone(),
        Some(Value::Number(number)) => number.to_string(),
        Some(_) => {
            return Err(ValidationError::InvalidField {
                field: "time",
                reason: "expected a timestamp string or number",
            });
        }
        None => return Err(ValidationError::MissingField("time")),
    };

    let entries = match object.get("container") {
        Some(Value::Array(entries)) => entries,
        Some(_) => {
            return Err(ValidationError::InvalidField {
                field: "container",
                reason: "expected an array",
            });
        }
        None => return Err(ValidationError::MissingField("container")),
    };

    let containers = entries
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            validate_container_status(entry).map_err(|error| ValidationError::InvalidEntry {
                field: "container",
                index,
                source: Box::new(error),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let power_supply = match object.get("power_supply") {
        None | Some(Value::Null) => None,
        Some(value) => Some(validate_power_supply(value)?),
    };

    Ok(StatusUpdate {
        time,
        power_supply,
        containers,
    })
}

pub fn validate_power_supply(payload: &Value) -> Result<PowerSupplyStatus, ValidationError> {
    let object = as_object(payload)?;

    let production = require_object(object, "production")?;
    let consumption = require_object(object, "consumption")?;

    Ok(PowerSupplyStatus {
        production: Production {
            solar: require_number(production, "production.solar", "solar")?,
            grid: require_number(production, "production.grid", "grid")?,
            battery: optional_number(production, "production.battery", "battery")?,
        },
        consumption: Consumption {
            house: require_number(consumption, "consumption.house", "house")?,
            wallbox: optional_number(consumption, "consumption.wallbox", "wallbox")?,
            battery: optional_number(consumption, "consumption.battery", "battery")?,
        },
        state_of_charge: optional_number(object, "state_of_charge", "state_of_charge")?,
        system_status: object
            .get("system_status")
            .filter(|value| !value.is_null())
            .cloned(),
    })
}

fn as_object(payload: &Value) -> Result<&Map<String, Value>, ValidationError> {
    payload
        .as_object()
        .ok_or(ValidationError::InvalidPayloadType)
}

fn require_object<'a>(
    object: &'a Map<String, Value>,
    key: &'static str,
) -> Result<&'a Map<String, Value>, ValidationError> {
    match object.get(key) {
        Some(Value::Object(inner)) => Ok(inner),
        Some(_) => Err(ValidationError::InvalidField {
            field: key,
            reason: "expected an object",
        }),
        None => Err(ValidationError::MissingField(key)),
    }
}

fn require_str<'a>(
    object: &'a Map<String, Value>,
    key: &'static str,
) -> Result<&'a str, ValidationError> {
    match object.get(key) {
        Some(Value::String(text)) => Ok(text),
        Some(_) => Err(ValidationError::InvalidField {
            field: key,
            reason: "expected a string",
        }),
        None => Err(ValidationError::MissingField(key)),
    }
}

fn require_integer(object: &Map<String, Value>, key: &'static str) -> Result<i64, ValidationError> {
    match object.get(key) {
        Some(Value::Number(number)) => number.as_i64().ok_or(ValidationError::InvalidField {
            field: key,
            reason: "expected an integer",
        }),
        Some(_) => Err(ValidationError::InvalidField {
            field: key,
            reason: "expected an integer",
        }),
        None => Err(ValidationError::MissingField(key)),
    }
}

fn require_number(
    object: &Map<String, Value>,
    field: &'static str,
    key: &str,
) -> Result<f64, ValidationError> {
    optional_number(object, field, key)?.ok_or(ValidationError::MissingField(field))
}

fn optional_number(
    object: &Map<String, Value>,
    field: &'static str,
    key: &str,
) -> Result<Option<f64>, ValidationError> {
    match object.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(number)) => number
            .as_f64()
            .filter(|value| value.is_finite())
            .map(Some)
            .ok_or(ValidationError::InvalidField {
                field,
                reason: "expected a finite number",
            }),
        Some(_) => Err(ValidationError::InvalidField {
            field,
            reason: "expected a number",
        }),
    }
}

fn is_compact_jwt(token: &str) -> bool {
    let segments: Vec<&str> = token.split('.').collect();
    segments.len() == 3
        && segments.iter().all(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|char| char.is_ascii_alphanumeric() || char == '-' || char == '_')
        })
}
