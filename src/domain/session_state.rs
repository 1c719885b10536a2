use chrono::{DateTime, SecondsFormat, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimestampMs(pub i64);

impl TimestampMs {
    pub fn minus_days(self, days: u32) -> Self {
        Self(self.0 - i64::from(days) * 24 * 60 * 60 * 1000)
    }

    pub fn millis_since(self, earlier: TimestampMs) -> i64 {
        (self.0 - earlier.0).max(0)
    }

    pub fn to_rfc3339(self) -> String {
        let datetime = DateTime::<Utc>::from_timestamp_millis(self.0)
            .unwrap_or_else(|| DateTime::<Utc>::from(std::time::UNIX_EPOCH));
        datetime.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    pub fn parse_rfc3339(value: &str) -> Option<Self> {
        DateTime::parse_from_rfc3339(value)
            .ok()
            .map(|datetime| Self(datetime.timestamp_millis()))
    }
}

pub trait Clock {
    fn now(&self) -> TimestampMs;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> TimestampMs {
        TimestampMs(Utc::now().timestamp_millis())
    }
}

/// Lifecycle of a single device connection.
///
/// `Unauthenticated -> Authenticated -> Closed`; `Closed` is terminal and
/// every transition out of it is refused.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionPhase {
    #[default]
    Unauthenticated,
    Authenticated {
        device_id: String,
    },
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseTransition {
    Authenticated {
        device_id: String,
    },
    Rebound {
        previous_device_id: String,
        device_id: String,
    },
    Closed {
        /// Set when the connection had reached `Authenticated`, i.e. when
        /// session cleanup is owed.
        device_id: Option<String>,
    },
}

impl ConnectionPhase {
    pub fn new() -> Self {
        Self::Unauthenticated
    }

    pub fn authenticate(&mut self, device_id: String) -> Option<PhaseTransition> {
        match self {
            Self::Closed => None,
            Self::Unauthenticated => {
                *self = Self::Authenticated {
                    device_id: device_id.clone(),
                };
                Some(PhaseTransition::Authenticated { device_id })
            }
            Self::Authenticated {
                device_id: previous,
            } => {
                let previous_device_id = std::mem::replace(previous, device_id.clone());
                Some(PhaseTransition::Rebound {
                    previous_device_id,
                    device_id,
                })
            }
        }
    }

    pub fn close(&mut self) -> Option<PhaseTransition> {
        match std::mem::replace(self, Self::Closed) {
            Self::Closed => None,
            Self::Unauthenticated => Some(PhaseTransition::Closed { device_id: None }),
            Self::Authenticated { device_id } => Some(PhaseTransition::Closed {
                device_id: Some(device_id),
            }),
        }
    }

    pub fn device_id(&self) -> Option<&str> {
        match self {
            Self::Authenticated { device_id } => Some(device_id),
            _ => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated { .. })
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}
