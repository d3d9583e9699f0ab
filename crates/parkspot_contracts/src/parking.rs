#![forbid(unsafe_code)]

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::common::validate_text;
use crate::{ContractViolation, MonotonicTimeNs, SchemaVersion, Validate};

pub const PARKING_CONTRACT_VERSION: SchemaVersion = SchemaVersion(1);

/// Collection the application writes its log records into.
pub const DEFAULT_LOG_COLLECTION: &str = "logs";

pub const DISPLAY_NAME_MAX_LEN: usize = 128;
pub const LOG_ID_MAX_LEN: usize = 64;

/// Parking floor label. Only the fixed set in [`Floor::all`] is representable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Floor(u8);

impl Floor {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 5;

    pub const fn all() -> [Floor; 5] {
        [Floor(1), Floor(2), Floor(3), Floor(4), Floor(5)]
    }

    pub fn new(label: u8) -> Result<Self, ContractViolation> {
        if !(Self::MIN..=Self::MAX).contains(&label) {
            return Err(ContractViolation::InvalidRange {
                field: "log.floor",
                min: Self::MIN as u64,
                max: Self::MAX as u64,
                got: label as u64,
            });
        }
        Ok(Self(label))
    }

    pub const fn label(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for Floor {
    type Error = ContractViolation;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Floor::new(value)
    }
}

impl From<Floor> for u8 {
    fn from(value: Floor) -> Self {
        value.0
    }
}

impl fmt::Display for Floor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Direction {
    Left,
    Right,
}

impl Direction {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Left => "Left",
            Self::Right => "Right",
        }
    }

    pub const fn all() -> &'static [Self] {
        &[Self::Left, Self::Right]
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "left" => Some(Self::Left),
            "right" => Some(Self::Right),
            _ => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque record id, assigned by the store on insert.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LogId(String);

impl LogId {
    pub fn new(id: impl Into<String>) -> Result<Self, ContractViolation> {
        let id = id.into();
        validate_text("log.id", &id, LOG_ID_MAX_LEN)?;
        if !id.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ContractViolation::InvalidValue {
                field: "log.id",
                reason: "must be ascii alphanumeric",
            });
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for LogId {
    type Error = ContractViolation;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        LogId::new(value)
    }
}

impl From<LogId> for String {
    fn from(value: LogId) -> Self {
        value.0
    }
}

impl fmt::Display for LogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Display name of the signed-in identity, copied onto each record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DisplayName(String);

impl DisplayName {
    pub fn new(name: impl Into<String>) -> Result<Self, ContractViolation> {
        let name = name.into();
        validate_text("identity.display_name", &name, DISPLAY_NAME_MAX_LEN)?;
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for DisplayName {
    type Error = ContractViolation;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        DisplayName::new(value)
    }
}

impl From<DisplayName> for String {
    fn from(value: DisplayName) -> Self {
        value.0
    }
}

impl fmt::Display for DisplayName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fields supplied by the writer. `id` and `timestamp` are assigned by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecordInput {
    pub schema_version: SchemaVersion,
    pub floor: Floor,
    pub direction: Direction,
    pub user: DisplayName,
}

impl LogRecordInput {
    pub fn v1(floor: Floor, direction: Direction, user: DisplayName) -> Self {
        Self {
            schema_version: PARKING_CONTRACT_VERSION,
            floor,
            direction,
            user,
        }
    }
}

impl Validate for LogRecordInput {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.schema_version != PARKING_CONTRACT_VERSION {
            return Err(ContractViolation::InvalidValue {
                field: "log_record_input.schema_version",
                reason: "must match PARKING_CONTRACT_VERSION",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub schema_version: SchemaVersion,
    pub id: LogId,
    pub floor: Floor,
    pub direction: Direction,
    pub user: DisplayName,
    pub timestamp: MonotonicTimeNs,
}

impl LogRecord {
    pub fn from_input(id: LogId, input: LogRecordInput, timestamp: MonotonicTimeNs) -> Self {
        Self {
            schema_version: input.schema_version,
            id,
            floor: input.floor,
            direction: input.direction,
            user: input.user,
            timestamp,
        }
    }

    /// Whether this record carries the same payload as `input`, ignoring id and time.
    pub fn matches_input(&self, input: &LogRecordInput) -> bool {
        self.floor == input.floor && self.direction == input.direction && self.user == input.user
    }
}

impl Validate for LogRecord {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.schema_version != PARKING_CONTRACT_VERSION {
            return Err(ContractViolation::InvalidValue {
                field: "log_record.schema_version",
                reason: "must match PARKING_CONTRACT_VERSION",
            });
        }
        if self.timestamp.0 == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "log_record.timestamp",
                reason: "must be assigned by the store",
            });
        }
        Ok(())
    }
}
