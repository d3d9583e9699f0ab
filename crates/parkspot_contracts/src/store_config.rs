#![forbid(unsafe_code)]

use std::fmt;

use crate::{ContractViolation, Validate};

/// Connection settings for the document store, fixed at build/deploy time.
#[derive(Clone, PartialEq, Eq)]
pub struct StoreConnectionConfig {
    pub project_id: String,
    pub api_key: String,
    pub sender_id: String,
}

impl StoreConnectionConfig {
    pub fn v1(
        project_id: impl Into<String>,
        api_key: impl Into<String>,
        sender_id: impl Into<String>,
    ) -> Result<Self, ContractViolation> {
        let c = Self {
            project_id: project_id.into(),
            api_key: api_key.into(),
            sender_id: sender_id.into(),
        };
        c.validate()?;
        Ok(c)
    }
}

impl fmt::Debug for StoreConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConnectionConfig")
            .field("project_id", &self.project_id)
            .field("api_key", &"<redacted>")
            .field("sender_id", &self.sender_id)
            .finish()
    }
}

impl Validate for StoreConnectionConfig {
    fn validate(&self) -> Result<(), ContractViolation> {
        let project_id = self.project_id.as_str();
        if project_id.is_empty() || project_id.len() > 64 {
            return Err(ContractViolation::InvalidValue {
                field: "store_connection.project_id",
                reason: "must be 1..=64 chars",
            });
        }
        if !project_id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(ContractViolation::InvalidValue {
                field: "store_connection.project_id",
                reason: "must be lowercase ascii, digits or '-'",
            });
        }
        if self.api_key.trim().is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "store_connection.api_key",
                reason: "must not be empty",
            });
        }
        if self.sender_id.is_empty() || !self.sender_id.chars().all(|c| c.is_ascii_digit()) {
            return Err(ContractViolation::InvalidValue {
                field: "store_connection.sender_id",
                reason: "must be numeric",
            });
        }
        Ok(())
    }
}
