#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::common::validate_text;
use crate::{ContractViolation, Validate};

pub const NOTIFICATION_TITLE_MAX_LEN: usize = 256;
pub const NOTIFICATION_BODY_MAX_LEN: usize = 4096;

/// Inbound push payload: `{ "notification": { "title": .., "body": .. } }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushMessage {
    pub notification: PushNotification,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushNotification {
    pub title: String,
    #[serde(default)]
    pub body: String,
}

impl PushMessage {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Result<Self, ContractViolation> {
        let m = Self {
            notification: PushNotification {
                title: title.into(),
                body: body.into(),
            },
        };
        m.validate()?;
        Ok(m)
    }
}

impl Validate for PushMessage {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_text(
            "push.notification.title",
            &self.notification.title,
            NOTIFICATION_TITLE_MAX_LEN,
        )?;
        // Body may be empty; platforms render title-only notifications.
        if self.notification.body.len() > NOTIFICATION_BODY_MAX_LEN {
            return Err(ContractViolation::InvalidRange {
                field: "push.notification.body",
                min: 0,
                max: NOTIFICATION_BODY_MAX_LEN as u64,
                got: self.notification.body.len() as u64,
            });
        }
        Ok(())
    }
}
