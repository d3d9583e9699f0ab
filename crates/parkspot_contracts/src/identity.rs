#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::common::validate_text;
use crate::parking::DisplayName;
use crate::ContractViolation;

pub const USER_UID_MAX_LEN: usize = 128;

/// Stable unique id issued by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserUid(String);

impl UserUid {
    pub fn new(uid: impl Into<String>) -> Result<Self, ContractViolation> {
        let uid = uid.into();
        validate_text("identity.uid", &uid, USER_UID_MAX_LEN)?;
        Ok(Self(uid))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for UserUid {
    type Error = ContractViolation;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        UserUid::new(value)
    }
}

impl From<UserUid> for String {
    fn from(value: UserUid) -> Self {
        value.0
    }
}

/// Per-session identity. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub uid: UserUid,
    pub display_name: DisplayName,
}

impl Identity {
    pub fn new(uid: UserUid, display_name: DisplayName) -> Self {
        Self { uid, display_name }
    }
}

/// What the sign-in flow hands back to the provider once the user completes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignInRequest {
    pub display_name: DisplayName,
}
