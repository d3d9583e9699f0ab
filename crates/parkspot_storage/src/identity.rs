#![forbid(unsafe_code)]

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use parkspot_contracts::identity::{Identity, SignInRequest, UserUid};
use sha2::{Digest, Sha256};
use tokio::sync::watch;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    #[error("sign-in cancelled by the user")]
    UserCancelled,
    #[error("identity provider unreachable: {0}")]
    NetworkError(String),
}

/// Client contract for the identity provider.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_in(&self, request: SignInRequest) -> Result<Identity, IdentityError>;

    async fn sign_out(&self);

    /// The receiver already holds the current identity and observes every later change.
    fn watch_identity(&self) -> watch::Receiver<Option<Identity>>;

    fn current_identity(&self) -> Option<Identity> {
        self.watch_identity().borrow().clone()
    }
}

/// In-process identity provider. Uids are derived from the display name, so the
/// same name always maps to the same identity.
#[derive(Debug)]
pub struct MemoryIdentityProvider {
    state: watch::Sender<Option<Identity>>,
    scripted_failures: Mutex<VecDeque<IdentityError>>,
}

impl Default for MemoryIdentityProvider {
    fn default() -> Self {
        let (state, _) = watch::channel(None);
        Self {
            state,
            scripted_failures: Mutex::new(VecDeque::new()),
        }
    }
}

impl MemoryIdentityProvider {
    pub fn new_in_memory() -> Self {
        Self::default()
    }

    /// Queues a failure for the next `sign_in` call.
    pub fn fail_next_sign_in(&self, err: IdentityError) {
        self.scripted_failures
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_back(err);
    }

    fn derive_uid(request: &SignInRequest) -> Result<UserUid, IdentityError> {
        let digest = Sha256::digest(request.display_name.as_str().as_bytes());
        let hex: String = digest.iter().take(12).map(|b| format!("{b:02x}")).collect();
        UserUid::new(format!("uid{hex}")).map_err(|e| IdentityError::NetworkError(e.to_string()))
    }
}

#[async_trait]
impl IdentityProvider for MemoryIdentityProvider {
    async fn sign_in(&self, request: SignInRequest) -> Result<Identity, IdentityError> {
        let scripted = self
            .scripted_failures
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front();
        if let Some(err) = scripted {
            return Err(err);
        }
        let identity = Identity::new(Self::derive_uid(&request)?, request.display_name);
        info!(uid = identity.uid.as_str(), "identity signed in");
        self.state.send_replace(Some(identity.clone()));
        Ok(identity)
    }

    async fn sign_out(&self) {
        if self.state.send_replace(None).is_some() {
            info!("identity signed out");
        }
    }

    fn watch_identity(&self) -> watch::Receiver<Option<Identity>> {
        self.state.subscribe()
    }
}
