#![forbid(unsafe_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use parkspot_contracts::notify::{PushMessage, PushNotification};
use parkspot_contracts::{ContractViolation, Validate};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Platform hook that actually puts a notification on screen.
pub trait NotificationSink: Send + Sync {
    fn show_notification(&self, title: &str, body: &str);
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageFocus {
    Focused,
    #[default]
    Background,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushOutcome {
    /// The page was not focused; the sink was asked to display it.
    Displayed,
    /// The page is in front; the message is queued in its [`PageChannel`] and nothing is displayed.
    DeliveredToPage,
}

pub const PAGE_INBOX_LIMIT: usize = 32;

/// One page's focus state and the payloads handed to it while focused.
#[derive(Debug, Default)]
pub struct PageChannel {
    focus: Mutex<PageFocus>,
    inbox: Mutex<VecDeque<PushNotification>>,
}

impl PageChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn focus(&self) -> PageFocus {
        *self
            .focus
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_focus(&self, focus: PageFocus) {
        *self
            .focus
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = focus;
    }

    fn deliver(&self, notification: PushNotification) {
        let mut inbox = self
            .inbox
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if inbox.len() == PAGE_INBOX_LIMIT {
            inbox.pop_front();
        }
        inbox.push_back(notification);
    }

    /// Drains the queued payloads, oldest first.
    pub fn take_messages(&self) -> Vec<PushNotification> {
        self.inbox
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain(..)
            .collect()
    }
}

/// Background worker: fire-and-forget translation of push payloads into
/// platform notifications. No acknowledgement or retry.
pub struct NotificationWorker {
    sink: Arc<dyn NotificationSink>,
}

impl NotificationWorker {
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Self { sink }
    }

    pub fn handle_push(
        &self,
        message: &PushMessage,
        page: &PageChannel,
    ) -> Result<PushOutcome, ContractViolation> {
        message.validate()?;
        let PushNotification { title, body } = &message.notification;
        match page.focus() {
            PageFocus::Background => {
                self.sink.show_notification(title, body);
                info!(title = title.as_str(), "background notification displayed");
                Ok(PushOutcome::Displayed)
            }
            PageFocus::Focused => {
                page.deliver(message.notification.clone());
                debug!(title = title.as_str(), "push delivered to focused page");
                Ok(PushOutcome::DeliveredToPage)
            }
        }
    }
}

pub const DISPLAYED_HISTORY_LIMIT: usize = 32;

/// Sink that keeps the most recent displayed notifications in memory.
#[derive(Debug, Default)]
pub struct MemoryNotificationSink {
    shown: Mutex<VecDeque<PushNotification>>,
}

impl MemoryNotificationSink {
    pub fn new_in_memory() -> Self {
        Self::default()
    }

    /// Oldest first.
    pub fn displayed(&self) -> Vec<PushNotification> {
        self.shown
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .cloned()
            .collect()
    }
}

impl NotificationSink for MemoryNotificationSink {
    fn show_notification(&self, title: &str, body: &str) {
        let mut shown = self
            .shown
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if shown.len() == DISPLAYED_HISTORY_LIMIT {
            shown.pop_front();
        }
        shown.push_back(PushNotification {
            title: title.to_string(),
            body: body.to_string(),
        });
    }
}
