#![forbid(unsafe_code)]

pub mod shell;
pub mod worker;

pub use shell::{CleanupPolicy, ParkingShell, ShellConfig, ShellError, ShellView};
pub use worker::{
    MemoryNotificationSink, NotificationSink, NotificationWorker, PageChannel, PageFocus,
    PushOutcome,
};
