#![forbid(unsafe_code)]

pub mod identity;
pub mod store;

pub use identity::{IdentityError, IdentityProvider, MemoryIdentityProvider};
pub use store::{DocumentStore, LiveQuery, MemoryDocumentStore, StorageError, StoreCounters};
