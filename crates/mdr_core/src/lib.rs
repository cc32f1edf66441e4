//! Metadata registry core.
//!
//! Registration status model, visibility engine and permission predicates
//! for an ISO/IEC 11179 registry, plus the storage ports the service runs
//! against. No sqlx here; the Postgres adapter lives in `mdr_postgres`.

pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod kinds;
pub mod memory;
pub mod perm_cache;
pub mod perms;
pub mod principal;
pub mod queryset;
pub mod service;
pub mod store;
pub mod temporal;
pub mod types;
pub mod visibility;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::RegistryConfig;
pub use error::RegistryError;
pub use events::{OutboxEvent, RegistryEvent};
pub use memory::MemoryStore;
pub use principal::Principal;
pub use service::RegistryService;
pub use store::{RegistryStore, UnitOfWork};
