//! Postgres adapter for the metadata registry.
//!
//! Implements [`mdr_core::store::RegistryStore`] over a `PgPool`; each unit
//! of work is a single transaction, with `SELECT ... FOR UPDATE` on the item
//! row serializing concurrent registrations of the same item.

pub mod config;
mod sqlx_types;
pub mod store;

pub use config::{mask_database_url, migrate, DatabaseConfig};
pub use store::{PgRegistryStore, PgUnitOfWork};
