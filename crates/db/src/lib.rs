//! `db` crate — the persistence collaborator of the DAG core.
//!
//! Provides typed row structs, the [`DefinitionStore`] contract, an
//! in-memory store for tests, and a Postgres store built on repository
//! functions. No business logic lives here.

pub mod error;
pub mod memory;
pub mod models;
pub mod pool;
pub mod postgres;
pub mod repository;
pub mod store;

pub use error::DbError;
pub use memory::MemoryDefinitionStore;
pub use pool::{DbPool, PoolSettings};
pub use postgres::PgDefinitionStore;
pub use store::{DefinitionStore, VersionSnapshot};
