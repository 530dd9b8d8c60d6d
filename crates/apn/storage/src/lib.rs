//! APN Storage Layer
//!
//! Backlog, device and app storage consumed by the delivery engine, with an
//! in-memory implementation and a Diesel/SQLite one.

mod memory;
mod models;
mod schema;
mod sqlite;
mod traits;

pub use memory::MemoryStorage;
pub use models::*;
pub use sqlite::SqliteStorage;
pub use traits::*;

use diesel_migrations::{EmbeddedMigrations, embed_migrations};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");
