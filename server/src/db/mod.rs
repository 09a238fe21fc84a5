//! Database module for PostgreSQL persistence.

mod pool;
mod rows;
mod storage;

pub use pool::*;
pub use storage::PgStorage;
