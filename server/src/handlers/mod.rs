//! Request handlers for content operations.

mod operation;
mod schema;

pub use operation::*;
pub use schema::*;
