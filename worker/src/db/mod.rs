//! Database module for SQLite persistence.

mod changes;
mod pool;

pub use changes::*;
pub use pool::*;
