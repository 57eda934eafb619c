//! Database module for PostgreSQL connectivity
//!
//! The pool is shared by schema introspection and query execution.

pub mod connection;

pub use connection::{init_pool, DbPool};
