//! Persistence layer — libSQL-backed ledger of tickets, messages and controls.

pub mod libsql_backend;
pub mod lookup;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use lookup::Lookup;
pub use traits::Database;
