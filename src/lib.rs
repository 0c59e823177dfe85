//! Support ledger — Digisac webhook reconciliation and the monthly
//! document-receipt conversation.

pub mod app;
pub mod config;
pub mod conversation;
pub mod error;
pub mod events;
pub mod ledger;
pub mod routes;
pub mod scheduler;
pub mod store;
pub mod upstream;

#[cfg(test)]
pub mod testing;
