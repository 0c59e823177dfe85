//! Inbound webhook events.

pub mod payload;
pub mod reconciler;

pub use payload::{Envelope, Event};
pub use reconciler::{Outcome, Reconciler};
