//! Conversation workflow: reply classification, the decision procedure and
//! the effects it drives.

pub mod classifier;
pub mod machine;
pub mod outreach;
pub mod sweep;
pub mod texts;
pub mod workflow;

pub use outreach::{OutreachRequest, OutreachSummary};
pub use sweep::{AuditReport, enqueue_rechecks, spawn_recheck_ticker};
pub use workflow::Workflow;
