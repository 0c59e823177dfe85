//! Ledger domain types.

pub mod model;
pub mod period;

pub use model::{
    Control, ControlKey, ControlStatus, DasGrouping, GroupedDocument, Message, MessageStatus,
    NewControl, Ticket, TicketLink,
};
pub use period::Period;
