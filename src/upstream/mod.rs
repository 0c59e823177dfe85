//! External collaborators: the chat platform and the company directory.

pub mod chat;
pub mod directory;

pub use chat::{
    Attachment, ChatPlatform, DigisacClient, MessageKind, OutboundMessage, RemoteMessage,
    RemoteTicket,
};
pub use directory::{ChatContact, Company, CompanyContact, Directory, HttpDirectory};
