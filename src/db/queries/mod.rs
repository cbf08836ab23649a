//! Database queries

pub mod campaign;
pub mod campaign_contact;
pub mod contact;
pub mod message;
pub mod template;
pub mod waba;
