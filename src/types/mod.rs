//! Type definitions

pub mod campaign;
pub mod contact;
pub mod message;
pub mod messages;
pub mod waba;

pub use campaign::*;
pub use contact::*;
pub use message::*;
pub use messages::*;
pub use waba::*;
