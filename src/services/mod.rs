//! Business logic services

pub mod campaign;
pub mod meta;
pub mod notify;
pub mod rate_limit;
