//! CLI Commands

pub mod device;
pub mod server;
pub mod trust;
pub mod user;
