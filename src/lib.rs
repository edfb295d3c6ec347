pub mod admin_log;
pub mod config;
pub mod house;
