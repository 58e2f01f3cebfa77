pub mod config;
pub mod profile_manager;
