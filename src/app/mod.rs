pub mod adb;
pub mod build_provider;
pub mod campaign;
pub mod command_tree;
pub mod commands;
pub mod config;
pub mod console;
pub mod device_status;
pub mod error;
pub mod job_pool;
pub mod logging;
pub mod models;
pub mod placeholders;
pub mod session;
pub mod state;
pub mod vti;
