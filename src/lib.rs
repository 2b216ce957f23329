pub mod analysis;
pub mod cache;
pub mod commands;
pub mod config;
pub mod models;
pub mod remote;
pub mod services;
pub mod sync;
