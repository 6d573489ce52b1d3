pub mod commands;
pub mod config;
pub mod db;
pub mod github;
pub mod handlers;
pub mod model;
pub mod monitor;
pub mod notifier;
