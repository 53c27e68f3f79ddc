pub mod commands;
pub mod config;
pub mod db;
pub mod handlers;
pub mod kv;
pub mod messaging;
pub mod raffle;
pub mod ui;
pub mod utils;
