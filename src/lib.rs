//! Library entrypoint: re‑export modules

pub mod api;
pub mod config;
pub mod db;
pub mod errors;
pub mod export;
pub mod flowmap;
pub mod industry;
pub mod loader;
pub mod metrics;
pub mod overview;
