pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod metrics;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
