//! linkgate: redirect resolution for password-protected, scheduled short links.

pub mod admin;
pub mod cache;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod jobs;
pub mod middleware_impls;
pub mod models;
pub mod rate_limit;
pub mod routes;
pub mod server;
pub mod services;
pub mod state;
pub mod store;
