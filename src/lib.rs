pub mod api;
pub mod config;
pub mod network_probe;
pub mod response;
pub mod services;
