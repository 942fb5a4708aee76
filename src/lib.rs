pub mod agent;
pub mod api;
pub mod auth;
pub mod client;
pub mod clock;
pub mod config;
pub mod devices;
pub mod dispatch;
pub mod gateway;
pub mod history;
pub mod logging;
