mod error;
mod routes;
mod server;
mod telemetry;
mod upload;

pub mod app;
pub mod config;
pub mod frame;
pub mod logging;
pub mod rule;
pub mod strategy;
pub mod worker;

pub use app::start_app;
