pub mod aggregator;
pub mod api;
pub mod config;
pub mod connector;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod metrics;
pub mod runner;
