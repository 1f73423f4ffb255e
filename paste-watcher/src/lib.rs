pub mod config;
pub mod dedup;
pub mod handlers;
pub mod metrics;
pub mod metrics_consts;
pub mod poller;
pub mod processor;
pub mod source;
