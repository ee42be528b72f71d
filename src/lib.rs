pub mod client;
pub mod config;
pub mod geo;
pub mod incident;
pub mod incidents;
pub mod output;
pub mod ranker;
pub mod recommendations;
pub mod scoring;
pub mod server;
pub mod storage;
pub mod units;
