pub mod config;
pub mod cycle;
pub mod engine;
pub mod errors;
pub mod generator;
pub mod logging;
pub mod notify;
pub mod schedule;
pub mod tracker;
pub mod util;
