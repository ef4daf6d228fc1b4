pub mod catalog;
pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod observability;
pub mod pricing;
pub mod service;
pub mod status;
pub mod time;
pub mod wal;
