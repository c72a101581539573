pub mod auth;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod reaper;
pub mod seed;
pub mod service;
pub mod verification;
pub mod wal;
pub mod wire;
