pub mod auth;
pub mod config;
pub mod engine;
pub mod http;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod policy;
pub mod reaper;
pub mod service;
pub mod sql;
pub mod tls;
pub mod wal;
pub mod wire;
