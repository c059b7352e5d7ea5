//! Real-time face redaction library

pub mod config;
pub mod error;
pub mod engine;
pub mod pipeline;
pub mod source;
pub mod session;
pub mod service;
pub mod storage;
pub mod api;
pub mod utils;

pub use config::Config;
