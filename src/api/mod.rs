//! API module - REST control surface

pub mod rest;
pub mod dto;

pub use rest::{create_rest_router, AppState};
