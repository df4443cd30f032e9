//! Trainer HTTP client

pub mod client;
pub mod trainer;
