//! Trainer API models

pub mod models;
