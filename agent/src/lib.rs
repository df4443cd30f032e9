//! hostd library
//!
//! Host agent that reconciles local containers against the changes issued by
//! a remote trainer.

pub mod app;
pub mod checkin;
pub mod correlator;
pub mod engine;
pub mod errors;
pub mod filesys;
pub mod health;
pub mod http;
pub mod logs;
pub mod logship;
pub mod reconcile;
pub mod server;
pub mod storage;
pub mod telemetry;
pub mod utils;
pub mod workers;
