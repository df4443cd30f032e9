//! Background workers

pub mod checkin;
pub mod log_shipper;
