//! HTTP route handlers

pub mod devices;
pub mod reports;
