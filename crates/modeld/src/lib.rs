//! Shot model service: HTTP surface and configuration of the model lifecycle

pub mod api;
pub mod config;
