//! Core optimizer logic

pub mod config;
pub mod controller;
pub mod error;
pub mod exclusions;
pub mod log;
pub mod optimizer;
