//! Memory usage sampling

pub mod realtime;

pub use realtime::*;
