//! Token privilege handling

pub mod privileges;
