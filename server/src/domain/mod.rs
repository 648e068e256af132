//! Domain model

pub mod types;
