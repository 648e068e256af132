//! Infrastructure layer
//!
//! OS-facing building blocks shared by the execution services.

pub mod process_group;
pub mod task;
pub mod terminal_registry;
