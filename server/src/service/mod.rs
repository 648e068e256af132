//! Service layer
//!
//! Transport-independent execution engine: one-shot commands, interactive
//! terminals and the output bounding they share.

pub mod process;
pub mod pty;
pub mod truncate;
