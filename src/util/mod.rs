//! Ambient utilities: logging and (later) feature toggles.

pub mod log;

pub use log::Log;
