//! Logging, chart generation and artifact persistence.

pub mod artifacts;
pub mod charts;
pub mod logging;
