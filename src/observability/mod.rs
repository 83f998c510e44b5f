//! Observability for the sensor node: structured logging and span macros

pub mod logging;

pub use logging::{init_default_logging, init_logging, parse_level, LogFormat};

// Span macros for structured logging
pub use logging::{broker_span, clock_span, link_span, supervisor_span};
