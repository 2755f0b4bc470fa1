/// Console + file logging built on `fern`.
pub mod logger_fern;

pub use logger_fern::{setup_logging, LogOptions};
