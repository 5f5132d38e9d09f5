//! First-party plugins.

pub mod devtools;
pub mod logger;

pub use devtools::{DevtoolsEvent, DevtoolsHook, devtools_plugin};
pub use logger::{LogSink, LoggerOptions, TracingSink, logger_plugin};
