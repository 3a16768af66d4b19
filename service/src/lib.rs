//! Infrastructure shared by every sure-shot crate: command line / environment
//! configuration and terminal logging.

pub mod config;
pub mod logging;
