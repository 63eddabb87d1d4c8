//! Common infrastructure for QuartzDB: errors, constants, logging.

pub mod constants;
pub mod error;
pub mod logging;

pub use error::{QuartzError, QuartzResult};
