//! PostCodeMon common types and errors.
//!
//! This crate provides the types shared by the configuration and execution crates:
//! - The error taxonomy with stable codes and retry classification
//! - The immutable per-attempt execution result

pub mod error;
pub mod result;

pub use error::{Error, ErrorCategory, Result, StructuredError};
pub use result::{render_command, ProcessResult};
