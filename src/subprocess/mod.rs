//! Subprocess abstraction layer.
//!
//! External tools are launched through the [`ProcessRunner`] trait so that
//! tests can substitute a [`MockProcessRunner`] with expectations and a
//! call history. The production [`TokioProcessRunner`] runs each command
//! line through `sh -c`, since pipeline commands routinely contain shell
//! redirections.

pub mod error;
pub mod mock;
pub mod runner;


pub use error::ProcessError;
pub use mock::{MockCommandConfig, MockProcessRunner};
pub use runner::{ExitStatus, ProcessCommand, ProcessOutput, ProcessRunner, TokioProcessRunner};
