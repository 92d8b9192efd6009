//! TOML descriptions of processes and process groups, launched through
//! `childproc-process`.
//!
//! ```toml
//! program = "server"
//! args = ["--port", "8080"]
//! cwd = "run"
//! stdout = "server.log"
//! stderr = "null"
//!
//! [env]
//! RUST_LOG = "info"
//! ```
//!
//! Relative `cwd`, stdio paths and programs containing a path separator are
//! resolved against the directory of the file they were loaded from.

mod diagnostics;
mod error;
mod launch;

pub use diagnostics::Diagnostic;
pub use diagnostics::TextPosition;
pub use diagnostics::TextRange;
pub use error::ConfigError;
pub use error::Result;
pub use launch::GroupConfig;
pub use launch::LaunchConfig;
pub use launch::StdioConfig;
