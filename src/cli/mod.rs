//! CLI-backed provider subsystem.
//!
//! - [`binary`]: locate and verify the tool executable
//! - [`runner`]: run it with a minimal environment, a deadline and bounded output
//! - [`classify`]: map exit code and output to a failure category
//! - [`extract`]: reduce raw output to one commit message line
//! - [`capability`]: per-tool argv and environment contract
//! - [`provider`]: the [`crate::provider::Provider`] implementation tying them together

pub mod binary;
pub mod capability;
pub mod classify;
pub mod extract;
pub mod provider;
pub mod runner;

pub use binary::{BinaryPolicy, BinarySpec, EntryPoint, ResolvedBinary, resolve};
pub use capability::{CLAUDE_CODE, GEMINI_CLI, ToolCapability};
pub use classify::{Category, Classification, classify};
pub use extract::clean;
pub use provider::{CliProvider, CliSettings};
pub use runner::{ProcessExecutor, ProcessOutcome, ProcessRequest, SecureRunner};
