//! lazygit-llm - Generates commit messages from staged diffs through local AI CLI tools.
//!
//! # Overview
//!
//! lazygit-llm reads the staged diff, sends it to a locally installed AI CLI
//! (Claude Code or Gemini CLI) and prints a single cleaned commit message to
//! stdout, for use as a LazyGit custom command.

pub mod cli;
pub mod config;
pub mod error;
pub mod git;
pub mod provider;
pub mod retry;

// Re-export commonly used types
pub use cli::{CliProvider, ProcessOutcome};
pub use config::{AppConfig, ProviderConfig};
pub use error::{ConfigError, GitError, ProviderError};
pub use provider::{Provider, ProviderKind, ProviderRegistry};
