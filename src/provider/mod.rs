//! Provider abstraction and registry.
//!
//! A provider turns a staged diff into a commit message. The registry maps
//! configured provider names to constructors and is built once at startup.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;

use crate::cli::binary::BinaryPolicy;
use crate::cli::capability::{ALL_TOOLS, ToolCapability};
use crate::cli::provider::{CliProvider, CliSettings};
use crate::config::ProviderConfig;
use crate::error::ProviderError;

/// A backend that can generate commit messages.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Configured provider name, e.g. `claude-code`.
    fn name(&self) -> &str;

    /// Generate a single-line commit message for `diff`.
    ///
    /// `prompt_template` must contain a `$diff` placeholder (`{diff}` is
    /// accepted for older configs).
    async fn generate_commit_message(
        &self,
        diff: &str,
        prompt_template: &str,
    ) -> Result<String, ProviderError>;

    /// Send a trivial prompt to check that the backend answers.
    ///
    /// `Ok(false)` means the backend is reachable but did not answer
    /// usefully. Missing credentials and launch failures are errors.
    async fn test_connection(&self) -> Result<bool, ProviderError>;

    fn supports_streaming(&self) -> bool {
        false
    }
}

/// How a provider talks to its model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    /// A local CLI tool.
    Cli,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Cli => "cli",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cli" => Ok(ProviderKind::Cli),
            other => Err(other.to_string()),
        }
    }
}

/// Name-to-constructor table for every available provider.
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    tools: Vec<&'static ToolCapability>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every CLI tool this build supports.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for tool in ALL_TOOLS {
            registry.register(tool);
        }
        registry
    }

    /// Add a tool. A tool with the same name replaces the earlier one.
    pub fn register(&mut self, tool: &'static ToolCapability) {
        self.tools.retain(|t| t.name != tool.name);
        self.tools.push(tool);
    }

    /// Registered provider names, in registration order.
    pub fn names(&self) -> Vec<&'static str> {
        self.tools.iter().map(|t| t.name).collect()
    }

    /// Look up a tool by name or alias, case-insensitively.
    pub fn get(&self, name: &str) -> Option<&'static ToolCapability> {
        self.tools.iter().copied().find(|tool| tool.answers_to(name))
    }

    /// Build the provider a config selects.
    ///
    /// # Errors
    ///
    /// `UnknownProvider` for unregistered names, otherwise whatever the
    /// provider constructor reports (`BinaryNotFound`, `UnsafeBinaryPath`).
    pub fn create(&self, config: &ProviderConfig) -> Result<Box<dyn Provider>, ProviderError> {
        match config.kind {
            ProviderKind::Cli => {
                let tool = self
                    .get(&config.name)
                    .ok_or_else(|| ProviderError::UnknownProvider {
                        name: config.name.clone(),
                        available: self.names().iter().map(|n| n.to_string()).collect(),
                    })?;

                let policy = BinaryPolicy {
                    blocked_segments: config.blocked_path_segments.clone(),
                    override_path: config.binary_path.clone(),
                    search_path: None,
                };
                let settings = CliSettings {
                    model: config.model_name.clone(),
                    timeout: tool.timeout(config.timeout),
                    api_key: config.api_key.clone(),
                    max_message_length: config.max_message_length,
                };

                Ok(Box::new(CliProvider::new(tool, &policy, settings)?))
            }
        }
    }
}
