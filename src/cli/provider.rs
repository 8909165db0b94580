//! Provider implementation that drives a local AI CLI.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::binary::{BinaryPolicy, ResolvedBinary, resolve};
use super::capability::ToolCapability;
use super::classify::{Category, Classification, classify};
use super::extract::{clean, limit_length};
use super::runner::{
    ProcessExecutor, ProcessOutcome, ProcessRequest, SecureRunner, build_environment,
    floor_char_boundary, snapshot_env,
};
use crate::error::ProviderError;
use crate::provider::Provider;

/// Prompts are cut to this many bytes before they reach the CLI.
pub const MAX_PROMPT_BYTES: usize = 100_000;

/// Default cap on the returned message, in characters.
pub const DEFAULT_MAX_MESSAGE_LENGTH: usize = 500;

pub const CONNECTION_TEST_PROMPT: &str =
    "Hello, this is a connection test. Please respond with just 'OK'.";

pub const CONNECTION_TEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Longest excerpt of CLI output carried in an error.
const DETAIL_CHARS: usize = 300;

/// Per-instance settings, already validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliSettings {
    pub model: Option<String>,
    pub timeout: Duration,
    /// Forwarded as the tool's API key variable. Never logged.
    pub api_key: Option<String>,
    pub max_message_length: usize,
}

impl CliSettings {
    /// Defaults for a tool: no model override, the tool's default timeout.
    pub fn for_tool(capability: &ToolCapability) -> Self {
        Self {
            model: None,
            timeout: capability.default_timeout,
            api_key: None,
            max_message_length: DEFAULT_MAX_MESSAGE_LENGTH,
        }
    }
}

/// A [`Provider`] backed by a resolved CLI binary.
pub struct CliProvider {
    capability: &'static ToolCapability,
    binary: ResolvedBinary,
    settings: CliSettings,
    executor: Box<dyn ProcessExecutor>,
}

impl std::fmt::Debug for CliProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CliProvider")
            .field("tool", &self.capability.name)
            .field("binary", &self.binary)
            .field("model", &self.settings.model)
            .field("timeout", &self.settings.timeout)
            .finish_non_exhaustive()
    }
}

impl CliProvider {
    /// Resolve the tool's binary and build a provider around it.
    ///
    /// # Errors
    ///
    /// `BinaryNotFound` or `UnsafeBinaryPath` when no safe executable exists.
    pub fn new(
        capability: &'static ToolCapability,
        policy: &BinaryPolicy,
        settings: CliSettings,
    ) -> Result<Self, ProviderError> {
        let binary = resolve(&capability.binary, policy)?;
        info!(
            "Initialized {} provider: binary={}, model={}, timeout={}s",
            capability.name,
            binary.path().display(),
            settings.model.as_deref().unwrap_or("(tool default)"),
            settings.timeout.as_secs()
        );
        let executor = Box::new(SecureRunner::new(capability.name));
        Ok(Self::with_executor(capability, binary, settings, executor))
    }

    /// Build a provider with a custom executor.
    pub fn with_executor(
        capability: &'static ToolCapability,
        binary: ResolvedBinary,
        settings: CliSettings,
        executor: Box<dyn ProcessExecutor>,
    ) -> Self {
        let settings = CliSettings {
            timeout: capability.timeout(Some(settings.timeout)),
            ..settings
        };
        Self {
            capability,
            binary,
            settings,
            executor,
        }
    }

    pub fn binary(&self) -> &ResolvedBinary {
        &self.binary
    }

    pub fn settings(&self) -> &CliSettings {
        &self.settings
    }

    fn environment(&self) -> BTreeMap<String, String> {
        let mut overrides = BTreeMap::new();
        if let Some(key) = &self.settings.api_key {
            overrides.insert(self.capability.api_key_var.to_string(), key.clone());
        }
        build_environment(&snapshot_env(), self.capability.credential_vars, &overrides)
    }

    fn request(&self, prompt: String, timeout: Duration) -> ProcessRequest {
        let invocation =
            self.capability
                .invocation(&self.binary, self.settings.model.as_deref(), prompt);
        let request = ProcessRequest::new(
            self.binary.path(),
            invocation.args,
            self.environment(),
            timeout,
        )
        .with_limits(self.capability.limits);

        match invocation.stdin {
            Some(payload) => request.with_stdin(payload),
            None => request,
        }
    }

    /// Run one prompt and return raw stdout of a successful call.
    async fn execute(&self, prompt: String, timeout: Duration) -> Result<String, ProviderError> {
        let outcome = self.executor.run(self.request(prompt, timeout)).await?;
        let classification = classify(&outcome);

        if classification.is_success() {
            return Ok(outcome.stdout);
        }

        debug!(
            "{} call classified as {} (confidence {:.2})",
            self.capability.name, classification.category, classification.confidence
        );
        Err(self.error_for(&classification, &outcome))
    }

    fn error_for(&self, classification: &Classification, outcome: &ProcessOutcome) -> ProviderError {
        let tool = self.capability.name.to_string();
        let detail = failure_detail(outcome);

        match classification.category {
            Category::QuotaExceeded => ProviderError::QuotaExceeded { tool, detail },
            Category::AuthenticationRequired => {
                ProviderError::AuthenticationRequired { tool, detail }
            }
            Category::NetworkError => ProviderError::NetworkError { tool, detail },
            Category::Timeout => ProviderError::Timeout {
                tool,
                limit: None,
                detail,
            },
            Category::EmptyResponse => ProviderError::EmptyResponse { tool },
            Category::Success | Category::Unclassified => ProviderError::Unclassified {
                tool,
                exit_code: outcome.exit_code,
                detail,
            },
        }
    }
}

#[async_trait]
impl Provider for CliProvider {
    fn name(&self) -> &str {
        self.capability.name
    }

    async fn generate_commit_message(
        &self,
        diff: &str,
        prompt_template: &str,
    ) -> Result<String, ProviderError> {
        let prompt = build_prompt(prompt_template, diff)?;
        debug!(
            "Sending {} byte prompt to {}",
            prompt.len(),
            self.capability.name
        );

        let start = Instant::now();
        let stdout = self.execute(prompt, self.settings.timeout).await?;

        let message = clean(&stdout);
        if message.is_empty() {
            return Err(ProviderError::EmptyResponse {
                tool: self.capability.name.to_string(),
            });
        }
        let message = limit_length(&message, self.settings.max_message_length);

        info!(
            "{} generated a {} character message in {:.1}s",
            self.capability.name,
            message.chars().count(),
            start.elapsed().as_secs_f64()
        );
        Ok(message)
    }

    async fn test_connection(&self) -> Result<bool, ProviderError> {
        let timeout = self.capability.timeout(Some(CONNECTION_TEST_TIMEOUT));
        match self.execute(CONNECTION_TEST_PROMPT.to_string(), timeout).await {
            Ok(stdout) => Ok(!clean(&stdout).is_empty()),
            Err(e @ ProviderError::AuthenticationRequired { .. }) => Err(e),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!("{} connection test failed: {}", self.capability.name, e);
                Ok(false)
            }
        }
    }
}

/// Fill the template with the diff and sanitize the result.
///
/// `$diff`, `${diff}` and the legacy `{diff}` are substituted. A template
/// without a placeholder gets the diff appended after a blank line.
pub fn build_prompt(template: &str, diff: &str) -> Result<String, ProviderError> {
    if diff.trim().is_empty() {
        return Err(ProviderError::InvalidRequest(
            "the diff is empty; stage some changes first".to_string(),
        ));
    }
    if template.trim().is_empty() {
        return Err(ProviderError::InvalidRequest(
            "the prompt template is empty".to_string(),
        ));
    }

    let template = template.replace("${diff}", "$diff").replace("{diff}", "$diff");
    let prompt = if template.contains("$diff") {
        template.replace("$diff", diff)
    } else {
        format!("{template}\n\n{diff}")
    };

    let mut prompt = prompt.replace('\0', "");
    if prompt.len() > MAX_PROMPT_BYTES {
        warn!(
            "Prompt is {} bytes, truncating to {}",
            prompt.len(),
            MAX_PROMPT_BYTES
        );
        prompt.truncate(floor_char_boundary(&prompt, MAX_PROMPT_BYTES));
    }

    Ok(prompt)
}

fn failure_detail(outcome: &ProcessOutcome) -> String {
    let stderr = outcome.stderr.trim();
    let source = if stderr.is_empty() {
        outcome.stdout.trim()
    } else {
        stderr
    };

    if source.is_empty() {
        return "no output".to_string();
    }
    let mut detail: String = source.chars().take(DETAIL_CHARS).collect();
    if source.chars().count() > DETAIL_CHARS {
        detail.push_str("...");
    }
    detail
}
