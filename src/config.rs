//! Configuration file loading and validation.
//!
//! The file is TOML. Every string value may reference environment variables
//! as `${VAR}` or `${VAR:default}`; references to unset variables without a
//! default are left as written.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use regex_lite::{Captures, Regex};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::cli::binary::DEFAULT_BLOCKED_SEGMENTS;
use crate::cli::provider::DEFAULT_MAX_MESSAGE_LENGTH;
use crate::error::ConfigError;
use crate::provider::ProviderKind;
use crate::retry::DEFAULT_MAX_ATTEMPTS;

pub const DEFAULT_PROMPT_TEMPLATE: &str =
    "Generate a commit message for the following changes:\n\n$diff";

/// Staged diffs larger than this are truncated before prompting.
pub const DEFAULT_MAX_DIFF_BYTES: usize = 50_000;

const MAX_RETRY_ATTEMPTS: u32 = 10;

static ENV_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([^}:]+)(?::([^}]*))?\}").expect("Invalid regex")
});

/// Validated application configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub prompt_template: String,
    pub provider: ProviderConfig,
    pub git: GitConfig,
    pub retry: RetryConfig,
}

/// Validated `[provider]` table.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub name: String,
    pub model_name: Option<String>,
    /// `None` selects the tool's default.
    pub timeout: Option<Duration>,
    pub api_key: Option<String>,
    pub binary_path: Option<PathBuf>,
    pub max_message_length: usize,
    pub blocked_path_segments: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitConfig {
    pub max_diff_bytes: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    pub max_attempts: u32,
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    prompt_template: Option<String>,
    provider: Option<RawProvider>,
    #[serde(default)]
    git: RawGit,
    #[serde(default)]
    retry: RawRetry,
}

#[derive(Debug, Default, Deserialize)]
struct RawProvider {
    #[serde(rename = "type")]
    kind: Option<String>,
    name: Option<String>,
    model_name: Option<String>,
    timeout: Option<toml::Value>,
    api_key: Option<String>,
    binary_path: Option<String>,
    max_message_length: Option<toml::Value>,
    blocked_path_segments: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct RawGit {
    max_diff_bytes: Option<toml::Value>,
}

#[derive(Debug, Default, Deserialize)]
struct RawRetry {
    max_attempts: Option<toml::Value>,
}

/// Default config location: `<config dir>/lazygit-llm/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("lazygit-llm").join("config.toml"))
}

/// Read, expand and validate a config file.
pub fn load(path: &Path) -> Result<AppConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
        path: path.to_path_buf(),
        source,
    })?;
    debug!("Loaded config from {}", path.display());
    parse(&text)
}

/// Expand and validate config text.
pub fn parse(text: &str) -> Result<AppConfig, ConfigError> {
    let value: toml::Value = toml::from_str(text).map_err(ConfigError::ParseFailed)?;
    let raw = expand_env(value)
        .try_into::<RawConfig>()
        .map_err(ConfigError::ParseFailed)?;
    validate(raw)
}

/// Expand `${VAR}` and `${VAR:default}` in every string of a TOML tree.
pub fn expand_env(value: toml::Value) -> toml::Value {
    match value {
        toml::Value::String(s) => toml::Value::String(expand_str(&s)),
        toml::Value::Array(items) => {
            toml::Value::Array(items.into_iter().map(expand_env).collect())
        }
        toml::Value::Table(table) => toml::Value::Table(
            table
                .into_iter()
                .map(|(key, value)| (key, expand_env(value)))
                .collect(),
        ),
        other => other,
    }
}

fn expand_str(s: &str) -> String {
    ENV_REFERENCE
        .replace_all(s, |caps: &Captures| {
            let name = &caps[1];
            match (std::env::var(name), caps.get(2)) {
                (Ok(value), _) => value,
                (Err(_), Some(default)) => default.as_str().to_string(),
                (Err(_), None) => caps[0].to_string(),
            }
        })
        .into_owned()
}

fn validate(raw: RawConfig) -> Result<AppConfig, ConfigError> {
    let prompt_template = match raw.prompt_template {
        Some(t) if t.trim().is_empty() => {
            return Err(ConfigError::InvalidValue {
                field: "prompt_template",
                reason: "must not be empty".to_string(),
            });
        }
        Some(t) => t,
        None => DEFAULT_PROMPT_TEMPLATE.to_string(),
    };

    let provider = validate_provider(raw.provider.ok_or(ConfigError::MissingField("provider"))?)?;

    let max_diff_bytes = match raw.git.max_diff_bytes {
        Some(v) => positive(&v, "git.max_diff_bytes")? as usize,
        None => DEFAULT_MAX_DIFF_BYTES,
    };

    let max_attempts = match raw.retry.max_attempts {
        Some(v) => {
            let n = positive(&v, "retry.max_attempts")?;
            u32::try_from(n)
                .ok()
                .filter(|n| *n <= MAX_RETRY_ATTEMPTS)
                .ok_or_else(|| ConfigError::InvalidValue {
                    field: "retry.max_attempts",
                    reason: format!("must be between 1 and {MAX_RETRY_ATTEMPTS}"),
                })?
        }
        None => DEFAULT_MAX_ATTEMPTS,
    };

    Ok(AppConfig {
        prompt_template,
        provider,
        git: GitConfig { max_diff_bytes },
        retry: RetryConfig { max_attempts },
    })
}

fn validate_provider(raw: RawProvider) -> Result<ProviderConfig, ConfigError> {
    let kind = match raw.kind.as_deref().map(str::trim) {
        None | Some("") => ProviderKind::Cli,
        Some(kind) => kind
            .parse()
            .map_err(|_| ConfigError::UnsupportedProviderType(kind.to_string()))?,
    };

    let name = non_blank(raw.name).ok_or(ConfigError::MissingField("provider.name"))?;

    let timeout = raw
        .timeout
        .map(|v| positive(&v, "provider.timeout").map(Duration::from_secs))
        .transpose()?;

    let max_message_length = match raw.max_message_length {
        Some(v) => positive(&v, "provider.max_message_length")? as usize,
        None => DEFAULT_MAX_MESSAGE_LENGTH,
    };

    let api_key = non_blank(raw.api_key).and_then(|key| {
        if key.contains("${") {
            warn!("provider.api_key references an unset environment variable; ignoring it");
            None
        } else {
            Some(key)
        }
    });

    let binary_path = non_blank(raw.binary_path)
        .map(|p| expand_home(&p))
        .map(|p| {
            if p.is_absolute() {
                Ok(p)
            } else {
                Err(ConfigError::InvalidValue {
                    field: "provider.binary_path",
                    reason: format!("'{}' must be an absolute path", p.display()),
                })
            }
        })
        .transpose()?;

    let blocked_path_segments = match raw.blocked_path_segments {
        Some(segments) => {
            if segments.iter().any(|s| s.trim().is_empty()) {
                return Err(ConfigError::InvalidValue {
                    field: "provider.blocked_path_segments",
                    reason: "entries must not be empty".to_string(),
                });
            }
            segments
        }
        None => DEFAULT_BLOCKED_SEGMENTS.iter().map(|s| s.to_string()).collect(),
    };

    Ok(ProviderConfig {
        kind,
        name,
        model_name: non_blank(raw.model_name),
        timeout,
        api_key,
        binary_path,
        max_message_length,
        blocked_path_segments,
    })
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Accept a positive integer, or a string holding one (after env expansion).
fn positive(value: &toml::Value, field: &'static str) -> Result<u64, ConfigError> {
    let parsed = match value {
        toml::Value::Integer(n) => u64::try_from(*n).ok(),
        toml::Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    parsed.filter(|n| *n > 0).ok_or_else(|| ConfigError::InvalidValue {
        field,
        reason: format!("expected a positive integer, got {value}"),
    })
}

fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[provider]
name = "claude-code"
"#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse(MINIMAL).unwrap();

        assert_eq!(config.prompt_template, DEFAULT_PROMPT_TEMPLATE);
        assert_eq!(config.provider.kind, ProviderKind::Cli);
        assert_eq!(config.provider.name, "claude-code");
        assert_eq!(config.provider.model_name, None);
        assert_eq!(config.provider.timeout, None);
        assert_eq!(config.provider.max_message_length, 500);
        assert_eq!(config.provider.blocked_path_segments, vec!["/tmp/", "/var/tmp/"]);
        assert_eq!(config.git.max_diff_bytes, DEFAULT_MAX_DIFF_BYTES);
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn test_full_config() {
        let config = parse(
            r#"
prompt_template = "Summarize: {diff}"

[provider]
type = "cli"
name = "gemini-cli"
model_name = "gemini-2.5-flash"
timeout = 60
api_key = "literal-key"
binary_path = "/opt/gemini/bin/gemini"
max_message_length = 72
blocked_path_segments = ["/scratch/"]

[git]
max_diff_bytes = 1000

[retry]
max_attempts = 1
"#,
        )
        .unwrap();

        assert_eq!(config.prompt_template, "Summarize: {diff}");
        assert_eq!(config.provider.name, "gemini-cli");
        assert_eq!(config.provider.model_name.as_deref(), Some("gemini-2.5-flash"));
        assert_eq!(config.provider.timeout, Some(Duration::from_secs(60)));
        assert_eq!(config.provider.api_key.as_deref(), Some("literal-key"));
        assert_eq!(
            config.provider.binary_path,
            Some(PathBuf::from("/opt/gemini/bin/gemini"))
        );
        assert_eq!(config.provider.max_message_length, 72);
        assert_eq!(config.provider.blocked_path_segments, vec!["/scratch/"]);
        assert_eq!(config.git.max_diff_bytes, 1000);
        assert_eq!(config.retry.max_attempts, 1);
    }

    #[test]
    fn test_missing_provider_is_error() {
        let err = parse("prompt_template = \"x $diff\"").unwrap_err();
        assert!(matches!(err, ConfigError::MissingField("provider")));
    }

    #[test]
    fn test_missing_provider_name_is_error() {
        let err = parse("[provider]\nmodel_name = \"x\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::MissingField("provider.name")));
    }

    #[test]
    fn test_api_provider_type_is_rejected() {
        let err = parse("[provider]\ntype = \"api\"\nname = \"openai\"\n").unwrap_err();
        match err {
            ConfigError::UnsupportedProviderType(kind) => assert_eq!(kind, "api"),
            other => panic!("Expected UnsupportedProviderType, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let cases = [
            ("[provider]\nname = \"claude\"\ntimeout = 0\n", "provider.timeout"),
            ("[provider]\nname = \"claude\"\ntimeout = -5\n", "provider.timeout"),
            ("[provider]\nname = \"claude\"\ntimeout = \"soon\"\n", "provider.timeout"),
            ("[provider]\nname = \"claude\"\nbinary_path = \"bin/claude\"\n", "provider.binary_path"),
            ("[provider]\nname = \"claude\"\nblocked_path_segments = [\"\"]\n", "provider.blocked_path_segments"),
            ("[provider]\nname = \"claude\"\n[retry]\nmax_attempts = 50\n", "retry.max_attempts"),
            ("prompt_template = \"  \"\n[provider]\nname = \"claude\"\n", "prompt_template"),
        ];
        for (text, expected) in cases {
            match parse(text).unwrap_err() {
                ConfigError::InvalidValue { field, .. } => assert_eq!(field, expected),
                other => panic!("Expected InvalidValue for {expected}, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_malformed_toml_is_parse_error() {
        let err = parse("[provider\nname = ").unwrap_err();
        assert!(matches!(err, ConfigError::ParseFailed(_)));
    }

    #[test]
    fn test_env_expansion_with_set_variable() {
        temp_env::with_var("LAZYGIT_LLM_TEST_KEY", Some("sk-from-env"), || {
            let config = parse(
                "[provider]\nname = \"claude-code\"\napi_key = \"${LAZYGIT_LLM_TEST_KEY}\"\n",
            )
            .unwrap();
            assert_eq!(config.provider.api_key.as_deref(), Some("sk-from-env"));
        });
    }

    #[test]
    fn test_env_expansion_default_and_numeric_strings() {
        temp_env::with_var_unset("LAZYGIT_LLM_TEST_TIMEOUT", || {
            let config = parse(
                "[provider]\nname = \"claude-code\"\ntimeout = \"${LAZYGIT_LLM_TEST_TIMEOUT:90}\"\n",
            )
            .unwrap();
            assert_eq!(config.provider.timeout, Some(Duration::from_secs(90)));
        });
    }

    #[test]
    fn test_unset_variable_without_default_is_kept_and_api_key_ignored() {
        temp_env::with_var_unset("LAZYGIT_LLM_TEST_MISSING", || {
            assert_eq!(
                expand_str("key=${LAZYGIT_LLM_TEST_MISSING}"),
                "key=${LAZYGIT_LLM_TEST_MISSING}"
            );

            let config = parse(
                "[provider]\nname = \"claude-code\"\napi_key = \"${LAZYGIT_LLM_TEST_MISSING}\"\n",
            )
            .unwrap();
            assert_eq!(config.provider.api_key, None);
        });
    }

    #[test]
    fn test_expansion_reaches_nested_arrays() {
        temp_env::with_var("LAZYGIT_LLM_TEST_SEGMENT", Some("/scratch/"), || {
            let config = parse(
                "[provider]\nname = \"claude-code\"\nblocked_path_segments = [\"${LAZYGIT_LLM_TEST_SEGMENT}\", \"/tmp/\"]\n",
            )
            .unwrap();
            assert_eq!(
                config.provider.blocked_path_segments,
                vec!["/scratch/", "/tmp/"]
            );
        });
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load(&dir.path().join("config.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, MINIMAL).unwrap();

        let config = load(&path).unwrap();
        assert_eq!(config.provider.name, "claude-code");
    }

    #[test]
    fn test_home_expansion_in_binary_path() {
        temp_env::with_var("HOME", Some("/home/dev"), || {
            let config =
                parse("[provider]\nname = \"claude\"\nbinary_path = \"~/.local/bin/claude\"\n")
                    .unwrap();
            let path = config.provider.binary_path.unwrap();
            assert!(path.is_absolute());
            assert!(path.ends_with(".local/bin/claude"));
        });
    }
}
