//! Per-tool invocation contracts.
//!
//! Everything that differs between supported CLIs lives in one
//! [`ToolCapability`] value, so the provider itself stays tool-agnostic.

use std::time::Duration;

use super::binary::{BinarySpec, EntryPoint, ResolvedBinary};
use super::runner::{OutputLimits, STDIN_THRESHOLD};

/// How the prompt reaches the child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptTransport {
    /// Always written to stdin.
    Stdin,
    /// Passed as the value of `flag`. Prompts above [`STDIN_THRESHOLD`] bytes
    /// are written to stdin and `flag` receives `stdin_value` instead.
    Flag {
        flag: &'static str,
        stdin_value: &'static str,
    },
}

/// A subcommand inserted only when the resolved binary has a given name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinarySubcommand {
    pub binary: &'static str,
    pub arg: &'static str,
}

/// Declarative description of one supported CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolCapability {
    /// Provider name used in config files.
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub binary: BinarySpec,
    pub subcommand: Option<BinarySubcommand>,
    pub model_flag: &'static str,
    pub fixed_flags: &'static [&'static str],
    pub prompt: PromptTransport,
    /// Variables forwarded from the caller's environment.
    pub credential_vars: &'static [&'static str],
    /// Variable that receives a configured `api_key`.
    pub api_key_var: &'static str,
    pub default_timeout: Duration,
    pub max_timeout: Duration,
    pub limits: OutputLimits,
}

/// Arguments and optional stdin payload for one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub args: Vec<String>,
    pub stdin: Option<String>,
}

pub const CLAUDE_CODE: ToolCapability = ToolCapability {
    name: "claude-code",
    aliases: &["claude"],
    binary: BinarySpec {
        tool: "claude-code",
        names: &["claude-code", "claude"],
        trusted_paths: &[
            "/usr/local/bin/claude-code",
            "/usr/bin/claude-code",
            "/opt/claude-code/bin/claude-code",
            "/usr/local/bin/claude",
            "/usr/bin/claude",
            "/opt/homebrew/bin/claude",
        ],
        entry_points: &[EntryPoint {
            file_name: "cli.js",
            package_dir: "/@anthropic-ai/claude-code/",
        }],
        install_hint: "Install Claude Code with `npm install -g @anthropic-ai/claude-code`, then run `claude login`",
    },
    subcommand: Some(BinarySubcommand {
        binary: "claude-code",
        arg: "chat",
    }),
    model_flag: "--model",
    fixed_flags: &["--print", "--output-format", "text"],
    prompt: PromptTransport::Stdin,
    credential_vars: &["ANTHROPIC_API_KEY", "CLAUDE_API_KEY"],
    api_key_var: "ANTHROPIC_API_KEY",
    default_timeout: Duration::from_secs(45),
    max_timeout: Duration::from_secs(600),
    limits: OutputLimits {
        max_stdout: 2 * 1024 * 1024,
        max_stderr: 1024 * 1024,
    },
};

pub const GEMINI_CLI: ToolCapability = ToolCapability {
    name: "gemini-cli",
    aliases: &["gemini"],
    binary: BinarySpec {
        tool: "gemini-cli",
        names: &["gemini"],
        trusted_paths: &[
            "/usr/local/bin/gemini",
            "/usr/bin/gemini",
            "/opt/homebrew/bin/gemini",
        ],
        entry_points: &[EntryPoint {
            file_name: "index.js",
            package_dir: "/@google/gemini-cli/",
        }],
        install_hint: "Install Gemini CLI with `npm install -g @google/gemini-cli`, then run `gemini` once to log in",
    },
    subcommand: None,
    model_flag: "-m",
    fixed_flags: &[],
    prompt: PromptTransport::Flag {
        flag: "--prompt",
        stdin_value: "-",
    },
    credential_vars: &["GEMINI_API_KEY", "GOOGLE_API_KEY", "GOOGLE_CLOUD_PROJECT"],
    api_key_var: "GEMINI_API_KEY",
    default_timeout: Duration::from_secs(30),
    max_timeout: Duration::from_secs(300),
    limits: OutputLimits {
        max_stdout: 1024 * 1024,
        max_stderr: 1024 * 1024,
    },
};

/// Every CLI this build knows how to drive.
pub const ALL_TOOLS: &[&ToolCapability] = &[&CLAUDE_CODE, &GEMINI_CLI];

impl ToolCapability {
    /// Whether `name` is this tool's name or an alias, ignoring case.
    pub fn answers_to(&self, name: &str) -> bool {
        let name = name.trim();
        self.name.eq_ignore_ascii_case(name)
            || self.aliases.iter().any(|a| a.eq_ignore_ascii_case(name))
    }

    /// Clamp a requested timeout to this tool's range; `None` selects the default.
    pub fn timeout(&self, requested: Option<Duration>) -> Duration {
        requested
            .unwrap_or(self.default_timeout)
            .clamp(Duration::from_secs(1), self.max_timeout)
    }

    /// Build argv (excluding the program) and the stdin payload.
    ///
    /// Order: `[subcommand] [model_flag model] fixed_flags [prompt]`.
    pub fn invocation(&self, binary: &ResolvedBinary, model: Option<&str>, prompt: String) -> Invocation {
        let mut args = Vec::new();

        if let Some(sub) = self.subcommand
            && binary.file_name() == sub.binary
        {
            args.push(sub.arg.to_string());
        }

        if let Some(model) = model.filter(|m| !m.trim().is_empty()) {
            args.push(self.model_flag.to_string());
            args.push(model.to_string());
        }

        args.extend(self.fixed_flags.iter().map(|f| f.to_string()));

        let stdin = match self.prompt {
            PromptTransport::Stdin => Some(prompt),
            PromptTransport::Flag { flag, stdin_value } => {
                args.push(flag.to_string());
                if prompt.len() > STDIN_THRESHOLD {
                    args.push(stdin_value.to_string());
                    Some(prompt)
                } else {
                    args.push(prompt);
                    None
                }
            }
        };

        Invocation { args, stdin }
    }
}
