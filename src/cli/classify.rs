//! Classification of CLI process results into a closed set of failure categories.

use std::fmt;
use std::sync::LazyLock;

use regex_lite::Regex;

use super::runner::ProcessOutcome;

/// Confidence reported when a single pattern of a group matches.
pub const BASE_CONFIDENCE: f32 = 0.7;

/// Upper bound for corroborated matches.
pub const MAX_CONFIDENCE: f32 = 0.95;

/// Added for every additional pattern of the same group that matches.
const CONFIDENCE_STEP: f32 = 0.1;

const UNCLASSIFIED_CONFIDENCE: f32 = 0.5;

/// Outcome categories, from success to the unclassified fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Success,
    EmptyResponse,
    QuotaExceeded,
    AuthenticationRequired,
    NetworkError,
    /// Timeout reported by the tool itself, as opposed to the runner's deadline.
    Timeout,
    Unclassified,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Success => "success",
            Category::EmptyResponse => "empty_response",
            Category::QuotaExceeded => "quota_exceeded",
            Category::AuthenticationRequired => "authentication_required",
            Category::NetworkError => "network_error",
            Category::Timeout => "timeout",
            Category::Unclassified => "unclassified",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Category::Success => "The CLI completed successfully",
            Category::EmptyResponse => "The CLI exited successfully but printed nothing",
            Category::QuotaExceeded => "The provider's quota or rate limit was reached",
            Category::AuthenticationRequired => "The CLI is not authenticated",
            Category::NetworkError => "The CLI could not reach the provider",
            Category::Timeout => "The request timed out",
            Category::Unclassified => "The CLI failed for an unrecognized reason",
        }
    }

    pub fn suggested_action(&self) -> &'static str {
        match self {
            Category::Success => "No action needed",
            Category::EmptyResponse => "Retry, or check that the model name in the config is valid",
            Category::QuotaExceeded => {
                "Wait for the quota to reset (up to 24 hours) or switch to another provider"
            }
            Category::AuthenticationRequired => {
                "Log in with the CLI (e.g. `claude login`) or check the API key in the config"
            }
            Category::NetworkError => "Check your internet connection and proxy settings",
            Category::Timeout => {
                "Wait a moment and retry, or raise provider.timeout in the config"
            }
            Category::Unclassified => "Run with --verbose and check the CLI's own output",
        }
    }

    /// Credentials and unknown failures are never retried automatically.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Category::QuotaExceeded | Category::NetworkError | Category::Timeout
        )
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured result of classifying a process outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub category: Category,
    pub confidence: f32,
    pub message: &'static str,
    pub suggested_action: &'static str,
    pub retryable: bool,
}

impl Classification {
    fn new(category: Category, confidence: f32) -> Self {
        Self {
            category,
            confidence,
            message: category.message(),
            suggested_action: category.suggested_action(),
            retryable: category.is_retryable(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.category == Category::Success
    }
}

struct PatternGroup {
    category: Category,
    patterns: Vec<Regex>,
}

fn group(category: Category, patterns: &[&str]) -> PatternGroup {
    PatternGroup {
        category,
        patterns: patterns
            .iter()
            .map(|p| Regex::new(&format!("(?i){p}")).expect("Invalid regex"))
            .collect(),
    }
}

/// Pattern groups in priority order. Quota is checked before authentication:
/// some tools print a generic API error on quota exhaustion that also reads
/// like an auth failure.
static PATTERN_GROUPS: LazyLock<Vec<PatternGroup>> = LazyLock::new(|| {
    vec![
        group(
            Category::QuotaExceeded,
            &[
                r"\b429\b",
                r"too many requests",
                r"quota",
                r"rate[\s_-]?limit",
                r"resource[\s_-]?exhausted",
                r"usage limit",
                r"error when talking to \w+ api",
            ],
        ),
        group(
            Category::AuthenticationRequired,
            &[
                r"\b401\b",
                r"\b403\b",
                r"unauthori[sz]ed",
                r"forbidden",
                r"authenticat",
                r"api[\s_-]?key",
                r"not logged in|log ?in required|please (?:log ?in|run .*login)",
                r"invalid (?:credentials|token)",
            ],
        ),
        group(
            Category::NetworkError,
            &[
                r"network",
                r"connection (?:failed|refused|reset|error|closed)",
                r"connectivity",
                r"\bdns\b",
                r"socket",
                r"econnrefused|econnreset|enotfound|ehostunreach|getaddrinfo",
            ],
        ),
        group(
            Category::Timeout,
            &[r"timed?[\s_-]?out", r"deadline exceeded", r"etimedout"],
        ),
    ]
});

/// Classify a finished process.
///
/// Exit code 0 is a success unless stdout is blank. Any other exit code is
/// classified from the combined stdout and stderr text.
pub fn classify(outcome: &ProcessOutcome) -> Classification {
    if outcome.exit_code == 0 {
        return if outcome.stdout.trim().is_empty() {
            Classification::new(Category::EmptyResponse, 1.0)
        } else {
            Classification::new(Category::Success, 1.0)
        };
    }

    classify_text(&format!("{}\n{}", outcome.stdout, outcome.stderr))
}

/// Classify free-form failure text against the ordered pattern groups.
pub fn classify_text(text: &str) -> Classification {
    for group in PATTERN_GROUPS.iter() {
        let matches = group.patterns.iter().filter(|re| re.is_match(text)).count();
        if matches > 0 {
            return Classification::new(group.category, confidence_for(matches));
        }
    }

    Classification::new(Category::Unclassified, UNCLASSIFIED_CONFIDENCE)
}

fn confidence_for(matches: usize) -> f32 {
    let extra = matches.saturating_sub(1) as f32 * CONFIDENCE_STEP;
    (BASE_CONFIDENCE + extra).min(MAX_CONFIDENCE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn outcome(exit_code: i32, stdout: &str, stderr: &str) -> ProcessOutcome {
        ProcessOutcome {
            exit_code,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            duration: Duration::from_millis(10),
            stdout_truncated: false,
            stderr_truncated: false,
        }
    }

    #[test]
    fn test_exit_zero_with_output_is_success() {
        let c = classify(&outcome(0, "feat: add parser\n", ""));
        assert_eq!(c.category, Category::Success);
        assert!(c.is_success());
        assert_eq!(c.confidence, 1.0);
    }

    #[test]
    fn test_exit_zero_with_blank_stdout_is_empty_response() {
        for stdout in ["", "   ", "\n\n", "\t \r\n"] {
            let c = classify(&outcome(0, stdout, "some warning on stderr"));
            assert_eq!(c.category, Category::EmptyResponse, "stdout={stdout:?}");
            assert!(!c.retryable);
        }
    }

    #[test]
    fn test_scenario_authentication_failed() {
        let c = classify(&outcome(1, "", "Error: authentication failed"));
        assert_eq!(c.category, Category::AuthenticationRequired);
        assert!(!c.retryable);
        assert!(c.confidence >= BASE_CONFIDENCE);
    }

    #[test]
    fn test_scenario_429_is_quota() {
        let c = classify(&outcome(1, "", "429 Too Many Requests"));
        assert_eq!(c.category, Category::QuotaExceeded);
        assert!(c.retryable);
        assert!(c.confidence >= BASE_CONFIDENCE);
    }

    #[test]
    fn test_quota_wins_over_authentication() {
        let texts = [
            "401 Unauthorized: quota exceeded for this API key",
            "Authentication failed. RESOURCE_EXHAUSTED",
            "Error when talking to Gemini API: invalid api key",
            "403 Forbidden - rate limit exceeded",
        ];
        for text in texts {
            let c = classify(&outcome(1, text, ""));
            assert_eq!(c.category, Category::QuotaExceeded, "text={text}");
        }
    }

    #[test]
    fn test_case_insensitive_matching() {
        let c = classify(&outcome(2, "", "CONNECTION REFUSED by upstream"));
        assert_eq!(c.category, Category::NetworkError);
        let c = classify(&outcome(2, "", "Request Timed Out"));
        assert_eq!(c.category, Category::Timeout);
        assert!(c.retryable);
    }

    #[test]
    fn test_stdout_and_stderr_are_both_scanned() {
        let c = classify(&outcome(1, "dns resolution failed", ""));
        assert_eq!(c.category, Category::NetworkError);
        let c = classify(&outcome(1, "", "dns resolution failed"));
        assert_eq!(c.category, Category::NetworkError);
    }

    #[test]
    fn test_unknown_failure_is_unclassified() {
        let c = classify(&outcome(3, "", "segmentation fault"));
        assert_eq!(c.category, Category::Unclassified);
        assert!(!c.retryable);
        assert!(c.confidence < BASE_CONFIDENCE);
    }

    #[test]
    fn test_confidence_grows_with_corroborating_patterns_and_is_capped() {
        let single = classify_text("quota");
        let double = classify_text("quota exceeded: 429");
        let many = classify_text(
            "429 Too Many Requests: quota exceeded, rate limit hit, RESOURCE_EXHAUSTED, usage limit",
        );
        assert!((single.confidence - BASE_CONFIDENCE).abs() < f32::EPSILON);
        assert!(double.confidence > single.confidence);
        assert!(many.confidence <= MAX_CONFIDENCE);
        assert!(many.confidence >= double.confidence);
    }

    #[test]
    fn test_messages_and_actions_follow_category() {
        let c = classify_text("network error");
        assert_eq!(c.message, Category::NetworkError.message());
        assert_eq!(c.suggested_action, Category::NetworkError.suggested_action());
    }

    #[test]
    fn test_non_zero_exit_with_plain_output_is_unclassified() {
        let c = classify(&outcome(1, "feat: add parser", ""));
        assert_eq!(c.category, Category::Unclassified);
    }
}
