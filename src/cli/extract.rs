//! Extraction of a single commit message from free-form CLI output.
//!
//! CLI tools wrap their answer in terminal escapes, status chatter, labels,
//! quotes and markdown fences. [`clean`] peels those layers off and keeps one
//! line.

use std::sync::LazyLock;

use regex_lite::Regex;

/// Lines starting with any of these are tool chatter, not model output.
pub const NOISE_PREFIXES: &[&str] = &[
    "Loaded cached credentials",
    "Data collection is disabled",
    "Full report available at:",
    "Error when talking to Gemini API",
];

const QUOTE_PAIRS: &[(char, char)] = &[
    ('"', '"'),
    ('\'', '\''),
    ('`', '`'),
    ('\u{201C}', '\u{201D}'),
    ('\u{2018}', '\u{2019}'),
    ('\u{300C}', '\u{300D}'),
    ('\u{300E}', '\u{300F}'),
];

const FENCE: &str = "```";

static ANSI: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b\[[0-?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[@-Z\\-_]")
        .expect("Invalid regex")
});

const LABELS: &str = r"(?:here(?:'s| is) (?:the |a |your )?(?:suggested |generated )?commit message|suggested commit message|generated commit message|commit message)";

static LEADING_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)^(?:{LABELS}[ \t]*(?:[:\-\x{{2013}}\x{{2014}}]|\n)[ \t]*|git commit -m[ \t]+)"
    ))
    .expect("Invalid regex")
});

static LABEL_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)^(?:{LABELS}[ \t]*[:\-\x{{2013}}\x{{2014}}]?|git commit -m)$"
    ))
    .expect("Invalid regex")
});

static FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[^\n`]*\n(.*?)```").expect("Invalid regex")
});

static HORIZONTAL_SPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t\x{00A0}]+").expect("Invalid regex"));

/// Reduce raw CLI stdout to a single message line.
///
/// Returns an empty string when nothing usable remains. Applying `clean`
/// to its own output returns it unchanged.
pub fn clean(raw: &str) -> String {
    // A pass never grows the text, and a pass that keeps its length only
    // rewrites whitespace, so the fixpoint comes within `raw.len() + 1` passes.
    let mut current = raw.to_string();
    for _ in 0..=raw.len() {
        let next = clean_once(&current);
        if next == current {
            break;
        }
        current = next;
    }
    current
}

fn clean_once(text: &str) -> String {
    let text = strip_noise(text);
    let text = strip_label(text.trim());
    let text = strip_quotes(text.trim());
    let text = unwrap_fence(text.trim());
    let text = normalize_whitespace(&text);
    select_line(&text)
}

fn strip_noise(text: &str) -> String {
    let text = ANSI.replace_all(text, "");
    text.lines()
        .filter(|line| {
            let line = line.trim_start();
            !NOISE_PREFIXES.iter().any(|prefix| line.starts_with(prefix))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn strip_label(text: &str) -> &str {
    match LEADING_LABEL.find(text) {
        Some(m) => &text[m.end()..],
        None => text,
    }
}

fn strip_quotes(text: &str) -> &str {
    if text.starts_with(FENCE) {
        return text;
    }
    for (open, close) in QUOTE_PAIRS {
        if let Some(inner) = text
            .strip_prefix(*open)
            .and_then(|rest| rest.strip_suffix(*close))
        {
            return inner;
        }
    }
    text
}

/// Replace the text with the body of its fenced block if it has exactly one.
fn unwrap_fence(text: &str) -> String {
    let mut blocks = FENCED_BLOCK.captures_iter(text);
    match (blocks.next(), blocks.next()) {
        (Some(only), None) => only
            .get(1)
            .map(|body| body.as_str().to_string())
            .unwrap_or_default(),
        _ => text.to_string(),
    }
}

fn normalize_whitespace(text: &str) -> String {
    text.lines()
        .map(|line| HORIZONTAL_SPACE.replace_all(line, " ").trim().to_string())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn select_line(text: &str) -> String {
    let is_residual = |line: &&str| line.starts_with(FENCE) || LABEL_LINE.is_match(line);
    text.lines()
        .find(|line| !is_residual(line))
        .or_else(|| text.lines().next())
        .unwrap_or_default()
        .to_string()
}

/// Enforce a character budget on a message.
///
/// Over-long messages are cut to `max_chars - 3`, backed up to the last
/// space when that keeps at least 70% of the budget, stripped of trailing
/// punctuation, and suffixed with `...`.
pub fn limit_length(message: &str, max_chars: usize) -> String {
    if message.chars().count() <= max_chars {
        return message.to_string();
    }
    if max_chars <= 3 {
        return message.chars().take(max_chars).collect();
    }

    let budget = max_chars - 3;
    let mut cut: String = message.chars().take(budget).collect();
    if let Some(space) = cut.rfind(' ')
        && cut[..space].chars().count() > budget * 7 / 10
    {
        cut.truncate(space);
    }

    let trimmed = cut
        .trim_end_matches(['.', ',', '!', '?', ';', ':'])
        .trim_end();
    format!("{trimmed}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fenced_block_is_unwrapped() {
        assert_eq!(clean("```\nfeat: add parser\n```"), "feat: add parser");
        assert_eq!(clean("```text\nfeat: add parser\n```\n"), "feat: add parser");
    }

    #[test]
    fn test_plain_message_passes_through() {
        assert_eq!(clean("fix: handle empty diff\n"), "fix: handle empty diff");
    }

    #[test]
    fn test_ansi_sequences_are_removed() {
        let raw = "\x1b[1m\x1b[32mfeat: colored output\x1b[0m\n\x1b]0;title\x07";
        assert_eq!(clean(raw), "feat: colored output");
    }

    #[test]
    fn test_noise_lines_are_dropped() {
        let raw = "Loaded cached credentials.\nData collection is disabled.\nfeat: add cache\n";
        assert_eq!(clean(raw), "feat: add cache");
    }

    #[test]
    fn test_labels_are_stripped() {
        let cases = [
            ("Commit message: feat: add parser", "feat: add parser"),
            ("commit message - fix: typo", "fix: typo"),
            ("Here is the commit message:\nfeat: add parser", "feat: add parser"),
            ("Here's the suggested commit message: docs: update readme", "docs: update readme"),
            ("Suggested commit message - chore: bump deps", "chore: bump deps"),
            ("git commit -m \"feat: add parser\"", "feat: add parser"),
        ];
        for (raw, expected) in cases {
            assert_eq!(clean(raw), expected, "raw={raw:?}");
        }
    }

    #[test]
    fn test_label_words_inside_message_are_kept() {
        assert_eq!(
            clean("docs: explain commit message format"),
            "docs: explain commit message format"
        );
    }

    #[test]
    fn test_quotes_are_stripped() {
        let cases = [
            ("\"feat: add parser\"", "feat: add parser"),
            ("'feat: add parser'", "feat: add parser"),
            ("`feat: add parser`", "feat: add parser"),
            ("\u{201C}feat: add parser\u{201D}", "feat: add parser"),
            ("\u{300C}feat: add parser\u{300D}", "feat: add parser"),
        ];
        for (raw, expected) in cases {
            assert_eq!(clean(raw), expected, "raw={raw:?}");
        }
    }

    #[test]
    fn test_unbalanced_quote_is_kept() {
        assert_eq!(clean("\"feat: add parser"), "\"feat: add parser");
    }

    #[test]
    fn test_label_then_fence() {
        let raw = "Commit message:\n```\nfeat: add parser\n```";
        assert_eq!(clean(raw), "feat: add parser");
    }

    #[test]
    fn test_whitespace_is_collapsed_and_first_line_selected() {
        let raw = "\n\n  feat:   add    parser  \n\n- detail one\n";
        assert_eq!(clean(raw), "feat: add parser");
    }

    #[test]
    fn test_residual_label_line_is_skipped() {
        let raw = "Commit message:\n\nfeat: add parser";
        assert_eq!(clean(raw), "feat: add parser");
    }

    #[test]
    fn test_multiple_fences_fall_back_to_first_content_line() {
        let raw = "```\nfeat: one\n```\n```\nfeat: two\n```";
        assert_eq!(clean(raw), "feat: one");
    }

    #[test]
    fn test_blank_and_noise_only_output_is_empty() {
        assert_eq!(clean(""), "");
        assert_eq!(clean("   \n\t\n"), "");
        assert_eq!(clean("Loaded cached credentials.\n"), "");
    }

    #[test]
    fn test_clean_is_idempotent() {
        let inputs = [
            "```\nfeat: add parser\n```",
            "Commit message: Commit message: feat: x",
            "\"'feat: nested quotes'\"",
            "git commit -m 'fix: y'",
            "Here is the commit message:\n```text\n\"feat: z\"\n```",
            "\x1b[31m  spaced   out  \x1b[0m",
            "Commit message:",
            "```",
            "plain",
        ];
        let deeply_quoted = format!("{q}feat: x{q}", q = "\"".repeat(10));
        let deeply_labelled = format!("{}feat: y", "Commit message: ".repeat(12));
        for raw in inputs
            .iter()
            .copied()
            .chain([deeply_quoted.as_str(), deeply_labelled.as_str()])
        {
            let once = clean(raw);
            assert_eq!(clean(&once), once, "raw={raw:?}");
        }
    }

    #[test]
    fn test_repeated_label_is_fully_removed() {
        assert_eq!(clean("Commit message: Commit message: feat: x"), "feat: x");
        assert_eq!(clean(&format!("{q}feat: x{q}", q = "'".repeat(10))), "feat: x");
    }

    #[test]
    fn test_limit_length_short_message_unchanged() {
        assert_eq!(limit_length("feat: add parser", 500), "feat: add parser");
    }

    #[test]
    fn test_limit_length_breaks_on_word_boundary() {
        let message = "feat: add a streaming parser for large repository diffs";
        let limited = limit_length(message, 30);
        assert!(limited.chars().count() <= 30, "{limited}");
        assert!(limited.ends_with("..."));
        assert_eq!(limited, "feat: add a streaming...");
    }

    #[test]
    fn test_limit_length_hard_cut_without_late_space() {
        let message = "feat: supercalifragilisticexpialidocious";
        let limited = limit_length(message, 20);
        assert_eq!(limited.chars().count(), 20);
        assert!(limited.ends_with("..."));
    }

    #[test]
    fn test_limit_length_counts_characters_not_bytes() {
        let message = "修正: ".to_string() + &"あ".repeat(50);
        let limited = limit_length(&message, 10);
        assert!(limited.chars().count() <= 10);
    }

    #[test]
    fn test_limit_length_tiny_budget() {
        assert_eq!(limit_length("abcdef", 3), "abc");
    }
}
