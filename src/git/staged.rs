//! Staged diff collection, from the index via git2 or from a pipe.

use std::io::Read;
use std::path::Path;

use git2::{DiffFormat, ErrorCode, Repository, Tree};
use tracing::{debug, warn};

use crate::cli::runner::floor_char_boundary;
use crate::error::GitError;

/// Appended once to a diff that was cut to fit the byte budget.
pub const DIFF_TRUNCATION_NOTICE: &str = "\n... (diff truncated due to size limit)\n";

/// A unified diff of staged changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedDiff {
    pub text: String,
    pub files_changed: usize,
    pub truncated: bool,
}

impl StagedDiff {
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Open the repository containing `path`.
pub fn open_repository(path: &Path) -> Result<Repository, GitError> {
    Repository::discover(path).map_err(GitError::OpenRepository)
}

/// Resolve the HEAD tree, distinguishing empty-repo errors from real failures.
///
/// Returns `Ok(None)` for repos with no commits (unborn branch / not found).
fn resolve_head_tree(repo: &Repository) -> Result<Option<Tree<'_>>, GitError> {
    let head_ref = match repo.head() {
        Ok(r) => r,
        Err(e) if e.code() == ErrorCode::UnbornBranch || e.code() == ErrorCode::NotFound => {
            return Ok(None);
        }
        Err(e) => return Err(GitError::DiffFailed(e)),
    };

    let tree = head_ref.peel_to_tree().map_err(GitError::DiffFailed)?;
    Ok(Some(tree))
}

/// Collect the staged diff (HEAD tree to index), capped at `max_bytes`.
pub fn read_staged_diff(repo: &Repository, max_bytes: usize) -> Result<StagedDiff, GitError> {
    let head_tree = resolve_head_tree(repo)?;
    let diff = repo
        .diff_tree_to_index(head_tree.as_ref(), None, None)
        .map_err(GitError::DiffFailed)?;

    let files_changed = diff.deltas().len();
    let mut text = String::new();
    let mut truncated = false;

    diff.print(DiffFormat::Patch, |_delta, _hunk, line| {
        if truncated {
            return true;
        }

        let content = String::from_utf8_lossy(line.content());
        let origin = line.origin();
        let prefix_len = usize::from(matches!(origin, '+' | '-' | ' '));

        if text.len() + prefix_len + content.len() > max_bytes {
            truncated = true;
            return true;
        }

        if prefix_len == 1 {
            text.push(origin);
        }
        text.push_str(&content);
        true
    })
    .map_err(GitError::DiffFailed)?;

    if truncated {
        warn!("Staged diff exceeds {} bytes, truncating", max_bytes);
        text.push_str(DIFF_TRUNCATION_NOTICE);
    }

    debug!(
        "Collected staged diff: {} files, {} bytes",
        files_changed,
        text.len()
    );

    Ok(StagedDiff {
        text,
        files_changed,
        truncated,
    })
}

/// Read a diff from a pipe, keeping at most `max_bytes`.
pub fn read_diff_from<R: Read>(reader: R, max_bytes: usize) -> Result<StagedDiff, GitError> {
    let mut buf = Vec::new();
    reader
        .take(max_bytes as u64 + 1)
        .read_to_end(&mut buf)
        .map_err(GitError::StdinFailed)?;

    let (text, truncated) = truncate_diff(String::from_utf8_lossy(&buf).into_owned(), max_bytes);
    let files_changed = text
        .lines()
        .filter(|line| line.starts_with("diff --git "))
        .count();

    Ok(StagedDiff {
        text,
        files_changed,
        truncated,
    })
}

/// Cut `text` to `max_bytes` on a char boundary and append the notice.
pub fn truncate_diff(mut text: String, max_bytes: usize) -> (String, bool) {
    if text.len() <= max_bytes {
        return (text, false);
    }
    warn!("Diff is {} bytes, truncating to {}", text.len(), max_bytes);
    text.truncate(floor_char_boundary(&text, max_bytes));
    text.push_str(DIFF_TRUNCATION_NOTICE);
    (text, true)
}
