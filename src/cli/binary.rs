//! Locating and verifying the CLI executable.

use std::ffi::OsString;
use std::fs::Metadata;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::ProviderError;

/// Directory segments that must never appear in a resolved binary path.
pub const DEFAULT_BLOCKED_SEGMENTS: &[&str] = &["/tmp/", "/var/tmp/"];

/// Static description of where a tool family may live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinarySpec {
    /// Name used in errors and logs.
    pub tool: &'static str,
    /// Allow-listed executable file names, in lookup order.
    pub names: &'static [&'static str],
    /// Absolute install locations checked before PATH.
    pub trusted_paths: &'static [&'static str],
    /// Script entry points an allow-listed name may resolve to.
    pub entry_points: &'static [EntryPoint],
    /// Shown to the user when nothing is found.
    pub install_hint: &'static str,
}

/// A symlink target accepted in place of an allow-listed name.
///
/// npm installs link `claude` to `.../@anthropic-ai/claude-code/cli.js`; the
/// target's file name must equal `file_name` and its canonical path must
/// contain `package_dir`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryPoint {
    pub file_name: &'static str,
    pub package_dir: &'static str,
}

impl EntryPoint {
    fn matches(&self, resolved: &Path) -> bool {
        resolved.file_name().and_then(|n| n.to_str()) == Some(self.file_name)
            && resolved.to_string_lossy().contains(self.package_dir)
    }
}

/// Safety policy applied to every candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryPolicy {
    pub blocked_segments: Vec<String>,
    /// Configured `binary_path`, checked first.
    pub override_path: Option<PathBuf>,
    /// PATH to search instead of the process PATH.
    pub search_path: Option<OsString>,
}

impl Default for BinaryPolicy {
    fn default() -> Self {
        Self {
            blocked_segments: DEFAULT_BLOCKED_SEGMENTS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            override_path: None,
            search_path: None,
        }
    }
}

/// A verified executable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedBinary {
    path: PathBuf,
    resolved: PathBuf,
    verified: bool,
}

impl ResolvedBinary {
    /// Path as found. This is what gets executed.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Symlink-resolved path the safety checks ran against.
    pub fn resolved(&self) -> &Path {
        &self.resolved
    }

    pub fn verified(&self) -> bool {
        self.verified
    }

    /// File name of the path as found, e.g. `claude` or `claude-code`.
    pub fn file_name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
    }
}

#[cfg(test)]
impl ResolvedBinary {
    /// Skip every check. Only for tests that mock the executor.
    pub(crate) fn unverified(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            resolved: path.clone(),
            path,
            verified: false,
        }
    }
}

/// Find the first candidate that passes every safety check.
///
/// Candidates are tried in order: the policy's override path, the tool's
/// trusted paths, then a PATH lookup for each allow-listed name. An override
/// that exists but fails a check is reported as
/// [`ProviderError::UnsafeBinaryPath`] rather than skipped.
pub fn resolve(spec: &BinarySpec, policy: &BinaryPolicy) -> Result<ResolvedBinary, ProviderError> {
    let mut tried = Vec::new();

    if let Some(path) = &policy.override_path {
        tried.push(path.display().to_string());
        if path.exists() {
            return verify(spec, policy, path).map_err(|reason| {
                warn!("Configured binary {} rejected: {}", path.display(), reason);
                ProviderError::UnsafeBinaryPath {
                    path: path.clone(),
                    reason,
                }
            });
        }
        warn!(
            "Configured binary {} does not exist, falling back to search",
            path.display()
        );
    }

    for trusted in spec.trusted_paths {
        let path = Path::new(trusted);
        tried.push(trusted.to_string());
        if !path.exists() {
            continue;
        }
        match verify(spec, policy, path) {
            Ok(resolved) => return Ok(resolved),
            Err(reason) => warn!("Rejected {}: {}", path.display(), reason),
        }
    }

    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
    for name in spec.names {
        tried.push(format!("{name} (PATH)"));
        let found = match &policy.search_path {
            Some(search) => which::which_in(name, Some(search), &cwd),
            None => which::which(name),
        };
        let Ok(path) = found else {
            debug!("{} not found on PATH", name);
            continue;
        };
        match verify(spec, policy, &path) {
            Ok(resolved) => return Ok(resolved),
            Err(reason) => warn!("Rejected {}: {}", path.display(), reason),
        }
    }

    Err(ProviderError::BinaryNotFound {
        tool: spec.tool.to_string(),
        tried,
        hint: spec.install_hint,
    })
}

/// Run every safety check on one candidate. Returns the rejection reason.
fn verify(spec: &BinarySpec, policy: &BinaryPolicy, candidate: &Path) -> Result<ResolvedBinary, String> {
    if !candidate.is_absolute() {
        return Err("path is not absolute".to_string());
    }

    let name = candidate
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| "path has no file name".to_string())?;
    if !spec.names.contains(&name) {
        return Err(format!(
            "'{}' is not an allowed executable name (expected one of: {})",
            name,
            spec.names.join(", ")
        ));
    }

    let metadata =
        std::fs::metadata(candidate).map_err(|e| format!("cannot read metadata: {e}"))?;
    if metadata.is_dir() {
        return Err("path is a directory".to_string());
    }
    if !metadata.is_file() {
        return Err("path is not a regular file".to_string());
    }
    if !is_executable(&metadata) {
        return Err("file is not executable by the current user".to_string());
    }

    let resolved = std::fs::canonicalize(candidate)
        .map_err(|e| format!("cannot resolve symlinks: {e}"))?;
    let resolved_str = resolved.to_string_lossy();
    if let Some(segment) = policy
        .blocked_segments
        .iter()
        .find(|segment| resolved_str.contains(segment.as_str()))
    {
        return Err(format!(
            "resolved path {} is inside blocked location '{}'",
            resolved.display(),
            segment
        ));
    }

    let resolved_name = resolved
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    if !spec.names.contains(&resolved_name)
        && !spec.entry_points.iter().any(|entry| entry.matches(&resolved))
    {
        return Err(format!(
            "resolved path {} is not an allowed executable or {} entry point",
            resolved.display(),
            spec.tool
        ));
    }

    debug!(
        "Resolved {} binary: {} -> {}",
        spec.tool,
        candidate.display(),
        resolved.display()
    );

    Ok(ResolvedBinary {
        path: candidate.to_path_buf(),
        resolved,
        verified: true,
    })
}

/// Whether the current user may execute a file with this metadata.
#[cfg(unix)]
fn is_executable(metadata: &Metadata) -> bool {
    use std::os::unix::fs::{MetadataExt, PermissionsExt};

    let mode = metadata.permissions().mode();
    // SAFETY: getuid and getgid cannot fail and have no side effects.
    let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };

    if uid == 0 {
        return mode & 0o111 != 0;
    }
    if uid == metadata.uid() {
        return mode & 0o100 != 0;
    }
    if gid == metadata.gid() {
        return mode & 0o010 != 0;
    }
    mode & 0o001 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &Metadata) -> bool {
    true
}
