//! Shared test utilities for integration tests.
//!
//! Not all functions are used by every test file, but they're shared across tests.
#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use lazygit_llm::ProviderConfig;
use lazygit_llm::ProviderKind;

/// Segment used instead of `/tmp/` in tests, since tempdirs live under `/tmp`.
pub const TEST_BLOCKED_SEGMENT: &str = "/untrusted/";

/// A directory holding one mock CLI script.
pub struct MockCli {
    pub dir: tempfile::TempDir,
    pub path: PathBuf,
}

impl MockCli {
    /// Write an executable `#!/bin/sh` script named `name` (e.g. `claude`).
    pub fn new(name: &str, body: &str) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp directory");
        let path = write_script(dir.path(), name, body);
        Self { dir, path }
    }

    /// A file inside the script's directory, for scripts that record their input.
    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn read_file(&self, name: &str) -> String {
        let path = self.file(name);
        fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("Failed to read {:?}: {}", path, e))
    }

    /// Provider config pointing at this script.
    pub fn provider_config(&self, provider: &str) -> ProviderConfig {
        ProviderConfig {
            kind: ProviderKind::Cli,
            name: provider.to_string(),
            model_name: None,
            timeout: Some(Duration::from_secs(10)),
            api_key: None,
            binary_path: Some(self.path.clone()),
            max_message_length: 500,
            blocked_path_segments: vec![TEST_BLOCKED_SEGMENT.to_string()],
        }
    }
}

/// Write an executable shell script and return its path.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("Failed to write mock script");

    let mut perms = fs::metadata(&path)
        .expect("Failed to get metadata")
        .permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).expect("Failed to set permissions");

    path
}

/// Whether a process with this pid is still running.
///
/// Killed subprocesses are reparented to init before they are reaped, so
/// zombies count as gone and the check is retried for up to a second.
pub fn process_alive(pid: &str) -> bool {
    let pid = pid.trim();
    for _ in 0..20 {
        if !running(pid) {
            return false;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    true
}

fn running(pid: &str) -> bool {
    match fs::read_to_string(format!("/proc/{pid}/stat")) {
        // The state field follows the parenthesised command name.
        Ok(stat) => stat
            .rsplit(')')
            .next()
            .and_then(|rest| rest.trim_start().chars().next())
            .is_some_and(|state| state != 'Z'),
        Err(_) if Path::new("/proc/self").exists() => false,
        Err(_) => std::process::Command::new("kill")
            .args(["-0", pid])
            .stderr(std::process::Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false),
    }
}

/// A test git repository builder for integration tests.
pub struct TestRepo {
    pub dir: tempfile::TempDir,
    pub repo: git2::Repository,
}

impl TestRepo {
    /// Create a repository with one empty commit.
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp directory");
        let repo = git2::Repository::init(dir.path()).expect("Failed to init git repo");
        {
            let sig = git2::Signature::now("Test User", "test@example.com")
                .expect("Failed to create signature");
            let tree_id = repo
                .index()
                .expect("Failed to get index")
                .write_tree()
                .expect("Failed to write tree");
            let tree = repo.find_tree(tree_id).expect("Failed to find tree");
            repo.commit(Some("HEAD"), &sig, &sig, "init", &tree, &[])
                .expect("Failed to create commit");
        }
        Self { dir, repo }
    }

    /// Write a file and add it to the index.
    pub fn stage(&self, name: &str, content: &str) {
        fs::write(self.dir.path().join(name), content).expect("Failed to write test file");
        let mut index = self.repo.index().expect("Failed to get index");
        index.add_path(Path::new(name)).expect("Failed to add file");
        index.write().expect("Failed to write index");
    }
}
