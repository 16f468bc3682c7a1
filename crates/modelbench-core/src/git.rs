//! Git integration for isolating execution attempts.
//!
//! Every helper shells out to the `git` binary inside the repository
//! directory. Failures come back as [`BenchError::Git`] with git's stderr
//! attached; callers decide which of them are fatal.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use tokio::process::Command;

use crate::domain::error::{BenchError, Result};
use crate::domain::{CommitInfo, RepoState, SnapshotCapture};

/// Handle on a working tree.
#[derive(Debug, Clone)]
pub struct GitRepo {
    dir: PathBuf,
}

impl GitRepo {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn git(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.dir)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| BenchError::Git(format!("failed to run git: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BenchError::Git(format!(
                "git {} failed: {}",
                args.join(" "),
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Whether the directory is inside a git work tree.
    pub async fn is_git_repo(&self) -> bool {
        self.git(&["rev-parse", "--is-inside-work-tree"])
            .await
            .map(|out| out == "true")
            .unwrap_or(false)
    }

    /// Full SHA of HEAD.
    pub async fn capture_head_sha(&self) -> Result<String> {
        let sha = self.git(&["rev-parse", "HEAD"]).await?;
        if sha.is_empty() {
            return Err(BenchError::Git(
                "git rev-parse HEAD returned empty output".to_string(),
            ));
        }
        Ok(sha)
    }

    /// Checked-out branch name, or the HEAD SHA when detached.
    pub async fn current_branch(&self) -> Result<String> {
        let name = self.git(&["rev-parse", "--abbrev-ref", "HEAD"]).await?;
        if name == "HEAD" {
            return self.capture_head_sha().await;
        }
        Ok(name)
    }

    /// Whether `git status` reports staged, unstaged or untracked changes.
    pub async fn has_uncommitted_changes(&self) -> Result<bool> {
        let status = self.git(&["status", "--porcelain"]).await?;
        Ok(!status.is_empty())
    }

    /// Observe revision, branch and cleanliness.
    ///
    /// Never fails: a failed read is reported as `Unavailable`.
    pub async fn capture_state(&self) -> SnapshotCapture {
        match self.read_state().await {
            Ok(state) => SnapshotCapture::Captured(state),
            Err(e) => SnapshotCapture::Unavailable {
                reason: e.to_string(),
            },
        }
    }

    async fn read_state(&self) -> Result<RepoState> {
        Ok(RepoState {
            revision: self.capture_head_sha().await?,
            branch: self.current_branch().await?,
            has_uncommitted_changes: self.has_uncommitted_changes().await?,
        })
    }

    /// Create `name` from `from` and switch to it.
    pub async fn create_branch(&self, name: &str, from: &str) -> Result<()> {
        self.git(&["checkout", "-b", name, from]).await.map(|_| ())
    }

    pub async fn checkout(&self, name: &str) -> Result<()> {
        self.git(&["checkout", name]).await.map(|_| ())
    }

    /// Switch back to `name`, discarding local modifications if a plain
    /// checkout is refused.
    pub async fn restore(&self, name: &str) -> Result<()> {
        match self.checkout(name).await {
            Ok(()) => Ok(()),
            Err(first) => self.git(&["checkout", "-f", name]).await.map(|_| ()).map_err(|e| {
                BenchError::Git(format!("{first}; forced checkout also failed: {e}"))
            }),
        }
    }

    pub async fn delete_branch(&self, name: &str) -> Result<()> {
        self.git(&["branch", "-D", name]).await.map(|_| ())
    }

    /// Whether HEAD has commits that `revision` does not.
    pub async fn has_new_commits_since(&self, revision: &str) -> Result<bool> {
        let range = format!("{revision}..HEAD");
        let count = self.git(&["rev-list", "--count", &range]).await?;
        let count: u64 = count
            .parse()
            .map_err(|_| BenchError::Git(format!("unexpected rev-list output: {count}")))?;
        Ok(count > 0)
    }

    /// Stage everything and commit it.
    ///
    /// Returns None when there was nothing to commit.
    pub async fn auto_commit(&self, message: &str) -> Result<Option<CommitInfo>> {
        if !self.has_uncommitted_changes().await? {
            return Ok(None);
        }
        self.git(&["add", "-A"]).await?;
        self.git(&["commit", "--no-verify", "-m", message]).await?;
        Ok(Some(CommitInfo {
            sha: self.capture_head_sha().await?,
            message: message.to_string(),
        }))
    }

    /// Stash tracked and untracked changes so the tree is clean again.
    ///
    /// Returns false when there was nothing to stash.
    pub async fn stash_changes(&self, message: &str) -> Result<bool> {
        if !self.has_uncommitted_changes().await? {
            return Ok(false);
        }
        self.git(&["stash", "push", "--include-untracked", "-m", message])
            .await?;
        Ok(true)
    }

    /// Re-apply `stash@{index}` and drop it.
    ///
    /// On conflict git keeps the entry, so nothing is lost.
    pub async fn stash_pop(&self, index: usize) -> Result<()> {
        let entry = format!("stash@{{{index}}}");
        self.git(&["stash", "pop", &entry]).await.map(|_| ())
    }
}

/// Make `raw` safe to use as one branch-name component.
///
/// Runs of characters outside `[A-Za-z0-9._-]` collapse to a single `-`;
/// leading and trailing `-`/`.` are trimmed.
pub fn sanitize_branch_component(raw: &str) -> String {
    static INVALID: OnceLock<Regex> = OnceLock::new();
    let invalid = INVALID.get_or_init(|| Regex::new(r"[^A-Za-z0-9._-]+").expect("valid regex"));

    let replaced = invalid.replace_all(raw, "-").replace("..", "-");
    let trimmed = replaced.trim_matches(|c| c == '-' || c == '.');
    if trimmed.is_empty() {
        "model".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Isolation branch name: `<prefix>/<run-short>/<model>-<n>`.
pub fn isolation_branch_name(prefix: &str, run_short: &str, model_id: &str, n: usize) -> String {
    format!(
        "{}/{}/{}-{}",
        sanitize_branch_component(prefix),
        sanitize_branch_component(run_short),
        sanitize_branch_component(model_id),
        n
    )
}


#[cfg(test)]
mod tests {
    use super::test_support::{make_git_repo, run_git};
    use super::*;

    #[tokio::test]
    async fn capture_head_sha_returns_40_hex_chars() {
        let dir = make_git_repo();
        let sha = GitRepo::new(dir.path()).capture_head_sha().await.unwrap();
        assert_eq!(sha.len(), 40, "SHA should be 40 hex chars, got: {sha}");
        assert!(sha.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn capture_head_sha_fails_outside_repo() {
        let dir = tempfile::tempdir().unwrap();
        assert!(GitRepo::new(dir.path()).capture_head_sha().await.is_err());
    }

    #[tokio::test]
    async fn is_git_repo_distinguishes_dirs() {
        let repo = make_git_repo();
        assert!(GitRepo::new(repo.path()).is_git_repo().await);

        let plain = tempfile::tempdir().unwrap();
        assert!(!GitRepo::new(plain.path()).is_git_repo().await);
    }

    #[tokio::test]
    async fn capture_state_reports_dirty_tree() {
        let dir = make_git_repo();
        let repo = GitRepo::new(dir.path());

        let clean = repo.capture_state().await;
        let state = clean.state().unwrap();
        assert_eq!(state.branch, "main");
        assert!(!state.has_uncommitted_changes);

        std::fs::write(dir.path().join("new.txt"), "x").unwrap();
        let dirty = repo.capture_state().await;
        assert!(dirty.state().unwrap().has_uncommitted_changes);
    }

    #[tokio::test]
    async fn capture_state_outside_repo_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let cap = GitRepo::new(dir.path()).capture_state().await;
        assert!(matches!(cap, SnapshotCapture::Unavailable { .. }));
    }

    #[tokio::test]
    async fn branch_lifecycle() {
        let dir = make_git_repo();
        let repo = GitRepo::new(dir.path());

        repo.create_branch("bench/abc/a-x-1", "main").await.unwrap();
        assert_eq!(repo.current_branch().await.unwrap(), "bench/abc/a-x-1");
        assert!(run_git(dir.path(), &["branch", "--list"]).contains("bench/abc/a-x-1"));

        repo.checkout("main").await.unwrap();
        repo.delete_branch("bench/abc/a-x-1").await.unwrap();
        assert!(!run_git(dir.path(), &["branch", "--list"]).contains("bench/abc/a-x-1"));

        // Creating over an existing name fails.
        repo.create_branch("dup", "main").await.unwrap();
        repo.checkout("main").await.unwrap();
        assert!(repo.create_branch("dup", "main").await.is_err());
    }

    #[tokio::test]
    async fn auto_commit_and_new_commit_detection() {
        let dir = make_git_repo();
        let repo = GitRepo::new(dir.path());
        let base = repo.capture_head_sha().await.unwrap();

        assert!(repo.auto_commit("nothing").await.unwrap().is_none());
        assert!(!repo.has_new_commits_since(&base).await.unwrap());

        std::fs::write(dir.path().join("out.txt"), "result").unwrap();
        let commit = repo.auto_commit("bench: a:x").await.unwrap().unwrap();
        assert_eq!(commit.sha, repo.capture_head_sha().await.unwrap());
        assert_eq!(commit.message, "bench: a:x");
        assert!(repo.has_new_commits_since(&base).await.unwrap());
        assert!(!repo.has_uncommitted_changes().await.unwrap());
    }

    #[tokio::test]
    async fn restore_and_stash() {
        let dir = make_git_repo();
        let repo = GitRepo::new(dir.path());
        repo.create_branch("work", "main").await.unwrap();
        std::fs::write(dir.path().join("scratch.txt"), "x").unwrap();

        assert!(repo.stash_changes("bench: leftovers").await.unwrap());
        assert!(!repo.has_uncommitted_changes().await.unwrap());
        assert!(!repo.stash_changes("bench: nothing").await.unwrap());
        repo.restore("main").await.unwrap();
        assert_eq!(repo.current_branch().await.unwrap(), "main");
        let stashes = run_git(dir.path(), &["stash", "list"]);
        assert!(stashes.contains("bench: leftovers"));
        assert!(!stashes.contains("bench: nothing"));
    }

    #[tokio::test]
    async fn stash_pop_selects_entry_by_index() {
        let dir = make_git_repo();
        let repo = GitRepo::new(dir.path());

        std::fs::write(dir.path().join("mine.txt"), "keep").unwrap();
        assert!(repo.stash_changes("caller").await.unwrap());
        std::fs::write(dir.path().join("theirs.txt"), "drop").unwrap();
        assert!(repo.stash_changes("attempt").await.unwrap());

        repo.stash_pop(1).await.unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("mine.txt")).unwrap(),
            "keep"
        );
        assert!(!dir.path().join("theirs.txt").exists());
        let stashes = run_git(dir.path(), &["stash", "list"]);
        assert!(stashes.contains("attempt") && !stashes.contains("caller"));
    }

    #[test]
    fn sanitize_collapses_invalid_runs() {
        assert_eq!(
            sanitize_branch_component("anthropic:claude-sonnet:reasoning=8000"),
            "anthropic-claude-sonnet-reasoning-8000"
        );
        assert_eq!(sanitize_branch_component("ollama:llama3.1:8b"), "ollama-llama3.1-8b");
        assert_eq!(sanitize_branch_component("..//"), "model");
        assert_eq!(sanitize_branch_component("a..b"), "a-b");
    }

    #[test]
    fn isolation_branch_name_shape() {
        assert_eq!(
            isolation_branch_name("bench", "1a2b3c4d", "openai:gpt-4o", 2),
            "bench/1a2b3c4d/openai-gpt-4o-2"
        );
    }
}
