//! Repository fetchers: turn a URL or path plus a ref into a local checkout.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument};

use crate::error::IngestError;

/// Ref used when the caller does not name one.
pub const DEFAULT_REF: &str = "HEAD";

/// A checkout ready to be walked.
#[derive(Debug)]
pub struct FetchedRepository {
    /// Directory holding the working tree.
    pub root: PathBuf,
    /// Remote URL, or the canonical directory path for local checkouts.
    pub url: String,
    pub git_ref: String,
    /// Resolved commit id, when the checkout is a git repository.
    pub commit_id: Option<String>,
    /// Keeps a temporary clone alive for as long as the checkout is used.
    _clone_dir: Option<tempfile::TempDir>,
}

impl FetchedRepository {
    /// A plain directory with no clone to clean up.
    pub fn local(root: PathBuf, url: &str, git_ref: &str, commit_id: Option<String>) -> Self {
        Self {
            root,
            url: url.to_string(),
            git_ref: git_ref.to_string(),
            commit_id,
            _clone_dir: None,
        }
    }
}

#[async_trait::async_trait]
pub trait RepositoryFetcher: Send + Sync {
    async fn fetch(&self, url: &str, git_ref: &str) -> crate::error::Result<FetchedRepository>;
}

/// Uses a directory already on disk. The working tree is read as-is; the ref
/// is only resolved to a commit id for the repository record.
#[derive(Debug, Default)]
pub struct LocalFetcher;

#[async_trait::async_trait]
impl RepositoryFetcher for LocalFetcher {
    #[instrument(skip(self), name = "fetch_local")]
    async fn fetch(&self, url: &str, git_ref: &str) -> crate::error::Result<FetchedRepository> {
        let root = std::fs::canonicalize(url).map_err(|e| IngestError::Fetch {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        if !root.is_dir() {
            return Err(IngestError::Fetch {
                url: url.to_string(),
                message: "not a directory".to_string(),
            }
            .into());
        }
        let commit_id = resolve_commit(&root, git_ref);
        debug!(root = %root.display(), commit = ?commit_id, "Using local checkout");
        let canonical_url = root.to_string_lossy().into_owned();
        Ok(FetchedRepository::local(root, &canonical_url, git_ref, commit_id))
    }
}

/// Clones a remote with the `git` binary into a temporary directory. Branch
/// and tag refs get a shallow clone; a commit id gets a full clone followed by
/// a checkout, since `--branch` only accepts names.
#[derive(Debug)]
pub struct GitFetcher {
    git: String,
}

impl Default for GitFetcher {
    fn default() -> Self {
        Self {
            git: "git".to_string(),
        }
    }
}

impl GitFetcher {
    /// Use a specific `git` executable.
    pub fn with_binary(git: impl Into<String>) -> Self {
        Self { git: git.into() }
    }
}

#[async_trait::async_trait]
impl RepositoryFetcher for GitFetcher {
    #[instrument(skip(self), name = "fetch_git")]
    async fn fetch(&self, url: &str, git_ref: &str) -> crate::error::Result<FetchedRepository> {
        let fetch_err = |message: String| IngestError::Fetch {
            url: url.to_string(),
            message,
        };

        let clone_dir = tempfile::Builder::new()
            .prefix("veritas-clone-")
            .tempdir()
            .map_err(IngestError::Io)?;
        let target = clone_dir.path().join("checkout");

        let by_commit = is_commit_id(git_ref);
        let mut clone = vec![OsStr::new("clone"), OsStr::new("--quiet")];
        if by_commit {
            clone.push(OsStr::new("--no-checkout"));
        } else {
            clone.extend([OsStr::new("--depth"), OsStr::new("1")]);
            if git_ref != DEFAULT_REF {
                clone.extend([OsStr::new("--branch"), OsStr::new(git_ref)]);
            }
        }
        clone.extend([OsStr::new(url), target.as_os_str()]);

        info!(url, git_ref, by_commit, "Cloning repository");
        self.run_git(None, &clone)
            .await
            .map_err(|message| fetch_err(format!("git clone failed: {message}")))?;
        if by_commit {
            let checkout = ["checkout", "--quiet", "--detach", git_ref].map(OsStr::new);
            self.run_git(Some(&target), &checkout)
                .await
                .map_err(|message| fetch_err(format!("git checkout {git_ref} failed: {message}")))?;
        }

        let commit_id = resolve_commit(&target, DEFAULT_REF);
        Ok(FetchedRepository {
            root: target,
            url: url.to_string(),
            git_ref: git_ref.to_string(),
            commit_id,
            _clone_dir: Some(clone_dir),
        })
    }
}

impl GitFetcher {
    /// Run `git` with `args`, in `dir` when given. `Err` holds stderr.
    async fn run_git(&self, dir: Option<&Path>, args: &[&OsStr]) -> Result<(), String> {
        let mut cmd = tokio::process::Command::new(&self.git);
        cmd.args(args);
        if let Some(dir) = dir {
            cmd.current_dir(dir);
        }
        let output = cmd
            .output()
            .await
            .map_err(|e| format!("cannot run {}: {e}", self.git))?;
        if output.status.success() {
            Ok(())
        } else {
            Err(String::from_utf8_lossy(&output.stderr).trim().to_string())
        }
    }
}

/// Abbreviated or full hex object id.
fn is_commit_id(git_ref: &str) -> bool {
    (7..=40).contains(&git_ref.len()) && git_ref.chars().all(|c| c.is_ascii_hexdigit())
}

/// Local directories are read in place; anything else is cloned.
#[derive(Debug, Default)]
pub struct AutoFetcher {
    local: LocalFetcher,
    git: GitFetcher,
}

#[async_trait::async_trait]
impl RepositoryFetcher for AutoFetcher {
    async fn fetch(&self, url: &str, git_ref: &str) -> crate::error::Result<FetchedRepository> {
        let local = url.strip_prefix("file://").unwrap_or(url);
        if Path::new(local).is_dir() {
            self.local.fetch(local, git_ref).await
        } else {
            self.git.fetch(url, git_ref).await
        }
    }
}

/// Commit id that `git_ref` names in the repository at `root`, if any.
fn resolve_commit(root: &Path, git_ref: &str) -> Option<String> {
    let repo = match gix::open(root) {
        Ok(repo) => repo,
        Err(e) => {
            debug!(root = %root.display(), error = %e, "Not a git repository");
            return None;
        }
    };
    match repo.rev_parse_single(git_ref) {
        Ok(id) => Some(id.to_string()),
        Err(e) => {
            debug!(git_ref, error = %e, "Cannot resolve ref");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VeritasError;

    #[tokio::test]
    async fn local_fetch_of_plain_directory() {
        let dir = tempfile::tempdir().unwrap();
        let fetched = LocalFetcher
            .fetch(dir.path().to_str().unwrap(), DEFAULT_REF)
            .await
            .unwrap();
        assert_eq!(fetched.root, std::fs::canonicalize(dir.path()).unwrap());
        assert_eq!(fetched.commit_id, None);
    }

    #[tokio::test]
    async fn local_fetch_of_missing_path_fails() {
        let err = LocalFetcher
            .fetch("/nonexistent/veritas/repo", DEFAULT_REF)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            VeritasError::Ingest(IngestError::Fetch { .. })
        ));
    }

    #[test]
    fn commit_ids_are_recognised() {
        assert!(is_commit_id("3f9c2a1"));
        assert!(is_commit_id(&"a".repeat(40)));
        assert!(!is_commit_id("main"));
        assert!(!is_commit_id("v1.2.3"));
        assert!(!is_commit_id("abc"));
    }

    #[tokio::test]
    async fn auto_fetch_prefers_local_directories() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("file://{}", dir.path().display());
        let fetched = AutoFetcher::default().fetch(&url, DEFAULT_REF).await.unwrap();
        assert_eq!(fetched.root, std::fs::canonicalize(dir.path()).unwrap());
    }
}
