// Integration test utilities and fixture repositories for Veritas.

use std::path::Path;
use std::process::Command;

use veritas_core::config::VeritasConfig;
use veritas_core::fetch::{DEFAULT_REF, LocalFetcher};
use veritas_core::ingest::Ingestor;
use veritas_core::store::sqlite::SqliteStore;
use veritas_core::types::{IngestReport, ValidationReport, repository_key};
use veritas_core::validate::{INLINE_SCRIPT, Validator};

pub const CACHE_MODULE: &str = "\
class Cache:
    def __init__(self, capacity=128):
        self.capacity = capacity
        self._data = {}

    def get(self, key, default=None):
        return self._data.get(key, default)

    def set(self, key, value, *, ttl=None):
        self._data[key] = value
";

/// `Cache` with `set` swapped for `delete`, line for line.
pub const CACHE_MODULE_V2: &str = "\
class Cache:
    def __init__(self, capacity=128):
        self.capacity = capacity
        self._data = {}

    def get(self, key, default=None):
        return self._data.get(key, default)

    def delete(self, key):
        self._data.pop(key, None)
";

/// A temporary Python repository on disk.
#[derive(Debug)]
pub struct TestRepo {
    pub dir: tempfile::TempDir,
}

impl TestRepo {
    pub fn empty() -> Self {
        Self {
            dir: tempfile::tempdir().expect("create tempdir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// The repository key an ingest of this checkout produces.
    pub fn key(&self) -> String {
        let canonical = std::fs::canonicalize(self.path()).expect("canonicalize fixture");
        repository_key(&canonical.to_string_lossy(), DEFAULT_REF)
    }

    /// Write (or overwrite) a file, creating parent directories.
    pub fn write(&self, rel: &str, content: &str) -> &Self {
        let path = self.path().join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
        self
    }

    pub fn remove(&self, rel: &str) -> &Self {
        std::fs::remove_file(self.path().join(rel)).unwrap();
        self
    }

    /// `cachelib` package re-exporting `Cache` from its `__init__`.
    pub fn cache_lib() -> Self {
        let repo = Self::empty();
        repo.write("cachelib/__init__.py", "from .cache import Cache\n")
            .write("cachelib/cache.py", CACHE_MODULE);
        repo
    }

    /// `Widget` inheriting `render` from `Shape` across modules.
    pub fn widgets() -> Self {
        let repo = Self::empty();
        repo.write("ui/__init__.py", "")
            .write(
                "ui/base.py",
                "class Shape:\n    sides = 0\n\n    def render(self, canvas, scale=1.0):\n        pass\n\n    def area(self):\n        return 0\n",
            )
            .write(
                "ui/widgets.py",
                "from ui.base import Shape\n\n\nclass Widget(Shape):\n    def __init__(self, name, *, visible=True):\n        self.name = name\n        self.visible = visible\n\n    def resize(self, width, height):\n        pass\n",
            );
        repo
    }

    /// Two classes inheriting from each other.
    pub fn cyclic() -> Self {
        let repo = Self::empty();
        repo.write("loops/__init__.py", "")
            .write("loops/a.py", "from loops.b import B\n\n\nclass A(B):\n    pass\n")
            .write(
                "loops/b.py",
                "from loops.a import A\n\n\nclass B(A):\n    def ping(self):\n        return True\n",
            );
        repo
    }

    /// A class whose base lives in a package that was never ingested.
    pub fn dangling_base() -> Self {
        let repo = Self::empty();
        repo.write(
            "views.py",
            "from django.views import View\n\n\nclass Page(View):\n    def render_page(self):\n        pass\n",
        );
        repo
    }

    /// `cache_lib` committed to a git repository.
    pub fn cache_lib_git() -> Self {
        let repo = Self::cache_lib();
        let root = repo.path();
        git(root, &["init", "--quiet"]);
        git(root, &["config", "user.email", "test@veritas.dev"]);
        git(root, &["config", "user.name", "Test"]);
        repo.commit_all("Add cache");
        repo
    }

    /// Commit every change in a git fixture and return the new commit id.
    pub fn commit_all(&self, message: &str) -> String {
        let root = self.path();
        git(root, &["add", "--all"]);
        git(root, &["commit", "--quiet", "-m", message]);
        git(root, &["rev-parse", "HEAD"])
    }
}

/// Run `git` in `dir` and return its trimmed stdout.
fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_AUTHOR_DATE", "2025-01-15T10:00:00+00:00")
        .env("GIT_COMMITTER_DATE", "2025-01-15T10:00:00+00:00")
        .output()
        .unwrap_or_else(|e| panic!("git {}: {e}", args.join(" ")));
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        panic!("git {} failed: {stderr}", args.join(" "));
    }
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Ingest a checkout into an existing store with the default config.
pub async fn ingest_into(
    store: &SqliteStore,
    repo: &TestRepo,
) -> veritas_core::error::Result<IngestReport> {
    ingest_with(store, repo, &Ingestor::new(VeritasConfig::default())).await
}

pub async fn ingest_with(
    store: &SqliteStore,
    repo: &TestRepo,
    ingestor: &Ingestor,
) -> veritas_core::error::Result<IngestReport> {
    let path = repo.path().to_string_lossy();
    ingestor.ingest(store, &LocalFetcher, &path, DEFAULT_REF).await
}

/// Ingest into a fresh in-memory store and return both for inspection.
pub async fn ingest(repo: &TestRepo) -> (IngestReport, SqliteStore) {
    let store = SqliteStore::in_memory().unwrap();
    let report = ingest_into(&store, repo).await.unwrap();
    (report, store)
}

/// Validate inline script text with the default validation settings.
pub async fn validate(store: &SqliteStore, script: &str) -> ValidationReport {
    Validator::new(store, VeritasConfig::default().validate)
        .validate_text(script, INLINE_SCRIPT)
        .await
        .unwrap()
}

/// `(symbol, verdict)` pairs in event order.
pub fn verdicts(report: &ValidationReport) -> Vec<(String, &'static str)> {
    report
        .events
        .iter()
        .map(|e| (e.symbol.clone(), e.verdict.as_str()))
        .collect()
}
