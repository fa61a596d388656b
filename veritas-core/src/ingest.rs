//! Repository ingestion: walk → extract (parallel) → write (sequential).
//!
//! Extraction runs on a rayon pool inside a blocking task; every file gets its
//! own budget. Writes go through the store one file at a time, each in its own
//! transaction, so a cancelled or failed run leaves whole-file snapshots.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use rayon::prelude::*;
use tracing::{debug, info, instrument, warn};
use veritas_graphs::{
    FileDeclarations, GraphError, extract_declarations, is_python_file, module_path_for,
    parse_python,
};

use crate::config::{IngestSection, VeritasConfig};
use crate::error::{IngestError, StoreError, VeritasError};
use crate::fetch::{FetchedRepository, RepositoryFetcher};
use crate::hierarchy::find_cycles;
use crate::progress::{NoopReporter, ProgressReporter, Stage};
use crate::store::GraphStore;
use crate::types::{
    FileRecord, FileStatus, IngestFailure, IngestReport, PYTHON, RepositoryRecord, UpsertCounts,
    file_key, repository_key, repository_name,
};

/// Drives ingestion of one repository into a store.
pub struct Ingestor {
    config: VeritasConfig,
    progress: Arc<dyn ProgressReporter>,
    cancel: Arc<AtomicBool>,
}

impl std::fmt::Debug for Ingestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ingestor")
            .field("cancelled", &self.cancel.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// One file scheduled for extraction.
#[derive(Debug, Clone)]
struct FileJob {
    relative_path: String,
    module_path: String,
    is_package: bool,
    /// Hash of the last successful extraction, if the file is up to date in the store.
    known_hash: Option<String>,
}

#[derive(Debug)]
enum Extracted {
    Unchanged,
    Parsed {
        hash: String,
        decls: FileDeclarations,
    },
    Failed {
        status: FileStatus,
        message: String,
    },
    /// Never attempted because the run was cancelled.
    Skipped,
}

impl Ingestor {
    pub fn new(config: VeritasConfig) -> Self {
        Self {
            config,
            progress: Arc::new(NoopReporter),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    /// Share an external cancel flag (e.g. one flipped by a Ctrl-C handler).
    #[must_use]
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Flag that stops the run at the next file boundary when set.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Fetch `url` at `git_ref` and ingest it.
    #[instrument(skip(self, store, fetcher), name = "ingest")]
    pub async fn ingest<S: GraphStore + ?Sized>(
        &self,
        store: &S,
        fetcher: &dyn RepositoryFetcher,
        url: &str,
        git_ref: &str,
    ) -> crate::error::Result<IngestReport> {
        let checkout = fetcher.fetch(url, git_ref).await?;
        self.ingest_checkout(store, &checkout).await
    }

    /// Ingest a checkout that is already on disk.
    #[instrument(skip_all, name = "ingest_checkout", fields(root = %checkout.root.display()))]
    pub async fn ingest_checkout<S: GraphStore + ?Sized>(
        &self,
        store: &S,
        checkout: &FetchedRepository,
    ) -> crate::error::Result<IngestReport> {
        let start = Instant::now();
        let repo_key = repository_key(&checkout.url, &checkout.git_ref);
        let mut report = IngestReport {
            repository_key: repo_key.clone(),
            ..IngestReport::default()
        };

        store
            .upsert_repository(&RepositoryRecord {
                key: repo_key.clone(),
                name: repository_name(&checkout.url),
                url: checkout.url.clone(),
                git_ref: checkout.git_ref.clone(),
                commit_id: checkout.commit_id.clone(),
                ingested_at: Utc::now(),
            })
            .await?;

        // ── Scan ──
        self.progress.begin(Stage::Scan, None);
        let paths = walk(&checkout.root, &self.config.ingest)?;
        self.progress.advance(paths.len() as u64);
        self.progress.end();
        report.files_total = paths.len() as u64;

        let existing: HashMap<String, FileRecord> = store
            .list_files(&repo_key)
            .await?
            .into_iter()
            .map(|f| (f.relative_path.clone(), f))
            .collect();

        let jobs: Vec<FileJob> = paths
            .iter()
            .map(|rel| {
                let (module_path, is_package) =
                    module_path_for(Path::new(rel), &self.config.ingest.source_roots);
                let known_hash = existing
                    .get(rel)
                    .filter(|f| f.status == FileStatus::Parsed)
                    .and_then(|f| f.last_hash.clone());
                FileJob {
                    relative_path: rel.clone(),
                    module_path,
                    is_package,
                    known_hash,
                }
            })
            .collect();

        // ── Extract ──
        let outcomes = self.extract_all(&checkout.root, jobs).await?;

        // ── Write ──
        self.progress.begin(Stage::Write, Some(outcomes.len() as u64));
        let mut pending: Vec<FileRecord> = Vec::new();
        for (job, outcome) in outcomes {
            let previous = existing.get(&job.relative_path);
            let mut record = FileRecord {
                key: file_key(&repo_key, &job.relative_path),
                repository_key: repo_key.clone(),
                relative_path: job.relative_path.clone(),
                module_path: job.module_path.clone(),
                language: PYTHON.to_string(),
                last_hash: previous.and_then(|p| p.last_hash.clone()),
                status: FileStatus::Pending,
                error: None,
                updated_at: Utc::now(),
            };

            if self.cancel.load(Ordering::Relaxed) {
                report.cancelled = true;
                pending.push(record);
                continue;
            }

            match outcome {
                Extracted::Skipped => {
                    report.cancelled = true;
                    pending.push(record);
                    continue;
                }
                Extracted::Unchanged => report.files_unchanged += 1,
                Extracted::Parsed { hash, decls } => {
                    record.last_hash = Some(hash);
                    record.status = FileStatus::Parsed;
                    match self.retry_conflicts(|| store.upsert_file(&record, &decls)).await? {
                        Ok(counts) => {
                            report.files_parsed += 1;
                            report.nodes_added += counts.added;
                            report.nodes_updated += counts.updated;
                            report.nodes_removed += counts.removed;
                            if counts.conflicts > 0 {
                                warn!(file = %job.relative_path, conflicts = counts.conflicts, "Declarations already owned elsewhere");
                                report.warnings.push(format!(
                                    "{}: {} declaration(s) already owned by another file; kept the existing owner",
                                    job.relative_path, counts.conflicts
                                ));
                            }
                        }
                        Err(message) => {
                            report.files_failed += 1;
                            report.failures.push(IngestFailure {
                                relative_path: job.relative_path.clone(),
                                status: FileStatus::Failed,
                                message,
                            });
                        }
                    }
                }
                Extracted::Failed { status, message } => {
                    warn!(file = %job.relative_path, status = %status, error = %message, "File skipped");
                    self.progress
                        .note(&format!("{}: {message}", job.relative_path));
                    record.status = status;
                    record.error = Some(message.clone());
                    if let Err(reason) = self.retry_conflicts(|| store.mark_file_failed(&record)).await? {
                        warn!(file = %job.relative_path, %reason, "File status not recorded");
                    }
                    report.files_failed += 1;
                    report.failures.push(IngestFailure {
                        relative_path: job.relative_path.clone(),
                        status,
                        message,
                    });
                }
            }
            self.progress.advance(1);
        }
        self.progress.end();

        if !pending.is_empty() {
            report.files_pending = pending.len() as u64;
            if let Err(reason) = self.retry_conflicts(|| store.mark_files_pending(&pending)).await? {
                warn!(%reason, "Pending files not recorded");
            }
            info!(pending = pending.len(), "Ingestion cancelled; remaining files left pending");
        }

        // Files gone from the checkout. Skipped on cancellation so the next
        // run sees the same picture.
        if !report.cancelled {
            let present: HashSet<&str> = paths.iter().map(String::as_str).collect();
            for (rel, file) in &existing {
                if present.contains(rel.as_str()) {
                    continue;
                }
                let counts: UpsertCounts = store.remove_file(&file.key).await?;
                debug!(file = %rel, nodes = counts.removed, "Removed vanished file");
                report.files_removed += 1;
                report.nodes_removed += counts.removed;
            }
        }

        let edges = store.inheritance_edges(Some(&repo_key)).await?;
        for cycle in find_cycles(&edges) {
            let message = format!("Inheritance cycle: {}", cycle.join(" -> "));
            warn!(classes = ?cycle, "Inheritance cycle detected");
            report.warnings.push(message);
        }

        report.duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(
            repository = %report.repository_key,
            files = report.files_total,
            parsed = report.files_parsed,
            unchanged = report.files_unchanged,
            failed = report.files_failed,
            pending = report.files_pending,
            removed = report.files_removed,
            nodes_added = report.nodes_added,
            nodes_updated = report.nodes_updated,
            nodes_removed = report.nodes_removed,
            duration_ms = report.duration_ms,
            "Ingestion complete"
        );
        Ok(report)
    }

    /// Read, hash, parse and extract every job on a dedicated rayon pool.
    async fn extract_all(
        &self,
        root: &Path,
        jobs: Vec<FileJob>,
    ) -> crate::error::Result<Vec<(FileJob, Extracted)>> {
        let root: PathBuf = root.to_path_buf();
        let budget = Duration::from_millis(self.config.ingest.file_budget_ms);
        let workers = self.config.worker_count();
        let cancel = Arc::clone(&self.cancel);
        let progress = Arc::clone(&self.progress);

        progress.begin(Stage::Extract, Some(jobs.len() as u64));
        let outcomes = tokio::task::spawn_blocking(move || {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(workers)
                .build()
                .map_err(|e| IngestError::Task(e.to_string()))?;
            let outcomes: Vec<(FileJob, Extracted)> = pool.install(|| {
                jobs.into_par_iter()
                    .map(|job| {
                        let outcome = if cancel.load(Ordering::Relaxed) {
                            Extracted::Skipped
                        } else {
                            extract_file(&root, &job, budget)
                        };
                        progress.advance(1);
                        (job, outcome)
                    })
                    .collect()
            });
            Ok::<_, IngestError>(outcomes)
        })
        .await
        .map_err(|e| IngestError::Task(e.to_string()))??;
        self.progress.end();
        Ok(outcomes)
    }

    /// Run a file write, retrying on write conflicts with exponential
    /// backoff. The inner `Err` carries the failure message once retries run
    /// out; any other error is fatal.
    async fn retry_conflicts<T, F, Fut>(&self, mut write: F) -> crate::error::Result<Result<T, String>>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = crate::error::Result<T>>,
    {
        let retries = self.config.ingest.write_retries;
        let mut backoff = Duration::from_millis(self.config.ingest.retry_backoff_ms);
        let mut attempt = 0;
        loop {
            match write().await {
                Ok(value) => return Ok(Ok(value)),
                Err(VeritasError::Store(StoreError::WriteConflict { file_key })) => {
                    if attempt >= retries {
                        warn!(file = %file_key, attempts = attempt + 1, "Giving up on contended file");
                        return Ok(Err(format!(
                            "write conflict persisted after {} attempts",
                            attempt + 1
                        )));
                    }
                    attempt += 1;
                    debug!(file = %file_key, attempt, backoff_ms = backoff.as_millis(), "Write conflict; retrying");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Relative paths (with `/` separators) of every file to ingest, sorted.
fn walk(root: &Path, ingest: &IngestSection) -> Result<Vec<String>, IngestError> {
    let excludes = ingest
        .exclude_patterns
        .iter()
        .map(|p| {
            glob::Pattern::new(p).map_err(|e| IngestError::Pattern {
                pattern: p.clone(),
                message: e.to_string(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let escaped_root = glob::Pattern::escape(&root.to_string_lossy());
    let mut found = BTreeSet::new();
    for pattern in &ingest.include_patterns {
        let full = format!("{escaped_root}/{pattern}");
        let entries = glob::glob(&full).map_err(|e| IngestError::Pattern {
            pattern: pattern.clone(),
            message: e.to_string(),
        })?;
        for entry in entries.flatten() {
            if !entry.is_file() || !is_python_file(&entry) {
                continue;
            }
            let Ok(relative) = entry.strip_prefix(root) else {
                continue;
            };
            let relative = relative.to_string_lossy().replace('\\', "/");
            if excludes.iter().any(|p| p.matches(&relative)) {
                continue;
            }
            found.insert(relative);
        }
    }
    Ok(found.into_iter().collect())
}

fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    bytes.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

fn extract_file(root: &Path, job: &FileJob, budget: Duration) -> Extracted {
    let path = root.join(&job.relative_path);
    let bytes = match std::fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) => {
            return Extracted::Failed {
                status: FileStatus::Failed,
                message: format!("cannot read file: {e}"),
            };
        }
    };
    let hash = content_hash(&bytes);
    if job.known_hash.as_deref() == Some(hash.as_str()) {
        return Extracted::Unchanged;
    }
    let Ok(source) = String::from_utf8(bytes) else {
        return Extracted::Failed {
            status: FileStatus::Failed,
            message: "file is not valid UTF-8".to_string(),
        };
    };

    let deadline = Instant::now() + budget;
    let rel = Path::new(&job.relative_path);
    let result = parse_python(&source, rel).and_then(|parsed| {
        if Instant::now() >= deadline {
            return Err(GraphError::Timeout {
                path: job.relative_path.clone(),
            });
        }
        extract_declarations(&parsed, rel, &job.module_path, job.is_package, Some(deadline))
    });

    match result {
        Ok(decls) => Extracted::Parsed { hash, decls },
        Err(GraphError::Timeout { .. }) => Extracted::Failed {
            status: FileStatus::TimedOut,
            message: format!("exceeded the {}ms extraction budget", budget.as_millis()),
        },
        Err(e) => Extracted::Failed {
            status: FileStatus::Failed,
            message: e.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{DEFAULT_REF, LocalFetcher};
    use crate::store::sqlite::SqliteStore;

    fn write(root: &Path, rel: &str, source: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, source).unwrap();
    }

    fn checkout(root: &Path) -> FetchedRepository {
        FetchedRepository::local(root.to_path_buf(), "local/shop", DEFAULT_REF, None)
    }

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "shop/cart.py",
            "class Cart:\n    def __init__(self):\n        self.items = []\n\n    def add(self, item):\n        self.items.append(item)\n",
        );
        write(dir.path(), "shop/__init__.py", "from .cart import Cart\n");
        write(dir.path(), ".venv/lib/site.py", "class Ignored:\n    pass\n");
        write(dir.path(), "README.md", "# shop\n");
        dir
    }

    #[test]
    fn walk_applies_patterns() {
        let dir = fixture();
        let files = walk(dir.path(), &IngestSection::default()).unwrap();
        assert_eq!(files, vec!["shop/__init__.py", "shop/cart.py"]);
    }

    #[test]
    fn walk_rejects_bad_patterns() {
        let dir = fixture();
        let ingest = IngestSection {
            exclude_patterns: vec!["[".to_string()],
            ..IngestSection::default()
        };
        assert!(matches!(
            walk(dir.path(), &ingest),
            Err(IngestError::Pattern { .. })
        ));
    }

    #[tokio::test]
    async fn reingest_is_idempotent() {
        let dir = fixture();
        let store = SqliteStore::in_memory().unwrap();
        let ingestor = Ingestor::new(VeritasConfig::default());

        let first = ingestor.ingest_checkout(&store, &checkout(dir.path())).await.unwrap();
        assert_eq!(first.files_total, 2);
        assert_eq!(first.files_parsed, 2);
        // class + 2 methods + 1 attribute
        assert_eq!(first.nodes_added, 4);

        let second = ingestor.ingest_checkout(&store, &checkout(dir.path())).await.unwrap();
        assert_eq!(second.files_unchanged, 2);
        assert_eq!(second.files_parsed, 0);
        assert_eq!(second.nodes_added + second.nodes_updated + second.nodes_removed, 0);
    }

    #[tokio::test]
    async fn ingest_through_fetcher() {
        let dir = fixture();
        let store = SqliteStore::in_memory().unwrap();
        let report = Ingestor::new(VeritasConfig::default())
            .ingest(&store, &LocalFetcher, dir.path().to_str().unwrap(), DEFAULT_REF)
            .await
            .unwrap();
        assert_eq!(report.files_parsed, 2);
        let repos = store.list_repositories().await.unwrap();
        assert_eq!(repos.len(), 1);
        assert_eq!(repos[0].key, report.repository_key);
    }

    #[tokio::test]
    async fn changed_and_vanished_files() {
        let dir = fixture();
        let store = SqliteStore::in_memory().unwrap();
        let ingestor = Ingestor::new(VeritasConfig::default());
        ingestor.ingest_checkout(&store, &checkout(dir.path())).await.unwrap();

        write(
            dir.path(),
            "shop/cart.py",
            "class Cart:\n    def __init__(self):\n        self.items = []\n\n    def add(self, item, qty=1):\n        self.items.append(item)\n",
        );
        std::fs::remove_file(dir.path().join("shop/__init__.py")).unwrap();

        let report = ingestor.ingest_checkout(&store, &checkout(dir.path())).await.unwrap();
        assert_eq!(report.files_parsed, 1);
        assert_eq!(report.nodes_updated, 1);
        assert_eq!(report.files_removed, 1);
        assert_eq!(store.stats().await.unwrap().files, 1);
    }

    #[tokio::test]
    async fn broken_file_does_not_stop_ingestion() {
        let dir = fixture();
        write(dir.path(), "shop/broken.py", "def oops(:\n    pass\n");
        let store = SqliteStore::in_memory().unwrap();
        let report = Ingestor::new(VeritasConfig::default())
            .ingest_checkout(&store, &checkout(dir.path()))
            .await
            .unwrap();

        assert_eq!(report.files_parsed, 2);
        assert_eq!(report.files_failed, 1);
        assert_eq!(report.failures[0].relative_path, "shop/broken.py");
        assert_eq!(report.failures[0].status, FileStatus::Failed);
    }

    #[tokio::test]
    async fn zero_budget_times_out() {
        let dir = fixture();
        let store = SqliteStore::in_memory().unwrap();
        let mut config = VeritasConfig::default();
        config.ingest.file_budget_ms = 0;
        let report = Ingestor::new(config)
            .ingest_checkout(&store, &checkout(dir.path()))
            .await
            .unwrap();
        assert_eq!(report.files_failed, 2);
        assert!(
            report
                .failures
                .iter()
                .all(|f| f.status == FileStatus::TimedOut)
        );
    }

    #[tokio::test]
    async fn cancelled_run_leaves_files_pending() {
        let dir = fixture();
        let store = SqliteStore::in_memory().unwrap();
        let ingestor = Ingestor::new(VeritasConfig::default());
        ingestor.cancel_flag().store(true, Ordering::Relaxed);

        let report = ingestor.ingest_checkout(&store, &checkout(dir.path())).await.unwrap();
        assert!(report.cancelled);
        assert_eq!(report.files_pending, 2);
        assert_eq!(report.files_parsed, 0);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.files_pending, 2);
        assert_eq!(stats.classes, 0);
    }

    #[tokio::test]
    async fn persistent_write_conflict_fails_the_file() {
        let dir = fixture();
        let store = SqliteStore::in_memory().unwrap();
        let mut config = VeritasConfig::default();
        config.ingest.write_retries = 2;
        config.ingest.retry_backoff_ms = 1;

        let repo_key = repository_key("local/shop", DEFAULT_REF);
        let claim = store
            .begin_file_write(&file_key(&repo_key, "shop/cart.py"))
            .unwrap();
        let report = Ingestor::new(config)
            .ingest_checkout(&store, &checkout(dir.path()))
            .await
            .unwrap();
        drop(claim);

        assert_eq!(report.files_parsed, 1);
        assert_eq!(report.files_failed, 1);
        assert!(report.failures[0].message.contains("3 attempts"));
    }

    #[tokio::test]
    async fn contended_status_writes_do_not_abort() {
        let dir = fixture();
        write(dir.path(), "shop/broken.py", "def oops(:\n    pass\n");
        let store = SqliteStore::in_memory().unwrap();
        let mut config = VeritasConfig::default();
        config.ingest.write_retries = 1;
        config.ingest.retry_backoff_ms = 1;

        let repo_key = repository_key("local/shop", DEFAULT_REF);
        let claim = store
            .begin_file_write(&file_key(&repo_key, "shop/broken.py"))
            .unwrap();
        let report = Ingestor::new(config.clone())
            .ingest_checkout(&store, &checkout(dir.path()))
            .await
            .unwrap();
        assert_eq!(report.files_parsed, 2);
        assert_eq!(report.files_failed, 1);
        assert_eq!(report.failures[0].relative_path, "shop/broken.py");

        let cancelled = Ingestor::new(config);
        cancelled.cancel_flag().store(true, Ordering::Relaxed);
        let report = cancelled
            .ingest_checkout(&store, &checkout(dir.path()))
            .await
            .unwrap();
        drop(claim);
        assert!(report.cancelled);
        assert_eq!(report.files_pending, 3);
    }

    #[tokio::test]
    async fn inheritance_cycles_become_warnings() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.py", "from b import B\n\nclass A(B):\n    pass\n");
        write(dir.path(), "b.py", "from a import A\n\nclass B(A):\n    pass\n");
        let store = SqliteStore::in_memory().unwrap();
        let report = Ingestor::new(VeritasConfig::default())
            .ingest_checkout(&store, &checkout(dir.path()))
            .await
            .unwrap();
        assert_eq!(report.warnings, vec!["Inheritance cycle: a.A -> b.B"]);
    }
}
