use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use veritas_graphs::{AttributeKind, Param, UsageKind};

/// Language tag stored on every file record.
pub const PYTHON: &str = "python";

// ── Keys ───────────────────────────────────────────────────────────

/// Canonical form of a repository URL or path.
///
/// Schemes, credentials, a trailing `.git` and trailing slashes are removed
/// and the host of a remote URL is lowercased, so `https://GitHub.com/o/r.git`
/// and `git@github.com:o/r` canonicalize to the same `github.com/o/r`.
pub fn canonical_repository_url(url: &str) -> String {
    let mut s = url.trim().trim_end_matches('/');
    if let Some(stripped) = s.strip_suffix(".git") {
        s = stripped.trim_end_matches('/');
    }

    let mut remote = false;
    for scheme in ["https://", "http://", "ssh://", "git+ssh://", "git://"] {
        if let Some(rest) = s.strip_prefix(scheme) {
            s = rest;
            remote = true;
            break;
        }
    }
    if let Some(rest) = s.strip_prefix("file://") {
        return rest.to_string();
    }

    let mut owned = s.to_string();
    if !remote {
        // scp-like `user@host:path`
        if let Some((user_host, path)) = s.split_once(':') {
            if user_host.contains('@') && !user_host.contains('/') {
                owned = format!("{user_host}/{}", path.trim_start_matches('/'));
                remote = true;
            }
        }
    }
    if !remote {
        return owned;
    }

    let (host, path) = owned.split_once('/').unwrap_or((owned.as_str(), ""));
    let host = host.rsplit('@').next().unwrap_or(host).to_lowercase();
    if path.is_empty() {
        host
    } else {
        format!("{host}/{path}")
    }
}

/// `canonical_url@ref`
pub fn repository_key(url: &str, git_ref: &str) -> String {
    format!("{}@{git_ref}", canonical_repository_url(url))
}

/// `repository_key/relative_path` with `/` separators.
pub fn file_key(repository_key: &str, relative_path: &str) -> String {
    format!("{repository_key}/{}", relative_path.replace('\\', "/"))
}

/// Last path segment of a repository URL, used as its display name.
pub fn repository_name(url: &str) -> String {
    let canonical = canonical_repository_url(url);
    canonical
        .rsplit('/')
        .find(|s| !s.is_empty())
        .unwrap_or(canonical.as_str())
        .to_string()
}

// ── Store records ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Parsed,
    Failed,
    TimedOut,
    Pending,
}

impl FileStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Parsed => "parsed",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::Pending => "pending",
        }
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "parsed" => Ok(Self::Parsed),
            "failed" => Ok(Self::Failed),
            "timed_out" => Ok(Self::TimedOut),
            "pending" => Ok(Self::Pending),
            other => Err(format!("unknown file status `{other}`")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryRecord {
    pub key: String,
    pub name: String,
    pub url: String,
    pub git_ref: String,
    /// Resolved commit id, when the source is a git checkout.
    pub commit_id: Option<String>,
    pub ingested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub key: String,
    pub repository_key: String,
    pub relative_path: String,
    pub module_path: String,
    pub language: String,
    /// Content hash of the last successfully extracted version.
    pub last_hash: Option<String>,
    pub status: FileStatus,
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassView {
    pub key: String,
    pub name: String,
    pub module_path: String,
    pub file_key: String,
    /// Base keys in declaration order; may reference classes that do not exist.
    pub bases: Vec<String>,
    pub is_abstract: bool,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct MethodView {
    pub key: String,
    pub class_key: String,
    pub name: String,
    pub params: Vec<Param>,
    pub is_static: bool,
    pub is_class_method: bool,
    pub is_property: bool,
    pub is_abstract: bool,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionView {
    pub key: String,
    pub file_key: String,
    pub name: String,
    pub module_path: String,
    pub params: Vec<Param>,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeView {
    pub key: String,
    pub class_key: String,
    pub name: String,
    pub kind: AttributeKind,
    pub line: usize,
}

/// Node counts touched by a file upsert or removal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertCounts {
    pub added: u64,
    pub updated: u64,
    pub removed: u64,
    /// Declarations left alone because another file already owns their key.
    pub conflicts: u64,
}

impl std::ops::AddAssign for UpsertCounts {
    fn add_assign(&mut self, rhs: Self) {
        self.added += rhs.added;
        self.updated += rhs.updated;
        self.removed += rhs.removed;
        self.conflicts += rhs.conflicts;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovalCounts {
    pub files_removed: u64,
    pub nodes_removed: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreStats {
    pub repositories: u64,
    pub files: u64,
    pub files_failed: u64,
    pub files_pending: u64,
    pub classes: u64,
    pub methods: u64,
    pub attributes: u64,
    pub functions: u64,
    pub db_size_bytes: u64,
}

// ── Ingestion ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestFailure {
    pub relative_path: String,
    pub status: FileStatus,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestReport {
    pub repository_key: String,
    pub files_total: u64,
    pub files_parsed: u64,
    pub files_unchanged: u64,
    pub files_failed: u64,
    pub files_pending: u64,
    pub files_removed: u64,
    pub nodes_added: u64,
    pub nodes_updated: u64,
    pub nodes_removed: u64,
    pub failures: Vec<IngestFailure>,
    /// Non-fatal findings such as inheritance cycles.
    pub warnings: Vec<String>,
    pub cancelled: bool,
    pub duration_ms: u64,
}

// ── Validation ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Valid,
    Hallucinated,
    SignatureMismatch,
    Uncertain,
    Unknown,
}

impl Verdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Valid => "VALID",
            Self::Hallucinated => "HALLUCINATED",
            Self::SignatureMismatch => "SIGNATURE_MISMATCH",
            Self::Uncertain => "UNCERTAIN",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Fixed confidence attached to each verdict.
    pub fn confidence(self) -> f64 {
        match self {
            Self::Valid | Self::Hallucinated => 1.0,
            Self::SignatureMismatch => 0.8,
            Self::Uncertain | Self::Unknown => 0.0,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One usage event with its verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedEvent {
    pub line: usize,
    pub column: usize,
    pub kind: UsageKind,
    pub symbol: String,
    pub verdict: Verdict,
    pub confidence: f64,
    pub detail: String,
    /// Closest existing names, for HALLUCINATED and SIGNATURE_MISMATCH.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_signature: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    #[serde(rename = "VALID")]
    pub valid: usize,
    #[serde(rename = "HALLUCINATED")]
    pub hallucinated: usize,
    #[serde(rename = "SIGNATURE_MISMATCH")]
    pub signature_mismatch: usize,
    #[serde(rename = "UNCERTAIN")]
    pub uncertain: usize,
    #[serde(rename = "UNKNOWN")]
    pub unknown: usize,
    pub total: usize,
    /// Human-readable description of the hallucination-rate denominator.
    pub rate_basis: String,
    pub rate_denominator: usize,
}

impl ReportSummary {
    pub fn count(&self, verdict: Verdict) -> usize {
        match verdict {
            Verdict::Valid => self.valid,
            Verdict::Hallucinated => self.hallucinated,
            Verdict::SignatureMismatch => self.signature_mismatch,
            Verdict::Uncertain => self.uncertain,
            Verdict::Unknown => self.unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub id: Uuid,
    /// Script path, or `<inline>` for text input.
    pub script: String,
    pub generated_at: DateTime<Utc>,
    pub summary: ReportSummary,
    pub hallucination_rate: f64,
    /// The validation budget ran out before every event was checked.
    pub truncated: bool,
    pub failures: Vec<String>,
    pub events: Vec<ValidatedEvent>,
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn canonical_urls_agree_across_forms() {
        let expected = "github.com/acme/widgets";
        for url in [
            "https://github.com/acme/widgets",
            "https://GitHub.com/acme/widgets.git",
            "https://github.com/acme/widgets/",
            "http://user@github.com/acme/widgets",
            "git@github.com:acme/widgets.git",
            "ssh://git@github.com/acme/widgets",
        ] {
            assert_eq!(canonical_repository_url(url), expected, "for {url}");
        }
    }

    #[test]
    fn local_paths_keep_case() {
        assert_eq!(canonical_repository_url("/srv/Repos/Lib/"), "/srv/Repos/Lib");
        assert_eq!(canonical_repository_url("file:///srv/Repos/Lib"), "/srv/Repos/Lib");
    }

    #[test]
    fn keys_compose() {
        let repo = repository_key("https://github.com/acme/widgets.git", "main");
        assert_eq!(repo, "github.com/acme/widgets@main");
        assert_eq!(
            file_key(&repo, "pkg/core.py"),
            "github.com/acme/widgets@main/pkg/core.py"
        );
        assert_eq!(repository_name("git@github.com:acme/widgets.git"), "widgets");
    }

    #[test]
    fn file_status_round_trips_through_str() {
        for status in [
            FileStatus::Parsed,
            FileStatus::Failed,
            FileStatus::TimedOut,
            FileStatus::Pending,
        ] {
            assert_eq!(status.as_str().parse::<FileStatus>().unwrap(), status);
        }
        assert!("bogus".parse::<FileStatus>().is_err());
    }

    #[test]
    fn verdict_serializes_screaming() {
        let json = serde_json::to_string(&Verdict::SignatureMismatch).unwrap();
        assert_eq!(json, "\"SIGNATURE_MISMATCH\"");
        assert!((Verdict::SignatureMismatch.confidence() - 0.8).abs() < f64::EPSILON);
    }

    proptest! {
        #[test]
        fn canonicalization_is_idempotent(
            host in "[A-Za-z]{1,10}\\.(com|org|io)",
            owner in "[a-z0-9]{1,10}",
            repo in "[a-z0-9_-]{1,12}",
            suffix in prop_oneof![Just(""), Just(".git"), Just("/"), Just(".git/")],
            scheme in prop_oneof![Just("https://"), Just("http://"), Just("ssh://git@")],
        ) {
            let url = format!("{scheme}{host}/{owner}/{repo}{suffix}");
            let once = canonical_repository_url(&url);
            prop_assert_eq!(canonical_repository_url(&once), once.clone());
            prop_assert_eq!(once, format!("{}/{owner}/{repo}", host.to_lowercase()));
        }
    }
}
