//! Duplication checker.
//!
//! Before work is scheduled, the checker compares it against the artifacts
//! that already exist. The artifact store is abstracted behind
//! [`ArtifactSource`] and the comparison behind [`SimilarityPredicate`], so the
//! execution loop never depends on how either is implemented.
//!
//! The artifact tree is scanned once and cached for the session; call
//! [`DuplicationChecker::refresh`] to rescan.

use crate::config::DedupConfig;
use crate::task::Task;
use chrono::{DateTime, Utc};
use ignore::WalkBuilder;
use std::collections::BTreeSet;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Read-only view of an external artifact store.
pub trait ArtifactSource: Send + Sync + fmt::Debug {
    /// Lists the identifiers of every artifact currently present.
    ///
    /// # Errors
    /// Returns an IO error if the store cannot be read.
    fn list_identifiers(&self) -> io::Result<Vec<String>>;
}

/// Decides whether a task's outcome is already present in a snapshot.
pub trait SimilarityPredicate: Send + Sync + fmt::Debug {
    /// Returns true if an equivalent artifact exists.
    fn is_duplicate(&self, task: &Task, snapshot: &ArtifactSnapshot) -> bool;
}

/// Artifact identifiers captured by one scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactSnapshot {
    identifiers: BTreeSet<String>,
    scanned_at: Option<DateTime<Utc>>,
}

impl ArtifactSnapshot {
    /// Builds a snapshot from identifiers.
    #[must_use]
    pub fn new<I, S>(identifiers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            identifiers: identifiers.into_iter().map(Into::into).collect(),
            scanned_at: Some(Utc::now()),
        }
    }

    /// Exact membership test.
    #[must_use]
    pub fn contains(&self, identifier: &str) -> bool {
        self.identifiers.contains(identifier)
    }

    /// Iterates identifiers in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.identifiers.iter().map(String::as_str)
    }

    /// Number of identifiers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.identifiers.len()
    }

    /// Whether the snapshot is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.identifiers.is_empty()
    }

    /// When the snapshot was taken.
    #[must_use]
    pub const fn scanned_at(&self) -> Option<DateTime<Utc>> {
        self.scanned_at
    }
}

/// Artifact source backed by a directory tree.
///
/// Identifiers are file stems (`BookingForm.tsx` -> `BookingForm`). Standard
/// ignore files are honored.
#[derive(Debug, Clone)]
pub struct FsArtifactSource {
    root: PathBuf,
    extensions: Vec<String>,
}

impl FsArtifactSource {
    /// Creates a source rooted at `root`; an empty extension list accepts every file.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, extensions: Vec<String>) -> Self {
        let extensions =
            extensions.into_iter().map(|e| e.trim_start_matches('.').to_lowercase()).collect();
        Self { root: root.into(), extensions }
    }

    /// The scanned root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn accepts(&self, path: &Path) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| self.extensions.iter().any(|allowed| allowed.eq_ignore_ascii_case(ext)))
    }
}

impl ArtifactSource for FsArtifactSource {
    fn list_identifiers(&self) -> io::Result<Vec<String>> {
        if !self.root.exists() {
            warn!(root = %self.root.display(), "Artifact root does not exist");
            return Ok(Vec::new());
        }

        let mut builder = WalkBuilder::new(&self.root);
        builder.follow_links(false);
        builder.add_custom_ignore_filename(".autopilotignore");

        let mut identifiers = Vec::new();
        for entry in builder.build() {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    debug!(error = %e, "Skipping unreadable artifact entry");
                    continue;
                }
            };
            if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                continue;
            }
            let path = entry.path();
            if !self.accepts(path) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                identifiers.push(stem.to_string());
            }
        }
        Ok(identifiers)
    }
}

/// Case-insensitive, whitespace-collapsed identifier matcher.
///
/// Identifiers and task text are split on separators and camel-case humps, so
/// `BookingForm`, `booking-form` and "Booking  form" all normalize to
/// `booking form`. A task with a `target` is matched on the target alone;
/// otherwise an identifier matches when its words appear, in order, as whole
/// words in the description.
#[derive(Debug, Clone)]
pub struct NormalizedTextMatcher {
    min_identifier_len: usize,
}

impl NormalizedTextMatcher {
    /// Creates a matcher ignoring identifiers shorter than `min_identifier_len`.
    #[must_use]
    pub const fn new(min_identifier_len: usize) -> Self {
        Self { min_identifier_len }
    }
}

impl Default for NormalizedTextMatcher {
    fn default() -> Self {
        Self::new(4)
    }
}

impl SimilarityPredicate for NormalizedTextMatcher {
    fn is_duplicate(&self, task: &Task, snapshot: &ArtifactSnapshot) -> bool {
        if let Some(target) = &task.target {
            let wanted = compact(&normalize(target));
            if wanted.is_empty() {
                return false;
            }
            return snapshot.iter().any(|id| compact(&normalize(id)) == wanted);
        }

        let haystack = format!(" {} ", normalize(&task.description));
        let squashed: BTreeSet<String> =
            haystack.split_whitespace().map(ToString::to_string).collect();

        snapshot.iter().any(|id| {
            let needle = normalize(id);
            let joined = compact(&needle);
            if joined.chars().count() < self.min_identifier_len {
                return false;
            }
            haystack.contains(&format!(" {} ", needle)) || squashed.contains(&joined)
        })
    }
}

/// Lowercases, splits camel case and separators, and collapses whitespace.
#[must_use]
pub fn normalize(text: &str) -> String {
    let mut spaced = String::with_capacity(text.len() + 8);
    let mut prev: Option<char> = None;
    for c in text.chars() {
        if c.is_alphanumeric() {
            if c.is_uppercase() && prev.is_some_and(|p| p.is_lowercase() || p.is_ascii_digit()) {
                spaced.push(' ');
            }
            spaced.extend(c.to_lowercase());
        } else {
            spaced.push(' ');
        }
        prev = Some(c);
    }
    spaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn compact(normalized: &str) -> String {
    normalized.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Cached artifact snapshot plus the predicate that queries it.
#[derive(Debug)]
pub struct DuplicationChecker {
    source: Option<Arc<dyn ArtifactSource>>,
    predicate: Box<dyn SimilarityPredicate>,
    snapshot: RwLock<Option<Arc<ArtifactSnapshot>>>,
}

impl DuplicationChecker {
    /// Creates a checker over `source` using `predicate`.
    #[must_use]
    pub fn new(
        source: Option<Arc<dyn ArtifactSource>>,
        predicate: Box<dyn SimilarityPredicate>,
    ) -> Self {
        Self { source, predicate, snapshot: RwLock::new(None) }
    }

    /// Checker with no artifact store; nothing is ever a duplicate.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(None, Box::new(NormalizedTextMatcher::default()))
    }

    /// Builds the filesystem-backed checker described by `config`.
    #[must_use]
    pub fn from_config(config: &DedupConfig) -> Self {
        let source = config.artifact_root.as_ref().map(|root| {
            Arc::new(FsArtifactSource::new(root.clone(), config.extensions.clone()))
                as Arc<dyn ArtifactSource>
        });
        Self::new(source, Box::new(NormalizedTextMatcher::new(config.min_identifier_len)))
    }

    /// Whether an artifact store is configured.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.source.is_some()
    }

    /// Scans the artifact store and caches the result.
    ///
    /// A failed scan is logged and yields an empty snapshot rather than an
    /// error, so an unreadable store never blocks scheduling.
    pub async fn scan_existing_work(&self) -> Arc<ArtifactSnapshot> {
        let snapshot = Arc::new(self.scan().await);
        *self.snapshot.write().await = Some(Arc::clone(&snapshot));
        snapshot
    }

    /// The cached snapshot, if a scan has happened.
    pub async fn cached(&self) -> Option<Arc<ArtifactSnapshot>> {
        self.snapshot.read().await.clone()
    }

    /// Invalidates the cache and rescans.
    pub async fn refresh(&self) -> Arc<ArtifactSnapshot> {
        self.snapshot.write().await.take();
        debug!("Artifact snapshot invalidated");
        self.scan_existing_work().await
    }

    /// Returns true if `task`'s outcome already exists.
    ///
    /// Uses the cached snapshot, scanning first if none exists yet.
    pub async fn is_duplicate(&self, task: &Task) -> bool {
        if self.source.is_none() {
            return false;
        }
        let snapshot = match self.cached().await {
            Some(snapshot) => snapshot,
            None => self.scan_existing_work().await,
        };
        let duplicate = self.predicate.is_duplicate(task, &snapshot);
        if duplicate {
            debug!(task_id = %task.id, "Task matches an existing artifact");
        }
        duplicate
    }

    async fn scan(&self) -> ArtifactSnapshot {
        let Some(source) = self.source.clone() else {
            return ArtifactSnapshot::default();
        };

        let listed = tokio::task::spawn_blocking(move || source.list_identifiers()).await;
        match listed {
            Ok(Ok(identifiers)) => {
                let snapshot = ArtifactSnapshot::new(identifiers);
                info!(artifact_count = snapshot.len(), "Scanned existing work");
                snapshot
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Artifact scan failed, using empty snapshot");
                ArtifactSnapshot::default()
            }
            Err(e) => {
                warn!(error = %e, "Artifact scan task panicked, using empty snapshot");
                ArtifactSnapshot::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    #[derive(Debug)]
    struct CountingSource {
        identifiers: Vec<String>,
        scans: AtomicUsize,
    }

    impl ArtifactSource for CountingSource {
        fn list_identifiers(&self) -> io::Result<Vec<String>> {
            self.scans.fetch_add(1, Ordering::SeqCst);
            Ok(self.identifiers.clone())
        }
    }

    fn matcher() -> NormalizedTextMatcher {
        NormalizedTextMatcher::new(4)
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("BookingForm"), "booking form");
        assert_eq!(normalize("booking-form"), "booking form");
        assert_eq!(normalize("  Booking \t FORM  "), "booking form");
        assert_eq!(normalize("header_v2Footer"), "header v2 footer");
    }

    #[test]
    fn test_description_matches_identifier_words() {
        let snapshot = ArtifactSnapshot::new(["BookingForm", "Header"]);
        let task = Task::new("t1", "Create the booking  form component", 1);
        assert!(matcher().is_duplicate(&task, &snapshot));

        let task = Task::new("t2", "Create a BookingForm widget", 1);
        assert!(matcher().is_duplicate(&task, &snapshot));

        let task = Task::new("t3", "Create a payment form", 1);
        assert!(!matcher().is_duplicate(&task, &snapshot));
    }

    #[test]
    fn test_match_requires_whole_words() {
        let snapshot = ArtifactSnapshot::new(["Header"]);
        let task = Task::new("t1", "Extract headers from the page", 1);
        assert!(!matcher().is_duplicate(&task, &snapshot));
    }

    #[test]
    fn test_short_identifiers_are_ignored() {
        let snapshot = ArtifactSnapshot::new(["ui", "App"]);
        let task = Task::new("t1", "Build the ui for the app", 1);
        assert!(!matcher().is_duplicate(&task, &snapshot));
    }

    #[test]
    fn test_target_takes_precedence() {
        let snapshot = ArtifactSnapshot::new(["Footer"]);
        let task = Task::new("t1", "Extract the footer", 1).with_target("SiteFooter");
        assert!(!matcher().is_duplicate(&task, &snapshot));

        let task = Task::new("t2", "Something unrelated", 1).with_target("footer");
        assert!(matcher().is_duplicate(&task, &snapshot));
    }

    #[tokio::test]
    async fn test_fs_source_lists_stems() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("components");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("BookingForm.tsx"), "export {}").unwrap();
        fs::write(temp_dir.path().join("notes.txt"), "ignored").unwrap();
        fs::write(temp_dir.path().join("README.md"), "# readme").unwrap();

        let source = FsArtifactSource::new(temp_dir.path(), vec!["tsx".to_string(), ".md".to_string()]);
        let mut ids = source.list_identifiers().unwrap();
        ids.sort();
        assert_eq!(ids, vec!["BookingForm", "README"]);
    }

    #[tokio::test]
    async fn test_missing_root_is_empty() {
        let source = FsArtifactSource::new("/nonexistent/autopilot/artifacts", vec![]);
        assert!(source.list_identifiers().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_is_cached_until_refresh() {
        let source = Arc::new(CountingSource {
            identifiers: vec!["BookingForm".to_string()],
            scans: AtomicUsize::new(0),
        });
        let checker = DuplicationChecker::new(
            Some(Arc::clone(&source) as Arc<dyn ArtifactSource>),
            Box::new(matcher()),
        );

        let task = Task::new("t1", "Build booking form", 1);
        assert!(checker.is_duplicate(&task).await);
        assert!(checker.is_duplicate(&task).await);
        assert_eq!(source.scans.load(Ordering::SeqCst), 1);

        let snapshot = checker.refresh().await;
        assert!(snapshot.contains("BookingForm"));
        assert_eq!(source.scans.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_disabled_checker_never_matches() {
        let checker = DuplicationChecker::disabled();
        assert!(!checker.is_enabled());
        let task = Task::new("t1", "Anything", 1).with_target("Anything");
        assert!(!checker.is_duplicate(&task).await);
        assert!(checker.scan_existing_work().await.is_empty());
    }
}
