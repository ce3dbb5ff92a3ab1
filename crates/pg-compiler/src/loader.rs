//! Background list loading
//!
//! Lists are read and compiled on tokio's blocking pool, then published to the
//! registry as one `FilterSet` so no tab ever sees a mix of old and new lists.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{info, warn};
use pg_core::filter_list::FilterList;
use pg_core::registry::{FilterListRegistry, FilterSet};
use pg_core::types::ListKind;
use tokio::task::JoinHandle;

use crate::{compile, CompileError};

#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    #[error("failed to read {list} from '{}': {source}", path.display())]
    Io {
        list: ListKind,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to compile {list}: {source}")]
    Compile {
        list: ListKind,
        #[source]
        source: CompileError,
    },
    #[error("no filter lists found in {0}")]
    NoLists(String),
    #[error("list compilation task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Where raw list text comes from.
pub trait ListSource: Send + Sync {
    /// Raw text of `kind`, or `None` if this source does not have it.
    fn read(&self, kind: ListKind) -> Result<Option<String>, LoaderError>;

    /// Human-readable description for logs.
    fn describe(&self) -> String;
}

/// Lists stored as `<dir>/<list file name>`.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    dir: PathBuf,
}

impl DirectorySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, kind: ListKind) -> PathBuf {
        self.dir.join(kind.file_name())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl ListSource for DirectorySource {
    fn read(&self, kind: ListKind) -> Result<Option<String>, LoaderError> {
        let path = self.path_for(kind);
        match fs::read_to_string(&path) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(LoaderError::Io {
                list: kind,
                path,
                source,
            }),
        }
    }

    fn describe(&self) -> String {
        format!("'{}'", self.dir.display())
    }
}

/// In-memory lists, for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    lists: HashMap<ListKind, String>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_list(mut self, kind: ListKind, text: impl Into<String>) -> Self {
        self.lists.insert(kind, text.into());
        self
    }
}

impl ListSource for MemorySource {
    fn read(&self, kind: ListKind) -> Result<Option<String>, LoaderError> {
        Ok(self.lists.get(&kind).cloned())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoadSummary {
    pub loaded: Vec<ListKind>,
    pub missing: Vec<ListKind>,
    pub active_rules: usize,
    pub elapsed: Duration,
}

/// Compile every list from `source` and install them in one swap.
///
/// On failure nothing is installed: the initial load fails the registry's
/// gate, a reload keeps the lists already in place.
pub async fn load_lists(
    registry: Arc<FilterListRegistry>,
    source: Arc<dyn ListSource>,
) -> Result<LoadSummary, LoaderError> {
    match compile_all(Arc::clone(&source)).await {
        Ok((set, mut summary)) => {
            summary.active_rules = set.iter().map(|(_, l)| l.health().active_rules()).sum();
            registry.install_all(set);
            registry.mark_loaded();
            info!(
                "Loaded {} lists ({} active rules) from {} in {:?}",
                summary.loaded.len(),
                summary.active_rules,
                source.describe(),
                summary.elapsed
            );
            Ok(summary)
        }
        Err(e) => {
            registry.mark_failed(e.to_string());
            Err(e)
        }
    }
}

async fn compile_all(source: Arc<dyn ListSource>) -> Result<(FilterSet, LoadSummary), LoaderError> {
    let start = Instant::now();

    let handles: Vec<(ListKind, JoinHandle<Result<Option<FilterList>, LoaderError>>)> = ListKind::ALL
        .into_iter()
        .map(|kind| {
            let source = Arc::clone(&source);
            let handle = tokio::task::spawn_blocking(move || {
                let Some(text) = source.read(kind)? else {
                    return Ok(None);
                };
                compile(kind.display_name(), &text)
                    .map(Some)
                    .map_err(|source| LoaderError::Compile { list: kind, source })
            });
            (kind, handle)
        })
        .collect();

    let mut set = FilterSet::default();
    let mut summary = LoadSummary::default();
    for (kind, handle) in handles {
        match handle.await?? {
            Some(list) => {
                set.set(kind, Arc::new(list));
                summary.loaded.push(kind);
            }
            None => {
                warn!("{kind} not found in {}", source.describe());
                summary.missing.push(kind);
            }
        }
    }

    if summary.loaded.is_empty() {
        return Err(LoaderError::NoLists(source.describe()));
    }

    summary.elapsed = start.elapsed();
    Ok((set, summary))
}

/// Run the initial load in the background. Classification waits on the
/// registry's gate until it finishes.
pub fn spawn_initial_load(
    registry: Arc<FilterListRegistry>,
    source: Arc<dyn ListSource>,
) -> JoinHandle<Result<LoadSummary, LoaderError>> {
    tokio::spawn(load_lists(registry, source))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pg_core::registry::LoadState;

    fn source() -> Arc<dyn ListSource> {
        Arc::new(
            MemorySource::new()
                .with_list(ListKind::EasyList, "||ads.com^\n")
                .with_list(ListKind::EasyPrivacy, "||tracker.net^\n@@||tracker.net/ok.js\n"),
        )
    }

    #[tokio::test]
    async fn test_load_installs_all_lists() {
        let registry = Arc::new(FilterListRegistry::default());
        let summary = load_lists(Arc::clone(&registry), source()).await.unwrap();

        assert_eq!(summary.loaded, vec![ListKind::EasyList, ListKind::EasyPrivacy]);
        assert_eq!(summary.missing.len(), ListKind::COUNT - 2);
        assert_eq!(summary.active_rules, 3);
        assert_eq!(registry.load_state(), LoadState::Ready);

        let lists = registry.lists();
        assert_eq!(lists.get(ListKind::EasyList).block_rules().len(), 1);
        assert_eq!(lists.get(ListKind::EasyPrivacy).allow_rules().len(), 1);
        assert!(lists.get(ListKind::UltraList).is_empty());
    }

    #[tokio::test]
    async fn test_spawn_initial_load_opens_gate() {
        let registry = Arc::new(FilterListRegistry::default());
        let handle = spawn_initial_load(Arc::clone(&registry), source());
        handle.await.unwrap().unwrap();

        let waiter = Arc::clone(&registry);
        let lists = tokio::task::spawn_blocking(move || waiter.wait_for_lists())
            .await
            .unwrap()
            .unwrap();
        assert!(!lists.get(ListKind::EasyList).is_empty());
    }

    #[tokio::test]
    async fn test_empty_source_fails_closed() {
        let registry = Arc::new(FilterListRegistry::default());
        let result = load_lists(Arc::clone(&registry), Arc::new(MemorySource::new())).await;
        assert!(matches!(result, Err(LoaderError::NoLists(_))));
        assert_eq!(registry.load_state(), LoadState::Failed);
    }

    #[tokio::test]
    async fn test_failed_reload_keeps_previous_lists() {
        let registry = Arc::new(FilterListRegistry::default());
        load_lists(Arc::clone(&registry), source()).await.unwrap();

        let broken: Arc<dyn ListSource> =
            Arc::new(MemorySource::new().with_list(ListKind::EasyList, "||a.com^\n\0"));
        let result = load_lists(Arc::clone(&registry), broken).await;
        assert!(matches!(result, Err(LoaderError::Compile { list: ListKind::EasyList, .. })));

        assert_eq!(registry.load_state(), LoadState::Ready);
        assert_eq!(registry.lists().get(ListKind::EasyPrivacy).block_rules().len(), 1);
    }

    #[tokio::test]
    async fn test_directory_source() {
        let dir = std::env::temp_dir().join(format!("pg-loader-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("easylist.txt"), "||ads.com^\n").unwrap();

        let source = DirectorySource::new(&dir);
        assert!(source.read(ListKind::EasyList).unwrap().is_some());
        assert!(source.read(ListKind::UltraList).unwrap().is_none());

        let registry = Arc::new(FilterListRegistry::default());
        let summary = load_lists(Arc::clone(&registry), Arc::new(source)).await.unwrap();
        assert_eq!(summary.loaded, vec![ListKind::EasyList]);

        fs::remove_dir_all(&dir).unwrap();
    }
}
