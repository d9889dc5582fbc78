//! Discovery of EVT data files on local disk or in a remote bucket.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use regex::Regex;
use thiserror::Error;

use crate::remote::{RemoteError, RemoteStore};

/// Errors that can occur during file discovery.
#[derive(Error, Debug)]
pub enum LocatorError {
    #[error("failed to read directory '{path}': {source}")]
    ReadDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

/// Result type for locator operations.
pub type Result<T> = std::result::Result<T, LocatorError>;

/// Where to discover input files.
pub enum Source {
    /// A local directory, searched recursively.
    Local(PathBuf),
    /// A remote bucket; keys are listed under the cruise-name prefix.
    Remote(Arc<dyn RemoteStore>),
}

/// One discovered input file. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRef {
    /// Local path or remote key.
    pub key: String,
    /// Cruise this file belongs to.
    pub cruise: String,
    /// Position in discovery order.
    pub ordinal: usize,
}

impl FileRef {
    /// Final path component of the key.
    pub fn file_name(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }
}

/// Opens the bytes behind a [`FileRef`], local or remote.
pub trait FileSource: Send + Sync {
    fn open(&self, file: &FileRef) -> std::io::Result<Box<dyn Read + Send>>;
}

/// File source for local paths.
pub struct LocalSource;

impl FileSource for LocalSource {
    fn open(&self, file: &FileRef) -> std::io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(File::open(&file.key)?))
    }
}

/// File source backed by a remote store.
pub struct RemoteSource {
    store: Arc<dyn RemoteStore>,
}

impl RemoteSource {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self { store }
    }
}

impl FileSource for RemoteSource {
    fn open(&self, file: &FileRef) -> std::io::Result<Box<dyn Read + Send>> {
        self.store
            .fetch(&file.key)
            .map_err(std::io::Error::other)
    }
}

/// True when `name` matches a recognized EVT file naming pattern: either
/// new-style timestamp names (`2014-07-04T00-00-02+00-00`) or old-style
/// numbered names (`42.evt`), each optionally gzipped.
pub fn is_evt_name(name: &str) -> bool {
    let new_style =
        Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}-\d{2}-\d{2}[+-]\d{2}-?\d{2}(?:\.evt)?(?:\.gz)?$")
            .unwrap();
    let old_style = Regex::new(r"^\d+\.evt(?:\.gz)?$").unwrap();
    new_style.is_match(name) || old_style.is_match(name)
}

/// Resolve a source and cruise name into an ordered list of files.
///
/// Candidates not matching a recognized EVT naming pattern are silently
/// excluded. Discovery order is stable: a sorted recursive walk for local
/// directories, the store's listing order for remote buckets. When `limit`
/// is given, the list is truncated to the first `limit` entries.
pub fn locate(source: &Source, cruise: &str, limit: Option<usize>) -> Result<Vec<FileRef>> {
    let keys = match source {
        Source::Local(root) => {
            let mut paths = Vec::new();
            walk(root, &mut paths)?;
            paths
                .into_iter()
                .map(|p| p.to_string_lossy().into_owned())
                .collect()
        }
        Source::Remote(store) => store.list_objects(cruise)?,
    };

    let mut files: Vec<FileRef> = keys
        .into_iter()
        .filter(|key| {
            let name = key.rsplit('/').next().unwrap_or(key);
            is_evt_name(name)
        })
        .enumerate()
        .map(|(ordinal, key)| FileRef {
            key,
            cruise: cruise.to_string(),
            ordinal,
        })
        .collect();

    if let Some(limit) = limit {
        files.truncate(limit);
    }

    Ok(files)
}

/// Recursive directory walk in sorted order.
fn walk(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    let entries = std::fs::read_dir(dir).map_err(|e| LocatorError::ReadDirectory {
        path: dir.to_path_buf(),
        source: e,
    })?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .collect();
    paths.sort();

    for path in paths {
        if path.is_dir() {
            walk(&path, out)?;
        } else {
            out.push(path);
        }
    }

    Ok(())
}
