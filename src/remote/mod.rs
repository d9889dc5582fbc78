//! Remote object-store collaborator interface.
//!
//! The pipeline only needs two operations from a remote store: listing keys
//! under a prefix and fetching a key as a byte stream. Production S3 access
//! lives behind the [`RemoteStore`] trait; this crate ships [`DirStore`], a
//! directory-backed implementation used for `file://` buckets and in tests.
//!
//! Missing credentials are a distinct, user-actionable error, reported
//! before any worker is spawned. Access parameters arrive through an
//! explicit [`RemoteConfig`] rather than ambient global state.

use std::fs::File;
use std::io::Read;
use std::path::PathBuf;

use thiserror::Error;

use crate::config::RemoteConfig;

/// Errors raised by remote-store operations.
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("no remote credentials configured; set access_key and secret_key in the config file")]
    NoCredentials,

    #[error("failed to list objects under '{prefix}': {source}")]
    Listing {
        prefix: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to fetch object '{key}': {source}")]
    Fetch {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported bucket scheme: {0}")]
    UnsupportedScheme(String),
}

/// Result type for remote operations.
pub type Result<T> = std::result::Result<T, RemoteError>;

/// Minimal interface to a remote object store.
pub trait RemoteStore: Send + Sync {
    /// List object keys under `prefix`, in stable (lexicographic) order.
    fn list_objects(&self, prefix: &str) -> Result<Vec<String>>;

    /// Open the object at `key` as a byte stream.
    fn fetch(&self, key: &str) -> Result<Box<dyn Read + Send>>;
}

/// Directory-backed store: object keys map to paths below a root directory.
///
/// Serves as the `file://` bucket backend and as the remote stand-in for
/// tests; a real S3 client implements the same trait.
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }
}

impl RemoteStore for DirStore {
    fn list_objects(&self, prefix: &str) -> Result<Vec<String>> {
        let dir = self.root.join(prefix);
        let entries = std::fs::read_dir(&dir).map_err(|e| RemoteError::Listing {
            prefix: prefix.to_string(),
            source: e,
        })?;

        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| RemoteError::Listing {
                prefix: prefix.to_string(),
                source: e,
            })?;
            if entry.path().is_file() {
                keys.push(format!("{}/{}", prefix, entry.file_name().to_string_lossy()));
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn fetch(&self, key: &str) -> Result<Box<dyn Read + Send>> {
        let file = File::open(self.root.join(key)).map_err(|e| RemoteError::Fetch {
            key: key.to_string(),
            source: e,
        })?;
        Ok(Box::new(file))
    }
}

/// Build a store from explicit access configuration.
///
/// Fails with [`RemoteError::NoCredentials`] before any store is
/// constructed when access parameters are missing.
pub fn open_store(config: &RemoteConfig) -> Result<Box<dyn RemoteStore>> {
    if !config.has_credentials() {
        return Err(RemoteError::NoCredentials);
    }

    if let Some(root) = config.bucket.strip_prefix("file://") {
        return Ok(Box::new(DirStore::new(root)));
    }

    Err(RemoteError::UnsupportedScheme(config.bucket.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_dir_store_list_and_fetch() {
        let dir = TempDir::new().unwrap();
        let cruise_dir = dir.path().join("CRUISE1");
        std::fs::create_dir_all(&cruise_dir).unwrap();
        std::fs::write(cruise_dir.join("b.evt"), b"bb").unwrap();
        std::fs::write(cruise_dir.join("a.evt"), b"aa").unwrap();

        let store = DirStore::new(dir.path());
        let keys = store.list_objects("CRUISE1").unwrap();
        assert_eq!(keys, vec!["CRUISE1/a.evt", "CRUISE1/b.evt"]);

        let mut content = Vec::new();
        store
            .fetch("CRUISE1/a.evt")
            .unwrap()
            .read_to_end(&mut content)
            .unwrap();
        assert_eq!(content, b"aa");
    }

    #[test]
    fn test_dir_store_missing_prefix() {
        let dir = TempDir::new().unwrap();
        let store = DirStore::new(dir.path());
        assert!(matches!(
            store.list_objects("NOPE"),
            Err(RemoteError::Listing { .. })
        ));
    }

    #[test]
    fn test_open_store_requires_credentials() {
        let config = crate::config::RemoteConfig {
            bucket: "file:///tmp".to_string(),
            access_key: None,
            secret_key: None,
        };
        assert!(matches!(open_store(&config), Err(RemoteError::NoCredentials)));
    }

    #[test]
    fn test_open_store_unsupported_scheme() {
        let config = crate::config::RemoteConfig {
            bucket: "s3://mybucket".to_string(),
            access_key: Some("k".to_string()),
            secret_key: Some("s".to_string()),
        };
        assert!(matches!(
            open_store(&config),
            Err(RemoteError::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn test_open_store_file_scheme() {
        let dir = TempDir::new().unwrap();
        let cruise_dir = dir.path().join("C");
        std::fs::create_dir_all(&cruise_dir).unwrap();
        let mut f = std::fs::File::create(cruise_dir.join("1.evt")).unwrap();
        f.write_all(b"x").unwrap();

        let config = crate::config::RemoteConfig {
            bucket: format!("file://{}", dir.path().display()),
            access_key: Some("k".to_string()),
            secret_key: Some("s".to_string()),
        };
        let store = open_store(&config).unwrap();
        assert_eq!(store.list_objects("C").unwrap().len(), 1);
    }
}
