use std::{path::PathBuf, sync::Arc};

use serde::Deserialize;

use crate::{
    backends::{FileBackingStore, MemoryBackingStore},
    r#trait::BackingStore,
};

/// Configuration for the spool backing store
///
/// File-backed spool in RON config:
/// ```ron
/// Relay (
///     spool: File(
///         path: "/var/spool/relayq",
///     ),
/// )
/// ```
///
/// Memory-backed spool with capacity limit:
/// ```ron
/// Relay (
///     spool: Memory(
///         capacity: Some(1000),
///     ),
/// )
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub enum SpoolConfig {
    /// Durable queue in a directory
    File { path: PathBuf },
    /// Volatile queue, optionally bounded
    Memory {
        #[serde(default)]
        capacity: Option<usize>,
    },
}

impl Default for SpoolConfig {
    fn default() -> Self {
        Self::File {
            path: PathBuf::from("/var/spool/relayq"),
        }
    }
}

impl SpoolConfig {
    /// Build, validate and initialise the configured store
    ///
    /// # Errors
    /// - If a file spool path fails validation
    /// - If the spool directory cannot be created or cleaned
    pub fn into_backing_store(self) -> crate::Result<Arc<dyn BackingStore>> {
        match self {
            Self::File { path } => {
                let store = FileBackingStore::builder().path(path).build()?;
                store.init()?;
                Ok(Arc::new(store))
            }
            Self::Memory { capacity } => Ok(capacity.map_or_else(
                || Arc::new(MemoryBackingStore::new()) as Arc<dyn BackingStore>,
                |capacity| Arc::new(MemoryBackingStore::with_capacity(capacity)),
            )),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_parse_memory_config() {
        let config: SpoolConfig = ron::from_str("Memory(capacity: Some(10))").unwrap();
        assert_eq!(config, SpoolConfig::Memory { capacity: Some(10) });
    }

    #[test]
    fn test_parse_file_config() {
        let config: SpoolConfig = ron::from_str(r#"File(path: "/var/spool/relayq")"#).unwrap();
        assert_eq!(config, SpoolConfig::default());
    }

    #[test]
    fn test_file_config_is_validated() {
        let config = SpoolConfig::File {
            path: PathBuf::from("/etc/relayq"),
        };
        let err = config.into_backing_store().unwrap_err();
        assert!(err.to_string().contains("system directory"));
    }

    #[tokio::test]
    async fn test_file_config_initialises_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue");

        let store = SpoolConfig::File { path: path.clone() }
            .into_backing_store()
            .unwrap();

        assert!(path.is_dir());
        assert!(store.list().await.unwrap().is_empty());
    }
}
