use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, SystemTime},
};

use async_trait::async_trait;
use relayq_common::internal;
use tokio::{fs, sync::Mutex};

use crate::{
    MessageId, NewMessage, QueuedMessage, SerializationError, SpoolError, ValidationError,
    backends::memory::oldest_first, r#trait::BackingStore,
};

const SYSTEM_DIRECTORIES: [&str; 9] = [
    "/etc",
    "/bin",
    "/sbin",
    "/usr/bin",
    "/usr/sbin",
    "/boot",
    "/sys",
    "/proc",
    "/dev",
];

/// File-based backing store implementation
///
/// Each message is two files named by its ULID:
/// - `{id}.eml` holds the content as submitted
/// - `{id}.bin` holds the metadata as bincode
///
/// # Atomicity
/// Every file is written under a `.tmp_` name and then renamed into place, so
/// a crash never leaves a half-written message visible. Deletes rename both
/// files to `.deleted` before removing them; leftovers are cleaned by
/// [`FileBackingStore::init`].
///
/// Entries that cannot be decoded are renamed to `.corrupt` and left for an
/// operator, so one bad entry never blocks the rest of the queue.
///
/// Mutations hold a single mutex, which makes `increment_failure`, `delete` and
/// `sweep` atomic with respect to one another within this process.
#[derive(Clone)]
pub struct FileBackingStore {
    path: PathBuf,
    writer: Arc<Mutex<ulid::Generator>>,
}

impl std::fmt::Debug for FileBackingStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileBackingStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl FileBackingStore {
    fn at(path: PathBuf) -> Self {
        Self {
            path,
            writer: Arc::new(Mutex::new(ulid::Generator::new())),
        }
    }

    /// Rejects `..` components, relative paths and system directories
    fn validate_path(path: &Path) -> Result<(), ValidationError> {
        if path
            .components()
            .any(|component| component == std::path::Component::ParentDir)
        {
            return Err(ValidationError::InvalidConfiguration(format!(
                "Spool path cannot contain '..' components: {}",
                path.display()
            )));
        }

        if !path.is_absolute() {
            return Err(ValidationError::InvalidConfiguration(format!(
                "Spool path must be absolute: {}",
                path.display()
            )));
        }

        if let Some(prefix) = SYSTEM_DIRECTORIES
            .iter()
            .find(|prefix| path.starts_with(prefix))
        {
            return Err(ValidationError::InvalidConfiguration(format!(
                "Spool path cannot be in system directory {prefix}: {}",
                path.display()
            )));
        }

        Ok(())
    }

    #[must_use]
    pub fn builder() -> FileBackingStoreBuilder {
        FileBackingStoreBuilder::default()
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Prepare the spool directory
    ///
    /// Creates the directory if needed and removes files left behind by
    /// interrupted writes or deletes.
    ///
    /// # Errors
    /// - If the spool path cannot be created
    /// - If the path exists but is not a directory
    pub fn init(&self) -> crate::Result<()> {
        internal!("Initialising spool at {}", self.path.display());

        if !self.path.try_exists()? {
            internal!("{} does not exist, creating...", self.path.display());
            std::fs::create_dir_all(&self.path)?;
        } else if !self.path.is_dir() {
            return Err(ValidationError::NotDirectory(self.path.display().to_string()).into());
        }

        let mut cleaned = 0;
        for entry in std::fs::read_dir(&self.path)? {
            let entry = entry?;
            let filename = entry.file_name();
            let filename = filename.to_string_lossy();

            // Content without metadata is an insert that never completed
            let orphaned_content = filename.ends_with(".eml")
                && MessageId::from_filename(&filename)
                    .is_some_and(|id| !self.meta_path(&id).exists());

            if filename.ends_with(".deleted") || filename.starts_with(".tmp_") || orphaned_content
            {
                std::fs::remove_file(entry.path())?;
                cleaned += 1;
            }
        }

        if cleaned > 0 {
            internal!(
                level = INFO,
                "Cleaned up {cleaned} orphaned files from spool"
            );
        }

        Ok(())
    }

    fn data_path(&self, id: &MessageId) -> PathBuf {
        self.path.join(format!("{id}.eml"))
    }

    fn meta_path(&self, id: &MessageId) -> PathBuf {
        self.path.join(format!("{id}.bin"))
    }

    /// Write `contents` under a temporary name, then move it over `target`
    async fn write_atomic(&self, target: &Path, contents: &[u8]) -> crate::Result<()> {
        let filename = target
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| SpoolError::Internal(format!("Bad spool path {}", target.display())))?;
        let temp = self.path.join(format!(".tmp_{filename}"));

        fs::write(&temp, contents).await?;
        fs::rename(&temp, target).await?;

        Ok(())
    }

    async fn write_meta(&self, message: &QueuedMessage) -> crate::Result<()> {
        let encoded = bincode::serde::encode_to_vec(message, bincode::config::standard())
            .map_err(SerializationError::from)?;
        self.write_atomic(&self.meta_path(&message.id), &encoded)
            .await
    }

    async fn read_meta(&self, id: &MessageId) -> crate::Result<QueuedMessage> {
        let bytes = fs::read(self.meta_path(id)).await.map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                SpoolError::NotFound(*id)
            } else {
                SpoolError::Io(e)
            }
        })?;

        let (message, _): (QueuedMessage, usize) =
            bincode::serde::decode_from_slice(&bytes, bincode::config::standard())
                .map_err(SerializationError::from)?;

        Ok(message)
    }

    /// Move both files of `id` aside as `.corrupt`. Callers must hold the writer lock.
    async fn quarantine(&self, id: &MessageId, error: &SpoolError) -> crate::Result<()> {
        internal!(
            level = WARN,
            "Unreadable spool entry {id}, moving it aside: {error}"
        );

        for path in [self.data_path(id), self.meta_path(id)] {
            let mut corrupt = path.clone().into_os_string();
            corrupt.push(".corrupt");

            match fs::rename(&path, PathBuf::from(corrupt)).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        Ok(())
    }

    /// Two-phase removal. Callers must hold the writer lock.
    async fn remove_files(&self, id: &MessageId) -> crate::Result<()> {
        let mut renamed = Vec::with_capacity(2);

        for path in [self.data_path(id), self.meta_path(id)] {
            let mut deleted = path.clone().into_os_string();
            deleted.push(".deleted");
            let deleted = PathBuf::from(deleted);

            match fs::rename(&path, &deleted).await {
                Ok(()) => renamed.push(deleted),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        for path in renamed {
            fs::remove_file(&path).await?;
        }

        Ok(())
    }
}

#[async_trait]
impl BackingStore for FileBackingStore {
    #[tracing::instrument(level = "debug", skip_all)]
    async fn insert(&self, message: NewMessage) -> crate::Result<MessageId> {
        let mut generator = self.writer.lock().await;
        let id = generator
            .generate()
            .map(MessageId::new)
            .map_err(|e| SpoolError::Internal(format!("Unable to generate message id: {e}")))?;

        if fs::try_exists(self.meta_path(&id)).await? {
            return Err(SpoolError::AlreadyExists(id));
        }

        let queued = message.into_queued(id, SystemTime::now());

        // Content first: a message only exists once its metadata is in place
        self.write_atomic(&self.data_path(&id), queued.content.as_bytes())
            .await?;
        if let Err(err) = self.write_meta(&queued).await {
            let _ = fs::remove_file(self.data_path(&id)).await;
            return Err(err);
        }

        internal!(
            level = DEBUG,
            "Spooled message {id} to {}",
            self.path.display()
        );

        Ok(id)
    }

    async fn fetch_pending(&self, limit: usize) -> crate::Result<Vec<QueuedMessage>> {
        let mut pending = Vec::new();

        for id in self.list().await? {
            if pending.len() >= limit {
                break;
            }

            match self.read(&id).await {
                Ok(message) => pending.push(message),
                Err(SpoolError::NotFound(_)) => {}
                Err(e) if e.is_corrupt() => {
                    let _guard = self.writer.lock().await;
                    self.quarantine(&id, &e).await?;
                }
                Err(e) => return Err(e),
            }
        }

        oldest_first(&mut pending);
        Ok(pending)
    }

    #[tracing::instrument(level = "debug", skip(self, reason), fields(id = %id))]
    async fn increment_failure(&self, id: &MessageId, reason: &str) -> crate::Result<u32> {
        let _guard = self.writer.lock().await;

        let mut message = self.read_meta(id).await?;
        let count = message.record_failure(reason);
        self.write_meta(&message).await?;

        Ok(count)
    }

    #[tracing::instrument(level = "debug", skip(self), fields(id = %id))]
    async fn delete(&self, id: &MessageId) -> crate::Result<()> {
        let _guard = self.writer.lock().await;
        self.remove_files(id).await?;

        internal!(level = DEBUG, "Deleted message {id} from spool");
        Ok(())
    }

    async fn sweep(&self, max_age: Duration, max_failures: u32) -> crate::Result<usize> {
        let _guard = self.writer.lock().await;
        let now = SystemTime::now();

        let mut exhausted = 0;
        let mut expired = 0;

        for id in self.list().await? {
            let message = match self.read_meta(&id).await {
                Ok(message) => message,
                Err(SpoolError::NotFound(_)) => continue,
                Err(e) if e.is_corrupt() => {
                    self.quarantine(&id, &e).await?;
                    continue;
                }
                Err(e) => return Err(e),
            };

            if message.is_exhausted(max_failures) {
                exhausted += 1;
            } else if message.is_expired(now, max_age) {
                expired += 1;
            } else {
                continue;
            }

            self.remove_files(&id).await?;
        }

        tracing::debug!(exhausted, expired, "Swept file spool");

        Ok(exhausted + expired)
    }

    async fn read(&self, id: &MessageId) -> crate::Result<QueuedMessage> {
        let mut message = self.read_meta(id).await?;

        let content = fs::read(self.data_path(id)).await.map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                SpoolError::NotFound(*id)
            } else {
                SpoolError::Io(e)
            }
        })?;
        message.content = String::from_utf8(content)
            .map_err(|e| SerializationError::Corrupted(format!("{id}: {e}")))?;

        Ok(message)
    }

    /// Scans for `.bin` files, ignoring temporary and deleted ones
    async fn list(&self) -> crate::Result<Vec<MessageId>> {
        let mut entries = fs::read_dir(&self.path).await?;
        let mut ids = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let filename = entry.file_name();
            let filename = filename.to_string_lossy();

            if filename.ends_with(".bin")
                && !filename.starts_with(".tmp_")
                && let Some(id) = MessageId::from_filename(&filename)
            {
                ids.push(id);
            }
        }

        // ULIDs sort by creation time
        ids.sort();

        Ok(ids)
    }
}

/// Builder for `FileBackingStore`
#[derive(Debug, Default)]
pub struct FileBackingStoreBuilder {
    path: PathBuf,
}

impl FileBackingStoreBuilder {
    #[must_use]
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = path.into();
        self
    }

    /// Build the final `FileBackingStore`
    ///
    /// # Errors
    /// Returns an error if the path is invalid or potentially dangerous
    pub fn build(self) -> crate::Result<FileBackingStore> {
        FileBackingStore::validate_path(&self.path)?;
        Ok(FileBackingStore::at(self.path))
    }
}
