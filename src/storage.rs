use std::io;
use std::path::{Component, Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Flat file store rooted at a single directory.
///
/// Uploaded files are stored directly under the root, named by the client
/// filename. Names are resolved through [`Storage::resolve_name`], which
/// confines every write to the root.
#[derive(Clone, Debug)]
pub struct Storage {
    root: PathBuf,
}

/// The supplied filename was empty, contained separators, or tried to
/// escape the storage root.
#[derive(Debug)]
pub struct InvalidFilename;

impl Storage {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub async fn ensure_root(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root).await
    }

    pub fn root_path(&self) -> &Path {
        &self.root
    }

    /// Resolve a client-supplied filename to its path inside the root.
    ///
    /// Only a single normal path component is accepted: separators, `..`,
    /// absolute paths and drive prefixes are all rejected.
    pub fn resolve_name(&self, name: &str) -> Result<PathBuf, InvalidFilename> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(InvalidFilename);
        }
        let mut components = Path::new(trimmed).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(leaf)), None) => Ok(self.root.join(leaf)),
            _ => Err(InvalidFilename),
        }
    }

    /// Open a temp file next to `target` for streaming writes.
    ///
    /// The bytes only become visible under the final name once
    /// [`PendingFile::commit`] renames them into place, so a half-written
    /// upload is never observable. Collisions keep overwrite semantics:
    /// last committed write wins.
    pub async fn begin_write(&self, target: &Path) -> io::Result<PendingFile> {
        let base = target
            .file_name()
            .map(|name| name.to_string_lossy())
            .unwrap_or_else(|| "file".into());
        let temp_path = self.root.join(format!(".{base}.tmp.{}", Uuid::new_v4()));
        let file = File::create(&temp_path).await?;
        Ok(PendingFile {
            target: target.to_path_buf(),
            temp_path,
            file,
        })
    }
}

/// An in-progress write that is committed or aborted as a whole.
pub struct PendingFile {
    target: PathBuf,
    temp_path: PathBuf,
    file: File,
}

impl PendingFile {
    pub async fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.file.write_all(chunk).await
    }

    /// Discard the temp file.
    pub async fn abort(self) {
        let _ = fs::remove_file(&self.temp_path).await;
    }

    /// Flush, sync and rename over the target.
    pub async fn commit(self) -> io::Result<()> {
        let PendingFile {
            target,
            temp_path,
            mut file,
        } = self;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);
        if let Err(err) = fs::rename(&temp_path, &target).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(err);
        }
        Ok(())
    }
}
