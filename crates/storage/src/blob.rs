//! Filesystem-backed content-addressable blob store.
//!
//! Blobs are ingested through a staging writer that hashes while it
//! writes; closing the writer renames the staged file into a layout
//! sharded by the leading hex characters of the id. Identical content
//! always lands at the same path, so concurrent identical ingests are
//! last-writer-wins over byte-identical data.

use crate::error::{StorageError, StorageResult};
use aptforge_core::{StoreHasher, StoreId, STORE_PREFIX_DEPTH};
use bytes::Bytes;
use futures::Stream;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::instrument;
use uuid::Uuid;

/// Chunk size for streaming reads (64 KiB).
const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// A boxed stream of blob bytes.
pub type ByteStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

/// Content-addressable blob store rooted in a local directory.
///
/// Layout:
/// - `<root>/blobs/<id[..2]>/<id>` holds blob content
/// - `<root>/refs/<name>` holds named pointers (hex store ids)
/// - staged writes under a separate temp directory
pub struct BlobStore {
    blob_dir: PathBuf,
    ref_dir: PathBuf,
    tmp_dir: PathBuf,
    // Serializes ref updates; blob writes need no lock because the
    // final rename is atomic and content-addressed.
    ref_lock: tokio::sync::Mutex<()>,
}

impl BlobStore {
    /// Open (creating if necessary) a blob store under `root`, with
    /// staged ingests under `tmp`.
    pub async fn open(root: impl AsRef<Path>, tmp: impl AsRef<Path>) -> StorageResult<Self> {
        let blob_dir = root.as_ref().join("blobs");
        let ref_dir = root.as_ref().join("refs");
        let tmp_dir = tmp.as_ref().to_path_buf();
        fs::create_dir_all(&blob_dir).await?;
        fs::create_dir_all(&ref_dir).await?;
        fs::create_dir_all(&tmp_dir).await?;
        Ok(Self {
            blob_dir,
            ref_dir,
            tmp_dir,
            ref_lock: tokio::sync::Mutex::new(()),
        })
    }

    fn blob_path(&self, id: &StoreId) -> PathBuf {
        let hex = id.to_hex();
        self.blob_dir.join(&hex[..STORE_PREFIX_DEPTH]).join(hex)
    }

    /// Begin a staged write. Data is hashed as it is written; closing
    /// the writer yields the content id and relocates the blob.
    #[instrument(skip(self))]
    pub async fn open_for_write(&self) -> StorageResult<StagingWriter> {
        let temp_path = self.tmp_dir.join(format!("ingest.{}", Uuid::new_v4()));
        let file = fs::File::create(&temp_path).await?;
        Ok(StagingWriter {
            file,
            temp_path,
            hasher: StoreId::hasher(),
            blob_dir: self.blob_dir.clone(),
            bytes_written: 0,
        })
    }

    /// Store a byte slice, returning its id.
    pub async fn store_bytes(&self, data: &[u8]) -> StorageResult<StoreId> {
        let mut writer = self.open_for_write().await?;
        writer.write(data).await?;
        writer.commit().await
    }

    /// Whether a blob exists.
    pub async fn contains(&self, id: &StoreId) -> StorageResult<bool> {
        Ok(fs::try_exists(&self.blob_path(id)).await?)
    }

    /// Size of a blob in bytes.
    #[instrument(skip(self), fields(id = %id))]
    pub async fn size(&self, id: &StoreId) -> StorageResult<i64> {
        let meta = fs::metadata(self.blob_path(id)).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(id.to_hex())
            } else {
                StorageError::Io(e)
            }
        })?;
        Ok(meta.len() as i64)
    }

    /// Read a blob fully into memory.
    #[instrument(skip(self), fields(id = %id))]
    pub async fn read_bytes(&self, id: &StoreId) -> StorageResult<Vec<u8>> {
        fs::read(self.blob_path(id)).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(id.to_hex())
            } else {
                StorageError::Io(e)
            }
        })
    }

    /// Open a blob as a chunked byte stream.
    #[instrument(skip(self), fields(id = %id))]
    pub async fn reader(&self, id: &StoreId) -> StorageResult<ByteStream> {
        let file = fs::File::open(self.blob_path(id)).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(id.to_hex())
            } else {
                StorageError::Io(e)
            }
        })?;
        let stream = async_stream::try_stream! {
            let mut file = file;
            let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
            loop {
                let n = file.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                yield Bytes::copy_from_slice(&buf[..n]);
            }
        };
        Ok(Box::pin(stream))
    }

    /// Materialize a blob at the given locations without duplicating
    /// bytes: hard links where the filesystem allows, a copy where it
    /// does not.
    #[instrument(skip(self, paths), fields(id = %id))]
    pub async fn link(&self, id: &StoreId, paths: &[PathBuf]) -> StorageResult<()> {
        let src = self.blob_path(id);
        if !fs::try_exists(&src).await? {
            return Err(StorageError::NotFound(id.to_hex()));
        }
        for path in paths {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).await?;
            }
            match fs::remove_file(path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StorageError::Io(e)),
            }
            if fs::hard_link(&src, path).await.is_err() {
                fs::copy(&src, path).await?;
            }
        }
        Ok(())
    }

    /// Remove a blob. A no-op if it does not exist; callers own the
    /// reference counting above this layer.
    #[instrument(skip(self), fields(id = %id))]
    pub async fn unlink(&self, id: &StoreId) -> StorageResult<()> {
        match fs::remove_file(self.blob_path(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    /// The canonical id of a zero-length blob.
    pub fn empty_file_id(&self) -> StoreId {
        StoreId::compute(b"")
    }

    /// Whether an id names the zero-length blob.
    pub fn is_empty_file_id(&self, id: &StoreId) -> bool {
        *id == self.empty_file_id()
    }

    fn ref_path(&self, name: &str) -> StorageResult<PathBuf> {
        if name.is_empty()
            || name.contains('/')
            || name.contains('\\')
            || name.contains("..")
            || name.starts_with('.')
        {
            return Err(StorageError::InvalidRefName(name.to_string()));
        }
        Ok(self.ref_dir.join(name))
    }

    /// Atomically point a named ref at a store id. Readers observe
    /// either the old value or the new one, never a partial write.
    #[instrument(skip(self), fields(name, id = %id))]
    pub async fn set_ref(&self, name: &str, id: &StoreId) -> StorageResult<()> {
        let path = self.ref_path(name)?;
        let _guard = self.ref_lock.lock().await;
        let temp = self.tmp_dir.join(format!("ref.{}", Uuid::new_v4()));
        {
            let mut file = fs::File::create(&temp).await?;
            file.write_all(id.to_hex().as_bytes()).await?;
            file.sync_all().await?;
        }
        fs::rename(&temp, &path).await?;
        Ok(())
    }

    /// Read a named ref.
    pub async fn get_ref(&self, name: &str) -> StorageResult<StoreId> {
        let path = self.ref_path(name)?;
        let data = fs::read_to_string(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::RefNotFound(name.to_string())
            } else {
                StorageError::Io(e)
            }
        })?;
        Ok(StoreId::from_hex(data.trim())?)
    }

    /// Delete a named ref.
    pub async fn delete_ref(&self, name: &str) -> StorageResult<()> {
        let path = self.ref_path(name)?;
        let _guard = self.ref_lock.lock().await;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::RefNotFound(name.to_string()))
            }
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    /// Enumerate all refs and the ids they point at.
    pub async fn list_refs(&self) -> StorageResult<Vec<(String, StoreId)>> {
        let mut out = Vec::new();
        let mut entries = fs::read_dir(&self.ref_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            match self.get_ref(&name).await {
                Ok(id) => out.push((name, id)),
                // A ref mid-replace can vanish between readdir and read.
                Err(StorageError::RefNotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }
}

/// A staged blob write that hashes incrementally.
pub struct StagingWriter {
    file: fs::File,
    temp_path: PathBuf,
    hasher: StoreHasher,
    blob_dir: PathBuf,
    bytes_written: u64,
}

impl StagingWriter {
    /// Append data to the staged blob.
    pub async fn write(&mut self, data: &[u8]) -> StorageResult<()> {
        self.file.write_all(data).await?;
        self.hasher.update(data);
        self.bytes_written += data.len() as u64;
        Ok(())
    }

    /// Bytes written so far.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// The id the staged content would seal to. Lets callers verify a
    /// declared digest and [`abort`](Self::abort) before anything
    /// reaches the shared store.
    pub fn current_id(&self) -> StoreId {
        self.hasher.peek()
    }

    /// Finish the write: flush, compute the id, and atomically move
    /// the blob into its content-addressed location.
    pub async fn commit(self) -> StorageResult<StoreId> {
        self.file.sync_all().await?;
        drop(self.file);
        let id = self.hasher.finalize();
        let hex = id.to_hex();
        let final_dir = self.blob_dir.join(&hex[..STORE_PREFIX_DEPTH]);
        fs::create_dir_all(&final_dir).await?;
        fs::rename(&self.temp_path, final_dir.join(hex)).await?;
        Ok(id)
    }

    /// Abandon the write and remove the staged file.
    pub async fn abort(self) -> StorageResult<()> {
        drop(self.file);
        let _ = fs::remove_file(&self.temp_path).await;
        Ok(())
    }
}
