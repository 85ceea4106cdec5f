use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use compat_formats::zip::{self, CompressionMethod, ZipEntry, ZipIndex};
use flate2::read::DeflateDecoder;
use flate2::Crc;
use tracing::{debug, error, warn};

use crate::backend::{enumerate_names, EntryRef, SearchPathBackend, SearchPathKind};
use crate::descriptor::{DescriptorPool, SharedSource, SourceOptions};
use crate::error::{FsError, FsResult};
use crate::handle::FileHandle;

/// Upper bound of what one byte of deflate output can expand to.
const MAX_DEFLATE_RATIO: u64 = 1032;

/// ZIP / PK3 layer. Stored members are served as windows into the archive;
/// deflated members are inflated in full when opened.
#[derive(Debug)]
pub struct ZipBackend {
    path: PathBuf,
    source: Arc<SharedSource>,
    index: ZipIndex,
    mtime: Option<SystemTime>,
}

impl ZipBackend {
    pub fn mount(path: &Path, pool: &Arc<DescriptorPool>) -> FsResult<Self> {
        let source = Arc::new(
            pool.open(path, SourceOptions::READ)
                .map_err(|err| FsError::mount(path, err))?,
        );
        let mut reader = source.reader().map_err(|err| FsError::mount(path, err))?;
        let index = zip::read_index(&mut reader).map_err(|err| FsError::mount(path, err))?;
        for name in index.duplicates() {
            warn!(zip = %path.display(), entry = %name, "duplicate zip entry, keeping the first");
        }
        debug!(zip = %path.display(), files = index.len(), "adding zip");
        Ok(Self {
            path: path.to_path_buf(),
            mtime: source.modified(),
            source,
            index,
        })
    }

    /// Inflates a deflated member, refusing sizes no deflate stream of
    /// `compressed_size` bytes can produce and payloads whose CRC-32 differs
    /// from the central directory.
    fn inflate(&self, entry: &ZipEntry) -> FsResult<Vec<u8>> {
        let expected = entry.uncompressed_size;
        if expected > entry.compressed_size.saturating_mul(MAX_DEFLATE_RATIO) {
            return Err(FsError::corrupt(
                &entry.name,
                format!(
                    "{} bytes cannot inflate to {} bytes",
                    entry.compressed_size, expected
                ),
            ));
        }
        let compressed_len = usize::try_from(entry.compressed_size)
            .map_err(|_| FsError::corrupt(&entry.name, "member too large"))?;
        let capacity = usize::try_from(expected)
            .map_err(|_| FsError::corrupt(&entry.name, "member too large"))?;

        let mut compressed = Vec::new();
        compressed
            .try_reserve_exact(compressed_len)
            .map_err(|err| FsError::corrupt(&entry.name, err))?;
        compressed.resize(compressed_len, 0);
        self.source
            .read_exact_at(entry.data_offset, &mut compressed)
            .map_err(|err| FsError::corrupt(&entry.name, err))?;

        let mut data = Vec::new();
        data.try_reserve_exact(capacity)
            .map_err(|err| FsError::corrupt(&entry.name, err))?;
        // One byte past the declared size is enough to spot a longer stream.
        DeflateDecoder::new(&compressed[..])
            .take(expected.saturating_add(1))
            .read_to_end(&mut data)
            .map_err(|err| FsError::corrupt(&entry.name, err))?;
        if data.len() as u64 != expected {
            return Err(FsError::corrupt(
                &entry.name,
                format!("inflated to {} bytes, expected {}", data.len(), expected),
            ));
        }
        let mut crc = Crc::new();
        crc.update(&data);
        if crc.sum() != entry.crc32 {
            return Err(FsError::corrupt(
                &entry.name,
                format!("crc mismatch: {:08x}, expected {:08x}", crc.sum(), entry.crc32),
            ));
        }
        Ok(data)
    }
}

impl SearchPathBackend for ZipBackend {
    fn kind(&self) -> SearchPathKind {
        SearchPathKind::Zip
    }

    fn find(&self, path: &str) -> Option<EntryRef> {
        let index = self.index.index_of(path)?;
        Some(EntryRef::new(index, self.index.entries()[index].name.clone()))
    }

    fn enumerate<'a>(
        &'a self,
        pattern: &'a str,
        case_insensitive: bool,
    ) -> Box<dyn Iterator<Item = String> + 'a> {
        let names = self.index.entries().iter().map(|entry| entry.name.as_str());
        enumerate_names(names, pattern, case_insensitive)
    }

    fn open(&self, entry: &EntryRef) -> FsResult<FileHandle> {
        let member = self
            .index
            .entries()
            .get(entry.index)
            .ok_or_else(|| FsError::NotFound(entry.name.clone()))?;
        let mut handle = match member.method {
            CompressionMethod::Stored => {
                if member.compressed_size != member.uncompressed_size {
                    return Err(FsError::corrupt(&member.name, "stored member size mismatch"));
                }
                FileHandle::window(
                    &member.name,
                    Arc::clone(&self.source),
                    member.data_offset,
                    member.uncompressed_size,
                )
            }
            CompressionMethod::Deflated => match self.inflate(member) {
                Ok(data) => FileHandle::memory(&member.name, data),
                Err(err) => {
                    error!(zip = %self.path.display(), "{}", err);
                    let reason = match err {
                        FsError::CorruptEntry { reason, .. } => reason,
                        other => other.to_string(),
                    };
                    FileHandle::corrupt(&member.name, reason)
                }
            },
            CompressionMethod::Unsupported(method) => {
                error!(
                    zip = %self.path.display(),
                    entry = %member.name,
                    method,
                    "unsupported compression method"
                );
                FileHandle::corrupt(
                    &member.name,
                    format!("unsupported compression method {}", method),
                )
            }
        };
        handle.set_file_time(self.mtime);
        Ok(handle)
    }

    fn size(&self, entry: &EntryRef) -> FsResult<u64> {
        self.index
            .entries()
            .get(entry.index)
            .map(|member| member.uncompressed_size)
            .ok_or_else(|| FsError::NotFound(entry.name.clone()))
    }

    fn modification_time(&self, _path: &str) -> Option<SystemTime> {
        self.mtime
    }

    fn describe(&self) -> String {
        format!("{} ({} files)", self.path.display(), self.index.len())
    }
}
