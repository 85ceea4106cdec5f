use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use compat_formats::pak::{self, PakIndex};
use tracing::{debug, warn};

use crate::backend::{enumerate_names, EntryRef, SearchPathBackend, SearchPathKind};
use crate::descriptor::{DescriptorPool, SharedSource, SourceOptions};
use crate::error::{FsError, FsResult};
use crate::handle::FileHandle;

#[derive(Debug)]
pub struct PakBackend {
    path: PathBuf,
    source: Arc<SharedSource>,
    index: PakIndex,
    mtime: Option<SystemTime>,
}

impl PakBackend {
    pub fn mount(path: &Path, pool: &Arc<DescriptorPool>) -> FsResult<Self> {
        let source = Arc::new(
            pool.open(path, SourceOptions::READ)
                .map_err(|err| FsError::mount(path, err))?,
        );
        let mut reader = source.reader().map_err(|err| FsError::mount(path, err))?;
        let index = pak::read_index(&mut reader).map_err(|err| FsError::mount(path, err))?;
        for name in index.duplicates() {
            warn!(pak = %path.display(), entry = %name, "duplicate pak entry, keeping the first");
        }
        debug!(pak = %path.display(), files = index.len(), "adding pak");
        Ok(Self {
            path: path.to_path_buf(),
            mtime: source.modified(),
            source,
            index,
        })
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

impl SearchPathBackend for PakBackend {
    fn kind(&self) -> SearchPathKind {
        SearchPathKind::Pak
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
        let record = self
            .index
            .entries()
            .get(entry.index)
            .ok_or_else(|| FsError::NotFound(entry.name.clone()))?;
        let mut handle = FileHandle::window(
            &record.name,
            Arc::clone(&self.source),
            u64::from(record.offset),
            u64::from(record.size),
        );
        handle.set_file_time(self.mtime);
        Ok(handle)
    }

    fn size(&self, entry: &EntryRef) -> FsResult<u64> {
        self.index
            .entries()
            .get(entry.index)
            .map(|record| u64::from(record.size))
            .ok_or_else(|| FsError::NotFound(entry.name.clone()))
    }

    fn modification_time(&self, _path: &str) -> Option<SystemTime> {
        self.mtime
    }

    fn describe(&self) -> String {
        format!("{} ({} files)", self.path.display(), self.index.len())
    }
}
