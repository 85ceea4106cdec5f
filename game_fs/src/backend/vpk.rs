use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use compat_formats::vpk::{self, VpkArchive, VpkEntry, VpkIndex};
use tracing::{debug, warn};

use crate::backend::{enumerate_names, EntryRef, SearchPathBackend, SearchPathKind};
use crate::descriptor::{DescriptorPool, SharedSource, SourceOptions};
use crate::error::{FsError, FsResult};
use crate::handle::FileHandle;

/// Multi-part Valve package mounted through its `_dir.vpk`. Every numbered
/// part an entry refers to is opened at mount time.
#[derive(Debug)]
pub struct VpkBackend {
    path: PathBuf,
    directory: Arc<SharedSource>,
    parts: BTreeMap<u16, Arc<SharedSource>>,
    index: VpkIndex,
    mtime: Option<SystemTime>,
}

impl VpkBackend {
    pub fn mount(path: &Path, pool: &Arc<DescriptorPool>) -> FsResult<Self> {
        if !vpk::is_directory_file(path) {
            return Err(FsError::mount(path, "not a _dir.vpk file"));
        }
        let directory = Arc::new(
            pool.open(path, SourceOptions::READ)
                .map_err(|err| FsError::mount(path, err))?,
        );
        let mut reader = directory.reader().map_err(|err| FsError::mount(path, err))?;
        let index = vpk::read_index(&mut reader).map_err(|err| FsError::mount(path, err))?;

        let mut parts = BTreeMap::new();
        for part in index.referenced_parts() {
            let part_path = vpk::part_path(path, part)
                .ok_or_else(|| FsError::mount(path, "cannot derive part name"))?;
            let source = pool.open(&part_path, SourceOptions::READ).map_err(|err| {
                warn!(vpk = %path.display(), part = %part_path.display(), "missing vpk part");
                FsError::mount(path, format!("{}: {}", part_path.display(), err))
            })?;
            parts.insert(part, Arc::new(source));
        }
        debug!(
            vpk = %path.display(),
            files = index.len(),
            parts = parts.len(),
            "adding vpk"
        );
        Ok(Self {
            path: path.to_path_buf(),
            mtime: directory.modified(),
            directory,
            parts,
            index,
        })
    }

    fn source_for(&self, entry: &VpkEntry) -> FsResult<&Arc<SharedSource>> {
        match entry.archive {
            VpkArchive::Directory => Ok(&self.directory),
            VpkArchive::Part(part) => self
                .parts
                .get(&part)
                .ok_or_else(|| FsError::corrupt(&entry.name, format!("part {:03} not open", part))),
        }
    }
}

/// Fails unless `[offset, offset + len)` lies inside `source`.
fn check_range(member: &VpkEntry, source: &SharedSource, offset: u64, len: u64) -> FsResult<()> {
    let source_len = source.len()?;
    match offset.checked_add(len) {
        Some(end) if end <= source_len => Ok(()),
        _ => {
            warn!(
                entry = %member.name,
                file = %source.path().display(),
                offset,
                len,
                "vpk entry outside of its file"
            );
            Err(FsError::corrupt(
                &member.name,
                format!(
                    "{} bytes at {} outside of {} ({} bytes)",
                    len,
                    offset,
                    source.path().display(),
                    source_len
                ),
            ))
        }
    }
}

impl SearchPathBackend for VpkBackend {
    fn kind(&self) -> SearchPathKind {
        SearchPathKind::Vpk
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
        let source = self.source_for(member)?;
        check_range(
            member,
            source,
            member.entry_offset,
            u64::from(member.entry_length),
        )?;
        let mut handle = if member.preload_len == 0 {
            FileHandle::window(
                &member.name,
                Arc::clone(source),
                member.entry_offset,
                u64::from(member.entry_length),
            )
        } else {
            check_range(
                member,
                &self.directory,
                member.preload_offset,
                u64::from(member.preload_len),
            )?;
            // Preload bytes live in the tree and come first.
            let mut data = vec![0u8; member.total_len() as usize];
            let (preload, rest) = data.split_at_mut(usize::from(member.preload_len));
            self.directory
                .read_exact_at(member.preload_offset, preload)
                .map_err(|err| FsError::corrupt(&member.name, err))?;
            source
                .read_exact_at(member.entry_offset, rest)
                .map_err(|err| FsError::corrupt(&member.name, err))?;
            FileHandle::memory(&member.name, data)
        };
        handle.set_file_time(self.mtime);
        Ok(handle)
    }

    fn size(&self, entry: &EntryRef) -> FsResult<u64> {
        self.index
            .entries()
            .get(entry.index)
            .map(VpkEntry::total_len)
            .ok_or_else(|| FsError::NotFound(entry.name.clone()))
    }

    fn modification_time(&self, _path: &str) -> Option<SystemTime> {
        self.mtime
    }

    fn describe(&self) -> String {
        format!(
            "{} ({} files, {} parts)",
            self.path.display(),
            self.index.len(),
            self.parts.len()
        )
    }
}
