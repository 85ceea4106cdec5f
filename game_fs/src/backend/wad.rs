use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use compat_formats::wad::{self, extension_for_type, filter_for_extension, LumpFilter, WadIndex};
use tracing::{debug, warn};

use crate::backend::{EntryRef, SearchPathBackend, SearchPathKind};
use crate::descriptor::{DescriptorPool, SharedSource, SourceOptions};
use crate::error::{FsError, FsResult};
use crate::handle::FileHandle;
use crate::path_policy::{extension, file_stem, split_parent};
use crate::pattern;

#[derive(Debug)]
enum WadStorage {
    Disk(Arc<SharedSource>),
    /// A WAD loaded out of another archive.
    Memory(Arc<[u8]>),
}

/// Lumps addressed as `[wadname/]lumpname.ext`, where the extension selects
/// the lump type and the optional directory must name this WAD.
#[derive(Debug)]
pub struct WadBackend {
    path: PathBuf,
    /// Lowercased file stem, matched against the `wadname/` prefix.
    wad_name: String,
    storage: WadStorage,
    index: WadIndex,
    mtime: Option<SystemTime>,
}

/// The parts of a lump request: which WAD it names (if any), the lump base
/// name and the type filter from its extension.
struct LumpQuery<'a> {
    wad_name: Option<&'a str>,
    lump: &'a str,
    filter: LumpFilter,
}

impl<'a> LumpQuery<'a> {
    fn parse(path: &'a str) -> Option<Self> {
        let filter = filter_for_extension(extension(path))?;
        let (dir, _) = split_parent(path);
        let dir = dir.trim_end_matches(['/', '\\']);
        let wad_name = if dir.is_empty() {
            None
        } else {
            Some(file_stem(dir))
        };
        Some(Self {
            wad_name,
            lump: file_stem(path),
            filter,
        })
    }
}

impl WadBackend {
    pub fn mount(path: &Path, pool: &Arc<DescriptorPool>) -> FsResult<Self> {
        let source = Arc::new(
            pool.open(path, SourceOptions::READ)
                .map_err(|err| FsError::mount(path, err))?,
        );
        let mut reader = source.reader().map_err(|err| FsError::mount(path, err))?;
        let index = wad::read_index(&mut reader).map_err(|err| FsError::mount(path, err))?;
        let mtime = source.modified();
        Ok(Self::with_index(path, WadStorage::Disk(source), index, mtime))
    }

    /// Mounts WAD bytes that were extracted from `container`; `name` is the
    /// WAD's path inside it.
    pub fn from_memory(
        container: &Path,
        name: &str,
        data: Vec<u8>,
        mtime: Option<SystemTime>,
    ) -> FsResult<Self> {
        let path = container.join(name);
        let index = wad::read_index(&mut Cursor::new(&data[..]))
            .map_err(|err| FsError::mount(&path, err))?;
        Ok(Self::with_index(
            &path,
            WadStorage::Memory(data.into()),
            index,
            mtime,
        ))
    }

    fn with_index(path: &Path, storage: WadStorage, index: WadIndex, mtime: Option<SystemTime>) -> Self {
        for name in index.duplicates() {
            warn!(wad = %path.display(), lump = %name, "duplicate wad lump, keeping the first");
        }
        if index.is_oversized() {
            warn!(wad = %path.display(), lumps = index.len(), "wad has an unusually large lump table");
        }
        debug!(wad = %path.display(), lumps = index.len(), "adding wad");
        let wad_name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        Self {
            path: path.to_path_buf(),
            wad_name,
            storage,
            index,
            mtime,
        }
    }

    fn accepts_wad_name(&self, requested: Option<&str>) -> bool {
        requested.map_or(true, |name| name.eq_ignore_ascii_case(&self.wad_name))
    }

    fn display_name(&self, index: usize) -> String {
        let lump = &self.index.lumps()[index];
        match extension_for_type(lump.lump_type) {
            Some(ext) => format!("{}.{}", lump.name, ext),
            None => lump.name.clone(),
        }
    }
}

impl SearchPathBackend for WadBackend {
    fn kind(&self) -> SearchPathKind {
        SearchPathKind::Wad
    }

    fn find(&self, path: &str) -> Option<EntryRef> {
        let query = LumpQuery::parse(path)?;
        if !self.accepts_wad_name(query.wad_name) {
            return None;
        }
        let index = self.index.find(query.lump, query.filter)?;
        Some(EntryRef::new(index, self.display_name(index)))
    }

    fn enumerate<'a>(
        &'a self,
        pattern: &'a str,
        case_insensitive: bool,
    ) -> Box<dyn Iterator<Item = String> + 'a> {
        let Some(query) = LumpQuery::parse(pattern) else {
            return Box::new(std::iter::empty());
        };
        if !self.accepts_wad_name(query.wad_name) {
            return Box::new(std::iter::empty());
        }
        let folder = query.wad_name.map(|name| format!("{}/", name)).unwrap_or_default();
        let lump_pattern = query.lump;
        let filter = query.filter;
        Box::new(
            self.index
                .lumps()
                .iter()
                .enumerate()
                .filter(move |(_, lump)| filter.accepts(lump.lump_type))
                .filter(move |(_, lump)| pattern::matches(&lump.name, lump_pattern, case_insensitive))
                .map(move |(index, _)| format!("{}{}", folder, self.display_name(index))),
        )
    }

    fn open(&self, entry: &EntryRef) -> FsResult<FileHandle> {
        let lump = self
            .index
            .lumps()
            .get(entry.index)
            .ok_or_else(|| FsError::NotFound(entry.name.clone()))?;
        if lump.compression != 0 {
            warn!(
                wad = %self.path.display(),
                lump = %entry.name,
                method = lump.compression,
                "compressed lumps are not supported"
            );
            return Ok(FileHandle::corrupt(
                &entry.name,
                format!("compressed lumps are not supported (method {})", lump.compression),
            ));
        }
        let offset = u64::from(lump.offset);
        let length = u64::from(lump.disk_size);
        let mut handle = match &self.storage {
            WadStorage::Disk(source) => {
                FileHandle::window(&entry.name, Arc::clone(source), offset, length)
            }
            WadStorage::Memory(data) => {
                let start = offset as usize;
                let bytes = data
                    .get(start..start + length as usize)
                    .ok_or_else(|| FsError::corrupt(&entry.name, "lump outside of wad"))?;
                FileHandle::memory(&entry.name, bytes.to_vec())
            }
        };
        handle.set_file_time(self.mtime);
        Ok(handle)
    }

    fn size(&self, entry: &EntryRef) -> FsResult<u64> {
        self.index
            .lumps()
            .get(entry.index)
            .map(|lump| u64::from(lump.disk_size))
            .ok_or_else(|| FsError::NotFound(entry.name.clone()))
    }

    fn modification_time(&self, _path: &str) -> Option<SystemTime> {
        self.mtime
    }

    fn describe(&self) -> String {
        format!("{} ({} lumps)", self.path.display(), self.index.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use compat_formats::wad::{write_wad, LumpType};

    fn halflife_wad(dir: &Path) -> PathBuf {
        let path = dir.join("halflife.wad");
        let data = write_wad(&[
            ("{Blue", LumpType::MIPTEX, b"blue-mip"),
            ("*lava1", LumpType::MIPTEX, b"lava"),
            ("conchars", LumpType::SCRIPT, b"chars"),
            ("credits", LumpType::SCRIPT, b"thanks"),
        ]);
        std::fs::write(&path, data).expect("write wad");
        path
    }

    fn mount(dir: &Path) -> WadBackend {
        let pool = DescriptorPool::new(None);
        WadBackend::mount(&halflife_wad(dir), &pool).expect("mount")
    }

    #[test]
    fn lumps_are_found_by_name_and_type() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = mount(dir.path());
        let entry = backend.find("{BLUE.mip").expect("mip lump");
        assert_eq!(entry.name, "{blue.mip");
        assert_eq!(
            backend.open(&entry).expect("open").read_to_end().expect("read"),
            b"blue-mip"
        );
        assert!(backend.find("{blue.txt").is_none());
        assert!(backend.find("{blue").is_some());
        assert!(backend.find("{blue.wav").is_none());
    }

    #[test]
    fn quake_names_are_cleaned() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = mount(dir.path());
        assert!(backend.find("!lava1.mip").is_some());
        assert!(backend.find("*lava1.mip").is_some());
        assert!(backend.find("conchars.lmp").is_some());
        assert!(backend.find("conchars.txt").is_none());
    }

    #[test]
    fn wad_prefix_must_match() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = mount(dir.path());
        assert!(backend.find("halflife/credits.txt").is_some());
        assert!(backend.find("HalfLife.wad/credits.txt").is_some());
        assert!(backend.find("decals/credits.txt").is_none());
    }

    #[test]
    fn search_renders_folder_and_extension() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = mount(dir.path());
        let with_folder: Vec<String> = backend.enumerate("halflife/*.mip", true).collect();
        assert_eq!(with_folder, vec!["halflife/!lava1.mip", "halflife/{blue.mip"]);
        let bare: Vec<String> = backend.enumerate("c*", true).collect();
        assert_eq!(bare, vec!["conchars.lmp", "credits.txt"]);
        assert_eq!(backend.enumerate("*.wav", true).count(), 0);
        assert_eq!(backend.enumerate("decals/*.mip", true).count(), 0);
    }

    #[test]
    fn memory_wads_serve_lumps() {
        let data = write_wad(&[("logo", LumpType::GFXPIC, b"pixels")]);
        let backend = WadBackend::from_memory(Path::new("pak0.pak"), "gfx/menu.wad", data, None)
            .expect("mount from memory");
        let entry = backend.find("menu/logo.lmp").expect("lump");
        assert_eq!(
            backend.open(&entry).expect("open").read_to_end().expect("read"),
            b"pixels"
        );
        assert!(backend.describe().contains("menu.wad"));
    }
}
