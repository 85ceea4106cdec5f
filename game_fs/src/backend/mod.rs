use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use crate::descriptor::DescriptorPool;
use crate::error::{FsError, FsResult};
use crate::handle::FileHandle;
use crate::pattern;

pub mod assets;
pub mod dir;
pub mod pak;
pub mod vpk;
pub mod wad;
pub mod zip;

pub use assets::{AssetProvider, AssetsBackend, StaticAssets};
pub use dir::DirectoryBackend;
pub use pak::PakBackend;
pub use vpk::VpkBackend;
pub use wad::WadBackend;
pub use zip::ZipBackend;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SearchPathKind {
    Directory,
    Pak,
    Wad,
    Zip,
    Vpk,
    PlatformAssets,
}

impl SearchPathKind {
    pub fn is_archive(self) -> bool {
        !matches!(self, SearchPathKind::Directory | SearchPathKind::PlatformAssets)
    }

    /// Archive format implied by a file name; `None` for anything else,
    /// including numbered VPK parts.
    pub fn for_archive_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "pak" => Some(SearchPathKind::Pak),
            "wad" => Some(SearchPathKind::Wad),
            "zip" | "pk3" => Some(SearchPathKind::Zip),
            "vpk" if compat_formats::vpk::is_directory_file(path) => Some(SearchPathKind::Vpk),
            _ => None,
        }
    }
}

impl fmt::Display for SearchPathKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SearchPathKind::Directory => "dir",
            SearchPathKind::Pak => "pak",
            SearchPathKind::Wad => "wad",
            SearchPathKind::Zip => "zip",
            SearchPathKind::Vpk => "vpk",
            SearchPathKind::PlatformAssets => "assets",
        };
        write!(f, "{}", label)
    }
}

/// A successful `find`: the backend's own index plus the name as the layer
/// spells it (case-fixed on disk, normalized in archives).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntryRef {
    pub index: usize,
    pub name: String,
}

impl EntryRef {
    pub fn new(index: usize, name: impl Into<String>) -> Self {
        Self {
            index,
            name: name.into(),
        }
    }
}

/// One mounted layer's storage.
pub trait SearchPathBackend: fmt::Debug + Send + Sync {
    fn kind(&self) -> SearchPathKind;

    fn find(&self, path: &str) -> Option<EntryRef>;

    /// Logical names matching `pattern`. Names may repeat; the chain
    /// de-duplicates across and within layers.
    fn enumerate<'a>(
        &'a self,
        pattern: &'a str,
        case_insensitive: bool,
    ) -> Box<dyn Iterator<Item = String> + 'a>;

    fn open(&self, entry: &EntryRef) -> FsResult<FileHandle>;

    /// Byte length of an entry as an opened handle would report it, taken
    /// from the layer's index without opening anything.
    fn size(&self, entry: &EntryRef) -> FsResult<u64>;

    fn load(&self, entry: &EntryRef) -> FsResult<Vec<u8>> {
        self.open(entry)?.read_to_end()
    }

    fn modification_time(&self, path: &str) -> Option<SystemTime>;

    fn describe(&self) -> String;

    /// Drops cached directory state so files created behind the engine's
    /// back become visible.
    fn rescan(&self) {}

    fn as_directory(&self) -> Option<&DirectoryBackend> {
        None
    }
}

/// Opens an archive layer of the given kind from a host file.
pub fn open_archive(
    kind: SearchPathKind,
    path: &Path,
    pool: &Arc<DescriptorPool>,
) -> FsResult<Box<dyn SearchPathBackend>> {
    Ok(match kind {
        SearchPathKind::Pak => Box::new(PakBackend::mount(path, pool)?),
        SearchPathKind::Wad => Box::new(WadBackend::mount(path, pool)?),
        SearchPathKind::Zip => Box::new(ZipBackend::mount(path, pool)?),
        SearchPathKind::Vpk => Box::new(VpkBackend::mount(path, pool)?),
        SearchPathKind::Directory | SearchPathKind::PlatformAssets => {
            return Err(FsError::mount(path, format!("{} is not an archive kind", kind)))
        }
    })
}

/// Yields `name` and each of its ancestor directories, deepest first:
/// `a/b/c.txt`, `a/b`, `a`.
pub(crate) fn with_ancestors(name: &str) -> impl Iterator<Item = &str> {
    let mut next = Some(name);
    std::iter::from_fn(move || {
        let current = next?;
        next = current
            .rfind('/')
            .map(|pos| &current[..pos])
            .filter(|parent| !parent.is_empty());
        Some(current)
    })
}

/// Enumeration shared by the flat archive formats: every entry name and its
/// ancestor directories, filtered by the pattern.
pub(crate) fn enumerate_names<'a, I>(
    names: I,
    pattern: &'a str,
    case_insensitive: bool,
) -> Box<dyn Iterator<Item = String> + 'a>
where
    I: Iterator<Item = &'a str> + 'a,
{
    Box::new(
        names
            .flat_map(with_ancestors)
            .filter(move |candidate| pattern::matches(candidate, pattern, case_insensitive))
            .map(str::to_string),
    )
}

/// Lowercases and flips separators so archive lookups ignore both.
pub(crate) fn lookup_key(path: &str) -> String {
    compat_formats::normalize_name(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ancestors_are_listed_deepest_first() {
        let all: Vec<&str> = with_ancestors("maps/sub/e1m1.bsp").collect();
        assert_eq!(all, vec!["maps/sub/e1m1.bsp", "maps/sub", "maps"]);
        let single: Vec<&str> = with_ancestors("progs.dat").collect();
        assert_eq!(single, vec!["progs.dat"]);
    }

    #[test]
    fn enumerate_includes_matching_directories() {
        let names = ["maps/e1m1.bsp", "maps/e1m2.bsp", "sound/a.wav"];
        let found: Vec<String> = enumerate_names(names.iter().copied(), "ma*", false).collect();
        assert_eq!(found, vec!["maps/e1m1.bsp", "maps", "maps/e1m2.bsp", "maps"]);
    }

    #[test]
    fn archive_kind_from_extension() {
        assert_eq!(
            SearchPathKind::for_archive_path(Path::new("id1/PAK0.PAK")),
            Some(SearchPathKind::Pak)
        );
        assert_eq!(
            SearchPathKind::for_archive_path(Path::new("baseq3/pak0.pk3")),
            Some(SearchPathKind::Zip)
        );
        assert_eq!(
            SearchPathKind::for_archive_path(Path::new("hl2/pak01_dir.vpk")),
            Some(SearchPathKind::Vpk)
        );
        assert_eq!(
            SearchPathKind::for_archive_path(Path::new("hl2/pak01_000.vpk")),
            None
        );
        assert_eq!(SearchPathKind::for_archive_path(Path::new("readme.txt")), None);
    }
}
