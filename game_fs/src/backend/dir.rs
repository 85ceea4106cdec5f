use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::backend::{EntryRef, SearchPathBackend, SearchPathKind};
use crate::descriptor::{DescriptorPool, SourceOptions};
use crate::error::{FsError, FsResult};
use crate::handle::FileHandle;
use crate::path_policy::split_parent;
use crate::pattern;

/// How a write-capable open treats the target file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WriteMode {
    pub truncate: bool,
    pub append: bool,
}

/// A plain host directory. Lookups are case-insensitive even on
/// case-sensitive hosts: each path component is matched against a cached
/// listing of its parent, keyed by the lowercased name.
#[derive(Debug)]
pub struct DirectoryBackend {
    root: PathBuf,
    pool: Arc<DescriptorPool>,
    listings: Mutex<HashMap<PathBuf, BTreeMap<String, String>>>,
}

impl DirectoryBackend {
    pub fn new(root: impl Into<PathBuf>, pool: &Arc<DescriptorPool>) -> Self {
        Self {
            root: root.into(),
            pool: Arc::clone(pool),
            listings: Mutex::new(HashMap::new()),
        }
    }

    pub fn mount(root: &Path, pool: &Arc<DescriptorPool>) -> FsResult<Self> {
        if !root.is_dir() {
            return Err(FsError::mount(root, "not a directory"));
        }
        Ok(Self::new(root, pool))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn read_listing(dir: &Path) -> BTreeMap<String, String> {
        let mut listing = BTreeMap::new();
        let Ok(read_dir) = fs::read_dir(dir) else {
            return listing;
        };
        let mut names: Vec<String> = read_dir
            .flatten()
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect();
        names.sort();
        for name in names {
            listing.entry(name.to_ascii_lowercase()).or_insert(name);
        }
        listing
    }

    /// Resolves `relative` against the root, fixing the case of every
    /// component that exists. A component missing from the cached listing
    /// triggers one rescan of that directory. With `create`, the unmatched
    /// remainder is appended verbatim instead of failing.
    pub fn fix_case(&self, relative: &str, create: bool) -> Option<PathBuf> {
        let mut listings = self.listings.lock();
        let mut host = self.root.clone();
        let mut fixed_rel = PathBuf::new();
        let mut parts = relative.split('/').filter(|part| !part.is_empty());
        while let Some(part) = parts.next() {
            let key = part.to_ascii_lowercase();
            let cached = listings
                .get(&fixed_rel)
                .and_then(|listing| listing.get(&key))
                .cloned();
            let found = match cached {
                Some(name) if host.join(&name).exists() => Some(name),
                _ => {
                    trace!(dir = %host.display(), entry = part, "rescanning directory listing");
                    let listing = Self::read_listing(&host);
                    let found = listing.get(&key).cloned();
                    listings.insert(fixed_rel.clone(), listing);
                    found
                }
            };
            match found {
                Some(name) => {
                    host.push(&name);
                    fixed_rel.push(&name);
                }
                None if create => {
                    host.push(part);
                    for rest in parts.by_ref() {
                        host.push(rest);
                    }
                    return Some(host);
                }
                None => return None,
            }
        }
        Some(host)
    }

    fn relative_name(&self, host: &Path) -> String {
        host.strip_prefix(&self.root)
            .unwrap_or(host)
            .components()
            .map(|part| part.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Opens (and creates, per `mode`) a file for writing under this root.
    /// Missing intermediate directories are created.
    pub fn open_for_write(&self, relative: &str, mode: WriteMode) -> FsResult<FileHandle> {
        let host = self
            .fix_case(relative, true)
            .ok_or_else(|| FsError::NotFound(relative.to_string()))?;
        if let Some(parent) = host.parent() {
            fs::create_dir_all(parent)?;
        }
        let options = SourceOptions {
            write: true,
            create: true,
            truncate: mode.truncate,
        };
        let source = Arc::new(self.pool.open(&host, options)?);
        debug!(path = %host.display(), "opened for write");
        self.forget_listing(&host);
        FileHandle::disk(&self.relative_name(&host), source, true, mode.append)
    }

    /// Host path of an existing file under this root.
    pub fn existing_path(&self, relative: &str) -> Option<PathBuf> {
        self.fix_case(relative, false).filter(|host| host.is_file())
    }

    /// Host path for a file that may not exist yet.
    pub fn target_path(&self, relative: &str) -> Option<PathBuf> {
        self.fix_case(relative, true)
    }

    /// Invalidates the cached listing of `host`'s parent after a change.
    pub fn forget_listing(&self, host: &Path) {
        let Some(parent) = host.parent() else {
            return;
        };
        let rel = parent.strip_prefix(&self.root).unwrap_or(parent);
        self.listings.lock().remove(rel);
    }
}

impl SearchPathBackend for DirectoryBackend {
    fn kind(&self) -> SearchPathKind {
        SearchPathKind::Directory
    }

    fn find(&self, path: &str) -> Option<EntryRef> {
        let host = self.existing_path(path)?;
        Some(EntryRef::new(0, self.relative_name(&host)))
    }

    fn enumerate<'a>(
        &'a self,
        pattern: &'a str,
        case_insensitive: bool,
    ) -> Box<dyn Iterator<Item = String> + 'a> {
        let (base, _) = split_parent(pattern);
        let base_rel = base.trim_end_matches(['/', '\\']);
        let dir = if base_rel.is_empty() {
            Some(self.root.clone())
        } else {
            self.fix_case(&base_rel.replace('\\', "/"), false)
        };
        let Some(dir) = dir else {
            return Box::new(std::iter::empty());
        };
        let listing = Self::read_listing(&dir);
        let prefix = base.to_string();
        Box::new(
            listing
                .into_values()
                .map(move |name| format!("{}{}", prefix, name))
                .filter(move |candidate| pattern::matches(candidate, pattern, case_insensitive)),
        )
    }

    fn open(&self, entry: &EntryRef) -> FsResult<FileHandle> {
        let host = self.root.join(&entry.name);
        let source = Arc::new(self.pool.open(&host, SourceOptions::READ)?);
        FileHandle::disk(&entry.name, source, false, false)
    }

    fn size(&self, entry: &EntryRef) -> FsResult<u64> {
        Ok(fs::metadata(self.root.join(&entry.name))?.len())
    }

    fn modification_time(&self, path: &str) -> Option<SystemTime> {
        let host = self.fix_case(path, false)?;
        fs::metadata(host).and_then(|meta| meta.modified()).ok()
    }

    fn describe(&self) -> String {
        self.root.display().to_string()
    }

    fn rescan(&self) {
        self.listings.lock().clear();
    }

    fn as_directory(&self) -> Option<&DirectoryBackend> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (tempfile::TempDir, DirectoryBackend) {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(dir.path().join("Sound/Ambience")).expect("mkdir");
        fs::write(dir.path().join("Sound/Ambience/Wind.WAV"), b"wind").expect("write");
        fs::write(dir.path().join("config.cfg"), b"bind").expect("write");
        let pool = DescriptorPool::new(None);
        let backend = DirectoryBackend::mount(dir.path(), &pool).expect("mount");
        (dir, backend)
    }

    #[test]
    fn find_fixes_case() {
        let (_dir, backend) = fixture();
        let entry = backend.find("sound/ambience/wind.wav").expect("found");
        assert_eq!(entry.name, "Sound/Ambience/Wind.WAV");
        let mut handle = backend.open(&entry).expect("open");
        assert_eq!(handle.read_to_end().expect("read"), b"wind");
        assert!(backend.find("sound/missing.wav").is_none());
        assert!(backend.find("sound/ambience").is_none());
    }

    #[test]
    fn new_files_are_found_after_cache_miss() {
        let (dir, backend) = fixture();
        assert!(backend.find("sound/ambience/rain.wav").is_none());
        fs::write(dir.path().join("Sound/Ambience/Rain.wav"), b"rain").expect("write");
        assert!(backend.find("SOUND/AMBIENCE/RAIN.WAV").is_some());
    }

    #[test]
    fn enumerate_lists_only_the_base_directory() {
        let (_dir, backend) = fixture();
        let top: Vec<String> = backend.enumerate("*", true).collect();
        assert_eq!(top, vec!["config.cfg", "Sound"]);
        let nested: Vec<String> = backend.enumerate("sound/ambience/*.wav", true).collect();
        assert_eq!(nested, vec!["sound/ambience/Wind.WAV"]);
        let strict: Vec<String> = backend.enumerate("sound/ambience/*.wav", false).collect();
        assert!(strict.is_empty());
    }

    #[test]
    fn write_creates_directories_and_reuses_existing_case() {
        let (dir, backend) = fixture();
        let mode = WriteMode {
            truncate: true,
            append: false,
        };
        let mut handle = backend
            .open_for_write("sound/new/beep.wav", mode)
            .expect("open for write");
        handle.print("beep").expect("write");
        handle.close();
        assert_eq!(
            fs::read(dir.path().join("Sound/new/beep.wav")).expect("read"),
            b"beep"
        );
        assert!(backend.find("Sound/New/Beep.wav").is_some());
    }

    #[test]
    fn mount_rejects_missing_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pool = DescriptorPool::new(None);
        assert!(matches!(
            DirectoryBackend::mount(&dir.path().join("nope"), &pool),
            Err(FsError::MountFailure { .. })
        ));
    }
}
